// src/transcode/audio.rs

//! Per-format audio policies
//!
//! - Archive keeps compressed encodings and converts uncompressed wave to
//!   OGG Vorbis.
//! - Raw wants 16-bit PCM wave only (the firmware feeds sectors straight to
//!   the DAC).
//! - Device wants mono 44.1 kHz MP3. An asset that is already MP3 gets its
//!   ID3 tags stripped and is re-encoded only when its frame header shows a
//!   different rate or channel count.
//!
//! Decoding goes through `hound` for wave and `symphonia` for everything
//! compressed; encoding through `vorbis_rs` and `mp3lame-encoder`. All
//! intermediate audio is interleaved 16-bit PCM.

use crate::error::{Error, Result};
use crate::model::{MediaAsset, MediaType};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, MonoPcm, Quality};
use std::io::Cursor;
use std::num::{NonZeroU32, NonZeroU8};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use vorbis_rs::VorbisEncoderBuilder;

pub const DEVICE_SAMPLE_RATE: u32 = 44_100;
pub const DEVICE_CHANNELS: u16 = 1;

/// Decoded interleaved 16-bit PCM
struct Pcm {
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
}

/// Archive accepts MP3, OGG and AAC; wave is compressed to OGG
pub fn to_archive(asset: &MediaAsset) -> Result<MediaAsset> {
    match sniffed(asset)? {
        MediaType::Wav => {
            let pcm = decode_wav(asset)?;
            Ok(MediaAsset::new(MediaType::Ogg, encode_ogg(&pcm, asset)?))
        }
        other => Ok(asset.clone().with_type(other)),
    }
}

/// Raw wants 16-bit PCM wave only
pub fn to_raw(asset: &MediaAsset) -> Result<MediaAsset> {
    match sniffed(asset)? {
        MediaType::Wav => Ok(asset.clone().with_type(MediaType::Wav)),
        _ => {
            let pcm = decode_compressed(asset)?;
            Ok(MediaAsset::new(MediaType::Wav, encode_wav(&pcm)))
        }
    }
}

/// Device wants mono 44.1 kHz MP3
pub fn to_device(asset: &MediaAsset) -> Result<MediaAsset> {
    let sniffed = sniffed(asset)?;
    if sniffed == MediaType::Mp3 {
        let stripped = strip_id3(asset.data());
        if let Some(info) = frame_info(stripped) {
            if info.sample_rate == DEVICE_SAMPLE_RATE && info.channels == DEVICE_CHANNELS {
                return Ok(MediaAsset::new(MediaType::Mp3, stripped.to_vec()));
            }
        }
    }
    let pcm = match sniffed {
        MediaType::Wav => decode_wav(asset)?,
        _ => decode_compressed(asset)?,
    };
    let pcm = conform(pcm, DEVICE_SAMPLE_RATE, DEVICE_CHANNELS);
    Ok(MediaAsset::new(MediaType::Mp3, encode_mp3(&pcm, asset)?))
}

fn sniffed(asset: &MediaAsset) -> Result<MediaType> {
    match MediaType::sniff(asset.data()) {
        Some(t) if t.is_audio() => Ok(t),
        _ => Err(Error::UnsupportedMediaType(asset.name())),
    }
}

fn failure(asset: &MediaAsset, reason: impl ToString) -> Error {
    Error::TranscodeFailure {
        asset: asset.name(),
        reason: reason.to_string(),
    }
}

fn decode_wav(asset: &MediaAsset) -> Result<Pcm> {
    let mut reader =
        WavReader::new(Cursor::new(asset.data())).map_err(|e| failure(asset, &e))?;
    let spec = reader.spec();
    let samples: std::result::Result<Vec<i16>, hound::Error> = match spec.sample_format {
        SampleFormat::Int if spec.bits_per_sample <= 16 => reader.samples::<i16>().collect(),
        SampleFormat::Int => {
            let shift = spec.bits_per_sample - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect()
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect(),
    };
    Ok(Pcm {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples: samples.map_err(|e| failure(asset, &e))?,
    })
}

fn encode_wav(pcm: &Pcm) -> Vec<u8> {
    let spec = WavSpec {
        channels: pcm.channels,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        // infallible: the cursor never fails and the spec is well-formed
        let mut writer = match WavWriter::new(&mut cursor, spec) {
            Ok(w) => w,
            Err(_) => return Vec::new(),
        };
        for &sample in &pcm.samples {
            if writer.write_sample(sample).is_err() {
                break;
            }
        }
        let _ = writer.finalize();
    }
    cursor.into_inner()
}

/// Decode MP3, OGG or AAC to PCM
fn decode_compressed(asset: &MediaAsset) -> Result<Pcm> {
    let source = MediaSourceStream::new(
        Box::new(Cursor::new(asset.data().to_vec())),
        Default::default(),
    );
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|_| Error::UnsupportedMediaType(asset.name()))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| Error::UnsupportedMediaType(asset.name()))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| failure(asset, &e))?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(DEVICE_SAMPLE_RATE);
    let mut channels = 1u16;
    let mut samples: Vec<i16> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<i16>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(failure(asset, &e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // corrupt frames are skipped, not fatal
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(failure(asset, &e)),
        }
    }
    if samples.is_empty() {
        return Err(failure(asset, "no decodable audio frames"));
    }
    Ok(Pcm {
        sample_rate,
        channels,
        samples,
    })
}

fn encode_ogg(pcm: &Pcm, asset: &MediaAsset) -> Result<Vec<u8>> {
    let rate = NonZeroU32::new(pcm.sample_rate)
        .ok_or_else(|| failure(asset, "zero sample rate"))?;
    let channels = NonZeroU8::new(pcm.channels as u8)
        .ok_or_else(|| failure(asset, "zero channel count"))?;
    let mut out = Vec::new();
    let mut encoder = VorbisEncoderBuilder::new(rate, channels, &mut out)
        .map_err(|e| failure(asset, &e))?
        .build()
        .map_err(|e| failure(asset, &e))?;

    let planar: Vec<Vec<f32>> = (0..pcm.channels as usize)
        .map(|ch| {
            pcm.samples
                .iter()
                .skip(ch)
                .step_by(pcm.channels as usize)
                .map(|&s| s as f32 / -(i16::MIN as f32))
                .collect()
        })
        .collect();
    encoder
        .encode_audio_block(&planar)
        .map_err(|e| failure(asset, &e))?;
    encoder.finish().map_err(|e| failure(asset, &e))?;
    Ok(out)
}

/// Encode mono PCM to 128 kbps MP3
fn encode_mp3(pcm: &Pcm, asset: &MediaAsset) -> Result<Vec<u8>> {
    let mut builder = Builder::new().ok_or_else(|| failure(asset, "encoder init failed"))?;
    builder
        .set_num_channels(pcm.channels as u8)
        .map_err(|e| failure(asset, format!("{e:?}")))?;
    builder
        .set_sample_rate(pcm.sample_rate)
        .map_err(|e| failure(asset, format!("{e:?}")))?;
    builder
        .set_brate(Bitrate::Kbps128)
        .map_err(|e| failure(asset, format!("{e:?}")))?;
    builder
        .set_quality(Quality::Good)
        .map_err(|e| failure(asset, format!("{e:?}")))?;
    let mut encoder = builder
        .build()
        .map_err(|e| failure(asset, format!("{e:?}")))?;

    let mut out = Vec::new();
    out.reserve(mp3lame_encoder::max_required_buffer_size(pcm.samples.len()));
    encoder
        .encode_to_vec(MonoPcm(&pcm.samples), &mut out)
        .map_err(|e| failure(asset, format!("{e:?}")))?;
    encoder
        .flush_to_vec::<FlushNoGap>(&mut out)
        .map_err(|e| failure(asset, format!("{e:?}")))?;
    Ok(out)
}

/// Drop leading ID3v2 (including its optional footer) and trailing ID3v1
fn strip_id3(data: &[u8]) -> &[u8] {
    let mut data = data;
    if data.len() >= 10 && data.starts_with(b"ID3") {
        let size = data[6..10]
            .iter()
            .fold(0usize, |acc, &b| acc << 7 | (b & 0x7f) as usize);
        let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
        let total = 10 + size + footer;
        if total <= data.len() {
            data = &data[total..];
        }
    }
    if data.len() >= 128 && data[data.len() - 128..].starts_with(b"TAG") {
        data = &data[..data.len() - 128];
    }
    data
}

struct FrameInfo {
    sample_rate: u32,
    channels: u16,
}

/// Sample rate and channel count from the first MPEG audio frame header
fn frame_info(data: &[u8]) -> Option<FrameInfo> {
    let h = data.get(0..4)?;
    if h[0] != 0xff || h[1] & 0xe0 != 0xe0 {
        return None;
    }
    const RATES: [u32; 3] = [44_100, 48_000, 32_000];
    let rate_index = ((h[2] >> 2) & 0x03) as usize;
    if rate_index == 3 {
        return None;
    }
    let sample_rate = match (h[1] >> 3) & 0x03 {
        3 => RATES[rate_index],     // MPEG 1
        2 => RATES[rate_index] / 2, // MPEG 2
        0 => RATES[rate_index] / 4, // MPEG 2.5
        _ => return None,
    };
    let channels = if h[3] >> 6 == 3 { 1 } else { 2 };
    Some(FrameInfo {
        sample_rate,
        channels,
    })
}

/// Downmix and linearly resample to the target rate and channel count
fn conform(pcm: Pcm, sample_rate: u32, channels: u16) -> Pcm {
    let pcm = if pcm.channels == channels {
        pcm
    } else {
        let n = pcm.channels as usize;
        let samples = pcm
            .samples
            .chunks_exact(n)
            .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / n as i32) as i16)
            .collect();
        Pcm {
            sample_rate: pcm.sample_rate,
            channels: 1,
            samples,
        }
    };
    if pcm.sample_rate == sample_rate || pcm.samples.is_empty() {
        return Pcm {
            sample_rate,
            ..pcm
        };
    }
    let ratio = sample_rate as f64 / pcm.sample_rate as f64;
    let out_len = (pcm.samples.len() as f64 * ratio).round() as usize;
    let last = pcm.samples.len() - 1;
    let samples = (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let i0 = (pos.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let frac = pos - i0 as f64;
            let v = pcm.samples[i0] as f64 * (1.0 - frac) + pcm.samples[i1] as f64 * frac;
            v.round() as i16
        })
        .collect();
    Pcm {
        sample_rate,
        channels: pcm.channels,
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_wav(sample_rate: u32, channels: u16, frames: usize) -> MediaAsset {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let v = (f64::sin(i as f64 * 0.05) * 12_000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(v).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        MediaAsset::new(MediaType::Wav, cursor.into_inner())
    }

    #[test]
    fn test_strip_id3_removes_leading_tag() {
        // 10-byte ID3v2 header declaring a 20-byte tag body
        let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x14".to_vec();
        data.extend_from_slice(&[0u8; 20]);
        data.extend_from_slice(&[0xff, 0xfb, 0x90, 0xc0]);
        assert_eq!(strip_id3(&data), &[0xff, 0xfb, 0x90, 0xc0]);
    }

    #[test]
    fn test_strip_id3_removes_trailing_v1_tag() {
        let mut data = vec![0xff, 0xfb, 0x90, 0xc0];
        data.extend_from_slice(&[0u8; 60]);
        let mut tag = b"TAG".to_vec();
        tag.resize(128, 0);
        data.extend_from_slice(&tag);
        assert_eq!(strip_id3(&data).len(), 64);
    }

    #[test]
    fn test_frame_info_mono_44100() {
        // MPEG1 layer III, 44.1 kHz, mono
        let info = frame_info(&[0xff, 0xfb, 0x90, 0xc0]).unwrap();
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.channels, 1);
        // same frame, stereo mode bits
        let info = frame_info(&[0xff, 0xfb, 0x90, 0x00]).unwrap();
        assert_eq!(info.channels, 2);
    }

    #[test]
    fn test_conform_downmixes_and_resamples() {
        let pcm = Pcm {
            sample_rate: 22_050,
            channels: 2,
            samples: vec![100, 300, 100, 300, 100, 300, 100, 300],
        };
        let out = conform(pcm, 44_100, 1);
        assert_eq!(out.sample_rate, 44_100);
        assert_eq!(out.channels, 1);
        // four stereo frames downmixed to 200, then doubled in length
        assert_eq!(out.samples.len(), 8);
        assert!(out.samples.iter().all(|&s| s == 200));
    }

    #[test]
    fn test_wav_decode_encode_round_trip() {
        let asset = sine_wav(44_100, 1, 500);
        let pcm = decode_wav(&asset).unwrap();
        assert_eq!(pcm.sample_rate, 44_100);
        assert_eq!(pcm.channels, 1);
        assert_eq!(pcm.samples.len(), 500);

        let again = decode_wav(&MediaAsset::new(MediaType::Wav, encode_wav(&pcm))).unwrap();
        assert_eq!(again.samples, pcm.samples);
    }

    #[test]
    fn test_archive_policy_compresses_wav_to_ogg() {
        let out = to_archive(&sine_wav(44_100, 2, 2000)).unwrap();
        assert_eq!(out.media_type(), MediaType::Ogg);
        assert!(out.data().starts_with(b"OggS"));
    }

    #[test]
    fn test_raw_policy_keeps_wav() {
        let asset = sine_wav(22_050, 1, 100);
        let out = to_raw(&asset).unwrap();
        assert_eq!(out.name(), asset.name());
    }

    #[test]
    fn test_device_policy_encodes_wav_to_mp3() {
        let out = to_device(&sine_wav(22_050, 2, 2000)).unwrap();
        assert_eq!(out.media_type(), MediaType::Mp3);
        // LAME output starts at an MPEG frame sync
        let data = out.data();
        assert!(data.len() >= 2 && data[0] == 0xff && data[1] & 0xe0 == 0xe0);
    }

    #[test]
    fn test_device_policy_keeps_conformant_mp3() {
        let first = to_device(&sine_wav(44_100, 1, 2000)).unwrap();
        let second = to_device(&first).unwrap();
        assert_eq!(first.name(), second.name());
    }

    #[test]
    fn test_unclassifiable_bytes_are_unsupported() {
        let asset = MediaAsset::new(MediaType::Mp3, b"not audio at all".to_vec());
        assert!(matches!(
            to_device(&asset).unwrap_err(),
            Error::UnsupportedMediaType(_)
        ));
    }
}
