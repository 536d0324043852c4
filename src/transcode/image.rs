// src/transcode/image.rs

//! Per-format image policies
//!
//! - Archive keeps everything but bitmaps, which become PNG.
//! - Raw wants plain uncompressed BMP (the firmware blits it straight from
//!   sector memory).
//! - Device wants the retail 4-bit RLE grayscale BMP, encoded here by hand
//!   since no maintained crate writes RLE bitmaps.
//!
//! Every policy sniffs the bytes rather than trusting the declared type, so
//! a mislabelled asset (the device layout declares everything BMP) is still
//! converted correctly.

use crate::error::{Error, Result};
use crate::formats::wire::FieldWriter;
use crate::model::{MediaAsset, MediaType};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Archive accepts PNG and JPEG; bitmaps are converted
pub fn to_archive(asset: &MediaAsset) -> Result<MediaAsset> {
    match sniffed(asset)? {
        MediaType::Bmp => reencode(asset, ImageFormat::Png, MediaType::Png),
        other => Ok(asset.clone().with_type(other)),
    }
}

/// Raw wants uncompressed BMP only
pub fn to_raw(asset: &MediaAsset) -> Result<MediaAsset> {
    match sniffed(asset)? {
        MediaType::Bmp if !is_rle4(asset.data()) => Ok(asset.clone().with_type(MediaType::Bmp)),
        _ => reencode(asset, ImageFormat::Bmp, MediaType::Bmp),
    }
}

/// Device wants the 16-level grayscale RLE4 bitmap the retail firmware ships
pub fn to_device(asset: &MediaAsset) -> Result<MediaAsset> {
    match sniffed(asset)? {
        MediaType::Bmp if is_rle4(asset.data()) => Ok(asset.clone().with_type(MediaType::Bmp)),
        _ => Ok(MediaAsset::new(MediaType::Bmp, encode_rle4(&decode(asset)?))),
    }
}

fn sniffed(asset: &MediaAsset) -> Result<MediaType> {
    match MediaType::sniff(asset.data()) {
        Some(t) if t.is_image() => Ok(t),
        _ => Err(Error::UnsupportedMediaType(asset.name())),
    }
}

fn decode(asset: &MediaAsset) -> Result<DynamicImage> {
    image::load_from_memory(asset.data()).map_err(|e| Error::TranscodeFailure {
        asset: asset.name(),
        reason: e.to_string(),
    })
}

fn reencode(asset: &MediaAsset, format: ImageFormat, media_type: MediaType) -> Result<MediaAsset> {
    let img = decode(asset)?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)
        .map_err(|e| Error::TranscodeFailure {
            asset: asset.name(),
            reason: e.to_string(),
        })?;
    Ok(MediaAsset::new(media_type, out.into_inner()))
}

/// BMP with BI_RLE4 in the info header's compression field
pub fn is_rle4(data: &[u8]) -> bool {
    data.len() >= 34
        && data.starts_with(b"BM")
        && u32::from_le_bytes([data[30], data[31], data[32], data[33]]) == 2
}

const BMP_FILE_HEADER_LEN: u32 = 14;
const BMP_INFO_HEADER_LEN: u32 = 40;
const BMP_PALETTE_LEN: u32 = 16 * 4;

/// Encode a 16-level grayscale 4-bit RLE bitmap, rows bottom-up as BMP
/// requires, each row a sequence of `(count, nibble-pair)` runs ended by an
/// end-of-line marker, the last row by end-of-bitmap
fn encode_rle4(img: &DynamicImage) -> Vec<u8> {
    let gray = img.to_luma8();
    let (width, height) = gray.dimensions();

    let mut rle = Vec::new();
    for y in (0..height).rev() {
        let mut x = 0;
        while x < width {
            let level = gray.get_pixel(x, y).0[0] >> 4;
            let mut run = 1u32;
            while x + run < width
                && run < 255
                && gray.get_pixel(x + run, y).0[0] >> 4 == level
            {
                run += 1;
            }
            rle.push(run as u8);
            rle.push(level << 4 | level);
            x += run;
        }
        if y == 0 {
            rle.extend_from_slice(&[0x00, 0x01]); // end of bitmap
        } else {
            rle.extend_from_slice(&[0x00, 0x00]); // end of line
        }
    }

    let data_offset = BMP_FILE_HEADER_LEN + BMP_INFO_HEADER_LEN + BMP_PALETTE_LEN;
    let mut w = FieldWriter::new();
    w.bytes(b"BM");
    w.u32(data_offset + rle.len() as u32);
    w.u16(0);
    w.u16(0);
    w.u32(data_offset);

    w.u32(BMP_INFO_HEADER_LEN);
    w.i32(width as i32);
    w.i32(height as i32); // positive height: bottom-up rows
    w.u16(1); // planes
    w.u16(4); // bits per pixel
    w.u32(2); // BI_RLE4
    w.u32(rle.len() as u32);
    w.i32(0);
    w.i32(0);
    w.u32(16); // palette entries used
    w.u32(16);

    // grayscale palette, BGRA
    for level in 0..16u8 {
        let v = level * 17;
        w.bytes(&[v, v, v, 0]);
    }
    w.bytes(&rle);
    w.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn gradient() -> DynamicImage {
        let img = GrayImage::from_fn(8, 4, |x, _| Luma([(x * 32) as u8]));
        DynamicImage::ImageLuma8(img)
    }

    fn png_asset() -> MediaAsset {
        let mut out = Cursor::new(Vec::new());
        gradient().write_to(&mut out, ImageFormat::Png).unwrap();
        MediaAsset::new(MediaType::Png, out.into_inner())
    }

    #[test]
    fn test_rle4_header_fields() {
        let bytes = encode_rle4(&gradient());
        assert!(bytes.starts_with(b"BM"));
        assert!(is_rle4(&bytes));
        // width and height
        assert_eq!(i32::from_le_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]), 8);
        assert_eq!(i32::from_le_bytes([bytes[22], bytes[23], bytes[24], bytes[25]]), 4);
        // 4 bits per pixel
        assert_eq!(u16::from_le_bytes([bytes[28], bytes[29]]), 4);
        // last two RLE bytes are the end-of-bitmap marker
        assert_eq!(&bytes[bytes.len() - 2..], &[0x00, 0x01]);
    }

    #[test]
    fn test_device_policy_produces_rle4() {
        let out = to_device(&png_asset()).unwrap();
        assert_eq!(out.media_type(), MediaType::Bmp);
        assert!(is_rle4(out.data()));
    }

    #[test]
    fn test_device_policy_keeps_existing_rle4() {
        let first = to_device(&png_asset()).unwrap();
        let second = to_device(&first).unwrap();
        assert_eq!(first.name(), second.name());
    }

    #[test]
    fn test_raw_policy_rejects_rle4_bytes() {
        let rle = to_device(&png_asset()).unwrap();
        let flat = to_raw(&rle).unwrap();
        assert_eq!(flat.media_type(), MediaType::Bmp);
        assert!(!is_rle4(flat.data()));
    }

    #[test]
    fn test_archive_policy_converts_bmp_to_png() {
        let bmp = to_raw(&png_asset()).unwrap();
        let png = to_archive(&bmp).unwrap();
        assert_eq!(png.media_type(), MediaType::Png);
        assert!(png.data().starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn test_archive_policy_passes_png_through() {
        let asset = png_asset();
        let out = to_archive(&asset).unwrap();
        assert_eq!(out.name(), asset.name());
    }

    #[test]
    fn test_mislabelled_bytes_follow_their_sniffed_type() {
        // PNG bytes declared as BMP, as the device layout produces
        let mislabelled = png_asset().with_type(MediaType::Bmp);
        let out = to_archive(&mislabelled).unwrap();
        assert_eq!(out.media_type(), MediaType::Png);
    }
}
