// src/model/media.rs

//! Media asset types and content-addressed naming
//!
//! An asset is immutable value data: a declared media type plus raw bytes.
//! Its name is derived from the SHA-1 of the bytes and the type's canonical
//! extension, so the name is both the deduplication key and enough to
//! re-derive the type. Two assets are "the same asset" when their names
//! match, which is why equality and hashing go through `name` rather than
//! the struct fields.

use crate::hash::sha1_hex;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Known image and audio encodings with their MIME types and extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Bitmap, uncompressed or RLE-compressed (same container either way)
    Bmp,
    Png,
    Jpeg,
    /// Uncompressed PCM wave
    Wav,
    Mp3,
    /// OGG Vorbis
    Ogg,
    Aac,
}

impl MediaType {
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::Bmp => "image/bmp",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Wav => "audio/x-wav",
            Self::Mp3 => "audio/mpeg",
            Self::Ogg => "audio/ogg",
            Self::Aac => "audio/aac",
        }
    }

    /// Recognised file extensions; the first one is canonical
    pub const fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Bmp => &["bmp"],
            Self::Png => &["png"],
            Self::Jpeg => &["jpg", "jpeg"],
            Self::Wav => &["wav"],
            Self::Mp3 => &["mp3"],
            Self::Ogg => &["ogg", "oga"],
            Self::Aac => &["aac", "m4a"],
        }
    }

    pub fn first_extension(&self) -> &'static str {
        self.extensions()[0]
    }

    /// Look up a type from a file extension, with or without a leading dot
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_lowercase();
        [
            Self::Bmp,
            Self::Png,
            Self::Jpeg,
            Self::Wav,
            Self::Mp3,
            Self::Ogg,
            Self::Aac,
        ]
        .into_iter()
        .find(|t| t.extensions().contains(&ext.as_str()))
    }

    pub const fn is_image(&self) -> bool {
        matches!(self, Self::Bmp | Self::Png | Self::Jpeg)
    }

    pub const fn is_audio(&self) -> bool {
        !self.is_image()
    }

    /// Classify raw bytes by magic numbers
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(b"BM") {
            Some(Self::Bmp)
        } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(Self::Png)
        } else if data.starts_with(&[0xff, 0xd8, 0xff]) {
            Some(Self::Jpeg)
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            Some(Self::Wav)
        } else if data.starts_with(b"OggS") {
            Some(Self::Ogg)
        } else if data.starts_with(b"ID3") {
            Some(Self::Mp3)
        } else if data.len() >= 2 && data[0] == 0xff && data[1] & 0xe0 == 0xe0 {
            // MPEG audio frame sync; layer bits 00 mean ADTS AAC
            if data[1] & 0x06 == 0 {
                Some(Self::Aac)
            } else {
                Some(Self::Mp3)
            }
        } else {
            None
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime())
    }
}

/// An embedded image or audio asset
#[derive(Debug, Clone)]
pub struct MediaAsset {
    media_type: MediaType,
    data: Vec<u8>,
}

impl MediaAsset {
    pub fn new(media_type: MediaType, data: Vec<u8>) -> Self {
        Self { media_type, data }
    }

    /// Build an asset by sniffing the byte encoding
    pub fn from_bytes(data: Vec<u8>) -> Option<Self> {
        MediaType::sniff(&data).map(|media_type| Self { media_type, data })
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Re-declare the media type without touching the bytes
    pub fn with_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Content-addressed name: hex SHA-1 of the bytes plus the canonical
    /// extension
    pub fn name(&self) -> String {
        format!(
            "{}.{}",
            sha1_hex(&self.data),
            self.media_type.first_extension()
        )
    }
}

impl PartialEq for MediaAsset {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for MediaAsset {}

impl Hash for MediaAsset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}
