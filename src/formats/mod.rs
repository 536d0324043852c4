// src/formats/mod.rs

//! Pack format codecs and conversion between them
//!
//! Three interchange formats carry the same story graph: the sector-addressed
//! binary image (`.pack`), the enciphered on-device directory layout, and the
//! zip archive (`.zip`). Every codec decodes to `StoryPack` and encodes from
//! it; `convert` composes a decode, a media transcoding pass for the target,
//! and an encode.

pub mod archive;
pub mod device;
pub mod raw;
pub(crate) mod wire;

use crate::error::{Error, Result};
use crate::model::StoryPack;
use crate::progress::{ProgressSink, Silent};
use crate::transcode::transcode_for;
use std::path::Path;
use tracing::info;

pub use archive::ArchiveCodec;
pub use device::DeviceCodec;
pub use raw::{RawCodec, RawPackInfo};

/// The three on-disk renditions of a story pack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackFormat {
    /// Sector-addressed binary image, `.pack`
    Raw,
    /// Enciphered multi-file directory layout
    Device,
    /// Zip archive with a JSON manifest, `.zip`
    Archive,
}

impl PackFormat {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Device => "device",
            Self::Archive => "archive",
        }
    }
}

impl std::fmt::Display for PackFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a path by extension, or by directory shape for the device layout
pub fn detect_format(path: &Path) -> Result<PackFormat> {
    if path.is_dir() {
        if device::is_device_layout(path) {
            return Ok(PackFormat::Device);
        }
        return Err(Error::UnknownFormat(path.to_path_buf()));
    }
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("pack") => Ok(PackFormat::Raw),
        Some("zip") => Ok(PackFormat::Archive),
        _ => Err(Error::UnknownFormat(path.to_path_buf())),
    }
}

/// Per-run codec parameters
#[derive(Debug, Clone, Default)]
pub struct CodecOptions {
    /// XXTEA key for the device layout; the other formats ignore it
    pub device_key: Option<[u8; 16]>,
}

/// A reader/writer pair for one pack format
pub trait PackCodec: std::fmt::Debug {
    fn read_with_progress(&self, path: &Path, progress: &dyn ProgressSink) -> Result<StoryPack>;

    fn write_with_progress(
        &self,
        pack: &StoryPack,
        path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<()>;

    fn read(&self, path: &Path) -> Result<StoryPack> {
        self.read_with_progress(path, &Silent)
    }

    fn write(&self, pack: &StoryPack, path: &Path) -> Result<()> {
        self.write_with_progress(pack, path, &Silent)
    }
}

/// Construct the codec for a format
pub fn codec(format: PackFormat, options: &CodecOptions) -> Result<Box<dyn PackCodec>> {
    match format {
        PackFormat::Raw => Ok(Box::new(RawCodec)),
        PackFormat::Archive => Ok(Box::new(ArchiveCodec)),
        PackFormat::Device => {
            let key = options.device_key.ok_or(Error::MissingDeviceKey)?;
            Ok(Box::new(DeviceCodec::new(key)))
        }
    }
}

/// Format a destination path is meant to hold: extension when there is one,
/// otherwise the device directory layout
pub fn target_format(path: &Path) -> PackFormat {
    match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("pack") => PackFormat::Raw,
        Some("zip") => PackFormat::Archive,
        _ => PackFormat::Device,
    }
}

/// Convert a pack between formats: decode, transcode media for the target,
/// encode. Same-format conversion is rejected before any I/O happens.
pub fn convert(
    input: &Path,
    output: &Path,
    options: &CodecOptions,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let source = detect_format(input)?;
    let target = target_format(output);
    if source == target {
        return Err(Error::FormatMismatch(source.as_str()));
    }
    info!(%source, %target, "converting pack");

    let pack = codec(source, options)?.read_with_progress(input, progress)?;
    let pack = transcode_for(pack, target)?;
    codec(target, options)?.write_with_progress(&pack, output, progress)
}
