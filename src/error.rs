// src/error.rs

//! Central error type for the pack codecs and the transcoding pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by codecs, the format registry and the transcoder
#[derive(Error, Debug)]
pub enum Error {
    /// Bad magic, version or size fields in a pack header
    #[error("malformed {format} header: {reason}")]
    MalformedHeader {
        format: &'static str,
        reason: String,
    },

    /// A transition or stage node references an address or id that is never
    /// visited; indicates truncated or corrupt input
    #[error("unresolved {kind} reference {reference}")]
    UnresolvedReference {
        kind: &'static str,
        reference: String,
    },

    /// Asset bytes cannot be classified into a known image or audio type
    #[error("unsupported media type for asset {0}")]
    UnsupportedMediaType(String),

    /// An image or audio conversion library rejected its input
    #[error("failed to transcode asset {asset}: {reason}")]
    TranscodeFailure { asset: String, reason: String },

    /// Conversion target equals the pack's current format
    #[error("pack is already in {0} format")]
    FormatMismatch(&'static str),

    /// The path matches no known pack format
    #[error("cannot determine pack format of {0}")]
    UnknownFormat(PathBuf),

    /// Device layouts cannot be read or written without the cipher key
    #[error("device layout requires a cipher key")]
    MissingDeviceKey,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, Error>;
