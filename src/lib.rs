// src/lib.rs

//! Story pack toolkit: one in-memory graph model, three interchangeable
//! on-disk formats, and the media transcoding that moves packs between them.
//!
//! A pack is a directed graph of narration stages and branching menus with
//! embedded image and audio assets. The library decodes any supported format
//! into [`StoryPack`], re-encodes media for a target format, and writes the
//! result back out:
//!
//! - the sector-addressed binary image (`.pack`),
//! - the enciphered on-device directory layout,
//! - the zip archive with a JSON manifest (`.zip`).
//!
//! [`convert`] drives the whole decode → transcode → encode pipeline.

pub mod cipher;
mod error;
pub mod formats;
pub mod hash;
pub mod model;
pub mod progress;
pub mod transcode;

pub use error::{Error, Result};
pub use formats::{
    codec, convert, detect_format, ArchiveCodec, CodecOptions, DeviceCodec, PackCodec, PackFormat,
    RawCodec, RawPackInfo,
};
pub use model::{
    ActionId, ActionNode, ControlSettings, MediaAsset, MediaType, NodeMetadata, PackMetadata,
    Position, StageId, StageNode, StoryPack, Transition,
};
pub use progress::{ProgressSink, Silent};
pub use transcode::transcode_for;
