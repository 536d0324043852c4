// src/transcode/mod.rs

//! Media transcoding pipeline
//!
//! Each pack format accepts a specific set of media encodings, so conversion
//! re-encodes assets on the way in. Identical bytes appear on many stages;
//! the pipeline converts each distinct asset (by content name) exactly once
//! and fans the distinct set out over a rayon thread pool. A single failed
//! conversion fails the whole pass.

pub mod audio;
pub mod image;

use crate::error::Result;
use crate::formats::PackFormat;
use crate::model::{MediaAsset, StageNode, StoryPack};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::debug;

type Policy = fn(&MediaAsset) -> Result<MediaAsset>;

#[derive(Clone, Copy)]
enum Field {
    Image,
    Audio,
}

impl Field {
    fn get(self, stage: &StageNode) -> Option<&MediaAsset> {
        match self {
            Self::Image => stage.image.as_ref(),
            Self::Audio => stage.audio.as_ref(),
        }
    }

    fn get_mut(self, stage: &mut StageNode) -> &mut Option<MediaAsset> {
        match self {
            Self::Image => &mut stage.image,
            Self::Audio => &mut stage.audio,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }
}

/// Re-encode every asset in the pack to the encodings `target` accepts
pub fn transcode_for(mut pack: StoryPack, target: PackFormat) -> Result<StoryPack> {
    let (image_policy, audio_policy): (Policy, Policy) = match target {
        PackFormat::Archive => (image::to_archive, audio::to_archive),
        PackFormat::Device => (image::to_device, audio::to_device),
        PackFormat::Raw => (image::to_raw, audio::to_raw),
    };
    retarget(&mut pack, Field::Image, image_policy)?;
    retarget(&mut pack, Field::Audio, audio_policy)?;
    Ok(pack)
}

/// Convert the distinct assets of one field in parallel, then swap every
/// stage's reference to the converted bytes
fn retarget(pack: &mut StoryPack, field: Field, policy: Policy) -> Result<()> {
    let mut seen = HashSet::new();
    let mut unique: Vec<MediaAsset> = Vec::new();
    for stage in &pack.stages {
        if let Some(asset) = field.get(stage) {
            if seen.insert(asset.name()) {
                unique.push(asset.clone());
            }
        }
    }
    if unique.is_empty() {
        return Ok(());
    }
    debug!(kind = field.as_str(), distinct = unique.len(), "transcoding assets");

    let converted = unique
        .par_iter()
        .map(|asset| Ok((asset.name(), policy(asset)?)))
        .collect::<Result<HashMap<String, MediaAsset>>>()?;

    for stage in &mut pack.stages {
        let slot = field.get_mut(stage);
        if let Some(asset) = slot.take() {
            *slot = converted.get(&asset.name()).cloned();
        }
    }
    Ok(())
}
