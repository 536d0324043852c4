// src/formats/archive.rs

//! Zip archive pack codec (`.zip`)
//!
//! The archive holds a `story.json` manifest, content-addressed asset files
//! under `assets/`, and an optional `thumbnail.png`. It is the only format
//! that persists enriched metadata (node names, editor positions, pack title
//! and description), and its references are symbolic — stage UUIDs and
//! action ids — so decoding needs no deferred binding.
//!
//! The entry stage is the one tagged `squareOne`; an untagged manifest falls
//! back to its first stage node. Asset bytes are stored uncompressed (media
//! encodings are already compressed), the manifest is deflated.

use crate::error::{Error, Result};
use crate::formats::PackCodec;
use crate::model::{
    ActionId, ActionNode, ControlSettings, MediaAsset, MediaType, NodeMetadata, PackMetadata,
    Position, StageId, StageNode, StoryPack, Transition,
};
use crate::progress::ProgressSink;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const FORMAT: &str = "archive";
const MANIFEST: &str = "story.json";
const ASSET_DIR: &str = "assets";
const THUMBNAIL: &str = "thumbnail.png";
const FORMAT_TAG: &str = "v1";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryJson {
    format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    version: u16,
    #[serde(default)]
    night_mode_available: bool,
    stage_nodes: Vec<StageJson>,
    action_nodes: Vec<ActionJson>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageJson {
    uuid: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    square_one: bool,
    #[serde(flatten)]
    meta: MetaJson,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ok_transition: Option<TransitionJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    home_transition: Option<TransitionJson>,
    control_settings: ControlJson,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionJson {
    id: String,
    #[serde(flatten)]
    meta: MetaJson,
    /// Stage UUIDs, in option order
    options: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<PositionJson>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransitionJson {
    action_node: String,
    option_index: u16,
}

#[derive(Debug, Serialize, Deserialize)]
struct PositionJson {
    x: i32,
    y: i32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlJson {
    wheel: bool,
    ok: bool,
    home: bool,
    pause: bool,
    #[serde(rename = "autoplay")]
    auto_jump: bool,
}

impl MetaJson {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.node_type.is_none()
            && self.group_id.is_none()
            && self.position.is_none()
    }

    fn into_model(self) -> Option<NodeMetadata> {
        if self.is_empty() {
            return None;
        }
        Some(NodeMetadata {
            name: self.name,
            node_type: self.node_type,
            group_id: self.group_id,
            position: self.position.map(|p| Position { x: p.x, y: p.y }),
        })
    }

    fn from_model(meta: &Option<NodeMetadata>) -> Self {
        match meta {
            None => Self::default(),
            Some(m) => Self {
                name: m.name.clone(),
                node_type: m.node_type.clone(),
                group_id: m.group_id.clone(),
                position: m.position.map(|p| PositionJson { x: p.x, y: p.y }),
            },
        }
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| Error::MalformedHeader {
        format: FORMAT,
        reason: format!("invalid UUID {s:?} in manifest"),
    })
}

/// Reads and writes the zip archive format
#[derive(Debug)]
pub struct ArchiveCodec;

impl PackCodec for ArchiveCodec {
    fn read_with_progress(&self, path: &Path, progress: &dyn ProgressSink) -> Result<StoryPack> {
        let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;

        let manifest: StoryJson = {
            let mut file = match archive.by_name(MANIFEST) {
                Ok(file) => file,
                Err(ZipError::FileNotFound) => {
                    return Err(Error::MalformedHeader {
                        format: FORMAT,
                        reason: format!("archive has no {MANIFEST}"),
                    })
                }
                Err(e) => return Err(e.into()),
            };
            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)?;
            serde_json::from_slice(&bytes)?
        };
        if manifest.format != FORMAT_TAG {
            return Err(Error::MalformedHeader {
                format: FORMAT,
                reason: format!("unsupported manifest format {:?}", manifest.format),
            });
        }

        let mut stage_nodes = manifest.stage_nodes;
        // square-one reorder happens before any index is built
        if let Some(tagged) = stage_nodes.iter().position(|s| s.square_one) {
            if tagged != 0 {
                let entry = stage_nodes.remove(tagged);
                stage_nodes.insert(0, entry);
            }
        }

        let mut stage_ids: HashMap<Uuid, StageId> = HashMap::new();
        for (i, stage) in stage_nodes.iter().enumerate() {
            let uuid = parse_uuid(&stage.uuid)?;
            if stage_ids.insert(uuid, StageId(i)).is_some() {
                return Err(Error::MalformedHeader {
                    format: FORMAT,
                    reason: format!("duplicate stage UUID {uuid}"),
                });
            }
        }
        let mut action_ids: HashMap<String, ActionId> = HashMap::new();
        for (i, action) in manifest.action_nodes.iter().enumerate() {
            if action_ids.insert(action.id.clone(), ActionId(i)).is_some() {
                return Err(Error::MalformedHeader {
                    format: FORMAT,
                    reason: format!("duplicate action node id {:?}", action.id),
                });
            }
        }

        debug!(
            stages = stage_nodes.len(),
            actions = manifest.action_nodes.len(),
            "decoding archive pack"
        );

        let asset_total: u64 = (0..archive.len())
            .filter_map(|i| {
                let file = archive.by_index(i).ok()?;
                file.name().starts_with("assets/").then(|| file.size())
            })
            .sum();
        let mut asset_read = 0u64;
        let mut assets: HashMap<String, MediaAsset> = HashMap::new();
        let mut load_asset = |archive: &mut ZipArchive<BufReader<File>>,
                              name: &str|
         -> Result<MediaAsset> {
            if let Some(asset) = assets.get(name) {
                return Ok(asset.clone());
            }
            let media_type = Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .and_then(MediaType::from_extension)
                .ok_or_else(|| Error::UnsupportedMediaType(name.to_string()))?;
            let mut file = match archive.by_name(&format!("{ASSET_DIR}/{name}")) {
                Ok(file) => file,
                Err(ZipError::FileNotFound) => {
                    return Err(Error::UnresolvedReference {
                        kind: "asset",
                        reference: name.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            };
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            asset_read += data.len() as u64;
            progress.report(asset_read, asset_total);
            let asset = MediaAsset::new(media_type, data);
            assets.insert(name.to_string(), asset.clone());
            Ok(asset)
        };

        let mut pack = StoryPack::new(manifest.version);
        let transition = |t: &TransitionJson| -> Result<Transition> {
            let action = *action_ids.get(&t.action_node).ok_or_else(|| {
                Error::UnresolvedReference {
                    kind: "action node",
                    reference: t.action_node.clone(),
                }
            })?;
            Ok(Transition {
                action,
                option_index: t.option_index,
            })
        };

        for stage_json in stage_nodes {
            let mut stage = StageNode::new(parse_uuid(&stage_json.uuid)?);
            if let Some(name) = &stage_json.image {
                stage.image = Some(load_asset(&mut archive, name)?);
            }
            if let Some(name) = &stage_json.audio {
                stage.audio = Some(load_asset(&mut archive, name)?);
            }
            stage.ok_transition = stage_json.ok_transition.as_ref().map(&transition).transpose()?;
            stage.home_transition = stage_json
                .home_transition
                .as_ref()
                .map(&transition)
                .transpose()?;
            let c = stage_json.control_settings;
            stage.settings = ControlSettings {
                wheel: c.wheel,
                ok: c.ok,
                home: c.home,
                pause: c.pause,
                auto_jump: c.auto_jump,
            };
            stage.meta = stage_json.meta.into_model();
            pack.add_stage(stage);
        }

        for action_json in manifest.action_nodes {
            let mut options = Vec::with_capacity(action_json.options.len());
            for uuid_str in &action_json.options {
                let uuid = parse_uuid(uuid_str)?;
                let id = *stage_ids
                    .get(&uuid)
                    .ok_or_else(|| Error::UnresolvedReference {
                        kind: "stage",
                        reference: uuid_str.clone(),
                    })?;
                options.push(id);
            }
            pack.add_action(ActionNode {
                options,
                meta: action_json.meta.into_model(),
            });
        }

        let thumbnail = match archive.by_name(THUMBNAIL) {
            Ok(mut file) => {
                let mut data = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut data)?;
                Some(data)
            }
            Err(ZipError::FileNotFound) => None,
            Err(e) => return Err(e.into()),
        };
        if manifest.title.is_some()
            || manifest.description.is_some()
            || manifest.night_mode_available
            || thumbnail.is_some()
        {
            pack.metadata = Some(PackMetadata {
                title: manifest.title,
                description: manifest.description,
                thumbnail,
                night_mode: manifest.night_mode_available,
            });
        }

        pack.validate()?;
        Ok(pack)
    }

    fn write_with_progress(
        &self,
        pack: &StoryPack,
        path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        pack.validate()?;

        // action ids are not persisted in the model; mint one per arena entry
        let action_ids: Vec<String> = pack
            .actions
            .iter()
            .map(|_| Uuid::new_v4().to_string())
            .collect();
        let transition_json = |t: &Transition| TransitionJson {
            action_node: action_ids[t.action.0].clone(),
            option_index: t.option_index,
        };

        let mut assets: BTreeMap<String, &MediaAsset> = BTreeMap::new();
        let stage_nodes = pack
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                for asset in [&stage.image, &stage.audio].into_iter().flatten() {
                    assets.insert(asset.name(), asset);
                }
                StageJson {
                    uuid: stage.uuid.to_string(),
                    square_one: i == 0,
                    meta: MetaJson::from_model(&stage.meta),
                    image: stage.image.as_ref().map(MediaAsset::name),
                    audio: stage.audio.as_ref().map(MediaAsset::name),
                    ok_transition: stage.ok_transition.as_ref().map(transition_json),
                    home_transition: stage.home_transition.as_ref().map(transition_json),
                    control_settings: ControlJson {
                        wheel: stage.settings.wheel,
                        ok: stage.settings.ok,
                        home: stage.settings.home,
                        pause: stage.settings.pause,
                        auto_jump: stage.settings.auto_jump,
                    },
                }
            })
            .collect();
        let action_nodes = pack
            .actions
            .iter()
            .zip(&action_ids)
            .map(|(action, id)| ActionJson {
                id: id.clone(),
                meta: MetaJson::from_model(&action.meta),
                options: action
                    .options
                    .iter()
                    .map(|s| pack.stages[s.0].uuid.to_string())
                    .collect(),
            })
            .collect();

        let meta = pack.metadata.as_ref();
        let manifest = StoryJson {
            format: FORMAT_TAG.to_string(),
            title: meta.and_then(|m| m.title.clone()),
            description: meta.and_then(|m| m.description.clone()),
            version: pack.version,
            night_mode_available: meta.is_some_and(|m| m.night_mode),
            stage_nodes,
            action_nodes,
        };

        debug!(assets = assets.len(), "writing archive pack");

        let mut zip = ZipWriter::new(BufWriter::new(File::create(path)?));
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        // media bytes are already compressed
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        zip.start_file(MANIFEST, deflated)?;
        serde_json::to_writer_pretty(&mut zip, &manifest)?;

        let total: u64 = assets.values().map(|a| a.data().len() as u64).sum();
        let mut written = 0u64;
        for (name, asset) in &assets {
            zip.start_file(format!("{ASSET_DIR}/{name}"), stored)?;
            zip.write_all(asset.data())?;
            written += asset.data().len() as u64;
            progress.report(written, total);
        }

        if let Some(thumbnail) = meta.and_then(|m| m.thumbnail.as_deref()) {
            zip.start_file(THUMBNAIL, stored)?;
            zip.write_all(thumbnail)?;
        }

        zip.finish()?.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_pack() -> StoryPack {
        let mut pack = StoryPack::new(1);
        for i in 0..3u128 {
            pack.add_stage(StageNode::new(Uuid::from_u128(0x2000 + i)));
        }
        let action = pack.add_action(ActionNode {
            options: vec![StageId(1), StageId(2)],
            meta: Some(NodeMetadata {
                name: Some("menu".to_string()),
                ..Default::default()
            }),
        });
        pack.stages[0].ok_transition = Some(Transition {
            action,
            option_index: 0,
        });
        pack.stages[0].meta = Some(NodeMetadata {
            name: Some("cover".to_string()),
            node_type: Some("cover".to_string()),
            group_id: None,
            position: Some(Position { x: 10, y: -4 }),
        });
        pack.stages[1].image = Some(MediaAsset::new(MediaType::Png, b"png-bytes".to_vec()));
        pack.stages[2].image = Some(MediaAsset::new(MediaType::Png, b"png-bytes".to_vec()));
        pack.stages[1].audio = Some(MediaAsset::new(MediaType::Ogg, b"ogg-bytes".to_vec()));
        pack.metadata = Some(PackMetadata {
            title: Some("Example".to_string()),
            description: None,
            thumbnail: Some(vec![1, 2, 3]),
            night_mode: true,
        });
        pack
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("story.zip");
        let pack = sample_pack();
        ArchiveCodec.write(&pack, &path).unwrap();
        let decoded = ArchiveCodec.read(&path).unwrap();

        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.stages.len(), 3);
        assert_eq!(decoded.actions.len(), 1);
        for (a, b) in pack.stages.iter().zip(&decoded.stages) {
            assert_eq!(a.uuid, b.uuid);
            assert_eq!(a.meta, b.meta);
            assert_eq!(a.image, b.image);
            assert_eq!(a.audio, b.audio);
        }
        assert_eq!(decoded.actions[0].options, vec![StageId(1), StageId(2)]);
        assert_eq!(
            decoded.actions[0].meta.as_ref().and_then(|m| m.name.as_deref()),
            Some("menu")
        );
        assert_eq!(decoded.metadata, pack.metadata);
    }

    #[test]
    fn test_shared_asset_is_stored_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("story.zip");
        ArchiveCodec.write(&sample_pack(), &path).unwrap();

        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let asset_entries = archive
            .file_names()
            .filter(|n| n.starts_with("assets/"))
            .count();
        // two distinct assets despite three references
        assert_eq!(asset_entries, 2);
        assert!(archive.by_name(THUMBNAIL).is_ok());
    }

    #[test]
    fn test_square_one_stage_becomes_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("story.zip");
        let manifest = serde_json::json!({
            "format": "v1",
            "version": 1,
            "stageNodes": [
                {
                    "uuid": Uuid::from_u128(1).to_string(),
                    "controlSettings": {
                        "wheel": false, "ok": false, "home": false,
                        "pause": false, "autoplay": true
                    }
                },
                {
                    "uuid": Uuid::from_u128(2).to_string(),
                    "squareOne": true,
                    "controlSettings": {
                        "wheel": true, "ok": true, "home": false,
                        "pause": false, "autoplay": false
                    }
                }
            ],
            "actionNodes": []
        });
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file(MANIFEST, SimpleFileOptions::default()).unwrap();
        serde_json::to_writer(&mut zip, &manifest).unwrap();
        zip.finish().unwrap();

        let pack = ArchiveCodec.read(&path).unwrap();
        assert_eq!(pack.entry().map(|s| s.uuid), Some(Uuid::from_u128(2)));
        assert!(pack.stages[0].settings.wheel);
        assert!(pack.stages[1].settings.auto_jump);
    }

    #[test]
    fn test_missing_manifest_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("story.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("unrelated.txt", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"nope").unwrap();
        zip.finish().unwrap();

        let err = ArchiveCodec.read(&path).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));
    }

    #[test]
    fn test_missing_asset_is_unresolved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("story.zip");
        let manifest = serde_json::json!({
            "format": "v1",
            "version": 1,
            "stageNodes": [{
                "uuid": Uuid::from_u128(9).to_string(),
                "image": "0000000000000000000000000000000000000000.png",
                "controlSettings": {
                    "wheel": false, "ok": false, "home": false,
                    "pause": false, "autoplay": false
                }
            }],
            "actionNodes": []
        });
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file(MANIFEST, SimpleFileOptions::default()).unwrap();
        serde_json::to_writer(&mut zip, &manifest).unwrap();
        zip.finish().unwrap();

        let err = ArchiveCodec.read(&path).unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference { kind: "asset", .. }
        ));
    }
}
