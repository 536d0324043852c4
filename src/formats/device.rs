// src/formats/device.rs

//! Encrypted multi-file on-device pack layout
//!
//! A pack on the appliance is a directory of four index files — `ni` (node
//! index), `li` (list index), `ri` (image index), `si` (sound index) — plus
//! asset content files under `rf/` and `sf/`. The first 512 bytes of every
//! file are XXTEA-obscured with the device key (see `crate::cipher`).
//!
//! Action nodes are not stored as discrete records: each distinct offset
//! into the list index yields one synthetic `ActionNode`, shared by every
//! transition naming that offset. Unlike the streamed raw format the index
//! files are fully buffered before decoding, so no ordered visitation is
//! needed.
//!
//! The retail firmware labels every image as BMP and every sound as MP3 no
//! matter what the bytes are; that labelling is reproduced verbatim to stay
//! bit-compatible. Stage UUIDs are not persisted on-device and are
//! synthesised on decode.

use crate::cipher::{cipher_block, decipher_block};
use crate::error::{Error, Result};
use crate::formats::wire::{FieldWriter, Fields};
use crate::formats::PackCodec;
use crate::model::{
    ActionId, ActionNode, ControlSettings, MediaAsset, MediaType, StageId, StageNode, StoryPack,
    Transition,
};
use crate::progress::ProgressSink;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

const NODE_INDEX: &str = "ni";
const LIST_INDEX: &str = "li";
const IMAGE_INDEX: &str = "ri";
const SOUND_INDEX: &str = "si";
const IMAGE_DIR: &str = "rf";
const SOUND_DIR: &str = "sf";

const FORMAT: &str = "device";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 512;
const RECORD_LEN: usize = 44;
/// Path records in `ri`/`si` are a fixed 12 ASCII bytes: `000\XXXXXXXX`
const PATH_RECORD_LEN: usize = 12;

/// Check whether a directory has the expected device-layout shape
pub fn is_device_layout(dir: &Path) -> bool {
    [NODE_INDEX, LIST_INDEX, IMAGE_INDEX, SOUND_INDEX]
        .iter()
        .all(|name| dir.join(name).is_file())
}

/// Reads and writes the enciphered on-device layout
#[derive(Debug)]
pub struct DeviceCodec {
    key: [u8; 16],
}

struct NodeIndexHeader {
    pack_version: u16,
    node_area_offset: usize,
    record_len: usize,
    stage_count: usize,
    image_count: usize,
    sound_count: usize,
    factory_disabled: bool,
}

impl DeviceCodec {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    fn read_artifact(&self, dir: &Path, name: &str) -> Result<Vec<u8>> {
        Ok(decipher_block(&fs::read(dir.join(name))?, &self.key))
    }

    fn write_artifact(&self, dir: &Path, name: &str, data: &[u8]) -> Result<()> {
        fs::write(dir.join(name), cipher_block(data, &self.key))?;
        Ok(())
    }

    fn parse_header(&self, ni: &[u8]) -> Result<NodeIndexHeader> {
        if ni.len() < HEADER_LEN {
            return Err(Error::MalformedHeader {
                format: FORMAT,
                reason: "node index shorter than its header".to_string(),
            });
        }
        let mut f = Fields::new(ni);
        let format_version = f.u16();
        if format_version != FORMAT_VERSION {
            return Err(Error::MalformedHeader {
                format: FORMAT,
                reason: format!("unsupported node index version {format_version}"),
            });
        }
        let pack_version = f.u16();
        let node_area_offset = f.i32();
        let _node_area_size = f.i32();
        let record_len = f.i32();
        let stage_count = f.i32();
        let image_count = f.i32();
        let sound_count = f.i32();
        let factory_disabled = f.u8() == 1;
        if node_area_offset < 0 || record_len < RECORD_LEN as i32 || stage_count <= 0 {
            return Err(Error::MalformedHeader {
                format: FORMAT,
                reason: "inconsistent node index header fields".to_string(),
            });
        }
        Ok(NodeIndexHeader {
            pack_version,
            node_area_offset: node_area_offset as usize,
            record_len: record_len as usize,
            stage_count: stage_count as usize,
            image_count: image_count.max(0) as usize,
            sound_count: sound_count.max(0) as usize,
            factory_disabled,
        })
    }
}

/// Decode `ri`/`si` into relative asset paths under the content folder
fn parse_path_records(data: &[u8], count: usize, index: &'static str) -> Result<Vec<String>> {
    if data.len() < count * PATH_RECORD_LEN {
        return Err(Error::MalformedHeader {
            format: FORMAT,
            reason: format!("{index} holds fewer than {count} path records"),
        });
    }
    Ok(data[..count * PATH_RECORD_LEN]
        .chunks_exact(PATH_RECORD_LEN)
        .map(|record| {
            String::from_utf8_lossy(record)
                .trim_end_matches('\0')
                .replace('\\', "/")
        })
        .collect())
}

fn parse_list_index(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

impl PackCodec for DeviceCodec {
    fn read_with_progress(&self, path: &Path, progress: &dyn ProgressSink) -> Result<StoryPack> {
        let ni = self.read_artifact(path, NODE_INDEX)?;
        let header = self.parse_header(&ni)?;
        let li = parse_list_index(&self.read_artifact(path, LIST_INDEX)?);
        let image_paths = parse_path_records(
            &self.read_artifact(path, IMAGE_INDEX)?,
            header.image_count,
            IMAGE_INDEX,
        )?;
        let sound_paths = parse_path_records(
            &self.read_artifact(path, SOUND_INDEX)?,
            header.sound_count,
            SOUND_INDEX,
        )?;

        let records_end = header.node_area_offset + header.stage_count * header.record_len;
        if ni.len() < records_end {
            return Err(Error::MalformedHeader {
                format: FORMAT,
                reason: "node index shorter than its record area".to_string(),
            });
        }

        debug!(
            stages = header.stage_count,
            images = header.image_count,
            sounds = header.sound_count,
            "decoding device pack"
        );

        let mut pack = StoryPack::new(header.pack_version);
        pack.factory_disabled = header.factory_disabled;

        // one synthetic action node per distinct list-index offset
        let mut actions_by_offset: HashMap<(i32, i32), ActionId> = HashMap::new();
        // asset files are read and deciphered once per index entry
        let mut image_cache: HashMap<i32, MediaAsset> = HashMap::new();
        let mut sound_cache: HashMap<i32, MediaAsset> = HashMap::new();

        for record in 0..header.stage_count {
            let start = header.node_area_offset + record * header.record_len;
            let mut f = Fields::new(&ni[start..start + header.record_len]);
            let image_index = f.i32();
            let sound_index = f.i32();
            let ok = (f.i32(), f.i32(), f.i32());
            let home = (f.i32(), f.i32(), f.i32());
            let settings = ControlSettings {
                wheel: f.u16() != 0,
                ok: f.u16() != 0,
                home: f.u16() != 0,
                pause: f.u16() != 0,
                auto_jump: f.u16() != 0,
            };

            let mut stage = StageNode::new(Uuid::new_v4());
            stage.settings = settings;

            if image_index >= 0 {
                let asset = match image_cache.get(&image_index) {
                    Some(asset) => asset.clone(),
                    None => {
                        let rel = image_paths.get(image_index as usize).ok_or_else(|| {
                            Error::UnresolvedReference {
                                kind: "image asset",
                                reference: format!("index {image_index}"),
                            }
                        })?;
                        let data = self.read_artifact(path, &format!("{IMAGE_DIR}/{rel}"))?;
                        // firmware contract: always declared BMP
                        let asset = MediaAsset::new(MediaType::Bmp, data);
                        image_cache.insert(image_index, asset.clone());
                        asset
                    }
                };
                stage.image = Some(asset);
            }
            if sound_index >= 0 {
                let asset = match sound_cache.get(&sound_index) {
                    Some(asset) => asset.clone(),
                    None => {
                        let rel = sound_paths.get(sound_index as usize).ok_or_else(|| {
                            Error::UnresolvedReference {
                                kind: "sound asset",
                                reference: format!("index {sound_index}"),
                            }
                        })?;
                        let data = self.read_artifact(path, &format!("{SOUND_DIR}/{rel}"))?;
                        // firmware contract: always declared MP3
                        let asset = MediaAsset::new(MediaType::Mp3, data);
                        sound_cache.insert(sound_index, asset.clone());
                        asset
                    }
                };
                stage.audio = Some(asset);
            }

            let stage_id = pack.add_stage(stage);

            for (slot, (offset, count, selected)) in [(0, ok), (1, home)] {
                if offset < 0 || count < 0 || selected < 0 {
                    continue;
                }
                let action = match actions_by_offset.get(&(offset, count)) {
                    Some(&action) => action,
                    None => {
                        let start = offset as usize;
                        let end = start + count as usize;
                        if end > li.len() {
                            return Err(Error::UnresolvedReference {
                                kind: "action node",
                                reference: format!("list offset {offset}+{count}"),
                            });
                        }
                        let options = li[start..end]
                            .iter()
                            .map(|&stage_index| StageId(stage_index as usize))
                            .collect();
                        let action = pack.add_action(ActionNode {
                            options,
                            meta: None,
                        });
                        actions_by_offset.insert((offset, count), action);
                        action
                    }
                };
                let transition = Transition {
                    action,
                    option_index: selected as u16,
                };
                let stage = &mut pack.stages[stage_id.0];
                if slot == 0 {
                    stage.ok_transition = Some(transition);
                } else {
                    stage.home_transition = Some(transition);
                }
            }

            progress.report(record as u64 + 1, header.stage_count as u64);
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
        fs::create_dir_all(path.join(IMAGE_DIR).join("000"))?;
        fs::create_dir_all(path.join(SOUND_DIR).join("000"))?;

        // content-addressed dedup: one index entry and one content file per
        // distinct asset
        struct AssetTable<'a> {
            by_name: HashMap<String, i32>,
            records: Vec<String>,
            files: Vec<(String, &'a MediaAsset)>,
        }
        impl<'a> AssetTable<'a> {
            fn new() -> Self {
                Self {
                    by_name: HashMap::new(),
                    records: Vec::new(),
                    files: Vec::new(),
                }
            }
            fn index_of(&mut self, asset: &'a MediaAsset) -> i32 {
                let name = asset.name();
                if let Some(&index) = self.by_name.get(&name) {
                    return index;
                }
                let index = self.records.len() as i32;
                let file_name = format!("{index:08X}");
                self.records.push(format!("000\\{file_name}"));
                self.files.push((format!("000/{file_name}"), asset));
                self.by_name.insert(name, index);
                index
            }
        }

        let mut images = AssetTable::new();
        let mut sounds = AssetTable::new();
        let mut li_words: Vec<u32> = Vec::new();
        let mut action_offsets: Vec<i32> = Vec::with_capacity(pack.actions.len());
        for action in &pack.actions {
            action_offsets.push(li_words.len() as i32);
            li_words.extend(action.options.iter().map(|s| s.0 as u32));
        }

        let mut records = FieldWriter::new();
        for stage in &pack.stages {
            match &stage.image {
                Some(asset) => records.i32(images.index_of(asset)),
                None => records.i32(-1),
            }
            match &stage.audio {
                Some(asset) => records.i32(sounds.index_of(asset)),
                None => records.i32(-1),
            }
            for transition in [&stage.ok_transition, &stage.home_transition] {
                match transition {
                    Some(t) => {
                        records.i32(action_offsets[t.action.0]);
                        records.i32(pack.actions[t.action.0].options.len() as i32);
                        records.i32(t.option_index as i32);
                    }
                    None => {
                        records.i32(-1);
                        records.i32(-1);
                        records.i32(-1);
                    }
                }
            }
            let s = &stage.settings;
            for flag in [s.wheel, s.ok, s.home, s.pause, s.auto_jump] {
                records.u16(flag as u16);
            }
            records.u16(0); // record padding up to 44 bytes
        }
        let records = records.into_inner();

        let mut ni = FieldWriter::new();
        ni.u16(FORMAT_VERSION);
        ni.u16(pack.version);
        ni.i32(HEADER_LEN as i32);
        ni.i32(records.len() as i32);
        ni.i32(RECORD_LEN as i32);
        ni.i32(pack.stages.len() as i32);
        ni.i32(images.records.len() as i32);
        ni.i32(sounds.records.len() as i32);
        ni.u8(pack.factory_disabled as u8);
        ni.pad_to(HEADER_LEN);
        ni.bytes(&records);

        let mut li = FieldWriter::new();
        for word in &li_words {
            li.u32(*word);
        }

        let path_index = |records: &[String]| {
            let mut out = Vec::with_capacity(records.len() * PATH_RECORD_LEN);
            for record in records {
                let mut bytes = record.as_bytes().to_vec();
                bytes.resize(PATH_RECORD_LEN, 0);
                out.extend_from_slice(&bytes);
            }
            out
        };

        debug!(
            stages = pack.stages.len(),
            images = images.files.len(),
            sounds = sounds.files.len(),
            "writing device pack"
        );

        self.write_artifact(path, NODE_INDEX, &ni.into_inner())?;
        self.write_artifact(path, LIST_INDEX, &li.into_inner())?;
        self.write_artifact(path, IMAGE_INDEX, &path_index(&images.records))?;
        self.write_artifact(path, SOUND_INDEX, &path_index(&sounds.records))?;

        let total: u64 = images
            .files
            .iter()
            .chain(&sounds.files)
            .map(|(_, asset)| asset.data().len() as u64)
            .sum();
        let mut written = 0u64;
        for (dir, files) in [(IMAGE_DIR, &images.files), (SOUND_DIR, &sounds.files)] {
            for (rel, asset) in files {
                self.write_artifact(path, &format!("{dir}/{rel}"), asset.data())?;
                written += asset.data().len() as u64;
                progress.report(written, total);
            }
        }
        Ok(())
    }
}
