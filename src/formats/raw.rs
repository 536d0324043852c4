// src/formats/raw.rs

//! Sector-addressed binary pack codec (`.pack`)
//!
//! The raw image is a sequence of 512-byte sectors read in one forward pass:
//! sector 0 is the pack header, sectors `1..=n` hold one stage node each,
//! then come action-node sectors and finally asset sectors, all at ascending
//! addresses. Descriptors inside stage sectors carry physical sector
//! indices, which keeps the zero terminator of an action-node option list
//! unambiguous (no stage ever lives in sector 0).
//!
//! Because the underlying medium is a forward-only byte stream, deferred
//! references are collected into address-ordered maps during the stage pass
//! and resolved by visiting action and asset sectors in increasing offset
//! order. A reference behind the read position can never be satisfied and
//! surfaces as `UnresolvedReference`.
//!
//! All multi-byte fields are little-endian except the UUID, stored as two
//! big-endian 64-bit halves, most significant first.

use crate::error::{Error, Result};
use crate::formats::wire::{FieldWriter, Fields};
use crate::formats::PackCodec;
use crate::model::{
    ActionId, ActionNode, ControlSettings, MediaAsset, MediaType, StageId, StageNode, StoryPack,
    Transition,
};
use crate::progress::ProgressSink;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

pub const SECTOR_SIZE: usize = 512;

const FORMAT: &str = "raw";

/// Number of sectors needed to hold `bytes`
fn sectors_for(bytes: usize) -> u32 {
    bytes.div_ceil(SECTOR_SIZE) as u32
}

/// Reads and writes the sector-addressed binary image format
#[derive(Debug)]
pub struct RawCodec;

/// Header metadata available without decoding the full pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPackInfo {
    /// Pack identifier: the entry stage's UUID
    pub uuid: Uuid,
    pub version: u16,
    pub stage_count: u16,
    pub factory_disabled: bool,
}

struct SectorReader<'a, R: Read> {
    inner: R,
    /// Physical index of the next sector to be read
    next: u32,
    total: u64,
    progress: &'a dyn ProgressSink,
}

impl<'a, R: Read> SectorReader<'a, R> {
    fn new(inner: R, progress: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            next: 0,
            total: 0,
            progress,
        }
    }

    fn set_total(&mut self, sectors: u64) {
        self.total = sectors;
    }

    fn read_sector(&mut self) -> Result<[u8; SECTOR_SIZE]> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.inner.read_exact(&mut buf)?;
        self.next += 1;
        self.progress.report(
            self.next as u64 * SECTOR_SIZE as u64,
            self.total * SECTOR_SIZE as u64,
        );
        Ok(buf)
    }

    /// Skip forward to a physical sector, consuming padding sectors.
    /// A target behind the read position is an unresolvable reference.
    fn skip_to(&mut self, sector: u32, kind: &'static str) -> Result<()> {
        if sector < self.next {
            return Err(Error::UnresolvedReference {
                kind,
                reference: format!("sector {sector}"),
            });
        }
        while self.next < sector {
            self.read_sector()?;
        }
        Ok(())
    }
}

struct SectorWriter<'a, W: Write> {
    inner: W,
    written: u64,
    total: u64,
    progress: &'a dyn ProgressSink,
}

impl<'a, W: Write> SectorWriter<'a, W> {
    fn new(inner: W, total_sectors: u64, progress: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            written: 0,
            total: total_sectors,
            progress,
        }
    }

    /// Write a buffer zero-padded to a whole number of sectors
    fn write_padded(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        let tail = data.len() % SECTOR_SIZE;
        if tail != 0 {
            self.inner.write_all(&vec![0u8; SECTOR_SIZE - tail])?;
        }
        self.written += sectors_for(data.len()) as u64;
        self.progress.report(
            self.written * SECTOR_SIZE as u64,
            self.total * SECTOR_SIZE as u64,
        );
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    Ok,
    Home,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AssetKind {
    Image,
    Audio,
}

struct PendingTransition {
    stage: usize,
    slot: Slot,
    selected: u16,
}

struct PendingAsset {
    kind: AssetKind,
    sectors: u32,
    stages: Vec<usize>,
}

impl RawCodec {
    /// Metadata-only read: header fields plus the entry stage's UUID from
    /// the first 16 bytes of sector 1
    pub fn read_info<R: Read>(&self, mut reader: R) -> Result<RawPackInfo> {
        let mut header = [0u8; SECTOR_SIZE];
        reader.read_exact(&mut header)?;
        let mut f = Fields::new(&header);
        let stage_count = f.u16();
        let factory_disabled = f.u8() == 1;
        let version = f.u16();
        if stage_count == 0 {
            return Err(Error::MalformedHeader {
                format: FORMAT,
                reason: "zero stage nodes".to_string(),
            });
        }
        let mut id = [0u8; 16];
        reader.read_exact(&mut id)?;
        let mut f = Fields::new(&id);
        let uuid = Uuid::from_u64_pair(f.u64_be(), f.u64_be());
        Ok(RawPackInfo {
            uuid,
            version,
            stage_count,
            factory_disabled,
        })
    }

    /// Decode a pack from any forward byte stream in a single pass
    pub fn read_stream<R: Read>(
        &self,
        reader: R,
        progress: &dyn ProgressSink,
    ) -> Result<StoryPack> {
        let mut r = SectorReader::new(reader, progress);

        let header = r.read_sector()?;
        let mut f = Fields::new(&header);
        let stage_count = f.u16() as usize;
        let factory_disabled = f.u8() == 1;
        let version = f.u16();
        if stage_count == 0 {
            return Err(Error::MalformedHeader {
                format: FORMAT,
                reason: "zero stage nodes".to_string(),
            });
        }

        let mut pack = StoryPack::new(version);
        pack.factory_disabled = factory_disabled;
        pack.stages.reserve(stage_count);

        let mut pending_actions: BTreeMap<u32, Vec<PendingTransition>> = BTreeMap::new();
        let mut pending_assets: BTreeMap<u32, PendingAsset> = BTreeMap::new();

        for i in 0..stage_count {
            let sector = r.read_sector()?;
            let mut f = Fields::new(&sector);
            let uuid = Uuid::from_u64_pair(f.u64_be(), f.u64_be());

            let mut queue_asset = |offset: i32, size: i32, kind: AssetKind| -> Result<()> {
                if offset < 0 {
                    return Ok(());
                }
                let entry = pending_assets.entry(offset as u32).or_insert(PendingAsset {
                    kind,
                    sectors: size.max(0) as u32,
                    stages: Vec::new(),
                });
                if entry.kind != kind {
                    return Err(Error::MalformedHeader {
                        format: FORMAT,
                        reason: format!("sector {offset} is addressed as both image and audio"),
                    });
                }
                entry.stages.push(i);
                Ok(())
            };
            let image = (f.i32(), f.i32());
            queue_asset(image.0, image.1, AssetKind::Image)?;
            let audio = (f.i32(), f.i32());
            queue_asset(audio.0, audio.1, AssetKind::Audio)?;

            for slot in [Slot::Ok, Slot::Home] {
                let offset = f.i16();
                let _option_count = f.i16();
                let selected = f.i16();
                if offset >= 0 {
                    pending_actions
                        .entry(offset as u32)
                        .or_default()
                        .push(PendingTransition {
                            stage: i,
                            slot,
                            selected: selected.max(0) as u16,
                        });
                }
            }

            let settings = ControlSettings {
                wheel: f.u16() != 0,
                ok: f.u16() != 0,
                home: f.u16() != 0,
                pause: f.u16() != 0,
                auto_jump: f.u16() != 0,
            };

            let mut stage = StageNode::new(uuid);
            stage.settings = settings;
            pack.stages.push(stage);
        }

        let end = pending_actions
            .keys()
            .map(|&s| s as u64 + 1)
            .chain(
                pending_assets
                    .iter()
                    .map(|(&s, a)| s as u64 + a.sectors as u64),
            )
            .max()
            .unwrap_or(1 + stage_count as u64);
        r.set_total(end);

        debug!(
            stages = stage_count,
            actions = pending_actions.len(),
            assets = pending_assets.len(),
            "decoding raw pack"
        );

        // Action-node sectors, ascending: a zero-terminated list of stage
        // sector indices, possibly spilling into following sectors
        for (&sector_idx, waiters) in &pending_actions {
            r.skip_to(sector_idx, "action node")?;
            let mut sector = r.read_sector()?;
            let mut f = Fields::new(&sector);
            let mut options = Vec::new();
            loop {
                if f.remaining() < 2 {
                    sector = r.read_sector()?;
                    f = Fields::new(&sector);
                }
                let value = f.u16();
                if value == 0 {
                    break;
                }
                // stage i lives in physical sector i + 1
                let stage = value as usize - 1;
                if stage >= pack.stages.len() {
                    return Err(Error::UnresolvedReference {
                        kind: "stage",
                        reference: format!("sector {value}"),
                    });
                }
                options.push(StageId(stage));
            }
            let action = pack.add_action(ActionNode {
                options,
                meta: None,
            });
            for waiting in waiters {
                let transition = Transition {
                    action,
                    option_index: waiting.selected,
                };
                match waiting.slot {
                    Slot::Ok => pack.stages[waiting.stage].ok_transition = Some(transition),
                    Slot::Home => pack.stages[waiting.stage].home_transition = Some(transition),
                }
            }
        }

        // Asset sectors, ascending; the queue an address came from fixes the
        // media type (uncompressed bitmap or wave)
        for (&sector_idx, pending) in &pending_assets {
            r.skip_to(sector_idx, "asset")?;
            let mut data = Vec::with_capacity(pending.sectors as usize * SECTOR_SIZE);
            for _ in 0..pending.sectors {
                data.extend_from_slice(&r.read_sector()?);
            }
            let media_type = match pending.kind {
                AssetKind::Image => MediaType::Bmp,
                AssetKind::Audio => MediaType::Wav,
            };
            let asset = MediaAsset::new(media_type, data);
            for &stage in &pending.stages {
                match pending.kind {
                    AssetKind::Image => pack.stages[stage].image = Some(asset.clone()),
                    AssetKind::Audio => pack.stages[stage].audio = Some(asset.clone()),
                }
            }
        }

        pack.validate()?;
        Ok(pack)
    }

    /// Encode a pack to any byte stream, laying out stage sectors, then
    /// action-node sectors, then deduplicated asset sectors
    pub fn write_stream<W: Write>(
        &self,
        pack: &StoryPack,
        writer: W,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        pack.validate()?;
        if pack.stages.len() > u16::MAX as usize {
            return Err(Error::MalformedHeader {
                format: FORMAT,
                reason: format!("{} stage nodes exceed the format limit", pack.stages.len()),
            });
        }

        // Address assignment pre-pass
        let mut next: u32 = 1 + pack.stages.len() as u32;
        let mut action_sectors = Vec::with_capacity(pack.actions.len());
        for action in &pack.actions {
            action_sectors.push(next);
            next += sectors_for((action.options.len() + 1) * 2).max(1);
        }

        let mut asset_addrs: HashMap<String, (u32, u32)> = HashMap::new();
        let mut asset_order: Vec<&MediaAsset> = Vec::new();
        for stage in &pack.stages {
            for asset in [&stage.image, &stage.audio].into_iter().flatten() {
                let name = asset.name();
                if !asset_addrs.contains_key(&name) {
                    let size = sectors_for(asset.data().len());
                    asset_addrs.insert(name, (next, size));
                    asset_order.push(asset);
                    next += size;
                }
            }
        }
        if action_sectors.last().is_some_and(|&s| s > i16::MAX as u32) {
            return Err(Error::MalformedHeader {
                format: FORMAT,
                reason: "pack too large: action sector beyond transition range".to_string(),
            });
        }

        let mut w = SectorWriter::new(writer, next as u64, progress);

        let mut header = FieldWriter::new();
        header.u16(pack.stages.len() as u16);
        header.u8(pack.factory_disabled as u8);
        header.u16(pack.version);
        header.pad_to(SECTOR_SIZE);
        w.write_padded(&header.into_inner())?;

        for stage in &pack.stages {
            let mut sec = FieldWriter::new();
            let (msb, lsb) = stage.uuid.as_u64_pair();
            sec.u64_be(msb);
            sec.u64_be(lsb);
            for asset in [&stage.image, &stage.audio] {
                match asset {
                    Some(a) => {
                        let (offset, size) = asset_addrs[&a.name()];
                        sec.i32(offset as i32);
                        sec.i32(size as i32);
                    }
                    None => {
                        sec.i32(-1);
                        sec.i32(-1);
                    }
                }
            }
            for transition in [&stage.ok_transition, &stage.home_transition] {
                match transition {
                    Some(t) => {
                        sec.i16(action_sectors[t.action.0] as i16);
                        sec.i16(pack.actions[t.action.0].options.len() as i16);
                        sec.i16(t.option_index as i16);
                    }
                    None => {
                        sec.i16(-1);
                        sec.i16(-1);
                        sec.i16(-1);
                    }
                }
            }
            let s = &stage.settings;
            for flag in [s.wheel, s.ok, s.home, s.pause, s.auto_jump] {
                sec.u16(flag as u16);
            }
            sec.pad_to(SECTOR_SIZE);
            w.write_padded(&sec.into_inner())?;
        }

        for action in &pack.actions {
            let mut sec = FieldWriter::new();
            for option in &action.options {
                sec.u16(option.0 as u16 + 1);
            }
            sec.u16(0);
            w.write_padded(&sec.into_inner())?;
        }

        for asset in asset_order {
            w.write_padded(asset.data())?;
        }

        w.inner.flush()?;
        Ok(())
    }
}

impl PackCodec for RawCodec {
    fn read_with_progress(&self, path: &Path, progress: &dyn ProgressSink) -> Result<StoryPack> {
        let file = File::open(path)?;
        self.read_stream(BufReader::new(file), progress)
    }

    fn write_with_progress(
        &self,
        pack: &StoryPack,
        path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let file = File::create(path)?;
        self.write_stream(pack, BufWriter::new(file), progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Silent;
    use std::io::Cursor;

    fn sample_pack() -> StoryPack {
        let mut pack = StoryPack::new(3);
        pack.factory_disabled = true;
        for i in 0..3u128 {
            pack.add_stage(StageNode::new(Uuid::from_u128(0x1000 + i)));
        }
        let action = pack.add_action(ActionNode {
            options: vec![StageId(1), StageId(2)],
            meta: None,
        });
        pack.stages[0].ok_transition = Some(Transition {
            action,
            option_index: 1,
        });
        pack.stages[1].home_transition = Some(Transition {
            action,
            option_index: 0,
        });
        pack.stages[0].settings = ControlSettings {
            wheel: true,
            ok: true,
            home: false,
            pause: true,
            auto_jump: false,
        };
        pack.stages[0].image = Some(MediaAsset::new(MediaType::Bmp, vec![0xAA; 700]));
        pack.stages[0].audio = Some(MediaAsset::new(MediaType::Wav, vec![0x55; 100]));
        // second stage shares the first stage's image bytes
        pack.stages[1].image = Some(MediaAsset::new(MediaType::Bmp, vec![0xAA; 700]));
        pack
    }

    fn round_trip(pack: &StoryPack) -> StoryPack {
        let mut bytes = Vec::new();
        RawCodec.write_stream(pack, &mut bytes, &Silent).unwrap();
        assert_eq!(bytes.len() % SECTOR_SIZE, 0);
        RawCodec.read_stream(Cursor::new(bytes), &Silent).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_graph_structure() {
        let pack = sample_pack();
        let decoded = round_trip(&pack);

        assert_eq!(decoded.version, 3);
        assert!(decoded.factory_disabled);
        assert_eq!(decoded.stages.len(), 3);
        assert_eq!(decoded.actions.len(), 1);
        for (a, b) in pack.stages.iter().zip(&decoded.stages) {
            assert_eq!(a.uuid, b.uuid);
            assert_eq!(a.settings, b.settings);
        }
        let ok = decoded.stages[0].ok_transition.expect("ok transition");
        assert_eq!(decoded.selected_stage(&ok), Some(StageId(2)));
        let home = decoded.stages[1].home_transition.expect("home transition");
        assert_eq!(decoded.selected_stage(&home), Some(StageId(1)));
        assert!(decoded.stages[2].ok_transition.is_none());
    }

    #[test]
    fn test_round_trip_pads_asset_bytes_to_sectors() {
        let pack = sample_pack();
        let decoded = round_trip(&pack);

        let image = decoded.stages[0].image.as_ref().expect("image");
        assert_eq!(image.media_type(), MediaType::Bmp);
        assert_eq!(image.data().len(), 2 * SECTOR_SIZE);
        assert_eq!(&image.data()[..700], &[0xAA; 700][..]);
        assert!(image.data()[700..].iter().all(|&b| b == 0));

        let audio = decoded.stages[0].audio.as_ref().expect("audio");
        assert_eq!(audio.media_type(), MediaType::Wav);
        assert_eq!(&audio.data()[..100], &[0x55; 100][..]);
    }

    #[test]
    fn test_shared_asset_bytes_are_written_once() {
        let pack = sample_pack();
        let mut bytes = Vec::new();
        RawCodec.write_stream(&pack, &mut bytes, &Silent).unwrap();
        // header + 3 stages + 1 action + image (2 sectors) + audio (1 sector)
        assert_eq!(bytes.len(), 8 * SECTOR_SIZE);

        let decoded = RawCodec.read_stream(Cursor::new(bytes), &Silent).unwrap();
        assert_eq!(
            decoded.stages[0].image.as_ref().map(|a| a.name()),
            decoded.stages[1].image.as_ref().map(|a| a.name()),
        );
    }

    #[test]
    fn test_read_info_without_full_decode() {
        let pack = sample_pack();
        let mut bytes = Vec::new();
        RawCodec.write_stream(&pack, &mut bytes, &Silent).unwrap();

        let info = RawCodec.read_info(Cursor::new(bytes)).unwrap();
        assert_eq!(info.uuid, Uuid::from_u128(0x1000));
        assert_eq!(info.version, 3);
        assert_eq!(info.stage_count, 3);
        assert!(info.factory_disabled);
    }

    #[test]
    fn test_backward_action_reference_is_unresolved() {
        // single stage whose ok transition points into the stage region
        let mut header = FieldWriter::new();
        header.u16(1);
        header.u8(0);
        header.u16(1);
        header.pad_to(SECTOR_SIZE);

        let mut stage = FieldWriter::new();
        stage.u64_be(1);
        stage.u64_be(2);
        stage.i32(-1);
        stage.i32(-1);
        stage.i32(-1);
        stage.i32(-1);
        stage.i16(1); // action node "at" the stage's own sector
        stage.i16(1);
        stage.i16(0);
        stage.i16(-1);
        stage.i16(-1);
        stage.i16(-1);
        stage.pad_to(SECTOR_SIZE);

        let mut bytes = header.into_inner();
        bytes.extend_from_slice(&stage.into_inner());

        let err = RawCodec
            .read_stream(Cursor::new(bytes), &Silent)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference { kind: "action node", .. }
        ));
    }

    #[test]
    fn test_zero_stage_header_is_malformed() {
        let bytes = vec![0u8; SECTOR_SIZE];
        let err = RawCodec
            .read_stream(Cursor::new(bytes), &Silent)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));
    }

    #[test]
    fn test_truncated_stream_is_io_error() {
        let pack = sample_pack();
        let mut bytes = Vec::new();
        RawCodec.write_stream(&pack, &mut bytes, &Silent).unwrap();
        bytes.truncate(3 * SECTOR_SIZE);

        let err = RawCodec
            .read_stream(Cursor::new(bytes), &Silent)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
