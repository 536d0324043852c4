// src/model/mod.rs

//! In-memory story graph
//!
//! A story pack is a directed graph of narration stages and branching menus.
//! Stage nodes and action nodes live in two index-addressed arenas on
//! `StoryPack`; transitions and option lists hold `StageId`/`ActionId`
//! indices instead of pointers, so the cyclic graph needs no patch lists or
//! nullable back-references. `stages[0]` is always the entry point ("square
//! one") after decode, regardless of where a format stored it physically.
//!
//! The model holds no I/O and no algorithms beyond index resolution and the
//! validation every codec runs after decode.

pub mod media;

use crate::error::{Error, Result};
use uuid::Uuid;

pub use media::{MediaAsset, MediaType};

/// Index of a stage node in `StoryPack::stages`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub usize);

/// Index of an action node in `StoryPack::actions`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub usize);

/// Editor canvas position, purely descriptive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// Enriched metadata shared by stage and action nodes
///
/// Never affects graph semantics; only the archive format persists it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeMetadata {
    pub name: Option<String>,
    pub node_type: Option<String>,
    pub group_id: Option<String>,
    pub position: Option<Position>,
}

/// Which physical controls the appliance honours while a stage plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlSettings {
    pub wheel: bool,
    pub ok: bool,
    pub home: bool,
    pub pause: bool,
    pub auto_jump: bool,
}

/// A stage node's reference to an action node plus the currently selected
/// option in that action node's list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: ActionId,
    pub option_index: u16,
}

/// A single narration point: image, audio and allowed controls
#[derive(Debug, Clone, PartialEq)]
pub struct StageNode {
    pub uuid: Uuid,
    pub image: Option<MediaAsset>,
    pub audio: Option<MediaAsset>,
    pub ok_transition: Option<Transition>,
    pub home_transition: Option<Transition>,
    pub settings: ControlSettings,
    pub meta: Option<NodeMetadata>,
}

impl StageNode {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            image: None,
            audio: None,
            ok_transition: None,
            home_transition: None,
            settings: ControlSettings::default(),
            meta: None,
        }
    }
}

/// A branch point offering an ordered list of stage options
///
/// List order is semantically significant: `Transition::option_index` indexes
/// into it. The same stage may appear in many option lists.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionNode {
    pub options: Vec<StageId>,
    pub meta: Option<NodeMetadata>,
}

/// Pack-level enriched metadata, persisted by the archive format only
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<Vec<u8>>,
    pub night_mode: bool,
}

/// Root entity: the decoded story graph
#[derive(Debug, Clone, PartialEq)]
pub struct StoryPack {
    pub factory_disabled: bool,
    pub version: u16,
    /// Stage arena; index 0 is square one
    pub stages: Vec<StageNode>,
    /// Action arena; referenced by transitions
    pub actions: Vec<ActionNode>,
    pub metadata: Option<PackMetadata>,
}

impl StoryPack {
    pub fn new(version: u16) -> Self {
        Self {
            factory_disabled: false,
            version,
            stages: Vec::new(),
            actions: Vec::new(),
            metadata: None,
        }
    }

    /// The graph's entry point
    pub fn entry(&self) -> Option<&StageNode> {
        self.stages.first()
    }

    pub fn stage(&self, id: StageId) -> Option<&StageNode> {
        self.stages.get(id.0)
    }

    pub fn action(&self, id: ActionId) -> Option<&ActionNode> {
        self.actions.get(id.0)
    }

    pub fn add_stage(&mut self, stage: StageNode) -> StageId {
        self.stages.push(stage);
        StageId(self.stages.len() - 1)
    }

    pub fn add_action(&mut self, action: ActionNode) -> ActionId {
        self.actions.push(action);
        ActionId(self.actions.len() - 1)
    }

    /// Stage currently selected by a transition, if its option index is valid
    pub fn selected_stage(&self, transition: &Transition) -> Option<StageId> {
        self.action(transition.action)?
            .options
            .get(transition.option_index as usize)
            .copied()
    }

    /// Check arena invariants after decode: a non-empty stage list and every
    /// held index in range
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::MalformedHeader {
                format: "pack",
                reason: "story pack has no stage nodes".to_string(),
            });
        }
        for (i, stage) in self.stages.iter().enumerate() {
            for transition in [&stage.ok_transition, &stage.home_transition]
                .into_iter()
                .flatten()
            {
                if self.action(transition.action).is_none() {
                    return Err(Error::UnresolvedReference {
                        kind: "action node",
                        reference: format!("{} (from stage {i})", transition.action.0),
                    });
                }
            }
        }
        for (i, action) in self.actions.iter().enumerate() {
            for option in &action.options {
                if self.stage(*option).is_none() {
                    return Err(Error::UnresolvedReference {
                        kind: "stage",
                        reference: format!("{} (from action node {i})", option.0),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_stage_pack() -> StoryPack {
        let mut pack = StoryPack::new(1);
        for _ in 0..3 {
            pack.add_stage(StageNode::new(Uuid::new_v4()));
        }
        let action = pack.add_action(ActionNode {
            options: vec![StageId(1), StageId(2)],
            meta: None,
        });
        pack.stages[0].ok_transition = Some(Transition {
            action,
            option_index: 1,
        });
        pack
    }

    #[test]
    fn test_ok_transition_selects_third_stage() {
        let pack = three_stage_pack();
        let transition = pack.stages[0].ok_transition.expect("transition");
        assert_eq!(pack.selected_stage(&transition), Some(StageId(2)));
    }

    #[test]
    fn test_selected_stage_out_of_range_is_none() {
        let pack = three_stage_pack();
        let transition = Transition {
            action: ActionId(0),
            option_index: 9,
        };
        assert_eq!(pack.selected_stage(&transition), None);
    }

    #[test]
    fn test_validate_accepts_well_formed_graph() {
        assert!(three_stage_pack().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_pack() {
        assert!(StoryPack::new(1).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_dangling_action_reference() {
        let mut pack = three_stage_pack();
        pack.stages[1].home_transition = Some(Transition {
            action: ActionId(7),
            option_index: 0,
        });
        assert!(matches!(
            pack.validate(),
            Err(Error::UnresolvedReference { kind: "action node", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_dangling_option() {
        let mut pack = three_stage_pack();
        pack.actions[0].options.push(StageId(42));
        assert!(matches!(
            pack.validate(),
            Err(Error::UnresolvedReference { kind: "stage", .. })
        ));
    }
}
