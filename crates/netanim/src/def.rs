//! Declarative controller definitions.
//!
//! A [`ControllerDef`] describes the whole layer/state tree plus the custom
//! replicated properties. Building a controller from it validates everything
//! up front (names, clip lengths, mirror bindings, hooks) and fixes the
//! evaluation order and the snapshot layout for the lifetime of the
//! controller.

use glam::Vec2;

use crate::error::{AnimError, Result};
use crate::inputs::{BlendInput, ClipSelector, SetSelector};
use crate::layer::AnimationLayer;
use crate::nodes::{BlendSet, BlendTreeNode, ClipNode};
use crate::state::{
    AnimationState, BlendTreeMotion, ClipMotion, MirrorMotion, MultiBlendTreeMotion,
    MultiClipMotion, Owner, StateId, StateKind,
};

/// Definition of a complete controller: layers plus replicated properties.
pub struct ControllerDef {
    pub(crate) layers: Vec<LayerDef>,
    pub(crate) properties: Vec<PropertyDef>,
}

impl ControllerDef {
    #[must_use]
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn layer(mut self, layer: LayerDef) -> Self {
        self.layers.push(layer);
        self
    }

    #[must_use]
    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }
}

impl Default for ControllerDef {
    fn default() -> Self {
        Self::new()
    }
}

/// One layer and its root states.
pub struct LayerDef {
    pub(crate) name: String,
    pub(crate) initial_weight: f32,
    pub(crate) states: Vec<StateDef>,
}

impl LayerDef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_weight: 0.0,
            states: Vec::new(),
        }
    }

    /// Weight applied right after spawn. The common base layer uses 1.0.
    #[must_use]
    pub fn with_initial_weight(mut self, weight: f32) -> Self {
        self.initial_weight = weight;
        self
    }

    #[must_use]
    pub fn state(mut self, state: StateDef) -> Self {
        self.states.push(state);
        self
    }
}

/// One state in the tree.
pub struct StateDef {
    pub(crate) name: String,
    pub(crate) port: u32,
    pub(crate) kind: StateDefKind,
}

pub(crate) enum StateDefKind {
    Mixer {
        children: Vec<StateDef>,
    },
    Clip {
        node: ClipNode,
    },
    MultiClip {
        nodes: Vec<ClipNode>,
        selector: Box<dyn ClipSelector>,
    },
    BlendTree {
        nodes: Vec<BlendTreeNode>,
        scale: f32,
        looping: bool,
        input: Box<dyn BlendInput>,
    },
    MultiBlendTree {
        sets: Vec<Vec<BlendTreeNode>>,
        scale: f32,
        blend_time: f32,
        looping: bool,
        selector: Box<dyn SetSelector>,
        input: Box<dyn BlendInput>,
    },
    MultiMirror {
        sets: Vec<Vec<BlendTreeNode>>,
        scale: f32,
        looping: bool,
        mirror: String,
    },
}

impl StateDef {
    /// Composition node holding nested child states.
    #[must_use]
    pub fn mixer(name: impl Into<String>, children: Vec<StateDef>) -> Self {
        Self {
            name: name.into(),
            port: 0,
            kind: StateDefKind::Mixer { children },
        }
    }

    /// Single clip state.
    #[must_use]
    pub fn clip(name: impl Into<String>, node: ClipNode) -> Self {
        Self {
            name: name.into(),
            port: 0,
            kind: StateDefKind::Clip { node },
        }
    }

    /// Hard-cut clip selector state.
    #[must_use]
    pub fn multi_clip(
        name: impl Into<String>,
        nodes: Vec<ClipNode>,
        selector: impl ClipSelector + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            port: 0,
            kind: StateDefKind::MultiClip {
                nodes,
                selector: Box::new(selector),
            },
        }
    }

    /// Single 2D blend space state.
    #[must_use]
    pub fn blend_tree(
        name: impl Into<String>,
        nodes: Vec<BlendTreeNode>,
        input: impl BlendInput + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            port: 0,
            kind: StateDefKind::BlendTree {
                nodes,
                scale: 1.0,
                looping: true,
                input: Box::new(input),
            },
        }
    }

    /// Cross-blended blend set state.
    #[must_use]
    pub fn multi_blend_tree(
        name: impl Into<String>,
        sets: Vec<Vec<BlendTreeNode>>,
        blend_time: f32,
        selector: impl SetSelector + 'static,
        input: impl BlendInput + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            port: 0,
            kind: StateDefKind::MultiBlendTree {
                sets,
                scale: 1.0,
                blend_time,
                looping: true,
                selector: Box::new(selector),
                input: Box::new(input),
            },
        }
    }

    /// Mirrored clip sets slaved to the multi blend tree state named
    /// `mirror`. The partner must be defined before this state.
    #[must_use]
    pub fn multi_mirror(
        name: impl Into<String>,
        sets: Vec<Vec<BlendTreeNode>>,
        mirror: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            port: 0,
            kind: StateDefKind::MultiMirror {
                sets,
                scale: 1.0,
                looping: true,
                mirror: mirror.into(),
            },
        }
    }

    /// Exclusion group among siblings; activating a state deactivates
    /// siblings on the same port.
    #[must_use]
    pub fn with_port(mut self, port: u32) -> Self {
        self.port = port;
        self
    }

    /// Base scale of the blend space(s). Ignored by non-blend kinds.
    #[must_use]
    pub fn with_scale(mut self, scale: f32) -> Self {
        match &mut self.kind {
            StateDefKind::BlendTree { scale: s, .. }
            | StateDefKind::MultiBlendTree { scale: s, .. }
            | StateDefKind::MultiMirror { scale: s, .. } => *s = scale,
            StateDefKind::Mixer { .. }
            | StateDefKind::Clip { .. }
            | StateDefKind::MultiClip { .. } => {}
        }
        self
    }

    /// Clamp at the clip end instead of wrapping. Ignored by non-blend
    /// kinds; plain clips carry the flag on their [`ClipNode`].
    #[must_use]
    pub fn one_shot(mut self) -> Self {
        match &mut self.kind {
            StateDefKind::BlendTree { looping, .. }
            | StateDefKind::MultiBlendTree { looping, .. }
            | StateDefKind::MultiMirror { looping, .. } => *looping = false,
            StateDefKind::Mixer { .. }
            | StateDefKind::Clip { .. }
            | StateDefKind::MultiClip { .. } => {}
        }
        self
    }
}

/// Custom replicated property: opaque words plus an optional named
/// interpolation hook.
pub struct PropertyDef {
    pub(crate) name: String,
    pub(crate) words: usize,
    pub(crate) hook: Option<String>,
}

impl PropertyDef {
    /// Property of `words` 32-bit words, interpolated per-word as f32 lerp.
    #[must_use]
    pub fn new(name: impl Into<String>, words: usize) -> Self {
        Self {
            name: name.into(),
            words,
            hook: None,
        }
    }

    /// Uses the named hook from the controller's hook registry instead of the
    /// default per-word lerp.
    #[must_use]
    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.hook = Some(hook.into());
        self
    }
}

/// Product of a validated build: the flat state arena in evaluation order
/// plus the layers indexing into it.
pub(crate) struct BuiltTree {
    pub(crate) layers: Vec<AnimationLayer>,
    pub(crate) states: Vec<AnimationState>,
}

pub(crate) fn build_tree(layer_defs: Vec<LayerDef>) -> Result<BuiltTree> {
    let mut layers = Vec::with_capacity(layer_defs.len());
    let mut states: Vec<AnimationState> = Vec::new();

    for (layer_index, layer_def) in layer_defs.into_iter().enumerate() {
        let mut layer = AnimationLayer::new(layer_def.name, layer_def.initial_weight);

        for (slot, state_def) in layer_def.states.into_iter().enumerate() {
            let id = build_state(&mut states, state_def, Owner::Layer(layer_index), slot)?;
            layer.roots.push(id);
        }

        layers.push(layer);
    }

    Ok(BuiltTree { layers, states })
}

fn build_state(
    states: &mut Vec<AnimationState>,
    def: StateDef,
    owner: Owner,
    slot: usize,
) -> Result<StateId> {
    if states.iter().any(|s| s.name == def.name) {
        return Err(AnimError::DuplicateStateName(def.name));
    }

    let id = StateId(states.len() as u32);

    // Children are appended after their parent, so the arena index order is
    // the depth-first evaluation order.
    states.push(AnimationState {
        name: def.name,
        owner,
        children: Vec::new(),
        port: def.port,
        slot,
        weight: 0.0,
        fading_speed: 0.0,
        interpolated_weight: 0.0,
        handle: None,
        owner_mixer: None,
        cached_weight: 0.0,
        playable_weight: 0.0,
        kind: StateKind::Mixer,
    });

    let kind = match def.kind {
        StateDefKind::Mixer { children } => {
            let mut child_ids = Vec::with_capacity(children.len());
            for (child_slot, child) in children.into_iter().enumerate() {
                child_ids.push(build_state(states, child, Owner::State(id), child_slot)?);
            }
            states[id.index()].children = child_ids;
            StateKind::Mixer
        }
        StateDefKind::Clip { node } => {
            validate_clip(&states[id.index()].name, &node)?;
            StateKind::Clip(ClipMotion {
                node,
                time: 0.0,
                interpolated_time: 0.0,
            })
        }
        StateDefKind::MultiClip { nodes, selector } => {
            let name = &states[id.index()].name;
            if nodes.is_empty() {
                return Err(AnimError::EmptyState(name.clone()));
            }
            for node in &nodes {
                validate_clip(name, node)?;
            }
            StateKind::MultiClip(MultiClipMotion {
                nodes,
                selector,
                mixer: None,
                time: 0.0,
                interpolated_time: 0.0,
            })
        }
        StateDefKind::BlendTree {
            nodes,
            scale,
            looping,
            input,
        } => {
            let name = &states[id.index()].name;
            if nodes.is_empty() {
                return Err(AnimError::EmptyState(name.clone()));
            }
            for node in &nodes {
                validate_clip(name, &node.node)?;
            }
            StateKind::BlendTree(BlendTreeMotion {
                set: BlendSet::new(nodes, scale),
                looping,
                input,
                time: 0.0,
                interpolated_time: 0.0,
            })
        }
        StateDefKind::MultiBlendTree {
            sets,
            scale,
            blend_time,
            looping,
            selector,
            input,
        } => {
            let blend_sets = build_sets(&states[id.index()].name, sets, scale)?;
            let count = blend_sets.len();
            StateKind::MultiBlendTree(MultiBlendTreeMotion {
                sets: blend_sets,
                weights: vec![0.0; count],
                interpolated_weights: vec![0.0; count],
                cached_weights: vec![0.0; count],
                blend_time,
                looping,
                selector,
                input,
                mixer: None,
                time: 0.0,
                interpolated_time: 0.0,
            })
        }
        StateDefKind::MultiMirror {
            sets,
            scale,
            looping,
            mirror,
        } => {
            let blend_sets = build_sets(&states[id.index()].name, sets, scale)?;
            let count = blend_sets.len();
            let mirror_id = resolve_mirror(states, id, &mirror, count)?;
            StateKind::MultiMirror(MirrorMotion {
                sets: blend_sets,
                looping,
                mirror: mirror_id,
                cached_weights: vec![0.0; count],
                mixer: None,
                time: 0.0,
                interpolated_time: 0.0,
            })
        }
    };

    states[id.index()].kind = kind;
    Ok(id)
}

fn validate_clip(state: &str, node: &ClipNode) -> Result<()> {
    if node.clip.length <= 0.0 {
        return Err(AnimError::InvalidClipLength {
            state: state.to_owned(),
            clip: node.clip.name.clone(),
        });
    }
    Ok(())
}

fn build_sets(state: &str, sets: Vec<Vec<BlendTreeNode>>, scale: f32) -> Result<Vec<BlendSet>> {
    if sets.is_empty() || sets.iter().any(Vec::is_empty) {
        return Err(AnimError::EmptyState(state.to_owned()));
    }

    let mut blend_sets = Vec::with_capacity(sets.len());
    for nodes in sets {
        for node in &nodes {
            validate_clip(state, &node.node)?;
        }
        blend_sets.push(BlendSet::new(nodes, scale));
    }

    Ok(blend_sets)
}

fn resolve_mirror(
    states: &[AnimationState],
    id: StateId,
    mirror: &str,
    set_count: usize,
) -> Result<StateId> {
    // Only already-built states qualify; a forward reference would read
    // stale partner data during the tick pass.
    let Some(mirror_id) = states
        .iter()
        .position(|s| s.name == mirror)
        .map(|i| StateId(i as u32))
    else {
        return Err(AnimError::MirrorNotFound {
            state: states[id.index()].name.clone(),
            mirror: mirror.to_owned(),
        });
    };

    if mirror_id >= id {
        return Err(AnimError::MirrorEvaluationOrder {
            state: states[id.index()].name.clone(),
            mirror: mirror.to_owned(),
        });
    }

    let StateKind::MultiBlendTree(partner) = &states[mirror_id.index()].kind else {
        return Err(AnimError::MirrorKindMismatch {
            state: states[id.index()].name.clone(),
            mirror: mirror.to_owned(),
        });
    };

    if partner.sets.len() != set_count {
        return Err(AnimError::MirrorSetCountMismatch {
            state: states[id.index()].name.clone(),
            mirror: mirror.to_owned(),
            expected: partner.sets.len(),
            actual: set_count,
        });
    }

    Ok(mirror_id)
}

/// Placeholder blend input for defs assembled programmatically in tests.
#[doc(hidden)]
#[must_use]
pub fn fixed_position(position: Vec2) -> impl BlendInput {
    move |_interpolated: bool| position
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::MotionClip;

    fn clip(name: &str, length: f32) -> ClipNode {
        ClipNode::new(MotionClip::new(name, length), true)
    }

    fn tree_nodes() -> Vec<BlendTreeNode> {
        vec![
            BlendTreeNode::new(MotionClip::new("walk", 1.0), Vec2::new(0.0, 1.0)),
            BlendTreeNode::new(MotionClip::new("run", 0.5), Vec2::new(0.0, 2.0)),
        ]
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let layers = vec![
            LayerDef::new("base")
                .state(StateDef::clip("idle", clip("idle", 1.0)))
                .state(StateDef::clip("idle", clip("idle2", 1.0))),
        ];

        assert!(matches!(
            build_tree(layers),
            Err(AnimError::DuplicateStateName(name)) if name == "idle"
        ));
    }

    #[test]
    fn zero_length_clip_is_rejected() {
        let layers = vec![LayerDef::new("base").state(StateDef::clip("idle", clip("idle", 0.0)))];

        assert!(matches!(
            build_tree(layers),
            Err(AnimError::InvalidClipLength { .. })
        ));
    }

    #[test]
    fn mirror_must_follow_its_partner() {
        let layers = vec![
            LayerDef::new("base")
                .state(StateDef::multi_mirror(
                    "move-mirrored",
                    vec![tree_nodes()],
                    "move",
                ))
                .state(StateDef::multi_blend_tree(
                    "move",
                    vec![tree_nodes()],
                    0.2,
                    || 0usize,
                    fixed_position(Vec2::ZERO),
                )),
        ];

        assert!(matches!(
            build_tree(layers),
            Err(AnimError::MirrorNotFound { .. })
        ));
    }

    #[test]
    fn mirror_set_counts_must_match() {
        let layers = vec![
            LayerDef::new("base")
                .state(StateDef::multi_blend_tree(
                    "move",
                    vec![tree_nodes(), tree_nodes()],
                    0.2,
                    || 0usize,
                    fixed_position(Vec2::ZERO),
                ))
                .state(StateDef::multi_mirror(
                    "move-mirrored",
                    vec![tree_nodes()],
                    "move",
                )),
        ];

        assert!(matches!(
            build_tree(layers),
            Err(AnimError::MirrorSetCountMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn depth_first_order_is_parent_before_children() {
        let layers = vec![
            LayerDef::new("base").state(StateDef::mixer(
                "locomotion",
                vec![
                    StateDef::clip("idle", clip("idle", 1.0)),
                    StateDef::clip("jump", clip("jump", 0.8)),
                ],
            )),
        ];

        let tree = build_tree(layers).unwrap();
        let names: Vec<&str> = tree.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["locomotion", "idle", "jump"]);
        assert_eq!(tree.layers[0].roots, [StateId(0)]);
        assert_eq!(tree.states[0].children, [StateId(1), StateId(2)]);
    }
}
