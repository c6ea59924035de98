//! Clip-level building blocks: motion clips, clip nodes and blend sets.

use glam::Vec2;

use crate::blend_tree::BlendTree;
use crate::graph::{GraphHandle, PoseGraph};

/// Reference to one motion clip owned by the graph runtime.
#[derive(Debug, Clone)]
pub struct MotionClip {
    /// Clip name, used for diagnostics only.
    pub name: String,
    /// Clip length in seconds. Must be positive.
    pub length: f32,
}

impl MotionClip {
    /// Creates a clip reference.
    #[must_use]
    pub fn new(name: impl Into<String>, length: f32) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// One playable clip with a speed multiplier and loop flag.
#[derive(Debug, Clone)]
pub struct ClipNode {
    /// The referenced clip.
    pub clip: MotionClip,
    /// Playback speed multiplier.
    pub speed: f32,
    /// Whether playback wraps at the end instead of clamping.
    pub looping: bool,
    pub(crate) handle: Option<GraphHandle>,
}

impl ClipNode {
    /// Creates a clip node playing at normal speed.
    #[must_use]
    pub fn new(clip: MotionClip, looping: bool) -> Self {
        Self {
            clip,
            speed: 1.0,
            looping,
            handle: None,
        }
    }

    /// Sets the playback speed multiplier.
    #[must_use]
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub(crate) fn spawn(&mut self, graph: &mut dyn PoseGraph) -> GraphHandle {
        let handle = graph.create_clip(&self.clip);
        self.handle = Some(handle);
        handle
    }

    pub(crate) fn despawn(&mut self, graph: &mut dyn PoseGraph) {
        if let Some(handle) = self.handle.take() {
            graph.destroy(handle);
        }
    }

    pub(crate) fn set_time(&self, graph: &mut dyn PoseGraph, normalized_time: f32) {
        if let Some(handle) = self.handle {
            graph.set_time(handle, normalized_time * self.clip.length);
        }
    }
}

/// Clip node placed at a position in a 2D blend space.
#[derive(Debug, Clone)]
pub struct BlendTreeNode {
    /// The underlying clip node.
    pub node: ClipNode,
    /// Sample position in blend space.
    pub position: Vec2,
}

impl BlendTreeNode {
    /// Creates a blend tree node.
    #[must_use]
    pub fn new(clip: MotionClip, position: Vec2) -> Self {
        Self {
            node: ClipNode::new(clip, true),
            position,
        }
    }

    /// Sets the playback speed multiplier of the underlying clip node.
    #[must_use]
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.node.speed = speed;
        self
    }
}

// Query cache tolerance, per axis. The simulation and render passes usually
// ask for the same blend position within one tick.
const POSITION_TOLERANCE: f32 = 0.01;

/// One blend space plus its mixer in the graph: resolves weights for a query
/// position, pushes them to the mixer and scrubs the contributing clips.
#[derive(Debug)]
pub(crate) struct BlendSet {
    pub(crate) nodes: Vec<BlendTreeNode>,
    pub(crate) tree: BlendTree,
    base_scale: f32,
    mixer: Option<GraphHandle>,
    cache_valid: bool,
    cached_position: Vec2,
    cached_target_length: f32,
}

impl BlendSet {
    pub(crate) fn new(nodes: Vec<BlendTreeNode>, base_scale: f32) -> Self {
        let positions: Vec<Vec2> = nodes.iter().map(|n| n.position).collect();

        Self {
            nodes,
            tree: BlendTree::new(&positions),
            base_scale,
            mixer: None,
            cache_valid: false,
            cached_position: Vec2::ZERO,
            cached_target_length: 0.0,
        }
    }

    pub(crate) fn spawn(&mut self, graph: &mut dyn PoseGraph) -> GraphHandle {
        let mixer = graph.create_mixer(self.nodes.len());
        self.mixer = Some(mixer);

        for (slot, node) in self.nodes.iter_mut().enumerate() {
            let clip = node.node.spawn(graph);
            graph.connect(mixer, slot, clip);
        }

        mixer
    }

    pub(crate) fn despawn(&mut self, graph: &mut dyn PoseGraph) {
        if let Some(mixer) = self.mixer.take() {
            graph.destroy(mixer);
        }

        for node in &mut self.nodes {
            node.node.despawn(graph);
        }
    }

    /// Rescales the blend space and drops the query cache.
    pub(crate) fn set_scale(&mut self, scale: f32) {
        self.tree.set_scale(scale);
        self.cache_valid = false;
    }

    pub(crate) fn reset_scale(&mut self) {
        self.set_scale(self.base_scale);
    }

    /// Drops the query cache. Called when an authoritative snapshot is
    /// applied so re-simulation does not inherit stale lengths.
    pub(crate) fn invalidate_cache(&mut self) {
        self.cache_valid = false;
    }

    /// Resolves weights at `position`, pushes them to the mixer and returns
    /// the effective clip length (weighted average of `length / speed` over
    /// contributing nodes).
    pub(crate) fn set_position(&mut self, graph: &mut dyn PoseGraph, position: Vec2) -> f32 {
        if self.cache_valid && almost_equals(position, self.cached_position) {
            return self.cached_target_length;
        }

        self.tree.calculate_weights(position);

        let mut target_length = 0.0;
        let mixer = self.mixer;

        for (slot, node) in self.nodes.iter().enumerate() {
            let weight = self.tree.weights()[slot];
            if weight > 0.0 {
                target_length += node.node.clip.length / node.node.speed * weight;
            }

            if let Some(mixer) = mixer {
                graph.set_input_weight(mixer, slot, weight);
            }
        }

        self.cache_valid = true;
        self.cached_position = position;
        self.cached_target_length = target_length;

        target_length
    }

    /// Scrubs every contributing clip to `normalized_time`.
    pub(crate) fn set_time(&self, graph: &mut dyn PoseGraph, normalized_time: f32) {
        for (slot, node) in self.nodes.iter().enumerate() {
            if self.tree.weights()[slot] > 0.0 {
                node.node.set_time(graph, normalized_time);
            }
        }
    }
}

fn almost_equals(a: Vec2, b: Vec2) -> bool {
    let difference = a - b;
    difference.x < POSITION_TOLERANCE
        && difference.x > -POSITION_TOLERANCE
        && difference.y < POSITION_TOLERANCE
        && difference.y > -POSITION_TOLERANCE
}
