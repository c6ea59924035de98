//! Animation states: one shared outer record plus a closed set of motion
//! behaviors.
//!
//! Every state owns a weight driven by the fading framework and an optional
//! kind-specific playback phase. The kind set is deliberately closed: the
//! codec, the tick dispatch and the construction-time validation all match on
//! it exhaustively, so adding a variant is a compile-visible wire-schema
//! change.

use std::fmt;

use glam::Vec2;

use crate::graph::{GraphHandle, PoseGraph};
use crate::inputs::{BlendInput, ClipSelector, SetSelector};
use crate::nodes::{BlendSet, ClipNode};

/// Identifier of a state inside its controller. Indices follow the fixed
/// depth-first evaluation order established at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub(crate) u32);

impl StateId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Owner of a state: either a layer (root states) or a mixer state.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Owner {
    Layer(usize),
    State(StateId),
}

/// Clip playback events raised during a fixed tick, drained from the
/// controller after each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationEvent {
    /// A looping clip wrapped past its end on this tick.
    ClipRestarted(StateId),
    /// A non-looping clip reached its end on this tick.
    ClipFinished(StateId),
}

/// How a clip crossed the 1.0 boundary during an advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClipTransition {
    Restarted,
    Finished,
}

/// One node of the animation tree.
pub(crate) struct AnimationState {
    pub(crate) name: String,
    pub(crate) owner: Owner,
    pub(crate) children: Vec<StateId>,
    /// Exclusion group: siblings sharing a port mutually exclude on activation.
    pub(crate) port: u32,
    /// Input slot on the owner's mixer, assigned at construction.
    pub(crate) slot: usize,

    pub(crate) weight: f32,
    pub(crate) fading_speed: f32,
    pub(crate) interpolated_weight: f32,

    // Graph bookkeeping, valid between spawn and despawn.
    pub(crate) handle: Option<GraphHandle>,
    pub(crate) owner_mixer: Option<GraphHandle>,
    pub(crate) cached_weight: f32,
    pub(crate) playable_weight: f32,

    pub(crate) kind: StateKind,
}

impl fmt::Debug for AnimationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationState")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("port", &self.port)
            .field("weight", &self.weight)
            .field("fading_speed", &self.fading_speed)
            .finish_non_exhaustive()
    }
}

impl AnimationState {
    /// Steady with influence, or ramping in. A fading-out state counts as
    /// inactive so it can be re-activated mid-transition.
    pub(crate) fn is_active_self(&self) -> bool {
        (self.fading_speed == 0.0 && self.weight > 0.0) || self.fading_speed > 0.0
    }

    pub(crate) fn is_playing_self(&self) -> bool {
        self.fading_speed > 0.0 || self.weight > 0.0
    }

    /// Advances the fading ramp; reaching either boundary completes the
    /// transition and zeroes the rate.
    pub(crate) fn advance_fading(&mut self, dt: f32) {
        advance_fading(&mut self.weight, &mut self.fading_speed, dt);
    }

    /// Resets numeric fields to their defaults. Tree recursion is handled by
    /// the controller.
    pub(crate) fn set_defaults(&mut self) {
        self.weight = 0.0;
        self.fading_speed = 0.0;
        self.kind.set_defaults();
    }
}

pub(crate) fn advance_fading(weight: &mut f32, fading_speed: &mut f32, dt: f32) {
    if *fading_speed == 0.0 {
        return;
    }

    *weight += *fading_speed * dt;

    if *weight <= 0.0 {
        *weight = 0.0;
        *fading_speed = 0.0;
    } else if *weight >= 1.0 {
        *weight = 1.0;
        *fading_speed = 0.0;
    }
}

/// Closed set of motion behaviors.
pub(crate) enum StateKind {
    /// Pure composition node arbitrating activation between its children.
    Mixer,
    /// Single clip with its own playback phase.
    Clip(ClipMotion),
    /// N clips, one hard-selected per tick.
    MultiClip(MultiClipMotion),
    /// One continuous 2D blend space.
    BlendTree(BlendTreeMotion),
    /// Independent blend sets cross-blended by a selector.
    MultiBlendTree(MultiBlendTreeMotion),
    /// Mirrored clip sets slaved to a multi blend tree state.
    MultiMirror(MirrorMotion),
}

impl StateKind {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Mixer => "Mixer",
            Self::Clip(_) => "Clip",
            Self::MultiClip(_) => "MultiClip",
            Self::BlendTree(_) => "BlendTree",
            Self::MultiBlendTree(_) => "MultiBlendTree",
            Self::MultiMirror(_) => "MultiMirror",
        }
    }

    /// Normalized playback time, if this kind has one.
    pub(crate) fn animation_time(&self) -> Option<f32> {
        match self {
            Self::Mixer => None,
            Self::Clip(m) => Some(m.time),
            Self::MultiClip(m) => Some(m.time),
            Self::BlendTree(m) => Some(m.time),
            Self::MultiBlendTree(m) => Some(m.time),
            Self::MultiMirror(m) => Some(m.time),
        }
    }

    pub(crate) fn interpolated_animation_time(&self) -> Option<f32> {
        match self {
            Self::Mixer => None,
            Self::Clip(m) => Some(m.interpolated_time),
            Self::MultiClip(m) => Some(m.interpolated_time),
            Self::BlendTree(m) => Some(m.interpolated_time),
            Self::MultiBlendTree(m) => Some(m.interpolated_time),
            Self::MultiMirror(m) => Some(m.interpolated_time),
        }
    }

    fn set_defaults(&mut self) {
        match self {
            Self::Mixer => {}
            Self::Clip(m) => m.time = 0.0,
            Self::MultiClip(m) => m.time = 0.0,
            Self::BlendTree(m) => m.time = 0.0,
            Self::MultiBlendTree(m) => m.time = 0.0,
            Self::MultiMirror(m) => m.time = 0.0,
        }
    }
}

/// Advances a normalized clip phase; crossing 1.0 wraps or clamps and
/// reports the transition exactly once, on the crossing tick.
pub(crate) fn advance_clip_time(
    time: f32,
    dt: f32,
    speed: f32,
    length: f32,
    looping: bool,
) -> (f32, Option<ClipTransition>) {
    let old_time = time;
    let mut new_time = old_time + dt * speed / length;
    let mut transition = None;

    if new_time >= 1.0 {
        if looping {
            new_time %= 1.0;
        } else {
            new_time = 1.0;
        }

        if old_time < 1.0 {
            transition = Some(if looping {
                ClipTransition::Restarted
            } else {
                ClipTransition::Finished
            });
        }
    }

    (new_time, transition)
}

/// Advances a blend tree phase. No boundary events; the wrap threshold is
/// exclusive so a phase resting exactly at 1.0 stays there.
fn advance_blend_time(time: &mut f32, normalized_dt: f32, looping: bool) {
    *time += normalized_dt;
    if *time > 1.0 {
        if looping {
            *time %= 1.0;
        } else {
            *time = 1.0;
        }
    }
}

pub(crate) struct ClipMotion {
    pub(crate) node: ClipNode,
    pub(crate) time: f32,
    pub(crate) interpolated_time: f32,
}

impl ClipMotion {
    pub(crate) fn fixed_update(
        &mut self,
        dt: f32,
        graph: &mut dyn PoseGraph,
    ) -> Option<ClipTransition> {
        let (new_time, transition) = advance_clip_time(
            self.time,
            dt,
            self.node.speed,
            self.node.clip.length,
            self.node.looping,
        );

        self.time = new_time;
        self.node.set_time(graph, new_time);

        transition
    }

    pub(crate) fn interpolate(&self, graph: &mut dyn PoseGraph) {
        self.node.set_time(graph, self.interpolated_time);
    }
}

pub(crate) struct MultiClipMotion {
    pub(crate) nodes: Vec<ClipNode>,
    pub(crate) selector: Box<dyn ClipSelector>,
    pub(crate) mixer: Option<GraphHandle>,
    pub(crate) time: f32,
    pub(crate) interpolated_time: f32,
}

impl MultiClipMotion {
    fn select(&self) -> usize {
        self.selector.select().min(self.nodes.len() - 1)
    }

    /// Hard-cuts the selected clip in and advances the shared phase.
    pub(crate) fn fixed_update(
        &mut self,
        dt: f32,
        graph: &mut dyn PoseGraph,
    ) -> Option<ClipTransition> {
        let clip = self.select();
        self.apply_selection(graph, clip);

        let node = &self.nodes[clip];
        let (new_time, transition) =
            advance_clip_time(self.time, dt, node.speed, node.clip.length, node.looping);

        self.time = new_time;
        node.set_time(graph, new_time);

        transition
    }

    pub(crate) fn interpolate(&self, graph: &mut dyn PoseGraph) {
        let clip = self.select();
        self.apply_selection(graph, clip);
        self.nodes[clip].set_time(graph, self.interpolated_time);
    }

    fn apply_selection(&self, graph: &mut dyn PoseGraph, clip: usize) {
        if let Some(mixer) = self.mixer {
            for slot in 0..self.nodes.len() {
                graph.set_input_weight(mixer, slot, 0.0);
            }
            graph.set_input_weight(mixer, clip, 1.0);
        }
    }
}

// Effective lengths below this are treated as zero influence instead of
// producing runaway phase speeds.
const MIN_TARGET_LENGTH: f32 = 0.001;

pub(crate) struct BlendTreeMotion {
    pub(crate) set: BlendSet,
    pub(crate) looping: bool,
    pub(crate) input: Box<dyn BlendInput>,
    pub(crate) time: f32,
    pub(crate) interpolated_time: f32,
}

impl BlendTreeMotion {
    /// Re-resolves blend weights, advances the phase against the effective
    /// clip length and scrubs every contributing clip.
    pub(crate) fn fixed_update(&mut self, dt: f32, graph: &mut dyn PoseGraph) {
        let position = self.input.position(false);
        let target_length = self.set.set_position(graph, position);

        let mut normalized_dt = dt * self.input.speed_multiplier();
        if target_length >= MIN_TARGET_LENGTH {
            normalized_dt /= target_length;
        }

        advance_blend_time(&mut self.time, normalized_dt, self.looping);
        self.set.set_time(graph, self.time);
    }

    pub(crate) fn interpolate(&mut self, graph: &mut dyn PoseGraph) {
        let position = self.input.position(true);
        self.set.set_position(graph, position);
        self.set.set_time(graph, self.interpolated_time);
    }
}

pub(crate) struct MultiBlendTreeMotion {
    pub(crate) sets: Vec<BlendSet>,
    /// Per-set blend weights, replicated over the network.
    pub(crate) weights: Vec<f32>,
    pub(crate) interpolated_weights: Vec<f32>,
    pub(crate) cached_weights: Vec<f32>,
    /// Internal cross-blend time between sets, seconds. Distinct from the
    /// state's own weight fading.
    pub(crate) blend_time: f32,
    pub(crate) looping: bool,
    pub(crate) selector: Box<dyn SetSelector>,
    pub(crate) input: Box<dyn BlendInput>,
    pub(crate) mixer: Option<GraphHandle>,
    pub(crate) time: f32,
    pub(crate) interpolated_time: f32,
}

impl MultiBlendTreeMotion {
    /// Ramps the selected set in and the rest out, then advances the shared
    /// phase against the contributing sets' length-weighted average.
    pub(crate) fn fixed_update(&mut self, dt: f32, graph: &mut dyn PoseGraph) {
        let set_count = self.sets.len();
        if set_count == 0 {
            return;
        }

        let selected = self.selector.select().min(set_count - 1);
        let position = self.input.position(false);

        let mut target_length = 0.0;
        let mut target_weight = 0.0;
        let mut total_weight = 0.0;

        for i in 0..set_count {
            let mut weight = self.weights[i];

            if i == selected {
                weight = if self.blend_time > 0.0 {
                    (weight + dt / self.blend_time).min(1.0)
                } else {
                    1.0
                };
            } else {
                weight = if self.blend_time > 0.0 {
                    (weight - dt / self.blend_time).max(0.0)
                } else {
                    0.0
                };
            }

            if weight > 0.0 {
                let clip_length = self.sets[i].set_position(graph, position);
                if clip_length > 0.0 {
                    target_length += clip_length * weight;
                    target_weight += weight;
                }

                total_weight += weight;
            }

            self.weights[i] = weight;
        }

        if target_weight > 0.0 && target_length > 0.0 {
            target_length /= target_weight;

            let normalized_dt = dt * self.input.speed_multiplier() / target_length;
            advance_blend_time(&mut self.time, normalized_dt, self.looping);
        }

        self.apply_set_weights(graph, false);
    }

    pub(crate) fn interpolate(&mut self, graph: &mut dyn PoseGraph) {
        let position = self.input.position(true);

        for i in 0..self.sets.len() {
            if self.interpolated_weights[i] > 0.0 {
                let _ = self.sets[i].set_position(graph, position);
            }
        }

        self.apply_set_weights(graph, true);
    }

    fn apply_set_weights(&mut self, graph: &mut dyn PoseGraph, interpolated: bool) {
        let weights = if interpolated {
            &self.interpolated_weights
        } else {
            &self.weights
        };
        let time = if interpolated {
            self.interpolated_time
        } else {
            self.time
        };

        let total: f32 = weights.iter().sum();
        let multiplier = if total > 0.0 { 1.0 / total } else { 0.0 };

        for i in 0..self.sets.len() {
            let weight = weights[i] * multiplier;
            if weight > 0.0 {
                self.sets[i].set_time(graph, time);
            }

            if weight != self.cached_weights[i] {
                self.cached_weights[i] = weight;
                if let Some(mixer) = self.mixer {
                    graph.set_input_weight(mixer, i, weight);
                }
            }
        }
    }
}

/// Snapshot of the mirror partner's resolved inputs for one pass, copied out
/// before the mirror state mutates itself.
pub(crate) struct MirrorInputs {
    pub(crate) position: Vec2,
    pub(crate) speed_multiplier: f32,
}

pub(crate) struct MirrorMotion {
    pub(crate) sets: Vec<BlendSet>,
    pub(crate) looping: bool,
    /// Bound partner; validated at construction to be a multi blend tree
    /// state evaluated earlier in the same pass.
    pub(crate) mirror: StateId,
    pub(crate) cached_weights: Vec<f32>,
    pub(crate) mixer: Option<GraphHandle>,
    pub(crate) time: f32,
    pub(crate) interpolated_time: f32,
}

impl MirrorMotion {
    /// Advances using the partner's resolved weights and blend position while
    /// sampling this state's own mirrored clip sets.
    pub(crate) fn fixed_update(
        &mut self,
        dt: f32,
        graph: &mut dyn PoseGraph,
        inputs: &MirrorInputs,
        mirror_weights: &[f32],
    ) {
        let mut target_length = 0.0;
        let mut target_weight = 0.0;
        let mut total_weight = 0.0;

        for i in 0..self.sets.len() {
            let weight = mirror_weights[i];
            if weight > 0.0 {
                let clip_length = self.sets[i].set_position(graph, inputs.position);
                if clip_length > 0.0 {
                    target_length += clip_length * weight;
                    target_weight += weight;
                }

                total_weight += weight;
            }
        }

        if target_weight > 0.0 && target_length > 0.0 {
            target_length /= target_weight;

            let normalized_dt = dt * inputs.speed_multiplier / target_length;
            advance_blend_time(&mut self.time, normalized_dt, self.looping);
        }

        self.scrub(graph, mirror_weights, total_weight, self.time);
    }

    pub(crate) fn interpolate(
        &mut self,
        graph: &mut dyn PoseGraph,
        position: Vec2,
        mirror_weights: &[f32],
    ) {
        let total: f32 = mirror_weights.iter().sum();

        for i in 0..self.sets.len() {
            if mirror_weights[i] > 0.0 {
                let _ = self.sets[i].set_position(graph, position);
            }
        }

        self.scrub(graph, mirror_weights, total, self.interpolated_time);
    }

    fn scrub(&mut self, graph: &mut dyn PoseGraph, weights: &[f32], total: f32, time: f32) {
        let multiplier = if total > 0.0 { 1.0 / total } else { 0.0 };

        for i in 0..self.sets.len() {
            let weight = weights[i] * multiplier;
            if weight > 0.0 {
                self.sets[i].set_time(graph, time);
            }

            if weight != self.cached_weights[i] {
                self.cached_weights[i] = weight;
                if let Some(mixer) = self.mixer {
                    graph.set_input_weight(mixer, i, weight);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fading_clamps_and_completes() {
        let mut weight = 0.0;
        let mut fading = 2.0; // 0.5 s ramp

        advance_fading(&mut weight, &mut fading, 0.25);
        assert_eq!(weight, 0.5);
        assert_eq!(fading, 2.0);

        advance_fading(&mut weight, &mut fading, 1.0);
        assert_eq!(weight, 1.0);
        assert_eq!(fading, 0.0);
    }

    #[test]
    fn clip_time_clamps_once() {
        let (t, ev) = advance_clip_time(0.5, 1.0, 1.0, 2.0, false);
        assert_eq!(t, 1.0);
        assert_eq!(ev, Some(ClipTransition::Finished));

        // Already at the boundary: no second event.
        let (t, ev) = advance_clip_time(t, 1.0, 1.0, 2.0, false);
        assert_eq!(t, 1.0);
        assert_eq!(ev, None);
    }

    #[test]
    fn clip_time_wraps_with_restart() {
        let (t, ev) = advance_clip_time(0.75, 1.0, 1.0, 2.0, true);
        assert!((t - 0.25).abs() < 1e-6);
        assert_eq!(ev, Some(ClipTransition::Restarted));
    }
}
