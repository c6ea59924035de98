//! Seam to the external graph runtime that actually plays motion clips.
//!
//! The controller never reads anything back from the graph: it creates clip
//! and mixer nodes on spawn, destroys them on despawn, and drives them with
//! `set_time`/`set_input_weight` during ticks. Everything downstream of that
//! (skinning, pose evaluation, output binding) belongs to the collaborator
//! behind this trait.

use crate::nodes::MotionClip;

/// Opaque handle to a node created in the external playback graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphHandle(pub u64);

/// Sink driven by the animation controller.
pub trait PoseGraph {
    /// Creates a playback node for one motion clip.
    fn create_clip(&mut self, clip: &MotionClip) -> GraphHandle;

    /// Creates a mixer node with `inputs` input slots.
    fn create_mixer(&mut self, inputs: usize) -> GraphHandle;

    /// Connects `input` to `mixer` at `slot`.
    fn connect(&mut self, mixer: GraphHandle, slot: usize, input: GraphHandle);

    /// Destroys a previously created node.
    fn destroy(&mut self, handle: GraphHandle);

    /// Scrubs the playback head of a clip node, in seconds.
    fn set_time(&mut self, clip: GraphHandle, seconds: f32);

    /// Sets the blend weight of one mixer input slot.
    fn set_input_weight(&mut self, mixer: GraphHandle, slot: usize, weight: f32);
}

/// Graph that discards everything. Useful for headless simulation and tests
/// that only exercise the state machine or the codec.
#[derive(Debug, Default)]
pub struct NullGraph {
    next: u64,
}

impl PoseGraph for NullGraph {
    fn create_clip(&mut self, _clip: &MotionClip) -> GraphHandle {
        self.next += 1;
        GraphHandle(self.next)
    }

    fn create_mixer(&mut self, _inputs: usize) -> GraphHandle {
        self.next += 1;
        GraphHandle(self.next)
    }

    fn connect(&mut self, _mixer: GraphHandle, _slot: usize, _input: GraphHandle) {}

    fn destroy(&mut self, _handle: GraphHandle) {}

    fn set_time(&mut self, _clip: GraphHandle, _seconds: f32) {}

    fn set_input_weight(&mut self, _mixer: GraphHandle, _slot: usize, _weight: f32) {}
}
