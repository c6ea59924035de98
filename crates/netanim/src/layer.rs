//! Layers: top-level blend groups over the whole skeleton.
//!
//! Layers use the same fading framework as states but never arbitrate with
//! each other; activating a layer leaves its siblings alone.

use crate::graph::GraphHandle;
use crate::state::{StateId, advance_fading};

pub(crate) struct AnimationLayer {
    pub(crate) name: String,
    /// Weight applied right after spawn, before any activation.
    pub(crate) initial_weight: f32,
    pub(crate) roots: Vec<StateId>,

    pub(crate) weight: f32,
    pub(crate) fading_speed: f32,
    pub(crate) interpolated_weight: f32,

    pub(crate) mixer: Option<GraphHandle>,
    pub(crate) cached_weight: f32,
}

impl AnimationLayer {
    pub(crate) fn new(name: String, initial_weight: f32) -> Self {
        Self {
            name,
            initial_weight,
            roots: Vec::new(),
            weight: 0.0,
            fading_speed: 0.0,
            interpolated_weight: 0.0,
            mixer: None,
            cached_weight: 0.0,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        (self.fading_speed == 0.0 && self.weight > 0.0) || self.fading_speed > 0.0
    }

    pub(crate) fn advance_fading(&mut self, dt: f32) {
        advance_fading(&mut self.weight, &mut self.fading_speed, dt);
    }
}
