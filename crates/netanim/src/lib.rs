//! Layered animation state machine with a network snapshot codec.
//!
//! The crate drives a tree of activatable, fading motion states (clips, 2D
//! blend spaces, mirrored blend sets and nested mixers) from a fixed-rate
//! deterministic simulation tick, pushes resolved weights and playback heads
//! into an external [`PoseGraph`], and replicates the whole numeric tree
//! through a schema-implicit word buffer: [`AnimationController::write`] on
//! the authority, [`AnimationController::read`] /
//! [`AnimationController::render_update`] on remote peers.
//!
//! Topology is fixed at construction ([`ControllerDef`] →
//! [`AnimationController::new`]); only numeric fields mutate afterwards, so
//! both peers derive the identical wire layout without any framing on the
//! wire.

pub mod blend_tree;
pub mod controller;
pub mod def;
pub mod error;
pub mod graph;
pub mod inputs;
pub mod interpolation;
mod layer;
pub mod network;
pub mod nodes;
mod state;

pub use blend_tree::BlendTree;
pub use controller::AnimationController;
pub use def::{ControllerDef, LayerDef, PropertyDef, StateDef};
pub use error::{AnimError, Result};
pub use graph::{GraphHandle, NullGraph, PoseGraph};
pub use inputs::{BlendInput, ClipSelector, SetSelector};
pub use network::{InterpolationHooks, PropertyInterpolator};
pub use nodes::{BlendTreeNode, ClipNode, MotionClip};
pub use state::{AnimationEvent, StateId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
