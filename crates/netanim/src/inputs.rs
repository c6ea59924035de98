//! Input seams to the upstream locomotion/gameplay source.
//!
//! The state machine never polls game systems directly; every per-tick
//! decision (blend position, clip choice, active set) comes through one of
//! these traits, injected at construction. Closures implement all three, so
//! simple states can be wired inline.

use glam::Vec2;

/// Supplies the blend-space query position and playback speed multiplier for
/// a blend tree state.
///
/// `interpolated` distinguishes the fixed simulation value from the
/// render-time smoothed value; sources without a smoothed variant can return
/// the same position for both.
pub trait BlendInput {
    /// Current blend-space position.
    fn position(&self, interpolated: bool) -> Vec2;

    /// Playback speed multiplier applied on top of the effective clip length.
    fn speed_multiplier(&self) -> f32 {
        1.0
    }
}

impl<F> BlendInput for F
where
    F: Fn(bool) -> Vec2,
{
    fn position(&self, interpolated: bool) -> Vec2 {
        self(interpolated)
    }
}

/// Picks the clip a multi clip state plays this tick. The choice is a hard
/// cut; only the outer state weight cross-fades.
pub trait ClipSelector {
    /// Index of the clip to play.
    fn select(&self) -> usize;
}

impl<F> ClipSelector for F
where
    F: Fn() -> usize,
{
    fn select(&self) -> usize {
        self()
    }
}

/// Picks the active blend set of a multi blend tree state. Set switches
/// cross-blend over the state's internal blend time.
pub trait SetSelector {
    /// Index of the set to ramp in.
    fn select(&self) -> usize;
}

impl<F> SetSelector for F
where
    F: Fn() -> usize,
{
    fn select(&self) -> usize {
        self()
    }
}
