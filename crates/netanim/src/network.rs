//! Snapshot wire codec.
//!
//! The codec owns a word plan fixed at construction: every layer, state and
//! custom property is assigned a run of 32-bit words in a grouped, structural
//! order (layers, then states grouped by kind in evaluation order, then
//! properties). Both peers derive the identical plan from the identical
//! controller definition, so no tags or lengths go on the wire; a buffer of
//! the wrong size is a schema disagreement and is rejected outright.

use crate::error::{AnimError, Result};
use crate::interpolation::{interpolate_time_weighted, interpolate_weight};
use crate::layer::AnimationLayer;
use crate::state::{AnimationState, StateId, StateKind};

/// Interpolation hook for a custom property: blends `from`/`to` word runs
/// into `out` at `alpha`.
pub type PropertyInterpolator = fn(from: &[u32], to: &[u32], alpha: f32, out: &mut [u32]);

/// Named registry of [`PropertyInterpolator`] hooks, consulted once while
/// building a controller.
#[derive(Default)]
pub struct InterpolationHooks {
    entries: Vec<(String, PropertyInterpolator)>,
}

impl InterpolationHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, hook: PropertyInterpolator) {
        self.entries.push((name.into(), hook));
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<PropertyInterpolator> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, hook)| *hook)
    }
}

/// One replicated custom property: a run of opaque words owned by the
/// application, blended by hook or by per-word lerp.
pub(crate) struct NetworkProperty {
    pub(crate) name: String,
    pub(crate) data: Vec<u32>,
    pub(crate) interpolated: Vec<u32>,
    pub(crate) interpolator: Option<PropertyInterpolator>,
}

impl NetworkProperty {
    fn interpolate(&mut self, from: &[u32], to: &[u32], alpha: f32) {
        match self.interpolator {
            Some(hook) => hook(from, to, alpha, &mut self.interpolated),
            None => {
                for ((out, &f), &t) in self.interpolated.iter_mut().zip(from).zip(to) {
                    let from_value = f32::from_bits(f);
                    let to_value = f32::from_bits(t);
                    *out = (from_value + (to_value - from_value) * alpha).to_bits();
                }
            }
        }
    }
}

/// One run of words in the snapshot.
#[derive(Debug, Clone, Copy)]
enum PlanOp {
    /// Layer weight and fading speed. 2 words.
    Layer(usize),
    /// State weight and fading speed. 2 words.
    StateWeights(StateId),
    /// State weight, fading speed and normalized time. 3 words.
    StateClock(StateId),
    /// State clock plus one weight per blend set. 3 + sets words.
    StateSets(StateId),
    /// Custom property words.
    Property(usize),
}

/// Fixed snapshot layout for one controller definition.
pub(crate) struct SnapshotCodec {
    plan: Vec<PlanOp>,
    word_count: usize,
}

impl SnapshotCodec {
    /// Derives the plan from the built tree. Must be called with the final
    /// arena; the plan is invalid if states are added afterwards.
    pub(crate) fn new(
        layers: &[AnimationLayer],
        states: &[AnimationState],
        properties: &[NetworkProperty],
    ) -> Self {
        let mut plan = Vec::new();
        let mut word_count = 0;

        for index in 0..layers.len() {
            plan.push(PlanOp::Layer(index));
            word_count += 2;
        }

        // Grouped by kind so structurally similar runs sit together; within
        // a group, evaluation order.
        for (index, state) in states.iter().enumerate() {
            if matches!(state.kind, StateKind::Mixer) {
                plan.push(PlanOp::StateWeights(StateId(index as u32)));
                word_count += 2;
            }
        }

        let clock_groups: [fn(&StateKind) -> bool; 3] = [
            |kind| matches!(kind, StateKind::Clip(_)),
            |kind| matches!(kind, StateKind::MultiClip(_)),
            |kind| matches!(kind, StateKind::BlendTree(_)),
        ];
        for group in clock_groups {
            for (index, state) in states.iter().enumerate() {
                if group(&state.kind) {
                    plan.push(PlanOp::StateClock(StateId(index as u32)));
                    word_count += 3;
                }
            }
        }

        for (index, state) in states.iter().enumerate() {
            if let StateKind::MultiBlendTree(motion) = &state.kind {
                plan.push(PlanOp::StateSets(StateId(index as u32)));
                word_count += 3 + motion.sets.len();
            }
        }

        for (index, state) in states.iter().enumerate() {
            if matches!(state.kind, StateKind::MultiMirror(_)) {
                plan.push(PlanOp::StateClock(StateId(index as u32)));
                word_count += 3;
            }
        }

        for (index, property) in properties.iter().enumerate() {
            plan.push(PlanOp::Property(index));
            word_count += property.data.len();
        }

        Self { plan, word_count }
    }

    pub(crate) fn word_count(&self) -> usize {
        self.word_count
    }

    fn check(&self, len: usize) -> Result<()> {
        if len != self.word_count {
            return Err(AnimError::BufferSize {
                expected: self.word_count,
                actual: len,
            });
        }
        Ok(())
    }

    /// Serializes the authoritative simulation into `buffer`.
    pub(crate) fn write(
        &self,
        layers: &[AnimationLayer],
        states: &[AnimationState],
        properties: &[NetworkProperty],
        buffer: &mut [u32],
    ) -> Result<()> {
        self.check(buffer.len())?;
        let mut cursor = 0usize;

        for &op in &self.plan {
            match op {
                PlanOp::Layer(index) => {
                    let layer = &layers[index];
                    write_f32(buffer, &mut cursor, layer.weight);
                    write_f32(buffer, &mut cursor, layer.fading_speed);
                }
                PlanOp::StateWeights(id) => {
                    let state = &states[id.index()];
                    write_f32(buffer, &mut cursor, state.weight);
                    write_f32(buffer, &mut cursor, state.fading_speed);
                }
                PlanOp::StateClock(id) => {
                    let state = &states[id.index()];
                    write_f32(buffer, &mut cursor, state.weight);
                    write_f32(buffer, &mut cursor, state.fading_speed);
                    write_f32(
                        buffer,
                        &mut cursor,
                        state.kind.animation_time().unwrap_or(0.0),
                    );
                }
                PlanOp::StateSets(id) => {
                    let state = &states[id.index()];
                    write_f32(buffer, &mut cursor, state.weight);
                    write_f32(buffer, &mut cursor, state.fading_speed);
                    write_f32(
                        buffer,
                        &mut cursor,
                        state.kind.animation_time().unwrap_or(0.0),
                    );
                    if let StateKind::MultiBlendTree(motion) = &state.kind {
                        for &weight in &motion.weights {
                            write_f32(buffer, &mut cursor, weight);
                        }
                    }
                }
                PlanOp::Property(index) => {
                    let property = &properties[index];
                    buffer[cursor..cursor + property.data.len()].copy_from_slice(&property.data);
                    cursor += property.data.len();
                }
            }
        }

        debug_assert_eq!(cursor, self.word_count);
        Ok(())
    }

    /// Applies an authoritative snapshot, overwriting the simulation state.
    /// Query caches are dropped so a following re-simulation starts clean.
    pub(crate) fn read(
        &self,
        layers: &mut [AnimationLayer],
        states: &mut [AnimationState],
        properties: &mut [NetworkProperty],
        buffer: &[u32],
    ) -> Result<()> {
        self.check(buffer.len())?;
        let mut cursor = 0usize;

        for &op in &self.plan {
            match op {
                PlanOp::Layer(index) => {
                    let layer = &mut layers[index];
                    layer.weight = read_f32(buffer, &mut cursor);
                    layer.fading_speed = read_f32(buffer, &mut cursor);
                }
                PlanOp::StateWeights(id) => {
                    let state = &mut states[id.index()];
                    state.weight = read_f32(buffer, &mut cursor);
                    state.fading_speed = read_f32(buffer, &mut cursor);
                }
                PlanOp::StateClock(id) | PlanOp::StateSets(id) => {
                    let state = &mut states[id.index()];
                    state.weight = read_f32(buffer, &mut cursor);
                    state.fading_speed = read_f32(buffer, &mut cursor);
                    let time = read_f32(buffer, &mut cursor);

                    match &mut state.kind {
                        StateKind::Mixer => {}
                        StateKind::Clip(m) => m.time = time,
                        StateKind::MultiClip(m) => m.time = time,
                        StateKind::BlendTree(m) => {
                            m.time = time;
                            m.set.invalidate_cache();
                        }
                        StateKind::MultiBlendTree(m) => {
                            m.time = time;
                            for i in 0..m.weights.len() {
                                m.weights[i] = read_f32(buffer, &mut cursor);
                            }
                            for set in &mut m.sets {
                                set.invalidate_cache();
                            }
                        }
                        StateKind::MultiMirror(m) => {
                            m.time = time;
                            for set in &mut m.sets {
                                set.invalidate_cache();
                            }
                        }
                    }
                }
                PlanOp::Property(index) => {
                    let property = &mut properties[index];
                    let len = property.data.len();
                    property.data.copy_from_slice(&buffer[cursor..cursor + len]);
                    cursor += len;
                }
            }
        }

        debug_assert_eq!(cursor, self.word_count);
        Ok(())
    }

    /// Blends two snapshots into the interpolated view used by the render
    /// pass on proxies. Neither input is applied to the simulation fields.
    pub(crate) fn interpolate(
        &self,
        layers: &mut [AnimationLayer],
        states: &mut [AnimationState],
        properties: &mut [NetworkProperty],
        from: &[u32],
        to: &[u32],
        alpha: f32,
    ) -> Result<()> {
        self.check(from.len())?;
        self.check(to.len())?;
        let mut cursor = 0usize;

        for &op in &self.plan {
            match op {
                PlanOp::Layer(index) => {
                    let weight = weight_at(from, to, cursor, alpha);
                    cursor += 2;
                    layers[index].interpolated_weight = weight;
                }
                PlanOp::StateWeights(id) => {
                    let weight = weight_at(from, to, cursor, alpha);
                    cursor += 2;
                    states[id.index()].interpolated_weight = weight;
                }
                PlanOp::StateClock(id) | PlanOp::StateSets(id) => {
                    let weight = weight_at(from, to, cursor, alpha);
                    cursor += 2;

                    let from_time = f32::from_bits(from[cursor]);
                    let to_time = f32::from_bits(to[cursor]);
                    cursor += 1;

                    // A state with no interpolated influence snaps its clock
                    // instead of tweening through a wrap it never rendered.
                    let time = interpolate_time_weighted(from_time, to_time, 1.0, alpha, weight);

                    let state = &mut states[id.index()];
                    state.interpolated_weight = weight;
                    match &mut state.kind {
                        StateKind::Mixer => {}
                        StateKind::Clip(m) => m.interpolated_time = time,
                        StateKind::MultiClip(m) => m.interpolated_time = time,
                        StateKind::BlendTree(m) => m.interpolated_time = time,
                        StateKind::MultiBlendTree(m) => {
                            m.interpolated_time = time;
                            for i in 0..m.interpolated_weights.len() {
                                m.interpolated_weights[i] = interpolate_weight(
                                    f32::from_bits(from[cursor]),
                                    f32::from_bits(to[cursor]),
                                    alpha,
                                );
                                cursor += 1;
                            }
                        }
                        StateKind::MultiMirror(m) => m.interpolated_time = time,
                    }
                }
                PlanOp::Property(index) => {
                    let property = &mut properties[index];
                    let len = property.data.len();
                    property.interpolate(
                        &from[cursor..cursor + len],
                        &to[cursor..cursor + len],
                        alpha,
                    );
                    cursor += len;
                }
            }
        }

        debug_assert_eq!(cursor, self.word_count);
        Ok(())
    }
}

fn write_f32(buffer: &mut [u32], cursor: &mut usize, value: f32) {
    buffer[*cursor] = value.to_bits();
    *cursor += 1;
}

fn read_f32(buffer: &[u32], cursor: &mut usize) -> f32 {
    let value = f32::from_bits(buffer[*cursor]);
    *cursor += 1;
    value
}

fn weight_at(from: &[u32], to: &[u32], cursor: usize, alpha: f32) -> f32 {
    interpolate_weight(
        f32::from_bits(from[cursor]),
        f32::from_bits(to[cursor]),
        alpha,
    )
}
