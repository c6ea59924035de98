//! The animation controller: layers, the flat state arena, the tick and
//! render lifecycles and the snapshot surface.
//!
//! The controller is driven by two external cadences. The fixed simulation
//! tick (`fixed_update`) advances fading and playback deterministically from
//! an explicit `dt` and is bit-identical across the authority and any
//! re-simulating peer. The render tick (`render_update`) blends the two most
//! recent snapshots into the `interpolated_*` view and pushes that to the
//! graph without touching the simulation fields.

use log::debug;

use crate::def::{ControllerDef, build_tree};
use crate::error::{AnimError, Result};
use crate::graph::{GraphHandle, PoseGraph};
use crate::layer::AnimationLayer;
use crate::network::{InterpolationHooks, NetworkProperty, SnapshotCodec};
use crate::state::{
    AnimationEvent, AnimationState, ClipTransition, MirrorInputs, Owner, StateId, StateKind,
};

/// Layered animation state machine with a fixed snapshot schema.
///
/// ```
/// use netanim::{
///     AnimationController, ClipNode, ControllerDef, LayerDef, MotionClip, NullGraph, StateDef,
/// };
///
/// let def = ControllerDef::new().layer(
///     LayerDef::new("base")
///         .with_initial_weight(1.0)
///         .state(StateDef::clip(
///             "idle",
///             ClipNode::new(MotionClip::new("idle", 2.0), true),
///         )),
/// );
///
/// let mut controller = AnimationController::new(def)?;
/// let mut graph = NullGraph::default();
/// controller.spawn(&mut graph);
///
/// let idle = controller.state_id("idle").unwrap();
/// controller.activate(idle, 0.2);
/// controller.fixed_update(1.0 / 60.0, &mut graph);
/// assert!(controller.is_active(idle));
/// # Ok::<(), netanim::AnimError>(())
/// ```
pub struct AnimationController {
    layers: Vec<AnimationLayer>,
    states: Vec<AnimationState>,
    properties: Vec<NetworkProperty>,
    codec: SnapshotCodec,
    events: Vec<AnimationEvent>,
    root_mixer: Option<GraphHandle>,
    spawned: bool,
}

impl AnimationController {
    /// Builds a controller with no custom interpolation hooks.
    ///
    /// # Errors
    ///
    /// Any configuration problem fails here, before the first snapshot can be
    /// produced. See [`AnimError`].
    pub fn new(def: ControllerDef) -> Result<Self> {
        Self::with_hooks(def, &InterpolationHooks::default())
    }

    /// Builds a controller, resolving property hook names against `hooks`.
    ///
    /// # Errors
    ///
    /// Any configuration problem fails here, before the first snapshot can be
    /// produced. See [`AnimError`].
    pub fn with_hooks(def: ControllerDef, hooks: &InterpolationHooks) -> Result<Self> {
        let built = build_tree(def.layers)?;

        let mut properties: Vec<NetworkProperty> = Vec::with_capacity(def.properties.len());
        for property in def.properties {
            if property.words == 0 {
                return Err(AnimError::ZeroSizedProperty(property.name));
            }
            if properties.iter().any(|p| p.name == property.name) {
                return Err(AnimError::DuplicateProperty(property.name));
            }

            let interpolator = match &property.hook {
                None => None,
                Some(hook) => Some(hooks.resolve(hook).ok_or_else(|| {
                    AnimError::UnknownInterpolationHook {
                        name: property.name.clone(),
                        hook: hook.clone(),
                    }
                })?),
            };

            properties.push(NetworkProperty {
                name: property.name,
                data: vec![0; property.words],
                interpolated: vec![0; property.words],
                interpolator,
            });
        }

        let codec = SnapshotCodec::new(&built.layers, &built.states, &properties);

        Ok(Self {
            layers: built.layers,
            states: built.states,
            properties,
            codec,
            events: Vec::new(),
            root_mixer: None,
            spawned: false,
        })
    }

    // ---- lifecycle -----------------------------------------------------

    /// Creates all graph resources: one mixer per layer and per composition
    /// node, one playback node per clip. Layers start at their initial
    /// weight, everything else at zero.
    pub fn spawn(&mut self, graph: &mut dyn PoseGraph) {
        if self.spawned {
            return;
        }

        debug!("spawning controller: {} states", self.states.len());

        let root = graph.create_mixer(self.layers.len());
        self.root_mixer = Some(root);

        for index in 0..self.layers.len() {
            let mixer = graph.create_mixer(self.layers[index].roots.len());
            graph.connect(root, index, mixer);

            let layer = &mut self.layers[index];
            layer.mixer = Some(mixer);
            layer.weight = layer.initial_weight;
            layer.interpolated_weight = layer.initial_weight;
            layer.fading_speed = 0.0;
            layer.cached_weight = layer.initial_weight;
            graph.set_input_weight(root, index, layer.initial_weight);

            for k in 0..self.layers[index].roots.len() {
                let state = self.layers[index].roots[k];
                spawn_state(&mut self.states, state, mixer, graph);
            }
        }

        self.spawned = true;
    }

    /// Destroys all graph resources and resets every numeric field, so a
    /// later `spawn` starts from a clean slate.
    pub fn despawn(&mut self, graph: &mut dyn PoseGraph) {
        if !self.spawned {
            return;
        }

        debug!("despawning controller");

        for state in &mut self.states {
            match &mut state.kind {
                StateKind::Mixer => {}
                StateKind::Clip(m) => m.node.despawn(graph),
                StateKind::MultiClip(m) => {
                    for node in &mut m.nodes {
                        node.despawn(graph);
                    }
                    if let Some(mixer) = m.mixer.take() {
                        graph.destroy(mixer);
                    }
                }
                StateKind::BlendTree(m) => m.set.despawn(graph),
                StateKind::MultiBlendTree(m) => {
                    for set in &mut m.sets {
                        set.despawn(graph);
                    }
                    if let Some(mixer) = m.mixer.take() {
                        graph.destroy(mixer);
                    }
                }
                StateKind::MultiMirror(m) => {
                    for set in &mut m.sets {
                        set.despawn(graph);
                    }
                    if let Some(mixer) = m.mixer.take() {
                        graph.destroy(mixer);
                    }
                }
            }

            if let Some(handle) = state.handle.take()
                && matches!(state.kind, StateKind::Mixer)
            {
                graph.destroy(handle);
            }
            state.owner_mixer = None;
            state.set_defaults();
            state.interpolated_weight = 0.0;
            state.cached_weight = 0.0;
            state.playable_weight = 0.0;
        }

        for layer in &mut self.layers {
            if let Some(mixer) = layer.mixer.take() {
                graph.destroy(mixer);
            }
            layer.weight = 0.0;
            layer.fading_speed = 0.0;
            layer.interpolated_weight = 0.0;
            layer.cached_weight = 0.0;
        }

        if let Some(root) = self.root_mixer.take() {
            graph.destroy(root);
        }

        self.events.clear();
        self.spawned = false;
    }

    /// Advances the whole tree by one fixed simulation step.
    ///
    /// An inactive layer (weight and fading both at or below zero) freezes
    /// its states as they are; only an inactive state resets its own subtree
    /// to defaults. Clip boundary events from this tick replace those of the
    /// previous one; drain them with [`take_events`](Self::take_events).
    pub fn fixed_update(&mut self, dt: f32, graph: &mut dyn PoseGraph) {
        self.events.clear();

        for index in 0..self.layers.len() {
            let layer = &self.layers[index];
            if layer.fading_speed <= 0.0 && layer.weight <= 0.0 {
                continue;
            }

            for k in 0..self.layers[index].roots.len() {
                let root = self.layers[index].roots[k];
                tick_state(&mut self.states, root, dt, graph, &mut self.events);
            }

            self.layers[index].advance_fading(dt);
        }

        self.apply_weights(false, graph);
    }

    /// Blends the two most recent snapshots at `alpha` and drives the graph
    /// from the interpolated view. Simulation fields are untouched.
    ///
    /// # Errors
    ///
    /// [`AnimError::BufferSize`] if either buffer does not match the schema.
    pub fn render_update(
        &mut self,
        from: &[u32],
        to: &[u32],
        alpha: f32,
        graph: &mut dyn PoseGraph,
    ) -> Result<()> {
        self.interpolate(from, to, alpha)?;

        for index in 0..self.layers.len() {
            if self.layers[index].interpolated_weight <= 0.0 {
                continue;
            }
            for k in 0..self.layers[index].roots.len() {
                let root = self.layers[index].roots[k];
                interpolate_state(&mut self.states, root, graph);
            }
        }

        self.apply_weights(true, graph);
        Ok(())
    }

    // ---- snapshots -----------------------------------------------------

    /// Total snapshot size in 32-bit words.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.codec.word_count()
    }

    /// Serializes the current simulation state into `buffer`.
    ///
    /// # Errors
    ///
    /// [`AnimError::BufferSize`] if `buffer` does not match the schema.
    pub fn write(&self, buffer: &mut [u32]) -> Result<()> {
        self.codec
            .write(&self.layers, &self.states, &self.properties, buffer)
    }

    /// Applies an authoritative snapshot, overwriting the simulation state
    /// and dropping blend query caches so re-simulation starts clean.
    ///
    /// # Errors
    ///
    /// [`AnimError::BufferSize`] if `buffer` does not match the schema.
    pub fn read(&mut self, buffer: &[u32]) -> Result<()> {
        self.codec.read(
            &mut self.layers,
            &mut self.states,
            &mut self.properties,
            buffer,
        )
    }

    /// Blends two snapshots at `alpha` into the `interpolated_*` view without
    /// driving the graph. [`render_update`](Self::render_update) is this plus
    /// the graph application.
    ///
    /// # Errors
    ///
    /// [`AnimError::BufferSize`] if either buffer does not match the schema.
    pub fn interpolate(&mut self, from: &[u32], to: &[u32], alpha: f32) -> Result<()> {
        self.codec.interpolate(
            &mut self.layers,
            &mut self.states,
            &mut self.properties,
            from,
            to,
            alpha,
        )
    }

    // ---- activation ----------------------------------------------------

    /// Starts fading a state in over `duration` seconds (snaps to full
    /// weight when `duration <= 0`). Deactivates siblings sharing the port
    /// and activates the composition chain above. Re-activating an active or
    /// fading-in state is a no-op.
    pub fn activate(&mut self, id: StateId, duration: f32) {
        self.activate_state(id, duration);
    }

    /// Starts fading a state out over `duration` seconds (snaps to zero when
    /// `duration <= 0`), along with the composition chain above it.
    /// Deactivating an inactive or fading-out state is a no-op.
    pub fn deactivate(&mut self, id: StateId, duration: f32) {
        self.deactivate_state(id, duration, true);
    }

    /// Fades out every root state of a layer.
    pub fn deactivate_all_states(&mut self, layer: usize, duration: f32) {
        for k in 0..self.layers[layer].roots.len() {
            let root = self.layers[layer].roots[k];
            self.deactivate_state(root, duration, false);
        }
    }

    /// Starts fading a layer in. Layers never arbitrate among themselves.
    pub fn activate_layer(&mut self, layer: usize, duration: f32) {
        let layer = &mut self.layers[layer];
        if layer.is_active() {
            return;
        }

        debug!("activating layer '{}' over {duration}s", layer.name);
        if duration <= 0.0 {
            layer.weight = 1.0;
            layer.fading_speed = 0.0;
        } else {
            layer.fading_speed = 1.0 / duration;
        }
    }

    /// Starts fading a layer out.
    pub fn deactivate_layer(&mut self, layer: usize, duration: f32) {
        let layer = &mut self.layers[layer];
        if (layer.fading_speed == 0.0 && layer.weight <= 0.0) || layer.fading_speed < 0.0 {
            return;
        }

        debug!("deactivating layer '{}' over {duration}s", layer.name);
        if duration <= 0.0 {
            layer.weight = 0.0;
            layer.fading_speed = 0.0;
        } else {
            layer.fading_speed = -1.0 / duration;
        }
    }

    fn activate_state(&mut self, id: StateId, duration: f32) {
        let index = id.index();
        if self.states[index].is_active_self() {
            return;
        }

        debug!(
            "activating state '{}' over {duration}s",
            self.states[index].name
        );

        if duration <= 0.0 {
            self.states[index].weight = 1.0;
            self.states[index].fading_speed = 0.0;
        } else {
            self.states[index].fading_speed = 1.0 / duration;
        }

        let port = self.states[index].port;
        match self.states[index].owner {
            Owner::Layer(layer) => {
                for k in 0..self.layers[layer].roots.len() {
                    let sibling = self.layers[layer].roots[k];
                    if sibling != id && self.states[sibling.index()].port == port {
                        self.deactivate_state(sibling, duration, false);
                    }
                }
            }
            Owner::State(parent) => {
                for k in 0..self.states[parent.index()].children.len() {
                    let sibling = self.states[parent.index()].children[k];
                    if sibling != id && self.states[sibling.index()].port == port {
                        self.deactivate_state(sibling, duration, false);
                    }
                }

                // Composition nodes ramp in lockstep with the activated leaf.
                self.activate_state(parent, duration);
            }
        }
    }

    fn deactivate_state(&mut self, id: StateId, duration: f32, propagate_up: bool) {
        let index = id.index();
        let state = &self.states[index];
        if (state.fading_speed == 0.0 && state.weight <= 0.0) || state.fading_speed < 0.0 {
            return;
        }

        debug!("deactivating state '{}' over {duration}s", state.name);

        if duration <= 0.0 {
            self.states[index].weight = 0.0;
            self.states[index].fading_speed = 0.0;
        } else {
            self.states[index].fading_speed = -1.0 / duration;
        }

        if propagate_up && let Owner::State(parent) = self.states[index].owner {
            self.deactivate_state(parent, duration, true);
        }
    }

    // ---- queries -------------------------------------------------------

    /// Looks up a state by name.
    #[must_use]
    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.states
            .iter()
            .position(|s| s.name == name)
            .map(|i| StateId(i as u32))
    }

    /// Looks up a layer by name.
    #[must_use]
    pub fn layer_id(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    /// Name of a state.
    #[must_use]
    pub fn state_name(&self, id: StateId) -> &str {
        &self.states[id.index()].name
    }

    /// The first active root state of a layer, if any.
    #[must_use]
    pub fn active_state(&self, layer: usize) -> Option<StateId> {
        self.layers[layer]
            .roots
            .iter()
            .copied()
            .find(|id| self.states[id.index()].is_active_self())
    }

    /// Whether a state is steady with influence or ramping in, and every
    /// owner up to and including its layer is too. A fading-out state is not
    /// active, so it can be re-activated mid-transition.
    #[must_use]
    pub fn is_active(&self, id: StateId) -> bool {
        if !self.states[id.index()].is_active_self() {
            return false;
        }

        let mut owner = self.states[id.index()].owner;
        loop {
            match owner {
                Owner::Layer(layer) => return self.layers[layer].is_active(),
                Owner::State(parent) => {
                    if !self.states[parent.index()].is_active_self() {
                        return false;
                    }
                    owner = self.states[parent.index()].owner;
                }
            }
        }
    }

    /// Whether a state still contributes at all (any weight or any ramp, in
    /// either direction), owner chain included.
    #[must_use]
    pub fn is_playing(&self, id: StateId) -> bool {
        if !self.states[id.index()].is_playing_self() {
            return false;
        }

        let mut owner = self.states[id.index()].owner;
        loop {
            match owner {
                Owner::Layer(layer) => {
                    let layer = &self.layers[layer];
                    return layer.fading_speed > 0.0 || layer.weight > 0.0;
                }
                Owner::State(parent) => {
                    if !self.states[parent.index()].is_playing_self() {
                        return false;
                    }
                    owner = self.states[parent.index()].owner;
                }
            }
        }
    }

    /// Whether a state is currently ramping in.
    #[must_use]
    pub fn is_fading_in(&self, id: StateId) -> bool {
        self.states[id.index()].fading_speed > 0.0
    }

    /// Whether a state is currently ramping out.
    #[must_use]
    pub fn is_fading_out(&self, id: StateId) -> bool {
        self.states[id.index()].fading_speed < 0.0
    }

    /// Whether an active state's playback reached `normalized_time`.
    #[must_use]
    pub fn is_finished(&self, id: StateId, normalized_time: f32) -> bool {
        self.animation_time(id) >= normalized_time && self.is_active(id)
    }

    /// Current simulation weight of a state.
    #[must_use]
    pub fn weight(&self, id: StateId) -> f32 {
        self.states[id.index()].weight
    }

    /// Render-interpolated weight of a state.
    #[must_use]
    pub fn interpolated_weight(&self, id: StateId) -> f32 {
        self.states[id.index()].interpolated_weight
    }

    /// Normalized playback time, 0.0 for kinds without a clock.
    #[must_use]
    pub fn animation_time(&self, id: StateId) -> f32 {
        self.states[id.index()].kind.animation_time().unwrap_or(0.0)
    }

    /// Render-interpolated playback time, 0.0 for kinds without a clock.
    #[must_use]
    pub fn interpolated_animation_time(&self, id: StateId) -> f32 {
        self.states[id.index()]
            .kind
            .interpolated_animation_time()
            .unwrap_or(0.0)
    }

    /// Clip boundary events of the most recent fixed tick.
    #[must_use]
    pub fn events(&self) -> &[AnimationEvent] {
        &self.events
    }

    /// Drains the clip boundary events of the most recent fixed tick.
    pub fn take_events(&mut self) -> Vec<AnimationEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- blend space ---------------------------------------------------

    /// Rescales the blend space(s) of a state, dropping its query caches.
    /// No-op for kinds without a blend space.
    pub fn set_blend_scale(&mut self, id: StateId, scale: f32) {
        match &mut self.states[id.index()].kind {
            StateKind::Mixer | StateKind::Clip(_) | StateKind::MultiClip(_) => {}
            StateKind::BlendTree(m) => m.set.set_scale(scale),
            StateKind::MultiBlendTree(m) => {
                for set in &mut m.sets {
                    set.set_scale(scale);
                }
            }
            StateKind::MultiMirror(m) => {
                for set in &mut m.sets {
                    set.set_scale(scale);
                }
            }
        }
    }

    /// Restores the blend space(s) of a state to their construction scale.
    pub fn reset_blend_scale(&mut self, id: StateId) {
        match &mut self.states[id.index()].kind {
            StateKind::Mixer | StateKind::Clip(_) | StateKind::MultiClip(_) => {}
            StateKind::BlendTree(m) => m.set.reset_scale(),
            StateKind::MultiBlendTree(m) => {
                for set in &mut m.sets {
                    set.reset_scale();
                }
            }
            StateKind::MultiMirror(m) => {
                for set in &mut m.sets {
                    set.reset_scale();
                }
            }
        }
    }

    // ---- custom properties ---------------------------------------------

    /// Replicated words of a custom property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&[u32]> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.data.as_slice())
    }

    /// Mutable replicated words of a custom property; written by the
    /// authority before producing a snapshot.
    #[must_use]
    pub fn property_mut(&mut self, name: &str) -> Option<&mut [u32]> {
        self.properties
            .iter_mut()
            .find(|p| p.name == name)
            .map(|p| p.data.as_mut_slice())
    }

    /// Render-interpolated words of a custom property.
    #[must_use]
    pub fn interpolated_property(&self, name: &str) -> Option<&[u32]> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.interpolated.as_slice())
    }

    // ---- graph weight flattening ---------------------------------------

    /// Pushes resolved weights down the mixer hierarchy and one weight per
    /// layer up to the root mixer. Children overlapping past a total of 1
    /// are normalized; per-slot caches skip redundant sink calls.
    fn apply_weights(&mut self, interpolated: bool, graph: &mut dyn PoseGraph) {
        for index in 0..self.layers.len() {
            let layer_weight = if interpolated {
                self.layers[index].interpolated_weight
            } else {
                self.layers[index].weight
            };

            let mixer_weight = if layer_weight <= 0.0 {
                0.0
            } else {
                let mut children_sum = 0.0f32;
                let mut max_weight = 0.0f32;

                for k in 0..self.layers[index].roots.len() {
                    let root = self.layers[index].roots[k];
                    let (weight, max_child) =
                        calculate_playable_weights(&mut self.states, root, interpolated, graph);
                    children_sum += weight;
                    max_weight = max_weight.max(max_child);
                }

                if children_sum > 0.0 && children_sum != 1.0 {
                    self.apply_root_weights(index, 1.0 / children_sum, graph);
                    if children_sum > 1.0 {
                        children_sum = 1.0;
                    }
                } else {
                    self.apply_root_weights(index, 1.0, graph);
                }

                if children_sum > max_weight {
                    max_weight = children_sum;
                }

                max_weight * layer_weight
            };

            if mixer_weight != self.layers[index].cached_weight {
                self.layers[index].cached_weight = mixer_weight;
                if let Some(root) = self.root_mixer {
                    graph.set_input_weight(root, index, mixer_weight);
                }
            }
        }
    }

    fn apply_root_weights(&mut self, layer: usize, multiplier: f32, graph: &mut dyn PoseGraph) {
        for k in 0..self.layers[layer].roots.len() {
            let root = self.layers[layer].roots[k];
            apply_slot_weight(&mut self.states, root, multiplier, graph);
        }
    }
}

fn spawn_state(
    states: &mut [AnimationState],
    id: StateId,
    owner_mixer: GraphHandle,
    graph: &mut dyn PoseGraph,
) {
    let index = id.index();
    let child_count = states[index].children.len();

    let handle = match &mut states[index].kind {
        StateKind::Mixer => graph.create_mixer(child_count),
        StateKind::Clip(m) => {
            m.time = 0.0;
            m.interpolated_time = 0.0;
            m.node.spawn(graph)
        }
        StateKind::MultiClip(m) => {
            let mixer = graph.create_mixer(m.nodes.len());
            for (slot, node) in m.nodes.iter_mut().enumerate() {
                let clip = node.spawn(graph);
                graph.connect(mixer, slot, clip);
            }
            m.mixer = Some(mixer);
            m.time = 0.0;
            m.interpolated_time = 0.0;
            mixer
        }
        StateKind::BlendTree(m) => {
            m.set.reset_scale();
            m.time = 0.0;
            m.interpolated_time = 0.0;
            m.set.spawn(graph)
        }
        StateKind::MultiBlendTree(m) => {
            let mixer = graph.create_mixer(m.sets.len());
            for (slot, set) in m.sets.iter_mut().enumerate() {
                set.reset_scale();
                let set_mixer = set.spawn(graph);
                graph.connect(mixer, slot, set_mixer);
            }
            m.mixer = Some(mixer);
            m.weights.fill(0.0);
            m.interpolated_weights.fill(0.0);
            m.cached_weights.fill(0.0);
            m.time = 0.0;
            m.interpolated_time = 0.0;
            mixer
        }
        StateKind::MultiMirror(m) => {
            let mixer = graph.create_mixer(m.sets.len());
            for (slot, set) in m.sets.iter_mut().enumerate() {
                set.reset_scale();
                let set_mixer = set.spawn(graph);
                graph.connect(mixer, slot, set_mixer);
            }
            m.mixer = Some(mixer);
            m.cached_weights.fill(0.0);
            m.time = 0.0;
            m.interpolated_time = 0.0;
            mixer
        }
    };

    let state = &mut states[index];
    state.handle = Some(handle);
    state.owner_mixer = Some(owner_mixer);
    state.weight = 0.0;
    state.fading_speed = 0.0;
    state.interpolated_weight = 0.0;
    state.cached_weight = 0.0;
    state.playable_weight = 0.0;
    graph.connect(owner_mixer, state.slot, handle);

    if matches!(states[index].kind, StateKind::Mixer) {
        for k in 0..states[index].children.len() {
            let child = states[index].children[k];
            spawn_state(states, child, handle, graph);
        }
    }
}

fn set_defaults_subtree(states: &mut [AnimationState], id: StateId) {
    let index = id.index();
    states[index].set_defaults();

    for k in 0..states[index].children.len() {
        let child = states[index].children[k];
        set_defaults_subtree(states, child);
    }
}

fn tick_state(
    states: &mut [AnimationState],
    id: StateId,
    dt: f32,
    graph: &mut dyn PoseGraph,
    events: &mut Vec<AnimationEvent>,
) {
    let index = id.index();

    if !states[index].is_playing_self() {
        set_defaults_subtree(states, id);
        return;
    }

    for k in 0..states[index].children.len() {
        let child = states[index].children[k];
        tick_state(states, child, dt, graph, events);
    }

    states[index].advance_fading(dt);

    // The mirror partner sits strictly earlier in the arena, so splitting at
    // this state gives simultaneous access to both.
    let (earlier, rest) = states.split_at_mut(index);
    let state = &mut rest[0];

    match &mut state.kind {
        StateKind::Mixer => {}
        StateKind::Clip(m) => {
            if let Some(transition) = m.fixed_update(dt, graph) {
                events.push(event_for(transition, id));
            }
        }
        StateKind::MultiClip(m) => {
            if let Some(transition) = m.fixed_update(dt, graph) {
                events.push(event_for(transition, id));
            }
        }
        StateKind::BlendTree(m) => m.fixed_update(dt, graph),
        StateKind::MultiBlendTree(m) => m.fixed_update(dt, graph),
        StateKind::MultiMirror(m) => {
            if let StateKind::MultiBlendTree(partner) = &earlier[m.mirror.index()].kind {
                let inputs = MirrorInputs {
                    position: partner.input.position(false),
                    speed_multiplier: partner.input.speed_multiplier(),
                };
                m.fixed_update(dt, graph, &inputs, &partner.weights);
            }
        }
    }
}

fn interpolate_state(states: &mut [AnimationState], id: StateId, graph: &mut dyn PoseGraph) {
    let index = id.index();

    if states[index].interpolated_weight <= 0.0 {
        return;
    }

    for k in 0..states[index].children.len() {
        let child = states[index].children[k];
        interpolate_state(states, child, graph);
    }

    let (earlier, rest) = states.split_at_mut(index);
    let state = &mut rest[0];

    match &mut state.kind {
        StateKind::Mixer => {}
        StateKind::Clip(m) => m.interpolate(graph),
        StateKind::MultiClip(m) => m.interpolate(graph),
        StateKind::BlendTree(m) => m.interpolate(graph),
        StateKind::MultiBlendTree(m) => m.interpolate(graph),
        StateKind::MultiMirror(m) => {
            if let StateKind::MultiBlendTree(partner) = &earlier[m.mirror.index()].kind {
                let position = partner.input.position(true);
                m.interpolate(graph, position, &partner.interpolated_weights);
            }
        }
    }
}

fn event_for(transition: ClipTransition, id: StateId) -> AnimationEvent {
    match transition {
        ClipTransition::Restarted => AnimationEvent::ClipRestarted(id),
        ClipTransition::Finished => AnimationEvent::ClipFinished(id),
    }
}

/// Returns `(own_weight, max_resolved_weight)` for a subtree and stores each
/// state's pre-normalization slot weight in `playable_weight`.
fn calculate_playable_weights(
    states: &mut [AnimationState],
    id: StateId,
    interpolated: bool,
    graph: &mut dyn PoseGraph,
) -> (f32, f32) {
    let index = id.index();
    let own_weight = if interpolated {
        states[index].interpolated_weight
    } else {
        states[index].weight
    };

    if own_weight <= 0.0 {
        states[index].playable_weight = 0.0;
        return (0.0, 0.0);
    }

    states[index].playable_weight = own_weight;

    if states[index].children.is_empty() {
        return (own_weight, own_weight);
    }

    let mut children_sum = 0.0f32;
    let mut max_weight = 0.0f32;

    for k in 0..states[index].children.len() {
        let child = states[index].children[k];
        let (weight, max_child) = calculate_playable_weights(states, child, interpolated, graph);
        children_sum += weight;
        max_weight = max_weight.max(max_child);
    }

    if children_sum > 0.0 && children_sum != 1.0 {
        let multiplier = 1.0 / children_sum;
        for k in 0..states[index].children.len() {
            let child = states[index].children[k];
            apply_slot_weight(states, child, multiplier, graph);
        }
        if children_sum > 1.0 {
            children_sum = 1.0;
        }
    } else {
        for k in 0..states[index].children.len() {
            let child = states[index].children[k];
            apply_slot_weight(states, child, 1.0, graph);
        }
    }

    if children_sum > max_weight {
        max_weight = children_sum;
    }

    (own_weight, max_weight)
}

fn apply_slot_weight(
    states: &mut [AnimationState],
    id: StateId,
    multiplier: f32,
    graph: &mut dyn PoseGraph,
) {
    let index = id.index();
    let weight = states[index].playable_weight * multiplier;

    if weight != states[index].cached_weight {
        states[index].cached_weight = weight;
        if let Some(mixer) = states[index].owner_mixer {
            graph.set_input_weight(mixer, states[index].slot, weight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{LayerDef, StateDef};
    use crate::graph::NullGraph;
    use crate::nodes::{ClipNode, MotionClip};

    fn clip(name: &str, length: f32) -> ClipNode {
        ClipNode::new(MotionClip::new(name, length), true)
    }

    fn two_state_controller() -> AnimationController {
        let def = ControllerDef::new().layer(
            LayerDef::new("base")
                .with_initial_weight(1.0)
                .state(StateDef::clip("idle", clip("idle", 1.0)))
                .state(StateDef::clip("run", clip("run", 0.8))),
        );
        AnimationController::new(def).unwrap()
    }

    #[test]
    fn activation_excludes_same_port_siblings() {
        let mut controller = two_state_controller();
        let mut graph = NullGraph::default();
        controller.spawn(&mut graph);

        let idle = controller.state_id("idle").unwrap();
        let run = controller.state_id("run").unwrap();

        controller.activate(idle, 0.0);
        assert!(controller.is_active(idle));

        controller.activate(run, 0.2);
        assert!(controller.is_active(run));
        assert!(!controller.is_active(idle));
        assert!(controller.is_fading_out(idle));
        // Still contributing while it fades out.
        assert!(controller.is_playing(idle));
    }

    #[test]
    fn reactivation_while_ramping_is_a_no_op() {
        let mut controller = two_state_controller();
        let mut graph = NullGraph::default();
        controller.spawn(&mut graph);

        let idle = controller.state_id("idle").unwrap();
        controller.activate(idle, 0.5);
        let fading = controller.states[idle.index()].fading_speed;

        controller.activate(idle, 0.1);
        assert_eq!(controller.states[idle.index()].fading_speed, fading);
    }

    #[test]
    fn activation_propagates_through_mixer() {
        let def = ControllerDef::new().layer(
            LayerDef::new("base").with_initial_weight(1.0).state(
                StateDef::mixer(
                    "upper",
                    vec![
                        StateDef::clip("aim", clip("aim", 1.0)),
                        StateDef::clip("reload", clip("reload", 1.5)),
                    ],
                ),
            ),
        );
        let mut controller = AnimationController::new(def).unwrap();
        let mut graph = NullGraph::default();
        controller.spawn(&mut graph);

        let upper = controller.state_id("upper").unwrap();
        let aim = controller.state_id("aim").unwrap();
        let reload = controller.state_id("reload").unwrap();

        controller.activate(aim, 0.2);
        assert!(controller.is_fading_in(aim));
        assert!(controller.is_fading_in(upper));

        // Switching the leaf excludes its sibling but leaves the mixer up.
        for _ in 0..30 {
            controller.fixed_update(1.0 / 60.0, &mut graph);
        }
        controller.activate(reload, 0.2);
        assert!(controller.is_fading_out(aim));
        assert!(controller.is_active(upper));

        // Deactivating the leaf takes the mixer chain down with it.
        controller.deactivate(reload, 0.2);
        assert!(controller.is_fading_out(upper));
    }

    #[test]
    fn inactive_subtree_resets_to_defaults() {
        let mut controller = two_state_controller();
        let mut graph = NullGraph::default();
        controller.spawn(&mut graph);

        let idle = controller.state_id("idle").unwrap();
        controller.activate(idle, 0.0);
        controller.fixed_update(0.25, &mut graph);
        assert!(controller.animation_time(idle) > 0.0);

        controller.deactivate(idle, 0.0);
        controller.fixed_update(1.0 / 60.0, &mut graph);
        assert_eq!(controller.animation_time(idle), 0.0);
    }

    #[test]
    fn deactivate_all_states_fades_out_every_root() {
        let mut controller = two_state_controller();
        let mut graph = NullGraph::default();
        controller.spawn(&mut graph);

        let idle = controller.state_id("idle").unwrap();
        controller.activate(idle, 0.0);
        controller.deactivate_all_states(0, 0.3);
        assert!(controller.is_fading_out(idle));
        assert_eq!(controller.active_state(0), None);
    }

    #[test]
    fn unknown_hook_fails_construction() {
        let def = ControllerDef::new()
            .layer(LayerDef::new("base"))
            .property(crate::def::PropertyDef::new("look-pitch", 1).with_hook("angular"));

        assert!(matches!(
            AnimationController::new(def),
            Err(AnimError::UnknownInterpolationHook { .. })
        ));
    }
}
