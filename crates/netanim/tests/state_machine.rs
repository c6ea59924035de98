//! End-to-end state machine behavior over the public API.

use std::cell::Cell;
use std::rc::Rc;

use glam::Vec2;
use netanim::{
    AnimationController, AnimationEvent, BlendTreeNode, ClipNode, ControllerDef, LayerDef,
    MotionClip, NullGraph, StateDef,
};
use proptest::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn clip(name: &str, length: f32, looping: bool) -> ClipNode {
    ClipNode::new(MotionClip::new(name, length), looping)
}

fn walk_run_nodes() -> Vec<BlendTreeNode> {
    vec![
        BlendTreeNode::new(MotionClip::new("walk", 1.0), Vec2::new(0.0, 1.0)),
        BlendTreeNode::new(MotionClip::new("run", 0.5), Vec2::new(0.0, 2.0)),
    ]
}

fn single_clip_controller(looping: bool) -> AnimationController {
    let def = ControllerDef::new().layer(
        LayerDef::new("base")
            .with_initial_weight(1.0)
            .state(StateDef::clip("shoot", clip("shoot", 2.0, looping))),
    );
    AnimationController::new(def).unwrap()
}

#[test]
fn one_shot_clip_clamps_and_finishes_once() {
    init_logging();
    let mut controller = single_clip_controller(false);
    let mut graph = NullGraph::default();
    controller.spawn(&mut graph);

    let shoot = controller.state_id("shoot").unwrap();
    controller.activate(shoot, 0.0);

    controller.fixed_update(1.0, &mut graph);
    assert_eq!(controller.animation_time(shoot), 0.5);
    assert!(controller.events().is_empty());

    controller.fixed_update(1.0, &mut graph);
    assert_eq!(controller.animation_time(shoot), 1.0);
    assert_eq!(controller.events(), [AnimationEvent::ClipFinished(shoot)]);
    assert!(controller.is_finished(shoot, 1.0));

    // Parked at the end: no further advance, no repeated event.
    controller.fixed_update(1.0, &mut graph);
    assert_eq!(controller.animation_time(shoot), 1.0);
    assert!(controller.events().is_empty());
}

#[test]
fn looping_clip_wraps_and_restarts() {
    init_logging();
    let mut controller = single_clip_controller(true);
    let mut graph = NullGraph::default();
    controller.spawn(&mut graph);

    let shoot = controller.state_id("shoot").unwrap();
    controller.activate(shoot, 0.0);

    controller.fixed_update(1.0, &mut graph);
    controller.fixed_update(1.0, &mut graph);
    assert_eq!(
        controller.take_events(),
        [AnimationEvent::ClipRestarted(shoot)]
    );

    controller.fixed_update(1.0, &mut graph);
    assert_eq!(controller.animation_time(shoot), 0.5);
}

#[test]
fn multi_clip_state_hard_cuts_between_clips() {
    init_logging();
    let selected = Rc::new(Cell::new(0usize));
    let selector = {
        let selected = Rc::clone(&selected);
        move || selected.get()
    };

    let def = ControllerDef::new().layer(
        LayerDef::new("base")
            .with_initial_weight(1.0)
            .state(StateDef::multi_clip(
                "hit",
                vec![clip("hit-front", 1.0, false), clip("hit-back", 0.5, false)],
                selector,
            )),
    );
    let mut controller = AnimationController::new(def).unwrap();
    let mut graph = NullGraph::default();
    controller.spawn(&mut graph);

    let hit = controller.state_id("hit").unwrap();
    controller.activate(hit, 0.0);

    controller.fixed_update(0.25, &mut graph);
    assert_eq!(controller.animation_time(hit), 0.25);

    // The shorter clip advances the shared phase twice as fast.
    selected.set(1);
    controller.fixed_update(0.25, &mut graph);
    assert_eq!(controller.animation_time(hit), 0.75);
}

#[test]
fn blend_tree_phase_follows_effective_length() {
    init_logging();
    let position = Rc::new(Cell::new(Vec2::new(0.0, 1.0)));
    let input = {
        let position = Rc::clone(&position);
        move |_interpolated: bool| position.get()
    };

    let def = ControllerDef::new().layer(
        LayerDef::new("base")
            .with_initial_weight(1.0)
            .state(StateDef::blend_tree("move", walk_run_nodes(), input)),
    );
    let mut controller = AnimationController::new(def).unwrap();
    let mut graph = NullGraph::default();
    controller.spawn(&mut graph);

    let movement = controller.state_id("move").unwrap();
    controller.activate(movement, 0.0);

    // At the walk sample the effective length is the walk clip's 1.0 s.
    controller.fixed_update(0.25, &mut graph);
    assert!((controller.animation_time(movement) - 0.25).abs() < 1e-3);

    // At the run sample it halves, doubling the phase speed.
    position.set(Vec2::new(0.0, 2.0));
    controller.fixed_update(0.25, &mut graph);
    assert!((controller.animation_time(movement) - 0.75).abs() < 1e-3);
}

fn multi_set_controller(selected: &Rc<Cell<usize>>) -> AnimationController {
    let selector = {
        let selected = Rc::clone(selected);
        move || selected.get()
    };

    // The second set plays the same layout at twice the clip lengths.
    let slow_nodes = vec![
        BlendTreeNode::new(MotionClip::new("walk-slow", 2.0), Vec2::new(0.0, 1.0)),
        BlendTreeNode::new(MotionClip::new("run-slow", 1.0), Vec2::new(0.0, 2.0)),
    ];

    let def = ControllerDef::new().layer(
        LayerDef::new("base")
            .with_initial_weight(1.0)
            .state(StateDef::multi_blend_tree(
                "move",
                vec![walk_run_nodes(), slow_nodes],
                0.5,
                selector,
                |_interpolated: bool| Vec2::new(0.0, 1.0),
            )),
    );
    AnimationController::new(def).unwrap()
}

#[test]
fn set_switch_cross_blends_over_blend_time() {
    init_logging();
    let selected = Rc::new(Cell::new(0usize));
    let mut controller = multi_set_controller(&selected);
    let mut graph = NullGraph::default();
    controller.spawn(&mut graph);

    let movement = controller.state_id("move").unwrap();
    controller.activate(movement, 0.0);

    // Snapshot layout for this tree: layer (2 words) then the multi blend
    // tree state (3 words + one per set).
    assert_eq!(controller.word_count(), 7);
    let mut snapshot = vec![0u32; 7];

    controller.fixed_update(0.25, &mut graph);
    controller.write(&mut snapshot).unwrap();
    assert_eq!(f32::from_bits(snapshot[5]), 0.5);
    assert_eq!(f32::from_bits(snapshot[6]), 0.0);

    controller.fixed_update(0.25, &mut graph);
    controller.write(&mut snapshot).unwrap();
    assert_eq!(f32::from_bits(snapshot[5]), 1.0);
    assert_eq!(controller.animation_time(movement), 0.5);

    // Switching sets ramps the new one in and the old one out; both
    // contribute mid-blend.
    selected.set(1);
    controller.fixed_update(0.25, &mut graph);
    controller.write(&mut snapshot).unwrap();
    assert_eq!(f32::from_bits(snapshot[5]), 0.5);
    assert_eq!(f32::from_bits(snapshot[6]), 0.5);

    // Mid-blend the phase advances against the length-weighted average of
    // the contributing sets: (1.0 * 0.5 + 2.0 * 0.5) / 1.0 = 1.5 s.
    let expected = 0.5 + 0.25 / 1.5;
    assert!((controller.animation_time(movement) - expected).abs() < 1e-6);
}

#[test]
fn mirror_state_tracks_its_partner() {
    init_logging();
    let def = ControllerDef::new().layer(
        LayerDef::new("base")
            .with_initial_weight(1.0)
            .state(StateDef::multi_blend_tree(
                "move",
                vec![walk_run_nodes()],
                0.2,
                || 0usize,
                |_interpolated: bool| Vec2::new(0.0, 1.0),
            ))
            .state(
                StateDef::multi_mirror("move-mirrored", vec![walk_run_nodes()], "move")
                    .with_port(1),
            ),
    );
    let mut controller = AnimationController::new(def).unwrap();
    let mut graph = NullGraph::default();
    controller.spawn(&mut graph);

    let movement = controller.state_id("move").unwrap();
    let mirrored = controller.state_id("move-mirrored").unwrap();
    controller.activate(movement, 0.0);
    controller.activate(mirrored, 0.0);

    for _ in 0..4 {
        controller.fixed_update(0.1, &mut graph);
    }

    let partner_time = controller.animation_time(movement);
    let mirror_time = controller.animation_time(mirrored);
    assert!(partner_time > 0.0);
    assert!((mirror_time - partner_time).abs() < 1e-3);
}

#[test]
fn layer_fading_gates_its_states() {
    init_logging();
    let mut controller = single_clip_controller(true);
    let mut graph = NullGraph::default();
    controller.spawn(&mut graph);

    let shoot = controller.state_id("shoot").unwrap();
    controller.activate(shoot, 0.0);
    controller.fixed_update(0.5, &mut graph);
    assert!(controller.is_active(shoot));
    assert_eq!(controller.animation_time(shoot), 0.25);

    controller.deactivate_layer(0, 0.0);
    assert!(!controller.is_active(shoot));
    assert!(!controller.is_playing(shoot));

    // An inactive layer freezes its states; time and weight hold as-is.
    controller.fixed_update(0.5, &mut graph);
    assert_eq!(controller.animation_time(shoot), 0.25);
    assert_eq!(controller.weight(shoot), 1.0);

    // Bringing the layer back resumes the state where it left off.
    controller.activate_layer(0, 0.0);
    assert!(controller.is_active(shoot));
    controller.fixed_update(0.5, &mut graph);
    assert_eq!(controller.animation_time(shoot), 0.5);
}

#[test]
fn despawn_resets_everything_for_the_next_spawn() {
    init_logging();
    let mut controller = single_clip_controller(true);
    let mut graph = NullGraph::default();
    controller.spawn(&mut graph);

    let shoot = controller.state_id("shoot").unwrap();
    controller.activate(shoot, 0.0);
    controller.fixed_update(0.5, &mut graph);
    assert!(controller.weight(shoot) > 0.0);

    controller.despawn(&mut graph);
    controller.spawn(&mut graph);
    assert_eq!(controller.weight(shoot), 0.0);
    assert_eq!(controller.animation_time(shoot), 0.0);
    assert!(!controller.is_active(shoot));
}

proptest! {
    #[test]
    fn weight_stays_in_unit_range(
        duration in -2.0f32..2.0,
        dts in prop::collection::vec(0.0001f32..0.5, 1..40),
    ) {
        let mut controller = single_clip_controller(true);
        let mut graph = NullGraph::default();
        controller.spawn(&mut graph);

        let shoot = controller.state_id("shoot").unwrap();
        controller.activate(shoot, duration);

        for (i, &dt) in dts.iter().enumerate() {
            // Flip direction halfway through to exercise both ramps.
            if i == dts.len() / 2 {
                controller.deactivate(shoot, duration);
            }
            controller.fixed_update(dt, &mut graph);

            let weight = controller.weight(shoot);
            prop_assert!((0.0..=1.0).contains(&weight), "weight = {weight}");
        }
    }
}
