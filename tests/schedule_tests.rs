//! Pass Schedule Tests
//!
//! Tests for:
//! - Stage-advance ordering across all six render stages
//! - Pass-through of stages with no registered passes
//! - Ordinal sequencing within a stage
//! - Frame termination (finished flag) and reset
//! - Callback selection order and consecutive-repeat skipping

use std::sync::Arc;

use strata::pass::schedule::{PassSchedule, RenderCallback};
use strata::pass::stage::RenderStage;

/// Drive the schedule like the frame driver does, recording every
/// (stage, pass) visit until the frame finishes.
fn drive(schedule: &mut PassSchedule) -> Vec<(RenderStage, String)> {
    let mut visits = Vec::new();
    for _ in 0..64 {
        schedule.update();
        if schedule.finished() {
            break;
        }
        visits.push((
            schedule.current_stage(),
            schedule.active_pass().unwrap_or("").to_string(),
        ));
    }
    visits
}

// ============================================================================
// Stage Ordering
// ============================================================================

#[test]
fn visits_stages_in_declaration_order() {
    let mut schedule = PassSchedule::new();
    schedule.register_pass("post", RenderStage::PostRender, 0);
    schedule.register_pass("main", RenderStage::PrimaryRender, 0);
    schedule.register_pass("early", RenderStage::PreRender, 0);
    schedule.register_pass("swap", RenderStage::PostFrameSwap, 0);

    let visits = drive(&mut schedule);
    let stages: Vec<RenderStage> = visits.iter().map(|(s, _)| *s).collect();
    assert_eq!(
        stages,
        vec![
            RenderStage::PreRender,
            RenderStage::PrimaryRender,
            RenderStage::PostRender,
            RenderStage::PostFrameSwap,
        ],
        "stages must be visited strictly in enum order"
    );
}

#[test]
fn empty_stages_are_passed_through_not_stalled() {
    let mut schedule = PassSchedule::new();
    // Only the last stage has a pass; everything before is empty.
    schedule.register_pass("swap", RenderStage::PostFrameSwap, 0);

    let visits = drive(&mut schedule);
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0], (RenderStage::PostFrameSwap, "swap".to_string()));
}

#[test]
fn ordinals_run_ascending_within_a_stage() {
    let mut schedule = PassSchedule::new();
    schedule.register_pass("second", RenderStage::PrimaryRender, 1);
    schedule.register_pass("first", RenderStage::PrimaryRender, 0);
    schedule.register_pass("third", RenderStage::PrimaryRender, 2);

    let visits = drive(&mut schedule);
    let names: Vec<&str> = visits.iter().map(|(_, n)| n.as_str()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[test]
fn frame_terminates_and_stays_finished() {
    let mut schedule = PassSchedule::new();
    schedule.register_pass("main", RenderStage::PrimaryRender, 0);

    drive(&mut schedule);
    assert!(schedule.finished());
    assert_eq!(schedule.current_stage(), RenderStage::PostFrameSwap);

    // Further updates are inert until the next reset.
    schedule.update();
    assert!(schedule.finished());
    assert_eq!(schedule.current_stage(), RenderStage::PostFrameSwap);
}

#[test]
fn reset_rewinds_to_pre_render() {
    let mut schedule = PassSchedule::new();
    schedule.register_pass("main", RenderStage::PrimaryRender, 0);

    let first_frame = drive(&mut schedule);
    schedule.reset();
    assert!(!schedule.finished());
    assert_eq!(schedule.current_stage(), RenderStage::PreRender);

    let second_frame = drive(&mut schedule);
    assert_eq!(first_frame, second_frame, "frames must be repeatable");
}

#[test]
fn set_specific_reactivates_a_named_pass() {
    let mut schedule = PassSchedule::new();
    schedule.register_pass("main", RenderStage::PrimaryRender, 0);
    schedule.register_pass("glow", RenderStage::PostRender, 0);

    assert!(schedule.set_specific("glow"));
    assert_eq!(schedule.active_pass(), Some("glow"));
    assert!(!schedule.set_specific("missing"));
    // A failed activation leaves the cursor alone.
    assert_eq!(schedule.active_pass(), Some("glow"));
}

#[test]
fn contiguous_ordinals_detects_gaps() {
    let mut schedule = PassSchedule::new();
    schedule.register_pass("a", RenderStage::PrimaryRender, 0);
    schedule.register_pass("b", RenderStage::PrimaryRender, 1);
    assert!(schedule.contiguous_ordinals());

    schedule.register_pass("d", RenderStage::PostRender, 1);
    assert!(
        !schedule.contiguous_ordinals(),
        "PostRender starts at ordinal 1 — the advance search would never reach it"
    );
}

// ============================================================================
// Callback Selection
// ============================================================================

fn callback() -> RenderCallback {
    Arc::new(|_| 0)
}

#[test]
fn batch_matches_slot_in_registration_order() {
    let mut schedule = PassSchedule::new();
    schedule.register_pass("main", RenderStage::PrimaryRender, 0);

    let a = callback();
    let b = callback();
    let other = callback();
    schedule.register_callback(RenderStage::PrimaryRender, 0, a.clone());
    schedule.register_callback(RenderStage::PostRender, 0, other);
    schedule.register_callback(RenderStage::PrimaryRender, 0, b.clone());

    schedule.update();
    assert_eq!(schedule.current_stage(), RenderStage::PrimaryRender);
    let batch = schedule.stage_batch();
    assert_eq!(batch.len(), 2);
    assert!(Arc::ptr_eq(&batch[0], &a));
    assert!(Arc::ptr_eq(&batch[1], &b));
}

#[test]
fn batch_skips_consecutive_self_repeat() {
    let mut schedule = PassSchedule::new();
    schedule.register_pass("main", RenderStage::PrimaryRender, 0);

    let a = callback();
    let b = callback();
    // a, a, b, a — the doubled a must collapse, the trailing a survives.
    schedule.register_callback(RenderStage::PrimaryRender, 0, a.clone());
    schedule.register_callback(RenderStage::PrimaryRender, 0, a.clone());
    schedule.register_callback(RenderStage::PrimaryRender, 0, b.clone());
    schedule.register_callback(RenderStage::PrimaryRender, 0, a.clone());

    schedule.update();
    let batch = schedule.stage_batch();
    assert_eq!(batch.len(), 3);
    assert!(Arc::ptr_eq(&batch[0], &a));
    assert!(Arc::ptr_eq(&batch[1], &b));
    assert!(Arc::ptr_eq(&batch[2], &a));
}

#[test]
fn batch_ignores_other_ordinals() {
    let mut schedule = PassSchedule::new();
    schedule.register_pass("first", RenderStage::PrimaryRender, 0);
    schedule.register_pass("second", RenderStage::PrimaryRender, 1);

    let for_first = callback();
    let for_second = callback();
    schedule.register_callback(RenderStage::PrimaryRender, 0, for_first.clone());
    schedule.register_callback(RenderStage::PrimaryRender, 1, for_second.clone());

    schedule.update();
    let batch = schedule.stage_batch();
    assert_eq!(batch.len(), 1);
    assert!(Arc::ptr_eq(&batch[0], &for_first));

    schedule.update();
    let batch = schedule.stage_batch();
    assert_eq!(batch.len(), 1);
    assert!(Arc::ptr_eq(&batch[0], &for_second));
}
