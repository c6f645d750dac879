//! Pass Schedule
//!
//! The device-free scheduling core of a render pass: which shader pass is
//! active, which stage the frame is on, and which callbacks fire at each
//! (stage, ordinal) slot. Keeping this state machine free of GPU handles
//! lets the stage-advance and callback-selection rules be tested without a
//! device.
//!
//! # Scheduling rules
//!
//! - Stages advance strictly in [`RenderStage`] order. A stage with no
//!   registered passes is passed through, not stalled.
//! - Within a stage, passes run in ordinal order starting from 0. Ordinals
//!   must be contiguous from 0 or the advance search would skip the gap.
//! - Callbacks registered at the same slot run in registration order; an
//!   entry identical (by `Arc` identity) to the immediately preceding
//!   selected one is skipped, which keeps a twice-registered callback from
//!   running back to back.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::stage::RenderStage;
use crate::renderer::Renderer;

/// A host callback bound to a (stage, ordinal) slot.
///
/// The return value is a status code: nonzero is logged as an error by the
/// frame driver but does not halt the frame.
pub type RenderCallback = Arc<dyn Fn(&mut Renderer) -> i32>;

/// Where a named shader pass sits in the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderPassSlot {
    pub stage: RenderStage,
    pub ordinal: u32,
}

struct CallbackEntry {
    stage: RenderStage,
    ordinal: i32,
    run: RenderCallback,
}

/// The render-pass state machine.
pub struct PassSchedule {
    passes: FxHashMap<String, ShaderPassSlot>,
    callbacks: Vec<CallbackEntry>,
    active_stage: RenderStage,
    active_ordinal: i32,
    active_pass: Option<String>,
    finished: bool,
}

impl Default for PassSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl PassSchedule {
    #[must_use]
    pub fn new() -> Self {
        Self {
            passes: FxHashMap::default(),
            callbacks: Vec::new(),
            active_stage: RenderStage::PreRender,
            active_ordinal: -1,
            active_pass: None,
            finished: false,
        }
    }

    /// Register a named shader pass at a (stage, ordinal) slot.
    pub fn register_pass(&mut self, name: impl Into<String>, stage: RenderStage, ordinal: u32) {
        self.passes.insert(name.into(), ShaderPassSlot { stage, ordinal });
    }

    /// Register a callback for a (stage, ordinal) slot.
    pub fn register_callback(&mut self, stage: RenderStage, ordinal: i32, run: RenderCallback) {
        self.callbacks.push(CallbackEntry { stage, ordinal, run });
    }

    /// Whether a shader pass with this name exists.
    #[must_use]
    pub fn query_pass(&self, name: &str) -> bool {
        self.passes.contains_key(name)
    }

    #[must_use]
    pub fn pass_slot(&self, name: &str) -> Option<ShaderPassSlot> {
        self.passes.get(name).copied()
    }

    /// The stage the frame is currently on.
    #[must_use]
    pub fn current_stage(&self) -> RenderStage {
        self.active_stage
    }

    /// Name of the active shader pass, if one has been selected.
    #[must_use]
    pub fn active_pass(&self) -> Option<&str> {
        self.active_pass.as_deref()
    }

    #[must_use]
    pub fn active_ordinal(&self) -> i32 {
        self.active_ordinal
    }

    /// Advance to the next shader pass.
    ///
    /// Seeks the pass at ordinal+1 within the active stage. When none
    /// exists the stage advances; reaching `End` backs off to the last real
    /// stage and returns — the per-frame "all stages finished" signal.
    /// Entering a new stage restarts the ordinal search at 0.
    pub fn update(&mut self) {
        if self.finished {
            return;
        }
        let mut ordinal = self.active_ordinal;
        loop {
            if let Some(name) = self.find_pass(self.active_stage, ordinal + 1) {
                self.active_ordinal = ordinal + 1;
                self.active_pass = Some(name);
                return;
            }
            self.active_stage = self.active_stage.next();
            if self.active_stage == RenderStage::End {
                self.active_stage = RenderStage::PostFrameSwap;
                self.finished = true;
                return;
            }
            ordinal = -1;
        }
    }

    /// Whether the last [`update`](Self::update) ran out of passes — the
    /// per-frame "all stages finished" signal. Cleared by
    /// [`reset`](Self::reset).
    #[must_use]
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Activate a specific pass by name without touching the stage cursor.
    ///
    /// Returns `false` when no pass has that name.
    pub fn set_specific(&mut self, name: &str) -> bool {
        let Some(slot) = self.passes.get(name) else {
            return false;
        };
        self.active_ordinal = slot.ordinal as i32;
        self.active_pass = Some(name.to_string());
        true
    }

    /// Rewind to `PreRender` for the next frame.
    ///
    /// The ordinal cursor resets to −1 so the following [`update`] picks
    /// ordinal 0 of the first populated stage.
    ///
    /// [`update`]: Self::update
    pub fn reset(&mut self) {
        self.active_stage = RenderStage::PreRender;
        self.active_ordinal = -1;
        self.active_pass = self.find_pass(RenderStage::PreRender, 0);
        self.finished = false;
    }

    /// Collect the callbacks that fire at the current (stage, ordinal)
    /// slot, in registration order, skipping an entry identical to the
    /// immediately preceding selected one.
    #[must_use]
    pub fn stage_batch(&self) -> SmallVec<[RenderCallback; 8]> {
        let mut batch: SmallVec<[RenderCallback; 8]> = SmallVec::new();
        let mut last: Option<&RenderCallback> = None;
        for entry in &self.callbacks {
            if entry.stage != self.active_stage || entry.ordinal != self.active_ordinal {
                continue;
            }
            if last.is_some_and(|prev| Arc::ptr_eq(prev, &entry.run)) {
                continue;
            }
            batch.push(entry.run.clone());
            last = Some(&entry.run);
        }
        batch
    }

    /// Whether every stage's ordinals are contiguous from 0.
    ///
    /// A gap would terminate the advance search early and silently skip the
    /// passes above it, so pass loading warns when this fails.
    #[must_use]
    pub fn contiguous_ordinals(&self) -> bool {
        let mut per_stage: FxHashMap<RenderStage, Vec<u32>> = FxHashMap::default();
        for slot in self.passes.values() {
            per_stage.entry(slot.stage).or_default().push(slot.ordinal);
        }
        per_stage.values_mut().all(|ordinals| {
            ordinals.sort_unstable();
            ordinals.iter().enumerate().all(|(i, &o)| o == i as u32)
        })
    }

    fn find_pass(&self, stage: RenderStage, ordinal: i32) -> Option<String> {
        if ordinal < 0 {
            return None;
        }
        self.passes
            .iter()
            .find(|(_, slot)| slot.stage == stage && slot.ordinal == ordinal as u32)
            .map(|(name, _)| name.clone())
    }
}
