//! Condition-wait primitives for scripted procedures.
//!
//! Every call blocks the procedure's own thread and polls the latest
//! published [`Perception`]; none of them waits for a fresh frame.  Sleeps
//! are capped at the remaining budget, so a wait with timeout `T` and
//! interval `I` always returns within `T + I`.

use std::sync::Arc;
use std::time::Duration;

use stagehand_hal::{Device, TextRecognizer};
use stagehand_kernel::Deadline;
use stagehand_perception::labels;
use stagehand_perception::{BoundingBox, Modal, Perception, PerceptionSlot, parse_modal};
use stagehand_types::StageError;
use tracing::debug;

use crate::streak::Streak;

/// Consecutive misses after which [`Conditions::click_on_label`] gives up.
const CLICK_MISS_LIMIT: usize = 3;

/// Poll and pause durations shared by all waits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitTiming {
    /// Spacing of the confirming re-checks once a label is seen.
    pub recheck: Duration,
    /// Poll interval of [`Conditions::wait_for_loading`].
    pub loading_poll: Duration,
    /// Budget of the navigation helpers (`go_home`, `back_to_previous_page`).
    pub navigation: Duration,
    /// Pause after an action for the UI to settle.
    pub settle: Duration,
}

impl Default for WaitTiming {
    fn default() -> Self {
        Self {
            recheck: Duration::from_millis(300),
            loading_poll: Duration::from_secs(1),
            navigation: Duration::from_secs(3),
            settle: Duration::from_secs(2),
        }
    }
}

/// Waits and clicks bound to one perception slot, device and OCR engine.
#[derive(Clone, Copy)]
pub struct Conditions<'a> {
    slot: &'a PerceptionSlot,
    device: &'a dyn Device,
    ocr: &'a dyn TextRecognizer,
    timing: WaitTiming,
}

impl<'a> Conditions<'a> {
    pub fn new(
        slot: &'a PerceptionSlot,
        device: &'a dyn Device,
        ocr: &'a dyn TextRecognizer,
        timing: WaitTiming,
    ) -> Self {
        Self {
            slot,
            device,
            ocr,
            timing,
        }
    }

    pub fn timing(&self) -> WaitTiming {
        self.timing
    }

    pub fn latest(&self) -> Arc<Perception> {
        self.slot.latest()
    }

    pub fn label_visible(&self, label: &str) -> bool {
        self.slot.latest().snapshot.exists_label(label)
    }

    /// Parse the dialog in the latest perception without waiting.
    pub fn current_modal(&self, no_body: bool) -> Result<Modal, StageError> {
        let p = self.slot.latest();
        parse_modal(&p.snapshot, &p.frame, self.ocr, no_body)
    }

    /// Sleep for the configured settle time.
    pub fn settle(&self) {
        std::thread::sleep(self.timing.settle);
    }

    // ── Clicks ───────────────────────────────────────────────────────────────

    /// Click the centre of a box.
    pub fn click_box(&self, target: &BoundingBox) -> Result<(), StageError> {
        let (x, y) = target.center();
        debug!(label = %target.label, x, y, "click");
        self.device.click(x, y)
    }

    pub fn click_point(&self, x: i32, y: i32) -> Result<(), StageError> {
        self.device.click(x, y)
    }

    /// Click the middle of the latest frame.
    pub fn click_screen_center(&self) -> Result<(), StageError> {
        let p = self.slot.latest();
        self.device
            .click(p.frame.width() as i32 / 2, p.frame.height() as i32 / 2)
    }

    // ── Waits ────────────────────────────────────────────────────────────────

    /// Wait until `label` has been seen on `continuous + 1` consecutive
    /// checks.  Re-checks after a hit are spaced by the short recheck delay;
    /// a miss resets the count and sleeps `interval`.
    ///
    /// # Errors
    ///
    /// [`StageError::Timeout`] once `timeout` has elapsed.
    pub fn wait_for_label(
        &self,
        label: &str,
        timeout: Duration,
        interval: Duration,
        continuous: usize,
    ) -> Result<(), StageError> {
        debug!(label = %label, "waiting for label");
        let deadline = Deadline::after(timeout);
        let mut seen = Streak::new(continuous.saturating_add(1));
        loop {
            let present = self.label_visible(label);
            if seen.record(present) {
                return Ok(());
            }
            if deadline.expired() {
                return Err(StageError::timeout(format!("label {label}"), deadline.elapsed()));
            }
            deadline.sleep(if present { self.timing.recheck } else { interval });
        }
    }

    /// Wait for a dialog whose title contains `title` (any dialog when
    /// `None`).  Dialogs that fail to parse or carry another title are
    /// ignored and polling continues.  `None` on timeout.
    pub fn wait_for_modal(
        &self,
        title: Option<&str>,
        timeout: Duration,
        interval: Duration,
        no_body: bool,
    ) -> Option<Modal> {
        debug!(title = ?title, "waiting for modal");
        let deadline = Deadline::after(timeout);
        loop {
            let p = self.slot.latest();
            if p.snapshot.exists_label(labels::MODAL_HEADER)
                && p.snapshot.exists_label(labels::BUTTON)
            {
                match parse_modal(&p.snapshot, &p.frame, self.ocr, no_body) {
                    Ok(modal) if title.is_none_or(|t| modal.title.contains(t)) => {
                        return Some(modal);
                    }
                    Ok(modal) => debug!(title = %modal.title, "ignoring other modal"),
                    Err(e) => debug!(error = %e, "modal not parsed yet"),
                }
            }
            if deadline.expired() {
                debug!(title = ?title, "modal wait timed out");
                return None;
            }
            deadline.sleep(interval);
        }
    }

    /// Click the first box labelled `label` as soon as one is visible.
    ///
    /// Returns `Ok(false)` after three consecutive misses or on timeout;
    /// device failures are returned as errors.
    pub fn click_on_label(
        &self,
        label: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool, StageError> {
        debug!(label = %label, "waiting to click label");
        let deadline = Deadline::after(timeout);
        let mut misses = Streak::new(CLICK_MISS_LIMIT);
        loop {
            let p = self.slot.latest();
            let matches = p.snapshot.filter_by_label(label);
            if let Some(target) = matches.get(0) {
                self.click_box(target)?;
                return Ok(true);
            }
            if misses.record(true) || deadline.expired() {
                return Ok(false);
            }
            deadline.sleep(interval);
        }
    }

    /// Wait until neither loading spinner is visible.
    ///
    /// # Errors
    ///
    /// [`StageError::Timeout`] when a spinner is still up after `timeout`.
    pub fn wait_for_loading(&self, timeout: Duration) -> Result<(), StageError> {
        let deadline = Deadline::after(timeout);
        loop {
            let loading = {
                let p = self.slot.latest();
                labels::LOADING_LABELS
                    .iter()
                    .any(|l| p.snapshot.exists_label(l))
            };
            if !loading {
                return Ok(());
            }
            debug!("waiting for loading");
            if deadline.expired() {
                return Err(StageError::timeout("loading to finish", deadline.elapsed()));
            }
            deadline.sleep(self.timing.loading_poll);
        }
    }

    /// Read every `button` box and click the first whose text contains
    /// `text`.  `Ok(false)` when none matched before `timeout`.
    pub fn click_button_with_text(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<bool, StageError> {
        let deadline = Deadline::after(timeout);
        loop {
            let p = self.slot.latest();
            for button in p.snapshot.filter_by_label(labels::BUTTON).iter() {
                if button.crop.is_empty() {
                    continue;
                }
                let lines = self.ocr.recognize(&button.crop)?;
                if lines.iter().any(|l| l.text.contains(text)) {
                    self.click_box(button)?;
                    return Ok(true);
                }
            }
            if deadline.expired() {
                return Ok(false);
            }
            deadline.sleep(self.timing.recheck);
        }
    }

    // ── Navigation ───────────────────────────────────────────────────────────

    /// Click the "go home" button.
    ///
    /// # Errors
    ///
    /// [`StageError::Timeout`] when the button cannot be clicked in time.
    pub fn go_home(&self) -> Result<(), StageError> {
        debug!("going home");
        let budget = self.timing.navigation;
        if self.click_on_label(labels::GO_HOME_BTN, budget, Duration::from_secs(1))? {
            Ok(())
        } else {
            Err(StageError::timeout("go home button", budget))
        }
    }

    /// Wait for the back button and click it.
    ///
    /// # Errors
    ///
    /// [`StageError::Timeout`] when the button does not show up in time.
    pub fn back_to_previous_page(&self) -> Result<(), StageError> {
        debug!("going back");
        self.wait_for_label(
            labels::BACK_BTN,
            self.timing.navigation,
            Duration::from_secs(1),
            1,
        )?;
        let p = self.slot.latest();
        let back = p.snapshot.filter_by_label(labels::BACK_BTN);
        match back.get(0) {
            Some(target) => self.click_box(target),
            None => Err(StageError::timeout("back button", self.timing.navigation)),
        }
    }
}
