//! [`Orchestrator`] – the perception-to-action core.
//!
//! Owns the external drivers and every piece of shared state:
//!
//! - the **perception loop**: a dedicated thread that captures a frame,
//!   runs the active detection model, publishes the resulting
//!   [`Perception`] into the [`PerceptionSlot`], offers the frame to remote
//!   observers, then runs the middleware chain;
//! - the **middleware chain**: named hooks run after every cycle, each one
//!   isolated so an error or panic is logged and reported as an alert;
//! - the current **location**, classified on demand or set by procedures;
//! - the **task queue** whose procedures receive `&Orchestrator` and drive
//!   the device through [`Conditions`].
//!
//! The loop thread only holds a weak reference, so dropping the last
//! `Arc<Orchestrator>` stops it.
//!
//! # Example
//!
//! ```rust
//! use stagehand_hal::sim::SimRig;
//! use stagehand_runtime::Orchestrator;
//!
//! let rig = SimRig::builder().build();
//! let orch = Orchestrator::builder()
//!     .device(rig.device.clone())
//!     .recognizer(rig.recognizer.clone())
//!     .probe(rig.probe.clone())
//!     .model("base_ui", rig.detector.clone())
//!     .build()
//!     .unwrap();
//! assert!(orch.resume());
//! orch.pause().unwrap();
//! assert!(!orch.perception_running());
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use stagehand_hal::{Detector, Device, ImageEmbedder, ModelRegistry, SelectionProbe, TextRecognizer};
use stagehand_kernel::watchdog::panic_message;
use stagehand_kernel::{TaskOutcome, TaskQueue};
use stagehand_memory::{Recalled, SimilarityStore};
use stagehand_middleware::{EventBus, FrameStreamer};
use stagehand_perception::{
    BoundingBox, ColorRatioProbe, LocationCell, LocationClassifier, Perception, PerceptionSlot,
    Snapshot,
};
use stagehand_types::{
    ControlSurface, Event, EventPayload, Frame, Location, Rect, StageError, StatusReport,
    TaskInfo, TaskStatus,
};
use tracing::{debug, error, info, warn};

use crate::conditions::{Conditions, WaitTiming};

const SOURCE: &str = "stagehand-runtime::orchestrator";

/// A hook run after every perception cycle.
pub type Middleware = Arc<dyn Fn(&Orchestrator) -> Result<(), StageError> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Budgets used by the built-in procedures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcedureTimeouts {
    /// Waiting for a screen element to appear.
    pub label: Duration,
    /// Waiting for a loading spinner to clear.
    pub loading: Duration,
    /// Waiting for an expected dialog.
    pub modal: Duration,
    /// Waiting for one more dialog after dismissing one.
    pub followup_modal: Duration,
    /// Getting from the splash screen to the home tab.
    pub home_tab: Duration,
}

impl Default for ProcedureTimeouts {
    fn default() -> Self {
        Self {
            label: Duration::from_secs(30),
            loading: Duration::from_secs(60),
            modal: Duration::from_secs(30),
            followup_modal: Duration::from_secs(10),
            home_tab: Duration::from_secs(30),
        }
    }
}

/// Configuration bundle for [`Orchestrator`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Pause between perception cycles.
    pub frame_interval: Duration,
    /// Pause after a failed capture or detection.
    pub capture_backoff: Duration,
    pub timing: WaitTiming,
    pub procedures: ProcedureTimeouts,
    /// Upper bound on frames streamed to observers per second.
    pub stream_fps: u32,
    pub jpeg_quality: u8,
    /// Draw detected boxes onto streamed frames.
    pub annotate_frames: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(50),
            capture_backoff: Duration::from_millis(500),
            timing: WaitTiming::default(),
            procedures: ProcedureTimeouts::default(),
            stream_fps: 10,
            jpeg_quality: 80,
            annotate_frames: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    device: Option<Arc<dyn Device>>,
    ocr: Option<Arc<dyn TextRecognizer>>,
    probe: Option<Arc<dyn SelectionProbe>>,
    embedder: Option<Arc<dyn ImageEmbedder>>,
    memory: Option<Arc<SimilarityStore>>,
    models: ModelRegistry,
    bus: Option<EventBus>,
    classifier: Option<LocationClassifier>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn device(mut self, device: Arc<dyn Device>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn recognizer(mut self, ocr: Arc<dyn TextRecognizer>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Defaults to [`ColorRatioProbe::default`].
    pub fn probe(mut self, probe: Arc<dyn SelectionProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn ImageEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn memory(mut self, store: Arc<SimilarityStore>) -> Self {
        self.memory = Some(store);
        self
    }

    /// Register a detection model; the first one becomes active.
    pub fn model(mut self, name: impl Into<String>, detector: Arc<dyn Detector>) -> Self {
        self.models.register(name, detector);
        self
    }

    /// Start with `name` active instead of the first registered model.
    pub fn active_model(mut self, name: &str) -> Result<Self, StageError> {
        self.models.activate(name)?;
        Ok(self)
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn classifier(mut self, classifier: LocationClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// # Errors
    ///
    /// [`StageError::Config`] when no device, no text recognizer or no
    /// detection model was supplied.
    pub fn build(self) -> Result<Arc<Orchestrator>, StageError> {
        let device = self
            .device
            .ok_or_else(|| StageError::Config("no capture device configured".to_string()))?;
        let ocr = self
            .ocr
            .ok_or_else(|| StageError::Config("no text recognizer configured".to_string()))?;
        if self.models.active().is_none() {
            return Err(StageError::Config("no detection model registered".to_string()));
        }
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(ColorRatioProbe::default()));
        let bus = self.bus.unwrap_or_default();
        let streamer = FrameStreamer::new(
            bus.clone(),
            self.config.stream_fps,
            self.config.jpeg_quality,
            self.config.annotate_frames,
        );

        let tasks: Arc<TaskQueue<Orchestrator>> = Arc::new(TaskQueue::new());
        let task_bus = bus.clone();
        tasks.set_observer(Arc::new(move |task: &str, status: TaskStatus| {
            let event = Event::new(
                "stagehand-kernel::task_queue",
                EventPayload::TaskStatusChanged {
                    task: task.to_string(),
                    status,
                },
            );
            if let Err(e) = task_bus.publish(event) {
                debug!(error = %e, "task event not delivered");
            }
        }));

        info!(
            device = %device.id(),
            model = ?self.models.active_name(),
            "orchestrator ready"
        );
        Ok(Arc::new_cyclic(|me| Orchestrator {
            config: self.config,
            device,
            ocr,
            probe,
            embedder: self.embedder,
            memory: self.memory,
            models: RwLock::new(self.models),
            slot: PerceptionSlot::new(),
            location: LocationCell::new(),
            classifier: self.classifier.unwrap_or_default(),
            tasks,
            middleware: Mutex::new(Vec::new()),
            bus,
            streamer,
            frames_processed: AtomicU64::new(0),
            perception: Mutex::new(LoopState::default()),
            me: me.clone(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct LoopState {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

/// The perception-to-action core.  Always handled through an `Arc`.
pub struct Orchestrator {
    config: OrchestratorConfig,
    device: Arc<dyn Device>,
    ocr: Arc<dyn TextRecognizer>,
    probe: Arc<dyn SelectionProbe>,
    embedder: Option<Arc<dyn ImageEmbedder>>,
    memory: Option<Arc<SimilarityStore>>,
    models: RwLock<ModelRegistry>,
    slot: PerceptionSlot,
    location: LocationCell,
    classifier: LocationClassifier,
    tasks: Arc<TaskQueue<Orchestrator>>,
    middleware: Mutex<Vec<(String, Middleware)>>,
    bus: EventBus,
    streamer: FrameStreamer,
    frames_processed: AtomicU64,
    perception: Mutex<LoopState>,
    me: Weak<Orchestrator>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn recognizer(&self) -> &dyn TextRecognizer {
        self.ocr.as_ref()
    }

    pub fn probe(&self) -> &dyn SelectionProbe {
        self.probe.as_ref()
    }

    fn loop_state(&self) -> MutexGuard<'_, LoopState> {
        self.perception.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Perception loop ──────────────────────────────────────────────────────

    /// Start the perception loop on a fresh thread.  Returns `false` when it
    /// is already running.
    pub fn resume(&self) -> bool {
        let mut state = self.loop_state();
        if state.handle.is_some() {
            return false;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let weak = self.me.clone();
        let spawned = thread::Builder::new()
            .name("perception".to_string())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    let Some(orch) = weak.upgrade() else { break };
                    let nap = orch.cycle();
                    drop(orch);
                    thread::sleep(nap);
                }
                debug!("perception loop exited");
            });
        match spawned {
            Ok(handle) => {
                state.handle = Some(handle);
                state.stop = stop;
                info!("perception loop started");
                true
            }
            Err(e) => {
                error!(error = %e, "could not spawn perception loop");
                false
            }
        }
    }

    /// Stop the perception loop and wait for the in-flight cycle to finish.
    ///
    /// # Errors
    ///
    /// [`StageError::Precondition`] when called from the loop thread itself
    /// (e.g. from a middleware); the loop keeps running.
    pub fn pause(&self) -> Result<(), StageError> {
        let handle = {
            let mut state = self.loop_state();
            let Some(handle) = state.handle.take() else {
                return Ok(());
            };
            if handle.thread().id() == thread::current().id() {
                state.handle = Some(handle);
                return Err(StageError::Precondition(
                    "the perception loop cannot pause itself".to_string(),
                ));
            }
            state.stop.store(true, Ordering::SeqCst);
            handle
        };
        if handle.join().is_err() {
            warn!("perception loop thread panicked");
        }
        info!("perception loop paused");
        Ok(())
    }

    pub fn perception_running(&self) -> bool {
        self.loop_state().handle.is_some()
    }

    /// Cancel pending tasks and stop the perception loop.
    pub fn shutdown(&self) {
        self.tasks.stop();
        if let Err(e) = self.pause() {
            warn!(error = %e, "shutdown from the perception thread");
        }
    }

    /// One capture → detect → publish → stream → middleware pass.  Returns
    /// how long the loop should sleep afterwards.
    fn cycle(&self) -> Duration {
        let frame = match self.device.capture() {
            Ok(Some(frame)) if !frame.is_empty() => frame,
            Ok(_) => {
                debug!("no frame captured");
                return self.config.capture_backoff;
            }
            Err(e) => {
                warn!(error = %e, "capture failed");
                self.alert("capture", &e.to_string());
                return self.config.capture_backoff;
            }
        };

        let Some(detector) = self.models_read().active() else {
            warn!("no active detection model");
            return self.config.capture_backoff;
        };
        let detections = match detector.detect(&frame) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "detection failed");
                return self.config.capture_backoff;
            }
        };

        let snapshot = Snapshot::from_detections(&frame, &detections);
        let boxes: Vec<Rect> = snapshot.iter().map(|b| b.rect).collect();
        let frame = Arc::new(frame);
        let sequence = self.slot.publish(Arc::clone(&frame), snapshot);
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        debug!(sequence, boxes = boxes.len(), "perception published");

        self.streamer.offer(&frame, &boxes);
        self.run_middleware();
        self.config.frame_interval
    }

    /// Number of perception cycles published so far.
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// The latest frame/snapshot pair.
    pub fn latest(&self) -> Arc<Perception> {
        self.slot.latest()
    }

    pub fn conditions(&self) -> Conditions<'_> {
        Conditions::new(
            &self.slot,
            self.device.as_ref(),
            self.ocr.as_ref(),
            self.config.timing,
        )
    }

    /// Click the centre of one box.
    pub fn click_element(&self, element: &BoundingBox) -> Result<(), StageError> {
        let (x, y) = element.center();
        self.device.click(x, y)
    }

    /// Click the centre of the box enclosing a group.
    ///
    /// # Errors
    ///
    /// [`StageError::EmptySet`] for an empty group.
    pub fn click_group(&self, group: &Snapshot) -> Result<(), StageError> {
        let (x, y) = group.get_col()?;
        self.device.click(x, y)
    }

    // ── Middleware ───────────────────────────────────────────────────────────

    /// Append a hook to the middleware chain.
    ///
    /// # Errors
    ///
    /// [`StageError::DuplicateMiddleware`] when `name` is taken.
    pub fn register_middleware<F>(&self, name: &str, hook: F) -> Result<(), StageError>
    where
        F: Fn(&Orchestrator) -> Result<(), StageError> + Send + Sync + 'static,
    {
        let mut chain = self.middleware.lock().unwrap_or_else(|e| e.into_inner());
        if chain.iter().any(|(n, _)| n == name) {
            return Err(StageError::DuplicateMiddleware(name.to_string()));
        }
        chain.push((name.to_string(), Arc::new(hook)));
        debug!(middleware = %name, "registered middleware");
        Ok(())
    }

    fn run_middleware(&self) {
        let chain: Vec<(String, Middleware)> = self
            .middleware
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (name, hook) in chain {
            match panic::catch_unwind(AssertUnwindSafe(|| hook(self))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(middleware = %name, error = %e, "middleware failed");
                    self.alert(&name, &e.to_string());
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(middleware = %name, panic = %message, "middleware panicked");
                    self.alert(&name, &message);
                }
            }
        }
    }

    // ── Location ─────────────────────────────────────────────────────────────

    /// `None` until the first classification.
    pub fn location(&self) -> Option<Location> {
        self.location.get()
    }

    /// Classify the latest perception and store the result.
    pub fn refresh_location(&self) -> Location {
        let p = self.slot.latest();
        let location = self
            .classifier
            .classify(&p.snapshot, self.ocr.as_ref(), self.probe.as_ref());
        self.set_location(location);
        location
    }

    /// Store `location`, publishing a change event when it differs.
    pub fn set_location(&self, location: Location) {
        if let Some(t) = self.location.force(location) {
            info!(from = ?t.from.map(|l| l.to_string()), to = %t.to, "location changed");
            self.emit(EventPayload::LocationChanged {
                from: t.from,
                to: t.to,
            });
        }
    }

    /// Forget the location so `init_location` classifies again.
    pub fn clear_location(&self) {
        self.location.clear();
    }

    // ── Models ───────────────────────────────────────────────────────────────

    fn models_read(&self) -> std::sync::RwLockReadGuard<'_, ModelRegistry> {
        self.models.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn active_model(&self) -> Option<String> {
        self.models_read().active_name().map(str::to_string)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models_read().names()
    }

    /// Swap the active detection model: pause the loop, swap, resume.
    ///
    /// # Errors
    ///
    /// - [`StageError::UnknownModel`]; the current model stays active.
    /// - [`StageError::Precondition`] when called from the loop thread.
    pub fn switch_model(&self, name: &str) -> Result<(), StageError> {
        if !self.models_read().names().iter().any(|n| n == name) {
            return Err(StageError::UnknownModel(name.to_string()));
        }
        let was_running = self.perception_running();
        if was_running {
            self.pause()?;
        }
        let swapped = self
            .models
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .activate(name);
        if was_running {
            self.resume();
        }
        swapped?;
        info!(model = %name, "detection model switched");
        self.emit(EventPayload::ModelSwitched {
            name: name.to_string(),
        });
        Ok(())
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    /// Register a procedure.
    ///
    /// # Errors
    ///
    /// [`StageError::DuplicateTask`] when `name` is taken.
    pub fn register_task<F>(
        &self,
        name: &str,
        description: &str,
        timeout: Duration,
        procedure: F,
    ) -> Result<(), StageError>
    where
        F: Fn(&Orchestrator) -> Result<TaskOutcome, StageError> + Send + Sync + 'static,
    {
        self.tasks.register(name, description, timeout, procedure)
    }

    /// Admit a run of every enabled task.
    pub fn exec_tasks(&self) -> bool {
        match self.me.upgrade() {
            Some(me) => self.tasks.exec(me),
            None => false,
        }
    }

    pub fn stop_tasks(&self) -> bool {
        self.tasks.stop()
    }

    pub fn tasks_running(&self) -> bool {
        self.tasks.is_running()
    }

    pub fn task_list(&self) -> Vec<TaskInfo> {
        self.tasks.task_list()
    }

    pub fn set_task_enabled(&self, name: &str, enabled: bool) -> bool {
        self.tasks.set_enabled(name, enabled)
    }

    /// Block until the current run finishes or `timeout` elapses.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.tasks.wait_until_idle(timeout)
    }

    // ── Visual memory ────────────────────────────────────────────────────────

    fn recall_parts(&self) -> Result<(&SimilarityStore, &dyn ImageEmbedder), StageError> {
        match (&self.memory, &self.embedder) {
            (Some(store), Some(embedder)) => Ok((store.as_ref(), embedder.as_ref())),
            _ => Err(StageError::Config(
                "similarity memory needs both a store and an image embedder".to_string(),
            )),
        }
    }

    /// Remember `payload` for `image` unless a similar image is stored.
    pub fn remember<P: Serialize + ?Sized>(
        &self,
        namespace: &str,
        image: &Frame,
        payload: &P,
        threshold: f32,
    ) -> Result<bool, StageError> {
        let (store, embedder) = self.recall_parts()?;
        Ok(store.add_image(embedder, namespace, image, payload, threshold)?)
    }

    /// Payload remembered for the most similar stored image.
    pub fn recall<P: DeserializeOwned>(
        &self,
        namespace: &str,
        image: &Frame,
        threshold: f32,
    ) -> Result<Option<Recalled<P>>, StageError> {
        let (store, embedder) = self.recall_parts()?;
        Ok(store.retrieve_image(embedder, namespace, image, threshold)?)
    }

    // ── Events ───────────────────────────────────────────────────────────────

    fn emit(&self, payload: EventPayload) {
        if let Err(e) = self.bus.publish(Event::new(SOURCE, payload)) {
            debug!(error = %e, "event not delivered");
        }
    }

    fn alert(&self, component: &str, message: &str) {
        self.emit(EventPayload::Alert {
            component: component.to_string(),
            message: message.to_string(),
        });
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let state = self.perception.get_mut().unwrap_or_else(|e| e.into_inner());
        state.stop.store(true, Ordering::SeqCst);
    }
}

impl ControlSurface for Orchestrator {
    fn start_tasks(&self) -> bool {
        self.exec_tasks()
    }

    fn stop_tasks(&self) -> bool {
        Orchestrator::stop_tasks(self)
    }

    fn status(&self) -> StatusReport {
        StatusReport {
            perception_running: self.perception_running(),
            tasks_running: self.tasks_running(),
            location: self.location(),
            active_model: self.active_model(),
            frames_processed: self.frames_processed(),
        }
    }

    fn task_list(&self) -> Vec<TaskInfo> {
        Orchestrator::task_list(self)
    }

    fn set_task_enabled(&self, name: &str, enabled: bool) -> bool {
        Orchestrator::set_task_enabled(self, name, enabled)
    }

    fn switch_model(&self, name: &str) -> Result<(), StageError> {
        Orchestrator::switch_model(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use stagehand_hal::sim::{SceneElement, SimDetector, SimRig};
    use stagehand_memory::SimilarityStore;
    use stagehand_middleware::Topic;
    use stagehand_perception::labels;
    use stagehand_types::MainTab;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            frame_interval: Duration::from_millis(5),
            capture_backoff: Duration::from_millis(10),
            ..OrchestratorConfig::default()
        }
    }

    fn build(rig: &SimRig) -> Arc<Orchestrator> {
        Orchestrator::builder()
            .config(fast_config())
            .device(rig.device.clone())
            .recognizer(rig.recognizer.clone())
            .probe(rig.probe.clone())
            .embedder(rig.embedder.clone())
            .model("base_ui", rig.detector.clone())
            .model("producer", Arc::new(SimDetector::new(rig.scene.clone())))
            .build()
            .unwrap()
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let started = Instant::now();
        while !cond() {
            assert!(started.elapsed() < Duration::from_secs(5), "timed out: {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn tab_bar(selected: &str) -> Vec<SceneElement> {
        labels::MAIN_TABS
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let x = 20 + i as i32 * 120;
                let el = SceneElement::labelled(*label, Rect::new(x, 320, x + 100, 355));
                if *label == selected { el.selected() } else { el }
            })
            .collect()
    }

    #[test]
    fn build_requires_device_recognizer_and_model() {
        let rig = SimRig::builder().build();
        let no_model = Orchestrator::builder()
            .device(rig.device.clone())
            .recognizer(rig.recognizer.clone())
            .build();
        assert!(matches!(no_model, Err(StageError::Config(_))));

        let no_device = Orchestrator::builder()
            .recognizer(rig.recognizer.clone())
            .model("base_ui", rig.detector.clone())
            .build();
        assert!(matches!(no_device, Err(StageError::Config(_))));

        let unknown = Orchestrator::builder().active_model("missing");
        assert!(matches!(unknown, Err(StageError::UnknownModel(_))));
    }

    #[test]
    fn loop_publishes_perceptions() {
        let rig = SimRig::builder().build();
        rig.scene.set(vec![SceneElement::labelled("tab_home", Rect::new(10, 10, 50, 50))]);
        let orch = build(&rig);

        assert!(orch.resume());
        assert!(!orch.resume());
        wait_until("first frame", || orch.latest().sequence > 0);
        assert!(orch.latest().snapshot.exists_label("tab_home"));
        orch.pause().unwrap();

        let frozen = orch.frames_processed();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(orch.frames_processed(), frozen);
        assert!(!orch.perception_running());
    }

    #[test]
    fn unavailable_device_backs_off_without_publishing() {
        let rig = SimRig::builder().build();
        rig.device.set_available(false);
        let orch = build(&rig);
        orch.resume();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(orch.latest().sequence, 0);

        rig.device.set_available(true);
        wait_until("recovery", || orch.latest().sequence > 0);
        orch.pause().unwrap();
    }

    #[test]
    fn middleware_runs_in_order_and_survives_failures() {
        let rig = SimRig::builder().build();
        let orch = build(&rig);
        let mut alerts = orch.bus().subscribe_to(Topic::SystemAlerts);
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        orch.register_middleware("first", move |_| {
            log.lock().unwrap().push("first");
            Ok(())
        })
        .unwrap();
        orch.register_middleware("failing", |_| {
            Err(StageError::Precondition("scripted".to_string()))
        })
        .unwrap();
        orch.register_middleware("panicking", |_| panic!("scripted panic")).unwrap();
        let log = Arc::clone(&order);
        orch.register_middleware("last", move |_| {
            log.lock().unwrap().push("last");
            Ok(())
        })
        .unwrap();
        assert!(matches!(
            orch.register_middleware("first", |_| Ok(())),
            Err(StageError::DuplicateMiddleware(_))
        ));

        orch.resume();
        wait_until("two cycles", || order.lock().unwrap().len() >= 4);
        orch.pause().unwrap();

        let seen = order.lock().unwrap().clone();
        assert_eq!(&seen[..2], &["first", "last"]);
        let mut components = Vec::new();
        while let Ok(event) = alerts.try_recv() {
            if let EventPayload::Alert { component, .. } = event.payload {
                components.push(component);
            }
        }
        assert!(components.contains(&"failing".to_string()));
        assert!(components.contains(&"panicking".to_string()));
    }

    #[test]
    fn pause_from_loop_thread_is_refused() {
        let rig = SimRig::builder().build();
        let orch = build(&rig);
        let refused = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&refused);
        orch.register_middleware("self_pause", move |o| {
            if matches!(o.pause(), Err(StageError::Precondition(_))) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();

        orch.resume();
        wait_until("refusal", || refused.load(Ordering::SeqCst) > 0);
        assert!(orch.perception_running());
        orch.pause().unwrap();
    }

    #[test]
    fn switch_model_swaps_and_keeps_loop_running() {
        let rig = SimRig::builder().build();
        let orch = build(&rig);
        let mut nav = orch.bus().subscribe_to(Topic::Navigation);
        orch.resume();

        assert_eq!(orch.active_model().as_deref(), Some("base_ui"));
        orch.switch_model("producer").unwrap();
        assert_eq!(orch.active_model().as_deref(), Some("producer"));
        assert!(orch.perception_running());
        assert!(matches!(
            nav.try_recv().unwrap().payload,
            EventPayload::ModelSwitched { .. }
        ));

        let err = orch.switch_model("missing").unwrap_err();
        assert_eq!(err, StageError::UnknownModel("missing".to_string()));
        assert_eq!(orch.active_model().as_deref(), Some("producer"));
        assert_eq!(orch.model_names(), vec!["base_ui", "producer"]);

        let before = orch.frames_processed();
        wait_until("frames after switch", || orch.frames_processed() > before);
        orch.pause().unwrap();
    }

    #[test]
    fn location_refresh_and_override() {
        let rig = SimRig::builder().build();
        rig.scene.set(tab_bar(labels::TAB_GACHA));
        let orch = build(&rig);
        let mut nav = orch.bus().subscribe_to(Topic::Navigation);
        assert_eq!(orch.location(), None);

        orch.resume();
        wait_until("first frame", || orch.latest().sequence > 0);
        orch.pause().unwrap();

        assert_eq!(orch.refresh_location(), Location::MainMenu(MainTab::Gacha));
        assert_eq!(orch.refresh_location(), Location::MainMenu(MainTab::Gacha));
        orch.set_location(Location::Loading);
        assert_eq!(orch.location(), Some(Location::Loading));

        let mut changes = 0;
        while let Ok(event) = nav.try_recv() {
            if matches!(event.payload, EventPayload::LocationChanged { .. }) {
                changes += 1;
            }
        }
        assert_eq!(changes, 2);

        orch.clear_location();
        assert_eq!(orch.location(), None);
    }

    #[test]
    fn control_surface_reports_status() {
        let rig = SimRig::builder().build();
        let orch = build(&rig);
        orch.register_task("noop", "does nothing", Duration::from_secs(1), |_| {
            Ok(TaskOutcome::Completed)
        })
        .unwrap();
        let surface: Arc<dyn ControlSurface> = orch.clone();

        let status = surface.status();
        assert!(!status.perception_running);
        assert_eq!(status.active_model.as_deref(), Some("base_ui"));
        assert_eq!(status.location, None);

        assert!(surface.set_task_enabled("noop", false));
        assert!(!surface.set_task_enabled("missing", true));
        assert!(!surface.task_list()[0].enabled);
        assert!(surface.start_tasks());
        assert!(orch.wait_until_idle(Duration::from_secs(1)));
        assert_eq!(surface.task_list()[0].status, TaskStatus::Pending);
        assert!(!surface.stop_tasks());
    }

    #[test]
    fn task_events_reach_the_bus() {
        let rig = SimRig::builder().build();
        let orch = build(&rig);
        let mut tasks = orch.bus().subscribe_to(Topic::Tasks);
        orch.register_task("noop", "", Duration::from_secs(1), |_| Ok(TaskOutcome::Completed))
            .unwrap();
        assert!(orch.exec_tasks());
        assert!(orch.wait_until_idle(Duration::from_secs(1)));

        let mut statuses = Vec::new();
        while let Ok(event) = tasks.try_recv() {
            if let EventPayload::TaskStatusChanged { status, .. } = event.payload {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![TaskStatus::Running, TaskStatus::Success]);
    }

    #[test]
    fn visual_memory_requires_store() {
        let rig = SimRig::builder().build();
        let orch = build(&rig);
        let icon = Frame::filled(8, 8, [200, 30, 30]);
        assert!(matches!(
            orch.remember("items", &icon, "drink", 0.97),
            Err(StageError::Config(_))
        ));

        let with_store = Orchestrator::builder()
            .device(rig.device.clone())
            .recognizer(rig.recognizer.clone())
            .embedder(rig.embedder.clone())
            .memory(Arc::new(SimilarityStore::open_in_memory().unwrap()))
            .model("base_ui", rig.detector.clone())
            .build()
            .unwrap();
        assert!(with_store.remember("items", &icon, "drink", 0.97).unwrap());
        let hit = with_store.recall::<String>("items", &icon, 0.9).unwrap().unwrap();
        assert_eq!(hit.payload, "drink");
    }

    #[test]
    fn click_group_targets_enclosing_centre() {
        let rig = SimRig::builder().build();
        rig.scene.set(vec![
            SceneElement::labelled("item", Rect::new(100, 100, 140, 140)),
            SceneElement::labelled("item", Rect::new(160, 100, 200, 140)),
        ]);
        let orch = build(&rig);
        orch.resume();
        wait_until("first frame", || orch.latest().sequence > 0);
        orch.pause().unwrap();

        let items = orch.latest().snapshot.filter_by_label("item");
        orch.click_group(&items).unwrap();
        orch.click_element(items.get(0).unwrap()).unwrap();
        assert!(matches!(
            orch.click_group(&Snapshot::default()),
            Err(StageError::EmptySet(_))
        ));
        assert_eq!(rig.device.clicks(), vec![(150, 120), (120, 120)]);
    }
}
