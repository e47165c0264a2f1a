//! In-process simulation drivers for headless runs and tests.
//!
//! A [`SimScene`] is a scripted list of on-screen elements.  [`SimDevice`]
//! renders the scene into real RGB frames in which every element is painted
//! with a colour that encodes its identity; [`SimDetector`],
//! [`SimTextRecognizer`] and [`SimSelectionProbe`] decode those colours back,
//! so recognition always agrees with the frame that was captured even if the
//! scene has changed since.
//!
//! # Example
//!
//! ```rust
//! use stagehand_hal::sim::{SceneElement, SimRig};
//! use stagehand_hal::{Detector, Device};
//! use stagehand_types::Rect;
//!
//! let rig = SimRig::builder().size(320, 180).build();
//! rig.scene.set(vec![SceneElement::labelled("home_tab", Rect::new(10, 150, 50, 175))]);
//!
//! let frame = rig.device.capture().unwrap().unwrap();
//! let boxes = rig.detector.detect(&frame).unwrap();
//! assert_eq!(boxes[0].label, "home_tab");
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use stagehand_types::{Detection, Frame, OcrLine, Rect, StageError};
use tracing::debug;

use crate::device::Device;
use crate::vision::{Detector, ImageEmbedder, SelectionProbe, TextRecognizer};

const BACKGROUND: [u8; 3] = [24, 24, 24];
const TAG_MARKER: u8 = 0xA5;

// ────────────────────────────────────────────────────────────────────────────
// Scene
// ────────────────────────────────────────────────────────────────────────────

/// One element of a simulated screen.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneElement {
    /// Detector label; `None` for plain text that no model detects.
    pub label: Option<String>,
    pub rect: Rect,
    /// Text an OCR engine reads inside the element.
    pub text: Option<String>,
    /// Whether the element is drawn in its "selected" state.
    pub selected: bool,
}

impl SceneElement {
    /// A detectable element.
    pub fn labelled(label: impl Into<String>, rect: Rect) -> Self {
        Self {
            label: Some(label.into()),
            rect,
            text: None,
            selected: false,
        }
    }

    /// Undetectable text, e.g. the body of a dialog.
    pub fn text(rect: Rect, text: impl Into<String>) -> Self {
        Self {
            label: None,
            rect,
            text: Some(text.into()),
            selected: false,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn selected(mut self) -> Self {
        self.selected = true;
        self
    }
}

#[derive(Default)]
struct SceneState {
    visible: Vec<(u16, SceneElement)>,
    known: HashMap<u16, SceneElement>,
    next_id: u16,
}

impl SceneState {
    fn add(&mut self, element: SceneElement) {
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        let id = self.next_id;
        self.known.insert(id, element.clone());
        self.visible.push((id, element));
    }
}

/// Shared, mutable description of what the simulated window shows.
///
/// Cloning a scene yields another handle to the same elements.
#[derive(Clone)]
pub struct SimScene {
    width: u32,
    height: u32,
    state: Arc<Mutex<SceneState>>,
}

impl SimScene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            state: Arc::new(Mutex::new(SceneState::default())),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Replace every visible element.  Later elements are drawn on top.
    pub fn set(&self, elements: Vec<SceneElement>) {
        let mut state = self.lock();
        state.visible.clear();
        for element in elements {
            state.add(element);
        }
    }

    pub fn push(&self, element: SceneElement) {
        self.lock().add(element);
    }

    /// Remove every visible element carrying `label`; returns how many went.
    pub fn remove_label(&self, label: &str) -> usize {
        let mut state = self.lock();
        let before = state.visible.len();
        state
            .visible
            .retain(|(_, el)| el.label.as_deref() != Some(label));
        before - state.visible.len()
    }

    pub fn elements(&self) -> Vec<SceneElement> {
        self.lock().visible.iter().map(|(_, el)| el.clone()).collect()
    }

    /// Label of the topmost labelled element under `(x, y)`.
    pub fn label_at(&self, x: i32, y: i32) -> Option<String> {
        let state = self.lock();
        state
            .visible
            .iter()
            .rev()
            .filter(|(_, el)| el.rect.contains(&Rect::new(x, y, x, y)))
            .find_map(|(_, el)| el.label.clone())
    }

    /// Topmost element under `(x, y)`, labelled or not.
    pub fn element_at(&self, x: i32, y: i32) -> Option<SceneElement> {
        let state = self.lock();
        state
            .visible
            .iter()
            .rev()
            .find(|(_, el)| el.rect.contains(&Rect::new(x, y, x, y)))
            .map(|(_, el)| el.clone())
    }

    /// Paint the scene into an RGB frame.
    pub fn render(&self) -> Frame {
        let mut frame = Frame::filled(self.width, self.height, BACKGROUND);
        let state = self.lock();
        for (id, el) in &state.visible {
            paint(&mut frame, &el.rect, tag_colour(*id));
        }
        frame
    }

    fn lookup(&self, id: u16) -> Option<SceneElement> {
        self.lock().known.get(&id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SceneState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn tag_colour(id: u16) -> [u8; 3] {
    [(id >> 8) as u8, (id & 0xff) as u8, TAG_MARKER]
}

fn paint(frame: &mut Frame, rect: &Rect, rgb: [u8; 3]) {
    let x1 = rect.x1.clamp(0, frame.width() as i32) as usize;
    let x2 = rect.x2.clamp(0, frame.width() as i32) as usize;
    let y1 = rect.y1.clamp(0, frame.height() as i32) as usize;
    let y2 = rect.y2.clamp(0, frame.height() as i32) as usize;
    let stride = frame.width() as usize * 3;
    let data = frame.data_mut();
    for y in y1..y2 {
        for x in x1..x2 {
            let i = y * stride + x * 3;
            data[i..i + 3].copy_from_slice(&rgb);
        }
    }
}

/// Element tags present in `frame` with their pixel extents, in raster order
/// of first appearance.
fn tags_in(frame: &Frame) -> Vec<(u16, Rect)> {
    let mut order: Vec<u16> = Vec::new();
    let mut extents: HashMap<u16, Rect> = HashMap::new();
    for y in 0..frame.height() {
        for x in 0..frame.width() {
            let Some([hi, lo, marker]) = frame.pixel(x, y) else {
                continue;
            };
            if marker != TAG_MARKER {
                continue;
            }
            let id = u16::from(hi) << 8 | u16::from(lo);
            let (x, y) = (x as i32, y as i32);
            extents
                .entry(id)
                .and_modify(|r| *r = r.union(&Rect::new(x, y, x + 1, y + 1)))
                .or_insert_with(|| {
                    order.push(id);
                    Rect::new(x, y, x + 1, y + 1)
                });
        }
    }
    order
        .into_iter()
        .filter_map(|id| extents.get(&id).map(|r| (id, *r)))
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Stub device
// ────────────────────────────────────────────────────────────────────────────

/// Callback run after every simulated click, used to script screen
/// transitions.
pub type ClickHandler = Box<dyn FnMut(&SimScene, i32, i32) + Send>;

/// A simulated window: captures render the scene, clicks are recorded.
pub struct SimDevice {
    id: String,
    scene: SimScene,
    available: AtomicBool,
    clicks: Mutex<Vec<(i32, i32)>>,
    on_click: Mutex<Option<ClickHandler>>,
}

impl SimDevice {
    pub fn new(id: impl Into<String>, scene: SimScene) -> Self {
        Self {
            id: id.into(),
            scene,
            available: AtomicBool::new(true),
            clicks: Mutex::new(Vec::new()),
            on_click: Mutex::new(None),
        }
    }

    /// While unavailable, `capture` returns `Ok(None)` as a hidden window
    /// would.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn on_click(&self, handler: ClickHandler) {
        *self.on_click.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// Every click delivered so far.
    pub fn clicks(&self) -> Vec<(i32, i32)> {
        self.clicks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Device for SimDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&self) -> Result<Option<Frame>, StageError> {
        if !self.available.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(self.scene.render()))
    }

    fn click(&self, x: i32, y: i32) -> Result<(), StageError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StageError::DeviceFault {
                component: self.id.clone(),
                details: "window is not available".to_string(),
            });
        }
        debug!(device = %self.id, x, y, "sim click");
        self.clicks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((x, y));
        let mut handler = self.on_click.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handler) = handler.as_mut() {
            handler(&self.scene, x, y);
        }
        Ok(())
    }

    fn scroll(&self, x: i32, y: i32, delta: i32) -> Result<(), StageError> {
        debug!(device = %self.id, x, y, delta, "sim scroll");
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub recognisers
// ────────────────────────────────────────────────────────────────────────────

/// Detects the labelled scene elements visible in a rendered frame, in scene
/// order.
pub struct SimDetector {
    scene: SimScene,
}

impl SimDetector {
    pub fn new(scene: SimScene) -> Self {
        Self { scene }
    }
}

impl Detector for SimDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, StageError> {
        let mut ids: Vec<u16> = tags_in(frame).into_iter().map(|(id, _)| id).collect();
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.scene.lookup(id))
            .filter_map(|el| {
                el.label.map(|label| Detection {
                    label,
                    rect: el.rect,
                    confidence: 0.9,
                })
            })
            .collect())
    }
}

/// Reads the text of every scene element visible in a crop, top to bottom.
pub struct SimTextRecognizer {
    scene: SimScene,
}

impl SimTextRecognizer {
    pub fn new(scene: SimScene) -> Self {
        Self { scene }
    }
}

impl TextRecognizer for SimTextRecognizer {
    fn recognize(&self, frame: &Frame) -> Result<Vec<OcrLine>, StageError> {
        Ok(tags_in(frame)
            .into_iter()
            .filter_map(|(id, rect)| {
                let text = self.scene.lookup(id)?.text?;
                Some(OcrLine {
                    rect,
                    text,
                    confidence: 0.95,
                })
            })
            .collect())
    }
}

/// Reports the `selected` flag of the element at the centre of a crop.
pub struct SimSelectionProbe {
    scene: SimScene,
}

impl SimSelectionProbe {
    pub fn new(scene: SimScene) -> Self {
        Self { scene }
    }
}

impl SelectionProbe for SimSelectionProbe {
    fn is_selected(&self, crop: &Frame) -> bool {
        let Some([hi, lo, marker]) = crop.pixel(crop.width() / 2, crop.height() / 2) else {
            return false;
        };
        if marker != TAG_MARKER {
            return false;
        }
        let id = u16::from(hi) << 8 | u16::from(lo);
        self.scene.lookup(id).is_some_and(|el| el.selected)
    }
}

/// Embeds a frame as the mean luminance of a 4×4 grid, L2-normalised.
#[derive(Default)]
pub struct SimEmbedder;

impl ImageEmbedder for SimEmbedder {
    fn embed(&self, frame: &Frame) -> Result<Vec<f32>, StageError> {
        if frame.is_empty() {
            return Err(StageError::InvalidFrame("cannot embed an empty frame".to_string()));
        }
        let mut sums = [0f32; 16];
        let mut counts = [0u32; 16];
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                let cell = ((y * 4 / frame.height()) * 4 + x * 4 / frame.width()) as usize;
                if let Some([r, g, b]) = frame.pixel(x, y) {
                    sums[cell] += 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
                    counts[cell] += 1;
                }
            }
        }
        let mut v: Vec<f32> = sums
            .iter()
            .zip(counts.iter())
            .map(|(s, &c)| if c == 0 { 0.0 } else { s / c as f32 + 1.0 })
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRig builder
// ────────────────────────────────────────────────────────────────────────────

/// A scene with every simulated driver bound to it.
pub struct SimRig {
    pub scene: SimScene,
    pub device: Arc<SimDevice>,
    pub detector: Arc<SimDetector>,
    pub recognizer: Arc<SimTextRecognizer>,
    pub probe: Arc<SimSelectionProbe>,
    pub embedder: Arc<SimEmbedder>,
}

impl SimRig {
    pub fn builder() -> SimRigBuilder {
        SimRigBuilder::default()
    }
}

/// Builder for [`SimRig`].
pub struct SimRigBuilder {
    width: u32,
    height: u32,
    window: String,
}

impl Default for SimRigBuilder {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            window: "sim_window".to_string(),
        }
    }
}

impl SimRigBuilder {
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn window(mut self, name: impl Into<String>) -> Self {
        self.window = name.into();
        self
    }

    pub fn build(self) -> SimRig {
        let scene = SimScene::new(self.width, self.height);
        SimRig {
            device: Arc::new(SimDevice::new(self.window, scene.clone())),
            detector: Arc::new(SimDetector::new(scene.clone())),
            recognizer: Arc::new(SimTextRecognizer::new(scene.clone())),
            probe: Arc::new(SimSelectionProbe::new(scene.clone())),
            embedder: Arc::new(SimEmbedder),
            scene,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig() -> SimRig {
        SimRig::builder().size(200, 100).build()
    }

    #[test]
    fn detector_reports_visible_labels_in_scene_order() {
        let rig = rig();
        rig.scene.set(vec![
            SceneElement::labelled("b_label", Rect::new(100, 10, 120, 20)),
            SceneElement::labelled("a_label", Rect::new(10, 50, 30, 60)),
            SceneElement::text(Rect::new(50, 50, 60, 60), "plain"),
        ]);
        let frame = rig.device.capture().unwrap().unwrap();
        let boxes = rig.detector.detect(&frame).unwrap();
        let labels: Vec<&str> = boxes.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["b_label", "a_label"]);
        assert_eq!(boxes[1].rect, Rect::new(10, 50, 30, 60));
    }

    #[test]
    fn fully_covered_elements_are_not_detected() {
        let rig = rig();
        rig.scene.set(vec![
            SceneElement::labelled("hidden", Rect::new(10, 10, 20, 20)),
            SceneElement::labelled("cover", Rect::new(0, 0, 50, 50)),
        ]);
        let frame = rig.device.capture().unwrap().unwrap();
        let boxes = rig.detector.detect(&frame).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].label, "cover");
    }

    #[test]
    fn recognition_follows_captured_frame_not_current_scene() {
        let rig = rig();
        rig.scene
            .set(vec![SceneElement::labelled("title", Rect::new(0, 0, 40, 10)).with_text("old")]);
        let frame = rig.device.capture().unwrap().unwrap();
        rig.scene
            .set(vec![SceneElement::labelled("title", Rect::new(0, 0, 40, 10)).with_text("new")]);

        let lines = rig.recognizer.recognize(&frame.crop(&Rect::new(0, 0, 40, 10))).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "old");
    }

    #[test]
    fn recognizer_reads_lines_top_to_bottom() {
        let rig = rig();
        rig.scene.set(vec![
            SceneElement::text(Rect::new(0, 40, 100, 50), "second"),
            SceneElement::text(Rect::new(0, 10, 100, 20), "first"),
        ]);
        let frame = rig.device.capture().unwrap().unwrap();
        let lines = rig.recognizer.recognize(&frame).unwrap();
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert!(rig.recognizer.recognize(&Frame::filled(0, 0, [0, 0, 0])).unwrap().is_empty());
    }

    #[test]
    fn selection_reports_the_selected_flag() {
        let rig = rig();
        let on = Rect::new(0, 0, 20, 20);
        let off = Rect::new(30, 0, 50, 20);
        rig.scene.set(vec![
            SceneElement::labelled("tab_a", on).selected(),
            SceneElement::labelled("tab_b", off),
        ]);
        let frame = rig.device.capture().unwrap().unwrap();
        assert!(rig.probe.is_selected(&frame.crop(&on)));
        assert!(!rig.probe.is_selected(&frame.crop(&off)));
        assert!(!rig.probe.is_selected(&frame.crop(&Rect::new(100, 50, 120, 70))));
    }

    #[test]
    fn clicks_are_recorded_and_drive_handler() {
        let rig = rig();
        rig.scene
            .set(vec![SceneElement::labelled("start", Rect::new(0, 0, 20, 20))]);
        rig.device.on_click(Box::new(|scene, x, y| {
            if scene.label_at(x, y).as_deref() == Some("start") {
                scene.set(vec![SceneElement::labelled("loading", Rect::new(0, 0, 10, 10))]);
            }
        }));

        rig.device.click(5, 5).unwrap();
        assert_eq!(rig.device.clicks(), vec![(5, 5)]);
        assert_eq!(rig.scene.label_at(5, 5).as_deref(), Some("loading"));
    }

    #[test]
    fn unavailable_window_yields_no_frame() {
        let rig = rig();
        rig.device.set_available(false);
        assert!(rig.device.capture().unwrap().is_none());
        assert!(matches!(rig.device.click(1, 1), Err(StageError::DeviceFault { .. })));
    }

    #[test]
    fn element_at_sees_unlabelled_text() {
        let rig = rig();
        rig.scene.set(vec![
            SceneElement::labelled("panel", Rect::new(0, 0, 100, 50)),
            SceneElement::text(Rect::new(10, 10, 40, 20), "8時間"),
        ]);
        let hit = rig.scene.element_at(20, 15).unwrap();
        assert_eq!(hit.text.as_deref(), Some("8時間"));
        assert!(hit.label.is_none());
        assert_eq!(rig.scene.label_at(20, 15).as_deref(), Some("panel"));
        assert!(rig.scene.element_at(150, 90).is_none());
    }

    #[test]
    fn remove_label_drops_matching_elements() {
        let rig = rig();
        rig.scene.set(vec![
            SceneElement::labelled("loading1", Rect::new(0, 0, 10, 10)),
            SceneElement::labelled("keep", Rect::new(20, 0, 30, 10)),
        ]);
        assert_eq!(rig.scene.remove_label("loading1"), 1);
        assert_eq!(rig.scene.elements().len(), 1);
    }

    #[test]
    fn embedder_is_normalised_and_distinguishes_frames() {
        let embedder = SimEmbedder;
        let dark = embedder.embed(&Frame::filled(8, 8, [0, 0, 0])).unwrap();
        let norm: f32 = dark.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let mut half = Frame::filled(8, 8, [0, 0, 0]);
        for y in 0..8 {
            for x in 0..4 {
                let i = (y * 8 + x) * 3;
                half.data_mut()[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let other = embedder.embed(&half).unwrap();
        let dot: f32 = dark.iter().zip(other.iter()).map(|(a, b)| a * b).sum();
        assert!(dot < 0.99);
        assert!(embedder.embed(&Frame::filled(0, 0, [0, 0, 0])).is_err());
    }
}
