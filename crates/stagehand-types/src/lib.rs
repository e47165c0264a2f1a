use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod location;

pub use location::{CommunicatePage, ContestPage, HomePage, Location, MainTab};

/// Axis-aligned rectangle in frame pixel coordinates.
///
/// `(x1, y1)` is the top-left corner and `(x2, y2)` the bottom-right corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Integer midpoint of the rectangle.
    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    /// `true` when `other` lies entirely inside `self` (edges inclusive).
    pub fn contains(&self, other: &Rect) -> bool {
        other.x1 >= self.x1 && other.y1 >= self.y1 && other.x2 <= self.x2 && other.y2 <= self.y2
    }

    /// Smallest rectangle enclosing both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }
}

/// A captured RGB24 image.
///
/// The buffer always holds `width * height * 3` bytes; the fields are private
/// so that no frame can be built around a buffer of another length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    /// Row-major RGB bytes.
    data: Vec<u8>,
}

impl Frame {
    /// Wraps a raw RGB24 buffer, rejecting buffers whose length does not
    /// match the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, StageError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(StageError::InvalidFrame(format!(
                "{width}x{height} frame needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame filled with a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major RGB bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel bytes; the length cannot change.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        match self.data.get(i..i + 3)? {
            [r, g, b] => Some([*r, *g, *b]),
            _ => None,
        }
    }

    /// Copies the pixels under `rect`, clamped to the frame bounds.
    ///
    /// A region that falls completely outside the frame yields an empty frame.
    pub fn crop(&self, rect: &Rect) -> Frame {
        let clamp_x = |v: i32| v.clamp(0, self.width as i32) as u32;
        let clamp_y = |v: i32| v.clamp(0, self.height as i32) as u32;
        let (x1, x2) = (clamp_x(rect.x1), clamp_x(rect.x2));
        let (y1, y2) = (clamp_y(rect.y1), clamp_y(rect.y2));
        if x2 <= x1 || y2 <= y1 {
            return Frame {
                width: 0,
                height: 0,
                data: Vec::new(),
            };
        }

        let (w, h) = (x2 - x1, y2 - y1);
        let stride = self.width as usize * 3;
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for row in y1..y2 {
            let start = row as usize * stride + x1 as usize * 3;
            if let Some(line) = self.data.get(start..start + w as usize * 3) {
                data.extend_from_slice(line);
            }
        }
        Frame {
            width: w,
            height: h,
            data,
        }
    }
}

/// One labelled box reported by an object detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub rect: Rect,
    pub confidence: f32,
}

/// One line of text reported by a text recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub rect: Rect,
    pub text: String,
    pub confidence: f32,
}

/// Lifecycle state of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

/// Read-only view of a registered task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub status: TaskStatus,
    pub timeout_ms: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
}

/// Snapshot of the orchestrator state served by the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub perception_running: bool,
    pub tasks_running: bool,
    pub location: Option<Location>,
    pub active_model: Option<String>,
    pub frames_processed: u64,
}

/// Unified event wrapper for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "stagehand-runtime::orchestrator"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// The classified location changed.
    LocationChanged {
        from: Option<Location>,
        to: Location,
    },
    /// A task moved to a new lifecycle state.
    TaskStatusChanged { task: String, status: TaskStatus },
    /// The active detection model was swapped.
    ModelSwitched { name: String },
    /// Something recoverable went wrong (middleware fault, capture failure…).
    Alert { component: String, message: String },
}

/// Remote control operations exposed to operators.
///
/// Implemented by the orchestrator and consumed by the cockpit server and the
/// CLI REPL.
pub trait ControlSurface: Send + Sync {
    /// Admit a task run. `false` when one is already active.
    fn start_tasks(&self) -> bool;
    /// Cancel pending tasks. `false` when no run was active.
    fn stop_tasks(&self) -> bool;
    fn status(&self) -> StatusReport;
    fn task_list(&self) -> Vec<TaskInfo>;
    /// Enable or disable a task by name. `false` when the name is unknown.
    fn set_task_enabled(&self, name: &str, enabled: bool) -> bool;
    /// Swap the active detection model.
    fn switch_model(&self, name: &str) -> Result<(), StageError>;
}

/// Global error type shared by every stagehand crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageError {
    #[error("Timed out after {elapsed_ms} ms waiting for {what}")]
    Timeout { what: String, elapsed_ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Empty element set: {0}")]
    EmptySet(String),

    #[error("Device Fault on {component}: {details}")]
    DeviceFault { component: String, details: String },

    #[error("Inference Error: {0}")]
    Inference(String),

    #[error("Recognition Error: {0}")]
    Recognition(String),

    #[error("Invalid Frame: {0}")]
    InvalidFrame(String),

    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Middleware already registered: {0}")]
    DuplicateMiddleware(String),

    #[error("Unknown detection model: {0}")]
    UnknownModel(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl StageError {
    pub fn timeout(what: impl Into<String>, elapsed: std::time::Duration) -> Self {
        StageError::Timeout {
            what: what.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}
