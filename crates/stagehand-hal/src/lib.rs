//! `stagehand-hal` – External Capability Layer
//!
//! Everything stagehand consumes from the outside world is modelled as a
//! trait here, so the orchestration core never depends on a concrete screen
//! grabber, detector runtime, or OCR engine.
//!
//! # Modules
//!
//! - [`device`] – [`Device`][device::Device]: screen capture plus synthetic
//!   input injection (click, scroll) for one target window.
//! - [`vision`] – [`Detector`][vision::Detector],
//!   [`TextRecognizer`][vision::TextRecognizer],
//!   [`SelectionProbe`][vision::SelectionProbe] and
//!   [`ImageEmbedder`][vision::ImageEmbedder]: the recognition collaborators.
//! - [`registry`] – [`ModelRegistry`][registry::ModelRegistry]: named
//!   detection models with one active model that can be switched at runtime.
//! - [`sim`] – a scripted scene plus simulated drivers for headless runs and
//!   tests.

pub mod device;
pub mod registry;
pub mod sim;
pub mod vision;

pub use device::Device;
pub use registry::ModelRegistry;
pub use vision::{Detector, ImageEmbedder, SelectionProbe, TextRecognizer};
