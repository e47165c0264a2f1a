//! `stagehand-perception` – Screen Understanding
//!
//! Turns raw detector output into the structures scripted procedures reason
//! about.
//!
//! # Modules
//!
//! - [`snapshot`] – [`Snapshot`][snapshot::Snapshot]: immutable, ordered set
//!   of labelled boxes with spatial queries (filters, extremal elements,
//!   row/column grouping, containment).
//! - [`slot`] – [`PerceptionSlot`][slot::PerceptionSlot]: the latest
//!   frame/snapshot pair, swapped atomically by the perception loop.
//! - [`location`] – [`LocationClassifier`][location::LocationClassifier] and
//!   [`LocationCell`][location::LocationCell]: "where am I" classification
//!   and the compare-and-set current location.
//! - [`modal`] – [`parse_modal`][modal::parse_modal]: dialog title, body and
//!   buttons.
//! - [`selection`] – [`ColorRatioProbe`][selection::ColorRatioProbe]: HSV
//!   colour-ratio implementation of the "visually selected" check.
//! - [`labels`] – detector class names.

pub mod labels;
pub mod location;
pub mod modal;
pub mod selection;
pub mod slot;
pub mod snapshot;

pub use location::{LocationCell, LocationClassifier, Transition};
pub use modal::{parse_modal, Modal};
pub use selection::ColorRatioProbe;
pub use slot::{Perception, PerceptionSlot};
pub use snapshot::{BoundingBox, GroupMode, Relation, Snapshot};
