//! `stagehand-memory` – Visual Recall.
//!
//! Persistent image-similarity memory on a local SQLite substrate.
//!
//! # Modules
//!
//! - [`similarity`] – [`SimilarityStore`][similarity::SimilarityStore]:
//!   namespaced store of image embeddings and JSON payloads; `add` skips
//!   near duplicates, `retrieve` returns the payload of the closest entry
//!   above a similarity threshold.

pub mod similarity;

pub use similarity::{Recalled, SimilarityError, SimilarityStore};
