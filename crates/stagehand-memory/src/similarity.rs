//! Image Similarity Store.
//!
//! Remembers payloads keyed by the embedding of a screen region (an item
//! icon, a card) and recalls the payload of the closest stored image.  Entries
//! are grouped into namespaces so unrelated catalogues never match each other.
//!
//! # Storage layout
//!
//! | column     | type    | description                                 |
//! |------------|---------|---------------------------------------------|
//! | id         | INTEGER | row id                                      |
//! | namespace  | TEXT    | catalogue name, e.g. `"items"`              |
//! | created_at | TEXT    | RFC-3339 insertion time (UTC)               |
//! | payload    | TEXT    | JSON document                               |
//! | embedding  | BLOB    | Little-endian f32 vector (4 × N bytes)      |
//!
//! # Example
//!
//! ```rust
//! use stagehand_memory::similarity::SimilarityStore;
//!
//! let store = SimilarityStore::open_in_memory().unwrap();
//! assert!(store.add("items", &[0.0, 1.0], &"stamina drink", 0.97).unwrap());
//! // A near duplicate is not stored twice.
//! assert!(!store.add("items", &[0.0, 1.0], &"stamina drink", 0.97).unwrap());
//!
//! let hit = store.retrieve::<String>("items", &[0.05, 1.0], 0.9).unwrap().unwrap();
//! assert_eq!(hit.payload, "stamina drink");
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use stagehand_hal::ImageEmbedder;
use stagehand_types::{Frame, StageError};
use thiserror::Error;
use tracing::debug;

/// Default similarity a stored image must exceed to be recalled.
pub const DEFAULT_RETRIEVE_THRESHOLD: f32 = 0.9;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Embedding failed: {0}")]
    Embedding(#[from] StageError),
    #[error("Embedding vectors must be non-empty")]
    EmptyEmbedding,
}

impl From<SimilarityError> for StageError {
    fn from(e: SimilarityError) -> Self {
        StageError::Storage(e.to_string())
    }
}

/// Best match returned by [`SimilarityStore::retrieve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Recalled<P> {
    pub payload: P,
    pub similarity: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity of two vectors; `0.0` when either has zero norm or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimilarityStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed, namespaced embedding → payload store.
///
/// The connection sits behind a mutex so one store can be shared by every
/// procedure thread.
pub struct SimilarityStore {
    conn: Mutex<Connection>,
}

impl SimilarityStore {
    /// Open (or create) a persistent database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SimilarityError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, SimilarityError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SimilarityError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS similarity_memories (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace  TEXT NOT NULL,
                created_at TEXT NOT NULL,
                payload    TEXT NOT NULL,
                embedding  BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS similarity_memories_ns
                ON similarity_memories (namespace);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn embeddings(
        conn: &Connection,
        namespace: &str,
    ) -> Result<Vec<(String, Vec<f32>)>, SimilarityError> {
        let mut stmt = conn.prepare(
            "SELECT payload, embedding FROM similarity_memories
             WHERE namespace = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![namespace], |row| {
            let payload: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((payload, bytes_to_embedding(&blob)))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Store `payload` under `embedding` unless an entry of the namespace is
    /// already more similar than `threshold`.
    ///
    /// Returns `true` when a new entry was written.
    pub fn add<P: Serialize + ?Sized>(
        &self,
        namespace: &str,
        embedding: &[f32],
        payload: &P,
        threshold: f32,
    ) -> Result<bool, SimilarityError> {
        if embedding.is_empty() {
            return Err(SimilarityError::EmptyEmbedding);
        }
        let conn = self.conn();
        let duplicate = Self::embeddings(&conn, namespace)?
            .iter()
            .map(|(_, stored)| cosine_similarity(stored, embedding))
            .find(|s| *s > threshold);
        if let Some(similarity) = duplicate {
            debug!(namespace, similarity, "similar entry already stored");
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO similarity_memories (namespace, created_at, payload, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                namespace,
                Utc::now().to_rfc3339(),
                serde_json::to_string(payload)?,
                embedding_to_bytes(embedding),
            ],
        )?;
        debug!(namespace, "stored new entry");
        Ok(true)
    }

    /// Payload of the most similar entry, if its similarity exceeds
    /// `threshold`.
    pub fn retrieve<P: DeserializeOwned>(
        &self,
        namespace: &str,
        embedding: &[f32],
        threshold: f32,
    ) -> Result<Option<Recalled<P>>, SimilarityError> {
        if embedding.is_empty() {
            return Err(SimilarityError::EmptyEmbedding);
        }
        let conn = self.conn();
        let best = Self::embeddings(&conn, namespace)?
            .into_iter()
            .map(|(payload, stored)| (cosine_similarity(&stored, embedding), payload))
            .fold(None::<(f32, String)>, |best, (score, payload)| match best {
                Some((top, _)) if top >= score => best,
                _ => Some((score, payload)),
            });

        match best {
            Some((similarity, payload)) if similarity > threshold => Ok(Some(Recalled {
                payload: serde_json::from_str(&payload)?,
                similarity,
            })),
            _ => Ok(None),
        }
    }

    /// [`add`][Self::add] keyed by the embedding of `image`.
    pub fn add_image<P: Serialize + ?Sized>(
        &self,
        embedder: &dyn ImageEmbedder,
        namespace: &str,
        image: &Frame,
        payload: &P,
        threshold: f32,
    ) -> Result<bool, SimilarityError> {
        let embedding = embedder.embed(image)?;
        self.add(namespace, &embedding, payload, threshold)
    }

    /// [`retrieve`][Self::retrieve] keyed by the embedding of `image`.
    pub fn retrieve_image<P: DeserializeOwned>(
        &self,
        embedder: &dyn ImageEmbedder,
        namespace: &str,
        image: &Frame,
        threshold: f32,
    ) -> Result<Option<Recalled<P>>, SimilarityError> {
        let embedding = embedder.embed(image)?;
        self.retrieve(namespace, &embedding, threshold)
    }

    /// Number of entries stored in `namespace`.
    pub fn len(&self, namespace: &str) -> Result<usize, SimilarityError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM similarity_memories WHERE namespace = ?1",
            params![namespace],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
