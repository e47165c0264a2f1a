//! `stagehand-middleware` – The Nervous System
//!
//! Routes events and frames between the orchestrator and its observers
//! without caring what they mean.
//!
//! # Modules
//!
//! - [`bus`] – Topic-based publish/subscribe event bus and frame channel
//!   built on Tokio broadcast channels.
//! - [`frame`] – JPEG [`FramePacket`][frame::FramePacket]s, box annotation
//!   and the rate-limited [`FrameStreamer`][frame::FrameStreamer].

pub mod bus;
pub mod frame;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use frame::{FramePacket, FrameStreamer};
