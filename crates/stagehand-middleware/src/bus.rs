//! Topic-based publish/subscribe event bus plus the frame stream channel.
//!
//! Uses [`tokio::sync::broadcast`] channels so that every subscriber receives
//! every message without any single subscriber blocking the others.
//! Publishing is synchronous and never blocks, so the perception loop and
//! procedure threads can publish without an async runtime.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Navigation`] | Location changes, detection model switches |
//! | [`Topic::Tasks`] | Task lifecycle transitions |
//! | [`Topic::SystemAlerts`] | Recoverable faults (middleware panics, capture errors) |
//!
//! Every event is also mirrored onto an "all topics" channel used by remote
//! observers.

use std::sync::Arc;

use stagehand_types::{Event, EventPayload, StageError};
use tokio::sync::broadcast;
use tracing::warn;

use crate::frame::FramePacket;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Frames are large; slow observers should skip ahead rather than buffer.
const FRAME_CAPACITY: usize = 4;

/// Routing lanes of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Navigation,
    Tasks,
    SystemAlerts,
}

impl Topic {
    /// The lane a payload belongs on.
    pub fn of(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::LocationChanged { .. } | EventPayload::ModelSwitched { .. } => {
                Topic::Navigation
            }
            EventPayload::TaskStatusChanged { .. } => Topic::Tasks,
            EventPayload::Alert { .. } => Topic::SystemAlerts,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    all: broadcast::Sender<Event>,
    navigation: broadcast::Sender<Event>,
    tasks: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
    frames: broadcast::Sender<Arc<FramePacket>>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every event channel.
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        let (navigation, _) = broadcast::channel(capacity);
        let (tasks, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        let (frames, _) = broadcast::channel(FRAME_CAPACITY);
        Self {
            all,
            navigation,
            tasks,
            system_alerts,
            frames,
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Publish `event` on `topic` (and the all-topics channel).
    ///
    /// Returns the number of receivers that were handed the event, or
    /// [`StageError::Channel`] when nobody is listening.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, StageError> {
        let mirrored = self.all.send(event.clone()).unwrap_or(0);
        let direct = self.topic_sender(topic).send(event).unwrap_or(0);
        match mirrored + direct {
            0 => Err(StageError::Channel(format!("No subscribers for topic {topic:?}"))),
            n => Ok(n),
        }
    }

    /// Publish `event` on the topic its payload belongs to.
    pub fn publish(&self, event: Event) -> Result<usize, StageError> {
        let topic = Topic::of(&event.payload);
        self.publish_to(topic, event)
    }

    /// Subscribe to a single topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic: Some(topic),
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every topic.
    pub fn subscribe_all(&self) -> TopicReceiver {
        TopicReceiver {
            topic: None,
            receiver: self.all.subscribe(),
        }
    }

    // -----------------------------------------------------------------------
    // Frames
    // -----------------------------------------------------------------------

    /// Hand an encoded frame to every frame subscriber.  Returns the number
    /// of receivers (`0` when nobody watches; not an error).
    pub fn publish_frame(&self, packet: Arc<FramePacket>) -> usize {
        self.frames.send(packet).unwrap_or(0)
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<Arc<FramePacket>> {
        self.frames.subscribe()
    }

    /// Number of live frame subscribers; encoding is skipped when zero.
    pub fn frame_subscribers(&self) -> usize {
        self.frames.receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Navigation => &self.navigation,
            Topic::Tasks => &self.tasks,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to one topic, or to all of them.
pub struct TopicReceiver {
    topic: Option<Topic>,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// Returns `Err(RecvError::Lagged(n))` when `n` events were dropped
    /// because this subscriber fell behind, `Err(RecvError::Closed)` once the
    /// bus is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Like [`recv`][Self::recv] but skips over lag, returning `None` only
    /// once the bus is closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll, for synchronous consumers such as the REPL.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// `None` for an all-topics receiver.
    pub fn topic(&self) -> Option<Topic> {
        self.topic
    }
}
