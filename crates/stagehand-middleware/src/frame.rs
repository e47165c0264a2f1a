//! JPEG frame packets for remote observers.
//!
//! [`FrameStreamer`] sits at the end of every perception cycle: when at least
//! one observer is subscribed and the rate limiter allows it, the frame is
//! optionally annotated with the detected boxes, JPEG encoded and broadcast
//! as a [`FramePacket`].

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use stagehand_types::{Frame, Rect, StageError};
use tracing::{debug, warn};

use crate::bus::EventBus;

const ANNOTATION_RGB: [u8; 3] = [0, 255, 0];
const ANNOTATION_STROKE: i32 = 2;

/// One encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl FramePacket {
    /// Encode `frame` at `quality` (1–100).
    ///
    /// # Errors
    ///
    /// [`StageError::InvalidFrame`] for an empty frame or an encoder failure.
    pub fn encode(frame: &Frame, quality: u8) -> Result<Self, StageError> {
        if frame.is_empty() {
            return Err(StageError::InvalidFrame("cannot encode an empty frame".to_string()));
        }
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
            .encode(frame.data(), frame.width(), frame.height(), ExtendedColorType::Rgb8)
            .map_err(|e| StageError::InvalidFrame(format!("jpeg encoding failed: {e}")))?;
        Ok(Self {
            width: frame.width(),
            height: frame.height(),
            jpeg,
        })
    }

    /// Binary WebSocket message: `"{width},{height},"` followed by the JPEG
    /// bytes.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = format!("{},{},", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.jpeg);
        out
    }
}

/// Copy of `frame` with a rectangle outline drawn around each of `boxes`.
pub fn annotate(frame: &Frame, boxes: &[Rect]) -> Frame {
    let mut out = frame.clone();
    let (w, h) = (frame.width() as i32, frame.height() as i32);
    let mut put = |x: i32, y: i32| {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            let i = (y as usize * frame.width() as usize + x as usize) * 3;
            out.data_mut()[i..i + 3].copy_from_slice(&ANNOTATION_RGB);
        }
    };
    for rect in boxes {
        for t in 0..ANNOTATION_STROKE {
            for x in rect.x1..rect.x2 {
                put(x, rect.y1 + t);
                put(x, rect.y2 - 1 - t);
            }
            for y in rect.y1..rect.y2 {
                put(rect.x1 + t, y);
                put(rect.x2 - 1 - t, y);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Streamer
// ---------------------------------------------------------------------------

/// Rate-limited frame publisher.
pub struct FrameStreamer {
    bus: EventBus,
    limiter: DefaultDirectRateLimiter,
    quality: u8,
    annotate: bool,
}

impl FrameStreamer {
    /// At most `fps` frames per second are encoded; `0` is treated as `1`.
    pub fn new(bus: EventBus, fps: u32, quality: u8, annotate: bool) -> Self {
        let fps = NonZeroU32::new(fps).unwrap_or(NonZeroU32::MIN);
        Self {
            bus,
            limiter: RateLimiter::direct(Quota::per_second(fps)),
            quality,
            annotate,
        }
    }

    /// Offer a frame.  Returns `true` when a packet was published.
    pub fn offer(&self, frame: &Frame, boxes: &[Rect]) -> bool {
        if self.bus.frame_subscribers() == 0 || self.limiter.check().is_err() {
            return false;
        }
        let encoded = if self.annotate && !boxes.is_empty() {
            FramePacket::encode(&annotate(frame, boxes), self.quality)
        } else {
            FramePacket::encode(frame, self.quality)
        };
        match encoded {
            Ok(packet) => {
                let receivers = self.bus.publish_frame(Arc::new(packet));
                debug!(receivers, "frame streamed");
                receivers > 0
            }
            Err(e) => {
                warn!(error = %e, "frame not streamed");
                false
            }
        }
    }
}
