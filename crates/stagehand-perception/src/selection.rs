//! Colour-ratio "selected" classifier.
//!
//! A UI element counts as selected when enough of its pixels fall inside an
//! HSV range (OpenCV scale: H 0–179, S and V 0–255).

use stagehand_hal::SelectionProbe;
use stagehand_types::Frame;

/// Inclusive HSV bounds on the OpenCV scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }
}

/// Converts one RGB pixel to HSV on the OpenCV scale.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| f32::from(c) / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue_deg = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let sat = if max == 0.0 { 0.0 } else { delta / max };

    [
        (hue_deg / 360.0 * 179.0).round() as u8,
        (sat * 255.0).round() as u8,
        (max * 255.0).round() as u8,
    ]
}

/// [`SelectionProbe`] that thresholds the share of in-range pixels.
#[derive(Debug, Clone)]
pub struct ColorRatioProbe {
    range: HsvRange,
    min_ratio: f32,
}

impl Default for ColorRatioProbe {
    /// The orange highlight drawn under the active main menu tab.
    fn default() -> Self {
        Self::new(
            HsvRange {
                lower: [5, 120, 150],
                upper: [25, 255, 255],
            },
            0.15,
        )
    }
}

impl ColorRatioProbe {
    pub fn new(range: HsvRange, min_ratio: f32) -> Self {
        Self { range, min_ratio }
    }

    /// Share of pixels of `crop` inside the range; `0.0` for an empty crop.
    pub fn ratio(&self, crop: &Frame) -> f32 {
        if crop.is_empty() {
            return 0.0;
        }
        let hits = crop
            .data()
            .chunks_exact(3)
            .filter(|px| self.range.contains(rgb_to_hsv([px[0], px[1], px[2]])))
            .count();
        hits as f32 / (crop.width() as f32 * crop.height() as f32)
    }
}

impl SelectionProbe for ColorRatioProbe {
    fn is_selected(&self, crop: &Frame) -> bool {
        self.ratio(crop) >= self.min_ratio
    }
}
