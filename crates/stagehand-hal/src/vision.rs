//! Recognition collaborators: object detection, text recognition, the
//! "visually selected" classifier and image embedding.

use stagehand_types::{Detection, Frame, OcrLine, StageError};

/// An object detector (e.g. a YOLO-family model).
pub trait Detector: Send + Sync {
    /// Detect labelled boxes in `frame`, in the detector's output order.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Inference`] when the model cannot run.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, StageError>;
}

/// A text recognizer (OCR engine).
pub trait TextRecognizer: Send + Sync {
    /// Recognize the lines of text in `frame`, top to bottom.
    ///
    /// An empty frame yields no lines.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Recognition`] when the engine fails.
    fn recognize(&self, frame: &Frame) -> Result<Vec<OcrLine>, StageError>;
}

/// Decides whether a cropped UI element is rendered in its "selected" state.
pub trait SelectionProbe: Send + Sync {
    fn is_selected(&self, crop: &Frame) -> bool;
}

/// Turns an image into a fixed-length embedding vector.
pub trait ImageEmbedder: Send + Sync {
    fn embed(&self, frame: &Frame) -> Result<Vec<f32>, StageError>;
}
