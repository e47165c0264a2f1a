//! Modal dialog parser.
//!
//! A modal is recognised from one `modal_header` box and one or more `button`
//! boxes.  The header crop is read for the title; the region between the
//! header's bottom edge and the buttons is read for the body.

use std::sync::Arc;

use stagehand_hal::TextRecognizer;
use stagehand_types::{Frame, Rect, StageError};
use tracing::debug;

use crate::labels;
use crate::snapshot::{BoundingBox, GroupMode, Snapshot};

/// A parsed dialog.
#[derive(Debug, Clone)]
pub struct Modal {
    pub title: String,
    /// Empty when parsed with `no_body`.
    pub body: String,
    pub confirm_button: Option<Arc<BoundingBox>>,
    pub cancel_button: Option<Arc<BoundingBox>>,
}

/// Parse the modal visible in `snapshot`.
///
/// When the buttons form exactly one row of two or more, the rightmost is the
/// confirm button and the leftmost the cancel button.  Otherwise the lowest
/// button is taken as cancel and there is no confirm button.
///
/// # Errors
///
/// - [`StageError::NotFound`] when there is no header, no button, or the
///   header carries no readable title.
/// - [`StageError::Recognition`] when the text recognizer fails.
pub fn parse_modal(
    snapshot: &Snapshot,
    frame: &Frame,
    ocr: &dyn TextRecognizer,
    no_body: bool,
) -> Result<Modal, StageError> {
    let headers = snapshot.filter_by_label(labels::MODAL_HEADER);
    let buttons = snapshot.filter_by_label(labels::BUTTON);
    if headers.is_empty() {
        return Err(StageError::NotFound("modal header".to_string()));
    }
    if buttons.is_empty() {
        return Err(StageError::NotFound("modal buttons".to_string()));
    }
    let header = Arc::clone(headers.first()?);

    let title = ocr
        .recognize(&header.crop)?
        .into_iter()
        .next()
        .map(|line| line.text)
        .ok_or_else(|| StageError::NotFound("modal title text".to_string()))?;

    let rows = buttons.group_by_position(Some(30), None, GroupMode::Center, 10);
    let (confirm_button, cancel_button) = match rows.as_slice() {
        [row] if row.len() >= 2 => (
            Some(Arc::clone(row.get_x_max_element().first()?)),
            Some(Arc::clone(row.get_x_min_element().first()?)),
        ),
        _ => (None, Some(Arc::clone(buttons.get_y_max_element().first()?))),
    };

    let body = if no_body {
        String::new()
    } else {
        let body_bottom = confirm_button
            .iter()
            .chain(cancel_button.iter())
            .map(|b| b.rect.y1)
            .max()
            .unwrap_or(header.rect.y2);
        let region = Rect::new(header.rect.x1, header.rect.y2, header.rect.x2, body_bottom);
        let crop = frame.crop(&region);
        if crop.is_empty() {
            String::new()
        } else {
            ocr.recognize(&crop)?
                .into_iter()
                .map(|line| line.text)
                .collect::<Vec<_>>()
                .join(" ")
        }
    };

    debug!(title = %title, has_confirm = confirm_button.is_some(), "parsed modal");
    Ok(Modal {
        title,
        body,
        confirm_button,
        cancel_button,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_hal::sim::{SceneElement, SimRig};
    use stagehand_hal::{Detector, Device};

    fn parse(rig: &SimRig, no_body: bool) -> Result<Modal, StageError> {
        let frame = rig.device.capture().unwrap().unwrap();
        let dets = rig.detector.detect(&frame).unwrap();
        let snapshot = Snapshot::from_detections(&frame, &dets);
        parse_modal(&snapshot, &frame, rig.recognizer.as_ref(), no_body)
    }

    fn header() -> SceneElement {
        SceneElement::labelled(labels::MODAL_HEADER, Rect::new(100, 40, 540, 80)).with_text("活動費")
    }

    fn body() -> SceneElement {
        SceneElement::text(Rect::new(100, 80, 540, 250), "活動費を受け取りました")
    }

    #[test]
    fn two_buttons_in_a_row_resolve_confirm_and_cancel() {
        let rig = SimRig::builder().build();
        rig.scene.set(vec![
            header(),
            body(),
            SceneElement::labelled(labels::BUTTON, Rect::new(140, 260, 300, 300)),
            SceneElement::labelled(labels::BUTTON, Rect::new(340, 262, 500, 302)),
        ]);
        let modal = parse(&rig, false).unwrap();
        assert_eq!(modal.title, "活動費");
        assert_eq!(modal.body, "活動費を受け取りました");
        assert_eq!(modal.confirm_button.unwrap().rect.x1, 340);
        assert_eq!(modal.cancel_button.unwrap().rect.x1, 140);
    }

    #[test]
    fn single_button_is_cancel() {
        let rig = SimRig::builder().build();
        rig.scene.set(vec![
            header(),
            SceneElement::labelled(labels::BUTTON, Rect::new(240, 260, 400, 300)),
        ]);
        let modal = parse(&rig, true).unwrap();
        assert!(modal.confirm_button.is_none());
        assert_eq!(modal.cancel_button.unwrap().rect.x1, 240);
        assert!(modal.body.is_empty());
    }

    #[test]
    fn stacked_buttons_fall_back_to_lowest_as_cancel() {
        let rig = SimRig::builder().build();
        rig.scene.set(vec![
            header(),
            SceneElement::labelled(labels::BUTTON, Rect::new(240, 200, 400, 240)),
            SceneElement::labelled(labels::BUTTON, Rect::new(240, 280, 400, 320)),
        ]);
        let modal = parse(&rig, true).unwrap();
        assert!(modal.confirm_button.is_none());
        assert_eq!(modal.cancel_button.unwrap().rect.y2, 320);
    }

    #[test]
    fn missing_header_or_buttons_is_not_found() {
        let rig = SimRig::builder().build();
        rig.scene.set(vec![SceneElement::labelled(
            labels::BUTTON,
            Rect::new(240, 260, 400, 300),
        )]);
        assert!(matches!(parse(&rig, true), Err(StageError::NotFound(_))));

        rig.scene.set(vec![header()]);
        assert!(matches!(parse(&rig, true), Err(StageError::NotFound(_))));
    }

    #[test]
    fn unreadable_title_is_not_found() {
        let rig = SimRig::builder().build();
        rig.scene.set(vec![
            SceneElement::labelled(labels::MODAL_HEADER, Rect::new(100, 40, 540, 80)),
            SceneElement::labelled(labels::BUTTON, Rect::new(240, 260, 400, 300)),
        ]);
        assert!(matches!(parse(&rig, true), Err(StageError::NotFound(_))));
    }
}
