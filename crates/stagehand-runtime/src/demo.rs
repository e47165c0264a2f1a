//! Scripted game for the simulated window.
//!
//! [`install`] shows the splash screen and scripts every screen the built-in
//! procedures walk through:
//!
//! - splash → home tab, and the go-home button from any page
//! - the allowance dialog
//! - the gift page, its claim-all button and the receipt dialog
//! - the work page: a finished-work dialog, two work slots (one busy), the
//!   idol picker, the duration picker and the start confirmation
//!
//! Buttons without a scripted caption close whatever dialog is open.

use stagehand_hal::sim::{SceneElement, SimRig, SimScene};
use stagehand_perception::labels;
use stagehand_types::Rect;

use crate::procedures::{
    EXPENDITURE_MODAL_TITLE, GIFT_CLAIM_ALL_TEXT, IDOL_BUSY_TEXT, WORK_DONE_MODAL_TITLE,
    WORK_DURATIONS, WORK_START_MODAL_TITLE,
};

/// Title of the dialog shown after claiming gifts.
pub const GIFT_RECEIPT_TITLE: &str = "受取完了";
/// Caption of the idol picker's confirm button.
pub const NEXT_CAPTION: &str = "次へ";
/// Caption of the duration picker's confirm button.
pub const DECIDE_CAPTION: &str = "決定";
/// Caption of the start confirmation's accept button.
pub const START_CAPTION: &str = "開始";
/// Caption of the start confirmation's decline button.
pub const DECLINE_CAPTION: &str = "やめる";

/// Centre of the claim-all button on the gift page.
pub const CLAIM_ALL_POINT: (i32, i32) = (320, 310);
/// Centres of the three idols on the picker: busy, idle, idle with bonus.
pub const IDOL_POINTS: [(i32, i32); 3] = [(100, 110), (260, 110), (420, 110)];

#[derive(Default)]
struct Progress {
    duration: Option<String>,
    slot_filled: bool,
}

/// Show the splash screen and script the transitions.
pub fn install(rig: &SimRig) {
    rig.scene.set(splash());
    let mut progress = Progress::default();
    rig.device.on_click(Box::new(move |scene: &SimScene, x, y| {
        let Some(hit) = scene.element_at(x, y) else {
            return;
        };
        let caption = hit.text.clone().unwrap_or_default();
        match hit.label.as_deref() {
            Some(labels::START_MENU_CLICK_CONTINUE_FLAG) | Some(labels::GO_HOME_BTN) => {
                scene.set(home())
            }
            Some(labels::HOME_GET_EXPENDITURE) => {
                let mut next = home();
                next.extend(dialog(EXPENDITURE_MODAL_TITLE, &[Rect::new(260, 220, 380, 260)]));
                scene.set(next);
            }
            Some(labels::HOME_GIFT_BTN) => scene.set(gift_page(true)),
            Some(labels::HOME_DISPATCH_WORK) => {
                progress.slot_filled = false;
                let mut next = work_page(false);
                next.extend(dialog(
                    WORK_DONE_MODAL_TITLE,
                    &[Rect::new(180, 220, 300, 260), Rect::new(340, 220, 460, 260)],
                ));
                scene.set(next);
            }
            Some(labels::ITEM) if !progress.slot_filled => scene.set(idol_picker()),
            Some(labels::BACK_BTN) => scene.set(work_page(progress.slot_filled)),
            Some(labels::BUTTON) => match caption.as_str() {
                GIFT_CLAIM_ALL_TEXT => scene.set(gift_receipt()),
                NEXT_CAPTION => scene.set(duration_picker()),
                DECIDE_CAPTION if progress.duration.is_some() => scene.set(start_confirmation()),
                START_CAPTION => {
                    progress.duration = None;
                    progress.slot_filled = true;
                    scene.set(work_page(true));
                }
                DECLINE_CAPTION => {
                    progress.duration = None;
                    scene.set(work_page(false));
                }
                "" => {
                    scene.remove_label(labels::MODAL_HEADER);
                    scene.remove_label(labels::BUTTON);
                }
                _ => {}
            },
            None if WORK_DURATIONS.contains(&caption.as_str()) => {
                progress.duration = Some(caption);
            }
            _ => {}
        }
    }));
}

pub fn splash() -> Vec<SceneElement> {
    vec![
        SceneElement::labelled(labels::START_MENU_LOGO, Rect::new(220, 40, 420, 140)),
        SceneElement::labelled(
            labels::START_MENU_CLICK_CONTINUE_FLAG,
            Rect::new(260, 280, 380, 310),
        ),
    ]
}

/// The home tab with its three shortcut buttons.
pub fn home() -> Vec<SceneElement> {
    let mut scene: Vec<SceneElement> = labels::MAIN_TABS
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let x = 20 + i as i32 * 120;
            let tab = SceneElement::labelled(*label, Rect::new(x, 320, x + 100, 355));
            if *label == labels::TAB_HOME { tab.selected() } else { tab }
        })
        .collect();
    scene.push(SceneElement::labelled(labels::HOME_DISPATCH_WORK, Rect::new(20, 20, 100, 60)));
    scene.push(SceneElement::labelled(
        labels::HOME_GET_EXPENDITURE,
        Rect::new(540, 20, 620, 60),
    ));
    scene.push(SceneElement::labelled(labels::HOME_GIFT_BTN, Rect::new(540, 80, 620, 120)));
    scene
}

/// A dialog with a readable title and uncaptioned buttons.
pub fn dialog(title: &str, buttons: &[Rect]) -> Vec<SceneElement> {
    let mut elements = vec![
        SceneElement::labelled(labels::MODAL_HEADER, Rect::new(140, 80, 500, 120))
            .with_text(title),
    ];
    elements.extend(buttons.iter().map(|r| SceneElement::labelled(labels::BUTTON, *r)));
    elements
}

fn captioned(caption: &str, rect: Rect) -> SceneElement {
    SceneElement::labelled(labels::BUTTON, rect).with_text(caption)
}

/// The gift page, with or without pending gifts.
pub fn gift_page(with_gifts: bool) -> Vec<SceneElement> {
    let mut scene = vec![SceneElement::labelled(labels::GO_HOME_BTN, Rect::new(560, 10, 630, 50))];
    if with_gifts {
        scene.push(SceneElement::labelled(labels::ITEM, Rect::new(40, 70, 520, 120)));
        scene.push(SceneElement::labelled(labels::ITEM, Rect::new(40, 130, 520, 180)));
    }
    let (x, y) = CLAIM_ALL_POINT;
    scene.push(captioned(GIFT_CLAIM_ALL_TEXT, Rect::new(x - 80, y - 20, x + 80, y + 20)));
    scene
}

fn gift_receipt() -> Vec<SceneElement> {
    let mut scene = vec![SceneElement::labelled(labels::GO_HOME_BTN, Rect::new(560, 10, 630, 50))];
    scene.extend(dialog(GIFT_RECEIPT_TITLE, &[Rect::new(260, 220, 380, 260)]));
    scene
}

/// Two work slots side by side; the left one is always busy.
pub fn work_page(right_slot_filled: bool) -> Vec<SceneElement> {
    let mut scene = vec![
        SceneElement::labelled(labels::GO_HOME_BTN, Rect::new(560, 10, 630, 50)),
        SceneElement::labelled(labels::ITEM, Rect::new(40, 100, 300, 300)),
        SceneElement::labelled(labels::ITEM, Rect::new(340, 100, 600, 300)),
        SceneElement::labelled(labels::AVATAR, Rect::new(120, 150, 220, 250)),
    ];
    if right_slot_filled {
        scene.push(SceneElement::labelled(labels::AVATAR, Rect::new(420, 150, 520, 250)));
    }
    scene
}

/// Idols in picker order: one already working, one idle, one idle and
/// showing the bonus badge.
pub fn idol_picker() -> Vec<SceneElement> {
    let idol = |(x, y): (i32, i32)| {
        SceneElement::labelled(labels::AVATAR, Rect::new(x - 60, y - 50, x + 60, y + 50))
    };
    vec![
        SceneElement::labelled(labels::BACK_BTN, Rect::new(10, 10, 30, 40)),
        idol(IDOL_POINTS[0]).with_text(IDOL_BUSY_TEXT).selected(),
        idol(IDOL_POINTS[1]),
        idol(IDOL_POINTS[2]).selected(),
        captioned(NEXT_CAPTION, Rect::new(260, 290, 380, 330)),
    ]
}

fn duration_picker() -> Vec<SceneElement> {
    let mut scene = vec![SceneElement::labelled(labels::BACK_BTN, Rect::new(10, 10, 30, 40))];
    for (i, duration) in WORK_DURATIONS.iter().enumerate() {
        let x = 80 + i as i32 * 180;
        scene.push(SceneElement::text(Rect::new(x, 200, x + 120, 230), *duration));
    }
    scene.push(captioned(DECIDE_CAPTION, Rect::new(260, 290, 380, 330)));
    scene
}

fn start_confirmation() -> Vec<SceneElement> {
    vec![
        SceneElement::labelled(labels::MODAL_HEADER, Rect::new(140, 80, 500, 120))
            .with_text(WORK_START_MODAL_TITLE),
        captioned(DECLINE_CAPTION, Rect::new(180, 220, 300, 260)),
        captioned(START_CAPTION, Rect::new(340, 220, 460, 260)),
    ]
}
