//! Built-in game procedures and the `init_location` middleware.
//!
//! | Task                  | Timeout | Does |
//! |-----------------------|---------|------|
//! | `start_game`          | 120 s   | Splash → home tab, riding out network-error dialogs |
//! | `collect_expenditure` | 60 s    | Collects the activity allowance from the home tab |
//! | `get_gift`            | 60 s    | Claims every pending gift, then returns home |
//! | `dispatch_work`       | 120 s   | Confirms finished work, sends an idle idol to every empty work slot, then returns home |
//!
//! Every procedure waits on perception through [`Conditions`] and only
//! touches the device through it.

use std::time::Duration;

use stagehand_hal::{SelectionProbe, TextRecognizer};
use stagehand_kernel::{Deadline, TaskOutcome};
use stagehand_perception::{BoundingBox, GroupMode, Modal, Perception, Snapshot, labels};
use stagehand_types::{HomePage, Location, MainTab, Rect, StageError};
use tracing::{debug, info, warn};

use crate::conditions::Conditions;
use crate::orchestrator::{Orchestrator, ProcedureTimeouts};

/// Title of the dialog shown after collecting the allowance.
pub const EXPENDITURE_MODAL_TITLE: &str = "活動費";
/// Title of the dialog listing finished work assignments.
pub const WORK_DONE_MODAL_TITLE: &str = "お仕事完了";
/// Title of the dialog asking to confirm a new work assignment.
pub const WORK_START_MODAL_TITLE: &str = "お仕事開始確認";
/// Caption of the gift page's claim-all button.
pub const GIFT_CLAIM_ALL_TEXT: &str = "一括受取";
/// Badge text on an idol who is already out working.
pub const IDOL_BUSY_TEXT: &str = "お仕事中";
/// Work durations offered by the game, least preferred first.
pub const WORK_DURATIONS: [&str; 3] = ["4時間", "8時間", "12時間"];
/// Title of the dialog shown when the game loses its connection.
pub const NETWORK_ERROR_TITLE: &str = "通信エラー";
/// Body text marking an expired session; the game must be restarted.
const NETWORK_AUTH_MARKER: &str = "認証";

/// Network-error dialogs tolerated before `start_game` gives up.
const NETWORK_RETRY_LIMIT: usize = 3;
/// Upper bound on finished-work dialogs handled in one pass.
const WORK_DIALOG_LIMIT: usize = 10;
/// Work slots on the work page.
const WORK_SLOTS: usize = 2;
/// Largest vertical offset between the centres of slots on one row.
const WORK_ROW_TOLERANCE: i32 = 10;

/// Register every built-in task in execution order.
///
/// # Errors
///
/// [`StageError::DuplicateTask`] when called twice on the same orchestrator.
pub fn register_builtin(orch: &Orchestrator) -> Result<(), StageError> {
    orch.register_task(
        "start_game",
        "Launch from the splash screen to the home tab",
        Duration::from_secs(120),
        start_game,
    )?;
    orch.register_task(
        "collect_expenditure",
        "Collect the activity allowance",
        Duration::from_secs(60),
        collect_expenditure,
    )?;
    orch.register_task(
        "get_gift",
        "Claim every pending gift",
        Duration::from_secs(60),
        get_gift,
    )?;
    orch.register_task(
        "dispatch_work",
        "Confirm finished work and fill empty work slots",
        Duration::from_secs(120),
        dispatch_work,
    )?;
    Ok(())
}

/// Register `init_location`: while the location is unknown, classify the
/// latest perception and start a task run.
pub fn register_builtin_middleware(orch: &Orchestrator) -> Result<(), StageError> {
    orch.register_middleware("init_location", init_location)
}

fn init_location(orch: &Orchestrator) -> Result<(), StageError> {
    if orch.location().is_some() {
        return Ok(());
    }
    let location = orch.refresh_location();
    info!(location = %location, "initial location");
    if !orch.exec_tasks() {
        debug!("task run already active");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// start_game
// ─────────────────────────────────────────────────────────────────────────────

pub fn start_game(orch: &Orchestrator) -> Result<TaskOutcome, StageError> {
    let cond = orch.conditions();
    let t = orch.config().procedures;

    if cond.label_visible(labels::TAB_HOME) {
        debug!("already on the home tab");
        orch.set_location(Location::MainMenu(MainTab::Home));
        return Ok(TaskOutcome::Completed);
    }

    orch.set_location(Location::StartGame);
    click_continue(&cond, t)?;
    handle_network_errors(&cond, t)?;
    reach_home_tab(&cond, t.home_tab)?;

    orch.set_location(Location::MainMenu(MainTab::Home));
    info!("game started");
    Ok(TaskOutcome::Completed)
}

/// Tap through the splash screen and wait out the loading spinner.
fn click_continue(cond: &Conditions<'_>, t: ProcedureTimeouts) -> Result<(), StageError> {
    let poll = cond.timing().recheck;
    cond.wait_for_label(labels::START_MENU_CLICK_CONTINUE_FLAG, t.label, poll, 1)?;
    if !cond.click_on_label(labels::START_MENU_CLICK_CONTINUE_FLAG, t.label, poll)? {
        return Err(StageError::timeout("splash continue flag", t.label));
    }
    cond.settle();
    cond.wait_for_loading(t.loading)
}

/// Dismiss connection-error dialogs.  An expired session is cancelled and
/// the splash screen tapped again; anything else is retried.
fn handle_network_errors(cond: &Conditions<'_>, t: ProcedureTimeouts) -> Result<(), StageError> {
    for attempt in 1..=NETWORK_RETRY_LIMIT {
        let modal = match cond.current_modal(false) {
            Ok(m) if m.title.contains(NETWORK_ERROR_TITLE) => m,
            _ => return Ok(()),
        };
        warn!(attempt, body = %modal.body, "network error dialog");
        if modal.body.contains(NETWORK_AUTH_MARKER) {
            click_either(cond, &modal, false)?;
            cond.settle();
            click_continue(cond, t)?;
        } else {
            click_either(cond, &modal, true)?;
            cond.settle();
            cond.wait_for_loading(t.loading)?;
        }
    }
    match cond.current_modal(true) {
        Ok(m) if m.title.contains(NETWORK_ERROR_TITLE) => Err(StageError::DeviceFault {
            component: "network".to_string(),
            details: format!("still failing after {NETWORK_RETRY_LIMIT} retries"),
        }),
        _ => Ok(()),
    }
}

/// Close banners and skip cut-ins until the home tab shows up.
fn reach_home_tab(cond: &Conditions<'_>, budget: Duration) -> Result<(), StageError> {
    let deadline = Deadline::after(budget);
    loop {
        let p = cond.latest();
        if p.snapshot.exists_label(labels::TAB_HOME) {
            return Ok(());
        }
        if deadline.expired() {
            return Err(StageError::timeout("home tab", deadline.elapsed()));
        }
        let dismiss = [labels::CLOSE_BUTTON, labels::SKIP_BUTTON]
            .into_iter()
            .find_map(|l| p.snapshot.filter_by_label(l).get(0).cloned());
        match dismiss {
            Some(target) => cond.click_box(&target)?,
            None => cond.click_screen_center()?,
        }
        cond.settle();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// collect_expenditure
// ─────────────────────────────────────────────────────────────────────────────

pub fn collect_expenditure(orch: &Orchestrator) -> Result<TaskOutcome, StageError> {
    let cond = orch.conditions();
    let t = orch.config().procedures;
    open_home_tab(&cond, t)?;
    orch.set_location(Location::MainMenu(MainTab::Home));

    let poll = cond.timing().recheck;
    cond.wait_for_label(labels::HOME_GET_EXPENDITURE, t.label, poll, 0)?;
    if !cond.click_on_label(labels::HOME_GET_EXPENDITURE, t.label, poll)? {
        return Err(StageError::timeout("expenditure button", t.label));
    }

    let modal = cond
        .wait_for_modal(Some(EXPENDITURE_MODAL_TITLE), t.modal, poll, true)
        .ok_or_else(|| StageError::timeout("expenditure dialog", t.modal))?;
    click_either(&cond, &modal, false)?;
    cond.settle();
    info!("expenditure collected");
    Ok(TaskOutcome::Completed)
}

// ─────────────────────────────────────────────────────────────────────────────
// get_gift
// ─────────────────────────────────────────────────────────────────────────────

pub fn get_gift(orch: &Orchestrator) -> Result<TaskOutcome, StageError> {
    let cond = orch.conditions();
    let t = orch.config().procedures;
    open_home_tab(&cond, t)?;

    let poll = cond.timing().recheck;
    cond.wait_for_label(labels::HOME_GIFT_BTN, t.label, poll, 0)?;
    if !cond.click_on_label(labels::HOME_GIFT_BTN, t.label, poll)? {
        return Err(StageError::timeout("gift button", t.label));
    }
    orch.set_location(Location::Home(HomePage::Gift));
    cond.settle();
    cond.wait_for_loading(t.loading)?;
    // The claim-all button is always shown, greyed out when there is nothing.
    cond.wait_for_label(labels::BUTTON, t.label, poll, 0)?;

    if cond.label_visible(labels::ITEM) {
        if !cond.click_button_with_text(GIFT_CLAIM_ALL_TEXT, t.label)? {
            return Err(StageError::NotFound(format!("'{GIFT_CLAIM_ALL_TEXT}' button")));
        }
        cond.settle();
        let receipt = cond
            .wait_for_modal(None, t.modal, poll, true)
            .ok_or_else(|| StageError::timeout("gift receipt dialog", t.modal))?;
        click_either(&cond, &receipt, false)?;
        cond.settle();
        info!("gifts claimed");
    } else {
        info!("no gifts to claim");
    }

    return_home(orch, t)?;
    Ok(TaskOutcome::Completed)
}

// ─────────────────────────────────────────────────────────────────────────────
// dispatch_work
// ─────────────────────────────────────────────────────────────────────────────

pub fn dispatch_work(orch: &Orchestrator) -> Result<TaskOutcome, StageError> {
    let cond = orch.conditions();
    let t = orch.config().procedures;
    open_home_tab(&cond, t)?;

    let poll = cond.timing().recheck;
    cond.wait_for_label(labels::HOME_DISPATCH_WORK, t.label, poll, 0)?;
    if !cond.click_on_label(labels::HOME_DISPATCH_WORK, t.label, poll)? {
        return Err(StageError::timeout("dispatch work button", t.label));
    }
    orch.set_location(Location::Unknown);
    cond.settle();
    cond.wait_for_loading(t.loading)?;

    let mut confirmed = 0;
    while confirmed < WORK_DIALOG_LIMIT
        && cond
            .wait_for_label(labels::MODAL_HEADER, t.followup_modal, poll, 0)
            .is_ok()
    {
        let Some(modal) = cond.wait_for_modal(Some(WORK_DONE_MODAL_TITLE), t.modal, poll, true)
        else {
            warn!("unexpected dialog on the work page");
            return Ok(TaskOutcome::Incomplete);
        };
        click_either(&cond, &modal, true)?;
        cond.settle();
        confirmed += 1;
    }
    debug!(confirmed, "work dialogs handled");

    orch.set_location(Location::Home(HomePage::Work));
    cond.wait_for_label(labels::ITEM, t.label, poll, 0)?;
    let unfilled = fill_work_slots(orch, t)?;

    return_home(orch, t)?;
    if unfilled > 0 {
        warn!(unfilled, "work slots left empty");
        return Ok(TaskOutcome::Incomplete);
    }
    Ok(TaskOutcome::Completed)
}

/// Send an idol to every empty slot; returns how many stayed empty.
fn fill_work_slots(orch: &Orchestrator, t: ProcedureTimeouts) -> Result<usize, StageError> {
    let cond = orch.conditions();
    let p = cond.latest();
    let reach = p.frame.width() as i32 / 4;
    let slots = p.snapshot.filter_by_label(labels::ITEM).group_by_position(
        Some(WORK_ROW_TOLERANCE),
        Some(reach),
        GroupMode::Center,
        WORK_ROW_TOLERANCE,
    );
    if slots.len() != WORK_SLOTS {
        return Err(StageError::Precondition(format!(
            "expected {WORK_SLOTS} work slots, found {}",
            slots.len()
        )));
    }

    let mut unfilled = 0;
    for (index, slot) in slots.iter().enumerate() {
        let on_screen = cond.latest();
        let occupied = slot
            .get_vertical_range_elements(&on_screen.snapshot, reach)?
            .exists_label(labels::AVATAR);
        if occupied {
            debug!(slot = index, "work slot busy");
            continue;
        }
        if !dispatch_to_slot(orch, slot, t)? {
            unfilled += 1;
        }
    }
    Ok(unfilled)
}

/// Open the idol list of an empty slot and assign the first idle idol
/// showing the bonus badge.  `Ok(false)` when nobody qualifies.
fn dispatch_to_slot(
    orch: &Orchestrator,
    slot: &Snapshot,
    t: ProcedureTimeouts,
) -> Result<bool, StageError> {
    let cond = orch.conditions();
    let poll = cond.timing().recheck;
    orch.click_group(slot)?;
    cond.settle();
    cond.wait_for_label(labels::BUTTON, t.label, poll, 0)?;

    let p = cond.latest();
    for idol in p.snapshot.filter_by_label(labels::AVATAR).iter() {
        if is_busy(orch.recognizer(), idol)? {
            continue;
        }
        if !has_bonus(orch.probe(), idol) {
            continue;
        }
        assign_idol(orch, idol, t)?;
        cond.wait_for_label(labels::ITEM, t.label, poll, 0)?;
        info!("idol sent to work");
        return Ok(true);
    }

    warn!("no idle idol with a bonus");
    cond.back_to_previous_page()?;
    cond.settle();
    Ok(false)
}

fn is_busy(ocr: &dyn TextRecognizer, idol: &BoundingBox) -> Result<bool, StageError> {
    if idol.crop.is_empty() {
        return Ok(false);
    }
    let lines = ocr.recognize(&idol.crop)?;
    Ok(lines.iter().any(|l| l.text.contains(IDOL_BUSY_TEXT)))
}

/// The bonus badge sits in the top-right quarter of the portrait.
fn has_bonus(probe: &dyn SelectionProbe, idol: &BoundingBox) -> bool {
    let (w, h) = (idol.crop.width() as i32, idol.crop.height() as i32);
    let badge = idol.crop.crop(&Rect::new(w / 2, 0, w, h / 2));
    !badge.is_empty() && probe.is_selected(&badge)
}

/// Pick the idol, take the longest duration and accept the confirmation.
fn assign_idol(
    orch: &Orchestrator,
    idol: &BoundingBox,
    t: ProcedureTimeouts,
) -> Result<(), StageError> {
    let cond = orch.conditions();
    cond.click_box(idol)?;
    cond.settle();
    click_topmost_button(&cond)?;
    cond.settle();

    let (x, y) = pick_duration(&cond, orch.recognizer(), t.label)?;
    cond.click_point(x, y)?;
    cond.settle();
    click_topmost_button(&cond)?;
    cond.settle();

    let modal = cond
        .wait_for_modal(Some(WORK_START_MODAL_TITLE), t.modal, cond.timing().recheck, true)
        .ok_or_else(|| StageError::timeout("work start dialog", t.modal))?;
    click_either(&cond, &modal, true)?;
    cond.settle();
    Ok(())
}

/// Poll the duration picker until one of [`WORK_DURATIONS`] is readable and
/// return the screen position of the longest one.
fn pick_duration(
    cond: &Conditions<'_>,
    ocr: &dyn TextRecognizer,
    budget: Duration,
) -> Result<(i32, i32), StageError> {
    let deadline = Deadline::after(budget);
    loop {
        if let Some(point) = longest_duration(&cond.latest(), ocr)? {
            return Ok(point);
        }
        if deadline.expired() {
            return Err(StageError::NotFound("work duration".to_string()));
        }
        deadline.sleep(cond.timing().recheck);
    }
}

/// Durations are listed between the middle of the screen and the
/// confirm button.
fn longest_duration(
    p: &Perception,
    ocr: &dyn TextRecognizer,
) -> Result<Option<(i32, i32)>, StageError> {
    let (w, h) = (p.frame.width() as i32, p.frame.height() as i32);
    let top = h / 2;
    let bottom = p
        .snapshot
        .filter_by_label(labels::BUTTON)
        .get_y_min_element()
        .get(0)
        .map_or(h, |b| b.rect.y1)
        .clamp(top + 1, h.max(top + 1));
    let region = p.frame.crop(&Rect::new(0, top, w, bottom));
    if region.is_empty() {
        return Ok(None);
    }
    let lines = ocr.recognize(&region)?;
    Ok(WORK_DURATIONS
        .iter()
        .rev()
        .find_map(|d| lines.iter().find(|l| l.text.contains(d)))
        .map(|line| {
            let (x, y) = line.rect.center();
            (x, y + top)
        }))
}

fn click_topmost_button(cond: &Conditions<'_>) -> Result<(), StageError> {
    let p = cond.latest();
    let top = p.snapshot.filter_by_label(labels::BUTTON).get_y_min_element();
    cond.click_box(top.first()?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared steps
// ─────────────────────────────────────────────────────────────────────────────

fn open_home_tab(cond: &Conditions<'_>, t: ProcedureTimeouts) -> Result<(), StageError> {
    if !cond.label_visible(labels::TAB_HOME) {
        return Err(StageError::Precondition("home tab is not visible".to_string()));
    }
    if !cond.click_on_label(labels::TAB_HOME, t.label, cond.timing().recheck)? {
        return Err(StageError::timeout("home tab", t.label));
    }
    cond.settle();
    Ok(())
}

fn return_home(orch: &Orchestrator, t: ProcedureTimeouts) -> Result<(), StageError> {
    let cond = orch.conditions();
    cond.go_home()?;
    cond.settle();
    cond.wait_for_loading(t.loading)?;
    orch.set_location(Location::MainMenu(MainTab::Home));
    Ok(())
}

/// Click the preferred button of `modal`, falling back to the other one.
fn click_either(cond: &Conditions<'_>, modal: &Modal, confirm: bool) -> Result<(), StageError> {
    let (first, second) = if confirm {
        (&modal.confirm_button, &modal.cancel_button)
    } else {
        (&modal.cancel_button, &modal.confirm_button)
    };
    match first.as_ref().or(second.as_ref()) {
        Some(button) => cond.click_box(button),
        None => Err(StageError::NotFound(format!("button on dialog '{}'", modal.title))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use stagehand_hal::sim::{SceneElement, SimRig, SimScene};
    use stagehand_types::{TaskInfo, TaskStatus};

    use crate::conditions::WaitTiming;
    use crate::demo;
    use crate::orchestrator::OrchestratorConfig;

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            frame_interval: Duration::from_millis(5),
            capture_backoff: Duration::from_millis(10),
            timing: WaitTiming {
                recheck: Duration::from_millis(10),
                loading_poll: Duration::from_millis(20),
                navigation: Duration::from_millis(500),
                settle: Duration::from_millis(30),
            },
            procedures: ProcedureTimeouts {
                label: Duration::from_secs(2),
                loading: Duration::from_secs(2),
                modal: Duration::from_secs(2),
                followup_modal: Duration::from_millis(200),
                home_tab: Duration::from_secs(2),
            },
            ..OrchestratorConfig::default()
        }
    }

    fn build(rig: &SimRig) -> Arc<Orchestrator> {
        let orch = Orchestrator::builder()
            .config(test_config())
            .device(rig.device.clone())
            .recognizer(rig.recognizer.clone())
            .probe(rig.probe.clone())
            .model("base_ui", rig.detector.clone())
            .build()
            .unwrap();
        register_builtin(&orch).unwrap();
        orch
    }

    /// Start perception and wait for the first published frame.
    fn running(rig: &SimRig) -> Arc<Orchestrator> {
        let orch = build(rig);
        orch.resume();
        while orch.latest().sequence == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        orch
    }

    /// The scripted game, already past the splash screen.
    fn game_at_home() -> SimRig {
        let rig = SimRig::builder().build();
        demo::install(&rig);
        rig.scene.set(demo::home());
        rig
    }

    fn status_of(list: &[TaskInfo], name: &str) -> TaskStatus {
        list.iter()
            .find(|t| t.name == name)
            .map(|t| t.status)
            .unwrap()
    }

    fn count(rig: &SimRig, label: &str) -> usize {
        rig.scene
            .elements()
            .iter()
            .filter(|e| e.label.as_deref() == Some(label))
            .count()
    }

    #[test]
    fn full_run_from_splash_screen() {
        let rig = SimRig::builder().build();
        demo::install(&rig);
        let orch = build(&rig);
        register_builtin_middleware(&orch).unwrap();

        orch.resume();
        let started = Instant::now();
        while orch.task_list().iter().any(|t| t.end_time.is_none()) {
            assert!(started.elapsed() < Duration::from_secs(30), "run did not finish");
            thread::sleep(Duration::from_millis(20));
        }
        assert!(orch.wait_until_idle(Duration::from_secs(5)));
        orch.pause().unwrap();

        let list = orch.task_list();
        assert_eq!(list.len(), 4);
        for task in &list {
            assert_eq!(task.status, TaskStatus::Success, "task {}", task.name);
        }
        for pair in list.windows(2) {
            assert!(pair[0].end_time.unwrap() <= pair[1].start_time.unwrap());
        }
        assert_eq!(orch.location(), Some(Location::MainMenu(MainTab::Home)));
        assert_eq!(count(&rig, labels::MODAL_HEADER), 0);
        let clicks = rig.device.clicks();
        assert!(clicks.contains(&demo::CLAIM_ALL_POINT));
        assert!(clicks.contains(&demo::IDOL_POINTS[2]));
    }

    #[test]
    fn start_game_is_immediate_on_home() {
        let rig = SimRig::builder().build();
        rig.scene.set(demo::home());
        let orch = running(&rig);

        assert_eq!(start_game(&orch).unwrap(), TaskOutcome::Completed);
        assert!(rig.device.clicks().is_empty());
        assert_eq!(orch.location(), Some(Location::MainMenu(MainTab::Home)));
        orch.pause().unwrap();
    }

    #[test]
    fn home_tasks_require_the_home_tab() {
        let rig = SimRig::builder().build();
        rig.scene.set(demo::splash());
        let orch = running(&rig);

        assert!(matches!(
            collect_expenditure(&orch),
            Err(StageError::Precondition(_))
        ));
        assert!(matches!(get_gift(&orch), Err(StageError::Precondition(_))));
        assert!(matches!(dispatch_work(&orch), Err(StageError::Precondition(_))));
        orch.pause().unwrap();
    }

    #[test]
    fn failed_task_aborts_the_rest_of_the_run() {
        let rig = SimRig::builder().build();
        rig.scene.set(demo::splash());
        let orch = build(&rig);
        orch.set_task_enabled("start_game", false);
        orch.resume();
        while orch.latest().sequence == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(orch.exec_tasks());
        assert!(orch.wait_until_idle(Duration::from_secs(5)));
        orch.pause().unwrap();

        let list = orch.task_list();
        assert_eq!(status_of(&list, "start_game"), TaskStatus::Pending);
        assert_eq!(status_of(&list, "collect_expenditure"), TaskStatus::Failed);
        assert_eq!(status_of(&list, "get_gift"), TaskStatus::Pending);
        assert_eq!(status_of(&list, "dispatch_work"), TaskStatus::Pending);
    }

    #[test]
    fn get_gift_claims_everything() {
        let rig = game_at_home();
        let orch = running(&rig);

        assert_eq!(get_gift(&orch).unwrap(), TaskOutcome::Completed);
        orch.pause().unwrap();

        assert!(rig.device.clicks().contains(&demo::CLAIM_ALL_POINT));
        assert_eq!(count(&rig, labels::MODAL_HEADER), 0);
        assert_eq!(count(&rig, labels::TAB_HOME), 1);
        assert_eq!(orch.location(), Some(Location::MainMenu(MainTab::Home)));
    }

    #[test]
    fn get_gift_without_gifts_goes_straight_home() {
        let rig = SimRig::builder().build();
        rig.scene.set(demo::home());
        rig.device.on_click(Box::new(|scene: &SimScene, x, y| {
            match scene.label_at(x, y).as_deref() {
                Some(labels::HOME_GIFT_BTN) => scene.set(demo::gift_page(false)),
                Some(labels::GO_HOME_BTN) => scene.set(demo::home()),
                _ => {}
            }
        }));
        let orch = running(&rig);

        assert_eq!(get_gift(&orch).unwrap(), TaskOutcome::Completed);
        orch.pause().unwrap();

        assert!(!rig.device.clicks().contains(&demo::CLAIM_ALL_POINT));
        assert_eq!(count(&rig, labels::TAB_HOME), 1);
    }

    #[test]
    fn dispatch_work_fills_the_idle_slot() {
        let rig = game_at_home();
        let orch = running(&rig);

        assert_eq!(dispatch_work(&orch).unwrap(), TaskOutcome::Completed);
        orch.pause().unwrap();

        let clicks = rig.device.clicks();
        // Only the idle idol with the bonus badge is picked, for 12 hours.
        assert!(clicks.contains(&demo::IDOL_POINTS[2]));
        assert!(!clicks.contains(&demo::IDOL_POINTS[0]));
        assert!(!clicks.contains(&demo::IDOL_POINTS[1]));
        assert!(clicks.contains(&(500, 215)));
        // The busy left slot is never opened.
        assert!(!clicks.contains(&(170, 200)));
        assert_eq!(count(&rig, labels::TAB_HOME), 1);
        assert_eq!(orch.location(), Some(Location::MainMenu(MainTab::Home)));
    }

    #[test]
    fn no_qualified_idol_leaves_slot_empty() {
        let rig = SimRig::builder().build();
        rig.scene.set(demo::home());
        let picker = || {
            vec![
                SceneElement::labelled(labels::BACK_BTN, Rect::new(10, 10, 30, 40)),
                SceneElement::labelled(labels::AVATAR, Rect::new(40, 60, 160, 160))
                    .with_text(IDOL_BUSY_TEXT)
                    .selected(),
                SceneElement::labelled(labels::AVATAR, Rect::new(200, 60, 320, 160)),
                SceneElement::labelled(labels::BUTTON, Rect::new(260, 290, 380, 330))
                    .with_text(demo::NEXT_CAPTION),
            ]
        };
        rig.device.on_click(Box::new(move |scene: &SimScene, x, y| {
            match scene.label_at(x, y).as_deref() {
                Some(labels::HOME_DISPATCH_WORK) | Some(labels::BACK_BTN) => {
                    scene.set(demo::work_page(false))
                }
                Some(labels::ITEM) => scene.set(picker()),
                Some(labels::GO_HOME_BTN) => scene.set(demo::home()),
                _ => {}
            }
        }));
        let orch = running(&rig);

        assert_eq!(dispatch_work(&orch).unwrap(), TaskOutcome::Incomplete);
        orch.pause().unwrap();

        let clicks = rig.device.clicks();
        assert!(clicks.contains(&(20, 25)));
        assert!(!clicks.contains(&(320, 310)));
        assert_eq!(count(&rig, labels::TAB_HOME), 1);
    }

    #[test]
    fn work_page_without_two_slots_is_rejected() {
        let rig = SimRig::builder().build();
        rig.scene.set(demo::home());
        rig.device.on_click(Box::new(|scene: &SimScene, x, y| {
            if scene.label_at(x, y).as_deref() == Some(labels::HOME_DISPATCH_WORK) {
                scene.set(vec![
                    SceneElement::labelled(labels::GO_HOME_BTN, Rect::new(560, 10, 630, 50)),
                    SceneElement::labelled(labels::ITEM, Rect::new(40, 100, 300, 300)),
                ]);
            }
        }));
        let orch = running(&rig);

        assert!(matches!(dispatch_work(&orch), Err(StageError::Precondition(_))));
        orch.pause().unwrap();
    }

    #[test]
    fn unexpected_work_dialog_is_incomplete() {
        let rig = SimRig::builder().build();
        rig.scene.set(demo::home());
        rig.device.on_click(Box::new(|scene: &SimScene, x, y| {
            if scene.label_at(x, y).as_deref() == Some(labels::HOME_DISPATCH_WORK) {
                scene.set(demo::dialog("メンテナンス", &[Rect::new(260, 220, 380, 260)]));
            }
        }));
        let orch = Orchestrator::builder()
            .config(OrchestratorConfig {
                procedures: ProcedureTimeouts {
                    modal: Duration::from_millis(150),
                    ..test_config().procedures
                },
                ..test_config()
            })
            .device(rig.device.clone())
            .recognizer(rig.recognizer.clone())
            .probe(rig.probe.clone())
            .model("base_ui", rig.detector.clone())
            .build()
            .unwrap();
        orch.resume();
        while orch.latest().sequence == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(dispatch_work(&orch).unwrap(), TaskOutcome::Incomplete);
        orch.pause().unwrap();
    }

    #[test]
    fn builtin_registration_is_single_shot() {
        let rig = SimRig::builder().build();
        let orch = build(&rig);
        let names: Vec<String> = orch.task_list().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            ["start_game", "collect_expenditure", "get_gift", "dispatch_work"]
        );
        assert!(matches!(
            register_builtin(&orch),
            Err(StageError::DuplicateTask(_))
        ));
        register_builtin_middleware(&orch).unwrap();
        assert!(matches!(
            register_builtin_middleware(&orch),
            Err(StageError::DuplicateMiddleware(_))
        ));
    }
}
