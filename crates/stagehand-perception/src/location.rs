//! Location classifier and the current-location cell.

use std::sync::Mutex;

use stagehand_hal::{SelectionProbe, TextRecognizer};
use stagehand_types::{
    CommunicatePage, ContestPage, HomePage, Location, MainTab,
};
use tracing::{debug, warn};

use crate::labels;
use crate::snapshot::Snapshot;

/// Breadcrumb text → location table used when the main tab bar is hidden.
///
/// Matching is by substring, first entry wins, so entries whose text contains
/// another entry's text must come first.
pub fn default_breadcrumbs() -> Vec<(String, Location)> {
    let table: [(&str, Location); 27] = [
        ("プレゼント", Location::Home(HomePage::Gift)),
        ("ミッションパス", Location::Home(HomePage::MissionPass)),
        ("ミッション", Location::Home(HomePage::Task)),
        ("アイドル実績", Location::Home(HomePage::AchievementIdol)),
        ("プロデューサー実績", Location::Home(HomePage::AchievementProducer)),
        ("その他実績", Location::Home(HomePage::AchievementOther)),
        ("実績", Location::Home(HomePage::Achievement)),
        ("お仕事", Location::Home(HomePage::Work)),
        ("ジュエルショップ", Location::Home(HomePage::ShopGem)),
        ("パックショップ", Location::Home(HomePage::ShopPack)),
        ("パスショップ", Location::Home(HomePage::ShopPass)),
        ("コインガシャ", Location::Home(HomePage::ShopCoinGacha)),
        ("デイリー交換所", Location::Home(HomePage::ShopDailyExchange)),
        ("衣装交換所", Location::Home(HomePage::ShopCostumeExchange)),
        ("アイテム交換所", Location::Home(HomePage::ShopItemExchange)),
        ("チケット交換所", Location::Home(HomePage::ShopTicketExchange)),
        ("ショップ", Location::Home(HomePage::Shop)),
        ("プロデューサー", Location::Home(HomePage::Producer)),
        ("アイドルへの道", Location::Contest(ContestPage::RoadToIdol)),
        ("コンテスト", Location::Contest(ContestPage::Arena)),
        ("初星コミュ", Location::Communicate(CommunicatePage::MainStory)),
        ("アイドルコミュ", Location::Communicate(CommunicatePage::BondStories)),
        ("サポートカード", Location::Communicate(CommunicatePage::SupportCardArchive)),
        ("イベントストーリー", Location::Communicate(CommunicatePage::PastEvents)),
        ("ダウンロード", Location::Downloading),
        ("ガシャ", Location::MainMenu(MainTab::Gacha)),
        ("アイドル一覧", Location::MainMenu(MainTab::Idol)),
    ];
    table
        .into_iter()
        .map(|(text, loc)| (text.to_string(), loc))
        .collect()
}

fn tab_for_label(label: &str) -> Option<MainTab> {
    match label {
        labels::TAB_HOME => Some(MainTab::Home),
        labels::TAB_IDOL => Some(MainTab::Idol),
        labels::TAB_GACHA => Some(MainTab::Gacha),
        labels::TAB_CONTEST => Some(MainTab::Contest),
        labels::TAB_COMMUNICATE => Some(MainTab::Communicate),
        _ => None,
    }
}

/// Maps a snapshot to a [`Location`].
pub struct LocationClassifier {
    breadcrumbs: Vec<(String, Location)>,
}

impl Default for LocationClassifier {
    fn default() -> Self {
        Self::new(default_breadcrumbs())
    }
}

impl LocationClassifier {
    pub fn new(breadcrumbs: Vec<(String, Location)>) -> Self {
        Self { breadcrumbs }
    }

    /// Classify `snapshot`, in priority order: splash screen, loading
    /// spinner, main tab bar (the selected tab), breadcrumb text, unknown.
    pub fn classify(
        &self,
        snapshot: &Snapshot,
        ocr: &dyn TextRecognizer,
        probe: &dyn SelectionProbe,
    ) -> Location {
        if snapshot.exists_label(labels::START_MENU_LOGO) {
            return Location::StartGame;
        }
        if labels::LOADING_LABELS
            .iter()
            .any(|l| snapshot.exists_label(l))
        {
            return Location::Loading;
        }

        if snapshot.exists_all_labels(&labels::MAIN_TABS) {
            return snapshot
                .filter_by_labels(&labels::MAIN_TABS)
                .iter()
                .find(|tab| probe.is_selected(&tab.crop))
                .and_then(|tab| tab_for_label(&tab.label))
                .map(Location::MainMenu)
                .unwrap_or(Location::Unknown);
        }

        if let Ok(crumb) = snapshot.filter_by_label(labels::CURRENT_LOCATION).first() {
            if crumb.crop.is_empty() {
                return Location::Unknown;
            }
            let text = match ocr.recognize(&crumb.crop) {
                Ok(lines) => lines
                    .into_iter()
                    .map(|l| l.text)
                    .collect::<Vec<_>>()
                    .join(" "),
                Err(e) => {
                    warn!(error = %e, "breadcrumb recognition failed");
                    return Location::Unknown;
                }
            };
            debug!(text = %text, "breadcrumb text");
            return self.match_breadcrumb(&text).unwrap_or(Location::Unknown);
        }

        Location::Unknown
    }

    /// First table entry whose text occurs in `text`.
    pub fn match_breadcrumb(&self, text: &str) -> Option<Location> {
        self.breadcrumbs
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, loc)| *loc)
    }
}

/// A change of the stored location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<Location>,
    pub to: Location,
}

/// The current location; `None` until first classified.
#[derive(Default)]
pub struct LocationCell {
    inner: Mutex<Option<Location>>,
}

impl LocationCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Location> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `new` if it differs from the current value.
    ///
    /// Returns the transition when the value changed, `None` when it was
    /// already current.
    pub fn update(&self, new: Location) -> Option<Transition> {
        let mut current = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if *current == Some(new) {
            return None;
        }
        let from = current.replace(new);
        Some(Transition { from, to: new })
    }

    /// Explicit override by a procedure that knows where it navigated to.
    pub fn force(&self, location: Location) -> Option<Transition> {
        self.update(location)
    }

    /// Forget the location so the next cycle reclassifies from scratch.
    pub fn clear(&self) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
