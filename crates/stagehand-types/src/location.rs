//! Navigation state of the automated target.
//!
//! [`Location`] is a closed hierarchy: the five main menu tabs, the pages
//! reachable beneath them, and a handful of transient states.  Every value has
//! a stable upper-case identifier (e.g. `MAIN_MENU__HOME`, `HOME__SHOP__GEM`)
//! used for display, logging, and the wire format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One of the five tabs of the main menu bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MainTab {
    Home,
    Idol,
    Gacha,
    Contest,
    Communicate,
}

impl MainTab {
    pub const ALL: [MainTab; 5] = [
        MainTab::Home,
        MainTab::Idol,
        MainTab::Gacha,
        MainTab::Contest,
        MainTab::Communicate,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            MainTab::Home => "HOME",
            MainTab::Idol => "IDOL",
            MainTab::Gacha => "GACHA",
            MainTab::Contest => "CONTEST",
            MainTab::Communicate => "COMMUNICATE",
        }
    }
}

/// Pages reachable from the home tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HomePage {
    Work,
    Gift,
    Task,
    MissionPass,
    Achievement,
    AchievementIdol,
    AchievementProducer,
    AchievementOther,
    Shop,
    ShopGem,
    ShopPack,
    ShopPass,
    ShopCoinGacha,
    ShopDailyExchange,
    ShopCostumeExchange,
    ShopItemExchange,
    ShopTicketExchange,
    Producer,
}

impl HomePage {
    pub const ALL: [HomePage; 18] = [
        HomePage::Work,
        HomePage::Gift,
        HomePage::Task,
        HomePage::MissionPass,
        HomePage::Achievement,
        HomePage::AchievementIdol,
        HomePage::AchievementProducer,
        HomePage::AchievementOther,
        HomePage::Shop,
        HomePage::ShopGem,
        HomePage::ShopPack,
        HomePage::ShopPass,
        HomePage::ShopCoinGacha,
        HomePage::ShopDailyExchange,
        HomePage::ShopCostumeExchange,
        HomePage::ShopItemExchange,
        HomePage::ShopTicketExchange,
        HomePage::Producer,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            HomePage::Work => "WORK",
            HomePage::Gift => "GIFT",
            HomePage::Task => "TASK",
            HomePage::MissionPass => "MISSION_PASS",
            HomePage::Achievement => "ACHIEVEMENT",
            HomePage::AchievementIdol => "ACHIEVEMENT__IDOL",
            HomePage::AchievementProducer => "ACHIEVEMENT__PRODUCER",
            HomePage::AchievementOther => "ACHIEVEMENT__OTHER",
            HomePage::Shop => "SHOP",
            HomePage::ShopGem => "SHOP__GEM",
            HomePage::ShopPack => "SHOP__PACK",
            HomePage::ShopPass => "SHOP__PASS",
            HomePage::ShopCoinGacha => "SHOP__COIN_GACHA",
            HomePage::ShopDailyExchange => "SHOP__DAILY_EXCHANGE",
            HomePage::ShopCostumeExchange => "SHOP__COSTUME_EXCHANGE",
            HomePage::ShopItemExchange => "SHOP__ITEM_EXCHANGE",
            HomePage::ShopTicketExchange => "SHOP__TICKET_EXCHANGE",
            HomePage::Producer => "PRODUCER",
        }
    }
}

/// Pages reachable from the contest tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContestPage {
    Arena,
    RoadToIdol,
}

impl ContestPage {
    pub const ALL: [ContestPage; 2] = [ContestPage::Arena, ContestPage::RoadToIdol];

    fn as_str(&self) -> &'static str {
        match self {
            ContestPage::Arena => "ARENA",
            ContestPage::RoadToIdol => "THE_ROAD_TO_IDOL",
        }
    }
}

/// Pages reachable from the communicate tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommunicatePage {
    MainStory,
    BondStories,
    SupportCardArchive,
    PastEvents,
}

impl CommunicatePage {
    pub const ALL: [CommunicatePage; 4] = [
        CommunicatePage::MainStory,
        CommunicatePage::BondStories,
        CommunicatePage::SupportCardArchive,
        CommunicatePage::PastEvents,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            CommunicatePage::MainStory => "MAIN_STORY",
            CommunicatePage::BondStories => "BOND_STORIES",
            CommunicatePage::SupportCardArchive => "SUPPORT_CARD_ARCHIVE",
            CommunicatePage::PastEvents => "PAST_EVENTS",
        }
    }
}

/// Discrete "where am I" state derived from a perception snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// The splash / title screen.
    StartGame,
    /// A loading spinner covers the screen.
    Loading,
    /// An asset download is in progress.
    Downloading,
    /// Nothing recognisable is on screen.
    Unknown,
    MainMenu(MainTab),
    Home(HomePage),
    Contest(ContestPage),
    Communicate(CommunicatePage),
}

impl Location {
    /// Every location, in declaration order.
    pub fn all() -> Vec<Location> {
        let mut all = vec![
            Location::StartGame,
            Location::Loading,
            Location::Downloading,
            Location::Unknown,
        ];
        all.extend(MainTab::ALL.into_iter().map(Location::MainMenu));
        all.extend(HomePage::ALL.into_iter().map(Location::Home));
        all.extend(ContestPage::ALL.into_iter().map(Location::Contest));
        all.extend(CommunicatePage::ALL.into_iter().map(Location::Communicate));
        all
    }

    /// `true` for states the target passes through on its own
    /// (splash, loading, downloading).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Location::StartGame | Location::Loading | Location::Downloading
        )
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::StartGame => f.write_str("START_GAME"),
            Location::Loading => f.write_str("LOADING"),
            Location::Downloading => f.write_str("DOWNLOADING"),
            Location::Unknown => f.write_str("UNKNOWN"),
            Location::MainMenu(tab) => write!(f, "MAIN_MENU__{}", tab.as_str()),
            Location::Home(page) => write!(f, "HOME__{}", page.as_str()),
            Location::Contest(page) => write!(f, "CONTEST__{}", page.as_str()),
            Location::Communicate(page) => write!(f, "COMMUNICATE__{}", page.as_str()),
        }
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::all()
            .into_iter()
            .find(|loc| loc.to_string() == s)
            .ok_or_else(|| format!("unknown location '{s}'"))
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
