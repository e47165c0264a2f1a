//! Detector class names of the base UI model.

pub const START_MENU_LOGO: &str = "start_menu_logo";
pub const GENERAL_LOADING1: &str = "general_loading1";
pub const GENERAL_LOADING2: &str = "general_loading2";
pub const LOADING_LABELS: [&str; 2] = [GENERAL_LOADING1, GENERAL_LOADING2];

pub const TAB_HOME: &str = "tab_home";
pub const TAB_IDOL: &str = "tab_idol";
pub const TAB_GACHA: &str = "tab_gacha";
pub const TAB_CONTEST: &str = "tab_contest";
pub const TAB_COMMUNICATE: &str = "tab_communicate";
pub const MAIN_TABS: [&str; 5] = [TAB_COMMUNICATE, TAB_IDOL, TAB_HOME, TAB_GACHA, TAB_CONTEST];

pub const CURRENT_LOCATION: &str = "current_location";
pub const MODAL_HEADER: &str = "modal_header";
pub const BUTTON: &str = "button";
pub const BACK_BTN: &str = "back_btn";
pub const GO_HOME_BTN: &str = "go_home_btn";
pub const SKIP_BUTTON: &str = "skip_button";
pub const CLOSE_BUTTON: &str = "close_button";
pub const ITEM: &str = "item";
pub const AVATAR: &str = "avatar";

pub const HOME_GIFT_BTN: &str = "home_gift_btn";
pub const HOME_DISPATCH_WORK: &str = "home_dispatch_work";
pub const HOME_GET_EXPENDITURE: &str = "home_get_expenditure";
pub const START_MENU_CLICK_CONTINUE_FLAG: &str = "start_menu_click_continue_flag";
