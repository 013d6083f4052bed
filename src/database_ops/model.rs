use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of catalog entry tracked by the cache. IDs are unique per type only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    App,
    Sub,
    Bundle,
}

impl GameType {
    pub fn as_str(self) -> &'static str {
        match self {
            GameType::App => "app",
            GameType::Sub => "sub",
            GameType::Bundle => "bundle",
        }
    }

    /// Primary table holding the record rows for this type.
    pub fn table(self) -> &'static str {
        match self {
            GameType::App => "games__app",
            GameType::Sub => "games__sub",
            GameType::Bundle => "games__bundle",
        }
    }

    pub fn id_column(self) -> &'static str {
        match self {
            GameType::App => "app_id",
            GameType::Sub => "sub_id",
            GameType::Bundle => "bundle_id",
        }
    }

    pub fn name_table(self) -> &'static str {
        match self {
            GameType::App => "games__app_name",
            GameType::Sub => "games__sub_name",
            GameType::Bundle => "games__bundle_name",
        }
    }

    /// SteamGifts ID mapping table; bundles are not giveaway targets.
    pub fn gift_table(self) -> Option<&'static str> {
        match self {
            GameType::App => Some("games__app_sg"),
            GameType::Sub => Some("games__sub_sg"),
            GameType::Bundle => None,
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "app" | "apps" => Ok(GameType::App),
            "sub" | "subs" | "package" => Ok(GameType::Sub),
            "bundle" | "bundles" => Ok(GameType::Bundle),
            other => Err(format!("unknown game type: {other}")),
        }
    }
}

/// (type, id) pair identifying one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameRef {
    pub game_type: GameType,
    pub id: i64,
}

impl GameRef {
    pub fn app(id: i64) -> Self {
        Self {
            game_type: GameType::App,
            id,
        }
    }

    pub fn sub(id: i64) -> Self {
        Self {
            game_type: GameType::Sub,
            id,
        }
    }
}

impl fmt::Display for GameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.game_type, self.id)
    }
}

/// Dictionary entry (genre or user tag) as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub name: String,
}

/// Everything the detail gateway learned about one app in a single fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDetail {
    pub app_id: i64,
    pub name: String,
    pub released: bool,
    pub removed: bool,
    pub steam_cloud: bool,
    pub trading_cards: bool,
    /// `None` when the store page could not be read as an app page.
    pub learning: Option<bool>,
    pub multiplayer: bool,
    pub singleplayer: bool,
    pub linux: bool,
    pub mac: bool,
    pub windows: bool,
    pub achievements: i32,
    pub price: i32,
    pub metacritic_score: Option<i32>,
    pub metacritic_id: Option<String>,
    pub rating_percentage: Option<i32>,
    pub rating_count: Option<i32>,
    pub release_date: Option<i64>,
    pub genres: Vec<Label>,
    pub tags: Vec<Label>,
    /// Base game when this app is a DLC.
    pub base: Option<i64>,
    pub dlcs: Vec<i64>,
    pub subs: Vec<i64>,
    pub bundles: Vec<i64>,
}

impl AppDetail {
    /// Blank record for an app; callers fill in what the source reported.
    pub fn empty(app_id: i64) -> Self {
        Self {
            app_id,
            name: String::new(),
            released: false,
            removed: false,
            steam_cloud: false,
            trading_cards: false,
            learning: None,
            multiplayer: false,
            singleplayer: false,
            linux: false,
            mac: false,
            windows: false,
            achievements: 0,
            price: 0,
            metacritic_score: None,
            metacritic_id: None,
            rating_percentage: None,
            rating_count: None,
            release_date: None,
            genres: Vec::new(),
            tags: Vec::new(),
            base: None,
            dlcs: Vec::new(),
            subs: Vec::new(),
            bundles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDetail {
    pub sub_id: i64,
    pub name: String,
    pub released: bool,
    pub removed: bool,
    pub price: i32,
    pub release_date: Option<i64>,
    pub apps: Vec<i64>,
}

/// Successful detail fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    App(AppDetail),
    Sub(SubDetail),
}

impl Fetched {
    pub fn game_ref(&self) -> GameRef {
        match self {
            Fetched::App(app) => GameRef::app(app.app_id),
            Fetched::Sub(sub) => GameRef::sub(sub.sub_id),
        }
    }
}

/// Queue row as read by the batch refresh driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedRow {
    pub id: i64,
    pub release_date: Option<i64>,
    pub last_update: i64,
}

/// Stored app row joined with its relationship lists, as served by lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredApp {
    pub app_id: i64,
    pub name: Option<String>,
    pub released: bool,
    pub removed: bool,
    pub steam_cloud: bool,
    pub trading_cards: bool,
    pub learning: Option<bool>,
    pub multiplayer: bool,
    pub singleplayer: bool,
    pub linux: bool,
    pub mac: bool,
    pub windows: bool,
    pub achievements: i32,
    pub price: i32,
    pub metacritic_score: Option<i32>,
    pub metacritic_id: Option<String>,
    pub rating_percentage: Option<i32>,
    pub rating_count: Option<i32>,
    pub release_date: Option<i64>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub base: Option<i64>,
    pub dlcs: Vec<i64>,
    pub subs: Vec<i64>,
    pub bundles: Vec<i64>,
    pub last_update: i64,
    pub queued_for_update: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSub {
    pub sub_id: i64,
    pub name: Option<String>,
    pub released: bool,
    pub removed: bool,
    pub price: i32,
    pub release_date: Option<i64>,
    pub apps: Vec<i64>,
    pub last_update: i64,
    pub queued_for_update: bool,
}

/// SteamGifts value status mirrored per game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimelineKind {
    /// Reduced CV.
    ReducedValue,
    /// No CV.
    NoValue,
}

impl TimelineKind {
    pub const ALL: [TimelineKind; 2] = [TimelineKind::ReducedValue, TimelineKind::NoValue];

    /// Types that can carry a value status upstream. Bundles never do.
    pub const GAME_TYPES: [GameType; 2] = [GameType::App, GameType::Sub];

    pub fn table(self, game_type: GameType) -> Option<&'static str> {
        match (self, game_type) {
            (TimelineKind::ReducedValue, GameType::App) => Some("games__app_rcv"),
            (TimelineKind::ReducedValue, GameType::Sub) => Some("games__sub_rcv"),
            (TimelineKind::NoValue, GameType::App) => Some("games__app_ncv"),
            (TimelineKind::NoValue, GameType::Sub) => Some("games__sub_ncv"),
            (_, GameType::Bundle) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub game: GameRef,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub kind: TimelineKind,
    pub game: GameRef,
    pub effective_date: i64,
    /// Source-provided first-seen time; the job's run start is used otherwise.
    pub added_date: Option<i64>,
    /// Whether an upsert also marks the entry as observed by the current pass.
    pub mark_found: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftIdEntry {
    pub game: GameRef,
    pub gift_id: String,
}

/// One page of a community listing, normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub names: Vec<NameEntry>,
    pub timeline: Vec<TimelineEntry>,
    pub gift_ids: Vec<GiftIdEntry>,
    pub ended: bool,
}

impl ListingPage {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.timeline.is_empty() && self.gift_ids.is_empty()
    }
}

/// Stored timeline row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineRow {
    pub effective_date: i64,
    pub added_date: i64,
    pub found: bool,
}

/// A timeline entry as read back for lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineRecord {
    pub id: i64,
    pub name: Option<String>,
    pub effective_date: i64,
    pub added_date: i64,
}

/// Narrows a timeline read. Empty `ids` reads every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineFilter {
    pub ids: Vec<i64>,
    /// Inclusive lower bound on `effective_date`.
    pub from: Option<i64>,
    /// Exclusive upper bound on `effective_date`.
    pub until: Option<i64>,
    /// Newest `added_date` first, capped at this many rows.
    pub recent: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GiftIdRecord {
    pub id: i64,
    pub sg_id: String,
}

/// Username history of one SteamGifts user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserHistory {
    pub steam_id: String,
    /// Newest first.
    pub usernames: Vec<String>,
    pub last_check: i64,
    pub last_update: i64,
}

impl UserHistory {
    pub const SEPARATOR: &'static str = ", ";

    pub fn parse_usernames(joined: &str) -> Vec<String> {
        joined
            .split(Self::SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    pub fn joined_usernames(&self) -> String {
        self.usernames.join(Self::SEPARATOR)
    }
}

/// Rows waiting for the refresh jobs, as reported by the info endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub apps: i64,
    pub subs: i64,
    pub bundles: i64,
    pub users: i64,
}

/// Well-known timestamp ledger keys.
pub mod ledger {
    pub const GAMES: &str = "games_last_update";
    pub const RCV_FROM_SG: &str = "rcv_last_update_from_sg";
    pub const NCV: &str = "ncv_last_update";
    pub const RCV_FROM_SGTOOLS: &str = "rcv_last_update_from_sgtools";
    pub const SG_IDS: &str = "sgids_last_update";
    pub const USER_HISTORY: &str = "uh_last_update";
}
