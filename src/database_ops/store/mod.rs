//! Persistence seam for the catalog cache.
//!
//! Every method is one unit of work: implementations apply it in a single
//! transaction (or under a single lock) and roll back on failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::StoreResult;
use super::model::{
    GameRef, GameType, GiftIdEntry, GiftIdRecord, Label, ListingPage, QueueCounts, QueuedRow,
    StoredApp, StoredSub, TimelineFilter, TimelineKind, TimelineRecord, UserHistory,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Primary-row columns written for an app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRow {
    pub app_id: i64,
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
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRow {
    pub sub_id: i64,
    pub released: bool,
    pub removed: bool,
    pub price: i32,
    pub release_date: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRow {
    App(AppRow),
    Sub(SubRow),
}

impl RecordRow {
    pub fn game_ref(&self) -> GameRef {
        match self {
            RecordRow::App(row) => GameRef::app(row.app_id),
            RecordRow::Sub(row) => GameRef::sub(row.sub_id),
        }
    }
}

/// Everything one successful fetch writes, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertSet {
    pub record: RecordRow,
    pub last_update: i64,
    /// Insert-ignore; the first stored name wins.
    pub name: Option<String>,
    pub genres: Vec<Label>,
    pub tags: Vec<Label>,
    /// `(dlc_id, base_app_id)`.
    pub dlc_links: Vec<(i64, i64)>,
    /// `(sub_id, app_id)`.
    pub sub_apps: Vec<(i64, i64)>,
    /// `(bundle_id, app_id)`.
    pub bundle_apps: Vec<(i64, i64)>,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Up to `limit` queued rows of `game_type`, oldest `last_update` first.
    async fn queued(&self, game_type: GameType, limit: usize) -> StoreResult<Vec<QueuedRow>>;

    /// Insert-or-update `queued_for_update = TRUE` for every id.
    async fn enqueue(&self, game_type: GameType, ids: &[i64]) -> StoreResult<u64>;

    /// Bulk clear of `queued_for_update`.
    async fn unqueue(&self, game_type: GameType, ids: &[i64]) -> StoreResult<u64>;

    /// Bulk delete of primary rows.
    async fn remove(&self, game_type: GameType, ids: &[i64]) -> StoreResult<u64>;

    async fn apply_upsert(&self, set: &UpsertSet) -> StoreResult<()>;

    /// Writes only `removed = TRUE, last_update = now, queued_for_update = FALSE`.
    async fn mark_removed(&self, game: GameRef, now: i64) -> StoreResult<()>;

    async fn load_apps(&self, ids: &[i64]) -> StoreResult<Vec<StoredApp>>;

    async fn load_subs(&self, ids: &[i64]) -> StoreResult<Vec<StoredSub>>;

    async fn queue_counts(&self, users_checked_before: i64) -> StoreResult<QueueCounts>;

    /// Marks every timeline entry of `kinds` as not yet observed.
    async fn reset_found(&self, kinds: &[TimelineKind]) -> StoreResult<u64>;

    /// Insert-ignore gift-id mappings from a bulk snapshot.
    async fn seed_gift_ids(&self, entries: &[GiftIdEntry]) -> StoreResult<u64>;

    /// Names, timeline entries and gift ids of one page. `added_date` stamps new
    /// timeline entries that carry no source-provided value.
    async fn apply_listing_page(&self, page: &ListingPage, added_date: i64) -> StoreResult<()>;

    /// Deletes unobserved entries of `kinds` and writes `ledger_keys` at `now`.
    /// Returns the number of deleted entries.
    async fn finalize_listing(
        &self,
        kinds: &[TimelineKind],
        ledger_keys: &[&str],
        now: i64,
    ) -> StoreResult<u64>;

    /// Users whose last check is at or before `checked_before`, oldest first.
    async fn users_due(&self, checked_before: i64, limit: usize) -> StoreResult<Vec<UserHistory>>;

    async fn save_user_histories(&self, histories: &[UserHistory]) -> StoreResult<()>;

    /// Entries of one timeline table, named where a name is stored. Ordered by
    /// id, or newest `added_date` first when `filter.recent` is set.
    async fn load_timeline(
        &self,
        kind: TimelineKind,
        game_type: GameType,
        filter: &TimelineFilter,
    ) -> StoreResult<Vec<TimelineRecord>>;

    /// SteamGifts ids of the requested games, ordered by id.
    async fn load_gift_ids(
        &self,
        game_type: GameType,
        ids: &[i64],
    ) -> StoreResult<Vec<GiftIdRecord>>;

    async fn load_user(&self, steam_id: &str) -> StoreResult<Option<UserHistory>>;

    /// Insert-ignore of an empty history that is due at once. Returns whether
    /// a row was created.
    async fn track_user(&self, steam_id: &str) -> StoreResult<bool>;

    async fn record_timestamp(&self, name: &str, at: i64) -> StoreResult<()>;

    async fn timestamps(&self) -> StoreResult<Vec<(String, i64)>>;
}
