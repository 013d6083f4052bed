//! In-memory `CacheStore` used by tests and dry runs.
//!
//! All state sits behind one lock, so each trait call is atomic. Ordered maps
//! keep snapshots comparable with `==`.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AppRow, CacheStore, RecordRow, SubRow, UpsertSet};
use crate::database_ops::error::{StoreError, StoreResult};
use crate::database_ops::model::{
    GameRef, GameType, GiftIdEntry, GiftIdRecord, ListingPage, QueueCounts, QueuedRow, StoredApp,
    StoredSub, TimelineFilter, TimelineKind, TimelineRecord, TimelineRow, UserHistory,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored<R> {
    pub row: R,
    pub last_update: i64,
    pub queued_for_update: bool,
}

impl<R> Stored<R> {
    fn placeholder(row: R) -> Self {
        Self {
            row,
            last_update: 0,
            queued_for_update: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    pub apps: BTreeMap<i64, Stored<AppRow>>,
    pub subs: BTreeMap<i64, Stored<SubRow>>,
    pub bundles: BTreeMap<i64, Stored<()>>,
    pub names: BTreeMap<GameRef, String>,
    pub genres: BTreeMap<i64, String>,
    pub tags: BTreeMap<i64, String>,
    pub app_genres: BTreeSet<(i64, i64)>,
    pub app_tags: BTreeSet<(i64, i64)>,
    /// dlc_id -> base app_id
    pub dlcs: BTreeMap<i64, i64>,
    pub sub_apps: BTreeSet<(i64, i64)>,
    pub bundle_apps: BTreeSet<(i64, i64)>,
    pub timelines: BTreeMap<(TimelineKind, GameRef), TimelineRow>,
    pub gift_ids: BTreeMap<GameRef, String>,
    pub users: BTreeMap<String, UserHistory>,
    pub timestamps: BTreeMap<String, i64>,
}

impl MemoryState {
    fn queue_flags(&self, game_type: GameType) -> Vec<(i64, Option<i64>, i64, bool)> {
        match game_type {
            GameType::App => self
                .apps
                .values()
                .map(|s| (s.row.app_id, s.row.release_date, s.last_update, s.queued_for_update))
                .collect(),
            GameType::Sub => self
                .subs
                .values()
                .map(|s| (s.row.sub_id, s.row.release_date, s.last_update, s.queued_for_update))
                .collect(),
            GameType::Bundle => self
                .bundles
                .iter()
                .map(|(id, s)| (*id, None, s.last_update, s.queued_for_update))
                .collect(),
        }
    }

    fn set_queued(&mut self, game_type: GameType, id: i64, queued: bool, create: bool) -> bool {
        macro_rules! flip {
            ($map:expr, $row:expr) => {{
                if create {
                    $map.entry(id).or_insert_with(|| Stored::placeholder($row));
                }
                match $map.get_mut(&id) {
                    Some(stored) => {
                        stored.queued_for_update = queued;
                        true
                    }
                    None => false,
                }
            }};
        }
        match game_type {
            GameType::App => flip!(
                self.apps,
                AppRow {
                    app_id: id,
                    ..AppRow::default()
                }
            ),
            GameType::Sub => flip!(
                self.subs,
                SubRow {
                    sub_id: id,
                    ..SubRow::default()
                }
            ),
            GameType::Bundle => flip!(self.bundles, ()),
        }
    }

    fn related<F>(&self, set: &BTreeSet<(i64, i64)>, pick: F) -> Vec<i64>
    where
        F: Fn(&(i64, i64)) -> Option<i64>,
    {
        set.iter().filter_map(pick).collect()
    }
}

/// `CacheStore` over a shared in-process state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    poisoned: Arc<RwLock<BTreeSet<GameRef>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.read().await.clone()
    }

    /// Mutates state directly, for seeding fixtures.
    pub async fn with_state<F>(&self, f: F)
    where
        F: FnOnce(&mut MemoryState),
    {
        let mut state = self.state.write().await;
        f(&mut *state);
    }

    /// Makes every later upsert of `game` fail with a backend error.
    pub async fn poison(&self, game: GameRef) {
        self.poisoned.write().await.insert(game);
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn queued(&self, game_type: GameType, limit: usize) -> StoreResult<Vec<QueuedRow>> {
        let state = self.state.read().await;
        let mut rows: Vec<QueuedRow> = state
            .queue_flags(game_type)
            .into_iter()
            .filter(|(_, _, _, queued)| *queued)
            .map(|(id, release_date, last_update, _)| QueuedRow {
                id,
                release_date,
                last_update,
            })
            .collect();
        crate::database_ops::staleness::queue_order(&mut rows);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn enqueue(&self, game_type: GameType, ids: &[i64]) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut touched = 0;
        for id in ids {
            if state.set_queued(game_type, *id, true, true) {
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn unqueue(&self, game_type: GameType, ids: &[i64]) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut touched = 0;
        for id in ids {
            if state.set_queued(game_type, *id, false, false) {
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn remove(&self, game_type: GameType, ids: &[i64]) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut removed = 0;
        for id in ids {
            let hit = match game_type {
                GameType::App => state.apps.remove(id).is_some(),
                GameType::Sub => state.subs.remove(id).is_some(),
                GameType::Bundle => state.bundles.remove(id).is_some(),
            };
            if hit {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn apply_upsert(&self, set: &UpsertSet) -> StoreResult<()> {
        let game = set.record.game_ref();
        if self.poisoned.read().await.contains(&game) {
            return Err(StoreError::Backend(format!("write rejected for {game}")));
        }
        let mut state = self.state.write().await;
        match &set.record {
            RecordRow::App(row) => {
                state.apps.insert(
                    row.app_id,
                    Stored {
                        row: row.clone(),
                        last_update: set.last_update,
                        queued_for_update: false,
                    },
                );
            }
            RecordRow::Sub(row) => {
                state.subs.insert(
                    row.sub_id,
                    Stored {
                        row: row.clone(),
                        last_update: set.last_update,
                        queued_for_update: false,
                    },
                );
            }
        }
        if let Some(name) = &set.name {
            state.names.entry(game).or_insert_with(|| name.clone());
        }
        for genre in &set.genres {
            state.genres.entry(genre.id).or_insert_with(|| genre.name.clone());
            state.app_genres.insert((game.id, genre.id));
        }
        for tag in &set.tags {
            state.tags.entry(tag.id).or_insert_with(|| tag.name.clone());
            state.app_tags.insert((game.id, tag.id));
        }
        for (dlc_id, base_id) in &set.dlc_links {
            state.dlcs.entry(*dlc_id).or_insert(*base_id);
        }
        state.sub_apps.extend(set.sub_apps.iter().copied());
        state.bundle_apps.extend(set.bundle_apps.iter().copied());
        Ok(())
    }

    async fn mark_removed(&self, game: GameRef, now: i64) -> StoreResult<()> {
        let mut state = self.state.write().await;
        match game.game_type {
            GameType::App => {
                let entry = state.apps.entry(game.id).or_insert_with(|| {
                    Stored::placeholder(AppRow {
                        app_id: game.id,
                        ..AppRow::default()
                    })
                });
                entry.row.removed = true;
                entry.last_update = now;
                entry.queued_for_update = false;
            }
            GameType::Sub => {
                let entry = state.subs.entry(game.id).or_insert_with(|| {
                    Stored::placeholder(SubRow {
                        sub_id: game.id,
                        ..SubRow::default()
                    })
                });
                entry.row.removed = true;
                entry.last_update = now;
                entry.queued_for_update = false;
            }
            GameType::Bundle => {
                return Err(StoreError::Backend("bundles carry no removed flag".into()));
            }
        }
        Ok(())
    }

    async fn load_apps(&self, ids: &[i64]) -> StoreResult<Vec<StoredApp>> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        for id in ids {
            let Some(stored) = state.apps.get(id) else {
                continue;
            };
            let row = &stored.row;
            let labels = |joins: &BTreeSet<(i64, i64)>, dict: &BTreeMap<i64, String>| {
                joins
                    .iter()
                    .filter(|(app_id, _)| app_id == id)
                    .filter_map(|(_, label_id)| dict.get(label_id).cloned())
                    .collect::<Vec<String>>()
            };
            out.push(StoredApp {
                app_id: row.app_id,
                name: state.names.get(&GameRef::app(*id)).cloned(),
                released: row.released,
                removed: row.removed,
                steam_cloud: row.steam_cloud,
                trading_cards: row.trading_cards,
                learning: row.learning,
                multiplayer: row.multiplayer,
                singleplayer: row.singleplayer,
                linux: row.linux,
                mac: row.mac,
                windows: row.windows,
                achievements: row.achievements,
                price: row.price,
                metacritic_score: row.metacritic_score,
                metacritic_id: row.metacritic_id.clone(),
                rating_percentage: row.rating_percentage,
                rating_count: row.rating_count,
                release_date: row.release_date,
                genres: labels(&state.app_genres, &state.genres),
                tags: labels(&state.app_tags, &state.tags),
                base: state.dlcs.get(id).copied(),
                dlcs: state
                    .dlcs
                    .iter()
                    .filter(|(_, base)| *base == id)
                    .map(|(dlc, _)| *dlc)
                    .collect(),
                subs: state.related(&state.sub_apps, |(sub, app)| (app == id).then_some(*sub)),
                bundles: state.related(&state.bundle_apps, |(bundle, app)| {
                    (app == id).then_some(*bundle)
                }),
                last_update: stored.last_update,
                queued_for_update: stored.queued_for_update,
            });
        }
        Ok(out)
    }

    async fn load_subs(&self, ids: &[i64]) -> StoreResult<Vec<StoredSub>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let stored = state.subs.get(id)?;
                Some(StoredSub {
                    sub_id: *id,
                    name: state.names.get(&GameRef::sub(*id)).cloned(),
                    released: stored.row.released,
                    removed: stored.row.removed,
                    price: stored.row.price,
                    release_date: stored.row.release_date,
                    apps: state.related(&state.sub_apps, |(sub, app)| (sub == id).then_some(*app)),
                    last_update: stored.last_update,
                    queued_for_update: stored.queued_for_update,
                })
            })
            .collect())
    }

    async fn queue_counts(&self, users_checked_before: i64) -> StoreResult<QueueCounts> {
        let state = self.state.read().await;
        let count = |flags: Vec<(i64, Option<i64>, i64, bool)>| {
            flags.iter().filter(|(_, _, _, queued)| *queued).count() as i64
        };
        Ok(QueueCounts {
            apps: count(state.queue_flags(GameType::App)),
            subs: count(state.queue_flags(GameType::Sub)),
            bundles: count(state.queue_flags(GameType::Bundle)),
            users: state
                .users
                .values()
                .filter(|u| u.last_check <= users_checked_before)
                .count() as i64,
        })
    }

    async fn reset_found(&self, kinds: &[TimelineKind]) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut touched = 0;
        for ((kind, _), row) in state.timelines.iter_mut() {
            if kinds.contains(kind) {
                row.found = false;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn seed_gift_ids(&self, entries: &[GiftIdEntry]) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for entry in entries {
            if !state.gift_ids.contains_key(&entry.game) {
                state.gift_ids.insert(entry.game, entry.gift_id.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn apply_listing_page(&self, page: &ListingPage, added_date: i64) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for entry in &page.names {
            state.names.entry(entry.game).or_insert_with(|| entry.name.clone());
        }
        for entry in &page.timeline {
            state
                .timelines
                .entry((entry.kind, entry.game))
                .and_modify(|row| {
                    row.effective_date = entry.effective_date;
                    if entry.mark_found {
                        row.found = true;
                    }
                })
                .or_insert(TimelineRow {
                    effective_date: entry.effective_date,
                    added_date: entry.added_date.unwrap_or(added_date),
                    found: true,
                });
        }
        for entry in &page.gift_ids {
            state
                .gift_ids
                .entry(entry.game)
                .or_insert_with(|| entry.gift_id.clone());
        }
        Ok(())
    }

    async fn finalize_listing(
        &self,
        kinds: &[TimelineKind],
        ledger_keys: &[&str],
        now: i64,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.timelines.len();
        state
            .timelines
            .retain(|(kind, _), row| row.found || !kinds.contains(kind));
        let deleted = (before - state.timelines.len()) as u64;
        for key in ledger_keys {
            state.timestamps.insert((*key).to_string(), now);
        }
        Ok(deleted)
    }

    async fn users_due(&self, checked_before: i64, limit: usize) -> StoreResult<Vec<UserHistory>> {
        let state = self.state.read().await;
        let mut due: Vec<UserHistory> = state
            .users
            .values()
            .filter(|u| u.last_check <= checked_before)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.last_check
                .cmp(&b.last_check)
                .then_with(|| a.steam_id.cmp(&b.steam_id))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn save_user_histories(&self, histories: &[UserHistory]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for history in histories {
            state.users.insert(history.steam_id.clone(), history.clone());
        }
        Ok(())
    }

    async fn load_timeline(
        &self,
        kind: TimelineKind,
        game_type: GameType,
        filter: &TimelineFilter,
    ) -> StoreResult<Vec<TimelineRecord>> {
        let state = self.state.read().await;
        let mut rows: Vec<TimelineRecord> = state
            .timelines
            .iter()
            .filter(|((k, game), _)| *k == kind && game.game_type == game_type)
            .filter(|((_, game), _)| filter.ids.is_empty() || filter.ids.contains(&game.id))
            .filter(|(_, row)| filter.from.map_or(true, |from| row.effective_date >= from))
            .filter(|(_, row)| filter.until.map_or(true, |until| row.effective_date < until))
            .map(|((_, game), row)| TimelineRecord {
                id: game.id,
                name: state.names.get(game).cloned(),
                effective_date: row.effective_date,
                added_date: row.added_date,
            })
            .collect();
        if let Some(limit) = filter.recent {
            rows.sort_by(|a, b| b.added_date.cmp(&a.added_date).then(b.id.cmp(&a.id)));
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn load_gift_ids(
        &self,
        game_type: GameType,
        ids: &[i64],
    ) -> StoreResult<Vec<GiftIdRecord>> {
        let state = self.state.read().await;
        Ok(state
            .gift_ids
            .iter()
            .filter(|(game, _)| game.game_type == game_type && ids.contains(&game.id))
            .map(|(game, sg_id)| GiftIdRecord {
                id: game.id,
                sg_id: sg_id.clone(),
            })
            .collect())
    }

    async fn load_user(&self, steam_id: &str) -> StoreResult<Option<UserHistory>> {
        Ok(self.state.read().await.users.get(steam_id).cloned())
    }

    async fn track_user(&self, steam_id: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.users.contains_key(steam_id) {
            return Ok(false);
        }
        state.users.insert(
            steam_id.to_string(),
            UserHistory {
                steam_id: steam_id.to_string(),
                usernames: Vec::new(),
                last_check: 0,
                last_update: 0,
            },
        );
        Ok(true)
    }

    async fn record_timestamp(&self, name: &str, at: i64) -> StoreResult<()> {
        self.state.write().await.timestamps.insert(name.to_string(), at);
        Ok(())
    }

    async fn timestamps(&self) -> StoreResult<Vec<(String, i64)>> {
        let state = self.state.read().await;
        Ok(state
            .timestamps
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }
}
