//! On-demand reads that also feed the refresh queue.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::error::StoreResult;
use super::model::{
    ledger, GameType, GiftIdRecord, QueueCounts, StoredApp, StoredSub, TimelineFilter,
    TimelineKind, TimelineRecord, UserHistory,
};
use super::reconcile::unique_ids;
use super::staleness::{evaluate, StalenessInput, DAY_SECS};
use super::store::CacheStore;

/// Users are reported as pending once unchecked for this long.
pub const USERS_PENDING_AFTER_SECS: i64 = 30 * DAY_SECS;

/// Row caps of a "recently added" timeline read.
pub const RECENT_APPS: usize = 100;
pub const RECENT_SUBS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lookup<T> {
    pub found: Vec<T>,
    /// Requested ids with no cached row; they are queued for a first fetch.
    pub missing: Vec<i64>,
}

/// Timeline read parameters. When either id list is given, only the listed
/// types are read; otherwise every entry of both types is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineQuery {
    pub app_ids: Option<Vec<i64>>,
    pub sub_ids: Option<Vec<i64>>,
    pub from: Option<i64>,
    pub until: Option<i64>,
    pub recent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerType<T> {
    pub apps: Vec<T>,
    pub subs: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedLookup<T> {
    pub found: PerType<T>,
    pub missing: PerType<i64>,
    /// Ledger time of the job that feeds this data.
    pub last_update: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserLookup {
    pub history: Option<UserHistory>,
    /// Set when the user is waiting for a first username check.
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    pub timestamps: BTreeMap<String, i64>,
    pub queued: QueueCounts,
}

#[derive(Clone)]
pub struct LookupService {
    store: Arc<dyn CacheStore>,
}

impl LookupService {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn apps(&self, ids: &[i64]) -> StoreResult<Lookup<StoredApp>> {
        let ids = unique_ids(ids);
        let now = Utc::now().timestamp();
        let mut found = self.store.load_apps(&ids).await?;
        let mut to_queue = Vec::new();
        for app in found.iter_mut().filter(|a| !a.queued_for_update) {
            let verdict = evaluate(
                &StalenessInput {
                    game_type: GameType::App,
                    release_date: app.release_date,
                    last_update: app.last_update,
                    removed: app.removed,
                    learning: app.learning,
                    queued: false,
                },
                now,
            );
            if verdict.queued {
                debug!(app_id = app.app_id, reason = ?verdict.reason, "stale");
                app.queued_for_update = true;
                to_queue.push(app.app_id);
            }
        }
        let missing = missing_ids(&ids, found.iter().map(|a| a.app_id));
        self.enqueue(GameType::App, to_queue, &missing).await?;
        Ok(Lookup { found, missing })
    }

    pub async fn subs(&self, ids: &[i64]) -> StoreResult<Lookup<StoredSub>> {
        let ids = unique_ids(ids);
        let now = Utc::now().timestamp();
        let mut found = self.store.load_subs(&ids).await?;
        let mut to_queue = Vec::new();
        for sub in found.iter_mut().filter(|s| !s.queued_for_update) {
            let verdict = evaluate(
                &StalenessInput {
                    game_type: GameType::Sub,
                    release_date: sub.release_date,
                    last_update: sub.last_update,
                    removed: sub.removed,
                    learning: None,
                    queued: false,
                },
                now,
            );
            if verdict.queued {
                sub.queued_for_update = true;
                to_queue.push(sub.sub_id);
            }
        }
        let missing = missing_ids(&ids, found.iter().map(|s| s.sub_id));
        self.enqueue(GameType::Sub, to_queue, &missing).await?;
        Ok(Lookup { found, missing })
    }

    pub async fn info(&self) -> StoreResult<CacheInfo> {
        let now = Utc::now().timestamp();
        let (rows, queued) = futures::try_join!(
            self.store.timestamps(),
            self.store.queue_counts(now - USERS_PENDING_AFTER_SECS)
        )?;
        Ok(CacheInfo {
            timestamps: rows.into_iter().collect(),
            queued,
        })
    }

    /// Reduced-value timeline.
    pub async fn rcv(&self, query: &TimelineQuery) -> StoreResult<TypedLookup<TimelineRecord>> {
        let mut out = self.timeline(TimelineKind::ReducedValue, query).await?;
        out.last_update = self
            .latest_of(&[ledger::RCV_FROM_SG, ledger::RCV_FROM_SGTOOLS])
            .await?;
        Ok(out)
    }

    /// No-value timeline.
    pub async fn ncv(&self, query: &TimelineQuery) -> StoreResult<TypedLookup<TimelineRecord>> {
        let mut out = self.timeline(TimelineKind::NoValue, query).await?;
        out.last_update = self.latest_of(&[ledger::NCV]).await?;
        Ok(out)
    }

    /// SteamGifts ids of the requested apps and subs.
    pub async fn sgids(
        &self,
        app_ids: &[i64],
        sub_ids: &[i64],
    ) -> StoreResult<TypedLookup<GiftIdRecord>> {
        let mut out = TypedLookup::default();
        for (game_type, ids) in [(GameType::App, app_ids), (GameType::Sub, sub_ids)] {
            let ids = unique_ids(ids);
            let found = self.store.load_gift_ids(game_type, &ids).await?;
            let missing = missing_ids(&ids, found.iter().map(|r| r.id));
            out.put(game_type, found, missing);
        }
        out.last_update = self.latest_of(&[ledger::SG_IDS]).await?;
        Ok(out)
    }

    /// Username history of one user. An unknown user is tracked so the next
    /// history job resolves it.
    pub async fn user_history(&self, steam_id: &str) -> StoreResult<UserLookup> {
        match self.store.load_user(steam_id).await? {
            Some(history) if !history.usernames.is_empty() => Ok(UserLookup {
                history: Some(history),
                pending: false,
            }),
            Some(_) => Ok(UserLookup {
                history: None,
                pending: true,
            }),
            None => {
                let created = self.store.track_user(steam_id).await?;
                debug!(steam_id, created, "tracking user");
                Ok(UserLookup {
                    history: None,
                    pending: true,
                })
            }
        }
    }

    async fn timeline(
        &self,
        kind: TimelineKind,
        query: &TimelineQuery,
    ) -> StoreResult<TypedLookup<TimelineRecord>> {
        let listed = query.app_ids.is_some() || query.sub_ids.is_some();
        let mut out = TypedLookup::default();
        for (game_type, ids) in [(GameType::App, &query.app_ids), (GameType::Sub, &query.sub_ids)] {
            let ids = match ids {
                Some(ids) => unique_ids(ids),
                None if listed => continue,
                None => Vec::new(),
            };
            if listed && ids.is_empty() {
                continue;
            }
            let filter = TimelineFilter {
                ids: ids.clone(),
                from: query.from,
                until: query.until,
                recent: query.recent.then_some(match game_type {
                    GameType::Sub => RECENT_SUBS,
                    _ => RECENT_APPS,
                }),
            };
            let found = self.store.load_timeline(kind, game_type, &filter).await?;
            let missing = missing_ids(&ids, found.iter().map(|r| r.id));
            out.put(game_type, found, missing);
        }
        Ok(out)
    }

    async fn latest_of(&self, keys: &[&str]) -> StoreResult<Option<i64>> {
        let rows = self.store.timestamps().await?;
        Ok(rows
            .into_iter()
            .filter(|(name, _)| keys.contains(&name.as_str()))
            .map(|(_, at)| at)
            .max())
    }

    async fn enqueue(
        &self,
        game_type: GameType,
        mut ids: Vec<i64>,
        missing: &[i64],
    ) -> StoreResult<()> {
        ids.extend_from_slice(missing);
        if ids.is_empty() {
            return Ok(());
        }
        let queued = self.store.enqueue(game_type, &ids).await?;
        debug!(%game_type, queued, "queued for refresh");
        Ok(())
    }
}

impl<T> Default for PerType<T> {
    fn default() -> Self {
        Self {
            apps: Vec::new(),
            subs: Vec::new(),
        }
    }
}

impl<T> Default for TypedLookup<T> {
    fn default() -> Self {
        Self {
            found: PerType::default(),
            missing: PerType::default(),
            last_update: None,
        }
    }
}

impl<T> TypedLookup<T> {
    fn put(&mut self, game_type: GameType, found: Vec<T>, missing: Vec<i64>) {
        match game_type {
            GameType::Sub => {
                self.found.subs = found;
                self.missing.subs = missing;
            }
            _ => {
                self.found.apps = found;
                self.missing.apps = missing;
            }
        }
    }
}

fn missing_ids(requested: &[i64], present: impl Iterator<Item = i64>) -> Vec<i64> {
    let present: HashSet<i64> = present.collect();
    requested.iter().copied().filter(|id| !present.contains(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::model::{GameRef, GiftIdEntry, ListingPage, TimelineEntry};
    use crate::database_ops::store::memory::Stored;
    use crate::database_ops::store::{AppRow, MemoryStore, SubRow};

    fn stored_app(
        id: i64,
        release_date: i64,
        last_update: i64,
        learning: Option<bool>,
    ) -> Stored<AppRow> {
        Stored {
            row: AppRow {
                app_id: id,
                release_date: Some(release_date),
                learning,
                ..AppRow::default()
            },
            last_update,
            queued_for_update: false,
        }
    }

    #[tokio::test]
    async fn stale_and_missing_apps_are_queued() {
        let now = Utc::now().timestamp();
        let store = MemoryStore::new();
        store
            .with_state(|state| {
                let released = now - 200 * DAY_SECS;
                state.apps.insert(100, stored_app(100, released, now - 40 * DAY_SECS, Some(false)));
                state.apps.insert(200, stored_app(200, released, now - 10 * DAY_SECS, Some(true)));
                state.apps.insert(300, stored_app(300, released, now - 10 * DAY_SECS, Some(false)));
            })
            .await;
        let service = LookupService::new(Arc::new(store.clone()));

        let result = service.apps(&[100, 200, 300, 400, 400, -1]).await.unwrap();

        let flags: Vec<(i64, bool)> = result
            .found
            .iter()
            .map(|a| (a.app_id, a.queued_for_update))
            .collect();
        assert_eq!(flags, vec![(100, true), (200, true), (300, false)]);
        assert_eq!(result.missing, vec![400]);
        let state = store.snapshot().await;
        assert!(state.apps[&100].queued_for_update);
        assert!(state.apps[&200].queued_for_update);
        assert!(!state.apps[&300].queued_for_update);
        assert!(state.apps[&400].queued_for_update);
    }

    #[tokio::test]
    async fn young_subs_use_the_short_window() {
        let now = Utc::now().timestamp();
        let store = MemoryStore::new();
        store
            .with_state(|state| {
                state.subs.insert(
                    7,
                    Stored {
                        row: SubRow {
                            sub_id: 7,
                            release_date: Some(now - 10 * DAY_SECS),
                            ..SubRow::default()
                        },
                        last_update: now - 7 * DAY_SECS,
                        queued_for_update: false,
                    },
                );
            })
            .await;
        let service = LookupService::new(Arc::new(store.clone()));

        let result = service.subs(&[7]).await.unwrap();

        assert!(result.found[0].queued_for_update);
        assert!(result.missing.is_empty());
        assert!(store.snapshot().await.subs[&7].queued_for_update);
    }

    #[tokio::test]
    async fn info_reports_ledger_and_queue() {
        let store = MemoryStore::new();
        store.enqueue(GameType::App, &[1, 2]).await.unwrap();
        store.record_timestamp(ledger::GAMES, 42).await.unwrap();
        let service = LookupService::new(Arc::new(store));

        let info = service.info().await.unwrap();

        assert_eq!(info.timestamps.get(ledger::GAMES), Some(&42));
        assert_eq!(info.queued.apps, 2);
        assert_eq!(info.queued.subs, 0);
    }

    fn ncv_page(entries: &[(GameRef, i64)]) -> ListingPage {
        ListingPage {
            timeline: entries
                .iter()
                .map(|(game, effective_date)| TimelineEntry {
                    kind: TimelineKind::NoValue,
                    game: *game,
                    effective_date: *effective_date,
                    added_date: None,
                    mark_found: true,
                })
                .collect(),
            ..ListingPage::default()
        }
    }

    #[tokio::test]
    async fn timeline_lookup_reports_missing_ids_and_ledger() {
        let store = MemoryStore::new();
        store
            .apply_listing_page(&ncv_page(&[(GameRef::app(1), 10), (GameRef::sub(2), 20)]), 5)
            .await
            .unwrap();
        store.record_timestamp(ledger::NCV, 77).await.unwrap();
        let service = LookupService::new(Arc::new(store));

        let listed = TimelineQuery {
            app_ids: Some(vec![1, 3]),
            ..TimelineQuery::default()
        };
        let result = service.ncv(&listed).await.unwrap();
        assert_eq!(result.found.apps.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(result.missing.apps, vec![3]);
        assert!(result.found.subs.is_empty(), "unlisted type is not read");
        assert_eq!(result.last_update, Some(77));

        let everything = service.ncv(&TimelineQuery::default()).await.unwrap();
        assert_eq!(everything.found.apps.len(), 1);
        assert_eq!(everything.found.subs.len(), 1);
        assert!(everything.missing.apps.is_empty());

        let rcv = service.rcv(&TimelineQuery::default()).await.unwrap();
        assert!(rcv.found.apps.is_empty());
        assert_eq!(rcv.last_update, None);
    }

    #[tokio::test]
    async fn rcv_reports_the_newest_of_both_feeds() {
        let store = MemoryStore::new();
        store.record_timestamp(ledger::RCV_FROM_SG, 10).await.unwrap();
        store.record_timestamp(ledger::RCV_FROM_SGTOOLS, 30).await.unwrap();
        let service = LookupService::new(Arc::new(store));

        let result = service.rcv(&TimelineQuery::default()).await.unwrap();

        assert_eq!(result.last_update, Some(30));
    }

    #[tokio::test]
    async fn sgids_split_found_and_missing() {
        let store = MemoryStore::new();
        store
            .seed_gift_ids(&[
                GiftIdEntry { game: GameRef::app(10), gift_id: "a10".into() },
                GiftIdEntry { game: GameRef::sub(20), gift_id: "s20".into() },
            ])
            .await
            .unwrap();
        let service = LookupService::new(Arc::new(store));

        let result = service.sgids(&[10, 11], &[20]).await.unwrap();

        assert_eq!(result.found.apps, vec![GiftIdRecord { id: 10, sg_id: "a10".into() }]);
        assert_eq!(result.missing.apps, vec![11]);
        assert_eq!(result.found.subs.len(), 1);
        assert!(result.missing.subs.is_empty());
    }

    #[tokio::test]
    async fn unknown_user_is_tracked_for_the_history_job() {
        let store = MemoryStore::new();
        let service = LookupService::new(Arc::new(store.clone()));

        let first = service.user_history("76561198000000042").await.unwrap();
        assert!(first.pending);
        assert!(first.history.is_none());
        let due = store.users_due(0, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].steam_id, "76561198000000042");

        store
            .save_user_histories(&[UserHistory {
                steam_id: "76561198000000042".into(),
                usernames: vec!["carol".into()],
                last_check: 9,
                last_update: 9,
            }])
            .await
            .unwrap();
        let known = service.user_history("76561198000000042").await.unwrap();
        assert!(!known.pending);
        assert_eq!(known.history.unwrap().usernames, vec!["carol".to_string()]);
    }
}
