//! Paginated listing sync with a durable page cursor.

use chrono::Utc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::checkpoint::CheckpointStore;
use super::error::JobResult;
use super::source::ListingSource;
use super::store::CacheStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Cursor the run started from (0 means a full pass).
    pub first_page: u32,
    pub last_page: u32,
    pub pages: u32,
    pub ended: bool,
}

pub struct PaginatedSyncJob<'a> {
    store: &'a dyn CacheStore,
    checkpoint: &'a dyn CheckpointStore,
    source: &'a dyn ListingSource,
    delay: Duration,
}

impl<'a> PaginatedSyncJob<'a> {
    pub fn new(
        store: &'a dyn CacheStore,
        checkpoint: &'a dyn CheckpointStore,
        source: &'a dyn ListingSource,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            checkpoint,
            source,
            delay,
        }
    }

    /// Walks pages from the saved cursor until the source reports the end.
    /// Each page commits before the cursor moves; any failure leaves the cursor
    /// on the last committed page so the next run resumes after it.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn run(&self) -> JobResult<SyncReport> {
        let key = self.source.name();
        let started_at = Utc::now().timestamp();
        let first_page = self.checkpoint.load(key).await?;
        let mut report = SyncReport {
            first_page,
            last_page: first_page,
            ..SyncReport::default()
        };

        if first_page == 0 {
            self.reset_pass().await?;
        } else {
            info!(page = first_page, "resuming after saved page");
        }

        let mut page = first_page;
        loop {
            tokio::time::sleep(self.delay).await;
            page += 1;
            let listing = match self.source.fetch_page(page).await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(page, error = %e, "page fetch failed; cursor kept");
                    return Err(e.into());
                }
            };
            self.store.apply_listing_page(&listing, started_at).await?;
            self.checkpoint.save(key, page).await?;
            report.pages += 1;
            report.last_page = page;
            info!(
                page,
                names = listing.names.len(),
                timeline = listing.timeline.len(),
                gift_ids = listing.gift_ids.len(),
                "page committed"
            );
            if listing.ended {
                break;
            }
        }

        let purged = self
            .store
            .finalize_listing(
                self.source.tracked_kinds(),
                self.source.ledger_keys(),
                Utc::now().timestamp(),
            )
            .await?;
        self.checkpoint.save(key, 0).await?;
        report.ended = true;
        info!(pages = report.pages, purged, "listing pass complete");
        Ok(report)
    }

    async fn reset_pass(&self) -> JobResult<()> {
        let kinds = self.source.tracked_kinds();
        if !kinds.is_empty() {
            let reset = self.store.reset_found(kinds).await?;
            info!(reset, "full pass: cleared found flags");
        }
        let seed = self.source.seed().await?;
        if !seed.is_empty() {
            let inserted = self.store.seed_gift_ids(&seed).await?;
            info!(seeded = seed.len(), inserted, "applied gift id snapshot");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::checkpoint::MemoryCheckpoint;
    use crate::database_ops::error::{JobError, SourceError};
    use crate::database_ops::model::{
        ledger, GameRef, GiftIdEntry, ListingPage, NameEntry, TimelineEntry, TimelineKind,
        TimelineRow,
    };
    use crate::database_ops::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Pages 1..=`last` with one app each; `last` is short.
    struct ScriptedListing {
        last: u32,
        failing: Mutex<HashSet<u32>>,
        seed: Vec<GiftIdEntry>,
        visited: Mutex<Vec<u32>>,
    }

    impl ScriptedListing {
        fn new(last: u32) -> Self {
            Self {
                last,
                failing: Mutex::new(HashSet::new()),
                seed: Vec::new(),
                visited: Mutex::new(Vec::new()),
            }
        }

        fn fail_on(self, page: u32) -> Self {
            self.failing.lock().unwrap().insert(page);
            self
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn visited(&self) -> Vec<u32> {
            self.visited.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ListingSource for ScriptedListing {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn tracked_kinds(&self) -> &'static [TimelineKind] {
            &[TimelineKind::ReducedValue]
        }

        fn ledger_keys(&self) -> &'static [&'static str] {
            &[ledger::RCV_FROM_SG]
        }

        async fn seed(&self) -> Result<Vec<GiftIdEntry>, SourceError> {
            Ok(self.seed.clone())
        }

        async fn fetch_page(&self, page: u32) -> Result<ListingPage, SourceError> {
            self.visited.lock().unwrap().push(page);
            if self.failing.lock().unwrap().contains(&page) {
                return Err(SourceError::transient("test", "timeout"));
            }
            let game = GameRef::app(i64::from(page) * 10);
            Ok(ListingPage {
                names: vec![NameEntry { game, name: format!("Game {page}") }],
                timeline: vec![TimelineEntry {
                    kind: TimelineKind::ReducedValue,
                    game,
                    effective_date: 1_000 + i64::from(page),
                    added_date: None,
                    mark_found: true,
                }],
                gift_ids: Vec::new(),
                ended: page >= self.last,
            })
        }
    }

    fn job<'a>(
        store: &'a MemoryStore,
        checkpoint: &'a MemoryCheckpoint,
        source: &'a ScriptedListing,
    ) -> PaginatedSyncJob<'a> {
        PaginatedSyncJob::new(store, checkpoint, source, Duration::ZERO)
    }

    #[tokio::test]
    async fn walks_full_pages_then_the_partial_one() {
        let store = MemoryStore::new();
        let checkpoint = MemoryCheckpoint::new();
        let source = ScriptedListing::new(4);

        let report = job(&store, &checkpoint, &source).run().await.unwrap();

        assert_eq!(source.visited(), vec![1, 2, 3, 4]);
        assert_eq!(
            report,
            SyncReport { first_page: 0, last_page: 4, pages: 4, ended: true }
        );
        assert_eq!(checkpoint.load("scripted").await.unwrap(), 0);
        let state = store.snapshot().await;
        assert_eq!(state.timelines.len(), 4);
        assert!(state.timestamps.contains_key(ledger::RCV_FROM_SG));
    }

    #[tokio::test]
    async fn transient_failure_keeps_the_cursor_and_resumes() {
        let store = MemoryStore::new();
        let checkpoint = MemoryCheckpoint::new();
        let source = ScriptedListing::new(5).fail_on(3);

        let err = job(&store, &checkpoint, &source).run().await.unwrap_err();
        assert!(matches!(err, JobError::Source(_)));
        assert_eq!(checkpoint.load("scripted").await.unwrap(), 2);
        assert!(store.snapshot().await.timestamps.is_empty());

        source.heal();
        let report = job(&store, &checkpoint, &source).run().await.unwrap();
        assert_eq!(report.first_page, 2);
        assert_eq!(source.visited(), vec![1, 2, 3, 3, 4, 5]);
        assert_eq!(store.snapshot().await.timelines.len(), 5);
    }

    #[tokio::test]
    async fn full_pass_drops_entries_it_did_not_see() {
        let store = MemoryStore::new();
        let stale = GameRef::app(999);
        store
            .with_state(|state| {
                for (game, date) in [(GameRef::app(10), 5), (GameRef::app(20), 6), (stale, 7)] {
                    state.timelines.insert(
                        (TimelineKind::ReducedValue, game),
                        TimelineRow { effective_date: date, added_date: 1, found: true },
                    );
                }
            })
            .await;
        let checkpoint = MemoryCheckpoint::new();
        let source = ScriptedListing::new(2);

        job(&store, &checkpoint, &source).run().await.unwrap();

        let state = store.snapshot().await;
        assert!(!state.timelines.contains_key(&(TimelineKind::ReducedValue, stale)));
        let kept = &state.timelines[&(TimelineKind::ReducedValue, GameRef::app(10))];
        assert!(kept.found);
        assert_eq!(kept.added_date, 1);
        assert_eq!(kept.effective_date, 1_001);
    }

    #[tokio::test]
    async fn resumed_run_skips_the_reset_and_seed() {
        let store = MemoryStore::new();
        let checkpoint = MemoryCheckpoint::new();
        checkpoint.save("scripted", 1).await.unwrap();
        let mut source = ScriptedListing::new(2);
        source.seed = vec![GiftIdEntry { game: GameRef::app(1), gift_id: "a".into() }];

        let report = job(&store, &checkpoint, &source).run().await.unwrap();

        assert_eq!(source.visited(), vec![2]);
        assert_eq!(report.pages, 1);
        assert!(store.snapshot().await.gift_ids.is_empty());
    }

    #[tokio::test]
    async fn fresh_run_applies_the_seed() {
        let store = MemoryStore::new();
        let checkpoint = MemoryCheckpoint::new();
        let mut source = ScriptedListing::new(1);
        source.seed = vec![GiftIdEntry { game: GameRef::sub(469), gift_id: "b".into() }];

        job(&store, &checkpoint, &source).run().await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.gift_ids.get(&GameRef::sub(469)).map(String::as_str), Some("b"));
    }
}
