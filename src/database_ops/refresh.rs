//! Batch refresh driver: drains the update queue of one game type.

use chrono::Utc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::error::{JobError, JobResult, SourceError};
use super::model::{ledger, GameRef, GameType};
use super::reconcile;
use super::source::DetailSource;
use super::staleness::{precheck_unqueue, queue_order};
use super::store::CacheStore;
use crate::util::env::env_parse;

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub game_type: GameType,
    pub batch_size: usize,
    /// Pause after every external call.
    pub delay: Duration,
    pub ledger_key: &'static str,
}

impl RefreshConfig {
    pub fn for_type(game_type: GameType) -> Self {
        let batch_size = match game_type {
            GameType::Sub => 100,
            _ => 500,
        };
        Self {
            game_type,
            batch_size,
            delay: Duration::from_secs(1),
            ledger_key: ledger::GAMES,
        }
    }

    /// Env: REFRESH_APP_BATCH_SIZE, REFRESH_SUB_BATCH_SIZE, REFRESH_DELAY_MS
    pub fn from_env(game_type: GameType) -> Self {
        let mut cfg = Self::for_type(game_type);
        cfg.batch_size = match game_type {
            GameType::App => env_parse("REFRESH_APP_BATCH_SIZE", cfg.batch_size),
            GameType::Sub => env_parse("REFRESH_SUB_BATCH_SIZE", cfg.batch_size),
            GameType::Bundle => cfg.batch_size,
        };
        cfg.delay = Duration::from_millis(env_parse("REFRESH_DELAY_MS", 1000u64));
        cfg
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub examined: usize,
    pub refreshed: usize,
    pub unqueued: u64,
    pub removed: u64,
}

pub struct BatchRefreshDriver<'a> {
    store: &'a dyn CacheStore,
    source: &'a dyn DetailSource,
    config: RefreshConfig,
}

impl<'a> BatchRefreshDriver<'a> {
    pub fn new(
        store: &'a dyn CacheStore,
        source: &'a dyn DetailSource,
        config: RefreshConfig,
    ) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    /// One sweep over the queue. A transient source failure stops the sweep
    /// after flushing the unqueue and removal sets; the ledger is then left alone.
    #[instrument(skip(self), fields(game_type = %self.config.game_type))]
    pub async fn run(&self) -> JobResult<BatchReport> {
        let game_type = self.config.game_type;
        let mut rows = self.store.queued(game_type, self.config.batch_size).await?;
        queue_order(&mut rows);
        info!(count = rows.len(), "refreshing queued {game_type}s");

        let mut report = BatchReport::default();
        let mut to_unqueue: Vec<i64> = Vec::new();
        let mut to_remove: Vec<i64> = Vec::new();
        let mut interrupted: Option<SourceError> = None;

        for (i, row) in rows.iter().enumerate() {
            report.examined += 1;
            let now = Utc::now().timestamp();
            if precheck_unqueue(row, now) {
                to_unqueue.push(row.id);
                continue;
            }

            info!("[{i}] updating {game_type} {}", row.id);
            let outcome = self.source.fetch(GameRef { game_type, id: row.id }).await;
            let result = match outcome {
                Ok(fetched) => {
                    let written =
                        reconcile::reconcile(self.store, &fetched, Utc::now().timestamp()).await;
                    if written.is_ok() {
                        report.refreshed += 1;
                    }
                    written
                }
                Err(SourceError::PermanentNotFound { reason, .. }) => {
                    warn!(id = row.id, %reason, "not available upstream; scheduling removal");
                    to_remove.push(row.id);
                    Ok(())
                }
                Err(e) => {
                    warn!(id = row.id, error = %e, "transient failure; stopping batch");
                    interrupted = Some(e);
                    Ok(())
                }
            };
            tokio::time::sleep(self.config.delay).await;
            result?;
            if interrupted.is_some() {
                break;
            }
        }

        report.unqueued = self.store.unqueue(game_type, &to_unqueue).await?;
        report.removed = self.store.remove(game_type, &to_remove).await?;
        info!(unqueued = report.unqueued, removed = report.removed, "flushed queue sets");

        if let Some(e) = interrupted {
            return Err(JobError::Source(e));
        }
        self.store
            .record_timestamp(self.config.ledger_key, Utc::now().timestamp())
            .await?;
        info!(
            examined = report.examined,
            refreshed = report.refreshed,
            "{game_type} batch complete"
        );
        Ok(report)
    }
}

/// The `games` job: apps first, then subs. A transient failure in the app
/// sweep still lets the sub sweep run; the first error is returned after both.
pub async fn run_games(
    store: &dyn CacheStore,
    source: &dyn DetailSource,
    app: RefreshConfig,
    sub: RefreshConfig,
) -> JobResult<(BatchReport, BatchReport)> {
    let apps = match BatchRefreshDriver::new(store, source, app).run().await {
        Ok(report) => Ok(report),
        Err(JobError::Source(e)) => {
            warn!(error = %e, "app sweep interrupted; continuing with subs");
            Err(JobError::Source(e))
        }
        Err(e) => return Err(e),
    };
    let subs = BatchRefreshDriver::new(store, source, sub).run().await;
    Ok((apps?, subs?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::model::{AppDetail, Fetched, Label, SubDetail};
    use crate::database_ops::staleness::DAY_SECS;
    use crate::database_ops::store::{AppRow, MemoryStore, SubRow};
    use crate::database_ops::store::memory::Stored;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Script {
        Found,
        Gone,
        Down,
    }

    #[derive(Default)]
    struct ScriptedSource {
        script: HashMap<i64, Script>,
        calls: Mutex<Vec<i64>>,
        sub_calls: Mutex<Vec<i64>>,
    }

    impl ScriptedSource {
        fn with(script: &[(i64, Script)]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
                sub_calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<i64> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DetailSource for ScriptedSource {
        async fn fetch_app(&self, app_id: i64) -> Result<Fetched, SourceError> {
            self.calls.lock().unwrap().push(app_id);
            match self.script.get(&app_id).copied().unwrap_or(Script::Found) {
                Script::Found => {
                    let mut app = AppDetail::empty(app_id);
                    app.name = format!("App {app_id}");
                    app.genres = vec![Label { id: 1, name: "Action".into() }];
                    Ok(Fetched::App(app))
                }
                Script::Gone => Err(SourceError::not_found(GameRef::app(app_id), "success=false")),
                Script::Down => Err(SourceError::transient("test", "timeout")),
            }
        }

        async fn fetch_sub(&self, sub_id: i64) -> Result<Fetched, SourceError> {
            self.sub_calls.lock().unwrap().push(sub_id);
            Ok(Fetched::Sub(SubDetail {
                sub_id,
                name: format!("Sub {sub_id}"),
                released: true,
                removed: false,
                price: 0,
                release_date: None,
                apps: Vec::new(),
            }))
        }
    }

    async fn queue_apps(store: &MemoryStore, rows: &[(i64, Option<i64>, i64)]) {
        let rows = rows.to_vec();
        store
            .with_state(move |state| {
                for (id, release_date, last_update) in rows {
                    state.apps.insert(
                        id,
                        Stored {
                            row: AppRow {
                                app_id: id,
                                release_date,
                                ..AppRow::default()
                            },
                            last_update,
                            queued_for_update: true,
                        },
                    );
                }
            })
            .await;
    }

    fn config() -> RefreshConfig {
        RefreshConfig::for_type(GameType::App).with_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn permanent_failure_is_isolated_and_removed() {
        let store = MemoryStore::new();
        queue_apps(
            &store,
            &[(1, None, 10), (2, None, 20), (3, None, 30), (4, None, 40), (5, None, 50)],
        )
        .await;
        let source = ScriptedSource::with(&[(3, Script::Gone)]);

        let report = BatchRefreshDriver::new(&store, &source, config()).run().await.unwrap();

        assert_eq!(report.examined, 5);
        assert_eq!(report.refreshed, 4);
        assert_eq!(report.removed, 1);
        let state = store.snapshot().await;
        assert_eq!(state.apps.keys().copied().collect::<Vec<_>>(), vec![1, 2, 4, 5]);
        assert!(state.apps.values().all(|s| !s.queued_for_update));
        assert!(!state.names.contains_key(&GameRef::app(3)));
        assert!(state.app_genres.iter().all(|(app, _)| *app != 3));
        assert!(state.timestamps.contains_key(ledger::GAMES));
    }

    #[tokio::test]
    async fn transient_failure_stops_and_skips_the_ledger() {
        let store = MemoryStore::new();
        queue_apps(&store, &[(1, None, 10), (2, None, 20), (3, None, 30), (4, None, 40)]).await;
        let source = ScriptedSource::with(&[(2, Script::Gone), (3, Script::Down)]);

        let err = BatchRefreshDriver::new(&store, &source, config()).run().await.unwrap_err();

        assert!(matches!(err, JobError::Source(SourceError::Transient { .. })));
        assert_eq!(source.calls(), vec![1, 2, 3]);
        let state = store.snapshot().await;
        assert!(!state.apps.contains_key(&2), "removal set is flushed");
        assert!(!state.apps[&1].queued_for_update);
        assert!(state.apps[&3].queued_for_update);
        assert!(state.apps[&4].queued_for_update);
        assert!(state.timestamps.is_empty());
    }

    #[tokio::test]
    async fn mature_recent_rows_are_unqueued_without_fetching() {
        let now = Utc::now().timestamp();
        let store = MemoryStore::new();
        queue_apps(
            &store,
            &[(7, Some(now - 400 * DAY_SECS), now - 2 * DAY_SECS), (8, None, now - 2 * DAY_SECS)],
        )
        .await;
        let source = ScriptedSource::default();

        let report = BatchRefreshDriver::new(&store, &source, config()).run().await.unwrap();

        assert_eq!(source.calls(), vec![8]);
        assert_eq!(report.unqueued, 1);
        assert_eq!(report.refreshed, 1);
        let state = store.snapshot().await;
        assert!(!state.apps[&7].queued_for_update);
        assert_eq!(state.apps[&7].last_update, now - 2 * DAY_SECS);
    }

    #[tokio::test]
    async fn batch_size_limits_the_sweep() {
        let store = MemoryStore::new();
        queue_apps(&store, &[(1, None, 30), (2, None, 10), (3, None, 20)]).await;
        let source = ScriptedSource::default();
        let cfg = config().with_batch_size(2);

        let report = BatchRefreshDriver::new(&store, &source, cfg).run().await.unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(source.calls(), vec![2, 3]);
    }

    #[tokio::test]
    async fn store_failure_aborts_the_job() {
        let store = MemoryStore::new();
        queue_apps(&store, &[(1, None, 10), (2, None, 20)]).await;
        store.poison(GameRef::app(1)).await;
        let source = ScriptedSource::default();

        let err = BatchRefreshDriver::new(&store, &source, config()).run().await.unwrap_err();

        assert!(matches!(err, JobError::Store(_)));
        assert_eq!(source.calls(), vec![1]);
        assert!(store.snapshot().await.timestamps.is_empty());
    }

    #[tokio::test]
    async fn games_job_runs_subs_after_an_app_interruption() {
        let store = MemoryStore::new();
        queue_apps(&store, &[(1, None, 10), (2, None, 20)]).await;
        store
            .with_state(|state| {
                state.subs.insert(
                    469,
                    Stored {
                        row: SubRow {
                            sub_id: 469,
                            ..SubRow::default()
                        },
                        last_update: 5,
                        queued_for_update: true,
                    },
                );
            })
            .await;
        let source = ScriptedSource::with(&[(1, Script::Down)]);
        let sub_cfg = RefreshConfig::for_type(GameType::Sub).with_delay(Duration::ZERO);

        let err = run_games(&store, &source, config(), sub_cfg).await.unwrap_err();

        assert!(matches!(err, JobError::Source(SourceError::Transient { .. })));
        assert_eq!(source.calls(), vec![1]);
        assert_eq!(*source.sub_calls.lock().unwrap(), vec![469]);
        let state = store.snapshot().await;
        assert!(state.apps[&2].queued_for_update);
        assert!(!state.subs[&469].queued_for_update);
        assert!(state.timestamps.contains_key(ledger::GAMES));
    }
}
