//! Periodic username history refresh for SteamGifts users.

use chrono::Utc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::error::{JobError, JobResult};
use super::model::{ledger, UserHistory};
use super::source::UsernameSource;
use super::staleness::DAY_SECS;
use super::store::CacheStore;

/// Users are re-resolved once this long after their last check.
pub const RECHECK_AFTER_SECS: i64 = 28 * DAY_SECS;
pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserHistoryReport {
    pub checked: usize,
    pub renamed: usize,
}

/// Applies a freshly resolved name: a new name goes first and bumps
/// `last_update`; `last_check` always moves.
pub fn record_resolution(history: &mut UserHistory, username: String, now: i64) -> bool {
    let changed = history.usernames.first() != Some(&username);
    if changed {
        history.usernames.insert(0, username);
        history.last_update = now;
    }
    history.last_check = now;
    changed
}

pub struct UserHistoryJob<'a> {
    store: &'a dyn CacheStore,
    source: &'a dyn UsernameSource,
    batch_size: usize,
    delay: Duration,
}

impl<'a> UserHistoryJob<'a> {
    pub fn new(
        store: &'a dyn CacheStore,
        source: &'a dyn UsernameSource,
        batch_size: usize,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            source,
            batch_size,
            delay,
        }
    }

    /// A failed lookup ends the loop; what was resolved before it is still saved,
    /// but the ledger only moves on a clean run.
    #[instrument(skip(self))]
    pub async fn run(&self) -> JobResult<UserHistoryReport> {
        let started = Utc::now().timestamp();
        let due = self
            .store
            .users_due(started - RECHECK_AFTER_SECS, self.batch_size)
            .await?;
        info!(due = due.len(), "checking usernames");

        let mut report = UserHistoryReport::default();
        let mut updated: Vec<UserHistory> = Vec::with_capacity(due.len());
        let mut failure = None;
        for mut history in due {
            tokio::time::sleep(self.delay).await;
            match self.source.resolve(&history.steam_id).await {
                Ok(username) => {
                    if record_resolution(&mut history, username, Utc::now().timestamp()) {
                        report.renamed += 1;
                    }
                    report.checked += 1;
                    updated.push(history);
                }
                Err(e) => {
                    warn!(
                        steam_id = %history.steam_id,
                        error = %e,
                        "username lookup failed; stopping"
                    );
                    failure = Some(e);
                    break;
                }
            }
        }

        if !updated.is_empty() {
            self.store.save_user_histories(&updated).await?;
        }
        if let Some(e) = failure {
            return Err(JobError::Source(e));
        }
        self.store
            .record_timestamp(ledger::USER_HISTORY, Utc::now().timestamp())
            .await?;
        info!(checked = report.checked, renamed = report.renamed, "user history pass complete");
        Ok(report)
    }
}
