//! When a cached record is due for another fetch.
//!
//! Young titles churn (prices, tags) so they get a short window; mature titles
//! get a long one. Independently, an app whose store categorization is not
//! settled (Steam is "still learning" about it, or the page could not be read)
//! is revisited daily regardless of age, unless it was removed from the store.

use serde::Serialize;

use super::model::{GameType, QueuedRow};

pub const DAY_SECS: i64 = 60 * 60 * 24;
/// Titles released longer ago than this are considered mature.
pub const MATURE_AFTER_SECS: i64 = 180 * DAY_SECS;
pub const MATURE_REFRESH_SECS: i64 = 30 * DAY_SECS;
pub const YOUNG_REFRESH_SECS: i64 = 6 * DAY_SECS;
pub const LEARNING_REFRESH_SECS: i64 = DAY_SECS;

/// Fields of a stored record the policy looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessInput {
    pub game_type: GameType,
    pub release_date: Option<i64>,
    pub last_update: i64,
    pub removed: bool,
    /// App only. `Some(true)` while Steam shows its learning marker, `None` when unknown.
    pub learning: Option<bool>,
    pub queued: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    AlreadyQueued,
    MatureExpired,
    YoungExpired,
    LearningUnsettled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staleness {
    pub queued: bool,
    pub reason: Option<StaleReason>,
}

impl Staleness {
    fn fresh() -> Self {
        Self {
            queued: false,
            reason: None,
        }
    }

    fn stale(reason: StaleReason) -> Self {
        Self {
            queued: true,
            reason: Some(reason),
        }
    }
}

pub fn evaluate(input: &StalenessInput, now: i64) -> Staleness {
    if input.queued {
        return Staleness::stale(StaleReason::AlreadyQueued);
    }
    let released_at = input.release_date.unwrap_or(now);
    let age = now - released_at;
    let recency = now - input.last_update;

    let learning_due = input.game_type == GameType::App
        && input.learning != Some(false)
        && !input.removed
        && recency > LEARNING_REFRESH_SECS;

    if age > MATURE_AFTER_SECS {
        if recency > MATURE_REFRESH_SECS {
            return Staleness::stale(StaleReason::MatureExpired);
        }
    } else if recency > YOUNG_REFRESH_SECS {
        return Staleness::stale(StaleReason::YoungExpired);
    }
    if learning_due {
        return Staleness::stale(StaleReason::LearningUnsettled);
    }
    Staleness::fresh()
}

/// Queue rows for mature titles refreshed within the mature window are dropped
/// from the queue without a fetch. Rows with no release date never qualify.
pub fn precheck_unqueue(row: &QueuedRow, now: i64) -> bool {
    match row.release_date {
        Some(released_at) => {
            now - released_at > MATURE_AFTER_SECS && now - row.last_update < MATURE_REFRESH_SECS
        }
        None => false,
    }
}

/// Oldest-serviced first; ties broken by id for a stable order.
pub fn queue_order(rows: &mut [QueuedRow]) {
    rows.sort_by_key(|row| (row.last_update, row.id));
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn app(
        release_days_ago: Option<i64>,
        updated_days_ago: i64,
        learning: Option<bool>,
    ) -> StalenessInput {
        StalenessInput {
            game_type: GameType::App,
            release_date: release_days_ago.map(|d| NOW - d * DAY_SECS),
            last_update: NOW - updated_days_ago * DAY_SECS,
            removed: false,
            learning,
            queued: false,
        }
    }

    #[test]
    fn mature_app_past_thirty_days_is_queued() {
        let verdict = evaluate(&app(Some(200), 40, Some(false)), NOW);
        assert!(verdict.queued);
        assert_eq!(verdict.reason, Some(StaleReason::MatureExpired));
    }

    #[test]
    fn learning_app_is_queued_after_one_day_even_when_mature() {
        let verdict = evaluate(&app(Some(200), 10, Some(true)), NOW);
        assert!(verdict.queued);
        assert_eq!(verdict.reason, Some(StaleReason::LearningUnsettled));
    }

    #[test]
    fn unknown_learning_state_also_uses_daily_window() {
        let verdict = evaluate(&app(Some(200), 2, None), NOW);
        assert_eq!(verdict.reason, Some(StaleReason::LearningUnsettled));
    }

    #[test]
    fn removed_app_skips_learning_window() {
        let mut input = app(Some(200), 10, Some(true));
        input.removed = true;
        assert!(!evaluate(&input, NOW).queued);
    }

    #[test]
    fn settled_mature_app_within_window_stays_fresh() {
        assert!(!evaluate(&app(Some(200), 10, Some(false)), NOW).queued);
    }

    #[test]
    fn young_app_uses_six_day_window() {
        assert!(!evaluate(&app(Some(30), 5, Some(false)), NOW).queued);
        let verdict = evaluate(&app(Some(30), 7, Some(false)), NOW);
        assert_eq!(verdict.reason, Some(StaleReason::YoungExpired));
    }

    #[test]
    fn missing_release_date_counts_as_just_released() {
        assert!(evaluate(&app(None, 7, Some(false)), NOW).queued);
        assert!(!evaluate(&app(None, 5, Some(false)), NOW).queued);
    }

    #[test]
    fn subs_ignore_learning_state() {
        let input = StalenessInput {
            game_type: GameType::Sub,
            release_date: Some(NOW - 200 * DAY_SECS),
            last_update: NOW - 10 * DAY_SECS,
            removed: false,
            learning: None,
            queued: false,
        };
        assert!(!evaluate(&input, NOW).queued);
    }

    #[test]
    fn fresh_verdict_implies_last_update_within_window() {
        // Exhaust a grid of ages/recencies and check the window bound holds.
        for release in [None, Some(1), Some(100), Some(179), Some(181), Some(1000)] {
            for updated in 0..45 {
                for learning in [None, Some(true), Some(false)] {
                    let input = app(release, updated, learning);
                    if evaluate(&input, NOW).queued {
                        continue;
                    }
                    let recency = NOW - input.last_update;
                    let mature = release.map(|d| d * DAY_SECS > MATURE_AFTER_SECS).unwrap_or(false);
                    let bound = if learning != Some(false) {
                        LEARNING_REFRESH_SECS
                    } else if mature {
                        MATURE_REFRESH_SECS
                    } else {
                        YOUNG_REFRESH_SECS
                    };
                    assert!(
                        recency <= bound,
                        "release={release:?} updated={updated} learning={learning:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn precheck_requires_known_mature_release() {
        let row = |release: Option<i64>, updated: i64| QueuedRow {
            id: 1,
            release_date: release.map(|d| NOW - d * DAY_SECS),
            last_update: NOW - updated * DAY_SECS,
        };
        assert!(precheck_unqueue(&row(Some(200), 10), NOW));
        assert!(!precheck_unqueue(&row(Some(200), 31), NOW));
        assert!(!precheck_unqueue(&row(Some(100), 10), NOW));
        assert!(!precheck_unqueue(&row(None, 0), NOW));
    }

    #[test]
    fn queue_order_is_oldest_first() {
        let mut rows = vec![
            QueuedRow { id: 3, release_date: None, last_update: 30 },
            QueuedRow { id: 1, release_date: None, last_update: 10 },
            QueuedRow { id: 2, release_date: None, last_update: 10 },
        ];
        queue_order(&mut rows);
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
