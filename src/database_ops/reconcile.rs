//! Turns a successful fetch into the write set the store applies atomically.

use itertools::Itertools;
use tracing::info;

use super::error::StoreResult;
use super::model::{AppDetail, Fetched, GameRef, Label, SubDetail};
use super::store::{AppRow, CacheStore, RecordRow, SubRow, UpsertSet};

/// Positive ids, first occurrence kept.
pub fn unique_ids(ids: &[i64]) -> Vec<i64> {
    ids.iter().copied().filter(|id| *id > 0).unique().collect()
}

fn unique_labels(labels: &[Label]) -> Vec<Label> {
    labels
        .iter()
        .filter(|l| !l.name.trim().is_empty())
        .unique_by(|l| l.id)
        .cloned()
        .collect()
}

fn name_of(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn app_upsert(app: &AppDetail, now: i64) -> UpsertSet {
    let dlc_links = match app.base {
        Some(base) => vec![(app.app_id, base)],
        None => unique_ids(&app.dlcs)
            .into_iter()
            .map(|dlc| (dlc, app.app_id))
            .collect(),
    };
    UpsertSet {
        record: RecordRow::App(AppRow {
            app_id: app.app_id,
            released: app.released,
            removed: app.removed,
            steam_cloud: app.steam_cloud,
            trading_cards: app.trading_cards,
            learning: app.learning,
            multiplayer: app.multiplayer,
            singleplayer: app.singleplayer,
            linux: app.linux,
            mac: app.mac,
            windows: app.windows,
            achievements: app.achievements,
            price: app.price,
            metacritic_score: app.metacritic_score,
            metacritic_id: app.metacritic_id.clone(),
            rating_percentage: app.rating_percentage,
            rating_count: app.rating_count,
            release_date: app.release_date,
        }),
        last_update: now,
        name: name_of(&app.name),
        genres: unique_labels(&app.genres),
        tags: unique_labels(&app.tags),
        dlc_links,
        sub_apps: unique_ids(&app.subs)
            .into_iter()
            .map(|sub| (sub, app.app_id))
            .collect(),
        bundle_apps: unique_ids(&app.bundles)
            .into_iter()
            .map(|bundle| (bundle, app.app_id))
            .collect(),
    }
}

pub fn sub_upsert(sub: &SubDetail, now: i64) -> UpsertSet {
    UpsertSet {
        record: RecordRow::Sub(SubRow {
            sub_id: sub.sub_id,
            released: sub.released,
            removed: sub.removed,
            price: sub.price,
            release_date: sub.release_date,
        }),
        last_update: now,
        name: name_of(&sub.name),
        genres: Vec::new(),
        tags: Vec::new(),
        dlc_links: Vec::new(),
        sub_apps: unique_ids(&sub.apps)
            .into_iter()
            .map(|app| (sub.sub_id, app))
            .collect(),
        bundle_apps: Vec::new(),
    }
}

pub fn upsert_for(fetched: &Fetched, now: i64) -> UpsertSet {
    match fetched {
        Fetched::App(app) => app_upsert(app, now),
        Fetched::Sub(sub) => sub_upsert(sub, now),
    }
}

/// Writes a fetched record and its relationship rows as one unit.
pub async fn reconcile<S>(store: &S, fetched: &Fetched, now: i64) -> StoreResult<()>
where
    S: CacheStore + ?Sized,
{
    let set = upsert_for(fetched, now);
    store.apply_upsert(&set).await?;
    info!(
        game = %fetched.game_ref(),
        genres = set.genres.len(),
        tags = set.tags.len(),
        dlcs = set.dlc_links.len(),
        subs = set.sub_apps.len(),
        bundles = set.bundle_apps.len(),
        "reconciled"
    );
    Ok(())
}

/// Permanent-not-found path: only the removed marker is written.
pub async fn mark_removed<S>(store: &S, game: GameRef, now: i64) -> StoreResult<()>
where
    S: CacheStore + ?Sized,
{
    store.mark_removed(game, now).await?;
    info!(%game, "marked removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::model::GameType;
    use crate::database_ops::store::MemoryStore;

    fn sample_app() -> AppDetail {
        AppDetail {
            name: "Portal".into(),
            released: true,
            trading_cards: true,
            learning: Some(false),
            windows: true,
            price: 999,
            genres: vec![
                Label { id: 1, name: "Action".into() },
                Label { id: 1, name: "Action".into() },
                Label { id: 2, name: "  ".into() },
            ],
            tags: vec![Label { id: 19, name: "Puzzle".into() }],
            dlcs: vec![410, 411, 410],
            subs: vec![469, 469],
            bundles: vec![7],
            ..AppDetail::empty(400)
        }
    }

    #[test]
    fn collapses_duplicates_and_blank_labels() {
        let set = app_upsert(&sample_app(), 1_000);
        assert_eq!(set.genres, vec![Label { id: 1, name: "Action".into() }]);
        assert_eq!(set.dlc_links, vec![(410, 400), (411, 400)]);
        assert_eq!(set.sub_apps, vec![(469, 400)]);
        assert_eq!(set.bundle_apps, vec![(7, 400)]);
        assert_eq!(set.name.as_deref(), Some("Portal"));
    }

    #[test]
    fn dlc_links_point_at_base_when_app_is_dlc() {
        let mut dlc = sample_app();
        dlc.app_id = 410;
        dlc.base = Some(400);
        let set = app_upsert(&dlc, 1_000);
        assert_eq!(set.dlc_links, vec![(410, 400)]);
    }

    #[test]
    fn sub_writes_membership_rows() {
        let sub = SubDetail {
            sub_id: 469,
            name: "Orange Box".into(),
            released: true,
            removed: false,
            price: 2999,
            release_date: None,
            apps: vec![400, 420, 400],
        };
        let set = sub_upsert(&sub, 5);
        assert_eq!(set.record.game_ref(), GameRef::sub(469));
        assert_eq!(set.sub_apps, vec![(469, 400), (469, 420)]);
    }

    #[tokio::test]
    async fn applying_twice_matches_applying_once() {
        let store = MemoryStore::new();
        let fetched = Fetched::App(sample_app());
        reconcile(&store, &fetched, 1_000).await.unwrap();
        let once = store.snapshot().await;
        reconcile(&store, &fetched, 1_000).await.unwrap();
        assert_eq!(store.snapshot().await, once);
    }

    #[tokio::test]
    async fn removed_path_touches_only_the_marker() {
        let store = MemoryStore::new();
        store.enqueue(GameType::App, &[77]).await.unwrap();
        mark_removed(&store, GameRef::app(77), 2_000).await.unwrap();
        let state = store.snapshot().await;
        let stored = &state.apps[&77];
        assert!(stored.row.removed);
        assert!(!stored.queued_for_update);
        assert_eq!(stored.last_update, 2_000);
        assert!(state.names.is_empty());
        assert!(state.sub_apps.is_empty());
    }
}
