use async_trait::async_trait;
use itertools::Itertools;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::collections::HashMap;
use tracing::debug;

use super::{CacheStore, RecordRow, UpsertSet};
use crate::database_ops::error::{StoreError, StoreResult};
use crate::database_ops::model::{
    GameRef, GameType, GiftIdEntry, GiftIdRecord, ListingPage, QueueCounts, QueuedRow, StoredApp,
    StoredSub, TimelineEntry, TimelineFilter, TimelineKind, TimelineRecord, UserHistory,
};
use crate::util::db::Db;

/// Rows per multi-row INSERT; keeps every statement under the 65535 bind limit.
const INSERT_CHUNK_ROWS: usize = 5_000;

/// `CacheStore` over the Postgres schema in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

#[derive(sqlx::FromRow)]
struct AppRecord {
    app_id: i64,
    name: Option<String>,
    released: bool,
    removed: bool,
    steam_cloud: bool,
    trading_cards: bool,
    learning: Option<bool>,
    multiplayer: bool,
    singleplayer: bool,
    linux: bool,
    mac: bool,
    windows: bool,
    achievements: i32,
    price: i32,
    metacritic_score: Option<i32>,
    metacritic_id: Option<String>,
    rating_percentage: Option<i32>,
    rating_count: Option<i32>,
    release_date: Option<i64>,
    base: Option<i64>,
    last_update: i64,
    queued_for_update: bool,
}

#[derive(sqlx::FromRow)]
struct SubRecord {
    sub_id: i64,
    name: Option<String>,
    released: bool,
    removed: bool,
    price: i32,
    release_date: Option<i64>,
    last_update: i64,
    queued_for_update: bool,
}

#[derive(sqlx::FromRow)]
struct TimelineRecordRow {
    id: i64,
    name: Option<String>,
    effective_date: i64,
    added_date: i64,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert-ignore of `(a, b)` pairs; a no-op for an empty slice.
    async fn insert_pairs(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        columns: (&str, &str),
        pairs: &[(i64, i64)],
    ) -> StoreResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        for chunk in pairs.chunks(INSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("INSERT INTO {table} ({}, {}) ", columns.0, columns.1));
            qb.push_values(chunk.iter(), |mut b, (left, right)| {
                b.push_bind(*left).push_bind(*right);
            });
            qb.push(" ON CONFLICT DO NOTHING");
            qb.build().execute(&mut **tx).await?;
        }
        Ok(())
    }

    /// Insert-ignore of `(id, text)` rows. Returns the number inserted.
    async fn insert_labels(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        columns: (&str, &str),
        rows: &[(i64, String)],
    ) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("INSERT INTO {table} ({}, {}) ", columns.0, columns.1));
            qb.push_values(chunk.iter(), |mut b, (id, text)| {
                b.push_bind(*id).push_bind(text.clone());
            });
            qb.push(" ON CONFLICT DO NOTHING");
            inserted += qb.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn upsert_timeline(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        id_column: &str,
        mark_found: bool,
        entries: &[&TimelineEntry],
        added_date: i64,
    ) -> StoreResult<()> {
        // ON CONFLICT DO UPDATE rejects a key appearing twice in one statement.
        let mut latest: HashMap<i64, &TimelineEntry> = HashMap::new();
        for entry in entries {
            latest.insert(entry.game.id, *entry);
        }
        if latest.is_empty() {
            return Ok(());
        }
        let latest: Vec<&TimelineEntry> = latest.into_values().collect();
        for chunk in latest.chunks(INSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table} ({id_column}, effective_date, added_date, found) "
            ));
            qb.push_values(chunk.iter(), |mut b, entry| {
                b.push_bind(entry.game.id)
                    .push_bind(entry.effective_date)
                    .push_bind(entry.added_date.unwrap_or(added_date))
                    .push_bind(true);
            });
            qb.push(format!(
                " ON CONFLICT ({id_column}) DO UPDATE SET effective_date = EXCLUDED.effective_date"
            ));
            if mark_found {
                qb.push(", found = TRUE");
            }
            qb.build().execute(&mut **tx).await?;
        }
        Ok(())
    }

    async fn upsert_ledger(
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
        at: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO timestamps (name, date) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET date = EXCLUDED.date",
        )
        .bind(name)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// `(owner, values)` rows from an aggregate query keyed by app id.
    async fn grouped<T>(&self, sql: &str, ids: &[i64]) -> StoreResult<HashMap<i64, Vec<T>>>
    where
        T: Send,
        Vec<T>: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        let rows = sqlx::query(sql).bind(ids).fetch_all(&self.db.pool).await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let owner: i64 = row.try_get(0)?;
            let values: Vec<T> = row.try_get(1)?;
            out.insert(owner, values);
        }
        Ok(out)
    }
}

fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    ids.iter().copied().unique().collect()
}

#[async_trait]
impl CacheStore for PgStore {
    async fn queued(&self, game_type: GameType, limit: usize) -> StoreResult<Vec<QueuedRow>> {
        let release = if game_type == GameType::Bundle {
            "NULL::BIGINT"
        } else {
            "release_date"
        };
        let id = game_type.id_column();
        let sql = format!(
            "SELECT {id}, {release} AS release_date, last_update FROM {table}
             WHERE queued_for_update = TRUE
             ORDER BY last_update ASC, {id} ASC
             LIMIT $1",
            table = game_type.table()
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.db.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(QueuedRow {
                id: row.try_get(0)?,
                release_date: row.try_get(1)?,
                last_update: row.try_get(2)?,
            });
        }
        Ok(out)
    }

    async fn enqueue(&self, game_type: GameType, ids: &[i64]) -> StoreResult<u64> {
        let ids = dedup_ids(ids);
        if ids.is_empty() {
            return Ok(0);
        }
        let id = game_type.id_column();
        let sql = format!(
            "INSERT INTO {table} ({id}, queued_for_update)
             SELECT UNNEST($1::BIGINT[]), TRUE
             ON CONFLICT ({id}) DO UPDATE SET queued_for_update = TRUE",
            table = game_type.table()
        );
        let done = sqlx::query(&sql).bind(&ids).execute(&self.db.pool).await?;
        Ok(done.rows_affected())
    }

    async fn unqueue(&self, game_type: GameType, ids: &[i64]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE {table} SET queued_for_update = FALSE WHERE {id} = ANY($1)",
            table = game_type.table(),
            id = game_type.id_column()
        );
        let done = sqlx::query(&sql).bind(ids).execute(&self.db.pool).await?;
        Ok(done.rows_affected())
    }

    async fn remove(&self, game_type: GameType, ids: &[i64]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM {table} WHERE {id} = ANY($1)",
            table = game_type.table(),
            id = game_type.id_column()
        );
        let done = sqlx::query(&sql).bind(ids).execute(&self.db.pool).await?;
        Ok(done.rows_affected())
    }

    async fn apply_upsert(&self, set: &UpsertSet) -> StoreResult<()> {
        let game = set.record.game_ref();
        let mut tx = self.db.pool.begin().await?;
        match &set.record {
            RecordRow::App(row) => {
                sqlx::query(
                    "INSERT INTO games__app (app_id, released, removed, steam_cloud,
                        trading_cards, learning, multiplayer, singleplayer, linux, mac, windows,
                        achievements, price, metacritic_score, metacritic_id, rating_percentage,
                        rating_count, release_date, last_update, queued_for_update)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                        $17, $18, $19, FALSE)
                     ON CONFLICT (app_id) DO UPDATE SET
                        released = EXCLUDED.released,
                        removed = EXCLUDED.removed,
                        steam_cloud = EXCLUDED.steam_cloud,
                        trading_cards = EXCLUDED.trading_cards,
                        learning = EXCLUDED.learning,
                        multiplayer = EXCLUDED.multiplayer,
                        singleplayer = EXCLUDED.singleplayer,
                        linux = EXCLUDED.linux,
                        mac = EXCLUDED.mac,
                        windows = EXCLUDED.windows,
                        achievements = EXCLUDED.achievements,
                        price = EXCLUDED.price,
                        metacritic_score = EXCLUDED.metacritic_score,
                        metacritic_id = EXCLUDED.metacritic_id,
                        rating_percentage = EXCLUDED.rating_percentage,
                        rating_count = EXCLUDED.rating_count,
                        release_date = EXCLUDED.release_date,
                        last_update = EXCLUDED.last_update,
                        queued_for_update = FALSE",
                )
                .bind(row.app_id)
                .bind(row.released)
                .bind(row.removed)
                .bind(row.steam_cloud)
                .bind(row.trading_cards)
                .bind(row.learning)
                .bind(row.multiplayer)
                .bind(row.singleplayer)
                .bind(row.linux)
                .bind(row.mac)
                .bind(row.windows)
                .bind(row.achievements)
                .bind(row.price)
                .bind(row.metacritic_score)
                .bind(&row.metacritic_id)
                .bind(row.rating_percentage)
                .bind(row.rating_count)
                .bind(row.release_date)
                .bind(set.last_update)
                .execute(&mut *tx)
                .await?;
            }
            RecordRow::Sub(row) => {
                sqlx::query(
                    "INSERT INTO games__sub (sub_id, released, removed, price, release_date,
                        last_update, queued_for_update)
                     VALUES ($1, $2, $3, $4, $5, $6, FALSE)
                     ON CONFLICT (sub_id) DO UPDATE SET
                        released = EXCLUDED.released,
                        removed = EXCLUDED.removed,
                        price = EXCLUDED.price,
                        release_date = EXCLUDED.release_date,
                        last_update = EXCLUDED.last_update,
                        queued_for_update = FALSE",
                )
                .bind(row.sub_id)
                .bind(row.released)
                .bind(row.removed)
                .bind(row.price)
                .bind(row.release_date)
                .bind(set.last_update)
                .execute(&mut *tx)
                .await?;
            }
        }

        if let Some(name) = &set.name {
            let names = [(game.id, name.clone())];
            Self::insert_labels(
                &mut tx,
                game.game_type.name_table(),
                (game.game_type.id_column(), "name"),
                &names,
            )
            .await?;
        }

        let genres: Vec<(i64, String)> =
            set.genres.iter().map(|g| (g.id, g.name.clone())).collect();
        Self::insert_labels(&mut tx, "games__genre", ("genre_id", "name"), &genres).await?;
        let app_genres: Vec<(i64, i64)> = set.genres.iter().map(|g| (game.id, g.id)).collect();
        Self::insert_pairs(&mut tx, "games__app_genre", ("app_id", "genre_id"), &app_genres).await?;

        let tags: Vec<(i64, String)> = set.tags.iter().map(|t| (t.id, t.name.clone())).collect();
        Self::insert_labels(&mut tx, "games__tag", ("tag_id", "name"), &tags).await?;
        let app_tags: Vec<(i64, i64)> = set.tags.iter().map(|t| (game.id, t.id)).collect();
        Self::insert_pairs(&mut tx, "games__app_tag", ("app_id", "tag_id"), &app_tags).await?;

        Self::insert_pairs(&mut tx, "games__dlc", ("dlc_id", "app_id"), &set.dlc_links).await?;
        Self::insert_pairs(&mut tx, "games__sub_app", ("sub_id", "app_id"), &set.sub_apps).await?;
        Self::insert_pairs(&mut tx, "games__bundle_app", ("bundle_id", "app_id"), &set.bundle_apps)
            .await?;

        tx.commit().await?;
        debug!(%game, "upsert committed");
        Ok(())
    }

    async fn mark_removed(&self, game: GameRef, now: i64) -> StoreResult<()> {
        if game.game_type == GameType::Bundle {
            return Err(StoreError::Backend("bundles carry no removed flag".into()));
        }
        let id = game.game_type.id_column();
        let sql = format!(
            "INSERT INTO {table} ({id}, removed, last_update, queued_for_update)
             VALUES ($1, TRUE, $2, FALSE)
             ON CONFLICT ({id}) DO UPDATE SET
                removed = TRUE,
                last_update = EXCLUDED.last_update,
                queued_for_update = FALSE",
            table = game.game_type.table()
        );
        sqlx::query(&sql)
            .bind(game.id)
            .bind(now)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn load_apps(&self, ids: &[i64]) -> StoreResult<Vec<StoredApp>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records: Vec<AppRecord> = sqlx::query_as(
            "SELECT a.app_id, n.name, a.released, a.removed, a.steam_cloud, a.trading_cards,
                a.learning, a.multiplayer, a.singleplayer, a.linux, a.mac, a.windows,
                a.achievements, a.price, a.metacritic_score, a.metacritic_id,
                a.rating_percentage, a.rating_count, a.release_date, d.app_id AS base,
                a.last_update, a.queued_for_update
             FROM games__app a
             LEFT JOIN games__app_name n ON n.app_id = a.app_id
             LEFT JOIN games__dlc d ON d.dlc_id = a.app_id
             WHERE a.app_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.db.pool)
        .await?;

        let mut genres: HashMap<i64, Vec<String>> = self
            .grouped(
                "SELECT ag.app_id, array_agg(g.name ORDER BY g.name)
                 FROM games__app_genre ag JOIN games__genre g ON g.genre_id = ag.genre_id
                 WHERE ag.app_id = ANY($1) GROUP BY ag.app_id",
                ids,
            )
            .await?;
        let mut tags: HashMap<i64, Vec<String>> = self
            .grouped(
                "SELECT at.app_id, array_agg(t.name ORDER BY t.name)
                 FROM games__app_tag at JOIN games__tag t ON t.tag_id = at.tag_id
                 WHERE at.app_id = ANY($1) GROUP BY at.app_id",
                ids,
            )
            .await?;
        let mut dlcs: HashMap<i64, Vec<i64>> = self
            .grouped(
                "SELECT app_id, array_agg(dlc_id ORDER BY dlc_id) FROM games__dlc
                 WHERE app_id = ANY($1) GROUP BY app_id",
                ids,
            )
            .await?;
        let mut subs: HashMap<i64, Vec<i64>> = self
            .grouped(
                "SELECT app_id, array_agg(sub_id ORDER BY sub_id) FROM games__sub_app
                 WHERE app_id = ANY($1) GROUP BY app_id",
                ids,
            )
            .await?;
        let mut bundles: HashMap<i64, Vec<i64>> = self
            .grouped(
                "SELECT app_id, array_agg(bundle_id ORDER BY bundle_id) FROM games__bundle_app
                 WHERE app_id = ANY($1) GROUP BY app_id",
                ids,
            )
            .await?;

        Ok(records
            .into_iter()
            .map(|r| StoredApp {
                genres: genres.remove(&r.app_id).unwrap_or_default(),
                tags: tags.remove(&r.app_id).unwrap_or_default(),
                dlcs: dlcs.remove(&r.app_id).unwrap_or_default(),
                subs: subs.remove(&r.app_id).unwrap_or_default(),
                bundles: bundles.remove(&r.app_id).unwrap_or_default(),
                app_id: r.app_id,
                name: r.name,
                released: r.released,
                removed: r.removed,
                steam_cloud: r.steam_cloud,
                trading_cards: r.trading_cards,
                learning: r.learning,
                multiplayer: r.multiplayer,
                singleplayer: r.singleplayer,
                linux: r.linux,
                mac: r.mac,
                windows: r.windows,
                achievements: r.achievements,
                price: r.price,
                metacritic_score: r.metacritic_score,
                metacritic_id: r.metacritic_id,
                rating_percentage: r.rating_percentage,
                rating_count: r.rating_count,
                release_date: r.release_date,
                base: r.base,
                last_update: r.last_update,
                queued_for_update: r.queued_for_update,
            })
            .collect())
    }

    async fn load_subs(&self, ids: &[i64]) -> StoreResult<Vec<StoredSub>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records: Vec<SubRecord> = sqlx::query_as(
            "SELECT s.sub_id, n.name, s.released, s.removed, s.price, s.release_date,
                s.last_update, s.queued_for_update
             FROM games__sub s
             LEFT JOIN games__sub_name n ON n.sub_id = s.sub_id
             WHERE s.sub_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.db.pool)
        .await?;
        let mut apps: HashMap<i64, Vec<i64>> = self
            .grouped(
                "SELECT sub_id, array_agg(app_id ORDER BY app_id) FROM games__sub_app
                 WHERE sub_id = ANY($1) GROUP BY sub_id",
                ids,
            )
            .await?;
        Ok(records
            .into_iter()
            .map(|r| StoredSub {
                apps: apps.remove(&r.sub_id).unwrap_or_default(),
                sub_id: r.sub_id,
                name: r.name,
                released: r.released,
                removed: r.removed,
                price: r.price,
                release_date: r.release_date,
                last_update: r.last_update,
                queued_for_update: r.queued_for_update,
            })
            .collect())
    }

    async fn queue_counts(&self, users_checked_before: i64) -> StoreResult<QueueCounts> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM games__app WHERE queued_for_update = TRUE),
                (SELECT COUNT(*) FROM games__sub WHERE queued_for_update = TRUE),
                (SELECT COUNT(*) FROM games__bundle WHERE queued_for_update = TRUE),
                (SELECT COUNT(*) FROM users__uh WHERE last_check <= $1)",
        )
        .bind(users_checked_before)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(QueueCounts {
            apps: row.try_get(0)?,
            subs: row.try_get(1)?,
            bundles: row.try_get(2)?,
            users: row.try_get(3)?,
        })
    }

    async fn reset_found(&self, kinds: &[TimelineKind]) -> StoreResult<u64> {
        let mut tx = self.db.pool.begin().await?;
        let mut touched = 0;
        for kind in kinds {
            for table in TimelineKind::GAME_TYPES.iter().filter_map(|t| kind.table(*t)) {
                let done = sqlx::query(&format!("UPDATE {table} SET found = FALSE"))
                    .execute(&mut *tx)
                    .await?;
                touched += done.rows_affected();
            }
        }
        tx.commit().await?;
        Ok(touched)
    }

    async fn seed_gift_ids(&self, entries: &[GiftIdEntry]) -> StoreResult<u64> {
        let mut tx = self.db.pool.begin().await?;
        let mut inserted = 0;
        let by_type = entries.iter().into_group_map_by(|e| e.game.game_type);
        for (game_type, group) in by_type {
            let Some(table) = game_type.gift_table() else {
                continue;
            };
            let rows: Vec<(i64, String)> =
                group.iter().map(|e| (e.game.id, e.gift_id.clone())).collect();
            inserted +=
                Self::insert_labels(&mut tx, table, (game_type.id_column(), "sg_id"), &rows).await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn apply_listing_page(&self, page: &ListingPage, added_date: i64) -> StoreResult<()> {
        let mut tx = self.db.pool.begin().await?;

        let names_by_type = page.names.iter().into_group_map_by(|n| n.game.game_type);
        for (game_type, names) in names_by_type {
            let rows: Vec<(i64, String)> =
                names.iter().map(|n| (n.game.id, n.name.clone())).collect();
            Self::insert_labels(
                &mut tx,
                game_type.name_table(),
                (game_type.id_column(), "name"),
                &rows,
            )
            .await?;
        }

        let timeline_groups = page
            .timeline
            .iter()
            .into_group_map_by(|e| (e.kind, e.game.game_type, e.mark_found));
        for ((kind, game_type, mark_found), entries) in timeline_groups {
            let Some(table) = kind.table(game_type) else {
                continue;
            };
            Self::upsert_timeline(
                &mut tx,
                table,
                game_type.id_column(),
                mark_found,
                &entries,
                added_date,
            )
            .await?;
        }

        let gifts_by_type = page.gift_ids.iter().into_group_map_by(|g| g.game.game_type);
        for (game_type, gifts) in gifts_by_type {
            let Some(table) = game_type.gift_table() else {
                continue;
            };
            let rows: Vec<(i64, String)> =
                gifts.iter().map(|g| (g.game.id, g.gift_id.clone())).collect();
            Self::insert_labels(&mut tx, table, (game_type.id_column(), "sg_id"), &rows).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn finalize_listing(
        &self,
        kinds: &[TimelineKind],
        ledger_keys: &[&str],
        now: i64,
    ) -> StoreResult<u64> {
        let mut tx = self.db.pool.begin().await?;
        let mut deleted = 0;
        for kind in kinds {
            for table in TimelineKind::GAME_TYPES.iter().filter_map(|t| kind.table(*t)) {
                let done = sqlx::query(&format!("DELETE FROM {table} WHERE found = FALSE"))
                    .execute(&mut *tx)
                    .await?;
                deleted += done.rows_affected();
            }
        }
        for key in ledger_keys {
            Self::upsert_ledger(&mut tx, key, now).await?;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn users_due(&self, checked_before: i64, limit: usize) -> StoreResult<Vec<UserHistory>> {
        let rows = sqlx::query(
            "SELECT steam_id, usernames, last_check, last_update FROM users__uh
             WHERE last_check <= $1
             ORDER BY last_check ASC, steam_id ASC
             LIMIT $2",
        )
        .bind(checked_before)
        .bind(limit as i64)
        .fetch_all(&self.db.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let joined: String = row.try_get("usernames")?;
            out.push(UserHistory {
                steam_id: row.try_get("steam_id")?,
                usernames: UserHistory::parse_usernames(&joined),
                last_check: row.try_get("last_check")?,
                last_update: row.try_get("last_update")?,
            });
        }
        Ok(out)
    }

    async fn save_user_histories(&self, histories: &[UserHistory]) -> StoreResult<()> {
        if histories.is_empty() {
            return Ok(());
        }
        let mut tx = self.db.pool.begin().await?;
        let latest: HashMap<&str, &UserHistory> =
            histories.iter().map(|h| (h.steam_id.as_str(), h)).collect();
        let latest: Vec<&UserHistory> = latest.into_values().collect();
        for chunk in latest.chunks(INSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO users__uh (steam_id, usernames, last_check, last_update) ",
            );
            qb.push_values(chunk.iter(), |mut b, h| {
                b.push_bind(h.steam_id.clone())
                    .push_bind(h.joined_usernames())
                    .push_bind(h.last_check)
                    .push_bind(h.last_update);
            });
            qb.push(
                " ON CONFLICT (steam_id) DO UPDATE SET
                    usernames = EXCLUDED.usernames,
                    last_check = EXCLUDED.last_check,
                    last_update = EXCLUDED.last_update",
            );
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_timeline(
        &self,
        kind: TimelineKind,
        game_type: GameType,
        filter: &TimelineFilter,
    ) -> StoreResult<Vec<TimelineRecord>> {
        let Some(table) = kind.table(game_type) else {
            return Ok(Vec::new());
        };
        let id = game_type.id_column();
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT t.{id} AS id, n.name, t.effective_date, t.added_date
             FROM {table} t
             LEFT JOIN {names} n ON n.{id} = t.{id}
             WHERE TRUE",
            names = game_type.name_table()
        ));
        if !filter.ids.is_empty() {
            qb.push(format!(" AND t.{id} = ANY("))
                .push_bind(filter.ids.clone())
                .push(")");
        }
        if let Some(from) = filter.from {
            qb.push(" AND t.effective_date >= ").push_bind(from);
        }
        if let Some(until) = filter.until {
            qb.push(" AND t.effective_date < ").push_bind(until);
        }
        match filter.recent {
            Some(limit) => {
                qb.push(format!(" ORDER BY t.added_date DESC, t.{id} DESC LIMIT "))
                    .push_bind(limit as i64);
            }
            None => {
                qb.push(format!(" ORDER BY t.{id}"));
            }
        }
        let records: Vec<TimelineRecordRow> =
            qb.build_query_as().fetch_all(&self.db.pool).await?;
        Ok(records
            .into_iter()
            .map(|r| TimelineRecord {
                id: r.id,
                name: r.name,
                effective_date: r.effective_date,
                added_date: r.added_date,
            })
            .collect())
    }

    async fn load_gift_ids(
        &self,
        game_type: GameType,
        ids: &[i64],
    ) -> StoreResult<Vec<GiftIdRecord>> {
        let Some(table) = game_type.gift_table() else {
            return Ok(Vec::new());
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id = game_type.id_column();
        let rows: Vec<(i64, String)> = sqlx::query_as(&format!(
            "SELECT {id}, sg_id FROM {table} WHERE {id} = ANY($1) ORDER BY {id}"
        ))
        .bind(ids)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, sg_id)| GiftIdRecord { id, sg_id })
            .collect())
    }

    async fn load_user(&self, steam_id: &str) -> StoreResult<Option<UserHistory>> {
        let row = sqlx::query(
            "SELECT steam_id, usernames, last_check, last_update FROM users__uh
             WHERE steam_id = $1",
        )
        .bind(steam_id)
        .fetch_optional(&self.db.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let joined: String = row.try_get("usernames")?;
        Ok(Some(UserHistory {
            steam_id: row.try_get("steam_id")?,
            usernames: UserHistory::parse_usernames(&joined),
            last_check: row.try_get("last_check")?,
            last_update: row.try_get("last_update")?,
        }))
    }

    async fn track_user(&self, steam_id: &str) -> StoreResult<bool> {
        let done = sqlx::query(
            "INSERT INTO users__uh (steam_id, usernames, last_check, last_update)
             VALUES ($1, '', 0, 0)
             ON CONFLICT (steam_id) DO NOTHING",
        )
        .bind(steam_id)
        .execute(&self.db.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn record_timestamp(&self, name: &str, at: i64) -> StoreResult<()> {
        let mut tx = self.db.pool.begin().await?;
        Self::upsert_ledger(&mut tx, name, at).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn timestamps(&self) -> StoreResult<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT name, date FROM timestamps ORDER BY name")
                .fetch_all(&self.db.pool)
                .await?;
        Ok(rows)
    }
}
