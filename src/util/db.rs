use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    Connection, PgConnection, PgPool, Row,
};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::env::{env_flag, env_parse_opt};

/// Share of the server's `max_connections` a job process may claim when
/// `DB_MAX_CONNS` is not configured.
const POOL_SHARE_OF_SERVER_LIMIT: f64 = 0.9;
const FALLBACK_MAX_CONNS: u32 = 10;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = Self::connect_no_migrate(database_url, max_connections).await?;

        // Default off: jobs and the API must be able to run against a schema managed elsewhere.
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on, custom runner)");
            Self::run_migrations(&db.pool, Path::new("./migrations")).await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(db)
    }

    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect_no_migrate(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options = Self::connect_options(database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("failed to open postgres pool")?;
        info!(max_connections, "connected to db");
        Ok(Self { pool })
    }

    /// Pool size from `DB_MAX_CONNS`, or a share of the server limit read once.
    #[instrument(skip(database_url))]
    pub async fn resolve_pool_size(database_url: &str) -> Result<u32> {
        if let Some(configured) = env_parse_opt::<u32>("DB_MAX_CONNS") {
            return Ok(configured.max(1));
        }
        let mut conn = PgConnection::connect_with(&Self::connect_options(database_url)?)
            .await
            .context("failed to open sizing connection")?;
        let server_setting = sqlx::query("SHOW max_connections")
            .fetch_one(&mut conn)
            .await
            .and_then(|row| row.try_get::<String, _>(0));
        let _ = conn.close().await;
        match server_setting.ok().and_then(|raw| raw.trim().parse::<u32>().ok()) {
            Some(server_limit) => {
                let size = ((server_limit as f64) * POOL_SHARE_OF_SERVER_LIMIT).floor() as u32;
                info!(server_limit, pool_size = size, "sized pool from server max_connections");
                Ok(size.max(1))
            }
            None => {
                warn!(
                    fallback = FALLBACK_MAX_CONNS,
                    "could not read server max_connections; using fallback pool size"
                );
                Ok(FALLBACK_MAX_CONNS)
            }
        }
    }

    fn connect_options(database_url: &str) -> Result<PgConnectOptions> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("invalid database url")?;
        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        if !env_flag("USE_PREPARED", true) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }
        Ok(connect_options)
    }
}

impl Db {
    /// Applies `NNNN_description.sql` files from `dir` in version order, recording each
    /// in `_sqlx_migrations`. Files without a numeric prefix are ignored.
    pub async fn run_migrations(pool: &PgPool, dir: &Path) -> Result<()> {
        if !dir.exists() {
            warn!(dir = %dir.display(), "migrations directory missing; nothing to apply");
            return Ok(());
        }
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(pool)
        .await?;
        let applied_rows = sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
            .fetch_all(pool)
            .await?;
        let mut applied: HashSet<i64> = HashSet::new();
        for r in applied_rows {
            applied.insert(r.try_get::<i64, _>(0)?);
        }

        let mut candidates: Vec<(i64, String, std::path::PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some((version, desc)) = parse_migration_name(fname) {
                candidates.push((version, desc, path.clone()));
            }
        }
        candidates.sort_by_key(|(v, _, _)| *v);

        for (version, desc, path) in candidates {
            if applied.contains(&version) {
                continue;
            }
            let sql = std::fs::read_to_string(&path)?;
            info!(version, file = ?path, "applying migration");
            let mut tx = pool.begin().await?;
            sqlx::raw_sql(sql.trim()).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO _sqlx_migrations (version, description) VALUES ($1, $2)")
                .bind(version)
                .bind(&desc)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            applied.insert(version);
        }
        info!(applied = applied.len(), "migrations up-to-date (custom)");
        Ok(())
    }
}

// pattern: digits '_' rest '.sql'
fn parse_migration_name(fname: &str) -> Option<(i64, String)> {
    let stem = fname.strip_suffix(".sql")?;
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let desc = stem[digits.len()..].strip_prefix('_')?;
    Some((digits.parse().ok()?, desc.to_string()))
}
