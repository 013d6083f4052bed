use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use steam_catalog_cache::database_ops::checkpoint::FileCheckpoint;
use steam_catalog_cache::database_ops::error::SourceError;
use steam_catalog_cache::database_ops::model::{Fetched, GameRef, GameType};
use steam_catalog_cache::database_ops::reconcile;
use steam_catalog_cache::database_ops::refresh::{run_games, BatchRefreshDriver, RefreshConfig};
use steam_catalog_cache::database_ops::sgtools::SgToolsSnapshot;
use steam_catalog_cache::database_ops::source::{DetailSource, ListingSource};
use steam_catalog_cache::database_ops::steam::SteamStore;
use steam_catalog_cache::database_ops::steamgifts::{
    BundleGamesHtml, BundleGamesJson, GiveawayIds, SteamGifts,
};
use steam_catalog_cache::database_ops::store::{CacheStore, PgStore};
use steam_catalog_cache::database_ops::sync::PaginatedSyncJob;
use steam_catalog_cache::database_ops::user_history::{UserHistoryJob, DEFAULT_BATCH_SIZE};
use steam_catalog_cache::tracing::{init_tracing, DEFAULT_FILTER};
use steam_catalog_cache::util::db::Db;
use steam_catalog_cache::util::env as env_util;

#[derive(Parser, Debug)]
#[command(name = "steam-catalog-cache", version, about = "Steam catalog cache jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Drain the app queue, then the sub queue
    Games,
    /// Drain the queue of one game type
    Refresh {
        #[arg(long = "type", value_enum)]
        game_type: TypeArg,
        /// Override the configured batch size
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Fetch and store a single app or sub right now
    Fetch {
        #[arg(long = "type", value_enum)]
        game_type: TypeArg,
        #[arg(long)]
        id: i64,
    },
    /// Walk a community listing from its saved page cursor
    Sync {
        #[arg(value_enum)]
        source: SyncSource,
    },
    /// Re-resolve SteamGifts usernames that are due for a check
    UserHistory,
    /// Apply ./migrations regardless of AUTO_MIGRATE
    Migrate,
    /// Print the job ledger
    Timestamps,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum TypeArg {
    App,
    Sub,
}

impl From<TypeArg> for GameType {
    fn from(value: TypeArg) -> Self {
        match value {
            TypeArg::App => GameType::App,
            TypeArg::Sub => GameType::Sub,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum SyncSource {
    /// SteamGifts bundle-games JSON: reduced and no-value timelines
    RncvSg,
    /// SteamGifts bundle-games HTML table: reduced timeline
    RcvSg,
    /// SteamGifts giveaway ids
    Sgids,
    /// SGTools lastBundled feed
    RcvSgtools,
}

fn listing_source(which: SyncSource) -> Result<Box<dyn ListingSource>> {
    Ok(match which {
        SyncSource::RncvSg => Box::new(BundleGamesJson::new(SteamGifts::from_env()?)),
        SyncSource::RcvSg => Box::new(BundleGamesHtml::new(SteamGifts::from_env()?)),
        SyncSource::Sgids => Box::new(GiveawayIds::from_env(SteamGifts::from_env()?)),
        SyncSource::RcvSgtools => Box::new(SgToolsSnapshot::from_env()?),
    })
}

fn job_delay() -> Duration {
    Duration::from_millis(env_util::env_parse("REFRESH_DELAY_MS", 1000u64))
}

async fn open_store() -> Result<PgStore> {
    let database_url = env_util::db_url()?;
    let max_connections = Db::resolve_pool_size(&database_url).await?;
    let db = Db::connect(&database_url, max_connections)
        .await
        .context("connecting job store")?;
    Ok(PgStore::new(db))
}

async fn fetch_one(store: &dyn CacheStore, source: &dyn DetailSource, game: GameRef) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    match source.fetch(game).await {
        Ok(fetched) => {
            reconcile::reconcile(store, &fetched, now).await?;
            println!("{}", serde_json::to_string_pretty(&fetched_summary(&fetched))?);
        }
        Err(SourceError::PermanentNotFound { reason, .. }) => {
            warn!(%game, %reason, "not available upstream");
            reconcile::mark_removed(store, game, now).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn fetched_summary(fetched: &Fetched) -> serde_json::Value {
    match fetched {
        Fetched::App(app) => serde_json::to_value(app).unwrap_or_default(),
        Fetched::Sub(sub) => serde_json::to_value(sub).unwrap_or_default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Games => {
            let store = open_store().await?;
            let steam = SteamStore::from_env()?;
            let (apps, subs) = run_games(
                &store,
                &steam,
                RefreshConfig::from_env(GameType::App),
                RefreshConfig::from_env(GameType::Sub),
            )
            .await
            .inspect_err(|e| error!(error = %e, "games job stopped"))?;
            info!(?apps, ?subs, "games job done");
        }
        Commands::Refresh {
            game_type,
            batch_size,
        } => {
            let store = open_store().await?;
            let steam = SteamStore::from_env()?;
            let mut cfg = RefreshConfig::from_env(game_type.into());
            if let Some(size) = batch_size {
                cfg = cfg.with_batch_size(size);
            }
            let report = BatchRefreshDriver::new(&store, &steam, cfg).run().await?;
            info!(?report, "refresh done");
        }
        Commands::Fetch { game_type, id } => {
            let store = open_store().await?;
            let steam = SteamStore::from_env()?;
            let game = GameRef {
                game_type: game_type.into(),
                id,
            };
            fetch_one(&store, &steam, game).await?;
        }
        Commands::Sync { source } => {
            let store = open_store().await?;
            let dir = env_util::env_opt("CHECKPOINT_DIR")
                .unwrap_or_else(|| "./checkpoints".to_string());
            let checkpoint = FileCheckpoint::new(dir);
            let listing = listing_source(source)?;
            let report = PaginatedSyncJob::new(&store, &checkpoint, listing.as_ref(), job_delay())
                .run()
                .await
                .inspect_err(|e| error!(source = listing.name(), error = %e, "sync stopped"))?;
            info!(?report, "sync done");
        }
        Commands::UserHistory => {
            let store = open_store().await?;
            let sg = SteamGifts::from_env()?;
            let batch = env_util::env_parse("UH_BATCH_SIZE", DEFAULT_BATCH_SIZE);
            let report = UserHistoryJob::new(&store, &sg, batch, job_delay()).run().await?;
            info!(?report, "user history done");
        }
        Commands::Migrate => {
            let database_url = env_util::db_url()?;
            let db = Db::connect_no_migrate(&database_url, 2).await?;
            Db::run_migrations(&db.pool, Path::new("./migrations")).await?;
            info!("migrations applied");
        }
        Commands::Timestamps => {
            let store = open_store().await?;
            let rows: serde_json::Map<String, serde_json::Value> = store
                .timestamps()
                .await?
                .into_iter()
                .map(|(name, at)| (name, serde_json::Value::from(at)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}
