// HTTP lookup server for the catalog cache

use anyhow::Result;
use std::sync::Arc;
use steam_catalog_cache::api::ApiServer;
use steam_catalog_cache::database_ops::lookup::LookupService;
use steam_catalog_cache::database_ops::store::PgStore;
use steam_catalog_cache::tracing::{init_tracing, DEFAULT_FILTER};
use steam_catalog_cache::util::db::Db;
use steam_catalog_cache::util::env as env_util;

#[actix_web::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;

    tracing::info!("Initializing catalog cache API server");

    let server = ApiServer::from_env()?;

    let database_url = env_util::db_url()?;
    let max_connections = Db::resolve_pool_size(&database_url).await?;
    let db = Db::connect(&database_url, max_connections).await?;

    tracing::info!("Database connected successfully");

    let lookup = LookupService::new(Arc::new(PgStore::new(db)));
    server.run(lookup).await?;

    Ok(())
}
