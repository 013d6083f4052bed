// actix-web server wiring for the lookup API

use crate::api::{middleware, routes};
use crate::database_ops::lookup::LookupService;
use crate::util::env::{env_opt, env_parse_opt};
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://localhost:8000";

/// Env: API_HOST, API_PORT, ALLOWED_ORIGINS
pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub allowed_origins: String,
}

impl ApiServer {
    pub fn from_env() -> Result<Self> {
        crate::util::env::init_env();

        let port = match env_opt("API_PORT") {
            Some(raw) => raw.trim().parse().context("Invalid API_PORT")?,
            None => DEFAULT_PORT,
        };
        Ok(Self {
            host: env_opt("API_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            allowed_origins: env_opt("ALLOWED_ORIGINS")
                .unwrap_or_else(|| DEFAULT_ORIGINS.to_string()),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serves until shutdown. Every worker shares the one lookup service.
    pub async fn run(self, lookup: LookupService) -> Result<()> {
        let bind_addr = self.bind_addr();
        tracing::info!(%bind_addr, origins = %self.allowed_origins, "starting lookup API");

        let lookup = web::Data::new(lookup);
        let origins = self.allowed_origins;
        let mut server = HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            App::new()
                .app_data(lookup.clone())
                .wrap(logger)
                .wrap(compress)
                .wrap(middleware::setup_cors(&origins))
                .configure(routes::configure_routes)
        });
        if let Some(workers) = env_parse_opt::<usize>("API_WORKERS") {
            server = server.workers(workers.max(1));
        }

        server
            .bind(&bind_addr)
            .with_context(|| format!("Failed to bind to {bind_addr}"))?
            .run()
            .await
            .context("HTTP server error")
    }
}
