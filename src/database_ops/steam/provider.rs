use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header::COOKIE, Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::parse::{self, SOURCE};
use crate::database_ops::error::SourceError;
use crate::database_ops::http::{build_client, send_with_backoff, text_body, RATE_LIMIT_LADDER};
use crate::database_ops::model::{Fetched, GameRef};
use crate::database_ops::source::DetailSource;
use crate::util::env::{env_base_url, env_parse};

pub const DEFAULT_STORE_BASE: &str = "https://store.steampowered.com";

const APP_FILTERS: &str =
    "achievements,basic,categories,genres,metacritic,name,packages,platforms,price_overview,release_date";
const SUB_FILTERS: &str = "apps,basic,name,price,release_date";
/// Skips the age gate so mature titles render their real page.
const AGE_GATE_COOKIE: &str = "birthtime=0; mature_content=1;";

/// Steam store gateway: the JSON details API plus the public store page.
/// Env: STEAM_STORE_BASE (default store.steampowered.com), STEAM_HTTP_TIMEOUT_SECS (default 15)
#[derive(Debug, Clone)]
pub struct SteamStore {
    client: Client,
    base: Url,
    ladder: Vec<Duration>,
}

impl SteamStore {
    pub fn new(base_url: Option<&str>, timeout_secs: Option<u64>) -> anyhow::Result<Self> {
        let raw = base_url.unwrap_or(DEFAULT_STORE_BASE).trim_end_matches('/');
        let base = Url::parse(&format!("{raw}/"))?;
        Ok(Self {
            client: build_client(timeout_secs.unwrap_or(15))
                .context("failed to build steam http client")?,
            base,
            ladder: RATE_LIMIT_LADDER.to_vec(),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let base = env_base_url("STEAM_STORE_BASE", DEFAULT_STORE_BASE);
        Self::new(Some(&base), Some(env_parse("STEAM_HTTP_TIMEOUT_SECS", 15u64)))
    }

    /// Replaces the 429 retry ladder.
    pub fn with_backoff(mut self, ladder: Vec<Duration>) -> Self {
        self.ladder = ladder;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base
            .join(path)
            .map_err(|e| SourceError::transient(SOURCE, format!("bad url {path}: {e}")))
    }

    async fn details(
        &self,
        game: GameRef,
        path: &str,
        id_param: &str,
        filters: &str,
    ) -> Result<Value, SourceError> {
        let url = self.endpoint(path)?;
        let id = game.id.to_string();
        let resp = send_with_backoff(SOURCE, &self.ladder, || {
            self.client.get(url.clone()).query(&[
                (id_param, id.as_str()),
                ("filters", filters),
                ("cc", "us"),
                ("l", "en"),
            ])
        })
        .await?;
        match resp.status() {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                return Err(SourceError::not_found(game, format!("details HTTP {}", resp.status())));
            }
            status if !status.is_success() => {
                return Err(SourceError::transient(SOURCE, format!("details HTTP {status}")));
            }
            _ => {}
        }
        resp.json::<Value>()
            .await
            .map_err(|e| SourceError::transient(SOURCE, format!("details body for {game}: {e}")))
    }

    /// Store page body plus whether the store redirected away from it.
    async fn store_page(&self, game: GameRef) -> Result<(String, bool), SourceError> {
        let kind = game.game_type.as_str();
        let url = self.endpoint(&format!("{kind}/{}", game.id))?;
        let resp: Response = send_with_backoff(SOURCE, &self.ladder, || {
            self.client
                .get(url.clone())
                .query(&[("cc", "us"), ("l", "en")])
                .header(COOKIE, AGE_GATE_COOKIE)
        })
        .await?;
        let removed = parse::is_removed(resp.url(), &self.base, kind, game.id);
        let html = text_body(SOURCE, resp).await?;
        if html.trim().is_empty() {
            return Err(SourceError::transient(SOURCE, format!("empty store page for {game}")));
        }
        Ok((html, removed))
    }
}

#[async_trait]
impl DetailSource for SteamStore {
    async fn fetch_app(&self, app_id: i64) -> Result<Fetched, SourceError> {
        let game = GameRef::app(app_id);
        let body = self.details(game, "api/appdetails", "appids", APP_FILTERS).await?;
        let data = parse::app_api(&body, app_id)?;
        let (html, removed) = self.store_page(game).await?;
        let page = parse::store_page(&html);
        debug!(app_id, removed, page_ok = page.ok, tags = page.tags.len(), "store page read");
        Ok(Fetched::App(parse::build_app(app_id, data, &page, removed)))
    }

    async fn fetch_sub(&self, sub_id: i64) -> Result<Fetched, SourceError> {
        let game = GameRef::sub(sub_id);
        let body = self
            .details(game, "api/packagedetails", "packageids", SUB_FILTERS)
            .await?;
        let data = parse::sub_api(&body, sub_id)?;
        let (_, removed) = self.store_page(game).await?;
        debug!(sub_id, removed, "store page read");
        Ok(Fetched::Sub(parse::build_sub(sub_id, data, removed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const APP_PAGE: &str = r#"<html><body><div class="apphub_AppName">Portal</div>
        <div id="userReviews"><div class="user_reviews_summary_row" data-tooltip-html="97% of the 2,000 user reviews for this game are positive."></div></div>
        </body></html>"#;

    fn gateway(server: &MockServer) -> SteamStore {
        SteamStore::new(Some(&server.uri()), Some(5))
            .unwrap()
            .with_backoff(vec![Duration::from_millis(1)])
    }

    #[tokio::test]
    async fn test_provider_initialization() {
        let store = SteamStore::new(None, Some(15)).unwrap();
        assert_eq!(store.base.as_str(), "https://store.steampowered.com/");
        assert_eq!(store.ladder.len(), 4);
    }

    #[tokio::test]
    async fn fetches_app_from_api_and_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/appdetails"))
            .and(query_param("appids", "400"))
            .and(query_param("cc", "us"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "400": {"success": true, "data": {
                    "type": "game",
                    "name": "Portal",
                    "categories": [{"id": 2, "description": "Single-player"}],
                    "platforms": {"windows": true, "mac": true, "linux": true},
                    "price_overview": {"initial": 999},
                    "release_date": {"coming_soon": false, "date": "10 Oct, 2007"}
                }}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/app/400"))
            .and(header("cookie", AGE_GATE_COOKIE))
            .respond_with(ResponseTemplate::new(200).set_body_string(APP_PAGE))
            .mount(&server)
            .await;

        let fetched = gateway(&server).fetch_app(400).await.unwrap();
        let Fetched::App(app) = fetched else {
            panic!("expected an app");
        };
        assert_eq!(app.name, "Portal");
        assert!(!app.removed);
        assert_eq!(app.learning, Some(false));
        assert_eq!(app.rating_percentage, Some(97));
        assert_eq!(app.rating_count, Some(2000));
        assert_eq!(app.price, 999);
    }

    #[tokio::test]
    async fn unsuccessful_details_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packagedetails"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"12": {"success": false}})),
            )
            .mount(&server)
            .await;
        let err = gateway(&server).fetch_sub(12).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/appdetails"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let err = gateway(&server).fetch_app(1).await.unwrap_err();
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn redirect_off_the_sub_page_means_removed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packagedetails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "54029": {"success": true, "data": {
                    "name": "Retired Pack",
                    "apps": [{"id": 10, "name": "Counter-Strike"}],
                    "price": {"initial": 1999},
                    "release_date": {"coming_soon": false, "date": ""}
                }}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sub/54029"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", format!("{}/", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>home</html>"))
            .mount(&server)
            .await;

        let Fetched::Sub(sub) = gateway(&server).fetch_sub(54029).await.unwrap() else {
            panic!("expected a sub");
        };
        assert!(sub.removed);
        assert_eq!(sub.apps, vec![10]);
        assert_eq!(sub.price, 1999);
        assert_eq!(sub.release_date, None);
    }
}
