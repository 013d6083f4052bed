//! SteamGifts gateway: community bundle listings, giveaway ids and username
//! resolution.

pub mod listing;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::database_ops::error::SourceError;
use crate::database_ops::http::{build_client, send_with_backoff, text_body, RATE_LIMIT_LADDER};
use crate::database_ops::model::{ledger, GiftIdEntry, ListingPage, TimelineKind};
use crate::database_ops::source::{ListingSource, UsernameSource};
use crate::util::env::{env_base_url, env_opt, env_parse};

pub const SOURCE: &str = "steamgifts";
pub const DEFAULT_BASE: &str = "https://www.steamgifts.com";
pub const DEFAULT_SNAPSHOT_URL: &str = "https://revadike.com/sgdb.json";
/// Username reported for accounts SteamGifts no longer resolves.
pub const DELETED_USER: &str = "[DELETED]";

/// Shared HTTP plumbing for every SteamGifts listing.
/// Env: STEAMGIFTS_BASE (default www.steamgifts.com), STEAM_HTTP_TIMEOUT_SECS
#[derive(Debug, Clone)]
pub struct SteamGifts {
    client: Client,
    base: String,
    ladder: Vec<Duration>,
}

impl SteamGifts {
    pub fn new(base_url: Option<&str>, timeout_secs: Option<u64>) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs.unwrap_or(15))
                .context("failed to build steamgifts http client")?,
            base: base_url.unwrap_or(DEFAULT_BASE).trim_end_matches('/').to_string(),
            ladder: RATE_LIMIT_LADDER.to_vec(),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let base = env_base_url("STEAMGIFTS_BASE", DEFAULT_BASE);
        Self::new(Some(&base), Some(env_parse("STEAM_HTTP_TIMEOUT_SECS", 15u64)))
    }

    pub fn with_backoff(mut self, ladder: Vec<Duration>) -> Self {
        self.ladder = ladder;
        self
    }

    async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let resp = send_with_backoff(SOURCE, &self.ladder, || self.client.get(url)).await?;
        text_body(SOURCE, resp).await
    }

    async fn get_json(&self, url: &str) -> Result<Value, SourceError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body)
            .map_err(|e| SourceError::transient(SOURCE, format!("unreadable json from {url}: {e}")))
    }

    fn search_url(&self, listing: &str, page: u32, json: bool) -> String {
        let format = if json { "&format=json" } else { "" };
        format!("{}/{listing}/search?page={page}{format}", self.base)
    }
}

#[async_trait]
impl UsernameSource for SteamGifts {
    async fn resolve(&self, steam_id: &str) -> Result<String, SourceError> {
        let url = format!("{}/go/user/{steam_id}", self.base);
        let resp = send_with_backoff(SOURCE, &self.ladder, || self.client.head(&url)).await?;
        if resp.status().is_server_error() {
            return Err(SourceError::transient(
                SOURCE,
                format!("user lookup HTTP {}", resp.status()),
            ));
        }
        let username = username_from_url(resp.url().as_str());
        debug!(steam_id, %username, "resolved username");
        Ok(username)
    }
}

/// `.../user/{name}` yields `name`; anything else means the account is gone.
pub fn username_from_url(final_url: &str) -> String {
    let parts: Vec<&str> = final_url.split("/user/").collect();
    match parts.as_slice() {
        [_, name] if !name.trim_matches('/').is_empty() => name.trim_matches('/').to_string(),
        _ => DELETED_USER.to_string(),
    }
}

/// Bundle-games JSON listing: reduced and no-value timelines, found tracking
/// on both.
#[derive(Debug, Clone)]
pub struct BundleGamesJson {
    sg: SteamGifts,
}

impl BundleGamesJson {
    pub fn new(sg: SteamGifts) -> Self {
        Self { sg }
    }
}

#[async_trait]
impl ListingSource for BundleGamesJson {
    fn name(&self) -> &'static str {
        "rncv_sg"
    }

    fn tracked_kinds(&self) -> &'static [TimelineKind] {
        &TimelineKind::ALL
    }

    fn ledger_keys(&self) -> &'static [&'static str] {
        &[ledger::RCV_FROM_SG, ledger::NCV]
    }

    async fn fetch_page(&self, page: u32) -> Result<ListingPage, SourceError> {
        let body = self.sg.get_json(&self.sg.search_url("bundle-games", page, true)).await?;
        listing::bundle_games_json(body)
    }
}

/// Bundle-games HTML table: reduced timeline only.
#[derive(Debug, Clone)]
pub struct BundleGamesHtml {
    sg: SteamGifts,
}

impl BundleGamesHtml {
    pub fn new(sg: SteamGifts) -> Self {
        Self { sg }
    }
}

#[async_trait]
impl ListingSource for BundleGamesHtml {
    fn name(&self) -> &'static str {
        "rcv_sg"
    }

    fn tracked_kinds(&self) -> &'static [TimelineKind] {
        &[TimelineKind::ReducedValue]
    }

    fn ledger_keys(&self) -> &'static [&'static str] {
        &[ledger::RCV_FROM_SG]
    }

    async fn fetch_page(&self, page: u32) -> Result<ListingPage, SourceError> {
        let html = self.sg.get_text(&self.sg.search_url("bundle-games", page, false)).await?;
        listing::bundle_games_html(&html)
    }
}

/// Giveaway listing mined for SteamGifts ids, seeded from a bulk snapshot.
/// Env: SGDB_SNAPSHOT_URL (`off` disables the seed)
#[derive(Debug, Clone)]
pub struct GiveawayIds {
    sg: SteamGifts,
    snapshot_url: Option<String>,
}

impl GiveawayIds {
    pub fn new(sg: SteamGifts, snapshot_url: Option<String>) -> Self {
        Self { sg, snapshot_url }
    }

    pub fn from_env(sg: SteamGifts) -> Self {
        let url = match env_opt("SGDB_SNAPSHOT_URL") {
            Some(url) if url.trim().eq_ignore_ascii_case("off") => None,
            Some(url) => Some(url),
            None => Some(DEFAULT_SNAPSHOT_URL.to_string()),
        };
        Self::new(sg, url)
    }
}

#[async_trait]
impl ListingSource for GiveawayIds {
    fn name(&self) -> &'static str {
        "sgids"
    }

    fn tracked_kinds(&self) -> &'static [TimelineKind] {
        &[]
    }

    fn ledger_keys(&self) -> &'static [&'static str] {
        &[ledger::SG_IDS]
    }

    async fn seed(&self) -> Result<Vec<GiftIdEntry>, SourceError> {
        let Some(url) = &self.snapshot_url else {
            return Ok(Vec::new());
        };
        let body = self.sg.get_json(url).await?;
        listing::gift_snapshot(&body)
    }

    async fn fetch_page(&self, page: u32) -> Result<ListingPage, SourceError> {
        let body = self.sg.get_json(&self.sg.search_url("giveaways", page, true)).await?;
        listing::giveaways_json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::model::GameRef;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> SteamGifts {
        SteamGifts::new(Some(&server.uri()), Some(5))
            .unwrap()
            .with_backoff(vec![Duration::from_millis(1)])
    }

    #[test]
    fn usernames_come_from_the_profile_url() {
        assert_eq!(username_from_url("https://www.steamgifts.com/user/gsrafael01"), "gsrafael01");
        assert_eq!(username_from_url("https://www.steamgifts.com/user/gsrafael01/"), "gsrafael01");
        assert_eq!(username_from_url("https://www.steamgifts.com/"), DELETED_USER);
    }

    #[tokio::test]
    async fn bundle_games_json_requests_the_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bundle-games/search"))
            .and(query_param("page", "4"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "per_page": 25,
                "results": [{"app_id": 620, "name": "Portal 2",
                             "reduced_value_timestamp": 1_500_000_000, "no_value_timestamp": null}]
            })))
            .mount(&server)
            .await;
        let page = BundleGamesJson::new(gateway(&server)).fetch_page(4).await.unwrap();
        assert!(page.ended);
        assert_eq!(page.timeline.len(), 1);
    }

    #[tokio::test]
    async fn seed_reads_the_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sgdb.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "appids": {"620": "Xy1"}, "subids": {}
            })))
            .mount(&server)
            .await;
        let snapshot = format!("{}/sgdb.json", server.uri());
        let source = GiveawayIds::new(gateway(&server), Some(snapshot));
        let seed = source.seed().await.unwrap();
        assert_eq!(seed, vec![GiftIdEntry { game: GameRef::app(620), gift_id: "Xy1".into() }]);

        let unseeded = GiveawayIds::new(gateway(&server), None);
        assert!(unseeded.seed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn html_listing_maintenance_page_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bundle-games/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>down</html>"))
            .mount(&server)
            .await;
        let err = BundleGamesHtml::new(gateway(&server)).fetch_page(1).await.unwrap_err();
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn resolve_follows_the_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/go/user/76561198000000001"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/user/newname", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/user/newname"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let name = gateway(&server).resolve("76561198000000001").await.unwrap();
        assert_eq!(name, "newname");
    }
}
