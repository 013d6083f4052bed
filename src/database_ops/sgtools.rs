//! SGTools `lastBundled` feed: recently bundled games with the date SGTools
//! first saw them.

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use super::error::SourceError;
use super::http::{build_client, send_with_backoff, text_body, RATE_LIMIT_LADDER};
use super::model::{ledger, GameRef, ListingPage, NameEntry, TimelineEntry, TimelineKind};
use super::source::ListingSource;
use super::steam::parse::Num;
use crate::util::env::{env_base_url, env_opt, env_parse};

pub const SOURCE: &str = "sgtools";
pub const DEFAULT_BASE: &str = "http://www.sgtools.info";
const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Deserialize)]
struct Bundled {
    #[serde(rename = "type")]
    kind: String,
    app_id: Num,
    name: Option<String>,
    bundled_date: String,
    creation_date: String,
}

/// Env: SGTOOLS_BASE, SGTOOLS_API_KEY
#[derive(Debug, Clone)]
pub struct SgToolsSnapshot {
    client: Client,
    base: String,
    api_key: String,
    ladder: Vec<Duration>,
}

impl SgToolsSnapshot {
    pub fn new(
        base_url: Option<&str>,
        api_key: impl Into<String>,
        timeout_secs: Option<u64>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs.unwrap_or(15))
                .context("failed to build sgtools http client")?,
            base: base_url.unwrap_or(DEFAULT_BASE).trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            ladder: RATE_LIMIT_LADDER.to_vec(),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let base = env_base_url("SGTOOLS_BASE", DEFAULT_BASE);
        let key = env_opt("SGTOOLS_API_KEY").unwrap_or_default();
        if key.is_empty() {
            warn!("SGTOOLS_API_KEY is not set; sgtools requests will likely be rejected");
        }
        Self::new(Some(&base), key, Some(env_parse("STEAM_HTTP_TIMEOUT_SECS", 15u64)))
    }

    pub fn with_backoff(mut self, ladder: Vec<Duration>) -> Self {
        self.ladder = ladder;
        self
    }
}

/// Dates are UTC in `YYYY/MM/DD HH:MM:SS`.
fn timestamp(raw: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(raw.trim(), DATE_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// The feed is `[[entry, ...]]`; only the first element carries data.
pub fn last_bundled(body: &Value) -> Result<ListingPage, SourceError> {
    let first = body
        .as_array()
        .and_then(|outer| outer.first())
        .cloned()
        .ok_or_else(|| SourceError::transient(SOURCE, "lastBundled is not a non-empty array"))?;
    let entries: Vec<Bundled> = serde_json::from_value(first)
        .map_err(|e| SourceError::transient(SOURCE, format!("lastBundled shape: {e}")))?;

    let mut page = ListingPage {
        ended: true,
        ..ListingPage::default()
    };
    for entry in entries {
        let Some(id) = entry.app_id.value() else {
            continue;
        };
        let game = match entry.kind.as_str() {
            "app" => GameRef::app(id),
            "sub" => GameRef::sub(id),
            _ => continue,
        };
        if let Some(name) = entry.name.filter(|n| !n.trim().is_empty()) {
            page.names.push(NameEntry { game, name });
        }
        let (Some(effective_date), Some(added)) =
            (timestamp(&entry.bundled_date), timestamp(&entry.creation_date))
        else {
            continue;
        };
        page.timeline.push(TimelineEntry {
            kind: TimelineKind::ReducedValue,
            game,
            effective_date,
            added_date: Some(added),
            mark_found: false,
        });
    }
    Ok(page)
}

#[async_trait]
impl ListingSource for SgToolsSnapshot {
    fn name(&self) -> &'static str {
        "rcv_sgtools"
    }

    fn tracked_kinds(&self) -> &'static [TimelineKind] {
        &[]
    }

    fn ledger_keys(&self) -> &'static [&'static str] {
        &[ledger::RCV_FROM_SGTOOLS]
    }

    async fn fetch_page(&self, _page: u32) -> Result<ListingPage, SourceError> {
        let url = format!("{}/api/lastBundled", self.base);
        let resp = send_with_backoff(SOURCE, &self.ladder, || {
            self.client.get(&url).query(&[("apiKey", self.api_key.as_str())])
        })
        .await?;
        let body = text_body(SOURCE, resp).await?;
        let json: Value = serde_json::from_str(&body)
            .map_err(|e| SourceError::transient(SOURCE, format!("unreadable json: {e}")))?;
        last_bundled(&json)
    }
}
