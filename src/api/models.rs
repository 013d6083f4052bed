// API request/response models (DTOs)

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::database_ops::lookup::TimelineQuery;

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

/// Comma-separated positive integers; blanks between commas are ignored.
pub fn parse_id_list(raw: &str) -> Result<Vec<i64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<i64>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(format!("invalid id '{s}'")),
        })
        .collect()
}

/// `YYYY-MM-DD` as midnight UTC.
fn parse_day(field: &str, raw: &str) -> Result<i64, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc().timestamp())
        .ok_or_else(|| format!("{field} must be a date in the format YYYY-MM-DD"))
}

/// `?ids=10,20,30`
#[derive(Debug, Deserialize)]
pub struct IdsQuery {
    #[serde(default)]
    pub ids: String,
}

impl IdsQuery {
    pub fn parse(&self) -> Result<Vec<i64>, String> {
        let ids = parse_id_list(&self.ids)?;
        if ids.is_empty() {
            return Err("ids must list at least one id".to_string());
        }
        Ok(ids)
    }
}

/// `?app_ids=..&sub_ids=..&from=YYYY-MM-DD&until=YYYY-MM-DD&show_recent=true`
#[derive(Debug, Default, Deserialize)]
pub struct TimelineParams {
    pub app_ids: Option<String>,
    pub sub_ids: Option<String>,
    pub from: Option<String>,
    pub until: Option<String>,
    #[serde(default)]
    pub show_recent: bool,
}

impl TimelineParams {
    /// `show_recent` cannot be combined with ids or dates.
    pub fn parse(&self) -> Result<TimelineQuery, String> {
        let narrowed = self.app_ids.is_some()
            || self.sub_ids.is_some()
            || self.from.is_some()
            || self.until.is_some();
        if self.show_recent && narrowed {
            return Err("show_recent cannot be combined with ids or dates".to_string());
        }
        Ok(TimelineQuery {
            app_ids: self.app_ids.as_deref().map(parse_id_list).transpose()?,
            sub_ids: self.sub_ids.as_deref().map(parse_id_list).transpose()?,
            from: self.from.as_deref().map(|raw| parse_day("from", raw)).transpose()?,
            until: self.until.as_deref().map(|raw| parse_day("until", raw)).transpose()?,
            recent: self.show_recent,
        })
    }
}

/// `?app_ids=..&sub_ids=..`; at least one id overall.
#[derive(Debug, Default, Deserialize)]
pub struct GiftIdParams {
    #[serde(default)]
    pub app_ids: String,
    #[serde(default)]
    pub sub_ids: String,
}

impl GiftIdParams {
    pub fn parse(&self) -> Result<(Vec<i64>, Vec<i64>), String> {
        let apps = parse_id_list(&self.app_ids)?;
        let subs = parse_id_list(&self.sub_ids)?;
        if apps.is_empty() && subs.is_empty() {
            return Err("app_ids or sub_ids must list at least one id".to_string());
        }
        Ok((apps, subs))
    }
}

/// SteamID64 path segment; a leading `+` is accepted.
pub fn parse_steam_id(raw: &str) -> Result<String, String> {
    let id = raw.strip_prefix('+').unwrap_or(raw);
    if id.len() == 17 && id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(id.to_string())
    } else {
        Err(format!("invalid steam id '{raw}'"))
    }
}
