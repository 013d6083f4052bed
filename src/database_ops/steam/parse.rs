//! Steam store API payloads and store-page scraping.
//!
//! Everything here is synchronous: `scraper::Html` is not `Send`, so pages are
//! parsed to plain values before the caller awaits anything else.

use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::database_ops::error::SourceError;
use crate::database_ops::model::{AppDetail, GameRef, Label, SubDetail};

pub const SOURCE: &str = "steam";

const MULTIPLAYER_CATEGORIES: [&str; 6] = [
    "multi-player",
    "online multi-player",
    "co-op",
    "local co-op",
    "online co-op",
    "shared/split screen",
];

const METACRITIC_PREFIX: &str = "https://www.metacritic.com/game/pc/";

/// Steam mixes numeric and string ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Num {
    Int(i64),
    Text(String),
}

impl Num {
    pub fn value(&self) -> Option<i64> {
        match self {
            Num::Int(v) => Some(*v),
            Num::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseDate {
    #[serde(default)]
    pub coming_soon: bool,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Genre {
    pub id: Num,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Platforms {
    #[serde(default)]
    pub windows: bool,
    #[serde(default)]
    pub mac: bool,
    #[serde(default)]
    pub linux: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Achievements {
    #[serde(default)]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    #[serde(default)]
    pub initial: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metacritic {
    pub score: Option<i64>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FullGame {
    pub appid: Option<Num>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppData {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub release_date: ReleaseDate,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub platforms: Platforms,
    pub achievements: Option<Achievements>,
    pub price_overview: Option<Price>,
    pub metacritic: Option<Metacritic>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    pub fullgame: Option<FullGame>,
    #[serde(default)]
    pub dlc: Vec<Num>,
    #[serde(default)]
    pub packages: Vec<Num>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubApp {
    pub id: Num,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubData {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub apps: Vec<SubApp>,
    pub price: Option<Price>,
    #[serde(default)]
    pub release_date: ReleaseDate,
}

/// Extracts `body[id]`, separating "source says no" from "source unreadable".
/// Returns the `data` object, or `None` when the source reports the id as gone.
fn envelope<'a>(body: &'a Value, id: i64) -> Result<Option<&'a Value>, SourceError> {
    let entry = body
        .get(id.to_string())
        .ok_or_else(|| SourceError::transient(SOURCE, format!("response has no entry for {id}")))?;
    let success = entry
        .get("success")
        .and_then(Value::as_bool)
        .ok_or_else(|| SourceError::transient(SOURCE, format!("entry {id} has no success flag")))?;
    if !success {
        return Ok(None);
    }
    Ok(entry.get("data").filter(|d| d.is_object()))
}

/// appdetails payload; gone when unsuccessful, empty, or neither a game nor a DLC.
pub fn app_api(body: &Value, app_id: i64) -> Result<AppData, SourceError> {
    let game = GameRef::app(app_id);
    let Some(data) = envelope(body, app_id)? else {
        return Err(SourceError::not_found(game, "appdetails success=false or empty data"));
    };
    let parsed: AppData = serde_json::from_value(data.clone())
        .map_err(|e| {
            SourceError::transient(SOURCE, format!("appdetails shape for {app_id}: {e}"))
        })?;
    match parsed.kind.as_deref() {
        Some("game") | Some("dlc") => Ok(parsed),
        other => Err(SourceError::not_found(
            game,
            format!("unsupported app type {}", other.unwrap_or("<none>")),
        )),
    }
}

/// packagedetails payload; gone when unsuccessful or empty.
pub fn sub_api(body: &Value, sub_id: i64) -> Result<SubData, SourceError> {
    let Some(data) = envelope(body, sub_id)? else {
        return Err(SourceError::not_found(
            GameRef::sub(sub_id),
            "packagedetails success=false or empty data",
        ));
    };
    serde_json::from_value(data.clone())
        .map_err(|e| {
            SourceError::transient(SOURCE, format!("packagedetails shape for {sub_id}: {e}"))
        })
}

/// What the public store page adds on top of the API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorePage {
    /// The page rendered as a real app page.
    pub ok: bool,
    pub learning: bool,
    pub rating: Option<(i32, i32)>,
    pub tags: Vec<Label>,
    pub bundles: Vec<i64>,
}

fn select(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

pub fn store_page(html: &str) -> StorePage {
    let doc = Html::parse_document(html);
    let exists = |css: &str| {
        select(css)
            .map(|sel| doc.select(&sel).next().is_some())
            .unwrap_or(false)
    };
    let ok = exists(".apphub_AppName");
    if !ok {
        return StorePage::default();
    }
    let rating = select("#userReviews .user_reviews_summary_row:last-child")
        .and_then(|sel| doc.select(&sel).next())
        .and_then(|el| el.value().attr("data-tooltip-html"))
        .and_then(rating_from_tooltip);
    let bundles = select("[data-ds-bundleid]")
        .map(|sel| {
            doc.select(&sel)
                .filter_map(|el| el.value().attr("data-ds-bundleid"))
                .filter_map(|raw| raw.trim().parse::<i64>().ok())
                .collect()
        })
        .unwrap_or_default();
    StorePage {
        ok,
        learning: exists(".learning_about"),
        rating,
        tags: tags_from_script(html),
        bundles,
    }
}

/// "92% of the 12,345 user reviews ..." -> (92, 12345)
pub fn rating_from_tooltip(tooltip: &str) -> Option<(i32, i32)> {
    let cleaned: String = tooltip.chars().filter(|c| *c != ',' && *c != '.').collect();
    let re = Regex::new(r"(\d+)%.+?(\d+)").ok()?;
    let caps = re.captures(&cleaned)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

#[derive(Deserialize)]
struct TagEntry {
    tagid: Num,
    name: String,
}

/// Tag list embedded in the `InitAppTagModal(...)` script call.
pub fn tags_from_script(html: &str) -> Vec<Label> {
    let Ok(re) = Regex::new(r"InitAppTagModal[\S\s]*?(\[[\S\s]*?\]),") else {
        return Vec::new();
    };
    let Some(raw) = re.captures(html).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    serde_json::from_str::<Vec<TagEntry>>(raw.as_str())
        .map(|entries| {
            entries
                .into_iter()
                .filter_map(|t| {
                    Some(Label {
                        id: t.tagid.value()?,
                        name: t.name.trim().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The store redirects away from pages of delisted items; anything other than
/// `{store host}/{kind}/{id}` counts as removed.
pub fn is_removed(final_url: &Url, store_base: &Url, kind: &str, id: i64) -> bool {
    let same_host = final_url.host_str() == store_base.host_str()
        && final_url.port_or_known_default() == store_base.port_or_known_default();
    if !same_host {
        return true;
    }
    let id = id.to_string();
    let mut segments = final_url.path_segments().into_iter().flatten();
    !(segments.next() == Some(kind) && segments.next() == Some(id.as_str()))
}

pub fn metacritic_id(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query
        .strip_prefix(METACRITIC_PREFIX)
        .unwrap_or(without_query)
        .to_string()
}

/// English store date strings, read as midnight UTC.
pub fn release_date(raw: &str) -> Option<i64> {
    let ordinal = Regex::new(r"(\d+)(st|nd|rd|th)\b").ok()?;
    let cleaned = ordinal.replace_all(raw.trim(), "$1").to_string();
    if cleaned.is_empty() {
        return None;
    }
    // %B also accepts the abbreviated month name.
    let full_date = ["%d %B, %Y", "%B %d, %Y", "%d %B %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok());
    let month_year = format!("1 {}", cleaned.replace(',', ""));
    let date = full_date
        .or_else(|| NaiveDate::parse_from_str(&month_year, "%d %B %Y").ok())
        .or_else(|| {
            (cleaned.len() == 4)
                .then(|| cleaned.parse::<i32>().ok())
                .flatten()
                .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
        })?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

/// Out-of-range counts read as absent.
fn narrow(value: Option<i64>) -> Option<i32> {
    value.and_then(|v| i32::try_from(v).ok())
}

pub fn build_app(app_id: i64, data: AppData, page: &StorePage, removed: bool) -> AppDetail {
    let categories: Vec<String> = data
        .categories
        .iter()
        .map(|c| c.description.trim().to_lowercase())
        .collect();
    let has = |name: &str| categories.iter().any(|c| c == name);
    let scraped = page.ok && !removed;
    let (rating_percentage, rating_count) = match page.rating.filter(|_| scraped) {
        Some((pct, count)) => (Some(pct), Some(count)),
        None => (None, None),
    };
    let base = if data.kind.as_deref() == Some("dlc") {
        data.fullgame
            .as_ref()
            .and_then(|f| f.appid.as_ref())
            .and_then(Num::value)
            .filter(|id| *id > 0)
    } else {
        None
    };
    AppDetail {
        app_id,
        name: data.name.clone().unwrap_or_default(),
        released: !data.release_date.coming_soon,
        removed,
        steam_cloud: has("steam cloud"),
        trading_cards: has("steam trading cards"),
        learning: page.ok.then_some(page.learning),
        multiplayer: MULTIPLAYER_CATEGORIES.iter().any(|c| has(*c)),
        singleplayer: has("single-player"),
        linux: data.platforms.linux,
        mac: data.platforms.mac,
        windows: data.platforms.windows,
        achievements: data
            .achievements
            .as_ref()
            .and_then(|a| narrow(a.total))
            .unwrap_or(0),
        price: data
            .price_overview
            .as_ref()
            .and_then(|p| narrow(p.initial))
            .unwrap_or(0),
        metacritic_score: data
            .metacritic
            .as_ref()
            .and_then(|m| narrow(m.score)),
        metacritic_id: data
            .metacritic
            .as_ref()
            .and_then(|m| m.url.as_deref())
            .map(metacritic_id),
        rating_percentage,
        rating_count,
        release_date: data.release_date.date.as_deref().and_then(release_date),
        genres: data
            .genres
            .iter()
            .filter_map(|g| {
                Some(Label {
                    id: g.id.value()?,
                    name: g.description.trim().to_string(),
                })
            })
            .collect(),
        tags: if scraped { page.tags.clone() } else { Vec::new() },
        base,
        dlcs: data.dlc.iter().filter_map(Num::value).collect(),
        subs: data.packages.iter().filter_map(Num::value).collect(),
        bundles: if scraped {
            page.bundles.clone()
        } else {
            Vec::new()
        },
    }
}

pub fn build_sub(sub_id: i64, data: SubData, removed: bool) -> SubDetail {
    SubDetail {
        sub_id,
        name: data.name.unwrap_or_default(),
        released: !data.release_date.coming_soon,
        removed,
        price: data.price.and_then(|p| narrow(p.initial)).unwrap_or(0),
        release_date: data.release_date.date.as_deref().and_then(release_date),
        apps: data.apps.iter().filter_map(|a| a.id.value()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = r#"
        <html><body>
        <div class="apphub_AppName">Portal</div>
        <div id="userReviews">
          <div class="user_reviews_summary_row" data-tooltip-html="95% of the 300 user reviews in the last 30 days are positive."></div>
          <div class="user_reviews_summary_row" data-tooltip-html="98% of the 1,234,567 user reviews for this game are positive."></div>
        </div>
        <div class="learning_about">Steam is learning about this game</div>
        <div data-ds-bundleid="234"></div><div data-ds-bundleid="235"></div>
        <script>
          InitAppTagModal( 400,
            [{"tagid":1664,"name":"Puzzle","count":500,"browseable":true},{"tagid":"3871","name":"2D","count":20,"browseable":true}],
            [], "https://store.steampowered.com/tagdata/", false );
        </script>
        </body></html>"#;

    #[test]
    fn scrapes_app_page() {
        let page = store_page(PAGE);
        assert!(page.ok);
        assert!(page.learning);
        assert_eq!(page.rating, Some((98, 1234567)));
        assert_eq!(page.bundles, vec![234, 235]);
        assert_eq!(
            page.tags,
            vec![
                Label { id: 1664, name: "Puzzle".into() },
                Label { id: 3871, name: "2D".into() },
            ]
        );
    }

    #[test]
    fn non_app_page_yields_nothing() {
        let page = store_page("<html><body><div class='agegate'></div></body></html>");
        assert_eq!(page, StorePage::default());
    }

    #[test]
    fn parses_store_dates() {
        assert_eq!(release_date("10 Oct, 2007"), Some(1_191_974_400));
        assert_eq!(release_date("Oct 10, 2007"), Some(1_191_974_400));
        assert_eq!(release_date("1st August, 2020"), Some(1_596_240_000));
        assert_eq!(release_date("1 August, 2020"), Some(1_596_240_000));
        assert_eq!(release_date("August 1, 2020"), Some(1_596_240_000));
        assert_eq!(release_date("1 Aug, 2020"), Some(1_596_240_000));
        assert_eq!(release_date("1 August 2020"), Some(1_596_240_000));
        assert_eq!(release_date("Oct, 2007"), Some(1_191_196_800));
        assert_eq!(release_date("October 2007"), Some(1_191_196_800));
        assert_eq!(release_date("2007"), Some(1_167_609_600));
        assert_eq!(release_date("Coming soon"), None);
        assert_eq!(release_date("Q1 2025"), None);
    }

    #[test]
    fn out_of_range_counts_are_dropped() {
        assert_eq!(narrow(Some(12)), Some(12));
        assert_eq!(narrow(Some(i64::from(i32::MAX) + 1)), None);
        assert_eq!(narrow(None), None);
    }

    #[test]
    fn metacritic_id_drops_prefix_and_query() {
        assert_eq!(
            metacritic_id("https://www.metacritic.com/game/pc/portal?ftag=MCD-06-10aaa1f"),
            "portal"
        );
    }

    #[test]
    fn removal_follows_final_url() {
        let base = Url::parse("https://store.steampowered.com").unwrap();
        let here = Url::parse("https://store.steampowered.com/app/400/Portal/").unwrap();
        let home = Url::parse("https://store.steampowered.com/").unwrap();
        let prefix = Url::parse("https://store.steampowered.com/app/4000/").unwrap();
        assert!(!is_removed(&here, &base, "app", 400));
        assert!(is_removed(&home, &base, "app", 400));
        assert!(is_removed(&prefix, &base, "app", 400));
    }

    #[test]
    fn app_api_classifies_payloads() {
        let gone = json!({"10": {"success": false}});
        assert!(app_api(&gone, 10).unwrap_err().is_permanent());

        let video = json!({"10": {"success": true, "data": {"type": "video", "name": "Trailer"}}});
        assert!(app_api(&video, 10).unwrap_err().is_permanent());

        let missing = json!({"11": {"success": true}});
        assert!(!app_api(&missing, 10).unwrap_err().is_permanent());

        let ok = json!({
            "10": {"success": true, "data": {"type": "game", "name": "Counter-Strike"}}
        });
        assert_eq!(app_api(&ok, 10).unwrap().name.as_deref(), Some("Counter-Strike"));
    }

    #[test]
    fn sub_api_treats_empty_data_as_gone() {
        let empty = json!({"5": {"success": true, "data": []}});
        assert!(sub_api(&empty, 5).unwrap_err().is_permanent());
    }

    #[test]
    fn builds_dlc_detail() {
        let body = json!({"410": {"success": true, "data": {
            "type": "dlc",
            "name": " Portal Soundtrack ",
            "fullgame": {"appid": "400", "name": "Portal"},
            "categories": [
                {"id": 2, "description": "Single-player"},
                {"id": 29, "description": "Steam Trading Cards"}
            ],
            "platforms": {"windows": true, "mac": false, "linux": true},
            "genres": [{"id": "1", "description": "Action"}],
            "release_date": {"coming_soon": false, "date": "10 Oct, 2007"},
            "price_overview": {"initial": 499, "final": 249},
            "packages": [469]
        }}});
        let data = app_api(&body, 410).unwrap();
        let app = build_app(410, data, &store_page(PAGE), false);
        assert_eq!(app.base, Some(400));
        assert!(app.singleplayer && app.trading_cards && !app.multiplayer);
        assert!(app.linux && !app.mac);
        assert_eq!(app.price, 499);
        assert_eq!(app.learning, Some(true));
        assert_eq!(app.genres, vec![Label { id: 1, name: "Action".into() }]);
        assert_eq!(app.subs, vec![469]);
        assert_eq!(app.release_date, Some(1_191_974_400));
    }

    #[test]
    fn removed_app_keeps_api_fields_only() {
        let body = json!({"400": {"success": true, "data": {"type": "game", "name": "Portal"}}});
        let app = build_app(400, app_api(&body, 400).unwrap(), &store_page(PAGE), true);
        assert!(app.removed);
        assert!(app.tags.is_empty() && app.bundles.is_empty());
        assert_eq!(app.rating_percentage, None);
        assert_eq!(app.learning, Some(true));
    }
}
