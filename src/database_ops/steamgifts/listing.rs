//! SteamGifts listing pages: bundle-games (JSON and HTML) and giveaways.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;

use super::SOURCE;
use crate::database_ops::error::SourceError;
use crate::database_ops::model::{
    GameRef, GameType, GiftIdEntry, ListingPage, NameEntry, TimelineEntry, TimelineKind,
};
use crate::database_ops::steam::parse::release_date;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct SearchPage<T> {
    #[serde(default)]
    success: bool,
    per_page: Option<usize>,
    #[serde(default)]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct BundleGame {
    app_id: Option<i64>,
    package_id: Option<i64>,
    name: Option<String>,
    reduced_value_timestamp: Option<i64>,
    no_value_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Giveaway {
    id: Value,
    app_id: Option<i64>,
    package_id: Option<i64>,
}

/// Apps win over packages when both ids are present.
fn game_of(app_id: Option<i64>, package_id: Option<i64>) -> Option<GameRef> {
    match (app_id.filter(|id| *id > 0), package_id.filter(|id| *id > 0)) {
        (Some(app), _) => Some(GameRef::app(app)),
        (None, Some(sub)) => Some(GameRef::sub(sub)),
        (None, None) => None,
    }
}

fn gift_id(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn search_page<T>(body: Value, what: &str) -> Result<(Vec<T>, bool), SourceError>
where
    T: for<'de> Deserialize<'de>,
{
    let page: SearchPage<T> = serde_json::from_value(body)
        .map_err(|e| SourceError::transient(SOURCE, format!("{what} page shape: {e}")))?;
    if !page.success {
        return Err(SourceError::transient(SOURCE, format!("{what} page reported success=false")));
    }
    let ended = page.per_page != Some(page.results.len());
    Ok((page.results, ended))
}

/// `/bundle-games/search?format=json`: reduced and no-value timelines.
pub fn bundle_games_json(body: Value) -> Result<ListingPage, SourceError> {
    let (results, ended) = search_page::<BundleGame>(body, "bundle-games")?;
    let mut page = ListingPage {
        ended,
        ..ListingPage::default()
    };
    for result in results {
        let Some(game) = game_of(result.app_id, result.package_id) else {
            continue;
        };
        if let Some(name) = result.name.filter(|n| !n.trim().is_empty()) {
            page.names.push(NameEntry { game, name });
        }
        let stamps = [
            (TimelineKind::ReducedValue, result.reduced_value_timestamp),
            (TimelineKind::NoValue, result.no_value_timestamp),
        ];
        for (kind, stamp) in stamps {
            if let Some(effective_date) = stamp.filter(|t| *t > 0) {
                page.timeline.push(TimelineEntry {
                    kind,
                    game,
                    effective_date,
                    added_date: None,
                    mark_found: true,
                });
            }
        }
    }
    Ok(page)
}

/// `/giveaways/search?format=json`: SteamGifts ids per game.
pub fn giveaways_json(body: Value) -> Result<ListingPage, SourceError> {
    let (results, ended) = search_page::<Giveaway>(body, "giveaways")?;
    let gift_ids = results
        .into_iter()
        .filter_map(|g| {
            Some(GiftIdEntry {
                game: game_of(g.app_id, g.package_id)?,
                gift_id: gift_id(&g.id)?,
            })
        })
        .collect();
    Ok(ListingPage {
        gift_ids,
        ended,
        ..ListingPage::default()
    })
}

/// Bulk `{appids: {steam_id: sg_id}, subids: {...}}` snapshot.
pub fn gift_snapshot(body: &Value) -> Result<Vec<GiftIdEntry>, SourceError> {
    let mut out = Vec::new();
    for (key, game_type) in [("appids", GameType::App), ("subids", GameType::Sub)] {
        let map = body
            .get(key)
            .and_then(Value::as_object)
            .ok_or_else(|| SourceError::transient(SOURCE, format!("snapshot has no {key} map")))?;
        for (steam_id, sg_id) in map {
            let (Ok(id), Some(gift_id)) = (steam_id.parse::<i64>(), gift_id(sg_id)) else {
                continue;
            };
            out.push(GiftIdEntry {
                game: GameRef { game_type, id },
                gift_id,
            });
        }
    }
    Ok(out)
}

fn select(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::transient(SOURCE, format!("selector {css}: {e}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// `/bundle-games/search` HTML table: reduced timeline only. The last page is
/// the one whose final pagination link is the selected one.
pub fn bundle_games_html(html: &str) -> Result<ListingPage, SourceError> {
    let doc = Html::parse_document(html);
    let rows = select(".table__row-inner-wrap")?;
    let link = select(".table__column__secondary-link")?;
    let heading = select(".table__column__heading")?;
    let date = select(".table__column--width-small")?;
    let navigation = select(".pagination__navigation")?;
    let href = Regex::new(r"(app|sub)/(\d+)")
        .map_err(|e| SourceError::transient(SOURCE, e.to_string()))?;

    let nav = doc
        .select(&navigation)
        .next()
        .ok_or_else(|| SourceError::transient(SOURCE, "bundle-games page has no pagination"))?;
    let ended = nav
        .children()
        .filter_map(ElementRef::wrap)
        .last()
        .map(|last| last.value().classes().any(|c| c == "is-selected"))
        .unwrap_or(true);

    let mut page = ListingPage {
        ended,
        ..ListingPage::default()
    };
    for row in doc.select(&rows) {
        let Some(target) = row
            .select(&link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|h| href.captures(h))
        else {
            continue;
        };
        let Ok(id) = target[2].parse::<i64>() else {
            continue;
        };
        let game = if &target[1] == "app" {
            GameRef::app(id)
        } else {
            GameRef::sub(id)
        };
        if let Some(name) = row.select(&heading).next().map(text_of).filter(|n| !n.is_empty()) {
            page.names.push(NameEntry { game, name });
        }
        let effective = row
            .select(&date)
            .next()
            .map(text_of)
            .and_then(|raw| release_date(&raw));
        if let Some(effective_date) = effective {
            page.timeline.push(TimelineEntry {
                kind: TimelineKind::ReducedValue,
                game,
                effective_date,
                added_date: None,
                mark_found: true,
            });
        }
    }
    Ok(page)
}
