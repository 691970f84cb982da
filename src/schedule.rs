//! Upstream schedule, airings and play-by-play lookups.
//!
//! Everything here is fetched through the shared retrying client and cached
//! in the disk store under the expiry classes of `store::expiry`. The
//! airings record is the one raw-XML document in the cache; it is stored
//! byte-for-byte as received and re-parsed on every read.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::fetch::Fetcher;
use crate::store::{expiry, DiskStore};

const SCHEDULE_URL: &str = "https://statsapi.mlb.com/api/v1/schedule";
const GAME_URL_PREFIX: &str = "https://statsapi.mlb.com/api/v1/game";
const AIRINGS_URL: &str = "https://search-api-mlbtv.mlb.com/svc/search/v2/mediaSearch";

/// How far ahead the multi-week schedule looks.
const WEEK_SPAN_DAYS: i64 = 21;

/// Identifiers for one broadcast of one game.
#[derive(Debug, Clone)]
pub struct MediaIds {
    pub media_id: String,
    pub content_id: Option<String>,
    pub game_pk: Option<i64>,
}

/// Parsed per-broadcast milestone document (cached as raw XML).
#[derive(Debug, Clone, Deserialize)]
pub struct Airings {
    #[serde(rename = "@contentId")]
    pub content_id: String,
    #[serde(rename = "@mediaId", default)]
    pub media_id: Option<String>,
    #[serde(rename = "@gamePk")]
    pub game_pk: i64,
    #[serde(rename = "@date")]
    pub date: NaiveDate,
    #[serde(rename = "@state", default)]
    pub state: String,
    #[serde(rename = "milestone", default)]
    pub milestones: Vec<Milestone>,
}

/// One timestamped broadcast marker.
#[derive(Debug, Clone, Deserialize)]
pub struct Milestone {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@time")]
    pub time: DateTime<Utc>,
    /// Seconds into the stream at which this marker sits.
    #[serde(rename = "@offset", default)]
    pub offset: f64,
    #[serde(rename = "@inning", default)]
    pub inning: Option<u32>,
    #[serde(rename = "@top", default)]
    pub top: Option<bool>,
}

impl Airings {
    pub fn is_live(&self) -> bool {
        self.state.eq_ignore_ascii_case("live")
    }

    /// Whether the milestone list looks trimmed and settled: a broadcast
    /// start marker plus at least one inning end.
    pub fn boundaries_complete(&self) -> bool {
        self.milestones.iter().any(|m| m.kind == "BROADCAST_START")
            && self.milestones.iter().any(|m| m.kind == "INNING_END")
    }
}

/// Schedule and metadata lookups backed by the disk cache.
pub struct ScheduleService {
    fetcher: Arc<Fetcher>,
    store: Arc<DiskStore>,
}

impl ScheduleService {
    pub fn new(fetcher: Arc<Fetcher>, store: Arc<DiskStore>) -> Self {
        Self { fetcher, store }
    }

    /// One day of schedule data: `{"date": ..., "games": [...]}`.
    pub async fn day(&self, date: NaiveDate) -> Result<Value> {
        let key = format!("day:{}", date);
        if let Some(cached) = self.store.get::<Value>(&key) {
            return Ok(cached);
        }

        let url = format!(
            "{}?sportId=1&date={}&hydrate=game(content(media(epg))),broadcasts(all),linescore",
            SCHEDULE_URL, date
        );
        let body = self.fetcher.get_json(&url).await?;
        let games = games_for_date(&body, date);
        let day = json!({ "date": date.to_string(), "games": games });

        let expiry = expiry::day_expiry(date, games_slice(&day), Utc::now());
        if let Err(e) = self.store.put(&key, &day, expiry) {
            tracing::warn!("Failed to cache day data for {}: {}", date, e);
        }
        Ok(day)
    }

    /// Multi-week schedule, cached under the fixed `week` key until the
    /// next daily cutover.
    pub async fn week(&self) -> Result<Value> {
        if let Some(cached) = self.store.get::<Value>("week") {
            return Ok(cached);
        }

        let today = Utc::now().date_naive();
        let url = format!(
            "{}?sportId=1&startDate={}&endDate={}",
            SCHEDULE_URL,
            today,
            today + chrono::Duration::days(WEEK_SPAN_DAYS)
        );
        let body = self.fetcher.get_json(&url).await?;

        if let Err(e) = self.store.put("week", &body, expiry::week_expiry(Utc::now())) {
            tracing::warn!("Failed to cache week schedule: {}", e);
        }
        Ok(body)
    }

    /// Per-broadcast milestone data, cached as raw XML.
    pub async fn airings(&self, content_id: &str) -> Result<Airings> {
        let key = format!("airings:{}", content_id);
        if let Some(xml) = self.store.get_raw(&key, "xml") {
            if let Ok(parsed) = parse_airings(&xml) {
                return Ok(parsed);
            }
            tracing::warn!("Cached airings for {} unparsable; refetching", content_id);
        }

        let url = format!("{}?contentId={}&format=xml", AIRINGS_URL, content_id);
        let (xml, _) = self.fetcher.get_text(&url).await?;
        let parsed = parse_airings(&xml)?;

        let expiry = expiry::airings_expiry(
            parsed.date,
            parsed.is_live(),
            parsed.boundaries_complete(),
            Utc::now(),
        );
        if let Err(e) = self.store.put_raw(&key, "xml", &xml, expiry) {
            tracing::warn!("Failed to cache airings for {}: {}", content_id, e);
        }
        Ok(parsed)
    }

    /// Play-by-play feed for one game. Final games never change; anything
    /// else may still grow.
    pub async fn play_by_play(&self, game_pk: i64) -> Result<Value> {
        let key = format!("playbyplay:{}", game_pk);
        if let Some(cached) = self.store.get::<Value>(&key) {
            return Ok(cached);
        }

        let url = format!("{}/{}/playByPlay", GAME_URL_PREFIX, game_pk);
        let body = self.fetcher.get_json(&url).await?;

        let finished = body
            .pointer("/status/abstractGameState")
            .and_then(|v| v.as_str())
            .map(|s| s == "Final")
            .unwrap_or(false);
        let expiry = if finished {
            None
        } else {
            Some(Utc::now() + chrono::Duration::minutes(5))
        };
        if let Err(e) = self.store.put(&key, &body, expiry) {
            tracing::warn!("Failed to cache play-by-play for {}: {}", game_pk, e);
        }
        Ok(body)
    }

    /// Highlights for one game, cached under the highlights class.
    pub async fn highlights(&self, game_pk: i64, date: NaiveDate) -> Result<Value> {
        let key = format!("highlights:{}", game_pk);
        if let Some(cached) = self.store.get::<Value>(&key) {
            return Ok(cached);
        }

        let url = format!("{}/{}/content", GAME_URL_PREFIX, game_pk);
        let body = self.fetcher.get_json(&url).await?;

        let airing = match self.day(date).await {
            Ok(day) => game_is_live(&day, game_pk),
            Err(_) => false,
        };
        let expiry = expiry::highlights_expiry(date, airing, Utc::now());
        if let Err(e) = self.store.put(&key, &body, expiry) {
            tracing::warn!("Failed to cache highlights for {}: {}", game_pk, e);
        }
        Ok(body)
    }

    /// Map team + date + game number to the ids of its primary broadcast.
    pub async fn find_media(
        &self,
        team: &str,
        date: NaiveDate,
        game_number: usize,
    ) -> Result<MediaIds> {
        let day = self.day(date).await?;
        let games = games_slice(&day);

        let mut seen = 0usize;
        for game in games {
            if !game_has_team(game, team) {
                continue;
            }
            seen += 1;
            if seen < game_number.max(1) {
                continue;
            }

            let game_pk = game.get("gamePk").and_then(|v| v.as_i64());
            let side = team_side(game, team);
            if let Some(ids) = pick_broadcast(game, side.as_deref()) {
                return Ok(MediaIds {
                    media_id: ids.0,
                    content_id: ids.1,
                    game_pk,
                });
            }
            return Err(GatewayError::NoMatch(format!(
                "no broadcast listed for {} on {}",
                team, date
            )));
        }

        Err(GatewayError::NoMatch(format!(
            "no game for {} on {}",
            team, date
        )))
    }

    /// Find another broadcast of the same game, for milestone borrowing.
    pub async fn companion_airings(&self, airings: &Airings) -> Result<Option<Airings>> {
        let day = self.day(airings.date).await?;

        for game in games_slice(&day) {
            if game.get("gamePk").and_then(|v| v.as_i64()) != Some(airings.game_pk) {
                continue;
            }
            for item in epg_items(game) {
                let content_id = item.get("contentId").and_then(|v| v.as_str());
                match content_id {
                    Some(id) if id != airings.content_id => {
                        match self.airings(id).await {
                            Ok(companion) if companion.milestones.len() >= 2 => {
                                return Ok(Some(companion));
                            }
                            Ok(_) => continue,
                            Err(e) => {
                                tracing::debug!("Companion airings {} unavailable: {}", id, e);
                                continue;
                            }
                        }
                    }
                    _ => continue,
                }
            }
        }
        Ok(None)
    }
}

fn parse_airings(xml: &str) -> Result<Airings> {
    quick_xml::de::from_str(xml)
        .map_err(|e| GatewayError::Malformed(format!("airings XML: {}", e)))
}

/// Games array from a `{"date", "games"}` day document.
pub fn games_slice(day: &Value) -> &[Value] {
    day.get("games")
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .unwrap_or(&[])
}

/// Extract the games for one date from a raw statsapi schedule response.
fn games_for_date(schedule: &Value, date: NaiveDate) -> Vec<Value> {
    let date_str = date.to_string();
    schedule
        .get("dates")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter(|d| d.get("date").and_then(|v| v.as_str()) == Some(date_str.as_str()))
        .flat_map(|d| {
            d.get("games")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default()
        })
        .collect()
}

fn game_is_live(day: &Value, game_pk: i64) -> bool {
    games_slice(day).iter().any(|g| {
        g.get("gamePk").and_then(|v| v.as_i64()) == Some(game_pk)
            && g.pointer("/status/abstractGameState").and_then(|v| v.as_str()) == Some("Live")
    })
}

fn team_name_matches(team: &Value, wanted: &str) -> bool {
    ["abbreviation", "teamName", "name", "fileCode"]
        .iter()
        .filter_map(|k| team.get(*k).and_then(|v| v.as_str()))
        .any(|name| name.eq_ignore_ascii_case(wanted))
}

fn game_has_team(game: &Value, team: &str) -> bool {
    team_side(game, team).is_some()
}

/// Which side of the matchup the team is on, if any.
fn team_side(game: &Value, team: &str) -> Option<String> {
    for side in ["home", "away"] {
        if let Some(t) = game.pointer(&format!("/teams/{}/team", side)) {
            if team_name_matches(t, team) {
                return Some(side.to_string());
            }
        }
    }
    None
}

fn epg_items(game: &Value) -> impl Iterator<Item = &Value> {
    game.pointer("/content/media/epg")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter(|title| {
            title
                .get("title")
                .and_then(|v| v.as_str())
                .map(|t| t.eq_ignore_ascii_case("MLBTV"))
                .unwrap_or(true)
        })
        .flat_map(|title| {
            title
                .get("items")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
        })
}

/// Choose a broadcast for the requested side, falling back to the first
/// one that is not switched off.
fn pick_broadcast(game: &Value, side: Option<&str>) -> Option<(String, Option<String>)> {
    let usable: Vec<&Value> = epg_items(game)
        .filter(|item| {
            item.get("mediaState").and_then(|v| v.as_str()) != Some("MEDIA_OFF")
                && item.get("mediaId").and_then(|v| v.as_str()).is_some()
        })
        .collect();

    let preferred = side.and_then(|side| {
        usable.iter().copied().find(|item| {
            item.get("mediaFeedType")
                .and_then(|v| v.as_str())
                .map(|f| f.eq_ignore_ascii_case(side))
                .unwrap_or(false)
        })
    });

    let item = preferred.or_else(|| usable.first().copied())?;
    let media_id = item.get("mediaId").and_then(|v| v.as_str())?.to_string();
    let content_id = item
        .get("contentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    Some((media_id, content_id))
}
