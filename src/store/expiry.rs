//! Per-class cache expiry policy.
//!
//! Expiry is computed at write time from the semantic state of the cached
//! document, not from a fixed TTL. `None` means the entry never expires.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// Daily cutover hour (UTC). Schedule-shaped data rolls over at this hour,
/// well before any game starts.
pub const CUTOVER_HOUR: u32 = 10;

/// Default TTL for schedule-shaped data.
const DEFAULT_TTL: Duration = Duration::hours(1);

/// TTL while a game is live or in an unsettled state.
const LIVE_TTL: Duration = Duration::minutes(1);

/// TTL for milestone/highlight data that may still grow.
const GROWING_TTL: Duration = Duration::minutes(5);

/// Lead time before the next scheduled game at which day data refreshes.
const PREGAME_LEAD: Duration = Duration::minutes(15);

/// The next daily cutover strictly after `now`: tomorrow at
/// [`CUTOVER_HOUR`] UTC.
pub fn next_cutover(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::MIN)) + Duration::hours(CUTOVER_HOUR.into())
}

/// Expiry for a per-day schedule document.
///
/// The `games` slice is the day's game list; each entry is expected to carry
/// `status.abstractGameState`, `status.startTimeTBD` and `gameDate`.
pub fn day_expiry(
    date: NaiveDate,
    games: &[serde_json::Value],
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let today = now.date_naive();

    // Finished days never change again.
    if date <= today - Duration::days(2) {
        return None;
    }

    // Future days only pick up changes at the daily rollover.
    if date > today {
        return Some(next_cutover(now));
    }

    let mut live_or_unsettled = false;
    let mut next_start: Option<DateTime<Utc>> = None;

    for game in games {
        let state = game
            .pointer("/status/abstractGameState")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let tbd = game
            .pointer("/status/startTimeTBD")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if state == "Live" || (state == "Preview" && tbd) {
            live_or_unsettled = true;
        }

        if state == "Preview" && !tbd {
            if let Some(start) = game
                .get("gameDate")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            {
                if start > now && next_start.map(|n| start < n).unwrap_or(true) {
                    next_start = Some(start);
                }
            }
        }
    }

    if live_or_unsettled {
        return Some(now + LIVE_TTL);
    }

    if let Some(start) = next_start {
        let threshold = start - PREGAME_LEAD;
        if threshold > now {
            return Some(threshold.min(now + DEFAULT_TTL));
        }
        // First pitch is imminent; refresh aggressively.
        return Some(now + LIVE_TTL);
    }

    Some(now + DEFAULT_TTL)
}

/// Expiry for the multi-week schedule document.
pub fn week_expiry(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(next_cutover(now))
}

/// Expiry for a per-broadcast milestone ("airings") document.
pub fn airings_expiry(
    game_date: NaiveDate,
    live_today: bool,
    boundaries_complete: bool,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let today = now.date_naive();

    if game_date < today {
        return None;
    }
    if live_today || !boundaries_complete {
        return Some(now + GROWING_TTL);
    }
    Some(now + DEFAULT_TTL)
}

/// Expiry for a highlights document.
pub fn highlights_expiry(
    game_date: NaiveDate,
    currently_airing: bool,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let today = now.date_naive();

    if game_date <= today - Duration::days(1) {
        return None;
    }
    if game_date == today && currently_airing {
        return Some(now + GROWING_TTL);
    }
    Some(now + DEFAULT_TTL)
}
