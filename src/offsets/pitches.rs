//! Pitch ("break") offset derivation from the play-by-play feed.
//!
//! Every pitch keeps its own span; a break-triggering action (wild pitch,
//! stolen base, pickoff and friends) opens a keep interval that runs to the
//! next pitch, or to the at-bat boundary when no pitch follows. Everything
//! outside the keep intervals is implicitly skippable.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::offsets::{merge_spans, OffsetSpan, END_PAD, START_PAD, UNBOUNDED};

/// Event types that keep the broadcast rolling past the pitch itself.
const BREAK_EVENTS: &[&str] = &[
    "wild_pitch",
    "stolen_base",
    "caught_stealing",
    "pickoff",
    "balk",
    "passed_ball",
    "other_advance",
    "defensive_indiff",
];

fn is_break_event(event: &Value) -> bool {
    let event_type = event
        .pointer("/details/eventType")
        .or_else(|| event.pointer("/details/event"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let lowered = event_type.to_ascii_lowercase();
    BREAK_EVENTS.iter().any(|b| lowered.contains(b))
}

fn is_pitch(event: &Value) -> bool {
    event
        .get("isPitch")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn event_time(event: &Value, field: &str) -> Option<DateTime<Utc>> {
    event
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// Derive keep intervals (broadcast-relative seconds) from a play-by-play
/// document, anchored to the broadcast start wall-clock time.
pub fn keep_spans(pbp: &Value, anchor: DateTime<Utc>) -> Vec<OffsetSpan> {
    let offset_of =
        |t: DateTime<Utc>| -> f64 { (t - anchor).num_milliseconds() as f64 / 1000.0 };

    let plays = pbp
        .get("allPlays")
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .unwrap_or(&[]);

    let mut spans = Vec::new();

    for play in plays {
        let events = play
            .get("playEvents")
            .and_then(|v| v.as_array())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let at_bat_end = play.pointer("/about/endTime").and_then(|v| v.as_str());

        for (i, event) in events.iter().enumerate() {
            let Some(start) = event_time(event, "startTime") else {
                continue;
            };

            if is_pitch(event) {
                let end = event_time(event, "endTime").unwrap_or(start);
                spans.push(OffsetSpan {
                    start: (offset_of(start) - START_PAD).max(0.0),
                    end: offset_of(end) + END_PAD,
                });
                continue;
            }

            if is_break_event(event) {
                // Keep rolling until the next pitch, or the at-bat
                // boundary when the half-inning ends on this action.
                let until = events[i + 1..]
                    .iter()
                    .find(|e| is_pitch(e))
                    .and_then(|e| event_time(e, "startTime"))
                    .or_else(|| at_bat_end.and_then(|s| s.parse().ok()));

                let end = match until {
                    Some(t) => offset_of(t) + END_PAD,
                    None => UNBOUNDED,
                };
                spans.push(OffsetSpan {
                    start: (offset_of(start) - START_PAD).max(0.0),
                    end,
                });
            }
        }
    }

    merge_spans(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anchor() -> DateTime<Utc> {
        "2026-08-25T17:00:00Z".parse().unwrap()
    }

    fn pitch(start: &str, end: &str) -> Value {
        json!({"isPitch": true, "startTime": start, "endTime": end})
    }

    #[test]
    fn test_pitches_keep_their_spans() {
        let pbp = json!({"allPlays": [{
            "about": {"endTime": "2026-08-25T17:02:00Z"},
            "playEvents": [
                pitch("2026-08-25T17:00:30Z", "2026-08-25T17:00:40Z"),
                pitch("2026-08-25T17:01:10Z", "2026-08-25T17:01:20Z")
            ]
        }]});
        let spans = keep_spans(&pbp, anchor());
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].start, 30.0 - START_PAD);
        assert_eq!(spans[0].end, 40.0 + END_PAD);
        assert_eq!(spans[1].start, 70.0 - START_PAD);
    }

    #[test]
    fn test_break_event_extends_to_next_pitch() {
        let pbp = json!({"allPlays": [{
            "about": {"endTime": "2026-08-25T17:05:00Z"},
            "playEvents": [
                {"isPitch": false, "startTime": "2026-08-25T17:01:00Z",
                 "details": {"eventType": "stolen_base_2b"}},
                pitch("2026-08-25T17:03:00Z", "2026-08-25T17:03:05Z")
            ]
        }]});
        let spans = keep_spans(&pbp, anchor());
        // The stolen base span runs to the next pitch and merges with it.
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 60.0 - START_PAD);
        assert_eq!(spans[0].end, 185.0 + END_PAD);
    }

    #[test]
    fn test_break_event_falls_back_to_at_bat_boundary() {
        let pbp = json!({"allPlays": [{
            "about": {"endTime": "2026-08-25T17:02:00Z"},
            "playEvents": [
                {"isPitch": false, "startTime": "2026-08-25T17:01:00Z",
                 "details": {"eventType": "wild_pitch"}}
            ]
        }]});
        let spans = keep_spans(&pbp, anchor());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end, 120.0 + END_PAD);
    }

    #[test]
    fn test_non_break_actions_are_ignored() {
        let pbp = json!({"allPlays": [{
            "playEvents": [
                {"isPitch": false, "startTime": "2026-08-25T17:01:00Z",
                 "details": {"eventType": "mound_visit"}}
            ]
        }]});
        assert!(keep_spans(&pbp, anchor()).is_empty());
    }

    #[test]
    fn test_empty_feed() {
        assert!(keep_spans(&json!({}), anchor()).is_empty());
    }
}
