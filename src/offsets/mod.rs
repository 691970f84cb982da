//! Inning and pitch offset tables.
//!
//! An [`OffsetTable`] holds the broadcast-relative intervals worth keeping;
//! the playlist rewrite engine works with their complement (the excluded
//! intervals). Tables are derived from broadcast milestones
//! ([`innings`]) or the play-by-play feed ([`pitches`]).

pub mod innings;
pub mod pitches;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::schedule::{Milestone, ScheduleService};

/// Fixed length assumed for an inning break when a bound must be inferred.
pub const BREAK_LEN: f64 = 120.0;

/// Keep-interval starts are pulled earlier by this much to avoid cutting
/// into action.
pub const START_PAD: f64 = 5.0;

/// Keep-interval ends are pushed later by this much.
pub const END_PAD: f64 = 15.0;

/// Stand-in for "until the end of the broadcast".
pub const UNBOUNDED: f64 = f64::MAX;

/// One keep interval in broadcast-relative seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetSpan {
    pub start: f64,
    pub end: f64,
}

/// Ordered, monotonically non-decreasing keep intervals.
#[derive(Debug, Clone, Default)]
pub struct OffsetTable {
    pub spans: Vec<OffsetSpan>,
}

impl OffsetTable {
    /// Slot index for an inning half: `inning * 2`, minus one for the top
    /// half. Slot 0 is the pre-game anchor and never carries a span.
    pub fn slot_for(inning: u32, top: bool) -> usize {
        (inning as usize) * 2 - usize::from(top)
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Excluded intervals when skipping the time between keeps: everything
    /// before the first keep and every gap between consecutive keeps.
    /// Trailing time after the last keep is left alone.
    pub fn gap_exclusions(&self) -> Vec<OffsetSpan> {
        let mut out = Vec::new();
        let mut cursor = 0.0;
        for span in &self.spans {
            if span.start > cursor {
                out.push(OffsetSpan {
                    start: cursor,
                    end: span.start,
                });
            }
            cursor = cursor.max(span.end);
        }
        out
    }

    /// Excluded intervals when everything outside the keeps is skip,
    /// including the trailing tail.
    pub fn invert(&self) -> Vec<OffsetSpan> {
        let mut out = self.gap_exclusions();
        if let Some(last) = self.spans.last() {
            if last.end < UNBOUNDED {
                out.push(OffsetSpan {
                    start: last.end,
                    end: UNBOUNDED,
                });
            }
        } else {
            // No keeps at all: nothing is excluded rather than everything,
            // so a missing table degrades to a no-op.
        }
        out
    }

    /// Start time of a slot's keep interval, if known. Slots index into
    /// `spans` offset by one (slot 1 is `spans[0]`).
    pub fn slot_start(&self, slot: usize) -> Option<f64> {
        if slot == 0 {
            return None;
        }
        self.spans.get(slot - 1).map(|s| s.start)
    }
}

/// Merge overlapping or touching spans into a minimal sorted set.
pub fn merge_spans(mut spans: Vec<OffsetSpan>) -> Vec<OffsetSpan> {
    spans.sort_by(|a, b| a.start.total_cmp(&b.start));
    let mut out: Vec<OffsetSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if span.end <= span.start {
            continue;
        }
        match out.last_mut() {
            Some(last) if span.start <= last.end => {
                last.end = last.end.max(span.end);
            }
            _ => out.push(span),
        }
    }
    out
}

/// Whether `t` lies inside any of the (sorted) excluded spans.
pub fn is_excluded(exclusions: &[OffsetSpan], t: f64) -> bool {
    exclusions
        .iter()
        .any(|span| t >= span.start && t < span.end)
}

/// The wall-clock broadcast start implied by a milestone list: the first
/// milestone's timestamp minus its own stream offset.
pub fn anchor_time(milestones: &[Milestone]) -> Option<DateTime<Utc>> {
    let first = milestones.first()?;
    Some(first.time - chrono::Duration::milliseconds((first.offset * 1000.0) as i64))
}

/// Derives offset tables for one broadcast, borrowing a companion
/// broadcast's milestones when the broadcast's own are too sparse.
pub struct OffsetService {
    schedule: Arc<ScheduleService>,
}

impl OffsetService {
    pub fn new(schedule: Arc<ScheduleService>) -> Self {
        Self { schedule }
    }

    /// Inning offsets for a content id, or `None` when no usable milestone
    /// data exists (callers silently disable skip options).
    pub async fn inning_table(&self, content_id: &str) -> Result<Option<OffsetTable>> {
        let airings = self.schedule.airings(content_id).await?;
        let mut milestones = airings.milestones.clone();

        // Archived broadcasts with too little data borrow from a companion
        // broadcast of the same game, shifted by the anchor delta.
        if milestones.len() < 2 && !airings.is_live() {
            if let Some(companion) = self.schedule.companion_airings(&airings).await? {
                if let Some(borrowed) = borrow_milestones(&milestones, &companion.milestones) {
                    tracing::info!(
                        "Borrowed {} milestones from companion {} for {}",
                        borrowed.len(),
                        companion.content_id,
                        content_id
                    );
                    milestones = borrowed;
                }
            }
        }

        Ok(innings::build(&milestones))
    }

    /// Pitch ("break") offsets for a content id: keep intervals derived
    /// from the play-by-play feed, anchored to the broadcast start.
    pub async fn pitch_table(&self, content_id: &str) -> Result<Option<OffsetTable>> {
        let airings = self.schedule.airings(content_id).await?;
        let anchor = match anchor_time(&airings.milestones) {
            Some(anchor) => anchor,
            None => return Ok(None),
        };

        let pbp = self.schedule.play_by_play(airings.game_pk).await?;
        let spans = pitches::keep_spans(&pbp, anchor);
        if spans.is_empty() {
            return Ok(None);
        }
        Ok(Some(OffsetTable { spans }))
    }
}

/// Re-key a companion's milestones onto this broadcast's timeline. The
/// shift is the difference between the two broadcasts' anchors, applied to
/// the imported stream offsets before any padding happens downstream.
fn borrow_milestones(own: &[Milestone], companion: &[Milestone]) -> Option<Vec<Milestone>> {
    let own_anchor = anchor_time(own)?;
    let companion_anchor = anchor_time(companion)?;
    let shift = (companion_anchor - own_anchor).num_milliseconds() as f64 / 1000.0;

    Some(
        companion
            .iter()
            .map(|m| {
                let mut m = m.clone();
                m.offset += shift;
                m
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(spans: &[(f64, f64)]) -> OffsetTable {
        OffsetTable {
            spans: spans
                .iter()
                .map(|&(start, end)| OffsetSpan { start, end })
                .collect(),
        }
    }

    #[test]
    fn test_slot_for() {
        assert_eq!(OffsetTable::slot_for(1, true), 1);
        assert_eq!(OffsetTable::slot_for(1, false), 2);
        assert_eq!(OffsetTable::slot_for(9, false), 18);
    }

    #[test]
    fn test_gap_exclusions() {
        let t = table(&[(100.0, 200.0), (300.0, 400.0)]);
        let gaps = t.gap_exclusions();
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0], OffsetSpan { start: 0.0, end: 100.0 });
        assert_eq!(gaps[1], OffsetSpan { start: 200.0, end: 300.0 });
    }

    #[test]
    fn test_invert_includes_tail() {
        let t = table(&[(100.0, 200.0)]);
        let excl = t.invert();
        assert_eq!(excl.len(), 2);
        assert_eq!(excl[1].start, 200.0);
        assert_eq!(excl[1].end, UNBOUNDED);
    }

    #[test]
    fn test_invert_empty_table_excludes_nothing() {
        assert!(table(&[]).invert().is_empty());
    }

    #[test]
    fn test_merge_spans() {
        let merged = merge_spans(vec![
            OffsetSpan { start: 50.0, end: 80.0 },
            OffsetSpan { start: 0.0, end: 60.0 },
            OffsetSpan { start: 100.0, end: 100.0 },
            OffsetSpan { start: 90.0, end: 120.0 },
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], OffsetSpan { start: 0.0, end: 80.0 });
        assert_eq!(merged[1], OffsetSpan { start: 90.0, end: 120.0 });
    }

    #[test]
    fn test_is_excluded() {
        let excl = vec![OffsetSpan { start: 10.0, end: 20.0 }];
        assert!(!is_excluded(&excl, 9.9));
        assert!(is_excluded(&excl, 10.0));
        assert!(is_excluded(&excl, 19.9));
        assert!(!is_excluded(&excl, 20.0));
    }

    #[test]
    fn test_borrow_milestones_shift() {
        use crate::schedule::Milestone;

        // Own broadcast started 60 s after the companion.
        let own = vec![Milestone {
            kind: "BROADCAST_START".to_string(),
            time: "2026-08-25T17:01:00Z".parse().unwrap(),
            offset: 0.0,
            inning: None,
            top: None,
        }];
        let companion = vec![
            Milestone {
                kind: "BROADCAST_START".to_string(),
                time: "2026-08-25T17:00:00Z".parse().unwrap(),
                offset: 0.0,
                inning: None,
                top: None,
            },
            Milestone {
                kind: "INNING_START".to_string(),
                time: "2026-08-25T17:10:00Z".parse().unwrap(),
                offset: 600.0,
                inning: Some(1),
                top: Some(true),
            },
        ];

        let borrowed = borrow_milestones(&own, &companion).unwrap();
        // Companion events sit 60 s earlier on our timeline.
        assert_eq!(borrowed[1].offset, 540.0);
    }
}
