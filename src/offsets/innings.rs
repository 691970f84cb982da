//! Inning offset derivation from broadcast milestones.

use crate::offsets::{anchor_time, OffsetSpan, OffsetTable, BREAK_LEN, END_PAD, START_PAD, UNBOUNDED};
use crate::schedule::Milestone;

/// Build the per-half-inning offset table from an ordered milestone list.
///
/// Returns `None` when the list is too sparse to anchor (fewer than two
/// milestones, or none that name an inning). A missing bound is inferred
/// from the nearest slot that has the opposite bound, plus or minus the
/// fixed break length; starts are then padded earlier and ends later so
/// the cut never clips action.
pub fn build(milestones: &[Milestone]) -> Option<OffsetTable> {
    if milestones.len() < 2 {
        return None;
    }
    let anchor = anchor_time(milestones)?;

    // Raw bounds per slot.
    let mut starts: Vec<Option<f64>> = Vec::new();
    let mut ends: Vec<Option<f64>> = Vec::new();

    for m in milestones {
        let inning = match m.inning {
            Some(inning) if inning > 0 => inning,
            _ => continue,
        };
        let slot = OffsetTable::slot_for(inning, m.top.unwrap_or(true));
        if starts.len() < slot {
            starts.resize(slot, None);
            ends.resize(slot, None);
        }

        // Milestones usually carry an explicit stream offset; fall back to
        // the wall-clock delta from the anchor.
        let offset = if m.offset > 0.0 {
            m.offset
        } else {
            (m.time - anchor).num_milliseconds() as f64 / 1000.0
        };

        match m.kind.as_str() {
            "INNING_START" => starts[slot - 1] = Some(offset),
            "INNING_END" => ends[slot - 1] = Some(offset),
            _ => {}
        }
    }

    if starts.iter().all(|s| s.is_none()) && ends.iter().all(|e| e.is_none()) {
        return None;
    }

    let slots = starts.len();
    let mut spans = Vec::with_capacity(slots);

    for slot in 0..slots {
        let start = starts[slot].or_else(|| {
            // Nearest earlier slot with a known end, plus one break.
            (0..slot)
                .rev()
                .find_map(|j| ends[j])
                .map(|end| end + BREAK_LEN)
        });
        let end = ends[slot].or_else(|| {
            // Nearest later slot with a known start, minus one break.
            ((slot + 1)..slots)
                .find_map(|j| starts[j])
                .map(|start| start - BREAK_LEN)
        });

        let start = start.unwrap_or(0.0);
        let end = end.unwrap_or(UNBOUNDED);

        let start = (start - START_PAD).max(0.0);
        let end = if end == UNBOUNDED { end } else { (end + END_PAD).max(start) };

        spans.push(OffsetSpan { start, end });
    }

    // Enforce monotonically non-decreasing starts across slots.
    for i in 1..spans.len() {
        if spans[i].start < spans[i - 1].start {
            spans[i].start = spans[i - 1].start;
        }
        if spans[i].end < spans[i].start {
            spans[i].end = spans[i].start;
        }
    }

    Some(OffsetTable { spans })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn anchor() -> DateTime<Utc> {
        "2026-08-25T17:00:00Z".parse().unwrap()
    }

    fn milestone(kind: &str, inning: Option<u32>, top: bool, offset: f64) -> Milestone {
        Milestone {
            kind: kind.to_string(),
            time: anchor() + Duration::milliseconds((offset * 1000.0) as i64),
            offset,
            inning,
            top: Some(top),
        }
    }

    #[test]
    fn test_build_too_sparse() {
        assert!(build(&[]).is_none());
        assert!(build(&[milestone("BROADCAST_START", None, true, 0.0)]).is_none());
    }

    #[test]
    fn test_explicit_bounds_are_padded() {
        let ms = vec![
            milestone("BROADCAST_START", None, true, 0.0),
            milestone("INNING_START", Some(1), true, 500.0),
            milestone("INNING_END", Some(1), true, 1200.0),
        ];
        let table = build(&ms).unwrap();
        assert_eq!(table.spans.len(), 1);
        assert_eq!(table.spans[0].start, 500.0 - START_PAD);
        assert_eq!(table.spans[0].end, 1200.0 + END_PAD);
    }

    #[test]
    fn test_missing_bounds_inferred_from_neighbors() {
        // Only inning 1 (top) and inning 3 (top) carry milestones; the
        // slots in between infer start = inning-1 end + break and
        // end = inning-3 start - break.
        let ms = vec![
            milestone("BROADCAST_START", None, true, 0.0),
            milestone("INNING_START", Some(1), true, 500.0),
            milestone("INNING_END", Some(1), true, 1200.0),
            milestone("INNING_START", Some(3), true, 3000.0),
            milestone("INNING_END", Some(3), true, 3700.0),
        ];
        let table = build(&ms).unwrap();
        // Slots: 1 (inning 1 top) .. 5 (inning 3 top).
        assert_eq!(table.spans.len(), 5);

        // Inning 2 top is slot 3 -> spans[2].
        let inning2 = table.spans[2];
        assert_eq!(inning2.start, (1200.0 + BREAK_LEN) - START_PAD);
        assert_eq!(inning2.end, (3000.0 - BREAK_LEN) + END_PAD);
    }

    #[test]
    fn test_open_final_inning_is_unbounded() {
        let ms = vec![
            milestone("BROADCAST_START", None, true, 0.0),
            milestone("INNING_START", Some(1), true, 500.0),
        ];
        let table = build(&ms).unwrap();
        assert_eq!(table.spans[0].end, UNBOUNDED);
    }

    #[test]
    fn test_wall_clock_fallback_when_offset_missing() {
        let mut m = milestone("INNING_START", Some(1), true, 0.0);
        m.time = anchor() + Duration::seconds(480);
        let ms = vec![milestone("BROADCAST_START", None, true, 0.0), m];
        let table = build(&ms).unwrap();
        assert_eq!(table.spans[0].start, 480.0 - START_PAD);
    }

    #[test]
    fn test_monotonic_spans() {
        let ms = vec![
            milestone("BROADCAST_START", None, true, 0.0),
            milestone("INNING_START", Some(1), true, 500.0),
            milestone("INNING_END", Some(1), true, 1200.0),
            milestone("INNING_START", Some(2), true, 1400.0),
            milestone("INNING_END", Some(2), true, 2100.0),
        ];
        let table = build(&ms).unwrap();
        for pair in table.spans.windows(2) {
            assert!(pair[1].start >= pair[0].start);
        }
    }
}
