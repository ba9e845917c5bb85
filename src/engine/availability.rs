use crate::model::*;

// ── Availability algebra ──────────────────────────────────────────

/// Free sub-intervals of `query` for one resource: everything not covered
/// by a reservation window. Fixed or flagged-unavailable resources have no
/// free time at all.
pub fn free_windows(resource: &ResourceState, query: &TimeRange) -> Vec<TimeRange> {
    if resource.kind == ResourceKind::Fixed || resource.availability == Availability::Unavailable {
        return Vec::new();
    }
    let mut busy: Vec<TimeRange> = resource
        .windows
        .overlapping(query)
        .map(|w| {
            TimeRange::new(
                w.range.start.max(query.start),
                w.range.end.min(query.end),
            )
        })
        .collect();
    busy.sort_by_key(|r| r.start);
    let busy = merge_overlapping(&busy);
    subtract_ranges(&[*query], &busy)
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[TimeRange]) -> Vec<TimeRange> {
    let mut merged: Vec<TimeRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end {
                last.end = last.end.max(range.end);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// Subtract sorted disjoint `to_remove` ranges from sorted `base` ranges.
pub fn subtract_ranges(base: &[TimeRange], to_remove: &[TimeRange]) -> Vec<TimeRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeRange::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const T0: Ms = crate::limits::MIN_VALID_TIMESTAMP_MS;

    fn movable(windows: &[(Ms, Ms)]) -> ResourceState {
        let mut rs = ResourceState::new(
            Ulid::new(),
            "whiteboard".into(),
            ResourceKind::Movable,
            Availability::Available,
        );
        for &(start, end) in windows {
            rs.windows.insert(Reservation {
                appointment_id: Ulid::new(),
                range: TimeRange::new(start, end),
            });
        }
        rs
    }

    // ── subtract_ranges ────────────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![TimeRange::new(100, 200), TimeRange::new(300, 400)];
        let remove = vec![TimeRange::new(200, 300)];
        assert_eq!(subtract_ranges(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![TimeRange::new(100, 200)];
        let remove = vec![TimeRange::new(50, 250)];
        assert!(subtract_ranges(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![TimeRange::new(100, 300)];
        let remove = vec![TimeRange::new(150, 200)];
        assert_eq!(
            subtract_ranges(&base, &remove),
            vec![TimeRange::new(100, 150), TimeRange::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![TimeRange::new(0, 1000)];
        let remove = vec![
            TimeRange::new(100, 200),
            TimeRange::new(400, 500),
            TimeRange::new(800, 900),
        ];
        assert_eq!(
            subtract_ranges(&base, &remove),
            vec![
                TimeRange::new(0, 100),
                TimeRange::new(200, 400),
                TimeRange::new(500, 800),
                TimeRange::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ──────────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let ranges = vec![
            TimeRange::new(100, 300),
            TimeRange::new(200, 400),
            TimeRange::new(500, 600),
        ];
        assert_eq!(
            merge_overlapping(&ranges),
            vec![TimeRange::new(100, 400), TimeRange::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let ranges = vec![TimeRange::new(100, 200), TimeRange::new(200, 300)];
        assert_eq!(merge_overlapping(&ranges), vec![TimeRange::new(100, 300)]);
    }

    // ── free_windows ───────────────────────────────────────────

    #[test]
    fn free_windows_punch_out_reservations() {
        let rs = movable(&[(T0 + 10 * H, T0 + 11 * H)]);
        let query = TimeRange::new(T0 + 9 * H, T0 + 12 * H);
        assert_eq!(
            free_windows(&rs, &query),
            vec![
                TimeRange::new(T0 + 9 * H, T0 + 10 * H),
                TimeRange::new(T0 + 11 * H, T0 + 12 * H),
            ]
        );
    }

    #[test]
    fn free_windows_clamps_to_query() {
        // Window starts before and ends inside the query.
        let rs = movable(&[(T0, T0 + 10 * H)]);
        let query = TimeRange::new(T0 + 9 * H, T0 + 12 * H);
        assert_eq!(
            free_windows(&rs, &query),
            vec![TimeRange::new(T0 + 10 * H, T0 + 12 * H)]
        );
    }

    #[test]
    fn free_windows_empty_for_fixed() {
        let mut rs = movable(&[]);
        rs.kind = ResourceKind::Fixed;
        rs.availability = Availability::Unavailable;
        assert!(free_windows(&rs, &TimeRange::new(T0, T0 + H)).is_empty());
    }

    #[test]
    fn free_windows_unreserved_resource_is_fully_free() {
        let rs = movable(&[]);
        let query = TimeRange::new(T0, T0 + H);
        assert_eq!(free_windows(&rs, &query), vec![query]);
    }
}
