use crate::model::*;

// ── Interval algebra ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `to_remove` merged.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
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
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Clamp busy spans to `window`, sort and merge them.
pub fn busy_within(window: &Span, busy: &[Span]) -> Vec<Span> {
    let mut clamped: Vec<Span> = busy
        .iter()
        .filter(|b| b.overlaps(window))
        .map(|b| Span::new(b.start.max(window.start), b.end.min(window.end)))
        .collect();
    clamped.sort_by_key(|s| s.start);
    merge_overlapping(&clamped)
}

// ── Slot enumeration ──────────────────────────────────────────────

/// Candidate start times inside `window`, ascending at `step_ms` from
/// `window.start`, such that `[t, t + duration_ms)` fits in the window and
/// overlaps no busy span. Empty when the duration does not fit at all.
pub fn free_slots(window: &Span, step_ms: Ms, duration_ms: Ms, busy: &[Span]) -> Vec<Ms> {
    if step_ms <= 0 || duration_ms <= 0 || duration_ms > window.duration_ms() {
        return Vec::new();
    }
    let free = subtract_intervals(&[*window], &busy_within(window, busy));

    let mut slots = Vec::new();
    let mut fi = 0;
    let mut t = window.start;
    while t + duration_ms <= window.end {
        // Skip free spans that end before this candidate does.
        while fi < free.len() && free[fi].end < t + duration_ms {
            fi += 1;
        }
        if fi == free.len() {
            break;
        }
        if free[fi].start <= t {
            slots.push(t);
        }
        t += step_ms;
    }
    slots
}
