//! Livetime segments.
//!
//! Half-open `[start, end)` intervals in GPS seconds. `SegmentList` keeps
//! its members sorted, disjoint and coalesced at all times; that invariant
//! is what makes intersection/livetime queries cheap enough for the hot
//! path.

use serde::{Deserialize, Serialize};

/// A half-open time interval `[start, end)` in GPS seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn new(start: f64, end: f64) -> Self {
        debug_assert!(start <= end, "segment start {start} > end {end}");
        Segment { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }

    pub fn intersects(&self, other: &Segment) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersection(&self, other: &Segment) -> Option<Segment> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            Some(Segment::new(start, end))
        } else {
            None
        }
    }

    /// Shift both boundaries by `dt` seconds.
    pub fn shifted(&self, dt: f64) -> Segment {
        Segment::new(self.start + dt, self.end + dt)
    }
}

/// A sorted, disjoint, coalesced list of segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentList {
    segments: Vec<Segment>,
}

impl SegmentList {
    pub fn new() -> Self {
        SegmentList::default()
    }

    pub fn from_segments(mut segments: Vec<Segment>) -> Self {
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        let mut list = SegmentList::new();
        for seg in segments {
            list.insert(seg);
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Insert a segment, merging with any overlapping or abutting
    /// neighbours.
    pub fn insert(&mut self, seg: Segment) {
        if seg.duration() <= 0.0 {
            return;
        }
        let mut merged = seg;
        let mut out = Vec::with_capacity(self.segments.len() + 1);
        let mut placed = false;
        for s in &self.segments {
            if s.end < merged.start {
                out.push(*s);
            } else if s.start > merged.end {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push(*s);
            } else {
                merged = Segment::new(merged.start.min(s.start), merged.end.max(s.end));
            }
        }
        if !placed {
            out.push(merged);
        }
        self.segments = out;
    }

    pub fn contains(&self, t: f64) -> bool {
        // segments are sorted; binary search on start
        match self
            .segments
            .binary_search_by(|s| s.start.total_cmp(&t))
        {
            Ok(_) => true,
            Err(0) => false,
            Err(i) => self.segments[i - 1].contains(t),
        }
    }

    pub fn livetime(&self) -> f64 {
        self.segments.iter().map(Segment::duration).sum()
    }

    pub fn extent(&self) -> Option<Segment> {
        match (self.segments.first(), self.segments.last()) {
            (Some(a), Some(b)) => Some(Segment::new(a.start, b.end)),
            _ => None,
        }
    }

    pub fn intersection(&self, window: &Segment) -> SegmentList {
        SegmentList {
            segments: self
                .segments
                .iter()
                .filter_map(|s| s.intersection(window))
                .collect(),
        }
    }

    pub fn union(&self, other: &SegmentList) -> SegmentList {
        let mut out = self.clone();
        for seg in &other.segments {
            out.insert(*seg);
        }
        out
    }
}

/// Count, at time `t`, how many of the given segment lists cover it.
/// Used to decide whether enough detectors were live for a trigger to
/// count toward the noise model.
pub fn n_live_at(lists: &[&SegmentList], t: f64) -> usize {
    lists.iter().filter(|l| l.contains(t)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_coalesces_overlaps() {
        let mut list = SegmentList::new();
        list.insert(Segment::new(0.0, 10.0));
        list.insert(Segment::new(5.0, 15.0));
        list.insert(Segment::new(20.0, 30.0));
        assert_eq!(list.segments.len(), 2);
        assert_eq!(list.livetime(), 25.0);
    }

    #[test]
    fn test_insert_coalesces_abutting() {
        let mut list = SegmentList::new();
        list.insert(Segment::new(0.0, 10.0));
        list.insert(Segment::new(10.0, 20.0));
        assert_eq!(list.segments.len(), 1);
        assert_eq!(list.extent().unwrap().end, 20.0);
    }

    #[test]
    fn test_contains_half_open() {
        let list = SegmentList::from_segments(vec![Segment::new(0.0, 10.0)]);
        assert!(list.contains(0.0));
        assert!(list.contains(9.999));
        assert!(!list.contains(10.0));
        assert!(!list.contains(-0.001));
    }

    #[test]
    fn test_intersection_clips() {
        let list = SegmentList::from_segments(vec![
            Segment::new(0.0, 10.0),
            Segment::new(20.0, 30.0),
        ]);
        let clipped = list.intersection(&Segment::new(5.0, 25.0));
        assert_eq!(clipped.livetime(), 10.0);
    }

    #[test]
    fn test_n_live_at() {
        let a = SegmentList::from_segments(vec![Segment::new(0.0, 10.0)]);
        let b = SegmentList::from_segments(vec![Segment::new(5.0, 15.0)]);
        assert_eq!(n_live_at(&[&a, &b], 7.0), 2);
        assert_eq!(n_live_at(&[&a, &b], 12.0), 1);
        assert_eq!(n_live_at(&[&a, &b], 20.0), 0);
    }
}
