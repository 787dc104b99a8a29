use std::fmt;

use tracing::{debug, error, warn};

use super::config::OverlapPolicy;
use super::seq;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    end: u32,
    data: Vec<u8>,
    fin: bool,
}

impl Segment {
    pub fn new(end: u32, data: &[u8], fin: bool) -> Self {
        Self {
            end,
            data: data.to_vec(),
            fin,
        }
    }

    pub fn begin(&self) -> u32 {
        self.end.wrapping_sub(seq::offset(self.data.len()))
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_final(&self) -> bool {
        self.fin
    }

    fn append(&mut self, data: &[u8], fin: bool) {
        self.data.extend_from_slice(data);
        self.end = self.end.wrapping_add(seq::offset(data.len()));
        self.fin |= fin;
    }

    fn prepend(&mut self, data: &[u8]) {
        self.data.splice(0..0, data.iter().copied());
    }

    fn absorb(&mut self, next: Segment) {
        self.append(&next.data, next.fin);
    }

    fn consume(&mut self, len: usize) {
        self.data.drain(..len);
    }
}

/// Out-of-order bytes of one half-stream, kept sorted by `begin` and merged
/// eagerly so that no two neighbours are adjacent. Only the last segment may
/// be final.
#[derive(Debug, Default)]
pub struct SegmentStore {
    segments: Vec<Segment>,
    policy: OverlapPolicy,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: OverlapPolicy) -> Self {
        Self {
            segments: Vec::new(),
            policy,
        }
    }

    /// Stores the fragment `[end - data.len(), end)`, combining it with
    /// neighbouring segments where possible.
    ///
    /// Empty fragments are ignored unless they are final.
    pub fn store(&mut self, end: u32, data: &[u8], fin: bool) {
        if data.is_empty() && !fin {
            return;
        }

        self.place(end, data, fin);
        self.verify();
        debug!(len = data.len(), end, segments = %self, "segment stored");
    }

    pub fn current(&self) -> Option<&Segment> {
        self.segments.first()
    }

    /// Drains `len` bytes from the current segment, removing it once empty.
    pub fn consume(&mut self, len: usize) {
        let Some(front) = self.segments.first_mut() else {
            if len > 0 {
                warn!(len, "consume on empty segment store");
            }
            return;
        };

        let available = front.len();
        if len > available {
            warn!(len, available, "consume past end of current segment");
        }

        if len >= available {
            self.segments.remove(0);
        } else {
            front.consume(len);
        }
        debug!(len, segments = %self, "segment consumed");
    }

    /// Zero-fills every gap of at most `max_missing_bytes` between `end` and
    /// the cached segments, walking forward from `end` and stopping at the
    /// first larger gap. Returns the number of filler bytes added.
    pub fn add_missing_data(&mut self, end: u32, max_missing_bytes: usize) -> usize {
        let mut filled = 0;
        let mut frontier = end;
        let mut idx = 0;

        while idx < self.segments.len() {
            let begin = self.segments[idx].begin();
            if seq::lt(begin, frontier) {
                break;
            }

            let gap = seq::distance(frontier, begin);
            if gap > max_missing_bytes {
                break;
            }
            if gap > 0 {
                self.segments[idx].prepend(&vec![0; gap]);
                filled += gap;
            }

            if idx > 0 {
                let seg = self.segments.remove(idx);
                self.segments[idx - 1].absorb(seg);
            } else {
                idx = 1;
            }
            frontier = self.segments[idx - 1].end();
        }

        if filled > 0 {
            debug!(end, filled, segments = %self, "missing data zero-filled");
            self.verify();
        }
        filled
    }

    pub fn cache_size(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_final(&self) -> bool {
        self.segments.last().is_some_and(Segment::is_final)
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    fn place(&mut self, end: u32, data: &[u8], fin: bool) {
        let begin = end.wrapping_sub(seq::offset(data.len()));

        for idx in 0..self.segments.len() {
            let seg = &self.segments[idx];
            let (seg_begin, seg_end, seg_fin) = (seg.begin(), seg.end(), seg.is_final());

            if begin == seg_end {
                if seg_fin {
                    if data.is_empty() && fin {
                        debug!(end, "duplicate final segment ignored");
                    } else {
                        warn!(begin, end, "data after final segment rejected");
                    }
                    return;
                }
                let next = self.segments.get(idx + 1).map(|next| (next.begin(), next.end()));
                if let Some((next_begin, next_end)) = next
                    && seq::lt(next_begin, end)
                {
                    self.resolve_overlap(begin, end, data, fin, next_begin, next_end);
                    return;
                }
                self.segments[idx].append(data, fin);
                if fin {
                    self.truncate_after(idx);
                } else {
                    self.merge_next(idx);
                }
                return;
            }

            if end == seg_begin {
                // A final segment never merges into a later one.
                if fin {
                    self.segments.insert(idx, Segment::new(end, data, true));
                    self.truncate_after(idx);
                } else {
                    self.segments[idx].prepend(data);
                }
                return;
            }

            if seq::lt(end, seg_begin) {
                self.segments.insert(idx, Segment::new(end, data, fin));
                if fin {
                    self.truncate_after(idx);
                }
                return;
            }

            if seq::lt(begin, seg_end) {
                self.resolve_overlap(begin, end, data, fin, seg_begin, seg_end);
                return;
            }

            if seg_fin {
                warn!(begin, end, final_end = seg_end, "data after final segment rejected");
                return;
            }
        }

        self.segments.push(Segment::new(end, data, fin));
    }

    fn resolve_overlap(
        &mut self,
        begin: u32,
        end: u32,
        data: &[u8],
        fin: bool,
        cached_begin: u32,
        cached_end: u32,
    ) {
        match self.policy {
            OverlapPolicy::DiscardNew => {
                warn!(
                    begin,
                    end, cached_begin, cached_end, "fragment overlaps cached data, discarded"
                );
            }
            OverlapPolicy::KeepNonOverlapping => {
                debug!(
                    begin,
                    end, cached_begin, cached_end, "fragment overlaps cached data, trimming"
                );
                if (seq::lt(cached_end, end) || (fin && end == cached_end))
                    && let Some(tail) = data.get(seq::distance(begin, cached_end)..)
                {
                    self.place(end, tail, fin);
                }
                if seq::lt(begin, cached_begin)
                    && let Some(head) = data.get(..seq::distance(begin, cached_begin))
                {
                    self.place(cached_begin, head, false);
                }
            }
        }
    }

    fn truncate_after(&mut self, idx: usize) {
        if idx + 1 < self.segments.len() {
            let dropped: usize = self.segments[idx + 1..].iter().map(Segment::len).sum();
            warn!(
                final_end = self.segments[idx].end(),
                dropped, "cached data beyond final segment discarded"
            );
            self.segments.truncate(idx + 1);
        }
    }

    fn merge_next(&mut self, idx: usize) {
        if idx + 1 < self.segments.len()
            && self.segments[idx].end() == self.segments[idx + 1].begin()
        {
            let next = self.segments.remove(idx + 1);
            self.segments[idx].absorb(next);
        }
    }

    fn verify(&self) {
        let consistent = self.check_invariant();
        if !consistent {
            error!(segments = %self, "segment store invariant violated");
        }
        debug_assert!(consistent, "segment store invariant violated: {self}");
    }

    fn check_invariant(&self) -> bool {
        let last = self.segments.len().saturating_sub(1);
        let flags_ok = self
            .segments
            .iter()
            .enumerate()
            .all(|(idx, seg)| (!seg.is_final() || idx == last) && (!seg.is_empty() || seg.is_final()));

        flags_ok
            && self
                .segments
                .windows(2)
                .all(|pair| seq::lt(pair[0].end(), pair[1].begin()))
    }
}

impl fmt::Display for SegmentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            write!(f, " [{},{})", seg.begin(), seg.end())?;
            if seg.is_final() {
                write!(f, "F")?;
            }
        }
        Ok(())
    }
}
