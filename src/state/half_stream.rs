use std::fmt;

use tracing::{debug, warn};

use super::config::{OverlapPolicy, StreamLimits};
use super::segment_store::SegmentStore;
use super::seq;

/// Reassembly state for one direction of a TCP connection.
///
/// `end` is the frontier: the next sequence number to be delivered. Bytes
/// before it have been handed out, bytes at or after it are either returned
/// straight from the caller's buffer or cached in the segment store.
#[derive(Debug, Default)]
pub struct HalfStream {
    store: SegmentStore,
    end: u32,
    first_seen_ms: Option<u64>,
    last_seen_ms: u64,
    finished: bool,
    limits: StreamLimits,
}

impl HalfStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: StreamLimits) -> Self {
        Self {
            store: SegmentStore::with_policy(limits.overlap_policy),
            limits,
            ..Self::default()
        }
    }

    /// Processes the fragment `[end - data.len(), end)` observed at `now_ms`.
    ///
    /// The returned view borrows `data` when the fragment is exactly the next
    /// expected run and nothing is cached; otherwise it refers to the cache.
    pub fn receive<'a>(
        &'a mut self,
        now_ms: u64,
        end: u32,
        data: &'a [u8],
        session_id: u64,
        fin: bool,
    ) -> FlowData<'a> {
        let mut begin = end.wrapping_sub(seq::offset(data.len()));
        let mut data = data;

        if self.first_seen_ms.is_none() {
            self.first_seen_ms = Some(now_ms);
            self.last_seen_ms = now_ms;
            self.end = begin;
            debug!(session_id, begin, end, "new half-stream");
        }

        if self.store.is_empty() {
            if self.finished {
                debug!(session_id, begin, end, frontier = self.end, "late fragment after close dropped");
                return FlowData::empty(session_id);
            }

            if begin == self.end {
                self.last_seen_ms = now_ms;
                self.finished |= fin;
                return FlowData {
                    source: Source::Direct { stream: self, data },
                    session_id,
                    fin,
                };
            }
        }

        if seq::lt(begin, self.end) {
            let straddles = seq::lt(self.end, end);
            if !straddles || self.limits.overlap_policy == OverlapPolicy::DiscardNew {
                debug!(session_id, begin, end, frontier = self.end, "stale fragment dropped");
                return FlowData::empty(session_id);
            }
            let skip = seq::distance(begin, self.end);
            data = data.get(skip..).unwrap_or_default();
            begin = self.end;
            debug!(session_id, begin, end, "fragment trimmed at frontier");
        }

        if self.store.cache_size() + data.len() > self.limits.max_cache_bytes {
            warn!(
                session_id,
                begin,
                end,
                cached = self.store.cache_size(),
                limit = self.limits.max_cache_bytes,
                "stream cache limit reached, fragment dropped"
            );
            return self.latest_data(session_id);
        }

        self.store.store(end, data, fin);
        self.last_seen_ms = now_ms;
        // A final fragment discarded as overlap does not close the stream.
        self.finished |= fin && self.store.is_final();

        self.latest_data(session_id)
    }

    /// A view of the cached bytes starting at the frontier, or an empty view.
    pub fn latest_data(&mut self, session_id: u64) -> FlowData<'_> {
        let fin = match self.store.current() {
            Some(seg) if seg.begin() == self.end => seg.is_final(),
            Some(seg) => {
                debug!(
                    session_id,
                    frontier = self.end,
                    cached_begin = seg.begin(),
                    "cached data does not start at frontier"
                );
                return FlowData::empty(session_id);
            }
            None => return FlowData::empty(session_id),
        };

        FlowData {
            source: Source::Cached { stream: self },
            session_id,
            fin,
        }
    }

    pub fn add_missing_data(&mut self, max_missing_bytes: usize) -> usize {
        self.store.add_missing_data(self.end, max_missing_bytes)
    }

    pub fn clear(&mut self) {
        let cached = self.store.cache_size();
        if cached > 0 {
            warn!(frontier = self.end, cached, segments = %self.store, "discarding cached stream data");
        }

        self.store.clear();
        self.end = 0;
        self.first_seen_ms = None;
        self.last_seen_ms = 0;
        self.finished = false;
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn first_seen(&self) -> Option<u64> {
        self.first_seen_ms
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen_ms
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    fn push_back(&mut self, rest: &[u8], fin: bool) {
        let end = self.end.wrapping_add(seq::offset(rest.len()));
        self.store.store(end, rest, fin);
    }
}

impl fmt::Display for HalfStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.end)?;
        if self.finished {
            write!(f, "F")?;
        }
        write!(f, "{}", self.store)
    }
}

#[derive(Debug)]
enum Source<'a> {
    Empty,
    Direct {
        stream: &'a mut HalfStream,
        data: &'a [u8],
    },
    Cached {
        stream: &'a mut HalfStream,
    },
}

/// Bytes ready for delivery on one half-stream.
///
/// Valid until [`consume`](FlowData::consume) is called, which acknowledges
/// the given number of bytes and advances the stream. Dropping the view
/// without consuming behaves like `consume(0)`: nothing is acknowledged and
/// nothing is lost.
#[derive(Debug)]
#[must_use = "call consume() to acknowledge delivered bytes"]
pub struct FlowData<'a> {
    source: Source<'a>,
    session_id: u64,
    fin: bool,
}

impl<'a> FlowData<'a> {
    /// A view with no bytes, tagged with `session_id` (0 for none).
    pub fn empty(session_id: u64) -> Self {
        Self {
            source: Source::Empty,
            session_id,
            fin: false,
        }
    }

    pub fn data(&self) -> &[u8] {
        match &self.source {
            Source::Empty => &[],
            Source::Direct { data, .. } => *data,
            Source::Cached { stream } => stream
                .store
                .current()
                .map(|seg| seg.data())
                .unwrap_or_default(),
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// No more bytes follow this view on its half-stream.
    pub fn is_final(&self) -> bool {
        self.fin
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.source, Source::Cached { .. })
    }

    /// Acknowledges the first `len` bytes of the view. Any unacknowledged
    /// bytes stay with the stream and are offered again.
    pub fn consume(mut self, len: usize) {
        self.release(len);
    }

    fn release(&mut self, len: usize) {
        let available = self.len();
        let len = if len > available {
            warn!(len, available, session_id = self.session_id, "consume clamped to view size");
            available
        } else {
            len
        };

        match std::mem::replace(&mut self.source, Source::Empty) {
            Source::Empty => {}
            Source::Direct { stream, data } => {
                stream.end = stream.end.wrapping_add(seq::offset(len));
                if len < data.len() {
                    stream.push_back(&data[len..], self.fin);
                }
            }
            Source::Cached { stream } => {
                stream.end = stream.end.wrapping_add(seq::offset(len));
                stream.store.consume(len);
            }
        }
    }
}

impl Drop for FlowData<'_> {
    fn drop(&mut self) {
        if matches!(self.source, Source::Direct { .. }) {
            self.release(0);
        }
    }
}
