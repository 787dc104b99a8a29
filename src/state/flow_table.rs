use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::flags::TcpFlags;

use super::config::{FlowTableConfig, StreamLimits};
use super::flow_key::{Endpoint, FlowKey};
use super::half_stream::{FlowData, HalfStream};
use super::seq;
use super::timers::is_expired;

/// Both half-streams of one connection plus its session bookkeeping.
#[derive(Debug)]
pub struct FlowEntry {
    session_id: u64,
    x: HalfStream,
    y: HalfStream,
    first_seen_ms: u64,
    last_seen_ms: u64,
}

impl FlowEntry {
    fn new(limits: StreamLimits) -> Self {
        Self {
            session_id: 0,
            x: HalfStream::with_limits(limits),
            y: HalfStream::with_limits(limits),
            first_seen_ms: 0,
            last_seen_ms: 0,
        }
    }

    pub fn reset(&mut self, now_ms: u64, session_id: u64) {
        self.session_id = session_id;
        self.x.clear();
        self.y.clear();
        self.first_seen_ms = now_ms;
        self.last_seen_ms = now_ms;
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Half-stream sent by the lesser endpoint of the key.
    pub fn x(&self) -> &HalfStream {
        &self.x
    }

    /// Half-stream sent by the greater endpoint of the key.
    pub fn y(&self) -> &HalfStream {
        &self.y
    }

    pub fn first_seen(&self) -> u64 {
        self.first_seen_ms
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen_ms
    }

    pub fn is_finished(&self) -> bool {
        self.x.is_finished() && self.y.is_finished()
    }

    fn cached(&self) -> (usize, usize) {
        (
            self.x.store().cache_size() + self.y.store().cache_size(),
            self.x.store().segment_count() + self.y.store().segment_count(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounters {
    /// Segments without payload or SYN/FIN/RST.
    pub bare_ack: u64,
    pub syn_with_payload: u64,
    /// Segments for a closed session that was not idle long enough to restart.
    pub late_segment: u64,
    pub evicted_flows: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowTableStats {
    pub flows: usize,
    pub capacity: usize,
    pub load_factor: f64,
    pub finished_flows: usize,
    pub cached_bytes: usize,
    pub cached_segments: usize,
    pub sessions_started: u64,
    pub drops: DropCounters,
}

impl fmt::Display for FlowTableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flows={} finished={} capacity={} load={:.2} cached_bytes={} cached_segments={} sessions={} bare_ack={} syn_payload={} late={} evicted={}",
            self.flows,
            self.finished_flows,
            self.capacity,
            self.load_factor,
            self.cached_bytes,
            self.cached_segments,
            self.sessions_started,
            self.drops.bare_ack,
            self.drops.syn_with_payload,
            self.drops.late_segment,
            self.drops.evicted_flows,
        )
    }
}

/// Reassembles TCP byte streams for every observed connection.
///
/// ```
/// use std::net::SocketAddr;
/// use tcp_demux::{FlowTable, TcpFlags};
///
/// let src: SocketAddr = "10.0.0.1:40000".parse().expect("address");
/// let dst: SocketAddr = "10.0.0.2:80".parse().expect("address");
/// let mut table = FlowTable::new();
///
/// table.receive(0, &src, &dst, 99, &[], TcpFlags::SYN).consume(0);
///
/// let data = table.receive(1, &src, &dst, 100, b"GET /", TcpFlags::ACK);
/// assert_eq!(data.data(), b"GET /");
/// data.consume(5);
/// ```
///
/// One writer at a time: the table does no locking. Shard by key to spread
/// flows over threads.
#[derive(Debug)]
pub struct FlowTable<E = SocketAddr> {
    entries: HashMap<FlowKey<E>, FlowEntry>,
    config: FlowTableConfig,
    last_session_id: u64,
    sessions_started: u64,
    drops: DropCounters,
}

impl<E: Endpoint> Default for FlowTable<E> {
    fn default() -> Self {
        Self::build(FlowTableConfig::default())
    }
}

impl<E: Endpoint> FlowTable<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FlowTableConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: FlowTableConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            last_session_id: 0,
            sessions_started: 0,
            drops: DropCounters::default(),
        }
    }

    /// Submits one observed TCP segment travelling `src -> dst`.
    ///
    /// `seq` is the raw sequence number from the header. The returned view
    /// carries the session id (0 when the segment was dropped before session
    /// lookup) and whatever bytes became deliverable on that half-stream.
    pub fn receive<'a>(
        &'a mut self,
        now_ms: u64,
        src: &E,
        dst: &E,
        seq: u32,
        data: &'a [u8],
        flags: TcpFlags,
    ) -> FlowData<'a> {
        // Segments are tracked by their end; a SYN occupies one sequence number.
        let end = if flags.is_syn() {
            if !data.is_empty() {
                warn!(%src, %dst, len = data.len(), flags = %flags, "TCP SYN has unexpected data");
                self.drops.syn_with_payload += 1;
                return FlowData::empty(0);
            }
            seq.wrapping_add(1)
        } else {
            seq.wrapping_add(seq::offset(data.len()))
        };

        if data.is_empty() && !flags.is_interesting() {
            debug!(%src, %dst, end, flags = %flags, "TCP ignore empty");
            self.drops.bare_ack += 1;
            return FlowData::empty(0);
        }

        let (key, src_is_x) = FlowKey::canonical(src, dst);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_flows {
            self.evict_oldest();
        }

        let limits = self.config.stream_limits();
        let idle_timeout_ms = self.config.session_idle_timeout_ms;
        let Self {
            entries,
            last_session_id,
            sessions_started,
            drops,
            ..
        } = self;
        let entry = entries.entry(key).or_insert_with(|| FlowEntry::new(limits));

        if entry.session_id == 0 {
            entry.reset(now_ms, next_session_id(last_session_id));
            *sessions_started += 1;
        } else if entry.is_finished() {
            // A SYN skips the timeout; anything else must wait it out so a
            // late retransmit does not open a session of its own.
            if flags.is_syn() || is_expired(now_ms, entry.last_seen_ms, idle_timeout_ms) {
                let previous = entry.session_id;
                entry.reset(now_ms, next_session_id(last_session_id));
                *sessions_started += 1;
                debug!(previous, session_id = entry.session_id, flags = %flags, "TCP session restarted");
            } else {
                warn!(session_id = entry.session_id, %src, %dst, end, flags = %flags, "TCP late segment ignored");
                drops.late_segment += 1;
                return FlowData::empty(entry.session_id);
            }
        } else if flags.is_bare_syn() && is_expired(now_ms, entry.last_seen_ms, idle_timeout_ms) {
            warn!(session_id = entry.session_id, %src, %dst, end, "TCP SYN for unfinished idle entry");
            entry.reset(now_ms, next_session_id(last_session_id));
            *sessions_started += 1;
        }

        debug!(
            session_id = entry.session_id,
            %src,
            %dst,
            end,
            flags = %flags,
            idle_ms = now_ms.saturating_sub(entry.last_seen_ms),
            "TCP segment"
        );

        entry.last_seen_ms = now_ms;
        let session_id = entry.session_id;
        let stream = if src_is_x { &mut entry.x } else { &mut entry.y };
        stream.receive(now_ms, end, data, session_id, flags.is_final())
    }

    pub fn lookup(&self, src: &E, dst: &E) -> Option<&HalfStream> {
        let (key, src_is_x) = FlowKey::canonical(src, dst);
        self.entries
            .get(&key)
            .map(|entry| if src_is_x { &entry.x } else { &entry.y })
    }

    pub fn find_entry(&self, src: &E, dst: &E) -> Option<&FlowEntry> {
        let (key, _) = FlowKey::canonical(src, dst);
        self.entries.get(&key)
    }

    /// Offers whatever each half-stream can still deliver, for example at
    /// the end of a capture. Gaps of at most `max_missing_bytes` are
    /// zero-filled first; pass 0 to leave gaps alone.
    ///
    /// `callback` runs twice per flow, once per direction, with the sending
    /// endpoint first. The view may be empty.
    pub fn finish<F>(&mut self, max_missing_bytes: usize, mut callback: F)
    where
        F: FnMut(&E, &E, FlowData<'_>),
    {
        for (key, entry) in &mut self.entries {
            if max_missing_bytes > 0 {
                entry.x.add_missing_data(max_missing_bytes);
                entry.y.add_missing_data(max_missing_bytes);
            }

            let session_id = entry.session_id;
            callback(&key.x, &key.y, entry.x.latest_data(session_id));
            callback(&key.y, &key.x, entry.y.latest_data(session_id));
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn config(&self) -> &FlowTableConfig {
        &self.config
    }

    pub fn stats(&self) -> FlowTableStats {
        let (cached_bytes, cached_segments) = self
            .entries
            .values()
            .map(FlowEntry::cached)
            .fold((0, 0), |(bytes, segs), (b, s)| (bytes + b, segs + s));
        let capacity = self.entries.capacity();

        FlowTableStats {
            flows: self.entries.len(),
            capacity,
            load_factor: if capacity == 0 {
                0.0
            } else {
                self.entries.len() as f64 / capacity as f64
            },
            finished_flows: self.entries.values().filter(|e| e.is_finished()).count(),
            cached_bytes,
            cached_segments,
            sessions_started: self.sessions_started,
            drops: self.drops,
        }
    }

    fn evict_oldest(&mut self) {
        let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen_ms)
            .map(|(key, _)| key.clone())
        else {
            return;
        };

        if let Some(entry) = self.entries.remove(&oldest_key) {
            debug!(
                session_id = entry.session_id,
                key = %oldest_key,
                cached_bytes = entry.cached().0,
                "evicted oldest flow"
            );
            self.drops.evicted_flows += 1;
        }
    }
}

impl<E: Endpoint> fmt::Display for FlowTable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, entry) in &self.entries {
            writeln!(f, "{} {} {}|{}", entry.session_id, key, entry.x, entry.y)?;
        }
        Ok(())
    }
}

/// Session ids count up from 1; 0 is reserved for "no session".
fn next_session_id(last: &mut u64) -> u64 {
    *last = last.wrapping_add(1);
    if *last == 0 {
        *last = 1;
    }
    *last
}
