use crate::error::ConfigError;

/// How the segment store treats a fragment overlapping bytes it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Keep what is cached and drop the whole conflicting fragment.
    #[default]
    DiscardNew,
    /// Keep what is cached and store only the parts of the fragment that fall
    /// outside cached ranges or past the delivery frontier.
    KeepNonOverlapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub max_cache_bytes: usize,
    pub overlap_policy: OverlapPolicy,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_cache_bytes: DEFAULT_STREAM_CACHE_BYTES,
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

pub const DEFAULT_SESSION_IDLE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_MAX_FLOWS: usize = 100_000;
pub const DEFAULT_STREAM_CACHE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTableConfig {
    /// A finished flow, or an unfinished one seeing a fresh SYN, starts a new
    /// session after this much silence.
    pub session_idle_timeout_ms: u64,
    /// Oldest flow (by last activity) is evicted to make room past this.
    pub max_flows: usize,
    pub max_stream_cache_bytes: usize,
    pub overlap_policy: OverlapPolicy,
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout_ms: DEFAULT_SESSION_IDLE_TIMEOUT_MS,
            max_flows: DEFAULT_MAX_FLOWS,
            max_stream_cache_bytes: DEFAULT_STREAM_CACHE_BYTES,
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

impl FlowTableConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_idle_timeout_ms == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        if self.max_flows == 0 {
            return Err(ConfigError::ZeroMaxFlows);
        }
        if self.max_stream_cache_bytes == 0 {
            return Err(ConfigError::ZeroStreamCache);
        }
        Ok(())
    }

    pub fn stream_limits(&self) -> StreamLimits {
        StreamLimits {
            max_cache_bytes: self.max_stream_cache_bytes,
            overlap_policy: self.overlap_policy,
        }
    }
}
