pub fn is_expired(now_ms: u64, last_seen_ms: u64, ttl_ms: u64) -> bool {
    now_ms.saturating_sub(last_seen_ms) >= ttl_ms
}
