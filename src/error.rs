use thiserror::Error;

/// Rejected [`FlowTableConfig`](crate::state::FlowTableConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("session idle timeout must be greater than zero")]
    ZeroIdleTimeout,
    #[error("flow table must allow at least one flow")]
    ZeroMaxFlows,
    #[error("per-stream cache limit must be greater than zero")]
    ZeroStreamCache,
}
