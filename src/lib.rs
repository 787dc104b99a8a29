//! Passive TCP stream reassembly.
//!
//! Feed every observed TCP segment to [`FlowTable::receive`]; it returns the
//! bytes that became deliverable, in order and exactly once, for the
//! segment's half-stream. Both directions of a connection share one
//! [`FlowEntry`], and sessions restart on a fresh SYN or after the idle
//! timeout once a connection has closed.

pub mod error;
pub mod flags;
pub mod state;

pub use error::ConfigError;
pub use flags::TcpFlags;
pub use state::{
    FlowData, FlowEntry, FlowTable, FlowTableConfig, FlowTableStats, HalfStream, OverlapPolicy,
    Segment, SegmentStore,
};
