pub mod config;
pub mod flow_key;
pub mod flow_table;
pub mod half_stream;
pub mod segment_store;
pub mod seq;
pub mod timers;

pub use config::{FlowTableConfig, OverlapPolicy, StreamLimits};
pub use flow_key::{Endpoint, FlowKey};
pub use flow_table::{DropCounters, FlowEntry, FlowTable, FlowTableStats};
pub use half_stream::{FlowData, HalfStream};
pub use segment_store::{Segment, SegmentStore};
