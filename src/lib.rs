//! On-Device Network IDS - Detection Core
//!
//! Raw IPv4 datagrams flow through a fixed pipeline:
//!
//! - [`net::parser`] decodes one datagram into header + payload
//! - [`net::transport`] pulls TCP/UDP ports out of the payload
//! - [`flow::FlowAggregator`] keeps live per-flow counters keyed by 5-tuple
//! - every window period the aggregator is summarized into
//!   [`flow::FeatureVector`]s and fed to the [`detect::RuleEngine`]
//! - alerts and per-packet flow snapshots land in the SQLite [`store::Store`]
//!   through a bounded, best-effort persistence queue
//!
//! [`pipeline::Pipeline`] owns all of the above and the three tasks that
//! drive them (ingestion, window timer, persistence writer). Capture and
//! presentation layers live outside this crate.

pub mod config;
pub mod detect;
pub mod error;
pub mod flow;
pub mod net;
pub mod pipeline;
pub mod stats;
pub mod store;

mod clock;

pub use config::PipelineConfig;
pub use detect::{Alert, DetectionDispatcher, Rule, RuleEngine, RuleThresholds};
pub use error::{Error, Result};
pub use flow::{FeatureVector, FlowAggregator, FlowKey};
pub use pipeline::Pipeline;
pub use stats::PipelineStats;
pub use store::Store;
