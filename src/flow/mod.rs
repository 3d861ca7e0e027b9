//! Flow tracking
//!
//! A flow is the sequence of packets sharing one 5-tuple. The aggregator
//! keeps live counters per flow and summarizes them into feature vectors
//! once per emission window.

pub mod aggregator;
pub mod key;
pub mod vector;

pub use aggregator::{FlowAggregate, FlowAggregator};
pub use key::FlowKey;
pub use vector::FeatureVector;
