//! nsperf - an iperf3 control-protocol client with a link impairment shim
//!
//! This library drives throughput tests against an iperf3 server: it
//! performs the control-channel handshake, floods the negotiated number of
//! data streams with payload, and samples the aggregate send rate once per
//! interval. It also provides [`ImpairedLink`], a link-layer wrapper that
//! injects deterministic loss and duplicates retransmitted TCP segments,
//! for exercising a transport implementation under adverse conditions.
//!
//! # Features
//!
//! - iperf3 control handshake (cookie, parameter exchange, stream setup)
//! - Parallel data streams feeding one shared byte counter
//! - Per-interval throughput samples
//! - Deterministic link-layer loss and retransmit duplication
//! - Asynchronous I/O using tokio, with cooperative cancellation

pub mod client;
pub mod config;
pub mod counter;
pub mod error;
pub mod link;
pub mod protocol;
pub mod reporter;
mod stream;

pub use client::Client;
pub use config::Config;
pub use counter::ByteCounter;
pub use error::{Error, Result};
pub use link::{FrameDispatcher, ImpairedLink, LinkEndpoint};
pub use protocol::{ControlState, Cookie, TestParameters};
pub use reporter::RateSample;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
