//! check-aprs - passive Icinga2 monitoring for APRS stations
//!
//! Listens to an APRS-IS feed filtered to the stations configured in Icinga
//! and turns every transmission heard into a passive check result for that
//! station's `aprsis` service.

pub mod aprs_client;
pub mod aprs_filter;
pub mod aprs_packet;
pub mod callsign;
pub mod classifier;
pub mod config;
pub mod error;
pub mod icinga;
pub mod listener;
pub mod log_format;
pub mod metrics;
pub mod submission;

pub use aprs_client::{AprsClient, FrameSource};
pub use aprs_packet::{Frame, InfoPayload, Position};
pub use callsign::Callsign;
pub use classifier::{CheckResult, classify};
pub use config::{BackendConfig, Config, FeedConfig, FeedConfigBuilder, PoolConfig};
pub use error::{Error, Result};
pub use icinga::{Directory, IcingaClient};
pub use listener::{Listener, ListenerState, RunSummary, StopReason};
pub use submission::{CheckSink, PoolStats, SubmissionPool};
