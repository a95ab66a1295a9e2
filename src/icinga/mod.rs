//! Icinga2 REST API: host directory lookup and passive check submission.

pub mod client;
pub mod tls;

pub use client::{Directory, IcingaClient};
