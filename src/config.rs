//! Runtime configuration, built once at startup and handed to each component.

use std::time::Duration;

use crate::callsign::Callsign;
use crate::error::{Error, Result};

pub const DEFAULT_APRSIS_HOST: &str = "noam.aprs2.net";
/// User-defined filter port; requires a filter command at login
pub const DEFAULT_APRSIS_PORT: u16 = 14580;
/// Receive-only passcode
pub const RECEIVE_ONLY_PASSCODE: &str = "-1";
pub const DEFAULT_ICINGA_URL: &str = "https://localhost:5665";
pub const DEFAULT_SERVICE_NAME: &str = "aprsis";
pub const DEFAULT_CHECK_SOURCE: &str = "APRSIS";

/// Configuration for the APRS-IS feed connection
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// APRS-IS server hostname
    pub server: String,
    /// APRS-IS server port
    pub port: u16,
    /// Our own on-air identity used for login
    pub callsign: String,
    /// APRS-IS passcode; `-1` logs in receive-only
    pub passcode: String,
    /// Software name and version announced at login
    pub software: String,
    pub software_version: String,
    /// Interval between `#` keepalive lines sent to the server
    pub keepalive_interval: Duration,
    /// Disconnect if nothing at all is received for this long
    pub idle_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_APRSIS_HOST.to_string(),
            port: DEFAULT_APRSIS_PORT,
            callsign: "N0CALL".to_string(),
            passcode: RECEIVE_ONLY_PASSCODE.to_string(),
            software: env!("CARGO_PKG_NAME").to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            keepalive_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl FeedConfig {
    pub fn is_receive_only(&self) -> bool {
        self.passcode == RECEIVE_ONLY_PASSCODE
    }
}

/// Builder for [`FeedConfig`]
pub struct FeedConfigBuilder {
    config: FeedConfig,
}

impl FeedConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: FeedConfig::default(),
        }
    }

    pub fn server<S: Into<String>>(mut self, server: S) -> Self {
        self.config.server = server.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn callsign<S: Into<String>>(mut self, callsign: S) -> Self {
        self.config.callsign = callsign.into();
        self
    }

    pub fn passcode<S: Into<String>>(mut self, passcode: S) -> Self {
        self.config.passcode = passcode.into();
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Validate and build. The login callsign must be a valid station id.
    pub fn build(self) -> Result<FeedConfig> {
        let callsign: Callsign = self.config.callsign.parse()?;
        if self.config.passcode.is_empty() {
            return Err(Error::Config {
                reason: "APRS-IS passcode must not be empty (use -1 for receive-only)"
                    .to_string(),
            });
        }
        Ok(FeedConfig {
            callsign: callsign.into(),
            ..self.config
        })
    }
}

impl Default for FeedConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Icinga2 API connection settings
#[derive(Clone)]
pub struct BackendConfig {
    /// API base URL, e.g. `https://icinga.example.org:5665`
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// SHA-256 fingerprint of the API certificate; pins the certificate when set
    pub fingerprint: Option<Vec<u8>>,
    /// Icinga service name the passive check results are filed under
    pub service_name: String,
    /// Reported as `check_source` on every result
    pub check_source: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("fingerprint", &self.fingerprint.as_ref().map(hex::encode))
            .field("service_name", &self.service_name)
            .field("check_source", &self.check_source)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl BackendConfig {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            fingerprint: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            check_source: DEFAULT_CHECK_SOURCE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Submission worker pool sizing
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    /// Queue capacity per worker
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 256,
        }
    }
}

/// Everything the listener needs
#[derive(Debug, Clone)]
pub struct Config {
    pub feed: FeedConfig,
    pub backend: BackendConfig,
    pub pool: PoolConfig,
    /// How long in-flight submissions may run after a shutdown request
    pub shutdown_grace: Duration,
}

/// Parse a certificate fingerprint given as hex, with or without colons
pub fn parse_fingerprint(value: &str) -> Result<Vec<u8>> {
    let cleaned: String = value.chars().filter(|c| *c != ':').collect();
    let bytes = hex::decode(cleaned.trim()).map_err(|e| Error::Config {
        reason: format!(
            "fingerprint must be a hexadecimal string (with or without colons): {e}"
        ),
    })?;
    if bytes.len() != 32 {
        return Err(Error::Config {
            reason: format!(
                "fingerprint must be a SHA-256 digest (32 bytes), got {} bytes",
                bytes.len()
            ),
        });
    }
    Ok(bytes)
}
