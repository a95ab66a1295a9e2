use std::time::Duration;

use anyhow::{Context, Result, bail};
use check_aprs::config::{
    self, BackendConfig, Config, DEFAULT_APRSIS_HOST, DEFAULT_APRSIS_PORT, DEFAULT_CHECK_SOURCE,
    DEFAULT_ICINGA_URL, DEFAULT_SERVICE_NAME, FeedConfigBuilder, PoolConfig, RECEIVE_ONLY_PASSCODE,
};
use check_aprs::{Listener, StopReason};
use clap::Parser;
use clap::builder::FalseyValueParser;
use tracing::{error, info};

/// A passive Icinga monitoring daemon for APRS stations
#[derive(Parser, Debug)]
#[command(version, about, max_term_width = 120)]
pub struct Cli {
    /// APRS-IS hostname
    #[arg(long, env = "APRSIS_HOST", default_value = DEFAULT_APRSIS_HOST)]
    pub aprsis_host: String,

    /// APRS-IS port (user-defined filter port)
    #[arg(long, env = "APRSIS_PORT", default_value_t = DEFAULT_APRSIS_PORT)]
    pub aprsis_port: u16,

    /// Callsign used to log in to APRS-IS
    #[arg(long, env = "APRS_CALLSIGN")]
    pub aprs_callsign: String,

    /// APRS-IS passcode; -1 logs in receive-only
    #[arg(
        long,
        env = "APRS_PASSCODE",
        default_value = RECEIVE_ONLY_PASSCODE,
        hide_env_values = true
    )]
    pub aprs_passcode: String,

    /// URL for Icinga2 API
    #[arg(long, env = "ICINGA_HOST", default_value = DEFAULT_ICINGA_URL)]
    pub icinga_host: String,

    /// Username for Icinga2 API
    #[arg(long, env = "ICINGA_USERNAME")]
    pub icinga_username: String,

    /// Password for Icinga2 API
    #[arg(long, env = "ICINGA_PASSWORD", hide_env_values = true)]
    pub icinga_password: String,

    /// SHA-256 certificate fingerprint for Icinga2 API (hex, with or without colons)
    #[arg(long, env = "ICINGA_FINGERPRINT", value_parser = parse_fingerprint_arg)]
    pub icinga_fingerprint: Option<Fingerprint>,

    /// Icinga service receiving the passive check results
    #[arg(long, default_value = DEFAULT_SERVICE_NAME)]
    pub service_name: String,

    /// check_source reported with every result
    #[arg(long, default_value = DEFAULT_CHECK_SOURCE)]
    pub check_source: String,

    /// Number of submission workers
    #[arg(long, default_value_t = 8)]
    pub workers: usize,

    /// Queued frames per submission worker before the feed reader waits
    #[arg(long, default_value_t = 256)]
    pub queue_capacity: usize,

    /// Seconds to let in-flight submissions finish on shutdown
    #[arg(long, default_value_t = 10)]
    pub shutdown_grace_seconds: u64,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Disable colored log output
    #[arg(long, env = "NO_COLOR", value_parser = FalseyValueParser::new())]
    pub no_color: bool,
}

/// Parsed `--icinga-fingerprint` digest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint(pub Vec<u8>);

fn parse_fingerprint_arg(value: &str) -> std::result::Result<Fingerprint, String> {
    config::parse_fingerprint(value)
        .map(Fingerprint)
        .map_err(|e| e.to_string())
}

impl Cli {
    pub fn into_config(self) -> Result<Config> {
        let feed = FeedConfigBuilder::new()
            .server(self.aprsis_host)
            .port(self.aprsis_port)
            .callsign(self.aprs_callsign)
            .passcode(self.aprs_passcode)
            .build()
            .context("Invalid APRS-IS settings")?;

        let mut backend =
            BackendConfig::new(self.icinga_host, self.icinga_username, self.icinga_password);
        backend.fingerprint = self.icinga_fingerprint.map(|fp| fp.0);
        backend.service_name = self.service_name;
        backend.check_source = self.check_source;

        if self.workers == 0 {
            bail!("--workers must be at least 1");
        }

        Ok(Config {
            feed,
            backend,
            pool: PoolConfig {
                workers: self.workers,
                queue_capacity: self.queue_capacity.max(1),
            },
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
        })
    }
}

pub async fn handle_run(cli: Cli) -> Result<()> {
    if let Some(port) = cli.metrics_port {
        check_aprs::metrics::start_metrics_exporter(port)?;
    }
    check_aprs::metrics::initialize_listener_metrics();

    let config = cli.into_config()?;
    info!(
        "Starting APRS listener - APRS-IS: {}:{} as {}, Icinga: {}",
        config.feed.server, config.feed.port, config.feed.callsign, config.backend.base_url
    );
    if config.backend.fingerprint.is_none() {
        info!("No Icinga certificate fingerprint given, using standard certificate validation");
    }

    let mut listener = Listener::new(config).context("Failed to set up listener")?;
    let summary = listener.run(shutdown_signal()).await?;

    match summary.reason {
        StopReason::NothingToMonitor => info!("Nothing to monitor, exiting"),
        StopReason::ShutdownRequested => info!(
            "Stopped after {} frames ({} submitted, {} dropped, {} failed)",
            summary.frames_received,
            summary.stats.submitted,
            summary.stats.dropped,
            summary.stats.failed
        ),
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to register signal handlers: {}", e);
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            _ = sigint.recv() => info!("Received SIGINT (Ctrl+C), shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await
            }
        }
    }
}
