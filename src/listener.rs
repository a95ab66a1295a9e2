use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::aprs_client::AprsClient;
use crate::aprs_filter::BuddyFilter;
use crate::config::{Config, PoolConfig};
use crate::error::Result;
use crate::icinga::IcingaClient;
use crate::submission::{PoolStats, SubmissionPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Starting,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No Icinga host carries an APRS callsign; the feed was never opened
    NothingToMonitor,
    ShutdownRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: StopReason,
    /// Frames from monitored stations handed to the submission pool
    pub frames_received: u64,
    pub stats: PoolStats,
}

/// Bridges the APRS-IS feed to Icinga passive checks.
///
/// Starting: fetch the monitored callsigns; stop cleanly if there are none.
/// Running: open the filtered feed and hand every frame to the submission pool.
/// Stopped: terminal, reached on shutdown or when the feed drops.
pub struct Listener {
    icinga: IcingaClient,
    aprs: AprsClient,
    pool: PoolConfig,
    shutdown_grace: Duration,
    state: ListenerState,
}

impl Listener {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            icinga: IcingaClient::new(&config.backend)?,
            aprs: AprsClient::new(config.feed),
            pool: config.pool,
            shutdown_grace: config.shutdown_grace,
            state: ListenerState::Starting,
        })
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Run until `shutdown` completes or the feed drops.
    ///
    /// A dropped feed is returned as [`crate::Error::FeedDisconnected`] after
    /// in-flight submissions have drained; directory and connection failures
    /// during startup are returned as they occur.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        if self.state != ListenerState::Starting {
            return Err(crate::Error::Config {
                reason: "listener has already run".to_string(),
            });
        }

        let result = self.run_inner(shutdown).await;
        self.state = ListenerState::Stopped;
        result
    }

    async fn run_inner<F>(&mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let directory = self.icinga.fetch_callsigns().await?;

        let Some(filter) = BuddyFilter::new(directory.keys().cloned()) else {
            info!("No callsigns defined in Icinga, nothing to monitor");
            return Ok(RunSummary {
                reason: StopReason::NothingToMonitor,
                frames_received: 0,
                stats: PoolStats::default(),
            });
        };

        let names: Vec<&str> = directory.values().map(String::as_str).collect();
        info!("Monitoring callsigns: {}", names.join(", "));

        let mut source = self.aprs.open(&filter).await?;
        let sink = self.icinga.clone().with_directory(directory);
        let pool = SubmissionPool::start(Arc::new(sink), self.pool);
        self.state = ListenerState::Running;
        info!("Listening for frames from {}", source.peer());

        tokio::pin!(shutdown);
        let mut frames_received = 0u64;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer reading from APRS-IS");
                    break Ok(StopReason::ShutdownRequested);
                }
                next = source.next_frame() => match next {
                    Ok(frame) => {
                        if !filter.contains(&frame.source) {
                            debug!("Ignoring frame from unmonitored station {}", frame.source);
                            continue;
                        }
                        // A full shard must not hold off shutdown
                        tokio::select! {
                            biased;

                            sent = pool.dispatch(frame) => {
                                if sent {
                                    frames_received += 1;
                                } else {
                                    error!("Submission pool is no longer accepting frames");
                                }
                            }
                            _ = &mut shutdown => {
                                info!("Shutdown requested while waiting for a queue slot");
                                break Ok(StopReason::ShutdownRequested);
                            }
                        }
                    }
                    Err(e) => {
                        error!("{}", e);
                        break Err(e);
                    }
                },
            }
        };

        let stats = pool.shutdown(self.shutdown_grace).await;

        outcome.map(|reason| RunSummary {
            reason,
            frames_received,
            stats,
        })
    }
}
