use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::aprs_filter::BuddyFilter;
use crate::aprs_packet::Frame;
use crate::config::FeedConfig;
use crate::error::{Error, Result};

/// Longest line accepted from the server, line ending included
const MAX_LINE_LEN: usize = 512;

/// APRS-IS client. Opens one filtered, authenticated connection per call to [`AprsClient::open`].
pub struct AprsClient {
    config: FeedConfig,
}

impl AprsClient {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    /// Connect, log in and apply the buddy filter.
    ///
    /// The returned [`FrameSource`] yields frames until the connection drops;
    /// it is not restartable.
    #[tracing::instrument(
        skip(self, filter),
        fields(server = %self.config.server, port = %self.config.port)
    )]
    pub async fn open(&self, filter: &BuddyFilter) -> Result<FrameSource> {
        let config = &self.config;
        let server_address = format!("{}:{}", config.server, config.port);
        info!("Connecting to APRS server {}", server_address);

        let addrs = resolve(&server_address).await?;

        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!("Connected to APRS server at {}", addr);
                    metrics::counter!("aprs.connection.established").increment(1);
                    metrics::gauge!("aprs.connection.connected").set(1.0);
                    return FrameSource::login(stream, config, filter, addr.to_string()).await;
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(Error::FeedConnect {
            address: server_address,
            source: last_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses to try")
            }),
        })
    }
}

/// Resolve the relay address, preferring IPv4, in random order
async fn resolve(server_address: &str) -> Result<Vec<std::net::SocketAddr>> {
    let all_addrs: Vec<_> = tokio::net::lookup_host(server_address)
        .await
        .map_err(|source| Error::FeedConnect {
            address: server_address.to_string(),
            source,
        })?
        .collect();

    if all_addrs.is_empty() {
        return Err(Error::FeedConnect {
            address: server_address.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "DNS resolution returned no addresses",
            ),
        });
    }

    let ipv4_addrs: Vec<_> = all_addrs.iter().filter(|a| a.is_ipv4()).cloned().collect();
    let mut addrs = if ipv4_addrs.is_empty() {
        debug!(
            "No IPv4 addresses found for {}, falling back to all addresses",
            server_address
        );
        all_addrs
    } else {
        ipv4_addrs
    };

    {
        use rand::seq::SliceRandom;
        let mut rng = rand::rng();
        addrs.shuffle(&mut rng);
    }

    Ok(addrs)
}

/// Build the login line for APRS-IS authentication
pub fn build_login_command(config: &FeedConfig, filter: &BuddyFilter) -> String {
    format!(
        "user {} pass {} vers {} {} filter {}\r\n",
        config.callsign, config.passcode, config.software, config.software_version, filter
    )
}

/// Stream of frames from one authenticated APRS-IS connection
#[derive(Debug)]
pub struct FrameSource {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: Vec<u8>,
    /// Skipping the rest of an oversized line
    discarding: bool,
    keepalive: tokio::time::Interval,
    idle_timeout: Duration,
    last_received: Instant,
    connected_at: Instant,
    receive_only: bool,
    peer: String,
}

impl FrameSource {
    async fn login(
        stream: TcpStream,
        config: &FeedConfig,
        filter: &BuddyFilter,
        peer: String,
    ) -> Result<Self> {
        let (reader, mut writer) = stream.into_split();

        let login_cmd = build_login_command(config, filter);
        info!(
            "Sending login for {} ({} filtered callsigns{})",
            config.callsign,
            filter.len(),
            if config.is_receive_only() {
                ", receive-only"
            } else {
                ""
            }
        );
        debug!("Login command: {}", login_cmd.trim());

        writer
            .write_all(login_cmd.as_bytes())
            .await
            .map_err(|e| Error::disconnected(format!("failed to send login command: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::disconnected(format!("failed to flush login command: {}", e)))?;

        let mut keepalive = tokio::time::interval_at(
            Instant::now() + config.keepalive_interval,
            config.keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            line: Vec::with_capacity(MAX_LINE_LEN),
            discarding: false,
            keepalive,
            idle_timeout: config.idle_timeout,
            last_received: Instant::now(),
            connected_at: Instant::now(),
            receive_only: config.is_receive_only(),
            peer,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Wait for the next station frame.
    ///
    /// Server comment lines are logged and skipped, as are lines that fail to
    /// parse or exceed [`MAX_LINE_LEN`]. Any connection loss ends the stream
    /// with [`Error::FeedDisconnected`].
    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if self.line.len() > MAX_LINE_LEN {
                self.skip_oversized_line();
            }
            let limit = (MAX_LINE_LEN + 1 - self.line.len()) as u64;
            let mut limited = (&mut self.reader).take(limit);

            tokio::select! {
                read = limited.read_until(b'\n', &mut self.line) => {
                    match read {
                        Ok(0) => {
                            metrics::gauge!("aprs.connection.connected").set(0.0);
                            return Err(Error::disconnected(format!(
                                "connection closed by server after {:.1}s",
                                self.connected_at.elapsed().as_secs_f64()
                            )));
                        }
                        Ok(_) => {
                            self.last_received = Instant::now();
                            if self.line.last() != Some(&b'\n') && self.line.len() > MAX_LINE_LEN {
                                self.skip_oversized_line();
                                continue;
                            }
                            let line = std::mem::take(&mut self.line);
                            if std::mem::take(&mut self.discarding) {
                                continue;
                            }
                            if let Some(frame) = self.handle_line(&line) {
                                return Ok(frame);
                            }
                        }
                        Err(e) => {
                            metrics::gauge!("aprs.connection.connected").set(0.0);
                            return Err(Error::disconnected(format!("read error: {}", e)));
                        }
                    }
                }
                _ = tokio::time::sleep_until(self.last_received + self.idle_timeout) => {
                    metrics::gauge!("aprs.connection.connected").set(0.0);
                    return Err(Error::disconnected(format!(
                        "no data received for {}s",
                        self.idle_timeout.as_secs()
                    )));
                }
                _ = self.keepalive.tick() => {
                    self.send_keepalive().await?;
                }
            }
        }
    }

    async fn send_keepalive(&mut self) -> Result<()> {
        let keepalive_msg = format!("# {} keepalive\r\n", env!("CARGO_PKG_NAME"));
        self.writer
            .write_all(keepalive_msg.as_bytes())
            .await
            .map_err(|e| Error::disconnected(format!("failed to send keepalive: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::disconnected(format!("failed to flush keepalive: {}", e)))?;
        trace!("Sent keepalive to APRS server");
        metrics::counter!("aprs.keepalive.sent").increment(1);
        Ok(())
    }

    fn skip_oversized_line(&mut self) {
        if !self.discarding {
            metrics::counter!("aprs.frame.malformed").increment(1);
            warn!(
                "Skipping line longer than {} bytes starting {:?}",
                MAX_LINE_LEN,
                String::from_utf8_lossy(&self.line[..self.line.len().min(40)])
            );
            self.discarding = true;
        }
        self.line.clear();
    }

    fn handle_line(&self, raw: &[u8]) -> Option<Frame> {
        let line = trim_line_ending(raw);
        if line.is_empty() {
            return None;
        }

        if line[0] == b'#' {
            self.handle_server_message(line);
            return None;
        }

        match Frame::parse(line) {
            Ok(frame) => {
                metrics::counter!("aprs.frame.received").increment(1);
                debug!("Received {}", frame);
                Some(frame)
            }
            Err(e) => {
                metrics::counter!("aprs.frame.malformed").increment(1);
                warn!(
                    "Skipping unparseable line {:?}: {}",
                    String::from_utf8_lossy(line),
                    e
                );
                None
            }
        }
    }

    fn handle_server_message(&self, line: &[u8]) {
        metrics::counter!("aprs.server_message.received").increment(1);
        let text = String::from_utf8_lossy(line);
        let text = text.trim_start_matches('#').trim();
        if text.starts_with("logresp") {
            info!("Login response: {}", text);
            if !self.receive_only && text.contains("unverified") {
                warn!("APRS-IS did not verify our passcode; connection is receive-only");
            }
        } else {
            trace!("Server message: {}", text);
        }
    }
}

fn trim_line_ending(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &raw[..end]
}
