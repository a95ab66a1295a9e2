use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{Error, Result};

/// Install the Prometheus recorder and serve `/metrics` on `port`.
/// Must be called from within a tokio runtime.
pub fn start_metrics_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::Config {
            reason: format!("failed to start metrics exporter on {}: {}", addr, e),
        })?;
    info!("Serving metrics on http://{}/metrics", addr);

    tokio::spawn(process_metrics_task());
    Ok(())
}

/// Background task updating uptime and resident memory every 5 seconds
async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status")
                && let Some(kb) = status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<f64>().ok())
            {
                metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Register listener metrics at zero so they show up before the first event
pub fn initialize_listener_metrics() {
    // Feed connection
    metrics::counter!("aprs.connection.established").absolute(0);
    metrics::gauge!("aprs.connection.connected").set(0.0);
    metrics::counter!("aprs.keepalive.sent").absolute(0);

    // Frames
    metrics::counter!("aprs.frame.received").absolute(0);
    metrics::counter!("aprs.frame.malformed").absolute(0);
    metrics::counter!("aprs.server_message.received").absolute(0);

    // Classification and submission
    for kind in ["position", "telemetry", "status_beacon", "generic"] {
        metrics::counter!("check.classified", "kind" => kind).absolute(0);
    }
    metrics::counter!("check.classify_failed").absolute(0);
    metrics::counter!("check.submitted").absolute(0);
    metrics::counter!("check.submit_failed").absolute(0);
    metrics::counter!("submission.queue.blocked").absolute(0);
}
