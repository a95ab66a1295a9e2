//! Fake Icinga2 API and fake APRS-IS relay for end-to-end listener tests.
//!
//! # Usage
//!
//! ```ignore
//! let icinga = FakeIcinga::start(&["KC1GDW-10"]).await;
//! let relay = FakeRelay::start(vec![b"KC1GDW-10>APRS:>hi".to_vec()], RelayEnd::Close).await;
//! let config = test_config(&icinga, relay.port);
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use check_aprs::config::{BackendConfig, Config, FeedConfigBuilder, PoolConfig};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct IcingaState {
    hosts: Arc<Vec<String>>,
    hosts_status: Option<StatusCode>,
    /// Number of initial check submissions to answer with HTTP 500
    fail_first: Arc<AtomicUsize>,
    /// Delay before answering each check submission
    submit_delay: Duration,
    /// Check submissions that reached the handler, answered or not
    received: Arc<AtomicUsize>,
    accepted: Arc<Mutex<Vec<Value>>>,
    rejected: Arc<Mutex<Vec<Value>>>,
    host_queries: Arc<Mutex<Vec<(HashMap<String, String>, Option<String>)>>>,
}

pub struct FakeIcinga {
    pub addr: SocketAddr,
    state: IcingaState,
}

impl FakeIcinga {
    pub async fn start(callsigns: &[&str]) -> Self {
        Self::start_with(callsigns, None, 0).await
    }

    /// `hosts_status` overrides the directory response status,
    /// `fail_first` rejects that many submissions before accepting.
    pub async fn start_with(
        callsigns: &[&str],
        hosts_status: Option<StatusCode>,
        fail_first: usize,
    ) -> Self {
        Self::serve(IcingaState {
            hosts: Arc::new(callsigns.iter().map(|c| c.to_string()).collect()),
            hosts_status,
            fail_first: Arc::new(AtomicUsize::new(fail_first)),
            ..Default::default()
        })
        .await
    }

    /// Backend that takes `submit_delay` to answer every check submission
    pub async fn start_slow(callsigns: &[&str], submit_delay: Duration) -> Self {
        Self::serve(IcingaState {
            hosts: Arc::new(callsigns.iter().map(|c| c.to_string()).collect()),
            submit_delay,
            ..Default::default()
        })
        .await
    }

    async fn serve(state: IcingaState) -> Self {

        let app = Router::new()
            .route("/v1/objects/hosts", get(hosts))
            .route("/v1/actions/process-check-result", post(process_check_result))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn accepted(&self) -> Vec<Value> {
        self.state.accepted.lock().await.clone()
    }

    /// Check submissions received so far, including ones still being answered
    pub fn received(&self) -> usize {
        self.state.received.load(Ordering::SeqCst)
    }

    pub async fn rejected(&self) -> Vec<Value> {
        self.state.rejected.lock().await.clone()
    }

    /// Query parameters and Authorization header of each directory request
    pub async fn host_queries(&self) -> Vec<(HashMap<String, String>, Option<String>)> {
        self.state.host_queries.lock().await.clone()
    }

    /// Accepted bodies for one callsign, in submission order
    pub async fn accepted_for(&self, callsign: &str) -> Vec<Value> {
        let needle = format!("host.vars.aprs.callsign==\"{}\"", callsign);
        self.accepted()
            .await
            .into_iter()
            .filter(|body| body["filter"].as_str().is_some_and(|f| f.contains(&needle)))
            .collect()
    }
}

async fn hosts(
    State(state): State<IcingaState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.host_queries.lock().await.push((params, auth));

    if let Some(status) = state.hosts_status {
        return (status, Json(json!({"error": status.as_u16(), "status": "nope"})));
    }

    let results: Vec<Value> = state
        .hosts
        .iter()
        .map(|call| {
            json!({
                "name": format!("host-{}", call.to_lowercase()),
                "type": "Host",
                "attrs": {"vars": {"aprs": {"callsign": call}}},
                "joins": {},
                "meta": {}
            })
        })
        .collect();
    (StatusCode::OK, Json(json!({ "results": results })))
}

async fn process_check_result(
    State(state): State<IcingaState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.received.fetch_add(1, Ordering::SeqCst);
    if !state.submit_delay.is_zero() {
        tokio::time::sleep(state.submit_delay).await;
    }

    let should_fail = state
        .fail_first
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();

    if should_fail {
        state.rejected.lock().await.push(body);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": 500, "status": "Internal error"})),
        );
    }

    state.accepted.lock().await.push(body);
    (
        StatusCode::OK,
        Json(json!({
            "results": [{"code": 200.0, "status": "Successfully processed check result"}]
        })),
    )
}

/// What the fake relay does after sending its lines
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    Close,
    HoldOpen,
}

pub struct FakeRelay {
    pub port: u16,
    connections: Arc<AtomicUsize>,
    login: Arc<Mutex<Option<String>>>,
}

impl FakeRelay {
    pub async fn start(lines: Vec<Vec<u8>>, end: RelayEnd) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let login = Arc::new(Mutex::new(None));

        let connections_task = connections.clone();
        let login_task = login.clone();
        tokio::spawn(async move {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            connections_task.fetch_add(1, Ordering::SeqCst);

            let (reader, mut writer) = socket.into_split();
            let mut reader = BufReader::new(reader);
            writer.write_all(b"# aprsc 2.1.19-test\r\n").await.unwrap();

            let mut login_line = String::new();
            reader.read_line(&mut login_line).await.unwrap();
            *login_task.lock().await = Some(login_line.clone());

            let call = login_line.split_whitespace().nth(1).unwrap_or("N0CALL").to_string();
            writer
                .write_all(format!("# logresp {} unverified, server T2TEST\r\n", call).as_bytes())
                .await
                .unwrap();

            for line in lines {
                writer.write_all(&line).await.unwrap();
                writer.write_all(b"\r\n").await.unwrap();
            }
            writer.flush().await.unwrap();

            if end == RelayEnd::HoldOpen {
                // Keep draining keepalives until the client goes away
                let mut sink = String::new();
                while matches!(reader.read_line(&mut sink).await, Ok(n) if n > 0) {
                    sink.clear();
                }
            }
        });

        Self {
            port,
            connections,
            login,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn login(&self) -> Option<String> {
        self.login.lock().await.clone()
    }
}

pub fn test_config(icinga: &FakeIcinga, relay_port: u16) -> Config {
    Config {
        feed: FeedConfigBuilder::new()
            .server("127.0.0.1")
            .port(relay_port)
            .callsign("KC1GDW")
            .keepalive_interval(Duration::from_millis(200))
            .idle_timeout(Duration::from_secs(10))
            .build()
            .unwrap(),
        backend: BackendConfig::new(icinga.url(), "root", "secret"),
        pool: PoolConfig {
            workers: 2,
            queue_capacity: 4,
        },
        shutdown_grace: Duration::from_secs(5),
    }
}

/// Port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
