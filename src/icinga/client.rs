use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::callsign::Callsign;
use crate::classifier::CheckResult;
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::submission::CheckSink;

const HOSTS_PATH: &str = "/v1/objects/hosts";
const PROCESS_CHECK_RESULT_PATH: &str = "/v1/actions/process-check-result";
/// Custom host attribute carrying the station callsign
const CALLSIGN_ATTRIBUTE: &str = "host.vars.aprs.callsign";

/// Monitored stations keyed by normalised callsign.
///
/// Values are the attribute exactly as configured in Icinga; submission
/// filters compare against them, and Icinga's `==` is case-sensitive.
pub type Directory = BTreeMap<Callsign, String>;

/// Icinga2 API client. Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct IcingaClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    service_name: String,
    check_source: String,
    directory: Arc<Directory>,
}

/// `GET /v1/objects/hosts` response
#[derive(Debug, Deserialize)]
struct HostsResponse {
    results: Vec<HostObject>,
}

#[derive(Debug, Deserialize)]
struct HostObject {
    #[serde(default)]
    name: Option<String>,
    attrs: HostAttrs,
}

#[derive(Debug, Deserialize)]
struct HostAttrs {
    #[serde(default)]
    vars: Option<HostVars>,
}

#[derive(Debug, Deserialize)]
struct HostVars {
    #[serde(default)]
    aprs: Option<AprsVars>,
}

#[derive(Debug, Deserialize)]
struct AprsVars {
    #[serde(default)]
    callsign: Option<String>,
}

/// `POST /v1/actions/process-check-result` body
#[derive(Debug, Serialize)]
struct ProcessCheckResult<'a> {
    #[serde(rename = "type")]
    object_type: &'static str,
    filter: String,
    exit_status: u8,
    plugin_output: String,
    check_source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    performance_data: Option<&'a [String]>,
}

impl IcingaClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout);

        if let Some(fingerprint) = &config.fingerprint {
            debug!("Pinning Icinga API certificate to {}", hex::encode(fingerprint));
            builder = builder.use_preconfigured_tls(super::tls::pinned_client_config(fingerprint)?);
        }

        let client = builder.build().map_err(|e| Error::Config {
            reason: format!("failed to build HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            service_name: config.service_name.clone(),
            check_source: config.check_source.clone(),
            directory: Arc::new(Directory::new()),
        })
    }

    /// Address check results using the attribute values from `directory`
    pub fn with_directory(mut self, directory: Directory) -> Self {
        self.directory = Arc::new(directory);
        self
    }

    /// Attribute value identifying the station's host
    fn host_key<'a>(&'a self, callsign: &'a Callsign) -> &'a str {
        self.directory
            .get(callsign)
            .map(String::as_str)
            .unwrap_or(callsign.as_str())
    }

    /// Callsigns of all hosts carrying the APRS callsign attribute.
    ///
    /// Values that are not valid callsigns are skipped with a warning.
    pub async fn fetch_callsigns(&self) -> Result<Directory> {
        const OPERATION: &str = "fetch callsigns";
        let url = format!("{}{}", self.base_url, HOSTS_PATH);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("filter", CALLSIGN_ATTRIBUTE), ("attrs", "vars")])
            .send()
            .await
            .map_err(|source| Error::BackendUnreachable {
                operation: OPERATION,
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| Error::BackendUnreachable {
                operation: OPERATION,
                source,
            })?;

        if !status.is_success() {
            return Err(Error::BackendProtocol {
                operation: OPERATION,
                status: Some(status),
                reason: truncate(&body, 500),
            });
        }

        let hosts: HostsResponse =
            serde_json::from_str(&body).map_err(|e| Error::BackendProtocol {
                operation: OPERATION,
                status: Some(status),
                reason: format!("{}: {}", e, truncate(&body, 500)),
            })?;

        Ok(callsigns_from_hosts(hosts))
    }

    /// Submit one passive check result.
    ///
    /// Anything but HTTP 200 is an error; the caller decides whether to log it.
    pub async fn process_check_result(&self, result: &CheckResult) -> Result<()> {
        const OPERATION: &str = "submit check";
        let url = format!("{}{}", self.base_url, PROCESS_CHECK_RESULT_PATH);
        let body = self.check_result_body(result);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|source| Error::BackendUnreachable {
                operation: OPERATION,
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::BackendProtocol {
                operation: OPERATION,
                status: Some(status),
                reason: truncate(&text, 500),
            });
        }

        metrics::counter!("check.submitted").increment(1);
        debug!("Submitted check result for {}", result.callsign);
        Ok(())
    }

    fn check_result_body<'a>(&'a self, result: &'a CheckResult) -> ProcessCheckResult<'a> {
        let (exit_status, label) = if result.status_ok {
            (0, "OK")
        } else {
            (2, "CRITICAL")
        };

        ProcessCheckResult {
            object_type: "Service",
            filter: service_filter(&self.service_name, self.host_key(&result.callsign)),
            exit_status,
            plugin_output: format!("{}: {}", label, result.message),
            check_source: &self.check_source,
            performance_data: result.metrics.as_deref(),
        }
    }
}

#[async_trait]
impl CheckSink for IcingaClient {
    async fn submit(&self, result: &CheckResult) -> Result<()> {
        self.process_check_result(result).await
    }
}

fn callsigns_from_hosts(hosts: HostsResponse) -> Directory {
    let mut directory = Directory::new();
    for host in hosts.results {
        let host_name = host.name.as_deref().unwrap_or("<unnamed>");
        let Some(value) = host
            .attrs
            .vars
            .and_then(|vars| vars.aprs)
            .and_then(|aprs| aprs.callsign)
        else {
            warn!("Host {} has no {} attribute, skipping", host_name, CALLSIGN_ATTRIBUTE);
            continue;
        };

        let callsign = match value.trim().parse::<Callsign>() {
            Ok(callsign) => callsign,
            Err(e) => {
                warn!("Host {}: {}, skipping", host_name, e);
                continue;
            }
        };

        match directory.entry(callsign) {
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
            Entry::Occupied(entry) if *entry.get() != value => warn!(
                "Host {} spells {} as {:?}, results go to hosts matching {:?}",
                host_name,
                entry.key(),
                value,
                entry.get()
            ),
            Entry::Occupied(_) => {}
        }
    }
    directory
}

/// Icinga DSL filter selecting this integration's service on the station's host
fn service_filter(service_name: &str, host_key: &str) -> String {
    format!(
        "service.name==\"{}\" && {}==\"{}\"",
        escape_dsl_string(service_name),
        CALLSIGN_ATTRIBUTE,
        escape_dsl_string(host_key)
    )
}

fn escape_dsl_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> IcingaClient {
        IcingaClient::new(&BackendConfig::new("https://localhost:5665/", "root", "secret")).unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_is_dropped() {
        assert_eq!(client().base_url, "https://localhost:5665");
    }

    #[test]
    fn test_service_filter() {
        assert_eq!(
            service_filter("aprsis", "KC1GDW-10"),
            r#"service.name=="aprsis" && host.vars.aprs.callsign=="KC1GDW-10""#
        );
        assert_eq!(
            service_filter(r#"we"ird\"#, "KC1GDW-10"),
            r#"service.name=="we\"ird\\" && host.vars.aprs.callsign=="KC1GDW-10""#
        );
    }

    #[test]
    fn test_check_result_body_with_metrics() {
        let client = client();
        let result = CheckResult {
            callsign: "N0CALL".parse().unwrap(),
            status_ok: true,
            message: "IGATE,RF=0,DIR=1".to_string(),
            metrics: Some(vec!["RF=0".to_string(), "DIR=1".to_string()]),
        };
        let body = serde_json::to_value(client.check_result_body(&result)).unwrap();
        assert_eq!(
            body,
            json!({
                "type": "Service",
                "filter": "service.name==\"aprsis\" && host.vars.aprs.callsign==\"N0CALL\"",
                "exit_status": 0,
                "plugin_output": "OK: IGATE,RF=0,DIR=1",
                "check_source": "APRSIS",
                "performance_data": ["RF=0", "DIR=1"],
            })
        );
    }

    #[test]
    fn test_check_result_body_without_metrics_omits_field() {
        let client = client();
        let result = CheckResult {
            callsign: "N0CALL".parse().unwrap(),
            status_ok: true,
            message: "hello".to_string(),
            metrics: None,
        };
        let body = serde_json::to_value(client.check_result_body(&result)).unwrap();
        assert!(body.get("performance_data").is_none());
        assert_eq!(body["plugin_output"], "OK: hello");
    }

    #[test]
    fn test_callsigns_from_hosts() {
        let hosts: HostsResponse = serde_json::from_value(json!({
            "results": [
                {"name": "igate", "attrs": {"vars": {"aprs": {"callsign": "kc1gdw-10"}}}},
                {"name": "digi", "attrs": {"vars": {"aprs": {"callsign": "W1AW"}}}},
                {"name": "dup", "attrs": {"vars": {"aprs": {"callsign": "W1AW"}}}},
                {"name": "bad", "attrs": {"vars": {"aprs": {"callsign": "not a call"}}}},
                {"name": "novars", "attrs": {"vars": null}},
            ]
        }))
        .unwrap();

        let directory = callsigns_from_hosts(hosts);
        let calls: Vec<(&str, &str)> = directory
            .iter()
            .map(|(call, raw)| (call.as_str(), raw.as_str()))
            .collect();
        assert_eq!(calls, vec![("KC1GDW-10", "kc1gdw-10"), ("W1AW", "W1AW")]);
    }

    #[test]
    fn test_first_spelling_wins() {
        let hosts: HostsResponse = serde_json::from_value(json!({
            "results": [
                {"name": "a", "attrs": {"vars": {"aprs": {"callsign": "n0call"}}}},
                {"name": "b", "attrs": {"vars": {"aprs": {"callsign": "N0CALL"}}}},
            ]
        }))
        .unwrap();
        let directory = callsigns_from_hosts(hosts);
        assert_eq!(directory.len(), 1);
        assert_eq!(directory[&"N0CALL".parse::<Callsign>().unwrap()], "n0call");
    }

    #[test]
    fn test_submission_filter_uses_directory_spelling() {
        let hosts: HostsResponse = serde_json::from_value(json!({
            "results": [{"name": "igate", "attrs": {"vars": {"aprs": {"callsign": "n0call"}}}}]
        }))
        .unwrap();
        let client = client().with_directory(callsigns_from_hosts(hosts));
        let result = CheckResult {
            callsign: "N0CALL".parse().unwrap(),
            status_ok: true,
            message: "hi".to_string(),
            metrics: None,
        };
        let body = serde_json::to_value(client.check_result_body(&result)).unwrap();
        assert_eq!(
            body["filter"],
            r#"service.name=="aprsis" && host.vars.aprs.callsign=="n0call""#
        );
    }

    #[test]
    fn test_empty_results() {
        let hosts: HostsResponse = serde_json::from_value(json!({"results": []})).unwrap();
        assert!(callsigns_from_hosts(hosts).is_empty());
    }
}
