use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Icinga API unreachable during {operation}: {source}")]
    BackendUnreachable {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected Icinga API response during {operation}{}: {reason}", fmt_status(.status))]
    BackendProtocol {
        operation: &'static str,
        status: Option<StatusCode>,
        reason: String,
    },

    #[error("failed to connect to APRS-IS at {address}: {source}")]
    FeedConnect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("APRS-IS feed disconnected: {reason}")]
    FeedDisconnected { reason: String },

    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("invalid callsign `{value}`")]
    InvalidCallsign { value: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl Error {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::FeedDisconnected {
            reason: reason.into(),
        }
    }
}

fn fmt_status(status: &Option<StatusCode>) -> String {
    match status {
        Some(status) => format!(" (HTTP {})", status),
        None => String::new(),
    }
}
