//! Turns a parsed frame into a passive check result.
//!
//! Classification is pure: no I/O, and the same frame always yields the same
//! [`CheckResult`]. Every result is OK; a check result only records that the
//! station was heard and what it said.

use serde::Serialize;

use crate::aprs_packet::{Frame, InfoPayload};
use crate::callsign::Callsign;
use crate::error::{Error, Result};

/// Check result for one station transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub callsign: Callsign,
    pub status_ok: bool,
    pub message: String,
    /// Performance data as `key=value` strings, in order
    pub metrics: Option<Vec<String>>,
}

impl CheckResult {
    fn ok(callsign: &Callsign, message: String, metrics: Option<Vec<String>>) -> Self {
        Self {
            callsign: callsign.clone(),
            status_ok: true,
            message,
            metrics,
        }
    }
}

/// Classify a frame into a check result
pub fn classify(frame: &Frame) -> Result<CheckResult> {
    match &frame.payload {
        InfoPayload::PositionReport { comment, .. } => Ok(CheckResult::ok(
            &frame.source,
            decode_ascii(comment)?,
            None,
        )),
        InfoPayload::TelemetryReport { raw_comment } => {
            let message = decode_ascii(raw_comment)?;
            let metrics = telemetry_metrics(&message)?;
            Ok(CheckResult::ok(&frame.source, message, Some(metrics)))
        }
        InfoPayload::StatusBeacon { raw_comment } => {
            let message = decode_ascii(raw_comment)?;
            let metrics = status_beacon_metrics(&message)?;
            Ok(CheckResult::ok(&frame.source, message, Some(metrics)))
        }
        InfoPayload::GenericInfo { raw_comment } => Ok(CheckResult::ok(
            &frame.source,
            decode_ascii(raw_comment)?,
            None,
        )),
    }
}

fn decode_ascii(bytes: &[u8]) -> Result<String> {
    if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
        return Err(Error::malformed(format!(
            "non-ASCII byte 0x{:02x} at offset {} in comment",
            bytes[pos], pos
        )));
    }
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::malformed(e.to_string()))
}

/// `#seq,a0,...,an,bits` → `telem_seq`, `telem_analogN`..., `telem_bits`
fn telemetry_metrics(comment: &str) -> Result<Vec<String>> {
    let body = comment
        .strip_prefix('#')
        .ok_or_else(|| Error::malformed("telemetry comment does not start with '#'"))?;

    let fields: Vec<&str> = body.split(',').collect();
    let [seq, analog @ .., bits] = fields.as_slice() else {
        return Err(Error::malformed(format!(
            "telemetry needs at least a sequence and a bits field, got {:?}",
            comment
        )));
    };

    let mut metrics = Vec::with_capacity(fields.len());
    metrics.push(format!("telem_seq={}", seq));
    metrics.extend(
        analog
            .iter()
            .enumerate()
            .map(|(idx, value)| format!("telem_analog{}={}", idx, value)),
    );
    metrics.push(format!("telem_bits={}", bits));
    Ok(metrics)
}

/// `IGATE,t1,t2,...` → `[t1, t2, ...]` verbatim
fn status_beacon_metrics(comment: &str) -> Result<Vec<String>> {
    let mut tokens = comment.split(',');
    match tokens.next() {
        Some("IGATE") => Ok(tokens.map(str::to_string).collect()),
        _ => Err(Error::malformed("status beacon does not start with 'IGATE,'")),
    }
}
