//! APRS-IS frame parsing.
//!
//! A frame is one TNC2-format line from the relay (`SOURCE>DEST,PATH:INFO`).
//! The header is decoded eagerly; the information field is kept as raw bytes
//! and sorted into one [`InfoPayload`] variant. Comment bytes are never
//! decoded here so that non-ASCII content can be rejected by the classifier.

use std::fmt::{Display, Formatter};

use crate::callsign::Callsign;
use crate::error::{Error, Result};

/// APRS data type identifiers (first byte of the information field)
const KNOWN_DATA_TYPES: &[u8] = b"!\"#$%'()*+,-./:;<=>?@[\\]^_`{}T\x1c\x1d";

/// Length of the `DDHHMMz`/`HHMMSSh` timestamp on `/` and `@` position reports
const TIMESTAMP_LEN: usize = 7;
const UNCOMPRESSED_POSITION_LEN: usize = 19;
const COMPRESSED_POSITION_LEN: usize = 13;

const TELEMETRY_TAG: &[u8] = b"#";
const IGATE_TAG: &[u8] = b"IGATE,";

/// Decoded position from a position report
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub symbol_table: char,
    pub symbol_code: char,
    /// Raw 7-character timestamp, present on `/` and `@` reports
    pub timestamp: Option<String>,
    pub compressed: bool,
}

/// Information field of a frame, sorted by payload shape
#[derive(Debug, Clone, PartialEq)]
pub enum InfoPayload {
    PositionReport { position: Position, comment: Vec<u8> },
    /// `T#seq,a0,...,an,bits`
    TelemetryReport { raw_comment: Vec<u8> },
    /// `<IGATE,key=value,...` station capabilities
    StatusBeacon { raw_comment: Vec<u8> },
    GenericInfo { raw_comment: Vec<u8> },
}

type PayloadMatcher = fn(&[u8]) -> Option<Result<InfoPayload>>;

/// Payload shapes in precedence order; the first matcher returning `Some` wins.
const PAYLOAD_MATCHERS: [PayloadMatcher; 4] = [
    match_position_report,
    match_telemetry_report,
    match_status_beacon,
    match_generic_info,
];

impl InfoPayload {
    /// Sort a raw information field into its payload variant
    pub fn from_info(info: &[u8]) -> Result<Self> {
        for matcher in PAYLOAD_MATCHERS {
            if let Some(result) = matcher(info) {
                return result;
            }
        }
        // match_generic_info always matches
        Ok(InfoPayload::GenericInfo {
            raw_comment: info.to_vec(),
        })
    }

    /// Short name used in logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            InfoPayload::PositionReport { .. } => "position",
            InfoPayload::TelemetryReport { .. } => "telemetry",
            InfoPayload::StatusBeacon { .. } => "status_beacon",
            InfoPayload::GenericInfo { .. } => "generic",
        }
    }

    /// Comment bytes carried by the payload
    pub fn comment(&self) -> &[u8] {
        match self {
            InfoPayload::PositionReport { comment, .. } => comment,
            InfoPayload::TelemetryReport { raw_comment }
            | InfoPayload::StatusBeacon { raw_comment }
            | InfoPayload::GenericInfo { raw_comment } => raw_comment,
        }
    }
}

/// One station transmission as delivered by APRS-IS
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub source: Callsign,
    pub destination: String,
    pub path: Vec<String>,
    pub payload: InfoPayload,
}

impl Frame {
    /// Parse one relay line (without the trailing CR/LF).
    ///
    /// Relay comment lines (starting with `#`) are not frames and must be
    /// filtered out by the caller.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| Error::malformed("missing ':' between header and information field"))?;
        let (header, info) = (&line[..colon], &line[colon + 1..]);

        let header = std::str::from_utf8(header)
            .ok()
            .filter(|h| h.is_ascii())
            .ok_or_else(|| Error::malformed("header is not ASCII"))?;

        let (source, rest) = header
            .split_once('>')
            .ok_or_else(|| Error::malformed(format!("missing '>' in header {:?}", header)))?;

        let source: Callsign = source
            .parse()
            .map_err(|_| Error::malformed(format!("invalid source callsign {:?}", source)))?;

        let mut parts = rest.split(',');
        let destination = parts.next().unwrap_or_default().to_string();
        if destination.is_empty() {
            return Err(Error::malformed(format!(
                "missing destination in header {:?}",
                header
            )));
        }
        let path = parts.map(str::to_string).collect();

        Ok(Frame {
            source,
            destination,
            path,
            payload: InfoPayload::from_info(info)?,
        })
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}>{}", self.source, self.destination)?;
        for hop in &self.path {
            write!(f, ",{}", hop)?;
        }
        write!(
            f,
            ": {} {}",
            self.payload.kind(),
            String::from_utf8_lossy(self.payload.comment())
        )
    }
}

fn match_position_report(info: &[u8]) -> Option<Result<InfoPayload>> {
    let (&dti, body) = info.split_first()?;
    let has_timestamp = match dti {
        b'!' | b'=' => false,
        b'/' | b'@' => true,
        _ => return None,
    };
    Some(parse_position_report(body, has_timestamp))
}

fn match_telemetry_report(info: &[u8]) -> Option<Result<InfoPayload>> {
    let body = info.strip_prefix(b"T")?;
    body.starts_with(TELEMETRY_TAG)
        .then(|| {
            Ok(InfoPayload::TelemetryReport {
                raw_comment: body.to_vec(),
            })
        })
}

fn match_status_beacon(info: &[u8]) -> Option<Result<InfoPayload>> {
    let body = info.strip_prefix(b"<")?;
    body.starts_with(IGATE_TAG).then(|| {
        Ok(InfoPayload::StatusBeacon {
            raw_comment: body.to_vec(),
        })
    })
}

fn match_generic_info(info: &[u8]) -> Option<Result<InfoPayload>> {
    let raw_comment = match info.split_first() {
        Some((dti, body)) if KNOWN_DATA_TYPES.contains(dti) => body,
        _ => info,
    };
    Some(Ok(InfoPayload::GenericInfo {
        raw_comment: raw_comment.to_vec(),
    }))
}

fn parse_position_report(body: &[u8], has_timestamp: bool) -> Result<InfoPayload> {
    let (timestamp, body) = if has_timestamp {
        if body.len() < TIMESTAMP_LEN {
            return Err(Error::malformed("position report timestamp truncated"));
        }
        let (ts, rest) = body.split_at(TIMESTAMP_LEN);
        let ts = std::str::from_utf8(ts)
            .ok()
            .filter(|ts| ts.is_ascii())
            .ok_or_else(|| Error::malformed("position report timestamp is not ASCII"))?;
        (Some(ts.to_string()), rest)
    } else {
        (None, body)
    };

    let (mut position, consumed) = match body.first() {
        Some(b'0'..=b'9' | b' ') => (parse_uncompressed(body)?, UNCOMPRESSED_POSITION_LEN),
        Some(&table) if is_compressed_symbol_table(table) => {
            (parse_compressed(body)?, COMPRESSED_POSITION_LEN)
        }
        _ => return Err(Error::malformed("unrecognised position format")),
    };
    position.timestamp = timestamp;

    Ok(InfoPayload::PositionReport {
        position,
        comment: body[consumed..].to_vec(),
    })
}

fn is_compressed_symbol_table(b: u8) -> bool {
    matches!(b, b'/' | b'\\' | b'A'..=b'Z' | b'a'..=b'j')
}

/// `DDMM.mmN` + table + `DDDMM.mmW` + code
fn parse_uncompressed(body: &[u8]) -> Result<Position> {
    if body.len() < UNCOMPRESSED_POSITION_LEN {
        return Err(Error::malformed("uncompressed position truncated"));
    }
    let latitude = parse_coordinate(&body[0..8], 2, b'N', b'S', 90.0)?;
    let symbol_table = body[8] as char;
    let longitude = parse_coordinate(&body[9..18], 3, b'E', b'W', 180.0)?;
    let symbol_code = body[18] as char;

    Ok(Position {
        latitude,
        longitude,
        symbol_table,
        symbol_code,
        timestamp: None,
        compressed: false,
    })
}

/// Degrees+minutes with hemisphere letter, e.g. `4903.50N`.
/// Spaces from position ambiguity are read as zeros.
fn parse_coordinate(
    raw: &[u8],
    degree_digits: usize,
    positive: u8,
    negative: u8,
    limit: f64,
) -> Result<f64> {
    let (hemisphere, digits) = raw
        .split_last()
        .ok_or_else(|| Error::malformed("empty coordinate"))?;
    let text: String = digits
        .iter()
        .map(|&b| if b == b' ' { '0' } else { b as char })
        .collect();

    let bad = || Error::malformed(format!("invalid coordinate {:?}", String::from_utf8_lossy(raw)));

    if text.len() != degree_digits + 5 || text.as_bytes()[degree_digits + 2] != b'.' {
        return Err(bad());
    }
    let degrees: f64 = text[..degree_digits].parse().map_err(|_| bad())?;
    let minutes: f64 = text[degree_digits..].parse().map_err(|_| bad())?;
    if minutes >= 60.0 {
        return Err(bad());
    }

    let value = degrees + minutes / 60.0;
    if value > limit {
        return Err(bad());
    }

    match *hemisphere {
        h if h == positive => Ok(value),
        h if h == negative => Ok(-value),
        _ => Err(bad()),
    }
}

/// table + 4 base-91 latitude + 4 base-91 longitude + code + `cs` + `T`
fn parse_compressed(body: &[u8]) -> Result<Position> {
    if body.len() < COMPRESSED_POSITION_LEN {
        return Err(Error::malformed("compressed position truncated"));
    }
    let lat = decode_base91(&body[1..5])?;
    let lon = decode_base91(&body[5..9])?;

    Ok(Position {
        latitude: 90.0 - lat as f64 / 380926.0,
        longitude: -180.0 + lon as f64 / 190463.0,
        symbol_table: body[0] as char,
        symbol_code: body[9] as char,
        timestamp: None,
        compressed: true,
    })
}

fn decode_base91(raw: &[u8]) -> Result<u32> {
    raw.iter().try_fold(0u32, |acc, &b| {
        if !(b'!'..=b'{').contains(&b) {
            return Err(Error::malformed("invalid base-91 digit in compressed position"));
        }
        Ok(acc * 91 + (b - b'!') as u32)
    })
}
