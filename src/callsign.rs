use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Longest base callsign APRS-IS accepts, not counting the SSID
const MAX_BASE_LEN: usize = 9;
const MAX_SSID_LEN: usize = 2;

/// Station identifier: uppercase alphanumeric base with an optional `-SSID` suffix.
///
/// This is the join key between the feed's source address and the
/// `host.vars.aprs.callsign` attribute in Icinga.
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Callsign(String);

impl Callsign {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Callsign {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidCallsign {
            value: s.to_string(),
        };

        let (base, ssid) = match s.split_once('-') {
            Some((base, ssid)) => (base, Some(ssid)),
            None => (s, None),
        };

        if base.is_empty()
            || base.len() > MAX_BASE_LEN
            || !base.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(invalid());
        }

        if let Some(ssid) = ssid
            && (ssid.is_empty()
                || ssid.len() > MAX_SSID_LEN
                || !ssid.bytes().all(|b| b.is_ascii_alphanumeric()))
        {
            return Err(invalid());
        }

        Ok(Callsign(s.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for Callsign {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Callsign> for String {
    fn from(val: Callsign) -> Self {
        val.0
    }
}

impl AsRef<str> for Callsign {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Callsign {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
