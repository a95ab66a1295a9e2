use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use crate::callsign::Callsign;

/// Most callsigns a single `b/` term may carry on APRS-IS servers
const MAX_CALLS_PER_TERM: usize = 9;

/// Buddy filter (`b/<call1>/<call2>/...`) restricting the feed to exact source callsigns.
///
/// Renders as one term per nine callsigns, space separated, e.g.
/// `b/A/B/C/D/E/F/G/H/I b/J`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuddyFilter {
    calls: BTreeSet<Callsign>,
}

impl BuddyFilter {
    /// Build a filter for the given callsigns. Returns `None` for an empty set:
    /// an empty buddy list would not restrict anything.
    pub fn new<I>(calls: I) -> Option<Self>
    where
        I: IntoIterator<Item = Callsign>,
    {
        let calls: BTreeSet<Callsign> = calls.into_iter().collect();
        (!calls.is_empty()).then_some(Self { calls })
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn contains(&self, call: &Callsign) -> bool {
        self.calls.contains(call)
    }
}

impl Display for BuddyFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let calls: Vec<&str> = self.calls.iter().map(Callsign::as_str).collect();
        let terms: Vec<String> = calls
            .chunks(MAX_CALLS_PER_TERM)
            .map(|chunk| format!("b/{}", chunk.join("/")))
            .collect();
        write!(f, "{}", terms.join(" "))
    }
}
