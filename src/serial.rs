//! Serial number allocation.
//!
//! Allocation is speculative: the serial is burned into the certificate and
//! mailed before the ledger append happens, so the allocator only ever reads a
//! snapshot and the caller's reservation set.

use chrono::{DateTime, Datelike, Local};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use crate::ledger::LedgerSnapshot;

/// Redraw limit for random tokens that collide with known serials.
const MAX_DRAWS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialScheme {
    /// `PY2025-0001`
    Counter,
    /// `PY-2025-3FA9C1`
    Random,
    /// `3fa9c1d2`
    Opaque,
}

impl FromStr for SerialScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "counter" => Ok(SerialScheme::Counter),
            "random" => Ok(SerialScheme::Random),
            "opaque" => Ok(SerialScheme::Opaque),
            other => Err(format!("unknown serial scheme '{}'", other)),
        }
    }
}

impl fmt::Display for SerialScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SerialScheme::Counter => "counter",
            SerialScheme::Random => "random",
            SerialScheme::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SerialAllocator {
    scheme: SerialScheme,
    prefix: String,
}

impl SerialAllocator {
    pub fn new(scheme: SerialScheme, prefix: impl Into<String>) -> Self {
        Self {
            scheme,
            prefix: prefix.into(),
        }
    }

    pub fn scheme(&self) -> SerialScheme {
        self.scheme
    }

    /// Picks the next serial for `snapshot`, skipping anything in `reserved`.
    ///
    /// A degraded snapshot makes the counter scheme fall back to a
    /// timestamp-derived serial, so an unreadable ledger never blocks issuance.
    pub fn allocate(
        &self,
        snapshot: &LedgerSnapshot,
        reserved: &BTreeSet<String>,
        now: DateTime<Local>,
    ) -> String {
        let taken = |candidate: &str| snapshot.contains_serial(candidate) || reserved.contains(candidate);
        let year = now.year();

        match self.scheme {
            SerialScheme::Counter => {
                if snapshot.degraded {
                    // Extra digits keep the counter shape and never equal a bare timestamp.
                    let base = format!("{}{}-{}", self.prefix, year, now.format("%m%d%H%M%S"));
                    let mut serial = base.clone();
                    let mut bump = 1;
                    while taken(&serial) {
                        serial = format!("{}{}", base, bump);
                        bump += 1;
                    }
                    warn!(serial = %serial, "Ledger unavailable, using timestamp serial");
                    return serial;
                }
                let mut next = snapshot.len() as u32 + 1;
                loop {
                    let candidate = format!("{}{}-{:04}", self.prefix, year, next);
                    if !taken(&candidate) {
                        return candidate;
                    }
                    next += 1;
                }
            }
            SerialScheme::Random => self.draw(taken, || {
                let token = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
                format!("{}-{}-{}", self.prefix, year, token)
            }),
            SerialScheme::Opaque => self.draw(taken, || Uuid::new_v4().simple().to_string()[..8].to_string()),
        }
    }

    fn draw(&self, taken: impl Fn(&str) -> bool, mut generate: impl FnMut() -> String) -> String {
        let mut candidate = generate();
        for _ in 1..MAX_DRAWS {
            if !taken(&candidate) {
                return candidate;
            }
            candidate = generate();
        }
        warn!(serial = %candidate, scheme = %self.scheme, "Random serial still collides after redraws");
        candidate
    }

    /// Checks that `serial` has the shape this allocator produces.
    pub fn is_well_formed(&self, serial: &str) -> bool {
        let prefix = regex::escape(&self.prefix);
        let pattern = match self.scheme {
            SerialScheme::Counter => format!(r"^{}\d{{4}}-\d{{4,}}$", prefix),
            SerialScheme::Random => format!(r"^{}-\d{{4}}-[0-9A-F]{{6}}$", prefix),
            SerialScheme::Opaque => r"^[0-9a-f]{8}$".to_string(),
        };
        Regex::new(&pattern)
            .map(|re| re.is_match(serial))
            .unwrap_or(false)
    }
}
