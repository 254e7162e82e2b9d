use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Absolute grain timestamp: whole seconds plus nanoseconds within the
/// second.  Only 48 bits of seconds are representable on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "RawTimestamp")]
pub struct Timestamp {
    seconds:     u64,
    nanoseconds: u32,
}

#[derive(Deserialize)]
struct RawTimestamp {
    seconds:     u64,
    nanoseconds: u32,
}

impl From<RawTimestamp> for Timestamp {
    fn from(raw: RawTimestamp) -> Self {
        Timestamp::new(raw.seconds, raw.nanoseconds)
    }
}

impl Timestamp {
    pub const MAX_SECONDS: u64 = (1 << 48) - 1;

    /// Nanoseconds past one second are carried into `seconds`, which
    /// saturates at `u64::MAX`.
    pub fn new(seconds: u64, nanoseconds: u32) -> Self {
        Self {
            seconds:     seconds.saturating_add((nanoseconds / NANOS_PER_SEC) as u64),
            nanoseconds: nanoseconds % NANOS_PER_SEC,
        }
    }

    /// Seconds saturate at `u64::MAX`.
    pub fn from_nanos(nanos: u128) -> Self {
        Self {
            seconds:     u64::try_from(nanos / NANOS_PER_SEC as u128).unwrap_or(u64::MAX),
            nanoseconds: (nanos % NANOS_PER_SEC as u128) as u32,
        }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let now = Utc::now();
        Self::new(now.timestamp().max(0) as u64, now.timestamp_subsec_nanos())
    }

    pub fn seconds(&self) -> u64 { self.seconds }
    pub fn nanoseconds(&self) -> u32 { self.nanoseconds }

    pub fn to_nanos(&self) -> u128 {
        self.seconds as u128 * NANOS_PER_SEC as u128 + self.nanoseconds as u128
    }
}

/// `seconds:nanoseconds`, the form used in grain dumps.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:09}", self.seconds, self.nanoseconds)
    }
}

impl FromStr for Timestamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sec, nsec) = s
            .split_once(':')
            .ok_or_else(|| format!("Timestamp {s:?} is not of the form seconds:nanoseconds"))?;
        let seconds = sec.parse::<u64>().map_err(|e| format!("Bad seconds in {s:?}: {e}"))?;
        let nanoseconds = nsec.parse::<u32>().map_err(|e| format!("Bad nanoseconds in {s:?}: {e}"))?;
        if nanoseconds >= NANOS_PER_SEC {
            return Err(format!("Nanoseconds out of range in {s:?}"));
        }
        Ok(Timestamp::new(seconds, nanoseconds))
    }
}
