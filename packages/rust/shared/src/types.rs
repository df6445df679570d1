//! Core domain types for channel-digest.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::DigestError;

/// Maximum number of fractional digits kept in a [`Timestamp`] (nanoseconds).
const MAX_FRACTION_DIGITS: usize = 9;

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// A non-negative decimal Unix timestamp in seconds, e.g. Slack's `"1700000000.123456"`.
///
/// Parsed exactly (no float rounding) so a value read back from the checkpoint
/// compares equal to the message `ts` it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    secs: u64,
    nanos: u32,
}

impl Timestamp {
    /// Build a timestamp from whole seconds and a sub-second nanosecond part.
    pub fn new(secs: u64, nanos: u32) -> Self {
        Self {
            secs: secs + u64::from(nanos / 1_000_000_000),
            nanos: nanos % 1_000_000_000,
        }
    }

    /// Convert a UTC instant; instants before the epoch clamp to zero.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        match u64::try_from(dt.timestamp()) {
            Ok(secs) => Self::new(secs, dt.timestamp_subsec_nanos()),
            Err(_) => Self::default(),
        }
    }

    /// The current instant.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Whole seconds since the epoch.
    pub fn secs(&self) -> u64 {
        self.secs
    }

    /// Sub-second part in nanoseconds.
    pub fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    /// The timestamp as a UTC instant, if representable.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.secs).ok()?;
        DateTime::from_timestamp(secs, self.nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return write!(f, "{}", self.secs);
        }
        let fraction = format!("{:09}", self.nanos);
        write!(f, "{}.{}", self.secs, fraction.trim_end_matches('0'))
    }
}

impl FromStr for Timestamp {
    type Err = DigestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || DigestError::parse(format!("invalid timestamp '{s}'"));

        let (whole, fraction) = match s.split_once('.') {
            Some((whole, fraction)) => (whole, Some(fraction)),
            None => (s, None),
        };

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let secs: u64 = whole.parse().map_err(|_| invalid())?;

        let nanos = match fraction {
            None => 0,
            Some(f) => {
                if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                // Digits past nanosecond precision are dropped.
                let kept = &f[..f.len().min(MAX_FRACTION_DIGITS)];
                let padded = format!("{kept:0<width$}", width = MAX_FRACTION_DIGITS);
                padded.parse::<u32>().map_err(|_| invalid())?
            }
        };

        Ok(Self { secs, nanos })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message pulled from the message source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Source timestamp; doubles as the message's unique id.
    pub ts: Timestamp,
    /// Raw message text.
    pub text: String,
    /// Author id, when the source provides one.
    pub user: Option<String>,
}

impl Message {
    pub fn new(ts: Timestamp, text: impl Into<String>) -> Self {
        Self {
            ts,
            text: text.into(),
            user: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// The two living documents maintained by the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Topics,
    Changelog,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topics => "topics",
            Self::Changelog => "changelog",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A child block of a document container, as listed by the block store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Store-assigned block id.
    pub id: String,
    /// Plain text of the block, `None` for blocks that carry no text.
    pub text: Option<String>,
}
