//! Expiry conditions for managed bindings
//!
//! A managed binding carries a condition of the fixed form
//! `request.time < timestamp('<RFC3339 instant>')`. Tooling outside this
//! crate matches on that exact text, so the template lives only here.

use crate::core::error::{ExpiryDecodeError, ExpiryRangeError};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Condition title used when the caller does not override it
pub const DEFAULT_CONDITION_TITLE: &str = "abcxyz-aod-expiry";

static EXPIRY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"request.time < timestamp\('([^']+)'\)").unwrap());

// 0001-01-01T00:00:00Z and 9999-12-31T23:59:59Z
const MIN_TIMESTAMP: i64 = -62_135_596_800;
const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// Instant after which a managed binding no longer grants access
///
/// Always within years 0001 through 9999, so the encoded form is valid
/// RFC 3339 and decodes back to the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Expiry(DateTime<Utc>);

impl Expiry {
    /// Wrap an instant, dropping sub-second precision the encoded form cannot carry
    ///
    /// Instants outside the representable years saturate at the nearest bound.
    pub fn new(at: DateTime<Utc>) -> Self {
        let secs = at.timestamp().clamp(MIN_TIMESTAMP, MAX_TIMESTAMP);
        Expiry(DateTime::from_timestamp(secs, 0).unwrap_or(at))
    }

    /// Like [`Expiry::new`], but rejects instants outside the representable years
    pub fn try_new(at: DateTime<Utc>) -> Result<Self, ExpiryRangeError> {
        if (MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&at.timestamp()) {
            Ok(Expiry::new(at))
        } else {
            Err(ExpiryRangeError { at })
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.0
    }

    /// Render the condition expression for this expiry
    pub fn encode(&self) -> String {
        format!(
            "request.time < timestamp('{}')",
            self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Read an expiry back from a condition expression
    pub fn decode(expression: &str) -> Result<Self, ExpiryDecodeError> {
        let timestamp = EXPIRY_PATTERN
            .captures(expression)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| ExpiryDecodeError::Malformed {
                expression: expression.to_string(),
            })?;

        let at = DateTime::parse_from_rfc3339(timestamp.as_str()).map_err(|source| {
            ExpiryDecodeError::InvalidTimestamp {
                expression: expression.to_string(),
                source,
            }
        })?;

        let at = at.with_timezone(&Utc);
        if !(MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&at.timestamp()) {
            return Err(ExpiryDecodeError::OutOfRange {
                expression: expression.to_string(),
                source: ExpiryRangeError { at },
            });
        }
        Ok(Expiry(at))
    }

    /// Access is valid while `now` is strictly before the expiry
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.0 < now
    }
}

impl TryFrom<DateTime<Utc>> for Expiry {
    type Error = ExpiryRangeError;

    fn try_from(at: DateTime<Utc>) -> Result<Self, Self::Error> {
        Expiry::try_new(at)
    }
}

impl FromStr for Expiry {
    type Err = ExpiryDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expiry::decode(s)
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// The condition attached to every binding this crate manages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedCondition {
    /// Title marking a binding as managed
    pub title: String,
    /// Free-text description written on new bindings
    pub description: String,
}

impl ManagedCondition {
    pub fn new(title: impl Into<String>) -> Self {
        ManagedCondition {
            title: title.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Build the condition for a binding expiring at `expiry`
    pub fn for_expiry(&self, expiry: &Expiry) -> super::Condition {
        super::Condition {
            title: self.title.clone(),
            description: self.description.clone(),
            expression: expiry.encode(),
        }
    }
}

impl Default for ManagedCondition {
    fn default() -> Self {
        ManagedCondition::new(DEFAULT_CONDITION_TITLE)
    }
}
