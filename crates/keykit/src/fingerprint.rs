//! Fingerprint extraction from key inspection output.
//!
//! The key tool lists key material in colon-delimited records when run with
//! `--with-colons --with-fingerprint`. The fingerprint record looks like:
//!
//! ```text
//! fpr:::::::::0123456789ABCDEF0123456789ABCDEF01234567:
//! ```

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static FPR_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^fpr:{9}([0-9A-F]{40}):").expect("fingerprint pattern is valid")
});

/// A canonical 40 character uppercase hexadecimal key fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a fingerprint, accepting only the canonical form.
    pub fn parse(value: &str) -> Option<Self> {
        (value.len() == 40
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b)))
        .then(|| Self(value.to_string()))
    }

    /// The 40 uppercase hex characters.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Fingerprint> for String {
    fn from(fpr: Fingerprint) -> Self {
        fpr.0
    }
}

/// Find the first fingerprint record in inspection output.
///
/// Returns `None` when the output holds no fingerprint record, e.g. for a
/// file that is not key material. That is not an error.
pub fn resolve_fingerprint(inspect_output: &str) -> Option<Fingerprint> {
    FPR_RECORD
        .captures(inspect_output)
        .and_then(|caps| caps.get(1))
        .map(|m| Fingerprint(m.as_str().to_string()))
}
