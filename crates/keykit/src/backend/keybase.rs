//! Keybase public key backend.
//!
//! Keybase publishes a user's PGP public keys at
//! `https://keybase.io/<user>/pgp_keys.asc`. The body is returned as-is;
//! the key tool validates it on import.

use crate::backend::KeyFetcher;
use crate::error::{Error, Result};
use std::time::Duration;

/// Default identity service.
pub const DEFAULT_KEYSERVER: &str = "https://keybase.io";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Maximum key material size (a few keys with signatures fit easily).
const MAX_BODY_SIZE: u64 = 10 * 1024 * 1024;

/// Fetches public keys from a Keybase-compatible service.
pub struct KeybaseFetcher {
    /// HTTP agent for requests.
    agent: ureq::Agent,
    /// Service base URL.
    base_url: String,
}

impl KeybaseFetcher {
    /// Create a fetcher for the public Keybase service.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_KEYSERVER, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a fetcher with a custom base URL and timeout.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the current base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for KeybaseFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyFetcher for KeybaseFetcher {
    fn url_for(&self, user: &str) -> String {
        format!("{}/{}/pgp_keys.asc", self.base_url, user)
    }

    fn fetch(&self, user: &str) -> Result<Vec<u8>> {
        let url = self.url_for(user);
        log::debug!("GET {url}");

        let mut response = self
            .agent
            .get(&url)
            .header("User-Agent", concat!("keykit/", env!("CARGO_PKG_VERSION")))
            .call()
            .map_err(|e| Error::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_SIZE)
            .read_to_vec()
            .map_err(|e| Error::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        classify(
            &url,
            status.as_u16(),
            status.canonical_reason().unwrap_or("Request failed"),
            body,
        )
    }
}

/// Turn a completed response into key material or a status error.
fn classify(url: &str, status: u16, reason: &str, body: Vec<u8>) -> Result<Vec<u8>> {
    match status {
        200 => Ok(body),
        400.. => {
            let text = String::from_utf8_lossy(&body).trim().to_string();
            Err(Error::RemoteStatus {
                url: url.to_string(),
                status,
                body: if text.is_empty() {
                    reason.to_string()
                } else {
                    text
                },
            })
        }
        _ => Err(Error::RemoteStatus {
            url: url.to_string(),
            status,
            body: reason.to_string(),
        }),
    }
}
