//! Outbound HTTP gateways
//!
//! Each external dependency sits behind a small trait with one reqwest-based
//! implementation, built once from validated configuration.

pub mod audio;
pub mod messaging;
pub mod transcribe;

use anyhow::{bail, Result};
use std::time::Duration;

pub use audio::{AudioSource, HttpAudioRetriever};
pub use messaging::{Dispatch, NotificationDispatcher, TwilioMessagingClient};
pub use transcribe::{SpeechToText, WhisperTranscriber};

/// Build an HTTP client whose every request is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("{} failed (HTTP {}): {}", what, status.as_u16(), body);
    }
    Ok(resp)
}
