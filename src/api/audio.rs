//! Voicemail audio retrieval
//!
//! Recordings live on the provider's media host. Account credentials are only
//! ever attached when the URL is HTTPS on the trusted provider domain, so a
//! forged callback cannot make us send them elsewhere.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::Config;

/// Extension the provider serves WAV audio under.
const AUDIO_EXTENSION: &str = ".wav";

/// Upper bound on a recording body. Two minutes of 8 kHz mono WAV is about 2 MB.
const MAX_AUDIO_BYTES: usize = 16 * 1024 * 1024;

/// Outcome of one fetch. `bytes` is `None` on any failure; `status` is `None`
/// when no HTTP response was received at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFetch {
    pub bytes: Option<Vec<u8>>,
    pub status: Option<u16>,
}

impl AudioFetch {
    pub fn absent(status: Option<u16>) -> Self {
        Self {
            bytes: None,
            status,
        }
    }

    pub fn ok(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Some(bytes),
            status: Some(200),
        }
    }
}

#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Fetch recording audio. Never fails; problems yield an absent result.
    async fn fetch(&self, recording_url: &str) -> AudioFetch;
}

/// Recording URL with the audio extension appended if missing.
pub fn audio_url(recording_url: &str) -> String {
    if recording_url.ends_with(AUDIO_EXTENSION) {
        recording_url.to_string()
    } else {
        format!("{}{}", recording_url, AUDIO_EXTENSION)
    }
}

/// HTTPS and host equal to `domain` or one of its subdomains.
pub fn is_trusted_host(url: &str, domain: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    let domain = domain.trim().trim_start_matches('.').to_lowercase();
    if domain.is_empty() {
        return false;
    }
    parsed.scheme() == "https" && (host == domain || host.ends_with(&format!(".{}", domain)))
}

/// Host part of a URL, for logging.
pub fn url_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| "invalid".to_string())
}

/// Fetches recordings over HTTP(S) with a bounded timeout.
pub struct HttpAudioRetriever {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    trusted_domain: String,
    max_bytes: usize,
}

impl HttpAudioRetriever {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http: super::http_client(config.audio_timeout())?,
            account_sid: config.twilio.account_sid.clone(),
            auth_token: config.twilio.auth_token.clone(),
            trusted_domain: config.twilio.trusted_domain.clone(),
            max_bytes: MAX_AUDIO_BYTES,
        })
    }

    #[cfg(test)]
    fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Whether a request to `url` carries the account credentials.
    pub fn attaches_credentials(&self, url: &str) -> bool {
        is_trusted_host(url, &self.trusted_domain)
    }
}

impl HttpAudioRetriever {
    /// Read the body, giving up as soon as it exceeds `max_bytes`.
    async fn read_body(&self, mut resp: reqwest::Response) -> Result<Vec<u8>> {
        if let Some(len) = resp.content_length() {
            if len > self.max_bytes as u64 {
                bail!("recording is {} bytes, limit is {}", len, self.max_bytes);
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                bail!("recording exceeds {} bytes", self.max_bytes);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl AudioSource for HttpAudioRetriever {
    async fn fetch(&self, recording_url: &str) -> AudioFetch {
        let url = audio_url(recording_url);
        let with_auth = self.attaches_credentials(&url);

        let mut req = self.http.get(&url);
        if with_auth {
            req = req.basic_auth(&self.account_sid, Some(&self.auth_token));
        }
        tracing::debug!(host = %url_host(&url), auth = with_auth, "Fetching recording audio");

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!("Audio fetch error: {}", e);
                return AudioFetch::absent(None);
            }
        };

        let status = resp.status().as_u16();
        if status != 200 {
            tracing::error!(status, "Audio fetch failed");
            return AudioFetch::absent(Some(status));
        }

        match self.read_body(resp).await {
            Ok(bytes) => {
                tracing::info!(size_bytes = bytes.len(), "Recording audio fetched");
                AudioFetch::ok(bytes)
            }
            Err(e) => {
                tracing::error!("Audio body read failed: {:#}", e);
                AudioFetch::absent(Some(status))
            }
        }
    }
}
