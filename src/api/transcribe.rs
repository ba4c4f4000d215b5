//! Speech-to-text for voicemail audio (Whisper-compatible API)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::check_response;
use crate::config::Config;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe audio bytes to text. The returned text is trimmed and may be empty.
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
}

/// Multipart upload client for an OpenAI-style transcription endpoint.
pub struct WhisperTranscriber {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http: super::http_client(config.transcription_timeout())?,
            endpoint: config.transcription.endpoint.clone(),
            api_key: config.transcription.api_key.clone(),
            model: config.transcription.model.clone(),
            language: config.transcription.language.clone(),
        })
    }
}

#[async_trait]
impl SpeechToText for WhisperTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("transcription API key not configured");
        }

        let file = Part::bytes(audio.to_vec())
            .file_name("recording.wav")
            .mime_str("audio/wav")?;
        let mut form = Form::new().part("file", file).text("model", self.model.clone());
        if let Some(ref language) = self.language {
            form = form.text("language", language.clone());
        }

        tracing::debug!(size_bytes = audio.len(), "Submitting audio for transcription");
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        let resp = check_response(resp, "Transcription").await?;
        let parsed: TranscriptionResponse = resp
            .json()
            .await
            .context("Failed to parse transcription response")?;

        Ok(parsed.text.unwrap_or_default().trim().to_string())
    }
}
