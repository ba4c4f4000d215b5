//! Service configuration
//!
//! Loaded once at startup from a TOML file plus environment overrides, then
//! shared read-only as `Arc<Config>`.

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Deployment name that turns on the strict policies.
const PRODUCTION: &str = "production";

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment context, e.g. "production" or "development"
    pub environment: Option<String>,
    pub server: ServerConfig,
    pub twilio: TwilioConfig,
    pub business: BusinessConfig,
    pub transcription: TranscriptionConfig,
    pub timeouts: TimeoutConfig,
    pub database: DatabaseConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally visible base URL (scheme + host), used for signature checks
    /// and for the recording callback embedded in the voice response.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number for outbound texts
    pub phone_number: Option<String>,
    /// Explicit signature enforcement mode: off, log or enforce
    pub signature_mode: Option<String>,
    /// Recording URLs must live on this domain (or a subdomain) to get credentials
    pub trusted_domain: String,
    pub api_base: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            phone_number: None,
            signature_mode: None,
            trusted_domain: "twilio.com".to_string(),
            api_base: "https://api.twilio.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusinessConfig {
    /// The provider-facing number callers dial
    pub systemix_number: Option<String>,
    /// Business owner's mobile; receives voicemail and lead notifications
    pub owner_phone: Option<String>,
    /// Display name used when no tenant matches the dialled number
    pub fallback_name: String,
    /// Spoken before the voicemail beep
    pub voice_greeting: Option<String>,
    /// Status follow-up text; `{business}` is replaced by the display name
    pub missed_call_script: Option<String>,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            systemix_number: None,
            owner_phone: None,
            fallback_name: "the office".to_string(),
            voice_greeting: None,
            missed_call_script: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub language: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            model: "whisper-1".to_string(),
            language: Some("en".to_string()),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub audio_secs: u64,
    pub messaging_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            audio_secs: 10,
            messaging_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to `calls.db` in the platform data directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// When set, simulator requests must carry it in `x-simulator-key`
    pub api_key: Option<String>,
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "callback-relay", "callback-relay")
            .context("Could not determine config directory")
    }

    /// Get default config file path
    fn default_config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Load configuration from `path` (or the platform default), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Overlay values from the deployment environment. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ENVIRONMENT") {
            self.environment = Some(v);
        }
        if let Some(v) = get("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = v;
        }
        if let Some(v) = get("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = v;
        }
        if let Some(v) = get("TWILIO_PHONE_NUMBER") {
            self.twilio.phone_number = Some(v);
        }
        if let Some(v) = get("TWILIO_SIGNATURE_MODE") {
            self.twilio.signature_mode = Some(v);
        }
        if let Some(v) = get("SYSTEMIX_NUMBER") {
            self.business.systemix_number = Some(v);
        }
        if let Some(v) = get("CLIENT_PHONE") {
            self.business.owner_phone = Some(v);
        }
        if let Some(v) = get("VOICE_CONSENT_SCRIPT") {
            self.business.voice_greeting = Some(v);
        }
        if let Some(v) = get("MISSED_CALL_SMS_SCRIPT") {
            self.business.missed_call_script = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.transcription.api_key = v;
        }
        if let Some(v) = get("WORKER_URL") {
            self.server.public_url = Some(v);
        }
        if let Some(v) = get("SIMULATOR_API_KEY") {
            self.simulator.api_key = Some(v);
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(v));
        }
    }

    /// Check that everything the webhook pipeline needs is present.
    pub fn validate(&self) -> Result<()> {
        if self.twilio.account_sid.trim().is_empty() {
            bail!("twilio.account_sid (TWILIO_ACCOUNT_SID) is not set");
        }
        if self.twilio.auth_token.trim().is_empty() {
            bail!("twilio.auth_token (TWILIO_AUTH_TOKEN) is not set");
        }
        if self.sender_number().is_none() {
            tracing::warn!("Neither twilio.phone_number nor business.systemix_number is set");
        }
        if self.business.owner_phone.is_none() {
            tracing::warn!("business.owner_phone (CLIENT_PHONE) is not set; owner notifications are skipped");
        }
        if self.transcription.api_key.trim().is_empty() {
            tracing::warn!("transcription.api_key is not set; voicemails use the placeholder text");
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.as_deref() == Some(PRODUCTION)
    }

    /// Number outbound texts are sent from.
    pub fn sender_number(&self) -> Option<&str> {
        self.twilio
            .phone_number
            .as_deref()
            .or(self.business.systemix_number.as_deref())
            .filter(|n| !n.is_empty())
    }

    /// SQLite database path, falling back to the platform data directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.database.path {
            return Ok(path.clone());
        }
        let dir = Self::project_dirs()?.data_dir().to_path_buf();
        fs::create_dir_all(&dir).context("Failed to create data directory")?;
        Ok(dir.join("calls.db"))
    }

    pub fn audio_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.audio_secs)
    }

    pub fn messaging_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.messaging_secs)
    }

    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.twilio.trusted_domain, "twilio.com");
        assert_eq!(config.business.fallback_name, "the office");
        assert_eq!(config.transcription.timeout_secs, 30);
        assert!(!config.is_production());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::from_toml(
            r#"
environment = "production"

[twilio]
account_sid = "AC123"
auth_token = "secret"
signature_mode = "log"

[business]
owner_phone = "+15550009999"
"#,
        )
        .unwrap();

        assert!(config.is_production());
        assert_eq!(config.twilio.account_sid, "AC123");
        assert_eq!(config.twilio.signature_mode.as_deref(), Some("log"));
        // Untouched fields keep their defaults
        assert_eq!(config.twilio.api_base, "https://api.twilio.com");
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.business.owner_phone.as_deref(), Some("+15550009999"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TWILIO_AUTH_TOKEN", "from-env"),
            ("CLIENT_PHONE", "+15550001234"),
            ("WORKER_URL", "https://relay.example.com"),
            ("TWILIO_PHONE_NUMBER", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.twilio.phone_number = Some("+15550000000".to_string());
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.twilio.auth_token, "from-env");
        assert_eq!(config.business.owner_phone.as_deref(), Some("+15550001234"));
        assert_eq!(
            config.server.public_url.as_deref(),
            Some("https://relay.example.com")
        );
        // Blank values do not clobber configured ones
        assert_eq!(config.twilio.phone_number.as_deref(), Some("+15550000000"));
    }

    #[test]
    fn test_validate_requires_credentials() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.twilio.account_sid = "AC123".to_string();
        assert!(config.validate().is_err());

        config.twilio.auth_token = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sender_number_fallback() {
        let mut config = Config::default();
        assert_eq!(config.sender_number(), None);

        config.business.systemix_number = Some("+15550002222".to_string());
        assert_eq!(config.sender_number(), Some("+15550002222"));

        config.twilio.phone_number = Some("+15550003333".to_string());
        assert_eq!(config.sender_number(), Some("+15550003333"));
    }
}
