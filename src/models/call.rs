//! Call record models

use serde::{Deserialize, Serialize};

/// Provider name stored with every real callback.
pub const PROVIDER_TWILIO: &str = "twilio";

/// Provider name used by the local simulator.
pub const PROVIDER_SIMULATE: &str = "simulate";

/// Placeholder for phone numbers the provider did not send.
pub const UNKNOWN: &str = "unknown";

/// Composite identity of one call record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub provider: String,
    pub provider_call_id: String,
}

impl CallKey {
    pub fn new(provider: impl Into<String>, provider_call_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            provider_call_id: provider_call_id.into(),
        }
    }

    /// Key for a provider callback. The first non-empty candidate id wins;
    /// if none is present a fresh identifier is generated.
    pub fn from_candidates(provider: &str, candidates: &[&str]) -> Self {
        let id = candidates
            .iter()
            .map(|c| c.trim())
            .find(|c| !c.is_empty())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self::new(provider, id)
    }
}

/// One phone call as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: String,
    pub provider: String,
    pub provider_call_id: String,
    pub call_sid: Option<String>,
    pub from_phone: String,
    pub to_phone: String,
    pub status: String,
    pub recording_url: Option<String>,
    pub transcription: Option<String>,
    pub raw_json: Option<String>,
    pub missed_at: Option<String>,
    pub followup_sent_at: Option<String>,
    pub followup_message_id: Option<String>,
}

impl CallRecord {
    /// A recording or transcript has been stored for this call.
    pub fn has_voicemail(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().map_or(false, |s| !s.is_empty());
        present(&self.recording_url) || present(&self.transcription)
    }

    pub fn followup_sent(&self) -> bool {
        self.followup_sent_at.is_some()
    }

    /// The recording pipeline ran to the end for this call. The transcript
    /// is stored before the final `completed`, so a provider `completed`
    /// status alone does not count.
    pub fn recording_processed(&self) -> bool {
        self.status == "completed" && self.transcription.is_some()
    }
}

/// Columns supplied by one callback. `None` leaves the stored column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallUpdate {
    pub call_sid: Option<String>,
    pub from_phone: Option<String>,
    pub to_phone: Option<String>,
    pub status: Option<String>,
    pub recording_url: Option<String>,
    pub transcription: Option<String>,
    pub raw_json: Option<serde_json::Value>,
}

impl CallUpdate {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }
}

/// Business display name for a provider-facing number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub systemix_number: String,
    pub company_name: Option<String>,
    pub name: Option<String>,
}

impl TenantProfile {
    pub fn display_name(&self) -> Option<&str> {
        self.company_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.name.as_deref().filter(|n| !n.is_empty()))
    }
}
