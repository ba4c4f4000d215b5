//! Typed provider callbacks
//!
//! Every webhook body is form-encoded. Fields are pulled out once, here, with
//! a defined default for each, so the rest of the pipeline never touches the
//! raw parameter map.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::call::{CallKey, CallUpdate, PROVIDER_SIMULATE, PROVIDER_TWILIO, UNKNOWN};

/// Form parameters, sorted by name (the order signatures are computed in).
pub type FormParams = BTreeMap<String, String>;

/// Terminal statuses that mean nobody picked up.
pub const MISSED_STATUSES: [&str; 3] = ["no-answer", "busy", "canceled"];

/// Parse an `application/x-www-form-urlencoded` body or query string.
/// Repeated names keep the last value.
pub fn parse_form(input: &[u8]) -> FormParams {
    url::form_urlencoded::parse(input).into_owned().collect()
}

fn field(params: &FormParams, name: &str) -> String {
    params.get(name).cloned().unwrap_or_default()
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Lowercase, trimmed status token; empty becomes `unknown`.
pub fn normalize_status(raw: &str) -> String {
    let status = raw.trim().to_lowercase();
    if status.is_empty() {
        UNKNOWN.to_string()
    } else {
        status
    }
}

pub fn is_missed_status(status: &str) -> bool {
    MISSED_STATUSES.contains(&status)
}

/// The voice-answer callback: someone is calling right now.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceEvent {
    pub from: String,
    pub to: String,
}

impl VoiceEvent {
    pub fn from_params(params: &FormParams) -> Self {
        Self {
            from: field(params, "From"),
            to: field(params, "To"),
        }
    }
}

/// The recording-ready callback.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingEvent {
    pub provider: String,
    pub call_sid: String,
    pub recording_sid: String,
    pub recording_url: Option<String>,
    pub recording_duration: String,
    pub from: String,
    pub to: String,
}

impl RecordingEvent {
    /// `from`/`to` come from the callback URL query first (embedded by the
    /// voice response), then the form body.
    pub fn from_params(params: &FormParams, query: &FormParams) -> Self {
        let pick = |query_name: &str, form_name: &str| {
            non_empty(&field(query, query_name))
                .or_else(|| non_empty(&field(params, form_name)))
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        Self {
            provider: PROVIDER_TWILIO.to_string(),
            call_sid: field(params, "CallSid"),
            recording_sid: field(params, "RecordingSid"),
            recording_url: non_empty(&field(params, "RecordingUrl")),
            recording_duration: field(params, "RecordingDuration"),
            from: pick("from", "From"),
            to: pick("to", "To"),
        }
    }

    pub fn key(&self) -> CallKey {
        CallKey::from_candidates(&self.provider, &[&self.call_sid, &self.recording_sid])
    }

    pub fn raw_json(&self) -> serde_json::Value {
        serde_json::json!({
            "source": "twilio_recording_webhook",
            "recordingSid": self.recording_sid,
            "callSid": self.call_sid,
            "from": self.from,
            "to": self.to,
            "recordingUrl": self.recording_url,
            "recordingDuration": self.recording_duration,
        })
    }
}

/// The call-status callback.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub call_sid: String,
    pub parent_call_sid: String,
    pub from: String,
    pub to: String,
    /// `CallStatus`, else `DialCallStatus`, as received
    pub raw_status: String,
    /// Normalized status token
    pub status: String,
    pub recording_sid: String,
    pub recording_url: String,
    pub recording_duration: String,
}

impl StatusEvent {
    pub fn from_params(params: &FormParams) -> Self {
        let raw_status = non_empty(&field(params, "CallStatus"))
            .or_else(|| non_empty(&field(params, "DialCallStatus")))
            .unwrap_or_default();

        Self {
            call_sid: field(params, "CallSid"),
            parent_call_sid: field(params, "ParentCallSid"),
            from: field(params, "From"),
            to: field(params, "To"),
            status: normalize_status(&raw_status),
            raw_status,
            recording_sid: field(params, "RecordingSid"),
            recording_url: field(params, "RecordingUrl"),
            recording_duration: field(params, "RecordingDuration"),
        }
    }

    pub fn key(&self) -> CallKey {
        CallKey::from_candidates(PROVIDER_TWILIO, &[&self.call_sid, &self.parent_call_sid])
    }

    pub fn is_missed(&self) -> bool {
        is_missed_status(&self.status)
    }

    /// The payload itself says a voicemail was left.
    pub fn voicemail_in_payload(&self) -> bool {
        if !self.recording_sid.trim().is_empty() || !self.recording_url.trim().is_empty() {
            return true;
        }
        let duration = self.recording_duration.trim();
        !duration.is_empty() && duration != "0"
    }

    /// Columns this callback writes.
    pub fn to_update(&self) -> CallUpdate {
        CallUpdate {
            call_sid: non_empty(&self.call_sid),
            from_phone: Some(non_empty(&self.from).unwrap_or_else(|| UNKNOWN.to_string())),
            to_phone: Some(non_empty(&self.to).unwrap_or_else(|| UNKNOWN.to_string())),
            status: Some(self.status.clone()),
            raw_json: Some(serde_json::json!({
                "source": "twilio_status_webhook",
                "callSid": self.call_sid,
                "fromPhone": self.from,
                "toPhone": self.to,
                "callStatus": self.raw_status,
            })),
            ..Default::default()
        }
    }
}

/// An inbound text message from a lead.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundTextEvent {
    pub from: String,
    pub body: String,
}

impl InboundTextEvent {
    pub fn from_params(params: &FormParams) -> Self {
        Self {
            from: non_empty(&field(params, "From")).unwrap_or_else(|| UNKNOWN.to_string()),
            body: field(params, "Body"),
        }
    }
}

/// JSON body accepted by the simulator endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedRecording {
    pub call_sid: Option<String>,
    pub caller: Option<String>,
    pub to_phone: Option<String>,
    pub to: Option<String>,
    pub recording_url: Option<String>,
}

/// Error text returned when a simulator request lacks a field.
pub const SIMULATOR_REQUIRED_FIELDS: &str =
    "callSid, caller, toPhone, and recordingUrl are required";

impl SimulatedRecording {
    /// Convert into a recording event, or `None` if a required field is missing.
    pub fn into_event(self) -> Option<RecordingEvent> {
        let call_sid = self.call_sid.as_deref().and_then(non_empty)?;
        let from = self.caller.as_deref().and_then(non_empty)?;
        let to = self
            .to_phone
            .as_deref()
            .and_then(non_empty)
            .or_else(|| self.to.as_deref().and_then(non_empty))?;
        let recording_url = self.recording_url.as_deref().and_then(non_empty)?;

        Some(RecordingEvent {
            provider: PROVIDER_SIMULATE.to_string(),
            call_sid,
            recording_sid: String::new(),
            recording_url: Some(recording_url),
            recording_duration: String::new(),
            from,
            to,
        })
    }
}
