//! Call lifecycle coordinator
//!
//! Drives the stored call record through the status and recording callbacks
//! and sends the resulting texts. Correctness under redelivery and concurrent
//! delivery rests on the store's per-row upserts and set-if-null follow-up
//! markers; nothing here takes a lock.
//!
//! Enrichment (audio fetch, transcription) is best effort: any failure falls
//! back to [`VOICEMAIL_PLACEHOLDER`] and the texts still go out.

use std::sync::Arc;
use thiserror::Error;

use super::mask_phone;
use crate::api::audio::{audio_url, is_trusted_host, url_host};
use crate::api::{AudioSource, Dispatch, NotificationDispatcher, SpeechToText};
use crate::config::Config;
use crate::models::{
    CallKey, CallUpdate, InboundTextEvent, RecordingEvent, StatusEvent, UNKNOWN,
};
use crate::store::{CallStore, StoreError};

/// Transcript used whenever no usable transcription is available.
pub const VOICEMAIL_PLACEHOLDER: &str = "Voice message received";

const STATUS_RECORDED: &str = "recorded";
const STATUS_COMPLETED: &str = "completed";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("untrusted recording host: {host}")]
    UntrustedRecordingHost { host: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a status callback led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// No follow-up owed for this status
    Ignored { status: String },
    /// A follow-up was already sent for this call
    Deduped { status: String },
    /// Caller or sender number unavailable
    MissingPhone,
    /// The text could not be sent; the call stays unmarked so a redelivery can retry
    DispatchFailed { status: String },
    FollowupSent {
        status: String,
        voicemail_found: bool,
        message_id: Option<String>,
    },
}

/// What a recording callback led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingOutcome {
    MissingRecording,
    /// The pipeline already finished for this call
    AlreadyCompleted,
    Processed {
        transcription: String,
        caller_notified: bool,
        owner_notified: bool,
    },
}

/// A phone number that can actually receive a text.
fn reachable(phone: &str) -> Option<&str> {
    let phone = phone.trim();
    (!phone.is_empty() && phone != UNKNOWN).then_some(phone)
}

pub struct CallCoordinator {
    config: Arc<Config>,
    store: Arc<dyn CallStore>,
    audio: Arc<dyn AudioSource>,
    stt: Arc<dyn SpeechToText>,
    dispatcher: NotificationDispatcher,
}

impl CallCoordinator {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn CallStore>,
        audio: Arc<dyn AudioSource>,
        stt: Arc<dyn SpeechToText>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            config,
            store,
            audio,
            stt,
            dispatcher,
        }
    }

    /// Status callback: record the status, then send the missed-call
    /// follow-up at most once per call.
    pub async fn handle_status(&self, event: &StatusEvent) -> Result<StatusOutcome, PipelineError> {
        let key = event.key();
        self.store.upsert_from_callback(&key, &event.to_update())?;

        let missed = event.is_missed();
        let voicemail_found = event.status == STATUS_COMPLETED
            && (event.voicemail_in_payload() || self.voicemail_in_store(&key, &event.call_sid));

        if !missed && !voicemail_found {
            tracing::debug!(call_id = %key.provider_call_id, status = %event.status, "No follow-up owed");
            return Ok(StatusOutcome::Ignored {
                status: event.status.clone(),
            });
        }

        let already_sent = self
            .store
            .find_by_key(&key)?
            .map_or(false, |record| record.followup_sent());
        if already_sent {
            tracing::info!(call_id = %key.provider_call_id, "Follow-up already sent; skipping");
            return Ok(StatusOutcome::Deduped {
                status: event.status.clone(),
            });
        }

        let recipient = reachable(&event.from);
        let sender = self.config.sender_number().or_else(|| reachable(&event.to));
        let (Some(recipient), Some(sender)) = (recipient, sender) else {
            tracing::error!(
                call_id = %key.provider_call_id,
                from = %mask_phone(&event.from),
                to = %mask_phone(&event.to),
                "Missed call text skipped due to missing phone values"
            );
            return Ok(StatusOutcome::MissingPhone);
        };

        let business = self.business_name(&event.to);
        let message = self.followup_message(&business);
        let dispatch = self.dispatcher.send(recipient, sender, &message).await;
        if !dispatch.ok {
            tracing::error!(
                call_id = %key.provider_call_id,
                status = %event.status,
                "Missed call text failed"
            );
            return Ok(StatusOutcome::DispatchFailed {
                status: event.status.clone(),
            });
        }

        if let Err(e) = self
            .store
            .mark_followup(&key, dispatch.message_id.as_deref())
        {
            tracing::error!(call_id = %key.provider_call_id, "Failed to record follow-up: {}", e);
        }

        let reason = if missed {
            "missed_status"
        } else {
            "completed_with_voicemail"
        };
        tracing::info!(
            call_id = %key.provider_call_id,
            status = %event.status,
            reason,
            to = %mask_phone(recipient),
            "Missed call text sent"
        );

        Ok(StatusOutcome::FollowupSent {
            status: event.status.clone(),
            voicemail_found,
            message_id: dispatch.message_id,
        })
    }

    /// Recording callback: transcribe the voicemail (best effort) and text
    /// both the caller and the business owner.
    pub async fn handle_recording(
        &self,
        event: &RecordingEvent,
    ) -> Result<RecordingOutcome, PipelineError> {
        let Some(recording_url) = event.recording_url.as_deref() else {
            tracing::error!(call_sid = %event.call_sid, "Recording callback missing recording URL");
            return Ok(RecordingOutcome::MissingRecording);
        };

        if self.config.is_production()
            && !is_trusted_host(&audio_url(recording_url), &self.config.twilio.trusted_domain)
        {
            let host = url_host(recording_url);
            tracing::error!(host = %host, "Untrusted recording host blocked");
            return Err(PipelineError::UntrustedRecordingHost { host });
        }

        let key = event.key();
        match self.store.find_by_key(&key) {
            Ok(Some(record)) if record.recording_processed() => {
                tracing::info!(call_id = %key.provider_call_id, "Recording already processed; skipping");
                return Ok(RecordingOutcome::AlreadyCompleted);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Recording status check failed, continuing: {}", e),
        }

        tracing::info!(
            call_id = %key.provider_call_id,
            from = %mask_phone(&event.from),
            to = %mask_phone(&event.to),
            duration = %event.recording_duration,
            "Processing recording"
        );

        self.persist(
            &key,
            &CallUpdate {
                call_sid: Some(event.call_sid.clone()).filter(|s| !s.is_empty()),
                from_phone: Some(event.from.clone()),
                to_phone: Some(event.to.clone()),
                status: Some(STATUS_RECORDED.to_string()),
                recording_url: Some(recording_url.to_string()),
                raw_json: Some(event.raw_json()),
                ..Default::default()
            },
        );

        let business = self.business_name(&event.to);
        let transcription = self.transcribe_recording(recording_url).await;
        self.persist(
            &key,
            &CallUpdate {
                transcription: Some(transcription.clone()),
                ..Default::default()
            },
        );

        let message = format!(
            "Hi, this is the team at {}. We missed your call regarding: \"{}\". We will follow up shortly!",
            business, transcription
        );
        let caller = self.notify(&event.from, &message).await;
        let owner = match self.config.business.owner_phone.as_deref() {
            Some(owner) => self.notify(owner, &message).await,
            None => {
                tracing::warn!("No owner phone configured; owner notification skipped");
                Dispatch::default()
            }
        };

        // Sends are not retried, so the call closes whatever their outcome
        self.persist(&key, &CallUpdate::status(STATUS_COMPLETED));

        Ok(RecordingOutcome::Processed {
            transcription,
            caller_notified: caller.ok,
            owner_notified: owner.ok,
        })
    }

    /// Create the `initiated` row for a simulated call unless it already exists.
    pub fn seed_simulated_call(&self, event: &RecordingEvent) -> Result<(), StoreError> {
        let key = event.key();
        if self.store.find_by_key(&key)?.is_none() {
            self.store.upsert_from_callback(
                &key,
                &CallUpdate {
                    from_phone: Some(event.from.clone()),
                    to_phone: Some(event.to.clone()),
                    status: Some("initiated".to_string()),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    /// Forward a lead's inbound text to the business owner.
    pub async fn forward_inbound_text(&self, event: &InboundTextEvent) -> Dispatch {
        let Some(owner) = self.config.business.owner_phone.as_deref() else {
            tracing::warn!("No owner phone configured; inbound text not forwarded");
            return Dispatch::default();
        };
        let message = format!(
            "💰 Lead Captured!\nFrom: {}\nSays: {}\n\nCall them back!",
            event.from, event.body
        );
        let dispatch = self.notify(owner, &message).await;
        if dispatch.ok {
            tracing::info!(from = %mask_phone(&event.from), "Inbound text forwarded to owner");
        }
        dispatch
    }

    async fn notify(&self, recipient: &str, message: &str) -> Dispatch {
        let Some(recipient) = reachable(recipient) else {
            tracing::warn!("Notification skipped: recipient unknown");
            return Dispatch::default();
        };
        let sender = self.config.sender_number().unwrap_or_default();
        self.dispatcher.send(recipient, sender, message).await
    }

    /// Fetch and transcribe, substituting the placeholder on any failure.
    async fn transcribe_recording(&self, recording_url: &str) -> String {
        let fetched = self.audio.fetch(recording_url).await;
        let Some(audio) = fetched.bytes.filter(|b| !b.is_empty()) else {
            tracing::warn!(status = ?fetched.status, "Audio unavailable; continuing without transcription");
            return VOICEMAIL_PLACEHOLDER.to_string();
        };

        match self.stt.transcribe(&audio).await {
            Ok(text) if !text.trim().is_empty() => {
                let text = text.trim().to_string();
                tracing::info!(chars = text.chars().count(), "Transcription complete");
                text
            }
            Ok(_) => VOICEMAIL_PLACEHOLDER.to_string(),
            Err(e) => {
                tracing::error!("Transcription failed: {:#}", e);
                VOICEMAIL_PLACEHOLDER.to_string()
            }
        }
    }

    fn persist(&self, key: &CallKey, update: &CallUpdate) {
        if let Err(e) = self.store.upsert_from_callback(key, update) {
            tracing::error!(call_id = %key.provider_call_id, "Call record update failed: {}", e);
        }
    }

    /// A recording or transcript is already stored for this call.
    fn voicemail_in_store(&self, key: &CallKey, call_sid: &str) -> bool {
        let by_key = self.store.find_by_key(key);
        let by_sid = || {
            if call_sid.is_empty() || call_sid == key.provider_call_id {
                Ok(None)
            } else {
                self.store.find_by_call_sid(&key.provider, call_sid)
            }
        };

        let found = by_key.and_then(|record| match record {
            Some(r) if r.has_voicemail() => Ok(true),
            _ => by_sid().map(|r| r.map_or(false, |r| r.has_voicemail())),
        });
        found.unwrap_or_else(|e| {
            tracing::warn!(call_sid = %call_sid, "Voicemail lookup failed: {}", e);
            false
        })
    }

    /// Tenant display name for the dialled number, or the configured fallback.
    fn business_name(&self, to_phone: &str) -> String {
        let fallback = || self.config.business.fallback_name.clone();
        let Some(number) = reachable(to_phone) else {
            return fallback();
        };
        match self.store.find_tenant(number) {
            Ok(Some(tenant)) => tenant.display_name().map(String::from).unwrap_or_else(fallback),
            Ok(None) => fallback(),
            Err(e) => {
                tracing::warn!(to = %mask_phone(number), "Business name lookup failed: {}", e);
                fallback()
            }
        }
    }

    fn followup_message(&self, business: &str) -> String {
        match self.config.business.missed_call_script.as_deref() {
            Some(script) if !script.trim().is_empty() => script.replace("{business}", business),
            _ => format!(
                "Hi, this is {}. Sorry we missed your call! How can we help you today?",
                business
            ),
        }
    }
}
