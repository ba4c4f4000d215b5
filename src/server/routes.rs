//! Webhook routes
//!
//! Asynchronous callback endpoints answer 200 even when processing fails,
//! since the provider treats anything else as a failed delivery and retries.
//! 401 is reserved for signature rejection and 400 for malformed simulator
//! requests.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use super::error::{Envelope, WebhookError, WebhookResult};
use super::AppState;
use crate::auth::{check_signature, SIGNATURE_HEADER};
use crate::calling::twiml;
use crate::calling::{mask_phone, PipelineError, RecordingOutcome, StatusOutcome};
use crate::models::{
    parse_form, FormParams, InboundTextEvent, RecordingEvent, SimulatedRecording, StatusEvent,
    VoiceEvent, SIMULATOR_REQUIRED_FIELDS,
};

const SIMULATOR_KEY_HEADER: &str = "x-simulator-key";

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/webhooks/twilio/voice", post(voice_answer))
        .route("/voice", post(voice_answer))
        .route("/v1/webhooks/twilio/recording", post(recording_ready))
        .route("/recording", post(recording_ready))
        .route("/v1/webhooks/twilio/status", post(call_status))
        .route("/status", post(call_status))
        .route("/v1/webhooks/twilio/sms", post(inbound_text))
        .route("/test/simulate-callback", post(simulate_callback))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Apply the signature policy; `Err` carries the rejection to return.
fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    params: &FormParams,
    endpoint: &str,
    envelope: Envelope,
) -> WebhookResult<()> {
    let url = state.request_url(headers, uri);
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let check = check_signature(&state.config, &url, params, signature);
    if check.ok {
        return Ok(());
    }
    tracing::error!(
        endpoint,
        mode = %check.mode,
        reason = check.reason.map(|r| r.as_str()).unwrap_or("unknown"),
        "Webhook signature rejected"
    );
    Err(WebhookError::Unauthorized(envelope))
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

/// Answer the call: greet, then record a voicemail.
async fn voice_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let params = parse_form(&body);
    if authenticate(&state, &headers, &uri, &params, "voice", Envelope::Bare).is_err() {
        return xml(twiml::unavailable_response());
    }

    let event = VoiceEvent::from_params(&params);
    let greeting = state
        .config
        .business
        .voice_greeting
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .unwrap_or(twiml::DEFAULT_GREETING);
    let callback = twiml::recording_callback_url(&state.origin(&headers), &event.from, &event.to);

    tracing::info!(
        from = %mask_phone(&event.from),
        to = %mask_phone(&event.to),
        "Voice webhook accepted"
    );
    xml(twiml::voicemail_response(greeting, &callback))
}

async fn recording_ready(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> WebhookResult<Json<Value>> {
    let params = parse_form(&body);
    authenticate(&state, &headers, &uri, &params, "recording", Envelope::Success)?;

    let query = parse_form(uri.query().unwrap_or_default().as_bytes());
    let event = RecordingEvent::from_params(&params, &query);

    let reply = match state.coordinator.handle_recording(&event).await {
        Ok(RecordingOutcome::Processed { .. }) => json!({ "success": true }),
        Ok(RecordingOutcome::AlreadyCompleted) => json!({ "success": true, "skipped": true }),
        Ok(RecordingOutcome::MissingRecording) => Envelope::Success.failure("missing_recording"),
        Err(PipelineError::UntrustedRecordingHost { .. }) => {
            Envelope::Success.failure("invalid_recording_host")
        }
        Err(e) => {
            tracing::error!("Recording processing failed: {}", e);
            Envelope::Success.failure("processing_failed")
        }
    };
    Ok(Json(reply))
}

async fn call_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> WebhookResult<Json<Value>> {
    let params = parse_form(&body);
    authenticate(&state, &headers, &uri, &params, "status", Envelope::Ok)?;

    let event = StatusEvent::from_params(&params);
    let reply = match state.coordinator.handle_status(&event).await {
        Ok(StatusOutcome::Ignored { status }) => {
            json!({ "ok": true, "ignored": true, "status": status })
        }
        Ok(StatusOutcome::Deduped { status }) => {
            json!({ "ok": true, "deduped": true, "status": status })
        }
        Ok(StatusOutcome::MissingPhone) => Envelope::Ok.failure("missing_sms_phone"),
        Ok(StatusOutcome::DispatchFailed { .. }) => Envelope::Ok.failure("sms_failed"),
        Ok(StatusOutcome::FollowupSent {
            status,
            voicemail_found,
            message_id,
        }) => json!({
            "ok": true,
            "missed": true,
            "status": status,
            "voicemailFound": voicemail_found,
            "messageSid": message_id,
        }),
        Err(e) => {
            tracing::error!("Status processing failed: {}", e);
            Envelope::Ok.failure("processing_failed")
        }
    };
    Ok(Json(reply))
}

async fn inbound_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> WebhookResult<&'static str> {
    let params = parse_form(&body);
    authenticate(&state, &headers, &uri, &params, "sms", Envelope::Bare)?;

    let event = InboundTextEvent::from_params(&params);
    state.coordinator.forward_inbound_text(&event).await;
    Ok("")
}

/// Feed a fake recording through the pipeline. Disabled in production.
async fn simulate_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult<Json<Value>> {
    if state.config.is_production() {
        return Err(WebhookError::NotFound);
    }

    if let Some(ref expected) = state.config.simulator.api_key {
        let provided = headers
            .get(SIMULATOR_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return Err(WebhookError::Unauthorized(Envelope::Bare));
        }
    }

    let request: SimulatedRecording = serde_json::from_slice(&body)
        .map_err(|_| WebhookError::BadRequest("invalid_json".to_string()))?;
    let event = request
        .into_event()
        .ok_or_else(|| WebhookError::BadRequest(SIMULATOR_REQUIRED_FIELDS.to_string()))?;

    if let Err(e) = state.coordinator.seed_simulated_call(&event) {
        tracing::error!("Failed to seed simulated call: {}", e);
    }

    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        match coordinator.handle_recording(&event).await {
            Ok(outcome) => tracing::info!(?outcome, "Simulated call processed"),
            Err(e) => tracing::error!("Simulated call failed: {}", e),
        }
    });

    Ok(Json(json!({ "ok": true })))
}
