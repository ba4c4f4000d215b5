//! Call-control documents returned to the provider on the voice-answer callback

/// Spoken before the beep when no greeting is configured.
pub const DEFAULT_GREETING: &str = "Thanks for calling. We are currently on a job site or helping another customer right now. Please leave a brief message with your name and what you need help with. To get you scheduled quickly, we will send a follow-up text to this number. By leaving a message, you consent to receive text messages from us regarding your inquiry. Please leave your message after the tone.";

const APOLOGY: &str = "Sorry, we are unable to process your call right now.";

/// Path the provider posts finished recordings to.
pub const RECORDING_CALLBACK_PATH: &str = "/v1/webhooks/twilio/recording";

pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Recording callback URL carrying the caller and callee, so the recording
/// callback can be correlated without a database write on the answer path.
pub fn recording_callback_url(base_url: &str, from: &str, to: &str) -> String {
    format!(
        "{}{}?from={}&to={}",
        base_url.trim_end_matches('/'),
        RECORDING_CALLBACK_PATH,
        encode_component(from),
        encode_component(to)
    )
}

/// Play the greeting, then record a voicemail of up to two minutes.
pub fn voicemail_response(greeting: &str, callback_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Say voice="Polly.Matthew-Neural">{}</Say>
  <Record
    maxLength="120"
    timeout="10"
    playBeep="true"
    transcribe="false"
    recordingStatusCallback="{}"
    recordingStatusCallbackEvent="completed"
  />
</Response>"#,
        escape_xml(greeting),
        escape_xml(callback_url)
    )
}

/// Apologise and hang up.
pub fn unavailable_response() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>{}</Say><Hangup/></Response>"#,
        APOLOGY
    )
}
