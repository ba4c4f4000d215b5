//! Provider webhook signatures (HMAC-SHA1 over URL + sorted params).
//!
//! The provider signs each callback by appending every POST parameter name
//! and value, sorted by name, to the full request URL and computing
//! `base64(HMAC-SHA1(auth_token, payload))`. The result arrives in the
//! `X-Twilio-Signature` header.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::Config;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the request signature.
pub const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

/// How strictly signatures are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    /// Never checked
    Off,
    /// Checked and logged, never rejected
    Log,
    /// Missing or invalid signatures are rejected
    Enforce,
}

impl SignatureMode {
    /// An explicitly configured mode wins; otherwise enforce in production
    /// and stay off everywhere else. Unrecognised values count as unset.
    pub fn resolve(config: &Config) -> Self {
        config
            .twilio
            .signature_mode
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or(if config.is_production() {
                SignatureMode::Enforce
            } else {
                SignatureMode::Off
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureMode::Off => "off",
            SignatureMode::Log => "log",
            SignatureMode::Enforce => "enforce",
        }
    }
}

impl FromStr for SignatureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(SignatureMode::Off),
            "log" => Ok(SignatureMode::Log),
            "enforce" => Ok(SignatureMode::Enforce),
            other => Err(format!("unknown signature mode: {}", other)),
        }
    }
}

impl fmt::Display for SignatureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a signature did not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFailure {
    MissingSignature,
    InvalidSignature,
}

impl SignatureFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureFailure::MissingSignature => "missing_signature",
            SignatureFailure::InvalidSignature => "invalid_signature",
        }
    }
}

/// Result of applying the enforcement policy to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureCheck {
    /// Whether the request may be processed
    pub ok: bool,
    pub mode: SignatureMode,
    /// Set whenever verification did not succeed, even if `ok` is true
    pub reason: Option<SignatureFailure>,
}

/// Compute the signature the provider would send for this request.
pub fn compute_signature(auth_token: &str, url: &str, params: &BTreeMap<String, String>) -> String {
    let mut payload = String::with_capacity(url.len() + params.len() * 16);
    payload.push_str(url);
    // BTreeMap iterates in ascending key order
    for (name, value) in params {
        payload.push_str(name);
        payload.push_str(value);
    }

    let mut mac = match HmacSha1::new_from_slice(auth_token.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Verify a signature header against the request. Empty token or header never verifies.
pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    signature: &str,
) -> bool {
    if auth_token.is_empty() || signature.is_empty() {
        return false;
    }
    let expected = compute_signature(auth_token, url, params);
    timing_safe_eq(expected.as_bytes(), signature.as_bytes())
}

/// Compare without exiting early on the first differing byte.
fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Apply the configured enforcement mode to one request.
pub fn check_signature(
    config: &Config,
    url: &str,
    params: &BTreeMap<String, String>,
    header: Option<&str>,
) -> SignatureCheck {
    let mode = SignatureMode::resolve(config);
    if mode == SignatureMode::Off {
        return SignatureCheck {
            ok: true,
            mode,
            reason: None,
        };
    }

    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let Some(header) = header else {
        if mode == SignatureMode::Log {
            tracing::warn!("Webhook signature missing");
        }
        return SignatureCheck {
            ok: mode != SignatureMode::Enforce,
            mode,
            reason: Some(SignatureFailure::MissingSignature),
        };
    };

    let valid = verify_signature(&config.twilio.auth_token, url, params, header);
    if !valid && mode == SignatureMode::Log {
        tracing::warn!(url = %url, "Webhook signature verification failed");
    }

    SignatureCheck {
        ok: valid || mode == SignatureMode::Log,
        mode,
        reason: (!valid).then_some(SignatureFailure::InvalidSignature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/v1/webhooks/twilio/status";
    const TOKEN: &str = "secret-token";

    fn params() -> BTreeMap<String, String> {
        [
            ("To", "+15550002222"),
            ("CallSid", "CA123"),
            ("From", "+15550001111"),
            ("CallStatus", "no-answer"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn config_with_mode(mode: Option<&str>, environment: Option<&str>) -> Config {
        let mut config = Config::default();
        config.twilio.auth_token = TOKEN.to_string();
        config.twilio.signature_mode = mode.map(String::from);
        config.environment = environment.map(String::from);
        config
    }

    #[test]
    fn test_hmac_sha1_known_vector() {
        let sig = compute_signature(
            "key",
            "The quick brown fox jumps over the lazy dog",
            &BTreeMap::new(),
        );
        assert_eq!(sig, "3nybhbi3iqa8ino29wqQcBydtNk=");
    }

    #[test]
    fn test_params_sorted_before_signing() {
        // Insertion order is irrelevant; names are concatenated in sorted order
        assert_eq!(
            compute_signature(TOKEN, URL, &params()),
            "CCVROGHQN3W0eLdqGLQXvBRG1fQ="
        );
    }

    #[test]
    fn test_verify_roundtrip() {
        let sig = compute_signature(TOKEN, URL, &params());
        assert!(verify_signature(TOKEN, URL, &params(), &sig));
    }

    #[test]
    fn test_mutations_fail() {
        let sig = compute_signature(TOKEN, URL, &params());

        let mut changed = params();
        changed.insert("CallStatus".to_string(), "no-answeR".to_string());
        assert!(!verify_signature(TOKEN, URL, &changed, &sig));

        let mut extra = params();
        extra.insert("Digits".to_string(), "1".to_string());
        assert!(!verify_signature(TOKEN, URL, &extra, &sig));

        assert!(!verify_signature(TOKEN, &format!("{}?", URL), &params(), &sig));
        assert!(!verify_signature("secret-tokeN", URL, &params(), &sig));

        let mut tampered = sig.clone().into_bytes();
        tampered[0] = if tampered[0] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(!verify_signature(TOKEN, URL, &params(), &tampered));
    }

    #[test]
    fn test_empty_inputs_never_verify() {
        let sig = compute_signature("", URL, &params());
        assert!(!verify_signature("", URL, &params(), &sig));
        assert!(!verify_signature(TOKEN, URL, &params(), ""));
    }

    #[test]
    fn test_timing_safe_eq_lengths() {
        assert!(timing_safe_eq(b"abc", b"abc"));
        assert!(!timing_safe_eq(b"abc", b"abd"));
        assert!(!timing_safe_eq(b"abc", b"abcd"));
        assert!(timing_safe_eq(b"", b""));
    }

    #[test]
    fn test_mode_resolution() {
        assert_eq!(
            SignatureMode::resolve(&config_with_mode(None, None)),
            SignatureMode::Off
        );
        assert_eq!(
            SignatureMode::resolve(&config_with_mode(None, Some("production"))),
            SignatureMode::Enforce
        );
        assert_eq!(
            SignatureMode::resolve(&config_with_mode(Some("LOG"), Some("production"))),
            SignatureMode::Log
        );
        assert_eq!(
            SignatureMode::resolve(&config_with_mode(Some("off"), Some("production"))),
            SignatureMode::Off
        );
        // Garbage falls back to the environment default
        assert_eq!(
            SignatureMode::resolve(&config_with_mode(Some("strict"), Some("production"))),
            SignatureMode::Enforce
        );
    }

    #[test]
    fn test_check_off_always_passes() {
        let config = config_with_mode(Some("off"), None);
        let check = check_signature(&config, URL, &params(), None);
        assert!(check.ok);
        assert_eq!(check.reason, None);
    }

    #[test]
    fn test_check_log_reports_but_passes() {
        let config = config_with_mode(Some("log"), None);

        let missing = check_signature(&config, URL, &params(), None);
        assert!(missing.ok);
        assert_eq!(missing.reason, Some(SignatureFailure::MissingSignature));

        let invalid = check_signature(&config, URL, &params(), Some("bogus"));
        assert!(invalid.ok);
        assert_eq!(invalid.reason, Some(SignatureFailure::InvalidSignature));
    }

    #[test]
    fn test_check_enforce() {
        let config = config_with_mode(Some("enforce"), None);

        let missing = check_signature(&config, URL, &params(), None);
        assert!(!missing.ok);
        assert_eq!(missing.reason, Some(SignatureFailure::MissingSignature));
        assert_eq!(missing.reason.unwrap().as_str(), "missing_signature");

        let blank = check_signature(&config, URL, &params(), Some("  "));
        assert_eq!(blank.reason, Some(SignatureFailure::MissingSignature));

        let invalid = check_signature(&config, URL, &params(), Some("bogus"));
        assert!(!invalid.ok);
        assert_eq!(invalid.reason.unwrap().as_str(), "invalid_signature");

        let sig = compute_signature(TOKEN, URL, &params());
        let valid = check_signature(&config, URL, &params(), Some(&sig));
        assert!(valid.ok);
        assert_eq!(valid.mode, SignatureMode::Enforce);
        assert_eq!(valid.reason, None);
    }
}
