//! Call lifecycle handling
//!
//! Correlates the provider's independent callbacks for one call into a single
//! stored record and decides when a follow-up text is owed.

pub mod coordinator;
pub mod twiml;

pub use coordinator::{CallCoordinator, PipelineError, RecordingOutcome, StatusOutcome};

/// Phone number reduced to its last four digits for logs.
pub fn mask_phone(phone: &str) -> String {
    if phone.is_empty() {
        return "unknown".to_string();
    }
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "***".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("***{}", tail)
}
