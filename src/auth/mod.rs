//! Inbound webhook authentication
//!
//! Callbacks are authenticated by the provider's keyed request signature,
//! under a per-deployment enforcement mode.

pub mod signature;

pub use signature::{check_signature, compute_signature, SignatureMode, SIGNATURE_HEADER};
