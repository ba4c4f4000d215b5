//! Data models for calls and provider callbacks

mod call;
mod events;

pub use call::*;
pub use events::*;
