//! Data models for gassist
//!
//! Scope sets and credential records, the Gmail message-part tree,
//! and attachment download results.

mod attachment;
mod credential;
mod message;
mod scope;

pub use attachment::*;
pub use credential::*;
pub use message::*;
pub use scope::*;
