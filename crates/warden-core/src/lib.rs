//! Warden Core - shared domain types, configuration, and error handling.
//!
//! Every other crate in the workspace depends on this one for the intent,
//! memo, and audit data model.

pub mod config;
pub mod error;
pub mod events;
pub mod sensitive;
pub mod types;

pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use events::AuditAction;
pub use types::*;
