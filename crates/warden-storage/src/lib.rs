//! Warden Storage crate - SQLite persistence for intents, memos, and audit.
//!
//! Provides a WAL-mode SQLite database with migrations and one repository
//! per table. Every status change is a conditional update so that several
//! workers (each with its own connection) can share one database file.

pub mod audit;
pub mod db;
pub mod halts;
pub mod intents;
pub mod memos;
pub mod migrations;
pub mod workflows;

pub use audit::{AuditFilter, AuditRepository};
pub use db::Database;
pub use halts::{TenantHalt, TenantHaltRepository};
pub use intents::{ClaimRequest, IntentFilter, IntentRepository};
pub use memos::{Approval, ApprovalView, MemoFilter, MemoRepository};
pub use workflows::WorkflowRepository;

