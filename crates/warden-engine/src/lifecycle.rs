//! Intent and decision memo state machines.
//!
//! Intent: Draft -> Validating -> {BlockedSgl, AwaitingHuman, Executed, Failed}
//! AwaitingHuman -> Draft (approved) | Failed (rejected)
//!
//! Memo: Proposed -> {Approved, Rejected}; Approved -> Executed

use warden_core::types::{IntentStatus, MemoStatus};

use crate::error::LifecycleError;

/// Validate that an intent status transition is allowed.
///
/// `Validating -> Validating` is a reclaim after an expired lease.
pub fn validate_intent_transition(
    from: IntentStatus,
    to: IntentStatus,
) -> Result<(), LifecycleError> {
    use IntentStatus::*;

    let valid = matches!(
        (from, to),
        (Draft, Validating)
            | (Validating, Validating)
            | (Validating, BlockedSgl)
            | (Validating, AwaitingHuman)
            | (Validating, Executed)
            | (Validating, Failed)
            | (AwaitingHuman, Draft)
            | (AwaitingHuman, Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(LifecycleError::Intent(from, to))
    }
}

/// Validate that a decision memo transition is allowed.
pub fn validate_memo_transition(from: MemoStatus, to: MemoStatus) -> Result<(), LifecycleError> {
    let valid = matches!(
        (from, to),
        (MemoStatus::Proposed, MemoStatus::Approved)
            | (MemoStatus::Proposed, MemoStatus::Rejected)
            | (MemoStatus::Approved, MemoStatus::Executed)
    );

    if valid {
        Ok(())
    } else {
        Err(LifecycleError::Memo(from, to))
    }
}
