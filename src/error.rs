//! Error taxonomy for the matching-and-credit engine.
//!
//! Every fallible operation in the engine returns [`EngineResult`]. Errors are
//! classified per the design's error-handling section: each kind carries a
//! fixed disposition at the transaction boundary (reject-and-rollback, or
//! defer-to-scheduler for `BlockQuotaExhausted`). The orchestrator never
//! panics on a malformed operation; panics are reserved for violated internal
//! invariants.

use thiserror::Error;

pub type EngineResult<T = ()> = std::result::Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient funds: needed {needed}, have {have}")]
    InsufficientFunds { needed: i128, have: i128 },

    #[error("authority missing for account {0}")]
    AuthorityMissing(String),

    #[error("duplicate id: owner={owner} order_id={order_id}")]
    DuplicateId { owner: String, order_id: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("fill-or-kill order left a residual of {residual}")]
    FillOrKillUnfilled { residual: i64 },

    #[error("feed for {0} is stale")]
    FeedStale(String),

    #[error("asset {0} is globally settled")]
    GlobalSettled(String),

    #[error("match cascade exceeded the per-block quota of {quota} matched objects")]
    BlockQuotaExhausted { quota: u32 },

    #[error("arithmetic overflow or underflow")]
    MathError,

    #[error("unable to cast between numeric types")]
    CastingFailure,
}

impl EngineError {
    /// Whether a failure of this kind still lets the operation's partial
    /// effects commit. Only true for quota exhaustion; every other kind
    /// causes the enclosing transaction to roll back in full.
    pub fn commits_partial_effects(&self) -> bool {
        matches!(self, EngineError::BlockQuotaExhausted { .. })
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        EngineError::ConstraintViolation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exhaustion_is_the_only_partially_committing_kind() {
        assert!(EngineError::BlockQuotaExhausted { quota: 4 }.commits_partial_effects());
        assert!(!EngineError::Validation("x".into()).commits_partial_effects());
        assert!(!EngineError::MathError.commits_partial_effects());
    }
}
