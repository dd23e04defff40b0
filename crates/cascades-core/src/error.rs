//! Session-fatal errors.
//!
//! Lookup misses and lost insertion races are handled where they happen and never
//! reach this type. Everything here aborts the enclosing optimization session.

use crate::memo::GroupId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    /// Statistics could not be derived, or no alternative satisfies a requirement.
    #[error("no plan found for group {group} under {requirement}: {reason}")]
    NoPlanFound {
        group: GroupId,
        requirement: String,
        reason: String,
    },

    /// A rehydrated plan failed its final property check.
    #[error("plan for group {group} does not satisfy required properties {requirement}")]
    UnsatisfiedRequiredProperties { group: GroupId, requirement: String },

    /// The external abort signal was raised.
    #[error("optimization aborted")]
    AbortRequested,

    /// The catalogue tried to insert something the memo cannot hold.
    #[error("invalid memo insertion: {reason}")]
    InvalidInsert { reason: String },
}

impl OptimizerError {
    pub fn no_plan(group: GroupId, requirement: impl ToString, reason: impl Into<String>) -> Self {
        Self::NoPlanFound {
            group,
            requirement: requirement.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_insert(reason: impl Into<String>) -> Self {
        Self::InvalidInsert {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
