//! Rewindability specs.
//!
//! Kinds are ordered by strength: a mark-restorable stream is also rewindable.

use super::{MatchDiscipline, PropertySpec};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RewindabilitySpec {
    #[default]
    NotRewindable,
    Rewindable,
    MarkRestore,
}

impl PropertySpec for RewindabilitySpec {
    fn satisfies(&self, required: &Self, matching: MatchDiscipline) -> bool {
        match matching {
            MatchDiscipline::Exact => self == required || *required == RewindabilitySpec::NotRewindable,
            MatchDiscipline::Satisfy | MatchDiscipline::Subset => self >= required,
        }
    }

    fn is_required(&self) -> bool {
        *self != RewindabilitySpec::NotRewindable
    }
}

impl fmt::Display for RewindabilitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RewindabilitySpec::NotRewindable => "none",
            RewindabilitySpec::Rewindable => "rewindable",
            RewindabilitySpec::MarkRestore => "mark-restore",
        };
        f.write_str(s)
    }
}
