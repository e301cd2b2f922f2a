//! # error
//!
//! why: name every way a protocol rule can be violated
//! relations: returned by coordinator.rs, participant.rs and types.rs
//! what: ProtocolError

use crate::participant::ParticipantState;
use crate::types::{Decision, NodeId, TransactionId};
use thiserror::Error;

/// Violations of the commit protocol's state rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// identifiers travel as single whitespace-delimited tokens
    #[error("invalid identifier {0:?}: must be non-empty and contain no whitespace")]
    InvalidIdentifier(String),

    #[error("transaction {id} already decided {recorded}, refusing {proposed}")]
    DecisionConflict {
        id: TransactionId,
        recorded: Decision,
        proposed: Decision,
    },

    #[error("transaction {id}: cannot {action} in state {from:?}")]
    InvalidTransition {
        id: TransactionId,
        from: ParticipantState,
        action: &'static str,
    },

    #[error("transaction {id} has no participant {participant}")]
    UnknownParticipant {
        id: TransactionId,
        participant: NodeId,
    },

    #[error("transaction {0} has not been decided")]
    Undecided(TransactionId),
}
