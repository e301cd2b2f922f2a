//! # participant
//!
//! why: define the participant state machine and which transitions are legal
//! relations: persisted through log.rs, driven by twopc-node's Participant
//! what: ParticipantState, ParticipantRecord, DecisionEffect

use crate::error::ProtocolError;
use crate::types::{Decision, TransactionId, Vote};
use serde::{Deserialize, Serialize};

/// States of one transaction on a participant
///
/// ```text
/// Init --vote yes--> Uncertain --DECISION / INQUIRE_REPLY--> Committed | Aborted
///   |--vote no-----------------------------------------------> Aborted
///   '--pre-PREPARE timeout--> UnilaterallyAborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    /// known (START or PREPARE seen) but not voted
    #[default]
    Init,
    /// voted yes; only the coordinator can resolve this
    Uncertain,
    Committed,
    Aborted,
    /// gave up waiting for PREPARE; every later PREPARE is answered NO
    UnilaterallyAborted,
}

impl ParticipantState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Committed | Self::Aborted | Self::UnilaterallyAborted
        )
    }
}

/// What applying a decision did to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionEffect {
    /// state changed; the caller must persist before acknowledging
    Applied,
    /// the same outcome was already recorded
    AlreadyApplied,
}

/// Participant-side state of one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: TransactionId,
    pub vote: Option<Vote>,
    pub state: ParticipantState,
}

impl ParticipantRecord {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            vote: None,
            state: ParticipantState::Init,
        }
    }

    pub fn is_uncertain(&self) -> bool {
        self.state == ParticipantState::Uncertain
    }

    /// outcome recorded locally, if any
    pub fn decision(&self) -> Option<Decision> {
        match self.state {
            ParticipantState::Committed => Some(Decision::Commit),
            ParticipantState::Aborted | ParticipantState::UnilaterallyAborted => {
                Some(Decision::Abort)
            }
            ParticipantState::Init | ParticipantState::Uncertain => None,
        }
    }

    fn invalid(&self, action: &'static str) -> ProtocolError {
        ProtocolError::InvalidTransition {
            id: self.id.clone(),
            from: self.state,
            action,
        }
    }

    /// Init -> Uncertain
    pub fn vote_yes(&mut self) -> Result<(), ProtocolError> {
        if self.state != ParticipantState::Init {
            return Err(self.invalid("vote yes"));
        }
        self.vote = Some(Vote::Yes);
        self.state = ParticipantState::Uncertain;
        Ok(())
    }

    /// Init -> Aborted. A no vote lets the participant abort on its own.
    pub fn vote_no(&mut self) -> Result<(), ProtocolError> {
        if self.state != ParticipantState::Init {
            return Err(self.invalid("vote no"));
        }
        self.vote = Some(Vote::No);
        self.state = ParticipantState::Aborted;
        Ok(())
    }

    /// Init -> UnilaterallyAborted; forbidden once a yes vote exists
    pub fn abort_unilaterally(&mut self) -> Result<(), ProtocolError> {
        if self.state != ParticipantState::Init {
            return Err(self.invalid("abort unilaterally"));
        }
        self.state = ParticipantState::UnilaterallyAborted;
        Ok(())
    }

    /// The answer a repeated PREPARE gets, or None if the callback must be asked.
    pub fn prepare_reply(&self) -> Option<Vote> {
        match self.state {
            ParticipantState::Init => None,
            ParticipantState::UnilaterallyAborted => Some(Vote::No),
            ParticipantState::Uncertain => Some(Vote::Yes),
            ParticipantState::Committed | ParticipantState::Aborted => {
                Some(self.vote.unwrap_or(Vote::No))
            }
        }
    }

    /// Apply the coordinator's decision.
    ///
    /// COMMIT is only legal from Uncertain; ABORT is legal from any
    /// non-committed state. Repeating the recorded outcome reports
    /// `AlreadyApplied` and leaves the record untouched.
    pub fn apply_decision(&mut self, decision: Decision) -> Result<DecisionEffect, ProtocolError> {
        if let Some(recorded) = self.decision() {
            if recorded == decision {
                return Ok(DecisionEffect::AlreadyApplied);
            }
            return Err(ProtocolError::DecisionConflict {
                id: self.id.clone(),
                recorded,
                proposed: decision,
            });
        }

        match (self.state, decision) {
            (ParticipantState::Uncertain, Decision::Commit) => {
                self.state = ParticipantState::Committed;
            }
            (_, Decision::Abort) => {
                self.state = ParticipantState::Aborted;
            }
            (_, Decision::Commit) => return Err(self.invalid("commit without a yes vote")),
        }
        Ok(DecisionEffect::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec() -> ParticipantRecord {
        ParticipantRecord::new(TransactionId::new("T1").unwrap())
    }

    #[test]
    fn new_record_starts_in_init() {
        let rec = rec();
        assert_eq!(rec.state, ParticipantState::Init);
        assert_eq!(rec.vote, None);
        assert_eq!(rec.decision(), None);
        assert_eq!(rec.prepare_reply(), None);
    }

    #[test]
    fn uncertain_cannot_abort_unilaterally() {
        let mut rec = rec();
        rec.vote_yes().unwrap();
        assert!(rec.is_uncertain());
        assert!(rec.abort_unilaterally().is_err());
        assert_eq!(rec.state, ParticipantState::Uncertain);
    }

    #[test]
    fn repeated_decision_is_idempotent() {
        let mut rec = rec();
        rec.vote_yes().unwrap();
        assert_eq!(rec.apply_decision(Decision::Commit), Ok(DecisionEffect::Applied));
        assert_eq!(
            rec.apply_decision(Decision::Commit),
            Ok(DecisionEffect::AlreadyApplied)
        );
        assert!(rec.apply_decision(Decision::Abort).is_err());
        assert_eq!(rec.state, ParticipantState::Committed);
    }
}
