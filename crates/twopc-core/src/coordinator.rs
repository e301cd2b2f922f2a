//! # coordinator
//!
//! why: hold the coordinator's per-transaction state and the rules that mutate it
//! relations: persisted through log.rs, driven by twopc-node's Coordinator
//! what: CoordinatorRecord, ParticipantEntry, Tally, vote/decide/ack transitions

use crate::error::ProtocolError;
use crate::types::{AckStatus, Decision, NodeId, TransactionId, Vote};
use serde::{Deserialize, Serialize};

/// One participant as tracked by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEntry {
    pub id: NodeId,
    /// None until a vote arrives
    pub vote: Option<Vote>,
    pub status: AckStatus,
}

/// Result of counting the votes received so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    /// every participant voted yes
    Commit,
    /// at least one participant voted no
    Abort,
    /// still waiting on someone
    Pending,
}

/// Coordinator-side state of one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorRecord {
    pub id: TransactionId,
    /// None while undecided; immutable once set
    pub decision: Option<Decision>,
    /// in registry order
    pub participants: Vec<ParticipantEntry>,
}

impl CoordinatorRecord {
    /// Create an undecided record with every vote unknown.
    /// Duplicate participant ids are collapsed.
    pub fn new(id: TransactionId, participants: impl IntoIterator<Item = NodeId>) -> Self {
        let mut entries: Vec<ParticipantEntry> = Vec::new();
        for participant in participants {
            if entries.iter().any(|e| e.id == participant) {
                continue;
            }
            entries.push(ParticipantEntry {
                id: participant,
                vote: None,
                status: AckStatus::Pending,
            });
        }
        Self {
            id,
            decision: None,
            participants: entries,
        }
    }

    pub fn participant_ids(&self) -> Vec<NodeId> {
        self.participants.iter().map(|e| e.id.clone()).collect()
    }

    pub fn entry(&self, participant: &NodeId) -> Option<&ParticipantEntry> {
        self.participants.iter().find(|e| &e.id == participant)
    }

    fn entry_mut(&mut self, participant: &NodeId) -> Result<&mut ParticipantEntry, ProtocolError> {
        let id = self.id.clone();
        self.participants
            .iter_mut()
            .find(|e| &e.id == participant)
            .ok_or_else(|| ProtocolError::UnknownParticipant {
                id,
                participant: participant.clone(),
            })
    }

    /// Record a vote. Returns true if the record changed.
    ///
    /// The first vote from a participant wins and votes arriving after the
    /// decision are ignored, so redelivered VOTEs are harmless.
    pub fn record_vote(&mut self, participant: &NodeId, vote: Vote) -> Result<bool, ProtocolError> {
        let decided = self.decision.is_some();
        let entry = self.entry_mut(participant)?;
        if decided || entry.vote.is_some() {
            return Ok(false);
        }
        entry.vote = Some(vote);
        Ok(true)
    }

    pub fn tally(&self) -> Tally {
        if self.participants.iter().any(|e| e.vote == Some(Vote::No)) {
            Tally::Abort
        } else if self.participants.iter().all(|e| e.vote == Some(Vote::Yes)) {
            Tally::Commit
        } else {
            Tally::Pending
        }
    }

    /// Fix the outcome and reset every acknowledgement to pending.
    ///
    /// Deciding the same outcome twice is a no-op (returns false); a
    /// different outcome is refused.
    pub fn decide(&mut self, decision: Decision) -> Result<bool, ProtocolError> {
        match self.decision {
            Some(recorded) if recorded == decision => Ok(false),
            Some(recorded) => Err(ProtocolError::DecisionConflict {
                id: self.id.clone(),
                recorded,
                proposed: decision,
            }),
            None => {
                self.decision = Some(decision);
                for entry in &mut self.participants {
                    entry.status = AckStatus::Pending;
                }
                Ok(true)
            }
        }
    }

    /// Mark a participant's acknowledgement. Returns true if it moved
    /// pending -> done; done never regresses.
    pub fn acknowledge(&mut self, participant: &NodeId) -> Result<bool, ProtocolError> {
        if self.decision.is_none() {
            return Err(ProtocolError::Undecided(self.id.clone()));
        }
        let entry = self.entry_mut(participant)?;
        if entry.status == AckStatus::Done {
            return Ok(false);
        }
        entry.status = AckStatus::Done;
        Ok(true)
    }

    pub fn pending_participants(&self) -> Vec<NodeId> {
        self.participants
            .iter()
            .filter(|e| e.status == AckStatus::Pending)
            .map(|e| e.id.clone())
            .collect()
    }

    /// decided and acknowledged by everyone
    pub fn is_complete(&self) -> bool {
        self.decision.is_some() && self.participants.iter().all(|e| e.status == AckStatus::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(participants: &[&str]) -> CoordinatorRecord {
        CoordinatorRecord::new(
            TransactionId::new("T1").unwrap(),
            participants.iter().map(|p| NodeId::new(*p).unwrap()),
        )
    }

    fn node(raw: &str) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    #[test]
    fn new_record_is_undecided_with_unknown_votes() {
        let rec = record(&["P1", "P2", "P1"]);
        assert_eq!(rec.decision, None);
        assert_eq!(rec.participants.len(), 2);
        assert!(rec.participants.iter().all(|e| e.vote.is_none()));
        assert_eq!(rec.tally(), Tally::Pending);
    }

    #[test]
    fn first_vote_wins() {
        let mut rec = record(&["P1"]);
        assert!(rec.record_vote(&node("P1"), Vote::Yes).unwrap());
        assert!(!rec.record_vote(&node("P1"), Vote::No).unwrap());
        assert_eq!(rec.tally(), Tally::Commit);
    }

    #[test]
    fn decide_is_immutable() {
        let mut rec = record(&["P1"]);
        assert!(rec.decide(Decision::Abort).unwrap());
        assert!(!rec.decide(Decision::Abort).unwrap());
        assert!(matches!(
            rec.decide(Decision::Commit),
            Err(ProtocolError::DecisionConflict { .. })
        ));
    }
}
