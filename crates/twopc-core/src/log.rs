//! # log
//!
//! why: define the durable projection of coordinator and participant state
//! relations: written and read by twopc-storage, produced by coordinator.rs and participant.rs
//! what: LogRecord, one per transaction id

use crate::coordinator::CoordinatorRecord;
use crate::participant::ParticipantRecord;
use crate::types::TransactionId;
use serde::{Deserialize, Serialize};

/// A single persisted record, keyed by transaction id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum LogRecord {
    Coordinator(CoordinatorRecord),
    Participant(ParticipantRecord),
}

impl LogRecord {
    pub fn id(&self) -> &TransactionId {
        match self {
            Self::Coordinator(rec) => &rec.id,
            Self::Participant(rec) => &rec.id,
        }
    }

    pub fn as_coordinator(&self) -> Option<&CoordinatorRecord> {
        match self {
            Self::Coordinator(rec) => Some(rec),
            Self::Participant(_) => None,
        }
    }

    pub fn as_participant(&self) -> Option<&ParticipantRecord> {
        match self {
            Self::Participant(rec) => Some(rec),
            Self::Coordinator(_) => None,
        }
    }
}

impl From<CoordinatorRecord> for LogRecord {
    fn from(rec: CoordinatorRecord) -> Self {
        Self::Coordinator(rec)
    }
}

impl From<ParticipantRecord> for LogRecord {
    fn from(rec: ParticipantRecord) -> Self {
        Self::Participant(rec)
    }
}
