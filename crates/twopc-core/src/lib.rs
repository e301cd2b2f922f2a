//! # twopc-core
//!
//! why: implement the two-phase commit protocol rules in pure, portable rust
//! relations: used by twopc-storage for persistence, twopc-node for the async runtime
//! what: identifiers, wire messages, coordinator/participant records and their transitions

pub mod coordinator;
pub mod error;
pub mod log;
pub mod message;
pub mod participant;
pub mod types;

pub use coordinator::{CoordinatorRecord, ParticipantEntry, Tally};
pub use error::ProtocolError;
pub use log::LogRecord;
pub use message::{Message, MessageError};
pub use participant::{DecisionEffect, ParticipantRecord, ParticipantState};
pub use types::{AckStatus, Decision, InquiryAnswer, NodeId, TransactionId, Vote};
