//! # error
//!
//! why: one error type for everything a node operation can fail on
//! relations: returned by coordinator.rs, participant.rs and config.rs
//! what: NodeError, Result alias

use thiserror::Error;
use twopc_core::{ProtocolError, TransactionId};
use twopc_storage::LogError;

/// Node error types
///
/// transport failures and timeouts are absorbed by the state machines and
/// never show up here; a LogError always aborts the operation that hit it.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transaction log failure: {0}")]
    Log(#[from] LogError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("transaction {0} already exists")]
    DuplicateTransaction(TransactionId),

    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for node operations
pub type Result<T> = std::result::Result<T, NodeError>;
