//! # callback
//!
//! why: let the hosting application decide how a participant votes
//! relations: invoked by participant.rs while handling PREPARE
//! what: DecisionCallback trait, FixedVote

use async_trait::async_trait;
use twopc_core::{TransactionId, Vote};

/// Supplies a participant's vote for a transaction.
///
/// Called only while handling PREPARE for `id`, and at most once per
/// transaction. It may take as long as it likes (or block forever, e.g.
/// waiting on an operator): only messages for the same transaction wait
/// behind it, every other transaction keeps flowing.
#[async_trait]
pub trait DecisionCallback: Send + Sync {
    async fn vote(&self, id: &TransactionId) -> Vote;
}

/// Always answers with the same vote
#[derive(Debug, Clone, Copy)]
pub struct FixedVote(pub Vote);

#[async_trait]
impl DecisionCallback for FixedVote {
    async fn vote(&self, _id: &TransactionId) -> Vote {
        self.0
    }
}
