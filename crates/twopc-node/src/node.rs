//! # node
//!
//! why: give the inbound side one entry point regardless of the node's role
//! relations: wraps coordinator.rs / participant.rs, served by server.rs or LocalNetwork

use crate::coordinator::Coordinator;
use crate::participant::Participant;
use crate::transport::{MessageHandler, Transport};
use async_trait::async_trait;
use std::sync::Arc;
use twopc_core::Message;
use twopc_storage::TransactionLog;

/// Routes inbound messages to the role this node plays
pub enum NodeHandler<L, T> {
    /// accepts VOTE, ACK, INQUIRE
    Coordinator(Arc<Coordinator<L, T>>),
    /// accepts START, PREPARE, DECISION
    Participant(Arc<Participant<L, T>>),
}

impl<L, T> NodeHandler<L, T> {
    pub fn coordinator(coordinator: Arc<Coordinator<L, T>>) -> Arc<Self> {
        Arc::new(Self::Coordinator(coordinator))
    }

    pub fn participant(participant: Arc<Participant<L, T>>) -> Arc<Self> {
        Arc::new(Self::Participant(participant))
    }
}

#[async_trait]
impl<L, T> MessageHandler for NodeHandler<L, T>
where
    L: TransactionLog + 'static,
    T: Transport + 'static,
{
    async fn handle(&self, message: Message) -> Option<Message> {
        match self {
            Self::Coordinator(coordinator) => coordinator.handle_message(message).await,
            Self::Participant(participant) => participant.handle_message(message).await,
        }
    }
}
