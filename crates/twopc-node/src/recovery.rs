//! # recovery
//!
//! why: report what a restart picked back up and let callers wait for it
//! relations: returned by Coordinator::recover and Participant::recover

use tokio::task::JoinHandle;
use twopc_core::TransactionId;

/// Transactions resumed from the log, each driven by a background task
#[derive(Debug)]
pub struct Recovery {
    resumed: Vec<TransactionId>,
    tasks: Vec<JoinHandle<()>>,
}

impl Recovery {
    pub(crate) fn new(resumed: Vec<TransactionId>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { resumed, tasks }
    }

    /// ids found unfinished in the log, in log order
    pub fn resumed(&self) -> &[TransactionId] {
        &self.resumed
    }

    /// wait for every background task to finish (resolved or out of retries)
    pub async fn wait(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
