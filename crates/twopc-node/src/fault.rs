//! # fault
//!
//! why: simulate a coordinator that dies before phase one, for tests
//! relations: consulted by coordinator.rs before sending PREPARE

use parking_lot::Mutex;
use std::collections::HashSet;
use twopc_core::TransactionId;

/// Test-only fault injection
#[derive(Debug, Default)]
pub struct FaultInjector {
    suppressed_prepares: Mutex<HashSet<TransactionId>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// no PREPARE will be sent for `id`
    pub fn suppress_prepare(&self, id: TransactionId) {
        self.suppressed_prepares.lock().insert(id);
    }

    pub fn clear(&self, id: &TransactionId) {
        self.suppressed_prepares.lock().remove(id);
    }

    pub fn prepare_suppressed(&self, id: &TransactionId) -> bool {
        self.suppressed_prepares.lock().contains(id)
    }
}
