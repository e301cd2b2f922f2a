//! # config
//!
//! why: keep every timeout and retry budget tunable without touching protocol code
//! relations: consumed by coordinator.rs, participant.rs and transport.rs
//! what: CoordinatorConfig, ParticipantConfig, NodeConfig (json file)

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use twopc_core::NodeId;

/// Coordinator timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// how long the prepare phase waits for votes (ms)
    pub vote_timeout_ms: u64,
    /// how long to wait for an ACK to one DECISION send (ms)
    pub ack_timeout_ms: u64,
    /// pause between dissemination rounds (ms)
    pub retry_interval_ms: u64,
    /// give up after this many rounds; None retries forever
    pub max_dissemination_rounds: Option<u32>,
    /// send START to every participant when a transaction begins
    pub send_start_notice: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            vote_timeout_ms: 60_000,
            ack_timeout_ms: 5_000,
            retry_interval_ms: 1_000,
            max_dissemination_rounds: None,
            send_start_notice: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Participant timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    /// after START, abort unilaterally if PREPARE does not arrive in time (ms)
    pub prepare_timeout_ms: u64,
    /// after voting yes, start inquiring if no DECISION arrives in time (ms)
    pub decision_timeout_ms: u64,
    /// pause between INQUIRE attempts (ms)
    pub inquiry_interval_ms: u64,
    /// how long to wait for one INQUIRE_REPLY (ms)
    pub inquiry_timeout_ms: u64,
    /// give up after this many inquiries; None retries forever
    pub inquiry_max_attempts: Option<u32>,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: 30_000,
            decision_timeout_ms: 30_000,
            inquiry_interval_ms: 5_000,
            inquiry_timeout_ms: 5_000,
            inquiry_max_attempts: None,
        }
    }
}

impl ParticipantConfig {
    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    pub fn inquiry_interval(&self) -> Duration {
        Duration::from_millis(self.inquiry_interval_ms)
    }

    pub fn inquiry_timeout(&self) -> Duration {
        Duration::from_millis(self.inquiry_timeout_ms)
    }
}

/// Everything one node needs to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub listen_addr: SocketAddr,
    /// coordinator to inquire with (participants only)
    #[serde(default)]
    pub coordinator: Option<NodeId>,
    /// address book used by the tcp transport
    #[serde(default)]
    pub peers: HashMap<NodeId, SocketAddr>,
    pub log_dir: PathBuf,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub coordinator_config: CoordinatorConfig,
    #[serde(default)]
    pub participant_config: ParticipantConfig,
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

impl NodeConfig {
    /// load a node configuration from a json file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        let config: NodeConfig = serde_json::from_str(&contents)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(coordinator) = &self.coordinator {
            if !self.peers.contains_key(coordinator) {
                return Err(NodeError::Config(format!(
                    "coordinator {coordinator} has no entry in peers"
                )));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let coordinator = CoordinatorConfig::default();
        assert_eq!(coordinator.vote_timeout(), Duration::from_secs(60));
        assert_eq!(coordinator.max_dissemination_rounds, None);
        assert!(coordinator.send_start_notice);

        let participant = ParticipantConfig::default();
        assert_eq!(participant.prepare_timeout(), Duration::from_secs(30));
        assert_eq!(participant.inquiry_interval(), Duration::from_secs(5));
        assert_eq!(participant.inquiry_max_attempts, None);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ParticipantConfig =
            serde_json::from_str(r#"{ "prepare_timeout_ms": 250 }"#).unwrap();
        assert_eq!(config.prepare_timeout_ms, 250);
        assert_eq!(config.decision_timeout_ms, 30_000);
    }
}
