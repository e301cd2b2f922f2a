//! # twopc-node
//!
//! why: run the two-phase commit roles on tokio over a real or simulated network
//! relations: drives twopc-core state through twopc-storage logs
//! what: Coordinator, Participant, transports, tcp server, config, tracing setup

pub mod callback;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fault;
pub mod node;
pub mod participant;
pub mod recovery;
pub mod server;
pub mod telemetry;
pub mod transport;

pub use callback::{DecisionCallback, FixedVote};
pub use config::{CoordinatorConfig, NodeConfig, ParticipantConfig};
pub use coordinator::{Coordinator, TransactionOutcome};
pub use error::{NodeError, Result};
pub use fault::FaultInjector;
pub use node::NodeHandler;
pub use participant::Participant;
pub use recovery::Recovery;
pub use transport::{LocalNetwork, MessageHandler, TcpTransport, Transport, TransportError};
