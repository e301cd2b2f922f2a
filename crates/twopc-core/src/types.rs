//! # types
//!
//! why: give the protocol's vocabulary strong types instead of bare strings
//! relations: used everywhere; tokens here are exactly what message.rs puts on the wire
//! what: TransactionId, NodeId, Vote, Decision, AckStatus, InquiryAnswer

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn validate_token(raw: &str) -> Result<(), ProtocolError> {
    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        return Err(ProtocolError::InvalidIdentifier(raw.to_string()));
    }
    Ok(())
}

/// Globally unique transaction identifier, chosen by the initiator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        validate_token(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name of a node (coordinator or participant)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        validate_token(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_id_impls {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ProtocolError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::new(raw)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> String {
                id.0
            }
        }
    };
}

string_id_impls!(TransactionId);
string_id_impls!(NodeId);

/// A participant's answer to PREPARE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Yes,
    No,
}

/// The coordinator's final outcome for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Commit,
    Abort,
}

/// Whether a participant has acknowledged the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    #[default]
    Pending,
    Done,
}

/// What the coordinator can say about a transaction when asked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InquiryAnswer {
    Commit,
    Abort,
    /// no durable decision yet; the asker retries later
    Unknown,
}

impl InquiryAnswer {
    /// the decision carried by this answer, if it is terminal
    pub fn decision(self) -> Option<Decision> {
        match self {
            Self::Commit => Some(Decision::Commit),
            Self::Abort => Some(Decision::Abort),
            Self::Unknown => None,
        }
    }
}

impl From<Option<Decision>> for InquiryAnswer {
    fn from(decision: Option<Decision>) -> Self {
        match decision {
            Some(Decision::Commit) => Self::Commit,
            Some(Decision::Abort) => Self::Abort,
            None => Self::Unknown,
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Yes => "YES",
            Self::No => "NO",
        })
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
        })
    }
}

impl fmt::Display for InquiryAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Unknown => "UNKNOWN",
        })
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Done => "done",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_reject_whitespace_and_empty() {
        assert!(TransactionId::new("T1").is_ok());
        assert!(TransactionId::new("").is_err());
        assert!(TransactionId::new("two words").is_err());
        assert!(NodeId::new("p1\n").is_err());
    }

    #[test]
    fn identifiers_deserialize_through_validation() {
        let ok: TransactionId = serde_json::from_str("\"tx-9\"").unwrap();
        assert_eq!(ok.as_str(), "tx-9");
        assert!(serde_json::from_str::<NodeId>("\"bad id\"").is_err());
    }

    #[test]
    fn inquiry_answer_maps_to_decision() {
        assert_eq!(InquiryAnswer::Commit.decision(), Some(Decision::Commit));
        assert_eq!(InquiryAnswer::Unknown.decision(), None);
        assert_eq!(InquiryAnswer::from(Some(Decision::Abort)), InquiryAnswer::Abort);
    }
}
