//! # message
//!
//! why: define every protocol message and its one-line text encoding
//! relations: built by twopc-node's coordinator/participant, carried by its transports
//! what: Message enum, encode(), FromStr parsing, MessageError
//!
//! Wire format, one message per exchange, whitespace-delimited:
//!
//! ```text
//! START         <txid>
//! PREPARE       <txid>
//! VOTE          <txid> <participant-id> <YES|NO>
//! DECISION      <txid> <COMMIT|ABORT>
//! ACK           <txid> <participant-id>
//! INQUIRE       <txid>
//! INQUIRE_REPLY <txid> <COMMIT|ABORT|UNKNOWN>
//! ```

use crate::types::{Decision, InquiryAnswer, NodeId, TransactionId, Vote};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// All messages exchanged between coordinator and participants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Optional notice that a transaction exists; arms the pre-PREPARE timer
    Start { id: TransactionId },
    /// Phase one: ask for a vote
    Prepare { id: TransactionId },
    /// A participant's vote
    Vote {
        id: TransactionId,
        participant: NodeId,
        vote: Vote,
    },
    /// Phase two: the final outcome
    Decision { id: TransactionId, decision: Decision },
    /// A participant has durably applied the decision
    Ack { id: TransactionId, participant: NodeId },
    /// An uncertain participant asking for the outcome
    Inquire { id: TransactionId },
    /// The coordinator's answer to INQUIRE
    InquireReply {
        id: TransactionId,
        answer: InquiryAnswer,
    },
}

/// A line that does not parse as a protocol message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("empty message")]
    Empty,

    #[error("unknown verb {0:?}")]
    UnknownVerb(String),

    #[error("{verb}: missing {field}")]
    MissingField {
        verb: &'static str,
        field: &'static str,
    },

    #[error("{verb}: invalid {field} {value:?}")]
    InvalidField {
        verb: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("{verb}: unexpected trailing token {token:?}")]
    TrailingToken { verb: &'static str, token: String },
}

impl Message {
    /// transaction this message is about
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            Self::Start { id }
            | Self::Prepare { id }
            | Self::Vote { id, .. }
            | Self::Decision { id, .. }
            | Self::Ack { id, .. }
            | Self::Inquire { id }
            | Self::InquireReply { id, .. } => id,
        }
    }

    /// wire verb, as it appears first on the line
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Start { .. } => "START",
            Self::Prepare { .. } => "PREPARE",
            Self::Vote { .. } => "VOTE",
            Self::Decision { .. } => "DECISION",
            Self::Ack { .. } => "ACK",
            Self::Inquire { .. } => "INQUIRE",
            Self::InquireReply { .. } => "INQUIRE_REPLY",
        }
    }

    /// render as a single newline-terminated line
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = self.verb();
        match self {
            Self::Start { id } | Self::Prepare { id } | Self::Inquire { id } => {
                write!(f, "{verb} {id}")
            }
            Self::Vote {
                id,
                participant,
                vote,
            } => write!(f, "{verb} {id} {participant} {vote}"),
            Self::Decision { id, decision } => write!(f, "{verb} {id} {decision}"),
            Self::Ack { id, participant } => write!(f, "{verb} {id} {participant}"),
            Self::InquireReply { id, answer } => write!(f, "{verb} {id} {answer}"),
        }
    }
}

/// Cursor over the tokens of one line, tracking which verb is being parsed
struct Fields<'a> {
    verb: &'static str,
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn next(&mut self, field: &'static str) -> Result<&'a str, MessageError> {
        self.tokens.next().ok_or(MessageError::MissingField {
            verb: self.verb,
            field,
        })
    }

    fn transaction_id(&mut self) -> Result<TransactionId, MessageError> {
        let raw = self.next("txid")?;
        TransactionId::new(raw).map_err(|_| self.invalid("txid", raw))
    }

    fn node_id(&mut self) -> Result<NodeId, MessageError> {
        let raw = self.next("participant-id")?;
        NodeId::new(raw).map_err(|_| self.invalid("participant-id", raw))
    }

    fn vote(&mut self) -> Result<Vote, MessageError> {
        let raw = self.next("vote")?;
        match raw.to_ascii_uppercase().as_str() {
            "YES" => Ok(Vote::Yes),
            "NO" => Ok(Vote::No),
            _ => Err(self.invalid("vote", raw)),
        }
    }

    fn decision(&mut self) -> Result<Decision, MessageError> {
        let raw = self.next("decision")?;
        match raw.to_ascii_uppercase().as_str() {
            "COMMIT" => Ok(Decision::Commit),
            "ABORT" => Ok(Decision::Abort),
            _ => Err(self.invalid("decision", raw)),
        }
    }

    fn answer(&mut self) -> Result<InquiryAnswer, MessageError> {
        let raw = self.next("answer")?;
        match raw.to_ascii_uppercase().as_str() {
            "COMMIT" => Ok(InquiryAnswer::Commit),
            "ABORT" => Ok(InquiryAnswer::Abort),
            "UNKNOWN" => Ok(InquiryAnswer::Unknown),
            _ => Err(self.invalid("answer", raw)),
        }
    }

    fn invalid(&self, field: &'static str, value: &str) -> MessageError {
        MessageError::InvalidField {
            verb: self.verb,
            field,
            value: value.to_string(),
        }
    }

    fn finish(mut self, message: Message) -> Result<Message, MessageError> {
        match self.tokens.next() {
            Some(token) => Err(MessageError::TrailingToken {
                verb: self.verb,
                token: token.to_string(),
            }),
            None => Ok(message),
        }
    }
}

impl FromStr for Message {
    type Err = MessageError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let raw_verb = tokens.next().ok_or(MessageError::Empty)?;

        let verb = match raw_verb.to_ascii_uppercase().as_str() {
            "START" => "START",
            "PREPARE" => "PREPARE",
            "VOTE" => "VOTE",
            "DECISION" => "DECISION",
            "ACK" => "ACK",
            "INQUIRE" => "INQUIRE",
            "INQUIRE_REPLY" => "INQUIRE_REPLY",
            _ => return Err(MessageError::UnknownVerb(raw_verb.to_string())),
        };
        let mut fields = Fields { verb, tokens };

        let message = match verb {
            "START" => Message::Start {
                id: fields.transaction_id()?,
            },
            "PREPARE" => Message::Prepare {
                id: fields.transaction_id()?,
            },
            "VOTE" => Message::Vote {
                id: fields.transaction_id()?,
                participant: fields.node_id()?,
                vote: fields.vote()?,
            },
            "DECISION" => Message::Decision {
                id: fields.transaction_id()?,
                decision: fields.decision()?,
            },
            "ACK" => Message::Ack {
                id: fields.transaction_id()?,
                participant: fields.node_id()?,
            },
            "INQUIRE" => Message::Inquire {
                id: fields.transaction_id()?,
            },
            _ => Message::InquireReply {
                id: fields.transaction_id()?,
                answer: fields.answer()?,
            },
        };
        fields.finish(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(raw: &str) -> TransactionId {
        TransactionId::new(raw).unwrap()
    }

    #[test]
    fn vote_encodes_all_fields_in_order() {
        let msg = Message::Vote {
            id: txid("T1"),
            participant: NodeId::new("P1").unwrap(),
            vote: Vote::Yes,
        };
        assert_eq!(msg.encode(), "VOTE T1 P1 YES\n");
    }

    #[test]
    fn parse_tolerates_case_and_padding() {
        let msg: Message = "  decision T7 commit \r\n".parse().unwrap();
        assert_eq!(
            msg,
            Message::Decision {
                id: txid("T7"),
                decision: Decision::Commit
            }
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!("".parse::<Message>(), Err(MessageError::Empty));
        assert!(matches!(
            "HELLO T1".parse::<Message>(),
            Err(MessageError::UnknownVerb(_))
        ));
        assert!(matches!(
            "VOTE T1 P1".parse::<Message>(),
            Err(MessageError::MissingField { field: "vote", .. })
        ));
        assert!(matches!(
            "VOTE T1 P1 MAYBE".parse::<Message>(),
            Err(MessageError::InvalidField { field: "vote", .. })
        ));
        assert!(matches!(
            "PREPARE T1 extra".parse::<Message>(),
            Err(MessageError::TrailingToken { .. })
        ));
    }
}
