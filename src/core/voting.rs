//! Validator votes and tally.
//!
//! Each validator replays every captured nondet record against the leader's
//! outcome; it votes Agree only if every record agrees. A validator error or
//! panic is a Disagree vote carrying the reason, never a failure of the round.
//!
//! # Determinism
//! Same votes in the same order yield the same `Tally`. Majority is strict:
//! `agree * 2 > total`, so a tie does not finalize.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::validators::NodeId;
use crate::error::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Agree,
    Disagree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum DisagreementReason {
    /// The validator function returned `false`.
    Rejected,
    /// The validator function failed or panicked.
    ValidatorError(String),
}

/// Why a validator voted Disagree: the first record it did not accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disagreement {
    pub record_index: usize,
    pub label: String,
    pub reason: DisagreementReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVote {
    pub node: NodeId,
    pub vote: Vote,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disagreement: Option<Disagreement>,
}

impl NodeVote {
    pub fn agree(node: NodeId) -> Self {
        Self {
            node,
            vote: Vote::Agree,
            disagreement: None,
        }
    }

    pub fn disagree(node: NodeId, disagreement: Disagreement) -> Self {
        Self {
            node,
            vote: Vote::Disagree,
            disagreement: Some(disagreement),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub agree: usize,
    pub total: usize,
}

impl Tally {
    pub fn has_majority(&self) -> bool {
        self.agree * 2 > self.total
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VotingError {
    #[error("No votes provided")]
    NoVotes,
}

impl From<VotingError> for SimError {
    fn from(e: VotingError) -> Self {
        SimError::Context(format!("Voting: {}", e))
    }
}

pub fn tally(votes: &[NodeVote]) -> Result<Tally, VotingError> {
    if votes.is_empty() {
        return Err(VotingError::NoVotes);
    }
    let agree = votes.iter().filter(|v| v.vote == Vote::Agree).count();
    Ok(Tally {
        agree,
        total: votes.len(),
    })
}
