//! Consensus Coordinator.
//!
//! Runs one transaction through the simulated protocol:
//!
//! ```text
//! LeaderExecuting -> Validating -> Finalized
//!                             \-> Rotating -> LeaderExecuting
//!                             \-> Undetermined
//! ```
//!
//! - LeaderExecuting: snapshot the world, clear nondet records, bind a fresh
//!   context `(sender, value)`, run the transaction body as the round's leader.
//!   A contract error becomes the leader's `UserError` outcome; only a recursion
//!   limit aborts the transaction.
//! - Validating: every node replays every captured record against the leader's
//!   outcome and agrees only if all records agree. With one validator the leader's
//!   own result finalizes. With no records every node agrees.
//! - Tally: `agree * 2 > n` finalizes. Otherwise the pre-round snapshot is
//!   restored and the transaction rotates while rotations remain.
//!
//! # Invariants
//! - Undetermined happens after exactly `max_rotations` rotations and retains no writes.
//! - Validator errors are Disagree votes, never failures of the round.
//! - Same mocks, same request and same seed yield the same verdict.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::address::Address;
use crate::core::nondet::{LeaderOutcome, NondetEnv, NondetRecord};
use crate::core::validators::{NodeRole, RotationPolicy, ValidatorSet};
use crate::core::vm::Vm;
use crate::core::voting::{tally, Disagreement, DisagreementReason, NodeVote, Vote};
use crate::error::Result;

/// Coordinator states. `RoundTrace::decision` holds one of the post-tally ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    LeaderExecuting,
    Validating,
    Rotating,
    Finalized,
    Undetermined,
}

/// Receipt status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Finalized,
    Undetermined,
}

/// Shape of one consensus run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Nodes voting each round, leader included.
    pub validators: usize,
    /// Leader rotations allowed after the first attempt.
    pub max_rotations: u32,
    /// How the next leader is picked on rotation.
    pub policy: RotationPolicy,
}

/// What happened in one leader attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrace {
    pub round: u32,
    pub leader: String,
    pub leader_outcome: LeaderOutcome,
    pub records: usize,
    /// False when the leader's result was accepted without validation (one validator).
    pub validated: bool,
    pub votes: Vec<NodeVote>,
    pub agree: usize,
    /// `Finalized`, `Rotating` or `Undetermined`.
    pub decision: Phase,
}

/// Final result of a consensus run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// `Finalized` if some round reached a majority.
    pub status: TxStatus,
    /// Leader outcome of the last round.
    pub outcome: LeaderOutcome,
    /// Agreeing votes in the last round.
    pub agree_count: usize,
    pub validator_count: usize,
    /// Rotations performed; equals `max_rotations` when undetermined.
    pub rotations: u32,
    /// One trace per leader attempt, in order.
    pub rounds: Vec<RoundTrace>,
}

impl Verdict {
    /// True when a majority accepted the leader's outcome.
    pub fn is_finalized(&self) -> bool {
        self.status == TxStatus::Finalized
    }
}

/// Runs `execute` as leader until a majority agrees or rotations run out.
///
/// The engine's harness context is restored when this returns, whatever the result.
/// Nondet records of the last round stay in the registry for `Vm::run_validator`.
pub fn run_consensus<F>(
    vm: &mut Vm,
    params: &ConsensusParams,
    sender: Address,
    value: u128,
    seed: &[u8; 32],
    mut execute: F,
) -> Result<Verdict>
where
    F: FnMut(&mut Vm) -> Result<Value>,
{
    let set = ValidatorSet::new(params.validators)?;
    let base_ctx = vm.ctx.clone();
    let base_role = vm.role;
    let mut rounds: Vec<RoundTrace> = Vec::new();

    for round in 0..=params.max_rotations {
        let leader = set.leader_index(params.policy, round, seed);
        // `leader_index` is always below `set.len()`.
        let leader_id = set.nodes()[leader].id.clone();
        debug!(round, leader = %leader_id, phase = ?Phase::LeaderExecuting, "round start");

        let checkpoint = vm.world.snapshot();
        vm.nondet.clear();
        vm.ctx = base_ctx.clone();
        vm.ctx.bind_transaction(sender, value);
        vm.role = NodeRole::Leader(leader);

        let outcome = match execute(vm) {
            Ok(value) => LeaderOutcome::Return(value),
            Err(err) if err.is_fatal_to_transaction() => {
                warn!(round, error = %err, "transaction aborted");
                vm.world.restore(&checkpoint);
                vm.ctx = base_ctx;
                vm.role = base_role;
                return Err(err);
            }
            Err(err) => {
                debug!(round, error = %err, "leader execution failed");
                LeaderOutcome::UserError(err.to_string())
            }
        };

        let records: Vec<NondetRecord> = vm.nondet.records().to_vec();
        let (votes, validated) = if set.len() == 1 {
            (vec![NodeVote::agree(leader_id.clone())], false)
        } else {
            debug!(round, records = records.len(), phase = ?Phase::Validating, "validating");
            let votes: Vec<NodeVote> = set
                .nodes()
                .iter()
                .enumerate()
                .map(|(i, node)| validate_node(vm, i, &node.id, &records))
                .collect();
            (votes, true)
        };
        let counted = tally(&votes)?;
        let finalized = counted.has_majority();
        let last = round == params.max_rotations;
        let decision = match (finalized, last) {
            (true, _) => Phase::Finalized,
            (false, false) => Phase::Rotating,
            (false, true) => Phase::Undetermined,
        };
        info!(round, leader = %leader_id, agree = counted.agree, total = counted.total, ?decision, "tally");

        rounds.push(RoundTrace {
            round,
            leader: leader_id,
            leader_outcome: outcome.clone(),
            records: records.len(),
            validated,
            votes,
            agree: counted.agree,
            decision,
        });

        if finalized {
            vm.ctx = base_ctx;
            vm.role = base_role;
            return Ok(Verdict {
                status: TxStatus::Finalized,
                outcome,
                agree_count: counted.agree,
                validator_count: set.len(),
                rotations: round,
                rounds,
            });
        }

        vm.world.restore(&checkpoint);
        if last {
            warn!(rotations = params.max_rotations, "no majority; transaction undetermined");
            vm.ctx = base_ctx;
            vm.role = base_role;
            return Ok(Verdict {
                status: TxStatus::Undetermined,
                outcome,
                agree_count: counted.agree,
                validator_count: set.len(),
                rotations: params.max_rotations,
                rounds,
            });
        }
        info!(round, "rotating leader");
    }

    unreachable!("the final round always returns")
}

/// One node replays every record; the first rejection or error decides its vote.
pub(crate) fn validate_node(vm: &mut Vm, index: usize, node: &str, records: &[NondetRecord]) -> NodeVote {
    let role = NodeRole::Validator(index);
    let previous = vm.role;
    vm.role = role;
    let mut vote = NodeVote::agree(node.to_string());
    for record in records {
        let mut env = NondetEnv::new(&mut vm.mocks, role, &mut vm.traces);
        let reason = match record.validate(&mut env, &record.outcome) {
            Ok(true) => continue,
            Ok(false) => DisagreementReason::Rejected,
            Err(err) => {
                debug!(node, record = record.index, error = %err, "validator error counted as disagree");
                DisagreementReason::ValidatorError(err.to_string())
            }
        };
        vote = NodeVote::disagree(
            node.to_string(),
            Disagreement {
                record_index: record.index,
                label: record.label.clone(),
                reason,
            },
        );
        break;
    }
    vm.role = previous;
    debug_assert!(vote.vote == Vote::Agree || vote.disagreement.is_some());
    vote
}
