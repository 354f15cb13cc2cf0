//! Transaction submission format, receipts and the in-memory transaction log.
//!
//! **Determinism:** the transaction hash is SHA256 over a canonical JSON encoding of
//! sender, per-engine sequence number, value and target. No randomness or system
//! time; the same request at the same sequence number yields the same hash.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::address::Address;
use crate::core::consensus::{RoundTrace, TxStatus, Verdict};
use crate::core::mocks::{MockRegistry, MockScope, Pattern, WebResponse};
use crate::core::nondet::LeaderOutcome;
use crate::core::router::TriggeredOp;
use crate::core::voting::NodeVote;
use crate::error::Result;

pub type TxHash = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxTarget {
    Call {
        address: Address,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Deploy {
        code_path: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        salt: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebMockSpec {
    /// Regex unless `exact` is set.
    pub pattern: String,
    #[serde(default)]
    pub exact: bool,
    #[serde(default = "default_method")]
    pub method: String,
    pub response: WebResponse,
    #[serde(default)]
    pub scope: MockScope,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMockSpec {
    /// Substring unless `regex` is set.
    pub pattern: String,
    #[serde(default)]
    pub regex: bool,
    pub response: Value,
    #[serde(default)]
    pub scope: MockScope,
}

/// Mocks that apply only for the duration of one submitted transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockConfig {
    #[serde(default)]
    pub web: Vec<WebMockSpec>,
    #[serde(default)]
    pub llm: Vec<LlmMockSpec>,
}

impl MockConfig {
    /// Registers every mock on top of `registry`, in order.
    pub fn apply(&self, registry: &mut MockRegistry) -> Result<()> {
        for spec in &self.web {
            let pattern = if spec.exact {
                Pattern::exact(spec.pattern.clone())
            } else {
                Pattern::regex(&spec.pattern)?
            };
            registry.register_web(pattern, &spec.method, spec.response.clone(), spec.scope);
        }
        for spec in &self.llm {
            let pattern = if spec.regex {
                Pattern::regex(&spec.pattern)?
            } else {
                Pattern::contains(spec.pattern.clone())
            };
            registry.register_llm(pattern, spec.response.clone(), spec.scope);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub sender: Address,
    #[serde(default)]
    pub value: u128,
    pub target: TxTarget,
    #[serde(default)]
    pub validator_count: Option<usize>,
    #[serde(default)]
    pub max_rotations: Option<u32>,
    #[serde(default)]
    pub mock_config: Option<MockConfig>,
}

impl TransactionRequest {
    pub fn call(sender: Address, address: Address, method: &str, args: Vec<Value>) -> Self {
        Self {
            sender,
            value: 0,
            target: TxTarget::Call {
                address,
                method: method.to_string(),
                args,
            },
            validator_count: None,
            max_rotations: None,
            mock_config: None,
        }
    }

    pub fn deploy(sender: Address, code_path: &str, args: Vec<Value>) -> Self {
        Self {
            sender,
            value: 0,
            target: TxTarget::Deploy {
                code_path: code_path.to_string(),
                args,
                salt: None,
            },
            validator_count: None,
            max_rotations: None,
            mock_config: None,
        }
    }

    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }

    pub fn with_validators(mut self, count: usize) -> Self {
        self.validator_count = Some(count);
        self
    }

    pub fn with_max_rotations(mut self, rotations: u32) -> Self {
        self.max_rotations = Some(rotations);
        self
    }

    pub fn with_mocks(mut self, mocks: MockConfig) -> Self {
        self.mock_config = Some(mocks);
        self
    }

    /// Computes the transaction hash for the given engine sequence number.
    pub fn compute_hash(&self, sequence: u64) -> Result<TxHash> {
        #[derive(Serialize)]
        struct TransactionHashData<'a> {
            sender: &'a Address,
            sequence: u64,
            value: String,
            target: &'a TxTarget,
        }
        let data = TransactionHashData {
            sender: &self.sender,
            sequence,
            value: self.value.to_string(),
            target: &self.target,
        };
        let encoded = serde_json::to_vec(&data)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusData {
    pub votes: Vec<NodeVote>,
    pub rotations: u32,
    pub agree_count: usize,
    pub validator_count: usize,
    pub rounds: Vec<RoundTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub hash: TxHash,
    pub block_number: u64,
    pub status: TxStatus,
    /// Return value of a call, or the new address (as hex) of a deployment.
    pub result: Option<Value>,
    pub error: Option<String>,
    pub consensus_data: ConsensusData,
    pub triggered: Vec<TriggeredOp>,
    pub warnings: Vec<String>,
}

impl TransactionReceipt {
    pub fn from_verdict(hash: TxHash, block_number: u64, verdict: Verdict, triggered: Vec<TriggeredOp>, warnings: Vec<String>) -> Self {
        let (result, error) = match &verdict.outcome {
            LeaderOutcome::Return(value) => (Some(value.clone()), None),
            LeaderOutcome::UserError(message) => (None, Some(message.clone())),
        };
        let votes = verdict
            .rounds
            .last()
            .map(|round| round.votes.clone())
            .unwrap_or_default();
        Self {
            hash,
            block_number,
            status: verdict.status,
            result,
            error,
            consensus_data: ConsensusData {
                votes,
                rotations: verdict.rotations,
                agree_count: verdict.agree_count,
                validator_count: verdict.validator_count,
                rounds: verdict.rounds,
            },
            triggered,
            warnings,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status == TxStatus::Finalized
    }
}

/// Receipts by hash, plus submission order.
#[derive(Debug, Clone, Default)]
pub struct TransactionLog {
    receipts: HashMap<TxHash, TransactionReceipt>,
    order: Vec<TxHash>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&self) -> u64 {
        self.order.len() as u64
    }

    pub fn block_number(&self) -> u64 {
        self.order.len() as u64
    }

    pub fn insert(&mut self, receipt: TransactionReceipt) {
        self.order.push(receipt.hash.clone());
        self.receipts.insert(receipt.hash.clone(), receipt);
    }

    pub fn get(&self, hash: &str) -> Option<&TransactionReceipt> {
        self.receipts.get(hash)
    }

    pub fn hashes(&self) -> &[TxHash] {
        &self.order
    }

    pub fn latest(&self) -> Option<&TransactionReceipt> {
        self.order.last().and_then(|hash| self.receipts.get(hash))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
