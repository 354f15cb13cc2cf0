pub mod config;
pub mod core;
pub mod demo;
pub mod error;
#[cfg(feature = "live-io")]
pub mod live;

pub use config::SimConfig;
pub use error::{Result, SimError};

// Core API exports
pub use core::address::Address;
pub use core::consensus::{run_consensus, ConsensusParams, Phase, RoundTrace, TxStatus, Verdict};
pub use core::context::{ContextError, ExecutionContext, Message};
pub use core::contract::{canonicalize, CodeRegistry, Contract, ContractCode, ContractSchema, MethodSchema};
pub use core::mocks::{
    LiveLlm,
    LiveWeb,
    MockKind,
    MockLayer,
    MockRegistry,
    MockScope,
    Pattern,
    WebRequest,
    WebResponse,
};
pub use core::nondet::{
    JsonRoundTrip,
    LeaderOutcome,
    NondetBlock,
    NondetEnv,
    NondetRecord,
    NondetRegistry,
    SerializabilityCheck,
};
pub use core::router::{CallRouter, PendingMessage, RouterError, TriggeredOp};
pub use core::runtime::Runtime;
pub use core::state::{Account, ContractInstance, StateError, WorldSnapshot, WorldState};
pub use core::storage::{ContractStorage, StorageError, StorageManager, StorageSnapshot};
pub use core::transaction::{
    ConsensusData,
    LlmMockSpec,
    MockConfig,
    TransactionLog,
    TransactionReceipt,
    TransactionRequest,
    TxHash,
    TxTarget,
    WebMockSpec,
};
pub use core::validators::{NodeId, NodeRole, RotationPolicy, ValidatorNode, ValidatorSet};
pub use core::vfs::{DirFs, MemoryFs, VirtualFs};
pub use core::vm::{Vm, VmSnapshot};
pub use core::voting::{tally, Disagreement, DisagreementReason, NodeVote, Tally, Vote, VotingError};
