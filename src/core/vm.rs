//! The engine: world state, execution context, mocks, nondet records and code,
//! plus the harness API tests drive it with.
//!
//! Direct harness calls (`deploy`, `call`, `view`) run as node 0's leader with no
//! validation. `submit` runs a transaction through the consensus coordinator and
//! records a receipt.
//!
//! # Snapshots
//! `snapshot()` captures world state, the execution context (sender, origin, value,
//! timestamp, prank stack, flags), the mock list and the captured records.
//! `revert(id)` restores all of it and discards snapshots taken after `id`; `id`
//! itself stays valid. World state sits behind `Arc`s, so snapshots are cheap.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::core::address::Address;
use crate::core::consensus::{run_consensus, ConsensusParams, TxStatus};
use crate::core::context::ExecutionContext;
use crate::core::contract::{CodeRegistry, Contract, ContractSchema};
use crate::core::mocks::{LiveLlm, LiveWeb, MockLayer, MockRegistry, MockScope, Pattern, WebResponse};
use crate::core::nondet::{JsonRoundTrip, LeaderOutcome, NondetBlock, NondetEnv, NondetRecord, NondetRegistry, SerializabilityCheck};
use crate::core::router::{CallRouter, TriggeredOp};
use crate::core::state::{ContractInstance, WorldDump, WorldSnapshot, WorldState};
use crate::core::transaction::{TransactionLog, TransactionReceipt, TransactionRequest, TxHash, TxTarget};
use crate::core::validators::NodeRole;
use crate::core::vfs::VirtualFs;
use crate::error::{Result, SimError};

/// Everything `revert` restores.
#[derive(Debug, Clone, PartialEq)]
pub struct VmSnapshot {
    world: WorldSnapshot,
    ctx: ExecutionContext,
    mocks: MockRegistry,
    nondet: NondetRegistry,
}

/// Document produced by `export_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateExport {
    chain_id: u64,
    block_number: u64,
    world: WorldDump,
}

/// The simulation engine. One instance owns one chain.
pub struct Vm {
    pub(crate) config: SimConfig,
    pub(crate) world: WorldState,
    pub(crate) ctx: ExecutionContext,
    pub(crate) mocks: MockLayer,
    pub(crate) nondet: NondetRegistry,
    pub(crate) codes: CodeRegistry,
    pub(crate) router: CallRouter,
    pub(crate) role: NodeRole,
    pub(crate) traces: Vec<String>,
    snapshots: BTreeMap<u64, VmSnapshot>,
    next_snapshot: u64,
    serializability: Arc<dyn SerializabilityCheck>,
    txlog: TransactionLog,
    imported_blocks: u64,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("config", &self.config)
            .field("ctx", &self.ctx)
            .field("contracts", &self.world.contracts().len())
            .field("records", &self.nondet.len())
            .field("snapshots", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::build(SimConfig::default())
    }
}

impl Vm {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SimConfig) -> Self {
        let mut ctx = ExecutionContext::new(config.chain_id);
        ctx.set_strict_mocks(config.strict_mocks);
        ctx.set_check_pickling(config.check_pickling);
        Self {
            mocks: MockLayer::new(config.live_fallback, config.live_timeout()),
            router: CallRouter::new(config.max_call_depth, config.max_post_drain),
            config,
            world: WorldState::new(),
            ctx,
            nondet: NondetRegistry::new(),
            codes: CodeRegistry::new(),
            role: NodeRole::default(),
            traces: Vec::new(),
            snapshots: BTreeMap::new(),
            next_snapshot: 0,
            serializability: Arc::new(JsonRoundTrip::default()),
            txlog: TransactionLog::new(),
            imported_blocks: 0,
        }
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    // Execution context

    pub fn ctx(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut ExecutionContext {
        &mut self.ctx
    }

    /// Effective sender, with any active prank applied.
    pub fn sender(&self) -> Address {
        self.ctx.sender()
    }

    /// Sets the base sender used by direct calls.
    pub fn set_sender(&mut self, sender: Address) {
        self.ctx.set_sender(sender);
    }

    /// Native value attached to the next direct call or deploy.
    pub fn set_value(&mut self, value: u128) {
        self.ctx.set_value(value);
    }

    /// Moves the block time to an RFC 3339 `timestamp`.
    pub fn warp(&mut self, timestamp: &str) -> Result<()> {
        self.ctx.warp(timestamp)
    }

    /// Runs `f` with `address` as sender; the prior sender is restored on every exit path.
    pub fn prank<T>(&mut self, address: Address, f: impl FnOnce(&mut Vm) -> Result<T>) -> Result<T> {
        let depth = self.ctx.prank_depth();
        self.ctx.start_prank(address);
        let result = f(self);
        self.ctx.truncate_pranks(depth);
        result
    }

    /// Pushes `address` as sender until the matching `stop_prank`.
    pub fn start_prank(&mut self, address: Address) {
        self.ctx.start_prank(address);
    }

    /// Pops the innermost prank and returns its address.
    pub fn stop_prank(&mut self) -> Result<Address> {
        Ok(self.ctx.stop_prank()?)
    }

    /// Reports mocks left unused when they are cleared or a transaction ends.
    pub fn set_strict_mocks(&mut self, strict: bool) {
        self.ctx.set_strict_mocks(strict);
    }

    /// Probes every leader result for serializability when enabled.
    pub fn set_check_pickling(&mut self, check: bool) {
        self.ctx.set_check_pickling(check);
    }

    /// Replaces the JSON round-trip probe.
    pub fn set_serializability_check(&mut self, check: Arc<dyn SerializabilityCheck>) {
        self.serializability = check;
    }

    // Accounts

    /// Sets the native balance of `address`.
    pub fn deal(&mut self, address: Address, amount: u128) {
        self.world.set_balance(&address, amount);
    }

    pub fn balance(&self, address: &Address) -> u128 {
        self.world.balance(address)
    }

    // Code

    pub fn register_code(&mut self, path: &str, contract: Arc<dyn Contract>) -> String {
        self.codes.register(path, contract)
    }

    pub fn register_code_with_fs(&mut self, path: &str, contract: Arc<dyn Contract>, fs: Arc<dyn VirtualFs>) -> String {
        self.codes.register_with_fs(path, contract, fs)
    }

    pub fn evict_code(&mut self, path: &str) -> bool {
        self.codes.evict(path)
    }

    pub fn contract(&self, address: &Address) -> Option<&ContractInstance> {
        self.world.contract(address)
    }

    pub fn schema(&self, address: &Address) -> Result<ContractSchema> {
        let instance = self
            .world
            .contract(address)
            .ok_or_else(|| SimError::ContractNotFound(address.to_hex()))?;
        Ok(self.codes.resolve(&instance.code_path)?.contract.schema())
    }

    // Direct execution

    /// Deploys `code_path` as the current sender and runs its constructor.
    pub fn deploy(&mut self, code_path: &str, args: &[Value]) -> Result<Address> {
        self.nondet.clear();
        self.execute_deploy(code_path, args, None)
    }

    pub fn deploy_with_salt(&mut self, code_path: &str, args: &[Value], salt: &str) -> Result<Address> {
        self.nondet.clear();
        self.execute_deploy(code_path, args, Some(salt))
    }

    /// Calls `method` as the current sender. A failing call leaves no writes.
    pub fn call(&mut self, address: Address, method: &str, args: &[Value]) -> Result<Value> {
        self.nondet.clear();
        self.execute_call(address, method, args)
    }

    /// Calls `method` and discards every write it made. Captured nondet records are
    /// left as they were, so `run_validator` still sees the last transaction's.
    pub fn view(&mut self, address: Address, method: &str, args: &[Value]) -> Result<Value> {
        let checkpoint = self.world.snapshot();
        let records = self.nondet.clone();
        let result = self.execute_call(address, method, args);
        self.world.restore(&checkpoint);
        self.nondet = records;
        result
    }

    /// Runs the leader side of a nondet block in the current role and records it.
    pub fn capture_nondet(&mut self, block: NondetBlock) -> Result<Value> {
        let checker = if self.ctx.check_pickling() {
            Some(Arc::clone(&self.serializability))
        } else {
            None
        };
        let mut env = NondetEnv::new(&mut self.mocks, self.role, &mut self.traces);
        self.nondet.capture(block, &mut env, checker.as_deref())
    }

    pub fn storage_get(&self, address: &Address, key: &str) -> Result<Option<Value>> {
        Ok(self.world.storage().get(address, key)?)
    }

    pub fn storage_get_path(&self, address: &Address, path: &[&str]) -> Result<Option<Value>> {
        Ok(self.world.storage().get_path(address, path)?)
    }

    // Mocks

    pub fn register_web_mock(&mut self, pattern: Pattern, method: &str, response: WebResponse, scope: MockScope) {
        self.mocks.registry_mut().register_web(pattern, method, response, scope);
    }

    pub fn register_llm_mock(&mut self, pattern: Pattern, response: Value, scope: MockScope) {
        self.mocks.registry_mut().register_llm(pattern, response, scope);
    }

    /// GET mock matched by regex search over the URL.
    pub fn mock_web(&mut self, pattern: &str, response: WebResponse) -> Result<()> {
        self.register_web_mock(Pattern::regex(pattern)?, "GET", response, MockScope::All);
        Ok(())
    }

    /// GET mock matched by exact URL.
    pub fn mock_web_exact(&mut self, url: &str, response: WebResponse) {
        self.register_web_mock(Pattern::exact(url), "GET", response, MockScope::All);
    }

    /// LLM mock matched by regex search over the prompt.
    pub fn mock_llm(&mut self, pattern: &str, response: Value) -> Result<()> {
        self.register_llm_mock(Pattern::regex(pattern)?, response, MockScope::All);
        Ok(())
    }

    /// LLM mock matched by substring.
    pub fn mock_llm_contains(&mut self, needle: &str, response: Value) {
        self.register_llm_mock(Pattern::contains(needle), response, MockScope::All);
    }

    /// Removes every mock and returns the ones never matched.
    pub fn clear_mocks(&mut self) -> Vec<String> {
        let unused = self.mocks.registry_mut().clear();
        if self.ctx.strict_mocks() && !unused.is_empty() {
            warn!(count = unused.len(), mocks = ?unused, "clearing mocks that were never used");
            self.nondet
                .push_warning(format!("unused mocks: {}", unused.join(", ")));
        }
        unused
    }

    pub fn unused_mocks(&self) -> Vec<String> {
        self.mocks.registry().unused()
    }

    pub fn mock_count(&self) -> usize {
        self.mocks.registry().len()
    }

    /// Handler used for unmocked web requests when live fallback is on.
    pub fn set_live_web(&mut self, handler: Arc<dyn LiveWeb>) {
        self.mocks.set_live_web(Some(handler));
    }

    /// Handler used for unmocked prompts when live fallback is on.
    pub fn set_live_llm(&mut self, handler: Arc<dyn LiveLlm>) {
        self.mocks.set_live_llm(Some(handler));
    }

    /// Lets mock misses go to the live handlers instead of failing.
    pub fn set_live_fallback(&mut self, enabled: bool) {
        self.mocks.set_live_fallback(enabled);
    }

    // Validators

    /// Runs a captured validator function as validator 0.
    ///
    /// `index` picks the record (default: the latest). `leader_error` takes precedence
    /// over `leader_result`; with neither, the recorded leader outcome is used.
    /// Errors raised by the validator function are returned, not turned into votes.
    pub fn run_validator(
        &mut self,
        index: Option<usize>,
        leader_result: Option<Value>,
        leader_error: Option<String>,
    ) -> Result<bool> {
        let record = match index {
            Some(i) => self.nondet.get(i),
            None => self.nondet.last(),
        }
        .cloned()
        .ok_or(SimError::NoValidatorCaptured)?;

        let outcome = match (leader_error, leader_result) {
            (Some(message), _) => LeaderOutcome::UserError(message),
            (None, Some(value)) => LeaderOutcome::Return(value),
            (None, None) => record.outcome.clone(),
        };

        let role = NodeRole::Validator(0);
        let mut env = NondetEnv::new(&mut self.mocks, role, &mut self.traces);
        let agreed = record.validate(&mut env, &outcome)?;
        debug!(index = record.index, label = %record.label, agreed, "run_validator");
        Ok(agreed)
    }

    /// Records captured since the last clear.
    pub fn records(&self) -> &[NondetRecord] {
        self.nondet.records()
    }

    /// Drops every captured record.
    pub fn clear_validators(&mut self) {
        self.nondet.clear();
    }

    // Snapshots

    /// Captures everything `revert` restores and returns its id.
    pub fn snapshot(&mut self) -> u64 {
        let id = self.next_snapshot;
        self.next_snapshot += 1;
        self.snapshots.insert(id, self.state_image());
        debug!(id, "snapshot taken");
        id
    }

    /// Restores snapshot `id` and drops every snapshot taken after it.
    pub fn revert(&mut self, id: u64) -> Result<()> {
        let image = self
            .snapshots
            .get(&id)
            .cloned()
            .ok_or(SimError::SnapshotNotFound(id))?;
        let discarded = self.snapshots.split_off(&(id + 1));
        self.world.restore(&image.world);
        self.ctx = image.ctx;
        self.mocks.replace_registry(image.mocks);
        self.nondet = image.nondet;
        debug!(id, discarded = discarded.len(), "reverted");
        Ok(())
    }

    /// Current value of everything a snapshot covers.
    pub fn state_image(&self) -> VmSnapshot {
        VmSnapshot {
            world: self.world.snapshot(),
            ctx: self.ctx.clone(),
            mocks: self.mocks.registry().clone(),
            nondet: self.nondet.clone(),
        }
    }

    pub fn state_root(&self) -> String {
        self.world.state_root()
    }

    // Assertions

    /// Runs `f` and expects it to fail, optionally with `message` in the error text.
    pub fn expect_revert<T>(&mut self, message: Option<&str>, f: impl FnOnce(&mut Vm) -> Result<T>) -> Result<SimError> {
        match f(self) {
            Ok(_) => Err(SimError::ExpectedRevert(message.map(str::to_string))),
            Err(err) => match message {
                Some(expected) if !err.to_string().contains(expected) => Err(SimError::Context(format!(
                    "expected revert with '{}', got: {}",
                    expected, err
                ))),
                _ => Ok(err),
            },
        }
    }

    // Transactions

    /// Runs a transaction through consensus and records its receipt.
    pub fn submit(&mut self, request: TransactionRequest) -> Result<TransactionReceipt> {
        let sequence = self.txlog.next_sequence();
        let hash = request.compute_hash(sequence)?;
        let mut seed = [0u8; 32];
        hex::decode_to_slice(&hash, &mut seed).map_err(|e| SimError::Serialization(e.to_string()))?;

        let params = ConsensusParams {
            validators: request.validator_count.unwrap_or(self.config.validators),
            max_rotations: request.max_rotations.unwrap_or(self.config.max_rotations),
            policy: self.config.rotation_policy,
        };

        let saved_mocks = match &request.mock_config {
            Some(config) => {
                let saved = self.mocks.registry().clone();
                if let Err(err) = config.apply(self.mocks.registry_mut()) {
                    self.mocks.replace_registry(saved);
                    return Err(err);
                }
                Some(saved)
            }
            None => None,
        };

        info!(hash = %hash, sender = %request.sender, validators = params.validators, "submitting transaction");
        let target = request.target.clone();
        let verdict = run_consensus(self, &params, request.sender, request.value, &seed, |vm| match &target {
            TxTarget::Call { address, method, args } => vm.execute_call(*address, method, args),
            TxTarget::Deploy { code_path, args, salt } => vm
                .execute_deploy(code_path, args, salt.as_deref())
                .map(|address| Value::String(address.to_hex())),
        });

        let mut warnings = self.nondet.take_warnings();
        if self.ctx.strict_mocks() {
            let unused = self.mocks.registry().unused();
            if !unused.is_empty() {
                warn!(hash = %hash, mocks = ?unused, "transaction left mocks unused");
                warnings.push(format!("unused mocks: {}", unused.join(", ")));
            }
        }
        if let Some(saved) = saved_mocks {
            self.mocks.replace_registry(saved);
        }

        let verdict = verdict?;
        let triggered: Vec<TriggeredOp> = match verdict.status {
            TxStatus::Finalized => self.router.triggered().to_vec(),
            TxStatus::Undetermined => Vec::new(),
        };
        let block_number = self.block_number() + 1;
        let receipt = TransactionReceipt::from_verdict(hash, block_number, verdict, triggered, warnings);
        info!(hash = %receipt.hash, status = ?receipt.status, rotations = receipt.consensus_data.rotations, "transaction complete");
        self.txlog.insert(receipt.clone());
        Ok(receipt)
    }

    pub fn transaction(&self, hash: &str) -> Option<&TransactionReceipt> {
        self.txlog.get(hash)
    }

    pub fn latest_transaction(&self) -> Option<&TransactionReceipt> {
        self.txlog.latest()
    }

    /// Hashes of submitted transactions, oldest first.
    pub fn transaction_hashes(&self) -> &[TxHash] {
        self.txlog.hashes()
    }

    pub fn block_number(&self) -> u64 {
        self.imported_blocks + self.txlog.block_number()
    }

    // Diagnostics

    pub fn traces(&self) -> &[String] {
        &self.traces
    }

    pub fn clear_traces(&mut self) {
        self.traces.clear();
    }

    /// Deploys and posts triggered by the latest top-level call.
    pub fn triggered_ops(&self) -> &[TriggeredOp] {
        self.router.triggered()
    }

    pub fn warnings(&self) -> &[String] {
        self.nondet.warnings()
    }

    // Fixtures

    /// Serializes accounts, contract instances and storage to JSON.
    pub fn export_state(&self) -> Result<String> {
        let export = StateExport {
            chain_id: self.ctx.chain_id(),
            block_number: self.block_number(),
            world: self.world.dump(),
        };
        Ok(serde_json::to_string(&export)?)
    }

    /// Loads a document produced by `export_state`. Every contract's code must already
    /// be registered under the same canonical path.
    pub fn import_state(&mut self, raw: &str) -> Result<()> {
        let export: StateExport = serde_json::from_str(raw)?;
        if export.chain_id != self.ctx.chain_id() {
            warn!(exported = export.chain_id, current = self.ctx.chain_id(), "importing state from another chain id");
        }
        for instance in &export.world.contracts {
            if !self.codes.contains(&instance.code_path) {
                return Err(SimError::CodeNotFound(instance.code_path.clone()));
            }
        }
        self.world = WorldState::from_dump(export.world);
        self.imported_blocks = export.block_number.saturating_sub(self.txlog.block_number());
        self.nondet.clear();
        info!(contracts = self.world.contracts().len(), "state imported");
        Ok(())
    }
}
