//! Contract-facing view of the engine.
//!
//! A `Runtime` is handed to contract code for the duration of one frame. It is bound
//! to the executing contract's address, so storage reads and writes can only reach
//! that contract's root. Everything else (message, nondet, cross-contract calls,
//! bundled files) goes through the engine it borrows.

use serde_json::Value;

use crate::core::address::Address;
use crate::core::context::Message;
use crate::core::nondet::NondetBlock;
use crate::core::vm::Vm;
use crate::error::{Result, SimError};

pub struct Runtime<'a> {
    vm: &'a mut Vm,
    address: Address,
}

impl<'a> Runtime<'a> {
    pub(crate) fn new(vm: &'a mut Vm, address: Address) -> Self {
        Self { vm, address }
    }

    /// Address of the executing contract.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn message(&self) -> Message {
        self.vm.ctx.message()
    }

    pub fn sender(&self) -> Address {
        self.vm.ctx.sender()
    }

    // Storage

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.vm.world.storage().get(&self.address, key)?)
    }

    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        Ok(self.vm.world.storage_mut().set(&self.address, key, value)?)
    }

    pub fn get_path(&self, path: &[&str]) -> Result<Option<Value>> {
        Ok(self.vm.world.storage().get_path(&self.address, path)?)
    }

    pub fn set_path(&mut self, path: &[&str], value: Value) -> Result<()> {
        Ok(self.vm.world.storage_mut().set_path(&self.address, path, value)?)
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        Ok(self.vm.world.storage_mut().remove(&self.address, key)?)
    }

    // Balances

    pub fn balance(&self, address: &Address) -> u128 {
        self.vm.world.balance(address)
    }

    pub fn self_balance(&self) -> u128 {
        self.vm.world.balance(&self.address)
    }

    /// Moves native tokens out of this contract's own balance.
    pub fn transfer(&mut self, to: &Address, amount: u128) -> Result<()> {
        Ok(self.vm.world.transfer(&self.address, to, amount)?)
    }

    // Non-determinism

    /// Runs the leader side of `block` now and records it for validators.
    pub fn run_nondet(&mut self, block: NondetBlock) -> Result<Value> {
        self.vm.capture_nondet(block)
    }

    // Cross-contract

    /// Synchronous nested call with `sender = this contract`.
    pub fn call_contract(&mut self, to: Address, method: &str, args: &[Value]) -> Result<Value> {
        let from = self.address;
        self.vm.invoke(from, to, method, args, 0)
    }

    /// Deploys a child contract with `sender = this contract` and returns its address.
    pub fn deploy_contract(&mut self, code_path: &str, args: &[Value], salt: Option<&str>) -> Result<Address> {
        let from = self.address;
        self.vm.instantiate(from, code_path, args, salt, 0)
    }

    /// Queues a fire-and-forget call, delivered after the top-level call returns.
    pub fn post_message(&mut self, to: Address, method: &str, args: Vec<Value>) {
        let from = self.address;
        self.vm.enqueue_post(from, to, method, args);
    }

    // Diagnostics and files

    pub fn trace(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(contract = %self.address, %message, "contract trace");
        self.vm.traces.push(message);
    }

    /// Reads a file bundled with this contract's code.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let instance = self
            .vm
            .world
            .contract(&self.address)
            .ok_or_else(|| SimError::ContractNotFound(self.address.to_hex()))?;
        let code = self.vm.codes.resolve(&instance.code_path)?;
        let fs = code
            .fs
            .as_ref()
            .ok_or_else(|| SimError::FileAccess(format!("no files bundled with {}", code.path)))?;
        fs.read(path)
    }

    pub fn read_file_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes).map_err(|e| SimError::FileAccess(format!("{}: {}", path, e)))
    }
}
