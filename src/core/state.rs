//! World state: accounts, deployed contract instances and contract storage.
//!
//! # Snapshots
//! Every component sits behind an `Arc` and is updated with `Arc::make_mut`, so a
//! `WorldSnapshot` is O(1) to take and restoring it is an atomic whole-state swap.
//! The consensus coordinator takes one before each leader execution and restores it
//! on rotation; the harness-level `Vm::snapshot` embeds one as well.
//!
//! # Invariants
//! - For any state S, `state.restore(&state.snapshot())` yields S exactly.
//! - Restore never modifies the snapshot.
//! - Contract addresses are unique: each deployment consumes the deployer's nonce.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::address::Address;
use crate::core::storage::{ContractStorage, StorageManager, StorageSnapshot};
use crate::error::SimError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u128,
    pub nonce: u64,
}

/// A deployed contract: which code runs at `address` and who created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInstance {
    pub address: Address,
    /// Canonical source path in the code registry.
    pub code_path: String,
    pub creator: Address,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("Address collision: a contract already exists at {0}")]
    AddressCollision(Address),
}

impl From<StateError> for SimError {
    fn from(err: StateError) -> Self {
        SimError::ContractLogic(err.to_string())
    }
}

/// Immutable copy of the world state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSnapshot {
    accounts: Arc<HashMap<Address, Account>>,
    contracts: Arc<HashMap<Address, ContractInstance>>,
    storage: StorageSnapshot,
}

impl WorldSnapshot {
    pub fn storage(&self) -> &StorageSnapshot {
        &self.storage
    }

    pub fn balance(&self, address: &Address) -> u128 {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorldState {
    accounts: Arc<HashMap<Address, Account>>,
    contracts: Arc<HashMap<Address, ContractInstance>>,
    storage: StorageManager,
}

/// Serializable dump of the whole world, used for fixture caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDump {
    pub accounts: Vec<(Address, Account)>,
    pub contracts: Vec<ContractInstance>,
    pub storage: Vec<(Address, ContractStorage)>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, address: &Address) -> u128 {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// Sets a balance directly, creating the account if needed.
    pub fn set_balance(&mut self, address: &Address, balance: u128) {
        self.account_mut(address).balance = balance;
    }

    /// Adds to a balance, creating the account if needed.
    pub fn fund(&mut self, address: &Address, amount: u128) {
        let account = self.account_mut(address);
        account.balance = account.balance.saturating_add(amount);
    }

    /// Moves native tokens between accounts. Fails without side effects on insufficient balance.
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<(), StateError> {
        let available = self.balance(from);
        if available < amount {
            return Err(StateError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        if from == to || amount == 0 {
            return Ok(());
        }
        self.account_mut(from).balance = available - amount;
        self.fund(to, amount);
        Ok(())
    }

    /// Derives the next contract address for `deployer` and consumes its nonce.
    pub fn next_contract_address(&mut self, deployer: &Address, salt: Option<&[u8]>) -> Address {
        let account = self.account_mut(deployer);
        let nonce = account.nonce;
        account.nonce += 1;
        Address::derive_contract(deployer, nonce, salt)
    }

    /// Records a new contract and gives it an empty storage root.
    pub fn register_contract(&mut self, instance: ContractInstance) -> Result<(), StateError> {
        if self.contracts.contains_key(&instance.address) {
            return Err(StateError::AddressCollision(instance.address));
        }
        let address = instance.address;
        Arc::make_mut(&mut self.contracts).insert(address, instance);
        Arc::make_mut(&mut self.accounts).entry(address).or_default();
        self.storage.init_contract(address);
        Ok(())
    }

    pub fn contract(&self, address: &Address) -> Option<&ContractInstance> {
        self.contracts.get(address)
    }

    /// Deployed contracts sorted by address.
    pub fn contracts(&self) -> Vec<&ContractInstance> {
        let mut out: Vec<&ContractInstance> = self.contracts.values().collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageManager {
        &mut self.storage
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            accounts: Arc::clone(&self.accounts),
            contracts: Arc::clone(&self.contracts),
            storage: self.storage.snapshot(),
        }
    }

    pub fn restore(&mut self, snapshot: &WorldSnapshot) {
        self.accounts = Arc::clone(&snapshot.accounts);
        self.contracts = Arc::clone(&snapshot.contracts);
        self.storage.restore(&snapshot.storage);
    }

    /// Deterministic root over sorted accounts, contracts and storage.
    pub fn state_root(&self) -> String {
        let mut hasher = Sha256::new();
        let mut accounts: Vec<(&Address, &Account)> = self.accounts.iter().collect();
        accounts.sort_by(|a, b| a.0.cmp(b.0));
        for (addr, account) in accounts {
            hasher.update(addr.as_bytes());
            hasher.update(account.balance.to_le_bytes());
            hasher.update(account.nonce.to_le_bytes());
        }
        for instance in self.contracts() {
            hasher.update(instance.address.as_bytes());
            hasher.update(instance.code_path.as_bytes());
            hasher.update(instance.creator.as_bytes());
        }
        hasher.update(self.storage.digest().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn dump(&self) -> WorldDump {
        let mut accounts: Vec<(Address, Account)> = self
            .accounts
            .iter()
            .map(|(addr, account)| (*addr, account.clone()))
            .collect();
        accounts.sort_by(|a, b| a.0.cmp(&b.0));
        WorldDump {
            accounts,
            contracts: self.contracts().into_iter().cloned().collect(),
            storage: self.storage.roots_for_export(),
        }
    }

    pub fn from_dump(dump: WorldDump) -> Self {
        Self {
            accounts: Arc::new(dump.accounts.into_iter().collect()),
            contracts: Arc::new(
                dump.contracts
                    .into_iter()
                    .map(|instance| (instance.address, instance))
                    .collect(),
            ),
            storage: StorageManager::from_export(dump.storage),
        }
    }

    fn account_mut(&mut self, address: &Address) -> &mut Account {
        Arc::make_mut(&mut self.accounts).entry(*address).or_default()
    }
}
