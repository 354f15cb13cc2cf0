//! Storage Manager: per-contract isolated object graphs with O(1) snapshots.
//!
//! Each contract owns one root mapping (`serde_json::Map`) whose values may be
//! arbitrarily nested mappings, sequences and primitives. Roots are keyed by
//! contract address and are reachable only through that address.
//!
//! # Snapshots
//! Both the address map and every contract root sit behind an `Arc`. Taking a
//! snapshot clones the outer `Arc`; the first write after a snapshot copies only
//! the outer map and the one root being written (`Arc::make_mut`). Restore swaps
//! the outer `Arc` back, which is a whole-state rollback.
//!
//! # Invariants
//! - Writes are visible to the next read immediately; there is no write buffer.
//! - Restoring a snapshot never modifies the snapshot.
//! - Errors are raised only for structurally invalid access, never for contract logic.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::address::Address;
use crate::error::SimError;

/// Root object of one contract's storage.
pub type ContractStorage = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("empty storage key")]
    EmptyKey,

    #[error("empty storage path")]
    EmptyPath,

    #[error("cannot traverse into primitive at '{0}'")]
    NotAContainer(String),

    #[error("'{0}' is not a valid sequence index")]
    InvalidIndex(String),

    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

impl From<StorageError> for SimError {
    fn from(err: StorageError) -> Self {
        SimError::StorageKey(err.to_string())
    }
}

type Roots = HashMap<Address, Arc<ContractStorage>>;

/// Immutable point-in-time copy of every contract root.
#[derive(Debug, Clone)]
pub struct StorageSnapshot {
    roots: Arc<Roots>,
}

impl StorageSnapshot {
    pub fn contract_count(&self) -> usize {
        self.roots.len()
    }

    pub fn get(&self, contract: &Address, key: &str) -> Option<&Value> {
        self.roots.get(contract).and_then(|root| root.get(key))
    }
}

impl PartialEq for StorageSnapshot {
    fn eq(&self, other: &Self) -> bool {
        *self.roots == *other.roots
    }
}

impl Eq for StorageSnapshot {}

#[derive(Debug, Clone, Default)]
pub struct StorageManager {
    roots: Arc<Roots>,
}

fn check_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        Err(StorageError::EmptyKey)
    } else {
        Ok(())
    }
}

fn parse_index(segment: &str) -> Result<usize, StorageError> {
    segment
        .parse::<usize>()
        .map_err(|_| StorageError::InvalidIndex(segment.to_string()))
}

/// Descends one level for reads. Missing keys and out-of-range indices read as absent.
fn child<'v>(node: &'v Value, segment: &str) -> Result<Option<&'v Value>, StorageError> {
    match node {
        Value::Object(map) => Ok(map.get(segment)),
        Value::Array(items) => Ok(items.get(parse_index(segment)?)),
        _ => Err(StorageError::NotAContainer(segment.to_string())),
    }
}

/// Descends one level for writes, creating an empty mapping where the slot is absent or null.
fn child_mut<'v>(node: &'v mut Value, segment: &str) -> Result<&'v mut Value, StorageError> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let index = parse_index(segment)?;
            let len = items.len();
            if index == len {
                items.push(Value::Null);
            } else if index > len {
                return Err(StorageError::IndexOutOfRange { index, len });
            }
            Ok(&mut items[index])
        }
        _ => Err(StorageError::NotAContainer(segment.to_string())),
    }
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty root for `contract` if it has none yet.
    pub fn init_contract(&mut self, contract: Address) {
        Arc::make_mut(&mut self.roots)
            .entry(contract)
            .or_insert_with(|| Arc::new(Map::new()));
    }

    pub fn has_contract(&self, contract: &Address) -> bool {
        self.roots.contains_key(contract)
    }

    /// Addresses with a storage root, sorted.
    pub fn contracts(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self.roots.keys().copied().collect();
        out.sort();
        out
    }

    pub fn root(&self, contract: &Address) -> Option<&ContractStorage> {
        self.roots.get(contract).map(|root| root.as_ref())
    }

    /// Top-level keys of a contract's root, sorted.
    pub fn keys(&self, contract: &Address) -> Vec<String> {
        let mut keys: Vec<String> = self
            .roots
            .get(contract)
            .map(|root| root.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn get(&self, contract: &Address, key: &str) -> Result<Option<Value>, StorageError> {
        check_key(key)?;
        Ok(self.roots.get(contract).and_then(|root| root.get(key)).cloned())
    }

    pub fn set(&mut self, contract: &Address, key: &str, value: Value) -> Result<(), StorageError> {
        check_key(key)?;
        self.root_mut(contract).insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, contract: &Address, key: &str) -> Result<Option<Value>, StorageError> {
        check_key(key)?;
        if !self.roots.contains_key(contract) {
            return Ok(None);
        }
        Ok(self.root_mut(contract).remove(key))
    }

    /// Reads a nested value: `path[0]` is a root key, later segments index mappings or sequences.
    pub fn get_path(&self, contract: &Address, path: &[&str]) -> Result<Option<Value>, StorageError> {
        let (first, rest) = path.split_first().ok_or(StorageError::EmptyPath)?;
        check_key(first)?;
        let mut node = match self.roots.get(contract).and_then(|root| root.get(*first)) {
            Some(node) => node,
            None => return Ok(None),
        };
        for segment in rest {
            node = match child(node, segment)? {
                Some(next) => next,
                None => return Ok(None),
            };
        }
        Ok(Some(node.clone()))
    }

    /// Writes a nested value, creating intermediate mappings. A sequence index equal to
    /// the length appends; anything beyond that is out of range.
    pub fn set_path(&mut self, contract: &Address, path: &[&str], value: Value) -> Result<(), StorageError> {
        let (first, rest) = path.split_first().ok_or(StorageError::EmptyPath)?;
        check_key(first)?;
        if rest.is_empty() {
            self.root_mut(contract).insert(first.to_string(), value);
            return Ok(());
        }

        // Validate the whole path before touching shared data so a failed write leaves no trace.
        if let Some(existing) = self.roots.get(contract).and_then(|root| root.get(*first)) {
            let mut probe = existing.clone();
            let mut slot = &mut probe;
            for segment in rest {
                slot = child_mut(slot, segment)?;
            }
        }

        let root = self.root_mut(contract);
        let mut slot = root.entry(first.to_string()).or_insert(Value::Null);
        for segment in rest {
            slot = child_mut(slot, segment)?;
        }
        *slot = value;
        Ok(())
    }

    pub fn snapshot(&self) -> StorageSnapshot {
        StorageSnapshot {
            roots: Arc::clone(&self.roots),
        }
    }

    pub fn restore(&mut self, snapshot: &StorageSnapshot) {
        self.roots = Arc::clone(&snapshot.roots);
    }

    /// Deterministic digest over every root, iterated in address order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for address in self.contracts() {
            hasher.update(address.as_bytes());
            if let Some(root) = self.roots.get(&address) {
                let mut keys: Vec<&String> = root.keys().collect();
                keys.sort();
                for key in keys {
                    hasher.update(key.as_bytes());
                    hasher.update(root[key].to_string().as_bytes());
                }
            }
        }
        hex::encode(hasher.finalize())
    }

    pub(crate) fn roots_for_export(&self) -> Vec<(Address, ContractStorage)> {
        self.contracts()
            .into_iter()
            .filter_map(|addr| self.roots.get(&addr).map(|root| (addr, root.as_ref().clone())))
            .collect()
    }

    pub(crate) fn from_export(roots: Vec<(Address, ContractStorage)>) -> Self {
        let map: Roots = roots
            .into_iter()
            .map(|(addr, root)| (addr, Arc::new(root)))
            .collect();
        Self { roots: Arc::new(map) }
    }

    fn root_mut(&mut self, contract: &Address) -> &mut ContractStorage {
        let roots = Arc::make_mut(&mut self.roots);
        let root = roots
            .entry(*contract)
            .or_insert_with(|| Arc::new(Map::new()));
        Arc::make_mut(root)
    }
}
