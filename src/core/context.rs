//! Execution context: the "current transaction" that contract code reads implicitly.
//!
//! Holds the sender, origin, value, timestamp, chain id and active contract, plus the
//! prank stack and the strict/pickling flags. The contract-visible [`Message`] is
//! derived on every call to [`ExecutionContext::message`]; nothing caches it, so a
//! change to sender, value or timestamp is visible on the very next read.
//!
//! Nested cross-contract calls enter a [`Frame`] that swaps in the callee's view and
//! hand back a [`SavedFrame`] that restores the caller's view exactly.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::address::Address;
use crate::error::SimError;

/// Seed of the default sender used until a test sets one.
pub const DEFAULT_SENDER_SEED: &str = "default_deployer";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("No active prank to stop")]
    NoActivePrank,
}

impl From<ContextError> for SimError {
    fn from(err: ContextError) -> Self {
        SimError::Context(err.to_string())
    }
}

/// What contract code sees as `message` for the current call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub contract_address: Option<Address>,
    pub sender: Address,
    pub origin: Address,
    pub value: u128,
    pub chain_id: u64,
    pub datetime: DateTime<Utc>,
}

impl Message {
    pub fn datetime_iso(&self) -> String {
        self.datetime.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    sender: Address,
    origin: Option<Address>,
    value: u128,
    chain_id: u64,
    datetime: DateTime<Utc>,
    contract_address: Option<Address>,
    prank_stack: Vec<Address>,
    strict_mocks: bool,
    check_pickling: bool,
}

/// Caller view captured when entering a nested frame.
#[derive(Debug, Clone)]
pub struct SavedFrame {
    sender: Address,
    origin: Option<Address>,
    value: u128,
    contract_address: Option<Address>,
    prank_stack: Vec<Address>,
}

impl ExecutionContext {
    pub fn new(chain_id: u64) -> Self {
        Self {
            sender: Address::from_seed(DEFAULT_SENDER_SEED),
            origin: None,
            value: 0,
            chain_id,
            datetime: Utc::now(),
            contract_address: None,
            prank_stack: Vec::new(),
            strict_mocks: false,
            check_pickling: false,
        }
    }

    /// Effective sender: the innermost prank if any, else the configured sender.
    pub fn sender(&self) -> Address {
        self.prank_stack.last().copied().unwrap_or(self.sender)
    }

    pub fn set_sender(&mut self, sender: Address) {
        self.sender = sender;
    }

    /// Transaction origin; defaults to the effective sender.
    pub fn origin(&self) -> Address {
        self.origin.unwrap_or_else(|| self.sender())
    }

    pub fn set_origin(&mut self, origin: Option<Address>) {
        self.origin = origin;
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn set_value(&mut self, value: u128) {
        self.value = value;
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.datetime
    }

    /// Sets the block timestamp from an RFC 3339 string (`Z` suffix accepted).
    pub fn warp(&mut self, timestamp: &str) -> Result<(), SimError> {
        let parsed = DateTime::parse_from_rfc3339(timestamp)?;
        self.datetime = parsed.with_timezone(&Utc);
        Ok(())
    }

    pub fn warp_to(&mut self, datetime: DateTime<Utc>) {
        self.datetime = datetime;
    }

    pub fn contract_address(&self) -> Option<Address> {
        self.contract_address
    }

    pub fn start_prank(&mut self, address: Address) {
        self.prank_stack.push(address);
    }

    pub fn stop_prank(&mut self) -> Result<Address, ContextError> {
        self.prank_stack.pop().ok_or(ContextError::NoActivePrank)
    }

    pub fn prank_depth(&self) -> usize {
        self.prank_stack.len()
    }

    /// Drops pranks above `depth`; used to unwind a scoped prank on every exit path.
    pub(crate) fn truncate_pranks(&mut self, depth: usize) {
        self.prank_stack.truncate(depth);
    }

    pub fn strict_mocks(&self) -> bool {
        self.strict_mocks
    }

    pub fn set_strict_mocks(&mut self, strict: bool) {
        self.strict_mocks = strict;
    }

    pub fn check_pickling(&self) -> bool {
        self.check_pickling
    }

    pub fn set_check_pickling(&mut self, check: bool) {
        self.check_pickling = check;
    }

    /// Freshly derived message view.
    pub fn message(&self) -> Message {
        Message {
            contract_address: self.contract_address,
            sender: self.sender(),
            origin: self.origin(),
            value: self.value,
            chain_id: self.chain_id,
            datetime: self.datetime,
        }
    }

    /// Rebinds the context for a new top-level transaction.
    pub(crate) fn bind_transaction(&mut self, sender: Address, value: u128) {
        self.sender = sender;
        self.origin = None;
        self.value = value;
        self.contract_address = None;
        self.prank_stack.clear();
    }

    /// Switches to the callee's view. The origin is pinned to the outermost sender.
    pub(crate) fn enter_frame(&mut self, contract: Address, sender: Address, value: u128) -> SavedFrame {
        let saved = SavedFrame {
            sender: self.sender,
            origin: self.origin,
            value: self.value,
            contract_address: self.contract_address,
            prank_stack: std::mem::take(&mut self.prank_stack),
        };
        if self.origin.is_none() {
            self.origin = Some(saved.prank_stack.last().copied().unwrap_or(saved.sender));
        }
        self.sender = sender;
        self.value = value;
        self.contract_address = Some(contract);
        saved
    }

    pub(crate) fn exit_frame(&mut self, saved: SavedFrame) {
        self.sender = saved.sender;
        self.origin = saved.origin;
        self.value = saved.value;
        self.contract_address = saved.contract_address;
        self.prank_stack = saved.prank_stack;
    }
}
