//! Non-Determinism Capture Registry.
//!
//! A contract wraps every web fetch or LLM prompt in a [`NondetBlock`]: a leader
//! function that performs the operation and a validator function that later
//! re-derives or checks the leader's claim. [`NondetRegistry::capture`] runs the
//! leader side immediately (leader role, active mocks), appends a [`NondetRecord`],
//! and hands the value back to the contract. Validator functions run only when the
//! consensus coordinator or `Vm::run_validator` asks for them.
//!
//! # Equivalence principles
//! - `strict_eq`: re-run the operation, agree on exact equality (errors on both sides agree).
//! - `comparative`: re-run the operation, agree when a comparator accepts both values.
//! - `non_comparative`: agree when a predicate accepts the leader's value; a leader error disagrees.
//!
//! All three produce the same record shape.
//!
//! # Invariants
//! - Records are append-only within one leader execution, indexed from 0.
//! - A failing serializability probe records a warning and never blocks execution.
//! - Validator panics are caught and reported as errors, never unwound into the engine.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::mocks::{MockLayer, WebRequest, WebResponse};
use crate::core::validators::NodeRole;
use crate::error::{Result, SimError};

/// Default size cap for the JSON serializability probe.
pub const DEFAULT_PROBE_MAX_BYTES: usize = 1024 * 1024;

/// What the leader's nondet operation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LeaderOutcome {
    Return(Value),
    UserError(String),
}

impl LeaderOutcome {
    pub fn from_result(result: &Result<Value>) -> Self {
        match result {
            Ok(value) => LeaderOutcome::Return(value.clone()),
            Err(err) => LeaderOutcome::UserError(err.to_string()),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            LeaderOutcome::Return(value) => Some(value),
            LeaderOutcome::UserError(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LeaderOutcome::UserError(_))
    }
}

/// Capabilities available inside a nondet block: mocked I/O and tracing, scoped to a node role.
pub struct NondetEnv<'a> {
    mocks: &'a mut MockLayer,
    role: NodeRole,
    traces: &'a mut Vec<String>,
}

impl<'a> NondetEnv<'a> {
    pub fn new(mocks: &'a mut MockLayer, role: NodeRole, traces: &'a mut Vec<String>) -> Self {
        Self { mocks, role, traces }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// GET `url` and return the body.
    pub fn get_webpage(&mut self, url: &str) -> Result<String> {
        Ok(self.web_request(&WebRequest::get(url))?.body)
    }

    pub fn web_request(&mut self, request: &WebRequest) -> Result<WebResponse> {
        self.mocks.fetch_web(request, self.role)
    }

    /// Prompt an LLM and return its answer as text.
    pub fn exec_prompt(&mut self, prompt: &str) -> Result<String> {
        match self.mocks.prompt_llm(prompt, self.role)? {
            Value::String(text) => Ok(text),
            other => Ok(other.to_string()),
        }
    }

    /// Prompt an LLM and return its answer as JSON. String answers are parsed.
    pub fn exec_prompt_json(&mut self, prompt: &str) -> Result<Value> {
        match self.mocks.prompt_llm(prompt, self.role)? {
            Value::String(text) => Ok(serde_json::from_str(&text)?),
            other => Ok(other),
        }
    }

    pub fn trace(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(role = ?self.role, %message, "nondet trace");
        self.traces.push(message);
    }
}

pub type LeaderFn = Arc<dyn Fn(&mut NondetEnv<'_>) -> Result<Value> + Send + Sync>;
pub type ValidatorFn = Arc<dyn Fn(&mut NondetEnv<'_>, &LeaderOutcome) -> Result<bool> + Send + Sync>;

/// One nondet operation as written by a contract.
#[derive(Clone)]
pub struct NondetBlock {
    label: String,
    leader: LeaderFn,
    validator: ValidatorFn,
    inputs: Value,
}

impl NondetBlock {
    pub fn new<L, V>(label: impl Into<String>, leader: L, validator: V) -> Self
    where
        L: Fn(&mut NondetEnv<'_>) -> Result<Value> + Send + Sync + 'static,
        V: Fn(&mut NondetEnv<'_>, &LeaderOutcome) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            leader: Arc::new(leader),
            validator: Arc::new(validator),
            inputs: Value::Null,
        }
    }

    /// Validators re-run `op` and require an identical result.
    pub fn strict_eq<F>(label: impl Into<String>, op: F) -> Self
    where
        F: Fn(&mut NondetEnv<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::comparative(label, op, |leader, mine| leader == mine)
    }

    /// Validators re-run `op` and agree when `cmp(leader_value, own_value)` holds.
    pub fn comparative<F, C>(label: impl Into<String>, op: F, cmp: C) -> Self
    where
        F: Fn(&mut NondetEnv<'_>) -> Result<Value> + Send + Sync + 'static,
        C: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        let op: LeaderFn = Arc::new(op);
        let replay = Arc::clone(&op);
        Self {
            label: label.into(),
            leader: op,
            validator: Arc::new(move |env: &mut NondetEnv<'_>, outcome: &LeaderOutcome| {
                let mine = replay(env);
                Ok(match (outcome, mine) {
                    (LeaderOutcome::Return(leader), Ok(own)) => cmp(leader, &own),
                    (LeaderOutcome::UserError(_), Err(_)) => true,
                    _ => false,
                })
            }),
            inputs: Value::Null,
        }
    }

    /// Validators judge the leader's value with `predicate` instead of recomputing it.
    pub fn non_comparative<F, P>(label: impl Into<String>, op: F, predicate: P) -> Self
    where
        F: Fn(&mut NondetEnv<'_>) -> Result<Value> + Send + Sync + 'static,
        P: Fn(&mut NondetEnv<'_>, &Value) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            leader: Arc::new(op),
            validator: Arc::new(move |env: &mut NondetEnv<'_>, outcome: &LeaderOutcome| match outcome {
                LeaderOutcome::Return(value) => predicate(env, value),
                LeaderOutcome::UserError(_) => Ok(false),
            }),
            inputs: Value::Null,
        }
    }

    /// Attaches the operation's inputs for the serializability probe and traces.
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for NondetBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NondetBlock")
            .field("label", &self.label)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// A captured nondet operation, replayable by validators.
#[derive(Clone)]
pub struct NondetRecord {
    pub index: usize,
    pub label: String,
    pub outcome: LeaderOutcome,
    pub inputs: Value,
    validator: ValidatorFn,
}

impl NondetRecord {
    /// Runs the validator function against `outcome`. Panics become errors.
    pub fn validate(&self, env: &mut NondetEnv<'_>, outcome: &LeaderOutcome) -> Result<bool> {
        let validator = Arc::clone(&self.validator);
        match catch_unwind(AssertUnwindSafe(|| validator(env, outcome))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(SimError::ContractLogic(format!("validator panicked: {}", reason)))
            }
        }
    }
}

impl fmt::Debug for NondetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NondetRecord")
            .field("index", &self.index)
            .field("label", &self.label)
            .field("outcome", &self.outcome)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// Equality ignores the validator closure.
impl PartialEq for NondetRecord {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.label == other.label
            && self.outcome == other.outcome
            && self.inputs == other.inputs
    }
}

/// Probes whether a captured operation could be shipped to another node.
pub trait SerializabilityCheck: Send + Sync {
    fn probe(&self, label: &str, inputs: &Value, outcome: &LeaderOutcome) -> std::result::Result<(), String>;
}

/// Serializes inputs and outcome to JSON, checks the round trip and a size cap.
#[derive(Debug, Clone)]
pub struct JsonRoundTrip {
    pub max_bytes: usize,
}

impl Default for JsonRoundTrip {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_PROBE_MAX_BYTES,
        }
    }
}

impl SerializabilityCheck for JsonRoundTrip {
    fn probe(&self, label: &str, inputs: &Value, outcome: &LeaderOutcome) -> std::result::Result<(), String> {
        let encoded = serde_json::to_string(&(inputs, outcome)).map_err(|e| e.to_string())?;
        if encoded.len() > self.max_bytes {
            return Err(format!(
                "'{}' captures {} bytes, above the {} byte limit",
                label,
                encoded.len(),
                self.max_bytes
            ));
        }
        let decoded: (Value, LeaderOutcome) = serde_json::from_str(&encoded).map_err(|e| e.to_string())?;
        if &decoded.0 != inputs || &decoded.1 != outcome {
            return Err(format!("'{}' does not survive a JSON round trip", label));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NondetRegistry {
    records: Vec<NondetRecord>,
    warnings: Vec<String>,
}

impl NondetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the leader side of `block`, records it, and returns its value to the contract.
    /// A leader error is recorded as `UserError` and surfaces as a contract logic error.
    pub fn capture(
        &mut self,
        block: NondetBlock,
        env: &mut NondetEnv<'_>,
        checker: Option<&dyn SerializabilityCheck>,
    ) -> Result<Value> {
        let result = (block.leader)(env);
        let outcome = LeaderOutcome::from_result(&result);
        let index = self.records.len();

        if let Some(check) = checker {
            if let Err(reason) = check.probe(&block.label, &block.inputs, &outcome) {
                warn!(index, label = %block.label, %reason, "nondet operation failed serializability probe");
                self.warnings.push(format!("serializability: {}", reason));
            }
        }

        debug!(index, label = %block.label, error = outcome.is_error(), "captured nondet operation");
        self.records.push(NondetRecord {
            index,
            label: block.label,
            outcome,
            inputs: block.inputs,
            validator: block.validator,
        });

        result.map_err(|err| match err {
            SimError::ContractLogic(_) | SimError::RecursionLimit { .. } => err,
            other => SimError::ContractLogic(other.to_string()),
        })
    }

    pub fn records(&self) -> &[NondetRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&NondetRecord> {
        self.records.get(index)
    }

    pub fn last(&self) -> Option<&NondetRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub(crate) fn push_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}
