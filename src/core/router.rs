//! Cross-Contract Call Router.
//!
//! Resolves contract-to-contract deploy, call and post instructions into nested
//! executions on the same engine:
//!
//! - `deploy`: derives the child address from `(deployer, nonce, salt)`, registers
//!   the instance and runs its constructor with `sender = deployer`.
//! - `call`: synchronous and nested. The callee sees `sender = calling contract`
//!   and writes only its own storage. Nondet records it captures join the
//!   top-level registry.
//! - `post`: enqueued, drained FIFO after the top-level call returns. Return values
//!   are discarded, errors are logged and never propagated.
//!
//! # Invariants
//! - Every nested frame is transactional: a failing callee leaves no writes behind.
//! - The caller's execution context is restored exactly after every frame.
//! - A failing frame also drops the posts and triggered ops it queued.
//! - Call depth never exceeds `max_call_depth`; the call that would exceed it fails
//!   with `RecursionLimit`, and the whole top-level call fails with it even when
//!   contract code discards the nested error.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::address::Address;
use crate::core::runtime::Runtime;
use crate::core::state::{ContractInstance, WorldSnapshot};
use crate::core::vm::Vm;
use crate::error::{Result, SimError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("call depth {depth} exceeds limit {limit}")]
    DepthExceeded { depth: usize, limit: usize },
}

impl From<RouterError> for SimError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::DepthExceeded { depth, limit } => SimError::RecursionLimit { depth, limit },
        }
    }
}

/// A fire-and-forget message waiting for the top-level call to finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub from: Address,
    pub to: Address,
    pub method: String,
    pub args: Vec<Value>,
}

/// Side operations a top-level call triggered from inside contract code, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TriggeredOp {
    Deploy {
        deployer: Address,
        address: Address,
        code_path: String,
    },
    Post {
        from: Address,
        to: Address,
        method: String,
    },
}

/// Queue lengths at frame entry, used to undo a failed frame's side operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FrameMark {
    queued: usize,
    triggered: usize,
}

/// Call-depth guard, post queue and triggered-op log for one engine.
#[derive(Debug, Clone)]
pub struct CallRouter {
    /// Frames currently open.
    depth: usize,
    /// Deepest allowed frame.
    max_depth: usize,
    /// Deliveries allowed per top-level drain.
    max_post_drain: usize,
    /// Posts waiting for the top-level call to return.
    queue: VecDeque<PendingMessage>,
    /// Side operations of the current top-level call.
    triggered: Vec<TriggeredOp>,
    /// First depth violation of the current top-level call.
    tripped: Option<RouterError>,
}

impl CallRouter {
    /// Creates an idle router.
    pub fn new(max_depth: usize, max_post_drain: usize) -> Self {
        Self {
            depth: 0,
            max_depth,
            max_post_drain,
            queue: VecDeque::new(),
            triggered: Vec::new(),
            tripped: None,
        }
    }

    /// Number of frames currently open.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Opens a frame, or fails and remembers the violation for the top-level call.
    pub fn enter(&mut self) -> std::result::Result<usize, RouterError> {
        let next = self.depth + 1;
        if next > self.max_depth {
            let err = RouterError::DepthExceeded {
                depth: next,
                limit: self.max_depth,
            };
            if self.tripped.is_none() {
                self.tripped = Some(err.clone());
            }
            return Err(err);
        }
        self.depth = next;
        Ok(next)
    }

    pub fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// The depth violation raised since the last top-level call began, if any.
    pub fn tripped(&self) -> Option<&RouterError> {
        self.tripped.as_ref()
    }

    fn take_tripped(&mut self) -> Option<RouterError> {
        self.tripped.take()
    }

    pub fn enqueue(&mut self, message: PendingMessage) {
        self.queue.push_back(message);
    }

    /// Number of posts waiting for delivery.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn mark(&self) -> FrameMark {
        FrameMark {
            queued: self.queue.len(),
            triggered: self.triggered.len(),
        }
    }

    /// Drops posts and triggered ops recorded after `mark`.
    fn rollback_to(&mut self, mark: FrameMark) {
        self.queue.truncate(mark.queued);
        self.triggered.truncate(mark.triggered);
    }

    fn pop(&mut self) -> Option<PendingMessage> {
        self.queue.pop_front()
    }

    fn clear_queue(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    pub fn triggered(&self) -> &[TriggeredOp] {
        &self.triggered
    }

    fn record(&mut self, op: TriggeredOp) {
        self.triggered.push(op);
    }

    fn begin_top_level(&mut self) {
        self.triggered.clear();
        self.tripped = None;
    }
}

impl Vm {
    /// Top-level call from the harness or the consensus coordinator.
    pub(crate) fn execute_call(&mut self, target: Address, method: &str, args: &[Value]) -> Result<Value> {
        self.router.begin_top_level();
        let checkpoint = self.world.snapshot();
        let sender = self.ctx.sender();
        let value = self.ctx.value();
        let result = self.invoke(sender, target, method, args, value);
        self.finish_top_level(result, &checkpoint)
    }

    /// Top-level deployment from the harness or the consensus coordinator.
    pub(crate) fn execute_deploy(&mut self, code_path: &str, args: &[Value], salt: Option<&str>) -> Result<Address> {
        self.router.begin_top_level();
        let checkpoint = self.world.snapshot();
        let deployer = self.ctx.sender();
        let value = self.ctx.value();
        let result = self.instantiate(deployer, code_path, args, salt, value);
        self.finish_top_level(result, &checkpoint)
    }

    /// Fails the call if any frame tripped the depth guard, then drains or drops posts.
    fn finish_top_level<T>(&mut self, result: Result<T>, checkpoint: &WorldSnapshot) -> Result<T> {
        let result = match self.router.take_tripped() {
            Some(err) => {
                if result.is_ok() {
                    warn!(error = %err, "recursion limit discarded by contract code; failing the call");
                }
                self.world.restore(checkpoint);
                Err(err.into())
            }
            None => result,
        };
        if result.is_ok() {
            self.drain_posts();
            // A post that trips the depth guard fails on its own.
            self.router.take_tripped();
        } else {
            let dropped = self.router.pending();
            self.router.rollback_to(FrameMark::default());
            if dropped > 0 {
                debug!(dropped, "discarding posts queued by failed call");
            }
        }
        result
    }

    /// Runs `method` on `target` in a nested frame with `sender = caller`.
    pub(crate) fn invoke(
        &mut self,
        caller: Address,
        target: Address,
        method: &str,
        args: &[Value],
        value: u128,
    ) -> Result<Value> {
        let instance = self
            .world
            .contract(&target)
            .cloned()
            .ok_or_else(|| SimError::ContractNotFound(target.to_hex()))?;
        let code = self.codes.resolve(&instance.code_path)?.clone();

        let depth = self.router.enter()?;
        debug!(depth, %caller, %target, method, "invoke");
        let checkpoint = self.world.snapshot();
        let mark = self.router.mark();
        let saved = self.ctx.enter_frame(target, caller, value);

        let result = {
            let mut rt = Runtime::new(self, target);
            code.contract.call(&mut rt, method, args)
        };

        self.ctx.exit_frame(saved);
        if result.is_err() {
            self.world.restore(&checkpoint);
            self.router.rollback_to(mark);
        }
        self.router.exit();
        result
    }

    /// Deploys `code_path` on behalf of `deployer` and runs its constructor.
    pub(crate) fn instantiate(
        &mut self,
        deployer: Address,
        code_path: &str,
        args: &[Value],
        salt: Option<&str>,
        value: u128,
    ) -> Result<Address> {
        let code = self.codes.resolve(code_path)?.clone();

        let nested = self.router.depth() > 0;
        self.router.enter()?;
        let checkpoint = self.world.snapshot();
        let mark = self.router.mark();
        let address = self
            .world
            .next_contract_address(&deployer, salt.map(str::as_bytes));

        let result = match self.world.register_contract(ContractInstance {
            address,
            code_path: code.path.clone(),
            creator: deployer,
        }) {
            Ok(()) => {
                let saved = self.ctx.enter_frame(address, deployer, value);
                let constructed = {
                    let mut rt = Runtime::new(self, address);
                    code.contract.construct(&mut rt, args)
                };
                self.ctx.exit_frame(saved);
                constructed
            }
            Err(err) => Err(err.into()),
        };

        self.router.exit();
        match result {
            Ok(()) => {
                debug!(%deployer, %address, code_path = %code.path, nested, "deployed");
                if nested {
                    self.router.record(TriggeredOp::Deploy {
                        deployer,
                        address,
                        code_path: code.path,
                    });
                }
                Ok(address)
            }
            Err(err) => {
                self.world.restore(&checkpoint);
                self.router.rollback_to(mark);
                Err(err)
            }
        }
    }

    pub(crate) fn enqueue_post(&mut self, from: Address, to: Address, method: &str, args: Vec<Value>) {
        self.router.record(TriggeredOp::Post {
            from,
            to,
            method: method.to_string(),
        });
        self.router.enqueue(PendingMessage {
            from,
            to,
            method: method.to_string(),
            args,
        });
    }

    /// Delivers queued posts in FIFO order, including posts queued by posts,
    /// up to `max_post_drain` deliveries.
    fn drain_posts(&mut self) {
        let mut delivered = 0;
        while let Some(message) = self.router.pop() {
            if delivered >= self.router.max_post_drain {
                let dropped = 1 + self.router.clear_queue();
                warn!(dropped, limit = self.router.max_post_drain, "post drain limit reached");
                self.traces.push(format!("dropped {} queued posts", dropped));
                break;
            }
            delivered += 1;

            if self.world.contract(&message.to).is_none() {
                warn!(to = %message.to, method = %message.method, "post target does not exist");
                self.traces
                    .push(format!("post to missing contract {} ignored", message.to));
                continue;
            }

            match self.invoke(message.from, message.to, &message.method, &message.args, 0) {
                Ok(_) => debug!(to = %message.to, method = %message.method, "post delivered"),
                Err(err) => {
                    warn!(to = %message.to, method = %message.method, error = %err, "post failed");
                    self.traces
                        .push(format!("post {}.{} failed: {}", message.to, message.method, err));
                }
            }
        }
    }
}
