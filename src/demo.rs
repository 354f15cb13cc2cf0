//! Sample contracts used by the CLI scenarios and the test suites.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::address::Address;
use crate::core::contract::{Contract, ContractSchema, MethodSchema};
use crate::core::nondet::NondetBlock;
use crate::core::runtime::Runtime;
use crate::core::vm::Vm;
use crate::error::{Result, SimError};

pub const COUNTER: &str = "contracts/counter.rs";
pub const PRICE_FEED: &str = "contracts/price_feed.rs";
pub const DISAGREE: &str = "contracts/disagree.rs";
pub const STORAGE: &str = "contracts/storage.rs";
pub const FACTORY: &str = "contracts/factory.rs";
pub const RECURSIVE: &str = "contracts/recursive.rs";
pub const ORACLE: &str = "contracts/oracle.rs";

/// Registers every sample contract under its path.
pub fn register_demo_contracts(vm: &mut Vm) {
    vm.register_code(COUNTER, Arc::new(Counter));
    vm.register_code(PRICE_FEED, Arc::new(PriceFeed));
    vm.register_code(DISAGREE, Arc::new(Disagree));
    vm.register_code(STORAGE, Arc::new(Storage));
    vm.register_code(FACTORY, Arc::new(Factory));
    vm.register_code(RECURSIVE, Arc::new(Recursive));
    vm.register_code(ORACLE, Arc::new(Oracle));
}

fn arg(args: &[Value], index: usize) -> Result<&Value> {
    args.get(index)
        .ok_or_else(|| SimError::rollback(format!("missing argument {}", index)))
}

fn arg_i64(args: &[Value], index: usize) -> Result<i64> {
    arg(args, index)?
        .as_i64()
        .ok_or_else(|| SimError::rollback(format!("argument {} must be an integer", index)))
}

fn arg_str(args: &[Value], index: usize) -> Result<&str> {
    arg(args, index)?
        .as_str()
        .ok_or_else(|| SimError::rollback(format!("argument {} must be a string", index)))
}

fn stored_i64(rt: &Runtime<'_>, key: &str) -> Result<i64> {
    Ok(rt.get(key)?.and_then(|v| v.as_i64()).unwrap_or(0))
}

fn stored_address(rt: &Runtime<'_>, key: &str) -> Result<Address> {
    let raw = rt
        .get(key)?
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| SimError::rollback(format!("'{}' is not set", key)))?;
    raw.parse()
}

/// Integer counter.
pub struct Counter;

impl Contract for Counter {
    fn schema(&self) -> ContractSchema {
        ContractSchema {
            name: "Counter".to_string(),
            ctor_params: vec!["initial".to_string()],
            methods: vec![
                MethodSchema::write("increment", &[]),
                MethodSchema::write("add", &["amount"]),
                MethodSchema::view("get", &[]),
            ],
        }
    }

    fn construct(&self, rt: &mut Runtime<'_>, args: &[Value]) -> Result<()> {
        let initial = if args.is_empty() { 0 } else { arg_i64(args, 0)? };
        rt.set("count", json!(initial))
    }

    fn call(&self, rt: &mut Runtime<'_>, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "increment" => {
                let next = stored_i64(rt, "count")? + 1;
                rt.set("count", json!(next))?;
                let caller = rt.sender();
                rt.set("last_caller", json!(caller.to_hex()))?;
                Ok(json!(next))
            }
            "add" => {
                let amount = arg_i64(args, 0)?;
                if amount < 0 {
                    return Err(SimError::rollback("amount must be non-negative"));
                }
                let next = stored_i64(rt, "count")? + amount;
                rt.set("count", json!(next))?;
                Ok(json!(next))
            }
            "get" => Ok(json!(stored_i64(rt, "count")?)),
            other => Err(SimError::MethodNotFound(other.to_string())),
        }
    }
}

/// Stores a price fetched from a web API; validators re-fetch and compare exactly.
pub struct PriceFeed;

impl Contract for PriceFeed {
    fn schema(&self) -> ContractSchema {
        ContractSchema {
            name: "PriceFeed".to_string(),
            ctor_params: vec!["url".to_string()],
            methods: vec![
                MethodSchema::write("update_price", &[]),
                MethodSchema::view("get_price", &[]),
            ],
        }
    }

    fn construct(&self, rt: &mut Runtime<'_>, args: &[Value]) -> Result<()> {
        rt.set("url", json!(arg_str(args, 0)?))?;
        rt.set("price", Value::Null)
    }

    fn call(&self, rt: &mut Runtime<'_>, method: &str, _args: &[Value]) -> Result<Value> {
        match method {
            "update_price" => {
                let url = rt
                    .get("url")?
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or_else(|| SimError::rollback("url not configured"))?;
                let inputs = json!({ "url": url });
                let block = NondetBlock::strict_eq("fetch_price", move |env| {
                    let body = env.get_webpage(&url)?;
                    let parsed: Value = serde_json::from_str(&body)?;
                    match parsed.get("price") {
                        Some(price) if !price.is_null() => Ok(price.clone()),
                        _ => Err(SimError::rollback("response has no price")),
                    }
                })
                .with_inputs(inputs);
                let price = rt.run_nondet(block)?;
                rt.set("price", price.clone())?;
                rt.trace(format!("price updated to {}", price));
                Ok(price)
            }
            "get_price" => rt.get_or("price", Value::Null),
            other => Err(SimError::MethodNotFound(other.to_string())),
        }
    }
}

/// Writes storage, then runs a nondet block no validator ever accepts.
pub struct Disagree;

impl Contract for Disagree {
    fn schema(&self) -> ContractSchema {
        ContractSchema {
            name: "Disagree".to_string(),
            ctor_params: vec![],
            methods: vec![
                MethodSchema::write("always_disagree", &[]),
                MethodSchema::view("get_value", &[]),
            ],
        }
    }

    fn construct(&self, rt: &mut Runtime<'_>, _args: &[Value]) -> Result<()> {
        rt.set("value", json!(0))
    }

    fn call(&self, rt: &mut Runtime<'_>, method: &str, _args: &[Value]) -> Result<Value> {
        match method {
            "always_disagree" => {
                let next = stored_i64(rt, "value")? + 1;
                rt.set("value", json!(next))?;
                let block = NondetBlock::new("coin_flip", |_env| Ok(json!("leader")), |_env, _outcome| Ok(false));
                rt.run_nondet(block)
            }
            "get_value" => Ok(json!(stored_i64(rt, "value")?)),
            other => Err(SimError::MethodNotFound(other.to_string())),
        }
    }
}

/// Single string slot.
pub struct Storage;

impl Contract for Storage {
    fn schema(&self) -> ContractSchema {
        ContractSchema {
            name: "Storage".to_string(),
            ctor_params: vec!["initial".to_string()],
            methods: vec![
                MethodSchema::view("get_storage", &[]),
                MethodSchema::write("update_storage", &["value"]),
                MethodSchema::write("stamp", &[]),
            ],
        }
    }

    fn construct(&self, rt: &mut Runtime<'_>, args: &[Value]) -> Result<()> {
        rt.set("storage", json!(arg_str(args, 0)?))
    }

    fn call(&self, rt: &mut Runtime<'_>, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "get_storage" => rt.get_or("storage", json!("")),
            "update_storage" => {
                let value = arg_str(args, 0)?;
                rt.set("storage", json!(value))?;
                Ok(Value::Null)
            }
            "stamp" => {
                let message = rt.message();
                let stamp = json!({
                    "sender": message.sender.to_hex(),
                    "origin": message.origin.to_hex(),
                    "value": message.value.to_string(),
                    "chain_id": message.chain_id,
                    "datetime": message.datetime_iso(),
                });
                rt.set("stamp", stamp.clone())?;
                Ok(stamp)
            }
            other => Err(SimError::MethodNotFound(other.to_string())),
        }
    }
}

/// Deploys a Counter child in its constructor and reads it back through a nested call.
pub struct Factory;

impl Contract for Factory {
    fn schema(&self) -> ContractSchema {
        ContractSchema {
            name: "Factory".to_string(),
            ctor_params: vec!["child_initial".to_string()],
            methods: vec![
                MethodSchema::write("set_own", &["value"]),
                MethodSchema::view("get_own", &[]),
                MethodSchema::view("child", &[]),
                MethodSchema::view("child_seen_at_deploy", &[]),
                MethodSchema::write("bump_child", &[]),
                MethodSchema::write("notify_child", &[]),
                MethodSchema::write("notify_missing", &[]),
            ],
        }
    }

    fn construct(&self, rt: &mut Runtime<'_>, args: &[Value]) -> Result<()> {
        let initial = if args.is_empty() { 0 } else { arg_i64(args, 0)? };
        let child = rt.deploy_contract(COUNTER, &[json!(initial)], None)?;
        let seen = rt.call_contract(child, "get", &[])?;
        rt.set("child", json!(child.to_hex()))?;
        rt.set("child_seen_at_deploy", seen)?;
        rt.set("own", json!(0))
    }

    fn call(&self, rt: &mut Runtime<'_>, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "set_own" => {
                let value = arg_i64(args, 0)?;
                rt.set("own", json!(value))?;
                Ok(Value::Null)
            }
            "get_own" => Ok(json!(stored_i64(rt, "own")?)),
            "child" => rt.get_or("child", Value::Null),
            "child_seen_at_deploy" => rt.get_or("child_seen_at_deploy", Value::Null),
            "bump_child" => {
                let child = stored_address(rt, "child")?;
                rt.call_contract(child, "increment", &[])
            }
            "notify_child" => {
                let child = stored_address(rt, "child")?;
                rt.post_message(child, "increment", vec![]);
                Ok(Value::Null)
            }
            "notify_missing" => {
                rt.post_message(Address::from_seed("nowhere"), "increment", vec![]);
                let child = stored_address(rt, "child")?;
                rt.post_message(child, "add", vec![json!(-1)]);
                rt.post_message(child, "increment", vec![]);
                Ok(Value::Null)
            }
            other => Err(SimError::MethodNotFound(other.to_string())),
        }
    }
}

/// Calls itself `depth` times, writing its depth at every level.
pub struct Recursive;

impl Contract for Recursive {
    fn schema(&self) -> ContractSchema {
        ContractSchema {
            name: "Recursive".to_string(),
            ctor_params: vec![],
            methods: vec![MethodSchema::write("recurse", &["depth"])],
        }
    }

    fn construct(&self, _rt: &mut Runtime<'_>, _args: &[Value]) -> Result<()> {
        Ok(())
    }

    fn call(&self, rt: &mut Runtime<'_>, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "recurse" => {
                let depth = arg_i64(args, 0)?;
                let level = depth.to_string();
                rt.set_path(&["levels", level.as_str()], json!(true))?;
                if depth <= 0 {
                    return Ok(json!(0));
                }
                let me = rt.address();
                let inner = rt.call_contract(me, "recurse", &[json!(depth - 1)])?;
                Ok(json!(inner.as_i64().unwrap_or(0) + 1))
            }
            other => Err(SimError::MethodNotFound(other.to_string())),
        }
    }
}

/// Asks an LLM a question; validators only check the answer's shape.
pub struct Oracle;

impl Contract for Oracle {
    fn schema(&self) -> ContractSchema {
        ContractSchema {
            name: "Oracle".to_string(),
            ctor_params: vec![],
            methods: vec![
                MethodSchema::write("ask", &["question"]),
                MethodSchema::view("get_answer", &[]),
                MethodSchema::write("load_template", &[]),
            ],
        }
    }

    fn construct(&self, rt: &mut Runtime<'_>, _args: &[Value]) -> Result<()> {
        rt.set("template", json!("Answer as JSON {\"answer\": ...}: {question}"))
    }

    fn call(&self, rt: &mut Runtime<'_>, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "ask" => {
                let question = arg_str(args, 0)?;
                let template = rt
                    .get("template")?
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "{question}".to_string());
                let prompt = template.replace("{question}", question);
                let block = NondetBlock::non_comparative(
                    "ask_llm",
                    move |env| env.exec_prompt_json(&prompt),
                    |_env, value| Ok(value.get("answer").map(|a| a.is_string()).unwrap_or(false)),
                )
                .with_inputs(json!({ "question": question }));
                let answer = rt.run_nondet(block)?;
                rt.set("answer", answer.clone())?;
                Ok(answer)
            }
            "get_answer" => rt.get_or("answer", Value::Null),
            "load_template" => {
                let template = rt.read_file_to_string("/contract/templates/ask.txt")?;
                rt.set("template", json!(template.trim()))?;
                Ok(Value::Null)
            }
            other => Err(SimError::MethodNotFound(other.to_string())),
        }
    }
}
