//! Contract code and the code registry.
//!
//! Contract code is a stateless [`Contract`] implementation; all persistent state
//! goes through the [`Runtime`] into the Storage Manager, so snapshots capture it.
//! Code is registered under a canonical source path and resolved by that path on
//! deploy and on state import. `evict` drops cached code so the next registration
//! under the same path takes effect.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::runtime::Runtime;
use crate::core::vfs::VirtualFs;
use crate::error::{Result, SimError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSchema {
    pub name: String,
    pub params: Vec<String>,
    /// View methods do not write storage.
    pub readonly: bool,
}

impl MethodSchema {
    pub fn view(name: &str, params: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            readonly: true,
        }
    }

    pub fn write(name: &str, params: &[&str]) -> Self {
        Self {
            readonly: false,
            ..Self::view(name, params)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSchema {
    pub name: String,
    pub ctor_params: Vec<String>,
    pub methods: Vec<MethodSchema>,
}

impl ContractSchema {
    pub fn method(&self, name: &str) -> Option<&MethodSchema> {
        self.methods.iter().find(|m| m.name == name)
    }
}

pub trait Contract: Send + Sync {
    fn schema(&self) -> ContractSchema;

    /// Runs once at deploy time with the contract's own storage.
    fn construct(&self, rt: &mut Runtime<'_>, args: &[Value]) -> Result<()>;

    /// Dispatches a method call. Unknown methods should return `SimError::MethodNotFound`.
    fn call(&self, rt: &mut Runtime<'_>, method: &str, args: &[Value]) -> Result<Value>;
}

/// Registered code: the implementation plus its optional bundled files.
#[derive(Clone)]
pub struct ContractCode {
    pub path: String,
    pub contract: Arc<dyn Contract>,
    pub fs: Option<Arc<dyn VirtualFs>>,
}

impl fmt::Debug for ContractCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractCode")
            .field("path", &self.path)
            .field("name", &self.contract.schema().name)
            .field("fs", &self.fs.is_some())
            .finish()
    }
}

/// Canonical form of a source path: forward slashes, no `.` segments, `..` folded.
pub fn canonicalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[derive(Debug, Clone, Default)]
pub struct CodeRegistry {
    codes: BTreeMap<String, ContractCode>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers code and returns its canonical path. Re-registering replaces.
    pub fn register(&mut self, path: &str, contract: Arc<dyn Contract>) -> String {
        self.insert(path, contract, None)
    }

    pub fn register_with_fs(&mut self, path: &str, contract: Arc<dyn Contract>, fs: Arc<dyn VirtualFs>) -> String {
        self.insert(path, contract, Some(fs))
    }

    fn insert(&mut self, path: &str, contract: Arc<dyn Contract>, fs: Option<Arc<dyn VirtualFs>>) -> String {
        let canonical = canonicalize(path);
        self.codes.insert(
            canonical.clone(),
            ContractCode {
                path: canonical.clone(),
                contract,
                fs,
            },
        );
        canonical
    }

    pub fn resolve(&self, path: &str) -> Result<&ContractCode> {
        let canonical = canonicalize(path);
        self.codes
            .get(&canonical)
            .ok_or(SimError::CodeNotFound(canonical))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.codes.contains_key(&canonicalize(path))
    }

    /// Drops cached code for `path`; returns whether anything was evicted.
    pub fn evict(&mut self, path: &str) -> bool {
        self.codes.remove(&canonicalize(path)).is_some()
    }

    pub fn paths(&self) -> Vec<String> {
        self.codes.keys().cloned().collect()
    }
}
