//! Capability-scoped virtual filesystem attached to a contract's code root.
//!
//! Contract code reads bundled files through `Runtime::read_file`, which only
//! reaches the `VirtualFs` registered with that contract's code. Paths are
//! relative to the code root; a leading `/contract/` prefix is accepted and
//! stripped. Parent-directory segments that would escape the root are rejected.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SimError};

pub trait VirtualFs: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Files directly or transitively under `dir`, sorted.
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| SimError::FileAccess(format!("{}: {}", path, e)))
    }
}

/// Normalizes a contract-relative path; `None` if it escapes the root.
pub fn normalize(path: &str) -> Option<String> {
    let trimmed = path.strip_prefix("/contract/").unwrap_or(path);
    let mut parts: Vec<&str> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn escape_error(path: &str) -> SimError {
    SimError::FileAccess(format!("path escapes contract root: {}", path))
}

/// In-memory files, used for tests and for contracts bundled at compile time.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        if let Some(path) = normalize(path) {
            self.files.insert(path, contents.into());
        }
        self
    }
}

impl VirtualFs for MemoryFs {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let key = normalize(path).ok_or_else(|| escape_error(path))?;
        self.files
            .get(&key)
            .cloned()
            .ok_or_else(|| SimError::FileAccess(format!("no such file: {}", path)))
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let dir = normalize(dir).ok_or_else(|| escape_error(dir))?;
        let prefix = if dir.is_empty() { String::new() } else { format!("{}/", dir) };
        Ok(self
            .files
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect())
    }
}

/// Files under a directory on the host.
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = normalize(path).ok_or_else(|| escape_error(path))?;
        let joined = self.root.join(&relative);
        if Path::new(&relative)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(escape_error(path));
        }
        Ok(joined)
    }
}

impl VirtualFs for DirFs {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|e| SimError::FileAccess(format!("{}: {}", path, e)))
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let start = self.resolve(dir)?;
        let mut out = Vec::new();
        let mut pending = vec![start];
        while let Some(current) = pending.pop() {
            let entries = fs::read_dir(&current).map_err(|e| SimError::FileAccess(format!("{}: {}", dir, e)))?;
            for entry in entries {
                let entry = entry.map_err(|e| SimError::FileAccess(e.to_string()))?;
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        out.sort();
        Ok(out)
    }
}
