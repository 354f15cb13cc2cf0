//! Fixed-length account and contract addresses.
//!
//! Addresses are 20 opaque bytes rendered as `0x`-prefixed lowercase hex. Test
//! accounts are derived from a seed string and contract addresses from the
//! deployer, its nonce and an optional salt, all through SHA256 so the same
//! inputs always yield the same address.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Result, SimError};

/// Address length in bytes.
pub const ADDRESS_LEN: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Deterministic address for a human-readable seed: first 20 bytes of SHA256(seed).
    pub fn from_seed(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&digest[..ADDRESS_LEN]);
        Self(out)
    }

    /// Contract address for the `nonce`-th deployment by `deployer`.
    ///
    /// SHA256("{deployer}:{nonce}" || salt), truncated to 20 bytes. The nonce makes
    /// repeated deployments by the same deployer unique; the salt lets callers
    /// separate otherwise identical deployments.
    pub fn derive_contract(deployer: &Address, nonce: u64, salt: Option<&[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", deployer.to_hex(), nonce).as_bytes());
        if let Some(salt) = salt {
            hasher.update(b":");
            hasher.update(salt);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&digest[..ADDRESS_LEN]);
        Self(out)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|e| SimError::InvalidAddress(format!("{}: {}", s, e)))?;
        if bytes.len() != ADDRESS_LEN {
            return Err(SimError::InvalidAddress(format!(
                "{}: expected {} bytes, got {}",
                s,
                ADDRESS_LEN,
                bytes.len()
            )));
        }
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Address> for serde_json::Value {
    fn from(addr: Address) -> Self {
        serde_json::Value::String(addr.to_hex())
    }
}
