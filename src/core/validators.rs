//! Simulated validator set and leader selection across rotations.
//!
//! Each node has a stable id (`validator-{i}`) and a deterministic address. The
//! leader for a rotation is chosen by a [`RotationPolicy`]:
//!
//! - `ReExecute`: node 0 leads every round; a rotation is a clean re-execution.
//! - `RoundRobin`: node `rotation % n` leads.
//! - `Seeded`: node `SHA256(seed || rotation) mod n` leads, where the seed is the
//!   transaction hash. Same transaction, same sequence of leaders.
//!
//! Selection uses integer arithmetic only; no system time or RNG.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::address::Address;
use crate::error::{Result, SimError};

pub type NodeId = String;

/// Which node is acting, and in which capacity. Mock scoping keys off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Leader(usize),
    Validator(usize),
}

impl NodeRole {
    pub fn node(&self) -> usize {
        match self {
            NodeRole::Leader(i) | NodeRole::Validator(i) => *i,
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, NodeRole::Leader(_))
    }
}

impl Default for NodeRole {
    fn default() -> Self {
        NodeRole::Leader(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    #[default]
    ReExecute,
    RoundRobin,
    Seeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorNode {
    pub id: NodeId,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    nodes: Vec<ValidatorNode>,
}

impl ValidatorSet {
    pub fn new(count: usize) -> Result<Self> {
        if count == 0 {
            return Err(SimError::Config("validator count must be at least 1".to_string()));
        }
        let nodes = (0..count)
            .map(|i| {
                let id = format!("validator-{}", i);
                let address = Address::from_seed(&id);
                ValidatorNode { id, address }
            })
            .collect();
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[ValidatorNode] {
        &self.nodes
    }

    /// Node at `index`, or `None` past the end of the set.
    pub fn node(&self, index: usize) -> Option<&ValidatorNode> {
        self.nodes.get(index)
    }

    /// Index of the node leading the given rotation (0 = first attempt).
    pub fn leader_index(&self, policy: RotationPolicy, rotation: u32, seed: &[u8; 32]) -> usize {
        let n = self.nodes.len();
        match policy {
            RotationPolicy::ReExecute => 0,
            RotationPolicy::RoundRobin => rotation as usize % n,
            RotationPolicy::Seeded => {
                let pick = rotation_seed(seed, rotation);
                (pick % n as u64) as usize
            }
        }
    }
}

/// SHA256(seed || rotation_le), first 8 bytes as little-endian u64.
fn rotation_seed(seed: &[u8; 32], rotation: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(rotation.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_validators_rejected() {
        assert!(ValidatorSet::new(0).is_err());
    }

    #[test]
    fn test_node_ids_and_addresses_stable() {
        let a = ValidatorSet::new(3).unwrap();
        let b = ValidatorSet::new(3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.node(1).map(|n| n.id.as_str()), Some("validator-1"));
        assert!(a.node(3).is_none());
    }

    #[test]
    fn test_re_execute_keeps_leader() {
        let set = ValidatorSet::new(5).unwrap();
        for rotation in 0..4 {
            assert_eq!(set.leader_index(RotationPolicy::ReExecute, rotation, &[0u8; 32]), 0);
        }
    }

    #[test]
    fn test_round_robin_cycles() {
        let set = ValidatorSet::new(3).unwrap();
        let leaders: Vec<usize> = (0..5)
            .map(|r| set.leader_index(RotationPolicy::RoundRobin, r, &[0u8; 32]))
            .collect();
        assert_eq!(leaders, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_seeded_is_deterministic_and_in_range() {
        let set = ValidatorSet::new(7).unwrap();
        let seed = [9u8; 32];
        for rotation in 0..10 {
            let a = set.leader_index(RotationPolicy::Seeded, rotation, &seed);
            let b = set.leader_index(RotationPolicy::Seeded, rotation, &seed);
            assert_eq!(a, b);
            assert!(a < 7);
        }
    }

    #[test]
    fn test_role_helpers() {
        assert!(NodeRole::Leader(2).is_leader());
        assert_eq!(NodeRole::Validator(4).node(), 4);
        assert_eq!(NodeRole::default(), NodeRole::Leader(0));
    }
}
