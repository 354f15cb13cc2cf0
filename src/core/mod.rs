// Core engine for consensus simulation
//
// DETERMINISM GUARANTEES:
// =======================
// 1. Same mocks, same request, same rotation seed → same verdict
// 2. Leader selection uses integer arithmetic over SHA256 only
// 3. Storage and world snapshots are whole-state copies; restore is exact
// 4. Nondet records are replayed in capture order
//
// INVARIANTS:
// - Contract storage is reachable only through the owning contract's address
// - A failed frame, round or view leaves no writes behind
// - The execution context seen by a caller is unchanged by any nested call

pub mod address;
pub mod consensus;
pub mod context;
pub mod contract;
pub mod mocks;
pub mod nondet;
pub mod router;
pub mod runtime;
pub mod state;
pub mod storage;
pub mod transaction;
pub mod validators;
pub mod vfs;
pub mod vm;
pub mod voting;
