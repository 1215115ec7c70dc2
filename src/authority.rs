//! Lease & Authority Manager
//!
//! Components:
//! - `crypto`: credential generation, peppered hashing and constant-time matching.
//! - `types`: state write payloads, host actions and creation results.
//! - `lease_manager`: session creation and the validate-and-apply write path.

pub mod crypto;
pub mod lease_manager;
pub mod types;

pub use crypto::SecretString;
pub use lease_manager::AuthorityManager;
pub use types::{
    clamp_position, AppliedState, CreatedSession, HostAction, StatePayload, StateRequest,
    LEASE_DURATION_MS,
};
