//! Client side of the synchronization protocol.
//!
//! Components:
//! - `api`: the `SyncApi` trait every participant talks through.
//! - `local_api`: in-process implementation calling the authority directly.
//! - `http_api`: `reqwest` implementation of the HTTP surface, with SSE push.
//! - `session_url`: shareable link parsing.
//! - `credentials`: per-session credential persistence and role resolution.

pub mod api;
pub mod credentials;
pub mod http_api;
pub mod local_api;
pub mod session_url;

pub use api::SyncApi;
pub use credentials::{
    resolve_role, CredentialStore, FileCredentialStore, MemoryCredentialStore, Role,
};
pub use http_api::HttpApi;
pub use local_api::LocalApi;
pub use session_url::{parse_session_url, SessionLink};
