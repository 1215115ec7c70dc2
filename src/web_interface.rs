//! HTTP surface of the authority
//!
//! Components:
//! - `routes`: warp filters for session creation, snapshots, state writes, time and events.
//! - `types`: request and response bodies shared with the HTTP client.
//! - `web_server`: binding and graceful shutdown.

pub mod routes;
pub mod types;
pub mod web_server;

pub use routes::{api_routes, RouteContext};
pub use web_server::{RunningServer, WebServer};
