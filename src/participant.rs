//! Session participants
//!
//! Components:
//! - `reconciliation`: target position, drift and autoplay rules.
//! - `host_reporter`: the authority-holding side, reporting widget state.
//! - `listener_reconciler`: the read-only side, steering the widget toward the host.
//! - `session_participant`: one enum over both roles.

pub mod host_reporter;
pub mod listener_reconciler;
pub mod reconciliation;
pub mod session_participant;


pub use host_reporter::HostReporter;
pub use listener_reconciler::{ListenerReconciler, ListenerStatus};
pub use reconciliation::SyncReason;
pub use session_participant::Participant;
