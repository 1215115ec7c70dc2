//! Row-change notification shared by every storage backend.

use std::collections::HashMap;
use std::sync::Mutex;

use log::trace;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::storage::types::Session;

const CHANNEL_CAPACITY: usize = 32;

/// Fans every committed session row out to its subscribers.
///
/// Delivery is at-least-once per live subscriber, in commit order; a
/// subscriber that falls more than `CHANNEL_CAPACITY` rows behind sees a lag
/// and resumes from the newest rows.
#[derive(Default)]
pub struct ChangeNotifier {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<Session>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<Session> {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn publish(&self, session: &Session) {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(sender) = channels.get(&session.id) else {
            return;
        };
        match sender.send(session.clone()) {
            Ok(receivers) => trace!("[{}] change delivered to {} subscriber(s)", session.id, receivers),
            Err(_) => {
                channels.remove(&session.id);
            }
        }
    }
}
