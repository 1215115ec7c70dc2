use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error_handling::types::WidgetError;

/// Events a widget reports, whether caused by the user or by a programmatic call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetEvent {
    Play,
    Pause,
    Seek,
    /// End of track; playback has stopped.
    Finish,
    /// Periodic tick while playing.
    Progress,
}

/// A third-party audio player as seen by a participant.
///
/// Positions are non-negative milliseconds. Commands issued before `ready`
/// resolves have no defined effect.
#[async_trait]
pub trait PlaybackWidget: Send + Sync {
    /// Resolves once the widget can take commands, or reports why it never will.
    async fn ready(&self) -> Result<(), WidgetError>;

    fn events(&self) -> broadcast::Receiver<WidgetEvent>;

    async fn position_ms(&self) -> u64;

    async fn seek_to(&self, position_ms: u64);

    async fn play(&self);

    async fn pause(&self);
}
