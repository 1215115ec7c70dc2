use std::sync::Arc;

use uuid::Uuid;

use super::host_reporter::HostReporter;
use super::listener_reconciler::ListenerReconciler;
use crate::client::api::SyncApi;
use crate::client::credentials::Role;
use crate::clock::OffsetEstimator;
use crate::error_handling::types::ParticipantError;
use crate::playback::widget::PlaybackWidget;

/// A client attached to a session: either it may write state or it only follows.
pub enum Participant {
    Host(HostReporter),
    Listener(ListenerReconciler),
}

impl Participant {
    pub async fn join(
        role: Role,
        session_id: Uuid,
        api: Arc<dyn SyncApi>,
        widget: Arc<dyn PlaybackWidget>,
        estimator: Arc<OffsetEstimator>,
    ) -> Result<Self, ParticipantError> {
        match role {
            Role::Host(credential) => Ok(Participant::Host(
                HostReporter::start(session_id, api, widget, credential, estimator).await?,
            )),
            Role::Listener => Ok(Participant::Listener(
                ListenerReconciler::start(session_id, api, widget, estimator).await?,
            )),
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            Participant::Host(host) => host.session_id(),
            Participant::Listener(listener) => listener.session_id(),
        }
    }

    pub fn can_write_state(&self) -> bool {
        matches!(self, Participant::Host(_))
    }

    pub fn shutdown(&mut self) {
        match self {
            Participant::Host(host) => host.shutdown(),
            Participant::Listener(listener) => listener.shutdown(),
        }
    }
}
