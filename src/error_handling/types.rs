use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures of the session state store.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
    NotFound,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
            StorageError::NotFound => write!(f, "Storage record not found"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Error taxonomy shared by the authority and by every client.
///
/// - `NotFound`: unknown session, terminal for the caller.
/// - `Unauthorized`: missing or mismatching authority credential, terminal for that write.
/// - `InvalidState`: malformed request payload.
/// - `Transient`: network or storage failure, resolved by a later attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    NotFound,
    Unauthorized,
    InvalidState(String),
    Transient(String),
}

impl SyncError {
    /// Whether a later attempt of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::NotFound => write!(f, "Session not found"),
            SyncError::Unauthorized => write!(f, "Invalid host secret"),
            SyncError::InvalidState(e) => write!(f, "Invalid state: {}", e),
            SyncError::Transient(e) => write!(f, "Temporary failure: {}", e),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => SyncError::NotFound,
            other => SyncError::Transient(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetError {
    LoadFailed(String),
}

impl fmt::Display for WidgetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidgetError::LoadFailed(e) => write!(f, "Widget failed to load: {}", e),
        }
    }
}

impl std::error::Error for WidgetError {}

/// Why a participant could not join a session.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantError {
    Sync(SyncError),
    Widget(WidgetError),
}

impl fmt::Display for ParticipantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantError::Sync(e) => write!(f, "{}", e),
            ParticipantError::Widget(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ParticipantError {}

impl From<SyncError> for ParticipantError {
    fn from(err: SyncError) -> Self {
        ParticipantError::Sync(err)
    }
}

impl From<WidgetError> for ParticipantError {
    fn from(err: WidgetError) -> Self {
        ParticipantError::Widget(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    SyncError(SyncError),
    WebError(WebError),
    ParticipantError(ParticipantError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::SyncError(e) => write!(f, "Sync error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::ParticipantError(e) => write!(f, "Participant error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<SyncError> for ControllerError {
    fn from(err: SyncError) -> Self {
        ControllerError::SyncError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}

impl From<ParticipantError> for ControllerError {
    fn from(err: ParticipantError) -> Self {
        ControllerError::ParticipantError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_become_transient() {
        let err: SyncError = StorageError::WriteFailed.into();
        assert!(err.is_transient());
        assert_eq!(err, SyncError::Transient("Storage write failed".to_string()));
    }

    #[test]
    fn missing_record_stays_not_found() {
        let err: SyncError = StorageError::NotFound.into();
        assert_eq!(err, SyncError::NotFound);
        assert!(!err.is_transient());
    }
}
