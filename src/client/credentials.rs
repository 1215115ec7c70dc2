use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use log::{debug, error, info, warn};
use uuid::Uuid;

use super::session_url::SessionLink;
use crate::authority::crypto::SecretString;
use crate::error_handling::types::StorageError;

/// Remembers host credentials per session id across client restarts.
pub trait CredentialStore: Send + Sync {
    fn load(&self, session_id: Uuid) -> Option<SecretString>;
    fn save(&self, session_id: Uuid, credential: &SecretString) -> Result<(), StorageError>;
}

/// JSON map `{ "<session id>": "<credential>" }` in a single file.
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<HashMap<Uuid, SecretString>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| {
            error!("Failed to read credentials {}: {}", self.path.display(), e);
            StorageError::ReadFailed
        })?;
        serde_json::from_str(&content).map_err(|e| {
            error!("Invalid credentials file {}: {}", self.path.display(), e);
            StorageError::ReadFailed
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, session_id: Uuid) -> Option<SecretString> {
        match self.read_all() {
            Ok(mut all) => all.remove(&session_id),
            Err(_) => None,
        }
    }

    fn save(&self, session_id: Uuid, credential: &SecretString) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::WriteFailed)?;
        // an unreadable file is replaced rather than blocking host resumption
        let mut all = self.read_all().unwrap_or_default();
        all.insert(session_id, credential.clone());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create {}: {}", parent.display(), e);
                StorageError::WriteFailed
            })?;
        }
        let body = serde_json::to_vec_pretty(&all).map_err(|e| {
            error!("Failed to encode credentials: {}", e);
            StorageError::WriteFailed
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                error!("Failed to write credentials {}: {}", self.path.display(), e);
                StorageError::WriteFailed
            })?;
        debug!("[{}] host credential saved to {}", session_id, self.path.display());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<Uuid, SecretString>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, session_id: Uuid) -> Option<SecretString> {
        self.credentials.read().ok()?.get(&session_id).cloned()
    }

    fn save(&self, session_id: Uuid, credential: &SecretString) -> Result<(), StorageError> {
        self.credentials
            .write()
            .map_err(|_| StorageError::WriteFailed)?
            .insert(session_id, credential.clone());
        Ok(())
    }
}

/// Which side of a session this client plays.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Host(SecretString),
    Listener,
}

/// Host when a credential is available, either in the link fragment (which
/// is then remembered) or from an earlier visit; listener otherwise.
pub fn resolve_role(link: &SessionLink, store: &dyn CredentialStore) -> Role {
    if let Some(credential) = &link.host_credential {
        if let Err(e) = store.save(link.session_id, credential) {
            warn!("[{}] could not remember host credential: {}", link.session_id, e);
        }
        info!("[{}] joining as host", link.session_id);
        return Role::Host(credential.clone());
    }
    match store.load(link.session_id) {
        Some(credential) => {
            info!("[{}] joining as host with a remembered credential", link.session_id);
            Role::Host(credential)
        }
        None => {
            info!("[{}] joining as listener", link.session_id);
            Role::Listener
        }
    }
}
