use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, Schema, Set,
};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::db_entities::{self as sessions, ActiveModel, Column, Entity};
use crate::storage::notifier::ChangeNotifier;
use crate::storage::storage_trait::SessionStore;
use crate::storage::types::{Session, StatePatch};

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            error!("Invalid timestamp {:?} in sessions table: {}", raw, e);
            StorageError::ReadFailed
        })
}

fn to_db_position(position_ms: u64) -> i64 {
    i64::try_from(position_ms).unwrap_or(i64::MAX)
}

impl sessions::Model {
    fn into_session(self) -> Result<Session, StorageError> {
        Ok(Session {
            id: Uuid::parse_str(&self.id).map_err(|_| StorageError::ReadFailed)?,
            track_url: self.track_url,
            authority_secret_hash: self.authority_secret_hash,
            created_at: parse_time(&self.created_at)?,
            playing: self.playing,
            position_ms: u64::try_from(self.position_ms).unwrap_or(0),
            state_updated_at: parse_time(&self.state_updated_at)?,
            authority_lease_expires_at: parse_time(&self.authority_lease_expires_at)?,
            last_error: self.last_error,
        })
    }
}

/// SQLite-backed store through SeaORM.
pub struct DatabaseStorage {
    db: DatabaseConnection,
    notifier: ChangeNotifier,
    /// Serializes update, read-back and publish so pushes follow commit order.
    write_lock: Mutex<()>,
}

impl DatabaseStorage {
    /// Default database filename used in the application's working directory
    const DEFAULT_DB_FILE: &'static str = "radio-sync.sqlite3";

    /// Create or open the database in the current working directory with the default filename
    pub async fn new() -> Result<Self, StorageError> {
        let cwd = std::env::current_dir().map_err(|_| StorageError::ConnectionFailed)?;
        Self::new_file(cwd.join(Self::DEFAULT_DB_FILE)).await
    }

    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StorageError::WriteFailed)?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let db = Database::connect(url).await.map_err(|e| {
            error!("Failed to open database {}: {}", path.display(), e);
            StorageError::ConnectionFailed
        })?;

        // create schema
        let backend = db.get_database_backend();
        let mut create = Schema::new(backend).create_table_from_entity(Entity);
        create.if_not_exists();
        db.execute(backend.build(&create)).await.map_err(|e| {
            error!("Failed to create sessions table: {}", e);
            StorageError::WriteFailed
        })?;

        info!("DatabaseStorage initialized at {}", path.display());
        Ok(Self {
            db,
            notifier: ChangeNotifier::new(),
            write_lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl SessionStore for DatabaseStorage {
    async fn insert(&self, session: &Session) -> Result<(), StorageError> {
        ActiveModel {
            id: Set(session.id.to_string()),
            track_url: Set(session.track_url.clone()),
            authority_secret_hash: Set(session.authority_secret_hash.clone()),
            created_at: Set(session.created_at.to_rfc3339()),
            playing: Set(session.playing),
            position_ms: Set(to_db_position(session.position_ms)),
            state_updated_at: Set(session.state_updated_at.to_rfc3339()),
            authority_lease_expires_at: Set(session.authority_lease_expires_at.to_rfc3339()),
            last_error: Set(session.last_error.clone()),
        }
        .insert(&self.db)
        .await
        .map_err(|e| {
            error!("[{}] insert failed: {}", session.id, e);
            StorageError::WriteFailed
        })?;
        debug!("[{}] session inserted", session.id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StorageError> {
        let row = Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(|e| {
                error!("[{}] read failed: {}", id, e);
                StorageError::ReadFailed
            })?;
        row.map(|model| model.into_session()).transpose()
    }

    async fn update(&self, id: Uuid, patch: &StatePatch) -> Result<Session, StorageError> {
        let changes = ActiveModel {
            playing: Set(patch.playing),
            position_ms: Set(to_db_position(patch.position_ms)),
            state_updated_at: Set(patch.state_updated_at.to_rfc3339()),
            authority_lease_expires_at: Set(patch.authority_lease_expires_at.to_rfc3339()),
            last_error: Set(patch.last_error.clone()),
            ..Default::default()
        };
        let _guard = self.write_lock.lock().await;
        let result = Entity::update_many()
            .set(changes)
            .filter(Column::Id.eq(id.to_string()))
            .exec(&self.db)
            .await
            .map_err(|e| {
                error!("[{}] update failed: {}", id, e);
                StorageError::WriteFailed
            })?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }

        let committed = self.get(id).await?.ok_or(StorageError::NotFound)?;
        self.notifier.publish(&committed);
        Ok(committed)
    }

    fn subscribe(&self, id: Uuid) -> broadcast::Receiver<Session> {
        self.notifier.subscribe(id)
    }
}
