//! SeaORM entity model used by the database storage backend.
//!
//! Maps the `sessions` table created by `database_storage`. Timestamps are
//! stored as RFC3339 strings and ids as UUID strings for portability.

use sea_orm::entity::prelude::*;

/// Sessions table entity model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// UUID as string primary key
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Opaque reference of the shared track
    pub track_url: String,
    /// Hex SHA-256 of the peppered authority credential
    pub authority_secret_hash: String,
    /// RFC3339 creation timestamp
    pub created_at: String,
    pub playing: bool,
    /// Non-negative position in milliseconds
    pub position_ms: i64,
    /// RFC3339 authority time of the last accepted write
    pub state_updated_at: String,
    /// RFC3339 authority lease expiry
    pub authority_lease_expires_at: String,
    pub last_error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
