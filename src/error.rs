use thiserror::Error;

use crate::models::{DimensionKind, ImageKind, MediaKind, MediaRef};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{media} is already linked to {kind} {dimension_id}")]
    DuplicateRelation {
        media: MediaRef,
        kind: DimensionKind,
        dimension_id: i64,
    },

    #[error("{kind} {id} is still referenced by {edges} relation(s)")]
    ReferentialIntegrity {
        kind: DimensionKind,
        id: i64,
        edges: i64,
    },

    #[error("{0} cannot be linked to a {1}")]
    UnsupportedRelation(DimensionKind, MediaKind),

    #[error("{0} images cannot be attached to a {1}")]
    UnsupportedImage(ImageKind, MediaKind),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("migration {version} ({name}) failed: {source}")]
    Migration {
        version: i64,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("store is closed")]
    Closed,

    #[error("schema version {found} is newer than the supported version {supported}; reset the store")]
    SchemaTooNew { found: i64, supported: i64 },
}

impl StoreError {
    /// Errors a caller can handle and keep its transaction going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::DuplicateRelation { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
