use std::{io, path::PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tensor computation error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("ColBERT model error: {0}")]
    Colbert(#[from] pylate_rs::ColbertError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("could not extract text from {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error(
        "embedding dimension mismatch: index holds {expected}-d vectors, got {actual}"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "index was built with embedding model '{indexed}' but '{configured}' is configured; run `manualrag rebuild`"
    )]
    EmbeddingModelMismatch { indexed: String, configured: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Whether the error means an on-disk store is unreadable (corrupt,
    /// truncated or of an unknown format) rather than temporarily
    /// inaccessible. Stores that can be rebuilt are recreated on the former
    /// and fail on the latter.
    pub fn is_corruption(&self) -> bool {
        use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

        let storage = match self {
            Error::Io(err) => return is_corrupt_io(err),
            Error::RedbDatabase(DatabaseError::DatabaseAlreadyOpen) => return false,
            Error::RedbDatabase(DatabaseError::Storage(err))
            | Error::RedbStorage(err)
            | Error::RedbTransaction(TransactionError::Storage(err))
            | Error::RedbTable(TableError::Storage(err))
            | Error::RedbCommit(CommitError::Storage(err)) => err,
            Error::RedbDatabase(_)
            | Error::RedbTable(_)
            | Error::RedbTransaction(_)
            | Error::RedbCommit(_)
            | Error::Redb(_) => return true,
            _ => return false,
        };
        match storage {
            StorageError::Io(err) => is_corrupt_io(err),
            StorageError::Corrupted(_) => true,
            _ => false,
        }
    }
}

fn is_corrupt_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
    )
}
