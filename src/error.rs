//! Error types for deferral.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The store has no task that is ready to run right now.
    #[error("no ready tasks")]
    NoPendingTasks,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no converter registered for {0:?}")]
    ConverterNotFound(String),

    /// The converter could not build a performer from the task.
    #[error("{0}")]
    Conversion(String),

    /// The performer ran and failed.
    #[error("{0}")]
    Perform(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the expected "nothing to do" signal from `TaskStore::get_one`.
    pub fn is_no_pending(&self) -> bool {
        matches!(self, Error::NoPendingTasks)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
