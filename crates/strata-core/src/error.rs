use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("not initialized: run 'strata init'")]
    NotInitialized,

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("invalid time offset: {0}")]
    InvalidOffset(String),

    #[error("unknown {kind}: {value}")]
    UnknownType { kind: &'static str, value: String },

    #[error("command '{command}' failed: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: Box<StrataError>,
    },

    #[error("command batch cancelled")]
    Cancelled,

    #[error("'{0}' is claimed by another worker")]
    ClaimLost(String),

    #[error("no eligible resource: {0}")]
    ResourceUnavailable(String),

    #[error("filesystem not found: {0}")]
    FilesystemNotFound(String),

    #[error("study storage not found: {0}")]
    StudyNotFound(String),

    #[error("work queue entry not found: {0}")]
    WorkQueueEntryNotFound(String),

    #[error("work queue entry {id} has invalid data: {reason}")]
    InvalidEntryData { id: String, reason: String },

    #[error("service lock not found: {0}")]
    ServiceLockNotFound(String),

    #[error("no job factory registered for '{0}'")]
    NoJobFactory(String),

    #[error("service lock '{0}' is not scoped to a filesystem")]
    LockScope(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Uuid(#[from] uuid::Error),
}

impl StrataError {
    /// True for failures that mean "nothing eligible right now" rather than a fault.
    pub fn is_retryable(&self) -> bool {
        match self {
            StrataError::ResourceUnavailable(_) => true,
            StrataError::CommandFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;
