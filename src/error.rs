use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueuectlError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("duplicate job id: {id}")]
    DuplicateJobId { id: String },

    #[error("invalid job: {message}")]
    InvalidJob { message: String },

    #[error("unknown job state: {0}")]
    UnknownState(String),

    #[error("worker error: {message}")]
    Worker { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
