//! Error types for queue-file access.

use thiserror::Error;

use crate::id::QueueId;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("queue file not found: {0}")]
    NotFound(QueueId),

    #[error("queue file already admitted: {0}")]
    AlreadyExists(QueueId),

    #[error("queue file record is corrupt: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SpoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_includes_id() {
        let id = QueueId::generate();
        let err = SpoolError::NotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }
}
