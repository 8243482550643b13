use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Seat {seat_id} is already locked by another user")]
    Conflict {
        seat_id: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Seat {0} is locked by another user and cannot be released")]
    Forbidden(String),

    #[error("Lock store error: {0}")]
    Store(String),
}

pub type LockResult<T> = Result<T, LockError>;

impl LockError {
    /// Ensures a required request field carries a non-blank value.
    pub fn require(field: &str, value: &str) -> LockResult<()> {
        if value.trim().is_empty() {
            return Err(LockError::Validation(format!("{} is required", field)));
        }
        Ok(())
    }
}
