//! Escrow Error Types
//!
//! Every lifecycle rejection is an expected, user-facing outcome with a
//! stable error code. Only `Database`/`System` are infrastructure faults.

use thiserror::Error;

use super::state::{CommercialRole, TransactionStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    // === Lifecycle Errors ===
    #[error("Action {action} is not allowed in state {status}")]
    InvalidState {
        action: &'static str,
        status: TransactionStatus,
    },

    #[error("Action {action} requires the {required} role")]
    RoleViolation {
        action: &'static str,
        required: CommercialRole,
    },

    #[error("User {0} is not a participant of this transaction")]
    NotAParticipant(u64),

    #[error("Transaction is frozen by an open dispute")]
    TransactionDisputed,

    // === Invitation Errors ===
    #[error("Invitation code has expired")]
    CodeExpired,

    #[error("Invitation code has already been used")]
    CodeUsed,

    #[error("Invitation code not found")]
    CodeNotFound,

    // === Concurrency ===
    #[error("Transaction was modified concurrently, retry with fresh state")]
    Conflict,

    // === Validation ===
    #[error("Validation failed: {0}")]
    Validation(String),

    // === Lookup ===
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Dispute not found: {0}")]
    DisputeNotFound(String),

    #[error("A dispute is already open for this transaction")]
    DisputeAlreadyOpen,

    // === System Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal system error: {0}")]
    System(String),
}

impl EscrowError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::InvalidState { .. } => "INVALID_STATE",
            EscrowError::RoleViolation { .. } => "ROLE_VIOLATION",
            EscrowError::NotAParticipant(_) => "NOT_A_PARTICIPANT",
            EscrowError::TransactionDisputed => "TRANSACTION_DISPUTED",
            EscrowError::CodeExpired => "CODE_EXPIRED",
            EscrowError::CodeUsed => "CODE_USED",
            EscrowError::CodeNotFound => "CODE_NOT_FOUND",
            EscrowError::Conflict => "CONFLICT",
            EscrowError::Validation(_) => "VALIDATION_ERROR",
            EscrowError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            EscrowError::DisputeNotFound(_) => "DISPUTE_NOT_FOUND",
            EscrowError::DisputeAlreadyOpen => "DISPUTE_ALREADY_OPEN",
            EscrowError::Database(_) => "DATABASE_ERROR",
            EscrowError::System(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            EscrowError::Validation(_) => 400,
            EscrowError::RoleViolation { .. } | EscrowError::NotAParticipant(_) => 403,
            EscrowError::CodeNotFound
            | EscrowError::TransactionNotFound(_)
            | EscrowError::DisputeNotFound(_) => 404,
            EscrowError::InvalidState { .. }
            | EscrowError::TransactionDisputed
            | EscrowError::DisputeAlreadyOpen
            | EscrowError::Conflict => 409,
            EscrowError::CodeExpired | EscrowError::CodeUsed => 410,
            EscrowError::Database(_) | EscrowError::System(_) => 500,
        }
    }

    /// Only a lost optimistic race should be retried automatically
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, EscrowError::Conflict)
    }

    /// Infrastructure faults, as opposed to lifecycle rejections
    #[inline]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, EscrowError::Database(_) | EscrowError::System(_))
    }

    pub(crate) fn invalid_state(action: &'static str, status: TransactionStatus) -> Self {
        EscrowError::InvalidState { action, status }
    }
}

impl From<sqlx::Error> for EscrowError {
    fn from(e: sqlx::Error) -> Self {
        EscrowError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for EscrowError {
    fn from(e: serde_json::Error) -> Self {
        EscrowError::System(format!("corrupt record: {}", e))
    }
}

impl From<validator::ValidationErrors> for EscrowError {
    fn from(e: validator::ValidationErrors) -> Self {
        EscrowError::Validation(e.to_string())
    }
}
