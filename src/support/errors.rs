use thiserror::Error;

/// Failures surfaced by the RPC transport for a single call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// No response received before the call deadline
    #[error("Call timed out")]
    Timeout,

    /// The link went down before or while the call was in flight
    #[error("Link disconnected")]
    Disconnected,

    /// The remote answered with a CALLERROR frame
    #[error("CALLERROR {code}: {description}")]
    CallError { code: String, description: String },

    /// The remote sent a frame that does not follow the OCPP-J envelope
    #[error("Invalid frame: {0}")]
    Framing(String),
}

/// Stack-level errors
#[derive(Debug, Error)]
pub enum ChargePointError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] RpcError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid connector id: {0}")]
    InvalidConnector(u32),

    #[error("Stack is not started")]
    NotStarted,

    #[error("Stack is already started")]
    AlreadyStarted,
}

impl ChargePointError {
    /// Whether the operation may succeed if retried later
    /// (temporary disconnection, back-pressure).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChargePointError::Protocol(RpcError::Timeout)
                | ChargePointError::Protocol(RpcError::Disconnected)
        )
    }
}

pub type ChargePointResult<T> = Result<T, ChargePointError>;
