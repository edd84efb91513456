use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Operation refused by host policy: {0}")]
    NotAllowed(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` if the host refused the operation (e.g. an audio
    /// autoplay policy that requires a user gesture).
    pub fn is_policy_refusal(&self) -> bool {
        matches!(self, BridgeError::NotAllowed(_))
    }

    /// Returns `true` if the error is a transport-level failure (network
    /// unreachable, timeout) rather than a definitive refusal.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BridgeError::OperationFailed(_) | BridgeError::Timeout(_) | BridgeError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
