use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during audio coordination.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Invalid volume value (must be in range [0.0, 1.0]).
    #[error("Invalid volume: {0} (must be between 0.0 and 1.0)")]
    InvalidVolume(f32),

    /// The underlying audio channel rejected an operation.
    #[error("Audio channel error: {0}")]
    Channel(#[from] BridgeError),
}

/// Result type for audio coordination operations.
pub type Result<T> = std::result::Result<T, AudioError>;
