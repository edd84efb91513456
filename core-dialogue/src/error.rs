use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur in the dialogue pipeline.
///
/// Deliberately small: most failure modes in this domain are recovered
/// in place (placeholder clips, advance-on-error) and reported as events
/// rather than surfaced as errors.
#[derive(Error, Debug)]
pub enum DialogueError {
    /// The manifest document exists but is structurally invalid. This is a
    /// content-authoring bug and is reported distinctly from a manifest
    /// that is simply absent.
    #[error("Dialogue manifest for slide {slide} is malformed: {detail}")]
    ManifestMalformed { slide: usize, detail: String },

    /// The dialogue audio channel rejected a control operation.
    #[error("Audio channel error: {0}")]
    Channel(#[from] BridgeError),
}

impl DialogueError {
    /// Returns `true` if the error points at deck content rather than the
    /// runtime.
    pub fn is_content_error(&self) -> bool {
        matches!(self, DialogueError::ManifestMalformed { .. })
    }
}

/// Result type for dialogue operations.
pub type Result<T> = std::result::Result<T, DialogueError>;
