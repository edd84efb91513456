use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Dialogue error: {0}")]
    Dialogue(#[from] core_dialogue::DialogueError),

    #[error("Audio error: {0}")]
    Audio(#[from] core_audio::AudioError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
