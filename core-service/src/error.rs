use thiserror::Error;

/// Failures building or running the dispatcher itself.
///
/// Command outcomes are [`core_playback::PlaybackError`]s; this type only
/// covers the service around them.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
