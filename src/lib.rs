//! Mediascribe - a media transcription pipeline
//!
//! This library ingests media (uploaded files, single video URLs, or playlists),
//! acquires audio, runs it through a speech-to-text engine, and persists the
//! resulting transcripts to an interchangeable storage backend (local filesystem
//! or S3), reporting live progress along the way.

pub mod acquire;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod progress;
pub mod storage;
pub mod transcribe;
pub mod utils;

pub use acquire::{MediaSource, PlaylistEntry, YtDlpSource};
pub use config::Config;
pub use pipeline::{BatchReport, JobOrchestrator, VideoReport};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use storage::StorageBackend;
pub use transcribe::{SpeechEngine, Transcriber};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the pipeline
#[derive(thiserror::Error, Debug)]
pub enum ScribeError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Audio download failed: {0}")]
    DownloadFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("{0}")]
    NoItemsSucceeded(String),

    #[error("A job is already in progress")]
    JobAlreadyRunning,
}

impl ScribeError {
    /// Client errors are bad input, reported immediately without touching job
    /// state; everything else is a pipeline failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ScribeError::InvalidRequest(_) | ScribeError::JobAlreadyRunning
        )
    }
}
