use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::progress::{ProgressTracker, Segment};
use crate::storage::StagingPolicy;
use crate::utils;
use crate::{Result, ScribeError};

pub mod whisper;

pub use whisper::WhisperEngine;

/// Percent band occupied by transcription within a job: segments interpolate
/// between these bounds proportional to elapsed audio time.
const PERCENT_FLOOR: u8 = 40;
const PERCENT_CEIL: u8 = 90;

/// One timestamped span of recognized speech, in seconds
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Everything the speech engine produces for one audio file
#[derive(Debug, Clone)]
pub struct SpeechOutput {
    pub text: String,
    pub segments: Vec<SpeechSegment>,
}

/// Opaque speech-to-text engine: audio in, timestamped segments plus a
/// flattened transcript out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<SpeechOutput>;
}

/// A transcript artifact written to staging, awaiting persistence
#[derive(Debug, Clone)]
pub struct TranscriptDraft {
    pub path: PathBuf,
    pub text: String,
    /// Whether the staging copy is disposable after persistence
    pub transient: bool,
}

fn segment_percent(end: f64, total_end: f64) -> u8 {
    if total_end <= 0.0 {
        return PERCENT_FLOOR;
    }
    let span = (PERCENT_CEIL - PERCENT_FLOOR) as f64;
    let interpolated = PERCENT_FLOOR as f64 + (end / total_end).clamp(0.0, 1.0) * span;
    interpolated.round() as u8
}

/// Runs the speech engine and turns its output into a staged transcript
/// artifact, streaming segments into the progress tracker as they land.
pub struct Transcriber {
    engine: Arc<dyn SpeechEngine>,
    progress: Arc<ProgressTracker>,
    staging: StagingPolicy,
}

impl Transcriber {
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        progress: Arc<ProgressTracker>,
        staging: StagingPolicy,
    ) -> Self {
        Self {
            engine,
            progress,
            staging,
        }
    }

    /// Transcribe one audio file, prefix the artifact with `source_info`, and
    /// return the staged draft. On failure the tracker gets an error message
    /// and the caller decides whether the item is skipped or the job dies.
    pub async fn transcribe_audio(
        &self,
        audio_path: &Path,
        source_info: &str,
    ) -> Result<TranscriptDraft> {
        match self.transcribe_inner(audio_path, source_info).await {
            Ok(draft) => Ok(draft),
            Err(e) => {
                tracing::error!("Transcription error: {}", e);
                self.progress
                    .update(format!("Error in transcription: {}", e), None, None);
                Err(ScribeError::TranscriptionFailed(e.to_string()).into())
            }
        }
    }

    async fn transcribe_inner(
        &self,
        audio_path: &Path,
        source_info: &str,
    ) -> Result<TranscriptDraft> {
        tracing::info!("Starting transcription of: {}", audio_path.display());
        utils::check_file_accessible(audio_path)?;

        self.progress
            .update("Loading speech model...", Some(30), None);

        self.progress
            .update("Starting transcription...", Some(PERCENT_FLOOR), None);

        let output = self.engine.transcribe(audio_path).await?;

        let total_end = output.segments.last().map(|s| s.end).unwrap_or(0.0);
        for segment in &output.segments {
            self.progress.update(
                "Transcribing...",
                Some(segment_percent(segment.end, total_end)),
                Some(Segment {
                    start: utils::format_segment_time(segment.start),
                    end: utils::format_segment_time(segment.end),
                    text: segment.text.trim().to_string(),
                }),
            );
        }

        let draft_path = self.write_artifact(audio_path, source_info, &output.text)?;

        Ok(TranscriptDraft {
            path: draft_path,
            text: output.text,
            transient: self.staging.transient,
        })
    }

    fn write_artifact(
        &self,
        audio_path: &Path,
        source_info: &str,
        text: &str,
    ) -> Result<PathBuf> {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let base_name = audio_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");

        fs_err::create_dir_all(&self.staging.dir)?;
        let draft_path = self
            .staging
            .dir
            .join(format!("{}_{}_transcript.txt", timestamp, base_name));

        let content = if source_info.is_empty() {
            text.to_string()
        } else {
            format!("Source: {}\n\n{}", source_info, text)
        };
        fs_err::write(&draft_path, content)?;

        tracing::info!("Transcript saved to: {}", draft_path.display());
        Ok(draft_path)
    }
}
