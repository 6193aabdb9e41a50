use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::ScribeError;

/// Job status as seen by polling clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Processing,
    Complete,
    Error,
}

/// One transcript segment, with boundaries formatted as MM:SS.mmm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: String,
    pub end: String,
    pub text: String,
}

/// Point-in-time view of the active job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub message: String,
    pub progress: u8,
    pub segments: Vec<Segment>,
}

impl ProgressSnapshot {
    fn initial() -> Self {
        Self {
            status: JobStatus::Idle,
            message: String::new(),
            progress: 0,
            segments: Vec::new(),
        }
    }
}

/// Process-wide, single-job progress state.
///
/// The pipeline is the sole writer; any number of readers may take snapshots
/// concurrently through `Arc` clones. Each `update` is applied atomically as a
/// group, so readers never observe a half-merged state.
pub struct ProgressTracker {
    inner: Mutex<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ProgressSnapshot::initial()),
        }
    }

    /// Start a new job. Fails while another job is still processing; a
    /// terminal snapshot from a finished job is reset in place.
    pub fn begin(&self, message: impl Into<String>) -> Result<(), ScribeError> {
        let mut state = self.inner.lock().unwrap();
        if state.status == JobStatus::Processing {
            return Err(ScribeError::JobAlreadyRunning);
        }

        *state = ProgressSnapshot::initial();
        state.status = JobStatus::Processing;
        state.message = message.into();
        Ok(())
    }

    /// Merge an update into the current state. Omitted fields are left
    /// unchanged; a segment is appended, never replacing the list. The percent
    /// never decreases within a job.
    pub fn update(&self, message: impl Into<String>, progress: Option<u8>, segment: Option<Segment>) {
        let mut state = self.inner.lock().unwrap();
        state.message = message.into();
        if let Some(p) = progress {
            state.progress = state.progress.max(p.min(100));
        }
        if let Some(s) = segment {
            state.segments.push(s);
        }
        tracing::debug!(
            "Progress update: {} - {}%",
            state.message,
            state.progress
        );
    }

    /// Mark the active job finished.
    pub fn complete(&self) {
        let mut state = self.inner.lock().unwrap();
        state.status = JobStatus::Complete;
        state.message = "Processing complete!".to_string();
        state.progress = 100;
    }

    /// Mark the active job failed with a client-visible message.
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.inner.lock().unwrap();
        state.status = JobStatus::Error;
        state.message = message.into();
    }

    /// Return to the initial idle state. Idempotent.
    pub fn reset(&self) {
        let mut state = self.inner.lock().unwrap();
        *state = ProgressSnapshot::initial();
    }

    /// Current state for read-only consumption.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.lock().unwrap().clone()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
