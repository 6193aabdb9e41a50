use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::acquire::{MediaSource, PlaylistEntry};
use crate::progress::ProgressTracker;
use crate::storage::StorageBackend;
use crate::transcribe::{TranscriptDraft, Transcriber};
use crate::utils;
use crate::{Result, ScribeError};

/// One uploaded file as received from the client
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// One successfully transcribed item
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptRecord {
    pub title: String,
    pub text: String,
    pub path: String,
    pub filename: String,
}

/// A file skipped during an upload batch
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

/// A playlist entry skipped during playlist processing
#[derive(Debug, Clone, Serialize)]
pub struct SkippedVideo {
    pub url: String,
    pub title: String,
    pub reason: String,
}

/// Aggregate result of a batch or playlist job
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub status: String,
    pub message: String,
    pub transcripts: Vec<TranscriptRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_files: Option<Vec<SkippedFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_videos: Option<Vec<SkippedVideo>>,
}

/// Result of a single-video job
#[derive(Debug, Serialize)]
pub struct VideoReport {
    pub status: String,
    pub message: String,
    pub transcript: String,
    pub filename: String,
    pub transcript_path: String,
}

/// Filesystem paths created during a job that must not outlive it.
///
/// Every transient path is registered at creation time; `cleanup` runs on
/// every exit path and attempts each deletion independently, logging failures
/// without letting them mask the job's outcome.
struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    fn register(&mut self, path: PathBuf) {
        tracing::debug!("Registered temp artifact: {}", path.display());
        self.paths.push(path);
    }

    async fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            if !path.exists() {
                continue;
            }
            tracing::info!("Deleting temp file: {}", path.display());
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::error!("Error deleting temp file {}: {}", path.display(), e);
            }
        }
    }
}

/// Drives the acquisition, transcription and persistence of one job at a
/// time, tracking progress and tolerating per-item failures.
pub struct JobOrchestrator {
    storage: Arc<dyn StorageBackend>,
    source: Arc<dyn MediaSource>,
    transcriber: Transcriber,
    progress: Arc<ProgressTracker>,
    allowed_extensions: Vec<String>,
    scratch_dir: PathBuf,
}

impl JobOrchestrator {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        source: Arc<dyn MediaSource>,
        transcriber: Transcriber,
        progress: Arc<ProgressTracker>,
        allowed_extensions: Vec<String>,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            storage,
            source,
            transcriber,
            progress,
            allowed_extensions,
            scratch_dir,
        }
    }

    pub fn tracker(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Process an ordered batch of uploaded files. A single file's failure is
    /// recorded and skipped; the job only fails if every file does.
    pub async fn run_upload_batch(&self, files: Vec<UploadedFile>) -> Result<BatchReport> {
        if files.is_empty() || files.iter().all(|f| f.filename.is_empty()) {
            return Err(ScribeError::InvalidRequest("No files detected".to_string()).into());
        }

        self.progress.begin("Starting upload processing...")?;

        let mut temp = TempArtifacts::new();
        let result = self.upload_batch_inner(&files, &mut temp).await;
        temp.cleanup().await;

        if let Err(e) = &result {
            self.progress.fail(format!("Error: {}", e));
        }
        result
    }

    async fn upload_batch_inner(
        &self,
        files: &[UploadedFile],
        temp: &mut TempArtifacts,
    ) -> Result<BatchReport> {
        let total = files.len();
        let mut transcripts = Vec::new();
        let mut skipped = Vec::new();
        let mut processed = 0usize;

        for (idx, file) in files.iter().enumerate() {
            tracing::info!("===== Processing file {}/{}: {} =====", idx + 1, total, file.filename);

            if !utils::allowed_file(&file.filename, &self.allowed_extensions) {
                tracing::error!("File type not allowed: {}", file.filename);
                skipped.push(SkippedFile {
                    name: file.filename.clone(),
                    reason: "Unsupported file type".to_string(),
                });
                continue;
            }

            self.progress.update(
                format!("Processing file {}/{}: {}", idx + 1, total, file.filename),
                Some((processed * 100 / total) as u8),
                None,
            );

            match self.process_upload(file, temp).await {
                Ok(record) => {
                    transcripts.push(record);
                    processed += 1;
                    tracing::info!("Successfully processed file {}/{}", idx + 1, total);
                }
                Err(e) => {
                    tracing::error!("Error processing file {}: {}", file.filename, e);
                    skipped.push(SkippedFile {
                        name: file.filename.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if transcripts.is_empty() {
            let mut message = "No files were successfully transcribed".to_string();
            if !skipped.is_empty() {
                message.push_str(&format!(". {} files were skipped.", skipped.len()));
            }
            return Err(ScribeError::NoItemsSucceeded(message).into());
        }

        self.progress.update("Processing complete!", Some(100), None);
        self.progress.complete();

        Ok(BatchReport {
            status: "success".to_string(),
            message: "Processing complete".to_string(),
            transcripts,
            skipped_files: (!skipped.is_empty()).then_some(skipped),
            skipped_videos: None,
        })
    }

    async fn process_upload(
        &self,
        file: &UploadedFile,
        temp: &mut TempArtifacts,
    ) -> Result<TranscriptRecord> {
        let filename = utils::sanitize_filename(&file.filename);

        let stored_audio = self
            .storage
            .save(&file.bytes, &self.storage.audio_folder(), &filename)
            .await?;
        tracing::info!("Audio saved to storage at: {}", stored_audio);

        let working_path = self
            .storage
            .working_copy(&stored_audio, &self.scratch_dir, &filename)
            .await?;
        temp.register(working_path.clone());

        let draft = self
            .transcriber
            .transcribe_audio(&working_path, &format!("Uploaded file: {}", filename))
            .await?;

        self.persist_transcript(draft, filename, temp).await
    }

    /// Transcribe a single remote video. Unlike batch flows there is only one
    /// item, so any failure aborts the whole job.
    pub async fn run_single_video(&self, url: &str) -> Result<VideoReport> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ScribeError::InvalidRequest("No URL provided".to_string()).into());
        }

        self.progress.begin("Starting download...")?;

        let mut temp = TempArtifacts::new();
        let result = self.single_video_inner(url, &mut temp).await;
        temp.cleanup().await;

        if let Err(e) = &result {
            self.progress.fail(format!("Error: {}", e));
        }
        result
    }

    async fn single_video_inner(
        &self,
        url: &str,
        temp: &mut TempArtifacts,
    ) -> Result<VideoReport> {
        tracing::info!("Processing URL: {}", url);

        let record = self
            .process_remote_audio(url, None, temp)
            .await?;

        self.progress.update("Processing complete!", Some(100), None);
        self.progress.complete();

        Ok(VideoReport {
            status: "success".to_string(),
            message: "Processing complete".to_string(),
            transcript: record.text,
            filename: record.filename,
            transcript_path: record.path,
        })
    }

    /// Transcribe every video in a playlist, in order, with per-entry
    /// failures recorded as skips.
    pub async fn run_playlist(&self, url: &str) -> Result<BatchReport> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ScribeError::InvalidRequest("No URL provided".to_string()).into());
        }

        self.progress.begin("Analyzing playlist...")?;

        let mut temp = TempArtifacts::new();
        let result = self.playlist_inner(url, &mut temp).await;
        temp.cleanup().await;

        if let Err(e) = &result {
            self.progress.fail(format!("Error: {}", e));
        }
        result
    }

    async fn playlist_inner(
        &self,
        url: &str,
        temp: &mut TempArtifacts,
    ) -> Result<BatchReport> {
        tracing::info!("Processing playlist URL: {}", url);

        let videos = self.source.resolve_playlist(url).await;
        if videos.is_empty() {
            return Err(
                ScribeError::InvalidRequest("No videos found in playlist".to_string()).into(),
            );
        }

        self.progress.update(
            format!("Found {} videos in playlist", videos.len()),
            Some(10),
            None,
        );

        let total = videos.len();
        let mut transcripts = Vec::new();
        let mut skipped = Vec::new();

        for (idx, video) in videos.iter().enumerate() {
            self.progress.update(
                format!("Processing video {}/{}: {}", idx + 1, total, video.title),
                None,
                None,
            );

            match self.process_playlist_entry(video, temp).await {
                Ok(record) => transcripts.push(record),
                Err(e) => {
                    tracing::error!("Error processing video {}: {}", idx + 1, e);
                    skipped.push(SkippedVideo {
                        url: video.url.clone(),
                        title: video.title.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if transcripts.is_empty() {
            let mut message = "No videos were successfully transcribed".to_string();
            if !skipped.is_empty() {
                message.push_str(&format!(". {} videos were skipped.", skipped.len()));
            }
            return Err(ScribeError::NoItemsSucceeded(message).into());
        }

        tracing::info!("Playlist processing completed successfully");
        self.progress.update("Processing complete!", Some(100), None);
        self.progress.complete();

        Ok(BatchReport {
            status: "success".to_string(),
            message: "Playlist processing complete".to_string(),
            transcripts,
            skipped_files: None,
            skipped_videos: (!skipped.is_empty()).then_some(skipped),
        })
    }

    async fn process_playlist_entry(
        &self,
        video: &PlaylistEntry,
        temp: &mut TempArtifacts,
    ) -> Result<TranscriptRecord> {
        self.process_remote_audio(&video.url, Some(&video.title), temp)
            .await
    }

    /// The shared acquire -> persist audio -> transcribe -> persist transcript
    /// body used by both the single-video and playlist flows.
    async fn process_remote_audio(
        &self,
        url: &str,
        fallback_title: Option<&str>,
        temp: &mut TempArtifacts,
    ) -> Result<TranscriptRecord> {
        let (audio_file, title) = self.source.download(url).await?;
        temp.register(audio_file.clone());

        let title = if title.is_empty() {
            fallback_title.unwrap_or("Unknown Video").to_string()
        } else {
            title
        };
        tracing::info!("Download completed - Audio file: {}, Title: {}", audio_file.display(), title);

        let audio_bytes = tokio::fs::read(&audio_file).await?;
        let audio_filename = audio_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Downloaded file has no name"))?
            .to_string();

        let stored_audio = self
            .storage
            .save(&audio_bytes, &self.storage.audio_folder(), &audio_filename)
            .await?;
        tracing::info!("Audio saved to storage at: {}", stored_audio);

        let draft = self
            .transcriber
            .transcribe_audio(&audio_file, &format!("Video: {}\nURL: {}", title, url))
            .await?;

        self.persist_transcript(draft, title, temp).await
    }

    /// Persist a staged transcript to the backend and turn it into a result
    /// record. A transient staging copy joins the temp artifact set.
    async fn persist_transcript(
        &self,
        draft: TranscriptDraft,
        title: String,
        temp: &mut TempArtifacts,
    ) -> Result<TranscriptRecord> {
        let transcript_filename = draft
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Transcript artifact has no name"))?
            .to_string();

        let content = tokio::fs::read(&draft.path).await?;
        let stored_path = self
            .storage
            .save(&content, &self.storage.transcript_folder(), &transcript_filename)
            .await?;
        tracing::info!("Transcript saved to storage at: {}", stored_path);

        if draft.transient {
            temp.register(draft.path.clone());
        }

        Ok(TranscriptRecord {
            title,
            text: draft.text,
            path: stored_path,
            filename: transcript_filename,
        })
    }

    /// Reset progress and purge any completed-but-unclaimed transcripts.
    /// Idempotent; does not interrupt an in-flight acquisition or
    /// transcription call.
    pub async fn cancel(&self) -> usize {
        self.progress.reset();
        let purged = self.storage.purge_transcripts().await;
        tracing::info!("Transcription canceled; {} transcripts purged", purged);
        purged
    }

    /// Fetch a stored transcript's raw bytes, or None when it does not exist
    /// on the active backend.
    pub async fn fetch_transcript(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let safe_filename = utils::sanitize_filename(filename);
        let locator = self.storage.transcript_locator(&safe_filename);

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let scratch = self.scratch_dir.join(format!("fetch_{}", safe_filename));

        if !self.storage.fetch(&locator, &scratch).await {
            return Ok(None);
        }

        let bytes = tokio::fs::read(&scratch).await?;
        let _ = tokio::fs::remove_file(&scratch).await;
        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::MockMediaSource;
    use crate::config::Config;
    use crate::progress::JobStatus;
    use crate::storage::LocalStorage;
    use crate::transcribe::{MockSpeechEngine, SpeechOutput, SpeechSegment};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        orchestrator: JobOrchestrator,
        progress: Arc<ProgressTracker>,
        temp_audio: PathBuf,
        transcripts: PathBuf,
    }

    fn fixture(root: &TempDir, source: MockMediaSource, engine: MockSpeechEngine) -> Fixture {
        let mut storage_config = Config::default().storage;
        storage_config.upload_folder = root.path().join("uploads");
        storage_config.temp_folder = root.path().join("temp_audio");
        storage_config.transcripts_folder = root.path().join("transcripts");

        let storage: Arc<dyn StorageBackend> =
            Arc::new(LocalStorage::new(&storage_config, true).unwrap());
        let progress = Arc::new(ProgressTracker::new());
        let transcriber = Transcriber::new(
            Arc::new(engine),
            Arc::clone(&progress),
            storage.transcript_staging(),
        );

        let orchestrator = JobOrchestrator::new(
            Arc::clone(&storage),
            Arc::new(source),
            transcriber,
            Arc::clone(&progress),
            Config::default().app.allowed_extensions,
            storage_config.temp_folder.clone(),
        );

        Fixture {
            orchestrator,
            progress,
            temp_audio: storage_config.temp_folder,
            transcripts: storage_config.transcripts_folder,
        }
    }

    fn speech_output(text: &str) -> SpeechOutput {
        SpeechOutput {
            text: text.to_string(),
            segments: vec![SpeechSegment {
                start: 0.0,
                end: 2.0,
                text: text.to_string(),
            }],
        }
    }

    fn engine_ok() -> MockSpeechEngine {
        let mut engine = MockSpeechEngine::new();
        engine
            .expect_transcribe()
            .returning(|path| Ok(speech_output(&format!("transcript of {}", path.display()))));
        engine
    }

    fn upload(name: &str) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            bytes: b"fake audio bytes".to_vec(),
        }
    }

    fn dir_entries(dir: &PathBuf) -> Vec<String> {
        fs_err::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_upload_batch_all_succeed() {
        let root = TempDir::new().unwrap();
        let fx = fixture(&root, MockMediaSource::new(), engine_ok());

        let report = fx
            .orchestrator
            .run_upload_batch(vec![upload("first.mp3"), upload("second.wav")])
            .await
            .unwrap();

        assert_eq!(report.status, "success");
        assert_eq!(report.transcripts.len(), 2);
        assert!(report.skipped_files.is_none());
        // Results preserve submission order
        assert_eq!(report.transcripts[0].title, "first.mp3");
        assert_eq!(report.transcripts[1].title, "second.wav");

        let snap = fx.progress.snapshot();
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(snap.progress, 100);

        // Audio working copies are gone, transcripts survive
        assert!(dir_entries(&fx.temp_audio).is_empty());
        assert_eq!(dir_entries(&fx.transcripts).len(), 2);
    }

    #[tokio::test]
    async fn test_upload_batch_skips_disallowed_extension() {
        let root = TempDir::new().unwrap();
        let fx = fixture(&root, MockMediaSource::new(), engine_ok());

        let report = fx
            .orchestrator
            .run_upload_batch(vec![upload("talk.mp3"), upload("notes.txt")])
            .await
            .unwrap();

        assert_eq!(report.transcripts.len(), 1);
        let skipped = report.skipped_files.unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name, "notes.txt");
        assert_eq!(skipped[0].reason, "Unsupported file type");
    }

    #[tokio::test]
    async fn test_upload_batch_fails_when_every_file_fails() {
        let root = TempDir::new().unwrap();
        let mut engine = MockSpeechEngine::new();
        engine
            .expect_transcribe()
            .returning(|_| Err(anyhow::anyhow!("engine down")));
        let fx = fixture(&root, MockMediaSource::new(), engine);

        let err = fx
            .orchestrator
            .run_upload_batch(vec![upload("a.mp3"), upload("b.mp3")])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("No files were successfully transcribed"));
        assert!(err.to_string().contains("2 files were skipped"));
        assert_eq!(fx.progress.snapshot().status, JobStatus::Error);
        // Cleanup ran on the failure path too
        assert!(dir_entries(&fx.temp_audio).is_empty());
    }

    #[tokio::test]
    async fn test_upload_batch_rejects_empty_request() {
        let root = TempDir::new().unwrap();
        let fx = fixture(&root, MockMediaSource::new(), MockSpeechEngine::new());

        let err = fx.orchestrator.run_upload_batch(vec![]).await.unwrap_err();
        let scribe = err.downcast_ref::<ScribeError>().unwrap();
        assert!(scribe.is_client_error());

        // Client errors leave job state untouched
        assert_eq!(fx.progress.snapshot().status, JobStatus::Idle);
    }

    fn source_downloading_into(dir: PathBuf) -> MockMediaSource {
        let mut source = MockMediaSource::new();
        source.expect_download().returning(move |_| {
            let name = format!("audio_{}.mp3", &uuid::Uuid::new_v4().to_string()[..8]);
            let path = dir.join(name);
            fs_err::create_dir_all(&dir).unwrap();
            fs_err::write(&path, b"downloaded audio").unwrap();
            Ok((path, "Some Talk".to_string()))
        });
        source
    }

    #[tokio::test]
    async fn test_single_video_success() {
        let root = TempDir::new().unwrap();
        let source = source_downloading_into(root.path().join("temp_audio"));
        let fx = fixture(&root, source, engine_ok());

        let report = fx
            .orchestrator
            .run_single_video("https://example.com/watch?v=abc")
            .await
            .unwrap();

        assert_eq!(report.status, "success");
        assert!(report.filename.ends_with("_transcript.txt"));
        assert!(!report.transcript.is_empty());

        assert_eq!(fx.progress.snapshot().status, JobStatus::Complete);
        // Downloaded audio removed, transcript kept (local staging is final)
        assert!(dir_entries(&fx.temp_audio).is_empty());
        assert_eq!(dir_entries(&fx.transcripts).len(), 1);
    }

    #[tokio::test]
    async fn test_single_video_download_failure_is_fatal() {
        let root = TempDir::new().unwrap();
        let mut source = MockMediaSource::new();
        source
            .expect_download()
            .returning(|_| Err(anyhow::anyhow!("All download routes failed")));
        let fx = fixture(&root, source, MockSpeechEngine::new());

        let err = fx
            .orchestrator
            .run_single_video("https://example.com/watch?v=abc")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("All download routes failed"));

        let snap = fx.progress.snapshot();
        assert_eq!(snap.status, JobStatus::Error);
        assert!(snap.message.contains("All download routes failed"));

        // No transcript artifact was created
        assert!(dir_entries(&fx.transcripts).is_empty());
        assert!(dir_entries(&fx.temp_audio).is_empty());
    }

    #[tokio::test]
    async fn test_single_video_rejects_empty_url() {
        let root = TempDir::new().unwrap();
        let fx = fixture(&root, MockMediaSource::new(), MockSpeechEngine::new());

        let err = fx.orchestrator.run_single_video("   ").await.unwrap_err();
        let scribe = err.downcast_ref::<ScribeError>().unwrap();
        assert!(scribe.is_client_error());
        assert_eq!(fx.progress.snapshot().status, JobStatus::Idle);
    }

    fn playlist_of(n: usize) -> Vec<PlaylistEntry> {
        (1..=n)
            .map(|i| PlaylistEntry {
                url: format!("https://example.com/watch?v=vid{}", i),
                title: format!("Video {}", i),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_playlist_partial_failure_produces_skips() {
        let root = TempDir::new().unwrap();

        let mut source = source_downloading_into(root.path().join("temp_audio"));
        source
            .expect_resolve_playlist()
            .returning(|_| playlist_of(3));

        // Second transcription fails, the rest succeed
        let calls = Mutex::new(0usize);
        let mut engine = MockSpeechEngine::new();
        engine.expect_transcribe().returning(move |path| {
            let mut calls = calls.lock().unwrap();
            *calls += 1;
            if *calls == 2 {
                Err(anyhow::anyhow!("decode error"))
            } else {
                Ok(speech_output(&format!("transcript of {}", path.display())))
            }
        });

        let fx = fixture(&root, source, engine);
        let report = fx
            .orchestrator
            .run_playlist("https://example.com/playlist?list=xyz")
            .await
            .unwrap();

        assert_eq!(report.status, "success");
        assert_eq!(report.transcripts.len(), 2);
        let skipped = report.skipped_videos.unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].url, "https://example.com/watch?v=vid2");
        assert!(skipped[0].reason.contains("decode error"));

        assert_eq!(fx.progress.snapshot().status, JobStatus::Complete);
        assert!(dir_entries(&fx.temp_audio).is_empty());
    }

    #[tokio::test]
    async fn test_playlist_with_no_videos_is_a_client_error() {
        let root = TempDir::new().unwrap();
        let mut source = MockMediaSource::new();
        source.expect_resolve_playlist().returning(|_| Vec::new());
        let fx = fixture(&root, source, MockSpeechEngine::new());

        let err = fx
            .orchestrator
            .run_playlist("https://example.com/playlist?list=empty")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No videos found in playlist"));
    }

    #[tokio::test]
    async fn test_playlist_all_entries_fail() {
        let root = TempDir::new().unwrap();
        let mut source = MockMediaSource::new();
        source
            .expect_resolve_playlist()
            .returning(|_| playlist_of(2));
        source
            .expect_download()
            .returning(|_| Err(anyhow::anyhow!("network unreachable")));
        let fx = fixture(&root, source, MockSpeechEngine::new());

        let err = fx
            .orchestrator
            .run_playlist("https://example.com/playlist?list=xyz")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No videos were successfully transcribed"));
        assert!(err.to_string().contains("2 videos were skipped"));
        assert_eq!(fx.progress.snapshot().status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_second_job_cannot_start_while_one_is_processing() {
        let root = TempDir::new().unwrap();
        let fx = fixture(&root, MockMediaSource::new(), MockSpeechEngine::new());

        fx.progress.begin("in flight").unwrap();
        let err = fx
            .orchestrator
            .run_upload_batch(vec![upload("a.mp3")])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScribeError>(),
            Some(ScribeError::JobAlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_cancel_purges_transcripts_and_is_idempotent() {
        let root = TempDir::new().unwrap();
        let fx = fixture(&root, MockMediaSource::new(), engine_ok());

        fx.orchestrator
            .run_upload_batch(vec![upload("a.mp3")])
            .await
            .unwrap();
        assert_eq!(dir_entries(&fx.transcripts).len(), 1);

        let purged = fx.orchestrator.cancel().await;
        assert_eq!(purged, 1);
        assert!(dir_entries(&fx.transcripts).is_empty());
        assert_eq!(fx.progress.snapshot().status, JobStatus::Idle);

        // Second cancel finds nothing and changes nothing
        assert_eq!(fx.orchestrator.cancel().await, 0);
        assert_eq!(fx.progress.snapshot().status, JobStatus::Idle);
    }

    #[tokio::test]
    async fn test_fetch_transcript_round_trip_and_not_found() {
        let root = TempDir::new().unwrap();
        let fx = fixture(&root, MockMediaSource::new(), engine_ok());

        let report = fx
            .orchestrator
            .run_upload_batch(vec![upload("a.mp3")])
            .await
            .unwrap();
        let filename = &report.transcripts[0].filename;

        let bytes = fx
            .orchestrator
            .fetch_transcript(filename)
            .await
            .unwrap()
            .expect("transcript should exist");
        let content = String::from_utf8(bytes).unwrap();
        assert!(content.starts_with("Source: Uploaded file: a.mp3"));

        assert!(fx
            .orchestrator
            .fetch_transcript("no_such_transcript.txt")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_progress_percent_never_decreases_during_batch() {
        let root = TempDir::new().unwrap();

        // An engine that records the percent after each item
        let fx = fixture(&root, MockMediaSource::new(), engine_ok());

        let files = vec![upload("a.mp3"), upload("b.mp3"), upload("c.mp3")];
        fx.orchestrator.run_upload_batch(files).await.unwrap();

        // The tracker clamps regressions, so the terminal snapshot is the max
        let snap = fx.progress.snapshot();
        assert_eq!(snap.progress, 100);
        assert_eq!(snap.segments.len(), 3);
    }
}
