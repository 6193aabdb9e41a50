use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{BackendKind, Config};
use crate::Result;

pub mod local;
pub mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

/// Where the transcriber writes its artifact before persistence, and whether
/// that staging copy is disposable afterwards.
#[derive(Debug, Clone)]
pub struct StagingPolicy {
    pub dir: PathBuf,
    pub transient: bool,
}

/// Capability interface over blob storage.
///
/// One implementation is selected at startup from configuration and injected
/// into the pipeline; orchestration logic never branches on which backend is
/// active. `fetch` and `delete` are deliberately infallible at the signature
/// level: absence and I/O errors are distinguished only in logs, both yield
/// `false`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist bytes under a logical folder, returning a locator that `fetch`
    /// and `delete` accept later. The local backend returns a filesystem
    /// path, the remote backend a public URL.
    async fn save(&self, data: &[u8], folder: &str, filename: &str) -> Result<String>;

    /// Materialize a local copy of a stored blob. Returns false when the blob
    /// is absent or the copy fails; never panics past this boundary.
    async fn fetch(&self, locator: &str, local_path: &Path) -> bool;

    /// Best-effort idempotent delete. Returns false on failure but never
    /// raises past this boundary.
    async fn delete(&self, locator: &str) -> bool;

    /// Produce a local working copy of a just-saved blob for processing,
    /// using `scratch_dir` if a download is needed. The local backend hands
    /// back the stored path itself; the remote backend downloads into
    /// scratch. Either way the path lives under the temp layout and is
    /// disposable once the job ends.
    async fn working_copy(
        &self,
        locator: &str,
        scratch_dir: &Path,
        filename: &str,
    ) -> Result<PathBuf>;

    /// Where transcript artifacts are staged before persistence.
    fn transcript_staging(&self) -> StagingPolicy;

    /// Delete every completed transcript still held by the backend (cancel
    /// support). Remote transcripts are already delivered and are left alone.
    async fn purge_transcripts(&self) -> usize;

    /// Logical folder for incoming audio
    fn audio_folder(&self) -> String;

    /// Logical folder for final transcripts
    fn transcript_folder(&self) -> String;

    /// Locator for a transcript by filename
    fn transcript_locator(&self, filename: &str) -> String;

    /// Short name for logging
    fn backend_name(&self) -> &'static str;
}

/// Build the configured backend. `flush_local` clears and recreates the local
/// folder layout, which job-submitting entry points do once at startup.
pub async fn from_config(config: &Config, flush_local: bool) -> Result<Arc<dyn StorageBackend>> {
    match config.storage.backend {
        BackendKind::Local => {
            let storage = LocalStorage::new(&config.storage, flush_local)?;
            Ok(Arc::new(storage))
        }
        BackendKind::S3 => {
            let storage = S3Storage::new(config).await?;
            Ok(Arc::new(storage))
        }
    }
}
