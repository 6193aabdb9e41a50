use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{StagingPolicy, StorageBackend};
use crate::config::StorageConfig;
use crate::Result;

/// Filesystem-backed storage.
///
/// Three independent folders: upload staging, temporary audio, and final
/// transcripts. Locators are plain paths.
pub struct LocalStorage {
    upload_folder: PathBuf,
    temp_folder: PathBuf,
    transcripts_folder: PathBuf,
}

impl LocalStorage {
    pub fn new(config: &StorageConfig, flush: bool) -> Result<Self> {
        let storage = Self {
            upload_folder: config.upload_folder.clone(),
            temp_folder: config.temp_folder.clone(),
            transcripts_folder: config.transcripts_folder.clone(),
        };

        if flush {
            storage.flush_folders()?;
        } else {
            storage.ensure_folders()?;
        }

        Ok(storage)
    }

    fn folders(&self) -> [&Path; 3] {
        [
            &self.upload_folder,
            &self.temp_folder,
            &self.transcripts_folder,
        ]
    }

    fn ensure_folders(&self) -> Result<()> {
        for folder in self.folders() {
            fs_err::create_dir_all(folder)?;
        }
        Ok(())
    }

    /// Remove and recreate the folder layout. Runs once at the start of a
    /// job-submitting process; also clears a stray nested temp folder left
    /// behind by an interrupted download.
    fn flush_folders(&self) -> Result<()> {
        for folder in self.folders() {
            if folder.exists() {
                fs_err::remove_dir_all(folder)?;
            }
            fs_err::create_dir_all(folder)?;
            tracing::info!("Created folder: {}", folder.display());
        }

        let nested_temp = self.temp_folder.join(
            self.temp_folder
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("temp_audio")),
        );
        if nested_temp.exists() {
            fs_err::remove_dir_all(&nested_temp)?;
        }

        Ok(())
    }

    /// The temp folder doubles as scratch space for downloads.
    pub fn temp_folder(&self) -> &Path {
        &self.temp_folder
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn save(&self, data: &[u8], folder: &str, filename: &str) -> Result<String> {
        let folder_path = Path::new(folder);
        tokio::fs::create_dir_all(folder_path).await?;

        let local_path = folder_path.join(filename);
        tokio::fs::write(&local_path, data).await?;

        Ok(local_path.to_string_lossy().into_owned())
    }

    async fn fetch(&self, locator: &str, local_path: &Path) -> bool {
        let source = Path::new(locator);
        if !source.exists() {
            tracing::info!("File not found: {}", locator);
            return false;
        }

        // Copying a file onto itself would truncate it
        if source == local_path {
            return true;
        }

        match tokio::fs::copy(source, local_path).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Error copying file {}: {}", locator, e);
                false
            }
        }
    }

    async fn delete(&self, locator: &str) -> bool {
        match tokio::fs::remove_file(locator).await {
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::error!("Error deleting local file {}: {}", locator, e);
                false
            }
        }
    }

    async fn working_copy(
        &self,
        locator: &str,
        _scratch_dir: &Path,
        _filename: &str,
    ) -> Result<PathBuf> {
        // The stored path is already local; process it in place.
        Ok(PathBuf::from(locator))
    }

    fn transcript_staging(&self) -> StagingPolicy {
        // Staged transcripts land directly in their final folder and survive
        // the job.
        StagingPolicy {
            dir: self.transcripts_folder.clone(),
            transient: false,
        }
    }

    async fn purge_transcripts(&self) -> usize {
        let mut deleted = 0;

        let mut entries = match tokio::fs::read_dir(&self.transcripts_folder).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Error listing transcripts folder: {}", e);
                return 0;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            tracing::info!("Deleting file: {}", path.display());
            match tokio::fs::remove_file(&path).await {
                Ok(_) => deleted += 1,
                Err(e) => tracing::error!("Error deleting file {}: {}", path.display(), e),
            }
        }

        deleted
    }

    fn audio_folder(&self) -> String {
        self.temp_folder.to_string_lossy().into_owned()
    }

    fn transcript_folder(&self) -> String {
        self.transcripts_folder.to_string_lossy().into_owned()
    }

    fn transcript_locator(&self, filename: &str) -> String {
        self.transcripts_folder
            .join(filename)
            .to_string_lossy()
            .into_owned()
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn test_storage(root: &TempDir) -> LocalStorage {
        let mut config = Config::default().storage;
        config.upload_folder = root.path().join("uploads");
        config.temp_folder = root.path().join("temp_audio");
        config.transcripts_folder = root.path().join("transcripts");
        LocalStorage::new(&config, true).unwrap()
    }

    #[test]
    fn test_save_and_fetch_round_trip() {
        let root = TempDir::new().unwrap();
        let storage = test_storage(&root);

        tokio_test::block_on(async {
            let locator = storage
                .save(b"hello", &storage.audio_folder(), "clip.mp3")
                .await
                .unwrap();
            assert!(Path::new(&locator).exists());

            let copy = root.path().join("copy.mp3");
            assert!(storage.fetch(&locator, &copy).await);
            assert_eq!(fs_err::read(&copy).unwrap(), b"hello");
        });
    }

    #[test]
    fn test_fetch_missing_returns_false() {
        let root = TempDir::new().unwrap();
        let storage = test_storage(&root);

        tokio_test::block_on(async {
            let missing = root.path().join("nope.mp3");
            let target = root.path().join("out.mp3");
            assert!(!storage.fetch(&missing.to_string_lossy(), &target).await);
            assert!(!target.exists());
        });
    }

    #[test]
    fn test_delete_is_idempotent() {
        let root = TempDir::new().unwrap();
        let storage = test_storage(&root);

        tokio_test::block_on(async {
            let locator = storage
                .save(b"bytes", &storage.audio_folder(), "a.mp3")
                .await
                .unwrap();
            assert!(storage.delete(&locator).await);
            assert!(!Path::new(&locator).exists());
            // Second delete of an absent file still succeeds
            assert!(storage.delete(&locator).await);
        });
    }

    #[test]
    fn test_working_copy_is_the_stored_path() {
        let root = TempDir::new().unwrap();
        let storage = test_storage(&root);

        tokio_test::block_on(async {
            let locator = storage
                .save(b"bytes", &storage.audio_folder(), "a.mp3")
                .await
                .unwrap();
            let copy = storage
                .working_copy(&locator, root.path(), "a.mp3")
                .await
                .unwrap();
            assert_eq!(copy, PathBuf::from(&locator));
        });
    }

    #[test]
    fn test_purge_transcripts_empties_folder() {
        let root = TempDir::new().unwrap();
        let storage = test_storage(&root);

        tokio_test::block_on(async {
            storage
                .save(b"one", &storage.transcript_folder(), "a.txt")
                .await
                .unwrap();
            storage
                .save(b"two", &storage.transcript_folder(), "b.txt")
                .await
                .unwrap();

            assert_eq!(storage.purge_transcripts().await, 2);
            assert_eq!(storage.purge_transcripts().await, 0);
        });
    }

    #[test]
    fn test_flush_recreates_folders() {
        let root = TempDir::new().unwrap();
        let storage = test_storage(&root);

        tokio_test::block_on(async {
            storage
                .save(b"stale", &storage.transcript_folder(), "old.txt")
                .await
                .unwrap();
        });

        // A fresh flush wipes prior contents
        let mut config = Config::default().storage;
        config.upload_folder = root.path().join("uploads");
        config.temp_folder = root.path().join("temp_audio");
        config.transcripts_folder = root.path().join("transcripts");
        let storage = LocalStorage::new(&config, true).unwrap();

        let entries: Vec<_> = fs_err::read_dir(storage.transcript_folder())
            .unwrap()
            .collect();
        assert!(entries.is_empty());
    }
}
