use anyhow::{Context, Result};
use aws_config::Region;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage backend configuration
    pub storage: StorageConfig,

    /// Audio acquisition settings
    pub acquisition: AcquisitionConfig,

    /// Application settings
    pub app: AppConfig,
}

/// Which storage backend is in effect. Selected once at startup; the pipeline
/// never branches on this again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Active backend
    pub backend: BackendKind,

    /// Upload staging folder (local backend)
    pub upload_folder: PathBuf,

    /// Temporary audio folder, used as scratch space by both backends
    pub temp_folder: PathBuf,

    /// Final transcripts folder (local backend)
    pub transcripts_folder: PathBuf,

    /// S3 settings (only consulted when backend = s3)
    pub s3: S3Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// AWS region
    pub region: String,

    /// Bucket holding audio and transcripts
    pub bucket: String,

    /// Key prefix for stored audio
    pub audio_prefix: String,

    /// Key prefix for stored transcripts
    pub transcript_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Ordered list of proxy routes to try for downloads. Empty means a single
    /// direct attempt.
    pub proxy_routes: Vec<String>,

    /// Netscape cookie file forwarded to yt-dlp
    pub cookies_path: Option<PathBuf>,

    /// Browser to pull cookies from (yt-dlp --cookies-from-browser)
    pub cookies_browser: Option<String>,

    /// Per-attempt socket timeout in seconds
    pub socket_timeout_secs: u64,

    /// yt-dlp internal retries per attempt
    pub retries_per_route: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// File extensions accepted for upload batches
    pub allowed_extensions: Vec<String>,

    /// Whisper model name passed to the engine
    pub whisper_model: String,

    /// Transcription language (None = auto-detect)
    pub language: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                backend: BackendKind::Local,
                upload_folder: PathBuf::from("uploads"),
                temp_folder: PathBuf::from("temp_audio"),
                transcripts_folder: PathBuf::from("transcripts"),
                s3: S3Config {
                    region: "us-east-1".to_string(),
                    bucket: String::new(),
                    audio_prefix: "audio".to_string(),
                    transcript_prefix: "transcripts".to_string(),
                },
            },
            acquisition: AcquisitionConfig {
                proxy_routes: Vec::new(),
                cookies_path: None,
                cookies_browser: None,
                socket_timeout_secs: 30,
                retries_per_route: 2,
            },
            app: AppConfig {
                allowed_extensions: ["mp3", "mp4", "wav", "avi", "mov", "mkv", "m4a"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                whisper_model: "base".to_string(),
                language: Some("en".to_string()),
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("mediascribe").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.backend == BackendKind::S3 && self.storage.s3.bucket.is_empty() {
            anyhow::bail!("S3 bucket must be configured when the s3 backend is selected");
        }

        if self.app.allowed_extensions.is_empty() {
            anyhow::bail!("At least one allowed file extension must be configured");
        }

        Region::new(self.storage.s3.region.clone());

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Backend: {:?}", self.storage.backend);
        println!("  Upload Folder: {}", self.storage.upload_folder.display());
        println!("  Temp Folder: {}", self.storage.temp_folder.display());
        println!(
            "  Transcripts Folder: {}",
            self.storage.transcripts_folder.display()
        );
        if self.storage.backend == BackendKind::S3 {
            println!("  S3 Region: {}", self.storage.s3.region);
            println!("  S3 Bucket: {}", self.storage.s3.bucket);
        }
        println!(
            "  Proxy Routes: {}",
            if self.acquisition.proxy_routes.is_empty() {
                "(direct)".to_string()
            } else {
                self.acquisition.proxy_routes.join(", ")
            }
        );
        println!(
            "  Allowed Extensions: {}",
            self.app.allowed_extensions.join(", ")
        );
        println!("  Whisper Model: {}", self.app.whisper_model);
    }

    /// Get AWS region
    pub fn aws_region(&self) -> Region {
        Region::new(self.storage.s3.region.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, BackendKind::Local);
        assert!(config.app.allowed_extensions.contains(&"mp3".to_string()));
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let mut config = Config::default();
        config.storage.backend = BackendKind::S3;
        assert!(config.validate().is_err());

        config.storage.s3.bucket = "my-bucket".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.storage.backend, config.storage.backend);
        assert_eq!(parsed.app.allowed_extensions, config.app.allowed_extensions);
    }
}
