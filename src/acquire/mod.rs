use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::config::AcquisitionConfig;
use crate::progress::ProgressTracker;
use crate::utils;
use crate::{Result, ScribeError};

/// One video inside a resolved playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub url: String,
    pub title: String,
}

/// Resolves source URLs into downloadable items and fetches their audio.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Expand a playlist URL into its member videos. A URL without playlist
    /// structure yields a single entry describing itself. Failure yields an
    /// empty list with the reason logged; callers treat empty as "no videos
    /// found".
    async fn resolve_playlist(&self, url: &str) -> Vec<PlaylistEntry>;

    /// Fetch best-available audio transcoded to mp3, written to a
    /// collision-free timestamped filename. Returns the local path and the
    /// video title.
    async fn download(&self, url: &str) -> Result<(PathBuf, String)>;
}

/// yt-dlp backed media source with retry over alternate egress routes.
pub struct YtDlpSource {
    yt_dlp_path: String,
    temp_folder: PathBuf,
    config: AcquisitionConfig,
    progress: Arc<ProgressTracker>,
}

const BOT_CHECK_MARKER: &str = "Sign in to confirm you're not a bot";

/// Remap the upstream bot-verification error to something actionable.
fn remap_download_error(raw: &str) -> String {
    if raw.contains(BOT_CHECK_MARKER) {
        "YouTube is requiring verification. Please try uploading a file directly \
         instead of using a URL, or try a different video."
            .to_string()
    } else {
        raw.to_string()
    }
}

/// Parse `yt-dlp --flat-playlist --dump-json` output: one JSON object per
/// line, one line per video. A plain video URL produces a single object.
fn parse_playlist_output(source_url: &str, stdout: &str) -> Vec<PlaylistEntry> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .enumerate()
        .map(|(idx, info)| {
            let url = info["url"]
                .as_str()
                .or_else(|| info["webpage_url"].as_str())
                .map(|s| s.to_string())
                .or_else(|| {
                    info["id"]
                        .as_str()
                        .map(|id| format!("https://www.youtube.com/watch?v={}", id))
                })
                .unwrap_or_else(|| source_url.to_string());

            let title = info["title"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string())
                .unwrap_or_else(|| format!("Video {}", idx + 1));

            PlaylistEntry { url, title }
        })
        .collect()
}

impl YtDlpSource {
    pub fn new(
        temp_folder: PathBuf,
        config: AcquisitionConfig,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            temp_folder,
            config,
            progress,
        }
    }

    fn cookie_args(&self) -> Vec<String> {
        if let Some(path) = &self.config.cookies_path {
            vec!["--cookies".to_string(), path.to_string_lossy().into_owned()]
        } else if let Some(browser) = &self.config.cookies_browser {
            vec!["--cookies-from-browser".to_string(), browser.clone()]
        } else {
            Vec::new()
        }
    }

    /// Ordered download attempts: each configured proxy route, or one direct
    /// attempt when none are configured.
    fn routes(&self) -> Vec<Option<String>> {
        if self.config.proxy_routes.is_empty() {
            vec![None]
        } else {
            self.config.proxy_routes.iter().cloned().map(Some).collect()
        }
    }

    /// Fetch the video title, reusing the egress route that worked for the
    /// download.
    async fn video_title(&self, url: &str, route: Option<&str>) -> Option<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--skip-download".to_string(),
        ];
        args.extend(self.cookie_args());
        if let Some(proxy) = route {
            args.push("--proxy".to_string());
            args.push(proxy.to_string());
        }
        args.push(url.to_string());

        let output = Command::new(&self.yt_dlp_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let info: Value = serde_json::from_slice(&output.stdout).ok()?;
        info["title"].as_str().map(|t| t.to_string())
    }

    /// One download attempt through one route. Validates the produced file,
    /// falling back to a timestamp-prefix scan when yt-dlp picked a different
    /// extension along the way.
    async fn attempt_download(
        &self,
        url: &str,
        route: Option<&str>,
        base_name: &str,
    ) -> Result<PathBuf> {
        let output_template = self.temp_folder.join(format!("{}.%(ext)s", base_name));

        let mut args = vec![
            "--output".to_string(),
            output_template.to_string_lossy().into_owned(),
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            "mp3".to_string(),
            "--format".to_string(),
            "bestaudio/best".to_string(),
            "--no-playlist".to_string(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout_secs.to_string(),
            "--retries".to_string(),
            self.config.retries_per_route.to_string(),
            "--newline".to_string(),
        ];
        args.extend(self.cookie_args());
        if let Some(proxy) = route {
            tracing::info!("Using proxy route: {}", proxy);
            args.push("--proxy".to_string());
            args.push(proxy.to_string());
        }
        args.push(url.to_string());

        let output = Command::new(&self.yt_dlp_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp failed: {}", error);
        }

        let expected = self.temp_folder.join(format!("{}.mp3", base_name));
        let audio_file = if expected.exists() {
            expected
        } else {
            tracing::warn!("Expected file missing, scanning for: {}", base_name);
            self.find_by_prefix(base_name)?
        };

        let size = fs_err::metadata(&audio_file)?.len();
        if size == 0 {
            anyhow::bail!("Downloaded file is empty: {}", audio_file.display());
        }

        tracing::info!(
            "Download complete: {} ({})",
            audio_file.display(),
            utils::format_file_size(size)
        );

        Ok(audio_file)
    }

    /// Locate an alternate output file matching the attempt's unique prefix.
    fn find_by_prefix(&self, base_name: &str) -> Result<PathBuf> {
        for entry in fs_err::read_dir(&self.temp_folder)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(base_name) {
                return Ok(entry.path());
            }
        }
        anyhow::bail!("Downloaded file not found: {}", base_name)
    }
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn resolve_playlist(&self, url: &str) -> Vec<PlaylistEntry> {
        tracing::info!("Extracting videos from playlist: {}", url);
        self.progress.update("Analyzing playlist...", Some(0), None);

        let mut args = vec![
            "--flat-playlist".to_string(),
            "--dump-json".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.cookie_args());
        args.push(url.to_string());

        let output = match Command::new(&self.yt_dlp_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Error extracting playlist info: {}", e);
                self.progress
                    .update(format!("Error getting playlist: {}", e), None, None);
                return Vec::new();
            }
        };

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            tracing::error!("Error extracting playlist info: {}", error);
            self.progress
                .update(format!("Error getting playlist: {}", error), None, None);
            return Vec::new();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let videos = parse_playlist_output(url, &stdout);
        tracing::info!("Found {} videos in playlist", videos.len());
        videos
    }

    async fn download(&self, url: &str) -> Result<(PathBuf, String)> {
        if url.is_empty() {
            return Err(ScribeError::InvalidRequest("No URL provided".to_string()).into());
        }

        tracing::info!("Starting download from URL: {}", url);
        self.progress.update("Starting download...", Some(0), None);

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let unique = &uuid::Uuid::new_v4().to_string()[..8];
        let base_name = format!("audio_{}_{}", timestamp, unique);

        let routes = self.routes();
        let total = routes.len();
        let mut last_error: Option<String> = None;

        for (idx, route) in routes.iter().enumerate() {
            self.progress.update(
                format!("Trying route {}/{}...", idx + 1, total),
                Some(10),
                None,
            );

            match self
                .attempt_download(url, route.as_deref(), &base_name)
                .await
            {
                Ok(audio_file) => {
                    tracing::info!("Download successful on route {}/{}", idx + 1, total);
                    self.progress
                        .update("Download complete, processing audio...", Some(35), None);

                    let title = self
                        .video_title(url, route.as_deref())
                        .await
                        .unwrap_or_else(|| "Unknown Video".to_string());

                    return Ok((audio_file, title));
                }
                Err(e) => {
                    tracing::error!("Download error on route {}/{}: {}", idx + 1, total, e);
                    last_error = Some(e.to_string());
                    continue;
                }
            }
        }

        let message = match last_error {
            Some(raw) if raw.contains(BOT_CHECK_MARKER) => remap_download_error(&raw),
            Some(raw) => format!(
                "All download routes failed. Please try uploading the file directly instead. \
                 Last error: {}",
                raw
            ),
            None => "All download routes failed".to_string(),
        };

        self.progress
            .update(format!("Error downloading audio: {}", message), None, None);
        Err(ScribeError::DownloadFailed(message).into())
    }
}
