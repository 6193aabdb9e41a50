use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use std::path::{Path, PathBuf};
use url::Url;

use super::{StagingPolicy, StorageBackend};
use crate::config::Config;
use crate::Result;

/// Object-store backed storage.
///
/// `save` uploads under `folder/filename`, makes the object publicly readable
/// and returns its public URL as the locator. `fetch` and `delete` accept that
/// URL or a bare key; a public http(s) locator outside our bucket is fetched
/// over plain HTTP.
pub struct S3Storage {
    client: S3Client,
    http: reqwest::Client,
    bucket: String,
    region: String,
    audio_prefix: String,
    transcript_prefix: String,
    temp_folder: PathBuf,
}

/// What a locator resolves to
#[derive(Debug, PartialEq, Eq)]
enum Locator {
    /// An object key in our bucket
    Key(String),
    /// A public URL somewhere else
    Foreign(String),
}

fn parse_locator(bucket: &str, region: &str, locator: &str) -> Locator {
    if !locator.starts_with("http://") && !locator.starts_with("https://") {
        return Locator::Key(locator.trim_start_matches('/').to_string());
    }

    let parsed = match Url::parse(locator) {
        Ok(url) => url,
        Err(_) => return Locator::Foreign(locator.to_string()),
    };

    let our_hosts = [
        format!("{}.s3.{}.amazonaws.com", bucket, region),
        format!("{}.s3.amazonaws.com", bucket),
    ];

    match parsed.host_str() {
        Some(host) if our_hosts.iter().any(|h| h == host) => {
            let path = parsed.path().trim_start_matches('/');
            let key = urlencoding::decode(path)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| path.to_string());
            Locator::Key(key)
        }
        _ => Locator::Foreign(locator.to_string()),
    }
}

/// MIME type for uploaded objects, by extension
fn content_type_for(filename: &str) -> &'static str {
    match Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("aac") => "audio/mp4",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

impl S3Storage {
    pub async fn new(config: &Config) -> Result<Self> {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(config.aws_region())
            .load()
            .await;

        let client = S3Client::new(&aws_config);

        let storage = Self {
            client,
            http: reqwest::Client::new(),
            bucket: config.storage.s3.bucket.clone(),
            region: config.storage.s3.region.clone(),
            audio_prefix: config.storage.s3.audio_prefix.clone(),
            transcript_prefix: config.storage.s3.transcript_prefix.clone(),
            temp_folder: config.storage.temp_folder.clone(),
        };

        fs_err::create_dir_all(&storage.temp_folder)?;

        Ok(storage)
    }

    fn public_url(&self, key: &str) -> String {
        let encoded = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, encoded
        )
    }

    async fn fetch_key(&self, key: &str, local_path: &Path) -> bool {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match response {
            Ok(output) => output,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    tracing::info!("Object not found: {}", key);
                } else {
                    tracing::error!("Error downloading {}: {}", key, service_error);
                }
                return false;
            }
        };

        let bytes = match output.body.collect().await {
            Ok(data) => data.into_bytes(),
            Err(e) => {
                tracing::error!("Error reading object body for {}: {}", key, e);
                return false;
            }
        };

        match tokio::fs::write(local_path, &bytes).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Error writing {}: {}", local_path.display(), e);
                false
            }
        }
    }

    /// Stream a foreign public URL to disk
    async fn fetch_url(&self, url: &str, local_path: &Path) -> bool {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Error fetching {}: {}", url, e);
                return false;
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::info!("Object not found: {}", url);
            return false;
        }
        if !response.status().is_success() {
            tracing::error!("Error fetching {}: HTTP {}", url, response.status());
            return false;
        }

        let mut file = match fs_err::File::create(local_path) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!("Error creating {}: {}", local_path.display(), e);
                return false;
            }
        };

        use futures_util::StreamExt;
        use std::io::Write;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::error!("Error streaming {}: {}", url, e);
                    return false;
                }
            };
            if let Err(e) = file.write_all(&chunk) {
                tracing::error!("Error writing {}: {}", local_path.display(), e);
                return false;
            }
        }

        true
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn save(&self, data: &[u8], folder: &str, filename: &str) -> Result<String> {
        let key = format!("{}/{}", folder.trim_end_matches('/'), filename);

        tracing::info!("Uploading to S3: s3://{}/{}", self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(data.to_vec().into())
            .content_type(content_type_for(filename))
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .with_context(|| format!("Failed to upload s3://{}/{}", self.bucket, key))?;

        Ok(self.public_url(&key))
    }

    async fn fetch(&self, locator: &str, local_path: &Path) -> bool {
        match parse_locator(&self.bucket, &self.region, locator) {
            Locator::Key(key) => self.fetch_key(&key, local_path).await,
            Locator::Foreign(url) => self.fetch_url(&url, local_path).await,
        }
    }

    async fn delete(&self, locator: &str) -> bool {
        let key = match parse_locator(&self.bucket, &self.region, locator) {
            Locator::Key(key) => key,
            Locator::Foreign(url) => {
                tracing::warn!("Refusing to delete foreign locator: {}", url);
                return false;
            }
        };

        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Error deleting s3://{}/{}: {}", self.bucket, key, e);
                false
            }
        }
    }

    async fn working_copy(
        &self,
        locator: &str,
        scratch_dir: &Path,
        filename: &str,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(scratch_dir).await?;
        let local_path = scratch_dir.join(filename);

        if !self.fetch(locator, &local_path).await {
            anyhow::bail!("Failed to download from storage: {}", locator);
        }

        Ok(local_path)
    }

    fn transcript_staging(&self) -> StagingPolicy {
        // Staged transcripts are scratch copies; the uploaded object is the
        // stored one.
        StagingPolicy {
            dir: self.temp_folder.clone(),
            transient: true,
        }
    }

    async fn purge_transcripts(&self) -> usize {
        // Remote transcripts are already delivered through their public URLs;
        // cancel leaves them in place.
        tracing::debug!("Cancel requested; remote transcripts left in place");
        0
    }

    fn audio_folder(&self) -> String {
        self.audio_prefix.clone()
    }

    fn transcript_folder(&self) -> String {
        self.transcript_prefix.clone()
    }

    fn transcript_locator(&self, filename: &str) -> String {
        format!("{}/{}", self.transcript_prefix.trim_end_matches('/'), filename)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
