use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

use super::{SpeechEngine, SpeechOutput, SpeechSegment};
use crate::Result;

/// Whisper CLI output format
#[derive(Debug, Deserialize)]
struct WhisperJson {
    text: String,
    segments: Vec<WhisperJsonSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperJsonSegment {
    start: f64,
    end: f64,
    text: String,
}

fn parse_whisper_json(content: &str) -> Result<SpeechOutput> {
    let parsed: WhisperJson =
        serde_json::from_str(content).map_err(|e| anyhow::anyhow!("Invalid whisper output: {}", e))?;

    Ok(SpeechOutput {
        text: parsed.text.trim().to_string(),
        segments: parsed
            .segments
            .into_iter()
            .map(|s| SpeechSegment {
                start: s.start,
                end: s.end,
                text: s.text,
            })
            .collect(),
    })
}

/// Speech engine shelling out to the whisper CLI.
pub struct WhisperEngine {
    whisper_path: String,
    model: String,
    language: Option<String>,
}

impl WhisperEngine {
    pub fn new(model: String, language: Option<String>) -> Self {
        Self {
            whisper_path: "whisper".to_string(),
            model,
            language,
        }
    }

    /// Check if whisper is available
    pub async fn check_availability(&self) -> Result<bool> {
        let output = Command::new(&self.whisper_path)
            .arg("--help")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Ok(output.map(|o| o.status.success()).unwrap_or(false))
    }
}

#[async_trait]
impl SpeechEngine for WhisperEngine {
    async fn transcribe(&self, audio_path: &Path) -> Result<SpeechOutput> {
        // Whisper writes its JSON next to other output formats; give it a
        // scratch directory so nothing leaks into the working tree.
        let output_dir = TempDir::new()?;

        let mut args = vec![
            audio_path.to_string_lossy().into_owned(),
            "--model".to_string(),
            self.model.clone(),
            "--output_format".to_string(),
            "json".to_string(),
            "--output_dir".to_string(),
            output_dir.path().to_string_lossy().into_owned(),
            "--fp16".to_string(),
            "False".to_string(),
        ];
        if let Some(language) = &self.language {
            args.push("--language".to_string());
            args.push(language.clone());
        }

        tracing::debug!("Running whisper on: {}", audio_path.display());

        let output = Command::new(&self.whisper_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("whisper failed: {}", error);
        }

        let stem = audio_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let json_path = output_dir.path().join(format!("{}.json", stem));
        let content = fs_err::read_to_string(&json_path)?;

        parse_whisper_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whisper_json() {
        let content = r#"{
            "text": " hello world ",
            "segments": [
                {"id": 0, "start": 0.0, "end": 1.5, "text": " hello"},
                {"id": 1, "start": 1.5, "end": 3.0, "text": " world"}
            ],
            "language": "en"
        }"#;

        let output = parse_whisper_json(content).unwrap();
        assert_eq!(output.text, "hello world");
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[0].start, 0.0);
        assert_eq!(output.segments[1].end, 3.0);
    }

    #[test]
    fn test_parse_whisper_json_rejects_garbage() {
        assert!(parse_whisper_json("not json").is_err());
        assert!(parse_whisper_json(r#"{"text": "x"}"#).is_err());
    }
}
