use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mediascribe",
    about = "Mediascribe - Transcribe uploaded media, videos, and playlists with Whisper",
    version,
    long_about = "A CLI pipeline for transcribing audio from uploaded media files, single video \
                  URLs, or whole playlists. Audio is fetched with yt-dlp, transcribed locally \
                  with Whisper, and transcripts are persisted to local storage or S3."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe one or more local media files
    Upload {
        /// Media files to transcribe, processed in order
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,
    },

    /// Transcribe a single video from a URL
    Video {
        /// Video URL (YouTube or anything yt-dlp understands)
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Transcribe every video in a playlist
    Playlist {
        /// Playlist URL
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Download a stored transcript by filename
    Fetch {
        /// Transcript filename as reported by a previous run
        #[arg(value_name = "FILENAME")]
        filename: String,

        /// Write to this path instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Reset job state and purge locally stored transcripts
    Cancel,

    /// Configure storage and transcription settings
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}
