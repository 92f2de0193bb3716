use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hls_offline::{Codec, SelectionOptions};

#[derive(Parser, Debug)]
#[command(name = "hls-offline", author, version, about, long_about = None)]
pub struct Args {
    /// Root directory for downloaded items
    #[arg(long, global = true, env = "HLS_OFFLINE_STORAGE")]
    pub storage: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true, env = "HLS_OFFLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum concurrent transfers per item
    #[arg(long, global = true, env = "HLS_OFFLINE_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// SQLite database URL [default: sqlite://<storage>/hls-offline.db]
    #[arg(long, global = true, env = "HLS_OFFLINE_DATABASE")]
    pub database: Option<String>,

    /// Write daily rotated log files into this directory
    #[arg(long, global = true, env = "HLS_OFFLINE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download an asset and wait until it is playable offline
    Fetch {
        /// Multi-variant playlist URL
        url: String,

        /// Item id; derived from the URL when omitted
        #[arg(long)]
        id: Option<String>,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Continue a paused or interrupted download
    Resume { id: String },

    /// List every stored item
    List,

    /// Delete an item and its files
    Remove { id: String },

    /// Show the streams that would be downloaded, without downloading
    Info {
        url: String,

        #[command(flatten)]
        selection: SelectionArgs,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Audio languages, comma separated
    #[arg(long, value_delimiter = ',', conflicts_with = "all_audio")]
    pub audio: Vec<String>,

    /// Download every audio rendition
    #[arg(long)]
    pub all_audio: bool,

    /// Subtitle languages, comma separated
    #[arg(long, value_delimiter = ',', conflicts_with = "all_text")]
    pub text: Vec<String>,

    /// Download every subtitle rendition
    #[arg(long)]
    pub all_text: bool,

    /// Minimum video width
    #[arg(long)]
    pub width: Option<u64>,

    /// Minimum video height
    #[arg(long)]
    pub height: Option<u64>,

    /// Minimum AVC bitrate in bits per second
    #[arg(long)]
    pub avc1_bitrate: Option<u64>,

    /// Minimum HEVC bitrate in bits per second
    #[arg(long)]
    pub hevc_bitrate: Option<u64>,

    /// Allow codecs the host only decodes in software
    #[arg(long)]
    pub allow_inefficient_codecs: bool,
}

impl SelectionArgs {
    pub fn to_options(&self) -> SelectionOptions {
        let mut options = SelectionOptions::new();

        if self.all_audio {
            options = options.with_all_audio_languages();
        } else if !self.audio.is_empty() {
            options = options.with_audio_languages(self.audio.iter().cloned());
        }
        if self.all_text {
            options = options.with_all_text_languages();
        } else if !self.text.is_empty() {
            options = options.with_text_languages(self.text.iter().cloned());
        }

        if let Some(width) = self.width {
            options = options.with_video_width(width);
        }
        if let Some(height) = self.height {
            options = options.with_video_height(height);
        }
        if let Some(bitrate) = self.avc1_bitrate {
            options = options.with_video_bitrate(Codec::Avc1, bitrate);
        }
        if let Some(bitrate) = self.hevc_bitrate {
            options = options.with_video_bitrate(Codec::Hevc, bitrate);
        }

        options.with_allow_inefficient_codecs(self.allow_inefficient_codecs)
    }
}
