#![allow(clippy::collapsible_if)]
pub mod command;
pub mod controller;
pub mod fifo;
pub mod moonraker;
pub mod normalize;
pub mod probe;
pub mod process;
pub mod session;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use controller::{AutoSettings, PrintMonitor, SessionControl, StatusSource};
pub use normalize::{MediaLibrary, MediaRole, PreparedMedia};
pub use session::{Orchestrator, StartOutcome, StopOutcome, StopTimings, StreamerStatus};

#[derive(Error, Debug)]
pub enum StreamerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("ffprobe failed: {0}")]
    Probe(String),
    #[error("failed to spawn {role}: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("status query failed: {0}")]
    Status(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Target parameters every segment is encoded to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingProfile {
    #[serde(rename = "v_codec")]
    pub video_codec: String,
    pub pix_fmt: String,
    /// 0 keeps the source width.
    pub width: u32,
    /// 0 keeps the source height.
    pub height: u32,
    pub fps: u32,
    #[serde(rename = "a_codec")]
    pub audio_codec: String,
    #[serde(rename = "a_rate")]
    pub audio_rate: u32,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            video_codec: "h264".into(),
            pix_fmt: "yuv420p".into(),
            width: 0,
            height: 0,
            fps: 30,
            audio_codec: "aac".into(),
            audio_rate: 44100,
        }
    }
}

impl EncodingProfile {
    pub fn has_resolution(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// GOP length: two seconds of frames.
    pub fn keyframe_interval(&self) -> u32 {
        self.fps * 2
    }
}

/// Parse a `WIDTHxHEIGHT` string. Empty or malformed input yields `(0, 0)`.
pub fn parse_resolution(res: &str) -> (u32, u32) {
    let res = res.trim().to_ascii_lowercase();
    let Some((w, h)) = res.split_once('x') else {
        return (0, 0);
    };
    match (w.trim().parse::<u32>(), h.trim().parse::<u32>()) {
        (Ok(w), Ok(h)) => (w, h),
        _ => (0, 0),
    }
}

/// Encoder knobs shared by the feeder, main and normalization encodes.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub video_encoder: String,
    pub audio_encoder: String,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    pub preset: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            video_encoder: "libx264".into(),
            audio_encoder: "aac".into(),
            video_bitrate: "2500k".into(),
            audio_bitrate: "128k".into(),
            preset: "veryfast".into(),
        }
    }
}

/// Text burned into the live segment.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    pub enabled: bool,
    pub text: String,
    pub font: PathBuf,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            text: "Printing".into(),
            font: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
        }
    }
}

/// Streamer configuration.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub webcam_url: String,
    pub rtmp_url: String,
    pub bg_music_file: Option<PathBuf>,
    pub intro_video: Option<PathBuf>,
    pub outro_video: Option<PathBuf>,
    pub intro_enabled: bool,
    pub outro_enabled: bool,
    pub enabled: bool,
    pub profile: EncodingProfile,
    pub encoder: EncoderSettings,
    pub overlay: OverlayConfig,
    pub cache_dir: PathBuf,
    pub ffmpeg_log_path: PathBuf,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("/usr/bin/ffmpeg"),
            ffprobe_path: PathBuf::from("/usr/bin/ffprobe"),
            webcam_url: String::new(),
            rtmp_url: String::new(),
            bg_music_file: None,
            intro_video: None,
            outro_video: None,
            intro_enabled: false,
            outro_enabled: false,
            enabled: true,
            profile: EncodingProfile::default(),
            encoder: EncoderSettings::default(),
            overlay: OverlayConfig::default(),
            cache_dir: PathBuf::from("/tmp/rtmp_streamer_cache"),
            ffmpeg_log_path: PathBuf::from("/tmp/rtmp_streamer_ffmpeg.log"),
        }
    }
}

impl StreamerConfig {
    /// Named pipe carrying the live segment from feeder to main.
    pub fn fifo_path(&self) -> PathBuf {
        self.cache_dir.join("live_segment.ts")
    }

    pub fn validate(&self) -> Result<(), StreamerError> {
        if self.webcam_url.trim().is_empty() || self.rtmp_url.trim().is_empty() {
            return Err(StreamerError::Config(
                "webcam_url and rtmp_url are required".into(),
            ));
        }
        Ok(())
    }
}
