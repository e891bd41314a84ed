use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::StreamerError;

/// Stream attributes of a media file, as reported by ffprobe.
///
/// A default (all-zero) value means "unknown": the file was missing or the
/// probe failed. Callers treat unknown media as needing normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub video_codec: String,
    pub pix_fmt: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
    pub audio_codec: String,
    pub audio_rate: u32,
    pub duration_secs: f64,
}

impl MediaInfo {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Probe a media file. Never fails: any problem yields an empty `MediaInfo`.
pub async fn probe(ffprobe_path: &Path, file: &Path) -> MediaInfo {
    if !file.is_file() {
        return MediaInfo::default();
    }
    match probe_json(ffprobe_path, file).await {
        Ok(raw) => parse_probe_output(&raw),
        Err(e) => {
            debug!(file = %file.display(), error = %e, "probe failed, treating media as unknown");
            MediaInfo::default()
        }
    }
}

async fn probe_json(ffprobe_path: &Path, file: &Path) -> Result<serde_json::Value, StreamerError> {
    let output = tokio::process::Command::new(ffprobe_path)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(file)
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| StreamerError::Probe(format!("spawn failed: {e}")))?;

    if !output.status.success() || output.stdout.is_empty() {
        return Err(StreamerError::Probe(format!(
            "exit status {}",
            output.status
        )));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| StreamerError::Probe(format!("parse JSON: {e}")))
}

/// Extract the first video and first audio stream from ffprobe JSON.
pub fn parse_probe_output(raw: &serde_json::Value) -> MediaInfo {
    let mut info = MediaInfo {
        duration_secs: raw
            .get("format")
            .and_then(|f| f.get("duration"))
            .and_then(json_f64)
            .unwrap_or(0.0),
        ..Default::default()
    };

    let streams = raw
        .get("streams")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut seen_video = false;
    for s in streams {
        let codec_type = s.get("codec_type").and_then(|v| v.as_str()).unwrap_or("");
        let codec = s
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        match codec_type {
            "video" if !seen_video => {
                seen_video = true;
                info.video_codec = codec;
                info.pix_fmt = s
                    .get("pix_fmt")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                info.width = s.get("width").and_then(json_u32).unwrap_or(0);
                info.height = s.get("height").and_then(json_u32).unwrap_or(0);
                info.fps = s
                    .get("r_frame_rate")
                    .and_then(|v| v.as_str())
                    .map(parse_fraction)
                    .unwrap_or(0.0);
            }
            "audio" if !info.has_audio => {
                info.has_audio = true;
                info.audio_codec = codec;
                info.audio_rate = s.get("sample_rate").and_then(json_u32).unwrap_or(0);
            }
            _ => {}
        }
    }

    info
}

/// Parse an ffprobe rational (`30000/1001`) or plain number. Malformed input is 0.
pub fn parse_fraction(s: &str) -> f64 {
    let parsed = if let Some((num, den)) = s.split_once('/') {
        match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
            (Ok(n), Ok(d)) if d != 0.0 => Some(n / d),
            _ => None,
        }
    } else {
        s.trim().parse::<f64>().ok()
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

// ffprobe reports some numbers as JSON strings ("44100") and others as numbers.
fn json_u32(v: &serde_json::Value) -> Option<u32> {
    match v {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_probe_json() {
        let json = serde_json::json!({
            "format": {
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "duration": "12.480000"
            },
            "streams": [
                {
                    "index": 0,
                    "codec_type": "video",
                    "codec_name": "h264",
                    "pix_fmt": "yuv420p",
                    "width": 1280,
                    "height": 720,
                    "r_frame_rate": "30000/1001"
                },
                {
                    "index": 1,
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "sample_rate": "48000",
                    "channels": 2
                },
                {
                    "index": 2,
                    "codec_type": "audio",
                    "codec_name": "mp3",
                    "sample_rate": "44100"
                }
            ]
        });

        let info = parse_probe_output(&json);
        assert_eq!(info.video_codec, "h264");
        assert_eq!(info.pix_fmt, "yuv420p");
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert!(info.has_audio);
        assert_eq!(info.audio_codec, "aac");
        assert_eq!(info.audio_rate, 48000);
        assert!((info.duration_secs - 12.48).abs() < 0.001);
        assert!(!info.is_empty());
    }

    #[test]
    fn parse_video_only() {
        let json = serde_json::json!({
            "format": { "duration": "3.0" },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "hevc",
                    "pix_fmt": "yuv420p10le",
                    "width": 3840,
                    "height": 2160,
                    "r_frame_rate": "60/1"
                }
            ]
        });

        let info = parse_probe_output(&json);
        assert_eq!(info.video_codec, "hevc");
        assert!((info.fps - 60.0).abs() < 0.001);
        assert!(!info.has_audio);
        assert_eq!(info.audio_codec, "");
        assert_eq!(info.audio_rate, 0);
    }

    #[test]
    fn malformed_fields_degrade_to_zero() {
        let json = serde_json::json!({
            "format": { "duration": "N/A" },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "r_frame_rate": "0/0",
                    "width": "wide"
                },
                { "codec_type": "audio", "sample_rate": "fast" }
            ]
        });

        let info = parse_probe_output(&json);
        assert_eq!(info.fps, 0.0);
        assert_eq!(info.width, 0);
        assert_eq!(info.duration_secs, 0.0);
        assert!(info.has_audio);
        assert_eq!(info.audio_rate, 0);
    }

    #[test]
    fn empty_object_is_unknown_media() {
        assert!(parse_probe_output(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn parse_fraction_works() {
        assert!((parse_fraction("24000/1001") - 23.976).abs() < 0.01);
        assert!((parse_fraction("30") - 30.0).abs() < 0.001);
        assert_eq!(parse_fraction("0/0"), 0.0);
        assert_eq!(parse_fraction("abc/1"), 0.0);
        assert_eq!(parse_fraction(""), 0.0);
    }

    #[tokio::test]
    async fn missing_file_probes_empty() {
        let info = probe(
            Path::new("/usr/bin/ffprobe"),
            Path::new("/nonexistent/printcast/intro.mp4"),
        )
        .await;
        assert!(info.is_empty());
    }
}
