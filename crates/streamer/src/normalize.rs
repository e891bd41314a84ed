//! Intro/outro normalization.
//!
//! Concatenation only works when every segment shares codec, pixel format,
//! resolution, frame rate and audio layout. Intro and outro clips that do not
//! match the live profile are re-encoded once into the cache directory and the
//! result is reused for as long as the source file's mtime is unchanged.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tracing::{info, warn};

use crate::command::scale_pad_filter;
use crate::probe::{self, MediaInfo};
use crate::{EncoderSettings, EncodingProfile, StreamerConfig};

/// Allowed frame-rate drift before a clip is re-encoded.
const FPS_TOLERANCE: f64 = 0.2;

/// How much of ffmpeg's stderr is kept when a transcode fails.
const STDERR_TAIL_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaRole {
    Intro,
    Outro,
}

impl MediaRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Outro => "outro",
        }
    }
}

impl std::fmt::Display for MediaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide whether a clip must be re-encoded to match `target`.
pub fn needs_normalize(info: &MediaInfo, target: &EncodingProfile) -> bool {
    if info.is_empty() || !info.has_audio {
        return true;
    }
    if info.video_codec != target.video_codec || info.pix_fmt != target.pix_fmt {
        return true;
    }
    if target.has_resolution() && (info.width != target.width || info.height != target.height) {
        return true;
    }
    if target.fps > 0 && (info.fps - f64::from(target.fps)).abs() > FPS_TOLERANCE {
        return true;
    }
    if info.audio_codec != target.audio_codec {
        return true;
    }
    if target.audio_rate != 0 && info.audio_rate != target.audio_rate {
        return true;
    }
    false
}

/// Content-addressed store of normalized clips.
#[derive(Debug, Clone)]
pub struct MediaCache {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    cache_dir: PathBuf,
    profile: EncodingProfile,
    encoder: EncoderSettings,
}

impl MediaCache {
    pub fn new(config: &StreamerConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            cache_dir: config.cache_dir.clone(),
            profile: config.profile.clone(),
            encoder: config.encoder.clone(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache file for `src` in `role`: `{role}_{stem}_{W}x{H}_{fps}fps_{mtime}.mp4`.
    pub fn normalized_path(&self, src: &Path, role: MediaRole) -> PathBuf {
        let mtime = std::fs::metadata(src)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.cache_dir.join(format!(
            "{role}_{stem}_{}x{}_{}fps_{mtime}.mp4",
            self.profile.width, self.profile.height, self.profile.fps
        ))
    }

    /// Return a path to a version of `src` matching the target profile.
    ///
    /// `None` means the clip is missing or could not be transcoded; callers
    /// leave the segment out.
    pub async fn ensure_normalized(&self, src: Option<&Path>, role: MediaRole) -> Option<PathBuf> {
        let src = src.filter(|p| p.is_file())?;

        let info = probe::probe(&self.ffprobe_path, src).await;
        if !needs_normalize(&info, &self.profile) {
            return Some(src.to_path_buf());
        }

        let out_path = self.normalized_path(src, role);
        if out_path.is_file() {
            return Some(out_path);
        }

        // Written under a scratch name and renamed on success, so a failed or
        // interrupted transcode never looks like a cache hit.
        let partial = partial_path(&out_path);
        let args = self.transcode_args(src, &partial, info.has_audio);
        info!(%role, src = %src.display(), out = %out_path.display(), "normalizing clip");

        let output = tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .output()
            .await;

        let ok = match output {
            Ok(out) if out.status.success() => true,
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                warn!(
                    %role,
                    status = %out.status,
                    "normalization failed, ffmpeg stderr tail:\n{}",
                    stderr_tail(stderr.trim(), STDERR_TAIL_CHARS)
                );
                false
            }
            Err(e) => {
                warn!(%role, error = %e, "failed to run ffmpeg for normalization");
                false
            }
        };

        if ok {
            match std::fs::rename(&partial, &out_path) {
                Ok(()) => return Some(out_path),
                Err(e) => warn!(%role, error = %e, "failed to move normalized clip into cache"),
            }
        }
        if let Err(e) = std::fs::remove_file(&partial) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(%role, path = %partial.display(), error = %e, "failed to remove partial clip");
            }
        }
        None
    }

    fn transcode_args(&self, src: &Path, out: &Path, has_audio: bool) -> Vec<String> {
        let p = &self.profile;
        let gop = p.keyframe_interval().to_string();

        let mut args: Vec<String> = vec!["-y".into(), "-i".into(), src.to_string_lossy().into_owned()];
        if !has_audio {
            args.extend([
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                format!("anullsrc=channel_layout=stereo:sample_rate={}", p.audio_rate),
            ]);
        }

        args.extend([
            "-c:v".into(),
            self.encoder.video_encoder.clone(),
            "-profile:v".into(),
            "main".into(),
            "-pix_fmt".into(),
            p.pix_fmt.clone(),
            "-r".into(),
            p.fps.to_string(),
            "-g".into(),
            gop.clone(),
            "-keyint_min".into(),
            gop,
            "-sc_threshold".into(),
            "0".into(),
            "-preset".into(),
            self.encoder.preset.clone(),
            "-b:v".into(),
            self.encoder.video_bitrate.clone(),
        ]);
        if p.has_resolution() {
            args.extend(["-vf".into(), scale_pad_filter(p.width, p.height)]);
        }

        args.extend([
            "-c:a".into(),
            self.encoder.audio_encoder.clone(),
            "-b:a".into(),
            self.encoder.audio_bitrate.clone(),
            "-ar".into(),
            p.audio_rate.to_string(),
        ]);
        if !has_audio {
            args.push("-shortest".into());
        }

        args.extend([
            "-movflags".into(),
            "+faststart".into(),
            out.to_string_lossy().into_owned(),
        ]);
        args
    }
}

/// Scratch name next to `out`; keeps the `.mp4` extension for muxer detection.
fn partial_path(out: &Path) -> PathBuf {
    let name = out
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    out.with_file_name(format!(".partial_{name}"))
}

fn stderr_tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Intro/outro paths as currently resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedMedia {
    pub intro_video: Option<PathBuf>,
    pub outro_video: Option<PathBuf>,
}

/// Result of a media preparation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedMedia {
    pub intro_video: Option<PathBuf>,
    pub outro_video: Option<PathBuf>,
    pub cache_dir: PathBuf,
}

/// Owns the resolved intro/outro paths and serializes normalization.
pub struct MediaLibrary {
    cache: MediaCache,
    guard: tokio::sync::Mutex<()>,
    resolved: Mutex<ResolvedMedia>,
}

impl MediaLibrary {
    pub fn new(config: &StreamerConfig) -> Self {
        Self {
            cache: MediaCache::new(config),
            guard: tokio::sync::Mutex::new(()),
            resolved: Mutex::new(ResolvedMedia {
                intro_video: config.intro_video.clone(),
                outro_video: config.outro_video.clone(),
            }),
        }
    }

    pub fn cache(&self) -> &MediaCache {
        &self.cache
    }

    /// Snapshot of the current paths. Never waits on a running preparation.
    pub fn resolved(&self) -> ResolvedMedia {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Normalize intro and outro, replacing the resolved paths on success.
    ///
    /// Overlapping callers queue on the media guard; later ones find the
    /// already-normalized paths and return without transcoding again.
    pub async fn prepare(&self) -> PreparedMedia {
        self.normalize().await;
        let resolved = self.resolved();
        PreparedMedia {
            intro_video: resolved.intro_video,
            outro_video: resolved.outro_video,
            cache_dir: self.cache.cache_dir.clone(),
        }
    }

    /// Run one normalization pass and return what it produced.
    ///
    /// Unlike [`resolved`](Self::resolved), a clip that failed in this pass
    /// is `None` here even if an earlier path is still on record.
    pub async fn normalize(&self) -> ResolvedMedia {
        let _guard = self.guard.lock().await;
        let current = self.resolved();

        let intro = self
            .cache
            .ensure_normalized(current.intro_video.as_deref(), MediaRole::Intro)
            .await;
        let outro = self
            .cache
            .ensure_normalized(current.outro_video.as_deref(), MediaRole::Outro)
            .await;

        let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(p) = &intro {
            resolved.intro_video = Some(p.clone());
        }
        if let Some(p) = &outro {
            resolved.outro_video = Some(p.clone());
        }

        ResolvedMedia {
            intro_video: intro,
            outro_video: outro,
        }
    }
}
