//! Startup configuration from `PRINTCAST_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use printcast_streamer::{AutoSettings, StreamerConfig, parse_resolution};
use tracing::warn;

const PREFIX: &str = "PRINTCAST_";

/// Which external integrations are wired up at startup.
#[derive(Debug, Clone)]
pub struct Integrations {
    /// Base URL of the Moonraker API; `None` disables the print monitor.
    pub moonraker_url: Option<String>,
    pub http_bind: String,
}

impl Default for Integrations {
    fn default() -> Self {
        Self {
            moonraker_url: None,
            http_bind: "0.0.0.0:7126".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub streamer: StreamerConfig,
    pub auto: AutoSettings,
    pub integrations: Integrations,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from `lookup`, which maps full variable names to values.
    ///
    /// Unset or empty variables keep their defaults; so do values that fail to
    /// parse (with a warning).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Lookup { get: &lookup };
        let mut s = Settings::default();

        let c = &mut s.streamer;
        env.path("FFMPEG_PATH", &mut c.ffmpeg_path);
        env.path("FFPROBE_PATH", &mut c.ffprobe_path);
        env.string("WEBCAM_URL", &mut c.webcam_url);
        env.string("RTMP_URL", &mut c.rtmp_url);
        c.bg_music_file = env.opt_path("BG_MUSIC_FILE");
        c.intro_video = env.opt_path("INTRO_VIDEO");
        c.outro_video = env.opt_path("OUTRO_VIDEO");
        env.flag("INTRO_ENABLED", &mut c.intro_enabled);
        env.flag("OUTRO_ENABLED", &mut c.outro_enabled);
        env.flag("ENABLED", &mut c.enabled);
        env.path("CACHE_DIR", &mut c.cache_dir);
        env.path("FFMPEG_LOG", &mut c.ffmpeg_log_path);

        env.string("VIDEO_BITRATE", &mut c.encoder.video_bitrate);
        env.string("AUDIO_BITRATE", &mut c.encoder.audio_bitrate);
        env.string("PRESET", &mut c.encoder.preset);

        env.number("FPS", &mut c.profile.fps);
        env.number("AUDIO_RATE", &mut c.profile.audio_rate);
        if let Some(res) = env.value("RESOLUTION") {
            (c.profile.width, c.profile.height) = parse_resolution(&res);
        }

        env.flag("OVERLAY_ENABLED", &mut c.overlay.enabled);
        env.string("OVERLAY_TEXT", &mut c.overlay.text);
        env.path("OVERLAY_FONT", &mut c.overlay.font);

        let a = &mut s.auto;
        env.flag("AUTOSTART", &mut a.autostart);
        env.flag("AUTOSTOP", &mut a.autostop);
        env.seconds("STOP_DELAY", &mut a.stop_delay, false);
        env.seconds("POLL_INTERVAL", &mut a.poll_interval, true);

        s.integrations.moonraker_url = env.value("MOONRAKER_URL");
        env.string("BIND", &mut s.integrations.http_bind);

        s
    }
}

struct Lookup<'a> {
    get: &'a dyn Fn(&str) -> Option<String>,
}

impl Lookup<'_> {
    /// Trimmed, non-empty value of `PRINTCAST_<name>`.
    fn value(&self, name: &str) -> Option<String> {
        (self.get)(&format!("{PREFIX}{name}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, slot: &mut String) {
        if let Some(v) = self.value(name) {
            *slot = v;
        }
    }

    fn opt_path(&self, name: &str) -> Option<PathBuf> {
        self.value(name).map(|v| self.expand_home(&v))
    }

    fn path(&self, name: &str, slot: &mut PathBuf) {
        if let Some(p) = self.opt_path(name) {
            *slot = p;
        }
    }

    fn flag(&self, name: &str, slot: &mut bool) {
        let Some(v) = self.value(name) else {
            return;
        };
        match parse_flag(&v) {
            Some(b) => *slot = b,
            None => warn!(var = %format!("{PREFIX}{name}"), value = %v, "not a boolean, keeping default"),
        }
    }

    fn number<T: std::str::FromStr>(&self, name: &str, slot: &mut T) {
        let Some(v) = self.value(name) else {
            return;
        };
        match v.parse() {
            Ok(n) => *slot = n,
            Err(_) => warn!(var = %format!("{PREFIX}{name}"), value = %v, "not a number, keeping default"),
        }
    }

    fn seconds(&self, name: &str, slot: &mut Duration, positive: bool) {
        let mut secs = slot.as_secs_f64();
        self.number(name, &mut secs);
        let valid = secs.is_finite() && if positive { secs > 0.0 } else { secs >= 0.0 };
        if valid {
            *slot = Duration::from_secs_f64(secs);
        } else {
            warn!(var = %format!("{PREFIX}{name}"), secs, "out of range, keeping default");
        }
    }

    /// Expand a leading `~` from `HOME`.
    fn expand_home(&self, raw: &str) -> PathBuf {
        let rest = match raw.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return PathBuf::from(raw),
        };
        match (self.get)("HOME").filter(|h| !h.is_empty()) {
            Some(home) => PathBuf::from(format!("{home}{rest}")),
            None => PathBuf::from(raw),
        }
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let s = settings(&[]);
        assert_eq!(s.streamer.ffmpeg_path, PathBuf::from("/usr/bin/ffmpeg"));
        assert!(s.streamer.webcam_url.is_empty());
        assert!(s.streamer.enabled);
        assert!(!s.streamer.intro_enabled);
        assert_eq!(s.streamer.profile.fps, 30);
        assert_eq!((s.streamer.profile.width, s.streamer.profile.height), (0, 0));
        assert!(s.auto.autostart && s.auto.autostop);
        assert_eq!(s.auto.stop_delay, Duration::from_secs(30));
        assert_eq!(s.auto.poll_interval, Duration::from_secs(3));
        assert_eq!(s.integrations.moonraker_url, None);
        assert_eq!(s.integrations.http_bind, "0.0.0.0:7126");
    }

    #[test]
    fn reads_prefixed_variables() {
        let s = settings(&[
            ("PRINTCAST_WEBCAM_URL", "http://127.0.0.1/webcam/?action=stream"),
            ("PRINTCAST_RTMP_URL", " rtmp://a.rtmp.youtube.com/live2/key "),
            ("PRINTCAST_RESOLUTION", "1280x720"),
            ("PRINTCAST_FPS", "25"),
            ("PRINTCAST_INTRO_ENABLED", "yes"),
            ("PRINTCAST_OVERLAY_ENABLED", "off"),
            ("PRINTCAST_OVERLAY_TEXT", "Layer: 12"),
            ("PRINTCAST_STOP_DELAY", "5"),
            ("PRINTCAST_POLL_INTERVAL", "0.5"),
            ("PRINTCAST_MOONRAKER_URL", "http://127.0.0.1:7125"),
            ("PRINTCAST_BIND", "127.0.0.1:9000"),
        ]);
        let c = &s.streamer;
        assert_eq!(c.rtmp_url, "rtmp://a.rtmp.youtube.com/live2/key");
        assert_eq!((c.profile.width, c.profile.height, c.profile.fps), (1280, 720, 25));
        assert!(c.intro_enabled);
        assert!(!c.overlay.enabled);
        assert_eq!(c.overlay.text, "Layer: 12");
        assert_eq!(s.auto.stop_delay, Duration::from_secs(5));
        assert_eq!(s.auto.poll_interval, Duration::from_millis(500));
        assert_eq!(s.integrations.moonraker_url.as_deref(), Some("http://127.0.0.1:7125"));
        assert_eq!(s.integrations.http_bind, "127.0.0.1:9000");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let s = settings(&[
            ("PRINTCAST_FPS", "thirty"),
            ("PRINTCAST_ENABLED", "maybe"),
            ("PRINTCAST_POLL_INTERVAL", "0"),
            ("PRINTCAST_STOP_DELAY", "-4"),
            ("PRINTCAST_RESOLUTION", "hd"),
        ]);
        assert_eq!(s.streamer.profile.fps, 30);
        assert!(s.streamer.enabled);
        assert_eq!(s.auto.poll_interval, Duration::from_secs(3));
        assert_eq!(s.auto.stop_delay, Duration::from_secs(30));
        assert_eq!((s.streamer.profile.width, s.streamer.profile.height), (0, 0));
    }

    #[test]
    fn zero_stop_delay_is_allowed() {
        let s = settings(&[("PRINTCAST_STOP_DELAY", "0")]);
        assert_eq!(s.auto.stop_delay, Duration::ZERO);
    }

    #[test]
    fn tilde_expands_from_home() {
        let s = settings(&[
            ("HOME", "/home/pi"),
            ("PRINTCAST_INTRO_VIDEO", "~/timelapse/intro.mp4"),
            ("PRINTCAST_CACHE_DIR", "~"),
            ("PRINTCAST_BG_MUSIC_FILE", "~other/music.mp3"),
            ("PRINTCAST_OUTRO_VIDEO", "   "),
        ]);
        let c = &s.streamer;
        assert_eq!(c.intro_video, Some(PathBuf::from("/home/pi/timelapse/intro.mp4")));
        assert_eq!(c.cache_dir, PathBuf::from("/home/pi"));
        assert_eq!(c.bg_music_file, Some(PathBuf::from("~other/music.mp3")));
        assert_eq!(c.outro_video, None);
    }
}
