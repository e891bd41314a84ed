//! ffmpeg argument lists for the two session pipelines.
//!
//! The feeder encodes camera + audio + overlay into the FIFO as MPEG-TS. The
//! main process concatenates `[intro?] + fifo + [outro?]` and publishes a
//! single FLV stream, so the destination sees one uninterrupted connection.

use std::path::{Path, PathBuf};

use crate::StreamerConfig;

/// Network read timeout for camera and FIFO inputs, in microseconds.
const RW_TIMEOUT_US: &str = "5000000";

/// A program plus its argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    /// The full command line, space-joined, for the diagnostic log.
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Values passed to `-i`, in order.
    pub fn inputs(&self) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|w| w[0] == "-i")
            .map(|w| w[1].as_str())
            .collect()
    }

    /// Value following the first occurrence of `flag`.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Escape text for a single-quoted drawtext `text=` value.
pub fn escape_drawtext(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | ':' | '\'') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Fit inside `width`x`height` keeping aspect ratio, centered on padding.
pub fn scale_pad_filter(width: u32, height: u32) -> String {
    format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
    )
}

/// A clip is used only when requested and present on disk.
pub fn usable_segment(enabled: bool, path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| enabled && p.is_file())
}

/// Concat graph over `segments` input indices, each contributing `v:0` and `a:0`.
pub fn concat_filter(segments: &[usize]) -> String {
    let mut graph = String::new();
    for idx in segments {
        graph.push_str(&format!("[{idx}:v:0][{idx}:a:0]"));
    }
    graph.push_str(&format!("concat=n={}:v=1:a=1[v][a]", segments.len()));
    graph
}

fn encode_args(config: &StreamerConfig) -> Vec<String> {
    let p = &config.profile;
    let e = &config.encoder;
    let gop = p.keyframe_interval().to_string();
    vec![
        "-c:v".into(),
        e.video_encoder.clone(),
        "-preset".into(),
        e.preset.clone(),
        "-b:v".into(),
        e.video_bitrate.clone(),
        "-pix_fmt".into(),
        p.pix_fmt.clone(),
        "-g".into(),
        gop.clone(),
        "-keyint_min".into(),
        gop,
        "-sc_threshold".into(),
        "0".into(),
        "-r".into(),
        p.fps.to_string(),
        "-c:a".into(),
        e.audio_encoder.clone(),
        "-b:a".into(),
        e.audio_bitrate.clone(),
        "-ar".into(),
        p.audio_rate.to_string(),
    ]
}

/// Live camera (+ optional looped music) with overlay, into the FIFO.
pub fn feeder_command(config: &StreamerConfig) -> CommandLine {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "info".into(),
        "-rw_timeout".into(),
        RW_TIMEOUT_US.into(),
        "-re".into(),
        "-i".into(),
        config.webcam_url.clone(),
    ];

    // Audio comes from exactly one source; `?` keeps a silent camera from failing.
    if let Some(music) = &config.bg_music_file {
        args.extend([
            "-stream_loop".into(),
            "-1".into(),
            "-i".into(),
            music.to_string_lossy().into_owned(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0?".into(),
        ]);
    } else {
        args.extend([
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "0:a:0?".into(),
        ]);
    }

    let mut filters = Vec::new();
    if config.profile.has_resolution() {
        filters.push(scale_pad_filter(config.profile.width, config.profile.height));
    }
    if config.overlay.enabled {
        filters.push(format!(
            "drawtext=fontfile={}:text='{}':x=10:y=10:fontsize=24:fontcolor=white:box=1:boxcolor=black@0.5",
            config.overlay.font.display(),
            escape_drawtext(&config.overlay.text)
        ));
    }
    if !filters.is_empty() {
        args.extend(["-vf".into(), filters.join(",")]);
    }

    args.extend(encode_args(config));
    args.extend([
        "-f".into(),
        "mpegts".into(),
        config.fifo_path().to_string_lossy().into_owned(),
    ]);

    CommandLine {
        program: config.ffmpeg_path.clone(),
        args,
    }
}

/// `[intro] + fifo + [outro]` concatenated and published to the RTMP URL.
///
/// Pass only clips that are usable (see [`usable_segment`]); the segment
/// count in the concat graph always equals the number of inputs.
pub fn main_command(config: &StreamerConfig, intro: Option<&Path>, outro: Option<&Path>) -> CommandLine {
    let fifo = config.fifo_path();
    let mut inputs: Vec<(String, bool)> = Vec::with_capacity(3);
    if let Some(intro) = intro {
        inputs.push((intro.to_string_lossy().into_owned(), true));
    }
    inputs.push((fifo.to_string_lossy().into_owned(), false));
    if let Some(outro) = outro {
        inputs.push((outro.to_string_lossy().into_owned(), true));
    }

    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "info".into(),
        "-rw_timeout".into(),
        RW_TIMEOUT_US.into(),
    ];

    // Clips are paced with -re; the FIFO is already real time.
    for (path, paced) in &inputs {
        if *paced {
            args.push("-re".into());
        }
        args.extend(["-i".into(), path.clone()]);
    }

    let segments: Vec<usize> = (0..inputs.len()).collect();
    args.extend([
        "-filter_complex".into(),
        concat_filter(&segments),
        "-map".into(),
        "[v]".into(),
        "-map".into(),
        "[a]".into(),
    ]);
    args.extend(encode_args(config));
    args.extend(["-f".into(), "flv".into(), config.rtmp_url.clone()]);

    CommandLine {
        program: config.ffmpeg_path.clone(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EncodingProfile, OverlayConfig};

    fn config() -> StreamerConfig {
        StreamerConfig {
            ffmpeg_path: PathBuf::from("/usr/bin/ffmpeg"),
            webcam_url: "http://127.0.0.1:8080/?action=stream".into(),
            rtmp_url: "rtmp://live.example.com/app/key".into(),
            cache_dir: PathBuf::from("/tmp/pc"),
            overlay: OverlayConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn map_values(cmd: &CommandLine) -> Vec<&str> {
        cmd.args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn escape_covers_backslash_colon_quote() {
        assert_eq!(escape_drawtext(r"C:\temp"), r"C\:\\temp");
        assert_eq!(escape_drawtext("it's 50%"), r"it\'s 50%");
        assert_eq!(escape_drawtext("plain"), "plain");
    }

    #[test]
    fn overlay_text_stays_one_argument() {
        let mut cfg = config();
        cfg.overlay = OverlayConfig {
            enabled: true,
            text: r"Layer: 3\4".into(),
            font: PathBuf::from("/fonts/Mono.ttf"),
        };
        let cmd = feeder_command(&cfg);
        let vf = cmd.value_of("-vf").unwrap();
        assert_eq!(
            vf,
            r"drawtext=fontfile=/fonts/Mono.ttf:text='Layer\: 3\\4':x=10:y=10:fontsize=24:fontcolor=white:box=1:boxcolor=black@0.5"
        );
        // Every ':' inside the quoted text is escaped, so the option splitter
        // sees exactly one text= value.
        let quoted = vf.split('\'').nth(1).unwrap();
        assert!(quoted.match_indices(':').all(|(i, _)| &quoted[i - 1..i] == "\\"));
    }

    #[test]
    fn feeder_without_music_uses_camera_audio() {
        let cmd = feeder_command(&config());
        assert_eq!(cmd.inputs(), vec!["http://127.0.0.1:8080/?action=stream"]);
        assert_eq!(map_values(&cmd), vec!["0:v:0", "0:a:0?"]);
        assert!(cmd.value_of("-vf").is_none());
        assert_eq!(cmd.args.first().map(String::as_str), Some("-y"));
        assert_eq!(cmd.value_of("-f"), Some("mpegts"));
        assert_eq!(cmd.args.last().map(String::as_str), Some("/tmp/pc/live_segment.ts"));
    }

    #[test]
    fn feeder_with_music_maps_camera_video_and_music_audio() {
        let mut cfg = config();
        cfg.bg_music_file = Some(PathBuf::from("/music/loop.mp3"));
        let cmd = feeder_command(&cfg);

        assert_eq!(cmd.inputs().len(), 2);
        assert_eq!(cmd.inputs()[1], "/music/loop.mp3");
        assert_eq!(cmd.value_of("-stream_loop"), Some("-1"));
        assert_eq!(map_values(&cmd), vec!["0:v:0", "1:a:0?"]);
        assert!(!map_values(&cmd).iter().any(|m| m.starts_with("0:a")));
    }

    #[test]
    fn feeder_scales_before_overlay() {
        let mut cfg = config();
        cfg.profile = EncodingProfile {
            width: 1280,
            height: 720,
            ..Default::default()
        };
        cfg.overlay.enabled = true;
        let cmd = feeder_command(&cfg);
        let vf = cmd.value_of("-vf").unwrap();
        assert!(vf.starts_with("scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720"));
        assert!(vf.contains(",drawtext="));
    }

    #[test]
    fn feeder_fixes_keyframe_spacing() {
        let cmd = feeder_command(&config());
        assert_eq!(cmd.value_of("-g"), Some("60"));
        assert_eq!(cmd.value_of("-keyint_min"), Some("60"));
        assert_eq!(cmd.value_of("-sc_threshold"), Some("0"));
        assert_eq!(cmd.value_of("-rw_timeout"), Some(RW_TIMEOUT_US));
    }

    #[test]
    fn main_without_clips_reads_only_fifo() {
        let cmd = main_command(&config(), None, None);
        assert_eq!(cmd.inputs(), vec!["/tmp/pc/live_segment.ts"]);
        assert_eq!(
            cmd.value_of("-filter_complex"),
            Some("[0:v:0][0:a:0]concat=n=1:v=1:a=1[v][a]")
        );
        assert!(!cmd.args.contains(&"-re".to_string()));
        assert_eq!(cmd.value_of("-f"), Some("flv"));
        assert_eq!(cmd.args.last().map(String::as_str), Some("rtmp://live.example.com/app/key"));
    }

    #[test]
    fn main_with_both_clips_orders_segments() {
        let cmd = main_command(
            &config(),
            Some(Path::new("/cache/intro.mp4")),
            Some(Path::new("/cache/outro.mp4")),
        );
        assert_eq!(
            cmd.inputs(),
            vec!["/cache/intro.mp4", "/tmp/pc/live_segment.ts", "/cache/outro.mp4"]
        );
        assert_eq!(
            cmd.value_of("-filter_complex"),
            Some("[0:v:0][0:a:0][1:v:0][1:a:0][2:v:0][2:a:0]concat=n=3:v=1:a=1[v][a]")
        );

        // -re precedes each clip but not the FIFO.
        let fifo_pos = cmd.args.iter().position(|a| a == "/tmp/pc/live_segment.ts").unwrap();
        assert_ne!(cmd.args[fifo_pos - 2], "-re");
        let intro_pos = cmd.args.iter().position(|a| a == "/cache/intro.mp4").unwrap();
        assert_eq!(cmd.args[intro_pos - 2], "-re");
        assert_eq!(cmd.args.iter().filter(|a| *a == "-re").count(), 2);
    }

    #[test]
    fn main_with_outro_only() {
        let cmd = main_command(&config(), None, Some(Path::new("/cache/outro.mp4")));
        assert_eq!(cmd.inputs().len(), 2);
        assert_eq!(
            cmd.value_of("-filter_complex"),
            Some("[0:v:0][0:a:0][1:v:0][1:a:0]concat=n=2:v=1:a=1[v][a]")
        );
    }

    #[test]
    fn unusable_clips_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let intro = dir.path().join("intro.mp4");
        std::fs::write(&intro, b"x").unwrap();
        let missing = dir.path().join("missing.mp4");

        assert_eq!(usable_segment(true, Some(intro.as_path())), Some(intro.as_path()));
        assert_eq!(usable_segment(false, Some(intro.as_path())), None);
        assert_eq!(usable_segment(true, Some(missing.as_path())), None);
        assert_eq!(usable_segment(true, None), None);

        let cmd = main_command(
            &config(),
            usable_segment(false, Some(intro.as_path())),
            usable_segment(true, Some(missing.as_path())),
        );
        assert_eq!(cmd.inputs().len(), 1);
        assert!(cmd.value_of("-filter_complex").unwrap().contains("concat=n=1:"));
    }

    #[test]
    fn display_joins_program_and_args() {
        let cmd = CommandLine {
            program: PathBuf::from("/usr/bin/ffmpeg"),
            args: vec!["-i".into(), "in.mp4".into()],
        };
        assert_eq!(cmd.display(), "/usr/bin/ffmpeg -i in.mp4");
    }
}
