//! Spawning and signalling the long-lived ffmpeg processes.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Child;
use tracing::{debug, info};

use crate::StreamerError;
use crate::command::CommandLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Main,
    Feeder,
}

impl ProcessRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Feeder => "feeder",
        }
    }

    /// Tag written into the diagnostic log header.
    pub fn log_tag(self) -> &'static str {
        match self {
            Self::Main => "main_single_session",
            Self::Feeder => "feeder_live_to_fifo",
        }
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn log_header(role: ProcessRole, command_line: &str) -> String {
    format!(
        "\n\n===== {} [{}] =====\nCMD: {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        role.log_tag(),
        command_line
    )
}

/// Spawn `cmd` with stdout discarded and stderr appended to `log_path`.
pub fn spawn_logged(cmd: &CommandLine, role: ProcessRole, log_path: &Path) -> Result<Child, StreamerError> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    if let Err(e) = log_file.write_all(log_header(role, &cmd.display()).as_bytes()) {
        debug!(error = %e, "failed to write ffmpeg log header");
    }

    let child = tokio::process::Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log_file))
        .spawn()
        .map_err(|source| StreamerError::Spawn {
            role: role.as_str(),
            source,
        })?;

    info!(%role, pid = child.id(), "spawned ffmpeg");
    Ok(child)
}

/// True once the process has exited (or can no longer be queried).
pub fn has_exited(child: &mut Child) -> bool {
    !matches!(child.try_wait(), Ok(None))
}

/// Best-effort SIGTERM.
pub fn terminate(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pid only yields ESRCH.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "SIGTERM not delivered");
    }
}

/// Best-effort SIGKILL.
pub fn kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "SIGKILL not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn header_contains_tag_and_command() {
        let header = log_header(ProcessRole::Feeder, "/usr/bin/ffmpeg -i cam");
        assert!(header.starts_with("\n\n===== "));
        assert!(header.contains(" [feeder_live_to_fifo] =====\n"));
        assert!(header.ends_with("CMD: /usr/bin/ffmpeg -i cam\n"));
    }

    #[tokio::test]
    async fn spawn_appends_header_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("ffmpeg.log");
        std::fs::create_dir_all(log.parent().unwrap()).unwrap();
        std::fs::write(&log, "previous run\n").unwrap();

        let cmd = CommandLine {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "echo boom >&2".into()],
        };
        let mut child = spawn_logged(&cmd, ProcessRole::Main, &log).unwrap();
        let status = child.wait().await.unwrap();
        assert!(status.success());

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.starts_with("previous run\n"));
        assert!(contents.contains("[main_single_session]"));
        assert!(contents.contains("CMD: /bin/sh -c echo boom >&2\n"));
        assert!(contents.trim_end().ends_with("boom"));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = CommandLine {
            program: dir.path().join("no-such-ffmpeg"),
            args: vec![],
        };
        let err = spawn_logged(&cmd, ProcessRole::Feeder, &dir.path().join("ffmpeg.log")).unwrap_err();
        assert!(matches!(err, StreamerError::Spawn { role: "feeder", .. }));
    }

    #[tokio::test]
    async fn terminate_stops_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        assert!(!has_exited(&mut child));

        terminate(&child);
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
        assert!(has_exited(&mut child));
    }
}
