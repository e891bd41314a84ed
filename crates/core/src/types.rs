use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Print job state as reported by the printer host (`print_stats.state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintState {
    Idle,
    Standby,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
    Unknown,
}

impl PrintState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Standby => "standby",
            Self::Printing => "printing",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Map a raw state string. Anything unrecognised becomes `Unknown`.
    pub fn from_status(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Self::Idle,
            "standby" => Self::Standby,
            "printing" => Self::Printing,
            "paused" => Self::Paused,
            "complete" => Self::Complete,
            "cancelled" => Self::Cancelled,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn is_printing(self) -> bool {
        matches!(self, Self::Printing)
    }

    /// States that end a print and arm the delayed stop.
    pub fn ends_print(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Standby)
    }
}

impl std::fmt::Display for PrintState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the single broadcast session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations accepted by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Start,
    Stop,
    Enable,
    Disable,
    IntroEnable,
    IntroDisable,
    OutroEnable,
    OutroDisable,
    PrepareMedia,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::IntroEnable => "intro_enable",
            Self::IntroDisable => "intro_disable",
            Self::OutroEnable => "outro_enable",
            Self::OutroDisable => "outro_disable",
            Self::PrepareMedia => "prepare_media",
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            "intro_enable" => Ok(Self::IntroEnable),
            "intro_disable" => Ok(Self::IntroDisable),
            "outro_enable" => Ok(Self::OutroEnable),
            "outro_disable" => Ok(Self::OutroDisable),
            "prepare_media" => Ok(Self::PrepareMedia),
            other => Err(ApiError::BadRequest(format!("Invalid operation: {other}"))),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_state_maps_unrecognised_to_unknown() {
        assert_eq!(PrintState::from_status("printing"), PrintState::Printing);
        assert_eq!(PrintState::from_status(" Complete "), PrintState::Complete);
        assert_eq!(PrintState::from_status("warming_up"), PrintState::Unknown);
        assert_eq!(PrintState::from_status(""), PrintState::Unknown);
    }

    #[test]
    fn only_complete_error_standby_end_a_print() {
        assert!(PrintState::Complete.ends_print());
        assert!(PrintState::Error.ends_print());
        assert!(PrintState::Standby.ends_print());
        assert!(!PrintState::Paused.ends_print());
        assert!(!PrintState::Cancelled.ends_print());
        assert!(!PrintState::Unknown.ends_print());
    }

    #[test]
    fn operations_parse_and_reject() {
        for op in [
            Operation::Start,
            Operation::Stop,
            Operation::Enable,
            Operation::Disable,
            Operation::IntroEnable,
            Operation::IntroDisable,
            Operation::OutroEnable,
            Operation::OutroDisable,
            Operation::PrepareMedia,
        ] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }

        let err = "reboot".parse::<Operation>().unwrap_err();
        assert_eq!(err.to_string(), "bad request: Invalid operation: reboot");
        assert!("".parse::<Operation>().is_err());
    }
}
