//! Relay domain types: lifecycle state, quality profiles, the JSON events
//! pushed to control sinks and the commands they send back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    #[default]
    Idle,
    Starting,
    Playing,
    Stopping,
    Ended,
}

impl RelayState {
    /// True while a transcoder is (or is about to be) attached
    pub fn is_active(&self) -> bool {
        matches!(self, RelayState::Starting | RelayState::Playing)
    }

    /// True when an attach should (re)start the transcoder
    pub fn is_restartable(&self) -> bool {
        matches!(self, RelayState::Idle | RelayState::Ended)
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelayState::Idle => "idle",
            RelayState::Starting => "starting",
            RelayState::Playing => "playing",
            RelayState::Stopping => "stopping",
            RelayState::Ended => "ended",
        };
        write!(f, "{s}")
    }
}

/// Transcoding quality profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    /// Encoder quantizer and bitrate for this profile
    pub fn encoder_settings(&self) -> (&'static str, &'static str) {
        match self {
            Quality::Low => ("8", "500k"),
            Quality::Medium => ("5", "1500k"),
            Quality::High => ("3", "3000k"),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(format!("Unknown quality profile: {other}")),
        }
    }
}

/// Phase carried by a `status` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPhase {
    Connected,
    Connecting,
    Playing,
    Stopped,
}

/// Error codes carried by an `error` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FfmpegStartFailed,
    FfmpegExit,
    InvalidAction,
    InvalidJson,
    InternalError,
}

/// Advisory classification of transcoder diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    Auth,
    NotFound,
    ConnectionRefused,
    Timeout,
    InvalidStream,
    Unknown,
}

impl DiagnosticCode {
    pub fn description(&self) -> &'static str {
        match self {
            DiagnosticCode::Auth => "Authentication failed - check username and password",
            DiagnosticCode::NotFound => "Stream not found at the given path",
            DiagnosticCode::ConnectionRefused => "Connection refused - camera may be offline",
            DiagnosticCode::Timeout => "Connection timed out",
            DiagnosticCode::InvalidStream => "Invalid stream format",
            DiagnosticCode::Unknown => "Unknown transcoder error",
        }
    }
}

/// JSON event delivered to control sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    Status {
        phase: StatusPhase,
    },
    VideoStart,
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<DiagnosticCode>,
    },
}

impl RelayEvent {
    pub fn status(phase: StatusPhase) -> Self {
        RelayEvent::Status { phase }
    }

    pub fn error<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        RelayEvent::Error {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn error_with_details<S: Into<String>>(
        code: ErrorCode,
        message: S,
        details: DiagnosticCode,
    ) -> Self {
        RelayEvent::Error {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// Generic event for failures that escaped a command handler
    pub fn internal_error() -> Self {
        Self::error(ErrorCode::InternalError, "Internal server error")
    }

    pub fn to_json(&self) -> String {
        // Every variant serializes to a plain object
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":"INTERNAL_ERROR","message":"Internal server error"}"#
                .to_string()
        })
    }
}

/// Command sent by a control sink as `{"action": "..."}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Reconnect,
}

/// Reasons a control message could not be turned into a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    InvalidJson,
    UnknownAction(String),
}

impl ControlCommand {
    /// Parse a raw control message.
    ///
    /// Anything that is not JSON is `InvalidJson`. Valid JSON without a
    /// recognised string `action` is `UnknownAction`, carrying whatever was
    /// found (empty when absent).
    pub fn parse(raw: &str) -> Result<Self, CommandParseError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| CommandParseError::InvalidJson)?;

        let action = match value.get("action") {
            Some(serde_json::Value::String(action)) => action.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        match action.as_str() {
            "start" => Ok(ControlCommand::Start),
            "stop" => Ok(ControlCommand::Stop),
            "reconnect" => Ok(ControlCommand::Reconnect),
            _ => Err(CommandParseError::UnknownAction(action)),
        }
    }
}

/// Point-in-time view of one relay for the admin listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySummary {
    pub key: String,
    /// Source URL with credentials masked
    pub url: String,
    pub state: RelayState,
    pub quality: Quality,
    pub video_sinks: usize,
    pub control_sinks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shapes() {
        assert_eq!(
            RelayEvent::status(StatusPhase::Connected).to_json(),
            r#"{"type":"status","phase":"connected"}"#
        );
        assert_eq!(RelayEvent::VideoStart.to_json(), r#"{"type":"video_start"}"#);
        assert_eq!(
            RelayEvent::error(ErrorCode::FfmpegStartFailed, "Failed to start video stream").to_json(),
            r#"{"type":"error","code":"FFMPEG_START_FAILED","message":"Failed to start video stream"}"#
        );

        let exit = RelayEvent::error_with_details(
            ErrorCode::FfmpegExit,
            "Stream ended unexpectedly",
            DiagnosticCode::ConnectionRefused,
        );
        let json: serde_json::Value = serde_json::from_str(&exit.to_json()).unwrap();
        assert_eq!(json["code"], "FFMPEG_EXIT");
        assert_eq!(json["details"], "CONNECTION_REFUSED");
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ControlCommand::parse(r#"{"action":"start"}"#), Ok(ControlCommand::Start));
        assert_eq!(ControlCommand::parse(r#"{"action":"stop"}"#), Ok(ControlCommand::Stop));
        assert_eq!(
            ControlCommand::parse(r#"{"action":"reconnect","extra":1}"#),
            Ok(ControlCommand::Reconnect)
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(ControlCommand::parse("not json"), Err(CommandParseError::InvalidJson));
        assert_eq!(
            ControlCommand::parse(r#"{"action":"dance"}"#),
            Err(CommandParseError::UnknownAction("dance".to_string()))
        );
        assert_eq!(
            ControlCommand::parse(r#"{"foo":"bar"}"#),
            Err(CommandParseError::UnknownAction(String::new()))
        );
        assert_eq!(
            ControlCommand::parse("[1,2]"),
            Err(CommandParseError::UnknownAction(String::new()))
        );
    }

    #[test]
    fn test_quality_parsing_and_defaults() {
        assert_eq!(Quality::default(), Quality::Medium);
        assert_eq!("HIGH".parse::<Quality>(), Ok(Quality::High));
        assert!("ultra".parse::<Quality>().is_err());
        assert_eq!(Quality::Low.encoder_settings(), ("8", "500k"));
    }

    #[test]
    fn test_state_predicates() {
        assert!(RelayState::Idle.is_restartable());
        assert!(RelayState::Ended.is_restartable());
        assert!(!RelayState::Playing.is_restartable());
        assert!(RelayState::Starting.is_active());
        assert_eq!(RelayState::Stopping.to_string(), "stopping");
    }
}
