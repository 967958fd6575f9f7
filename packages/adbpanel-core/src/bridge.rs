//! Device bridge (`adb`) invocation.

use crate::command::{CommandOutput, RunFailure, run_with_timeout};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Remote path used by the screenshot helper
pub const DEVICE_SCREENSHOT_PATH: &str = "/sdcard/screen.png";

/// Remote path used by the screen recording helper
pub const DEVICE_RECORDING_PATH: &str = "/sdcard/record.mp4";

/// Short names for apps the panel has shortcuts for
const KNOWN_APPS: &[(&str, &str)] = &[
    ("spotify", "com.spotify.music"),
    ("youtube", "com.google.android.youtube"),
];

/// Expand an app shortcut to its package name; anything else is taken as
/// a package name already.
pub fn package_for(app: &str) -> &str {
    KNOWN_APPS
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(app))
        .map(|(_, package)| *package)
        .unwrap_or(app)
}

/// Errors from running the bridge binary itself (not from the device)
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to run {program}: {message}")]
    Launch { program: String, message: String },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

impl BridgeError {
    fn from_failure(program: &str, failure: RunFailure) -> Self {
        match failure {
            RunFailure::Launch(e) => BridgeError::Launch {
                program: program.to_string(),
                message: format!("{:#}", e),
            },
            RunFailure::TimedOut(timeout) => BridgeError::Timeout {
                program: program.to_string(),
                timeout,
            },
        }
    }
}

/// Android key codes used by the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Home,
    Power,
    VolumeUp,
    VolumeDown,
    Code(u32),
}

impl KeyEvent {
    pub fn code(self) -> u32 {
        match self {
            KeyEvent::Home => 3,
            KeyEvent::VolumeUp => 24,
            KeyEvent::VolumeDown => 25,
            KeyEvent::Power => 26,
            KeyEvent::Code(code) => code,
        }
    }
}

impl std::str::FromStr for KeyEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "home" => Ok(KeyEvent::Home),
            "power" => Ok(KeyEvent::Power),
            "volume-up" | "volup" | "vol+" => Ok(KeyEvent::VolumeUp),
            "volume-down" | "voldown" | "vol-" => Ok(KeyEvent::VolumeDown),
            other => other
                .parse::<u32>()
                .map(KeyEvent::Code)
                .map_err(|_| format!("unknown key event: {}", s)),
        }
    }
}

/// A bridge subcommand and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    Connect { host: String, port: u16 },
    Disconnect { host: String, port: u16 },
    DisconnectAll,
    Devices,
    Key(KeyEvent),
    Tap { x: u32, y: u32 },
    Swipe { x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u32 },
    Text(String),
    ForceStop(String),
    Launch(String),
    Screencap(String),
    Pull { remote: String, local: String },
    Push { local: String, remote: String },
    Install(String),
    Uninstall(String),
    Reboot,
    Logcat,
    GetProp,
    ScreenRecord { remote: String, time_limit_secs: Option<u32> },
    ExpandNotifications,
}

impl BridgeCommand {
    pub fn args(&self) -> Vec<String> {
        let s = |v: &[&str]| v.iter().map(|a| a.to_string()).collect::<Vec<_>>();
        match self {
            BridgeCommand::Connect { host, port } => {
                vec!["connect".into(), format!("{}:{}", host, port)]
            }
            BridgeCommand::Disconnect { host, port } => {
                vec!["disconnect".into(), format!("{}:{}", host, port)]
            }
            BridgeCommand::DisconnectAll => s(&["disconnect"]),
            BridgeCommand::Devices => s(&["devices", "-l"]),
            BridgeCommand::Key(key) => {
                let mut args = s(&["shell", "input", "keyevent"]);
                args.push(key.code().to_string());
                args
            }
            BridgeCommand::Tap { x, y } => {
                let mut args = s(&["shell", "input", "tap"]);
                args.extend([x.to_string(), y.to_string()]);
                args
            }
            BridgeCommand::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => {
                let mut args = s(&["shell", "input", "swipe"]);
                args.extend([x1, y1, x2, y2, duration_ms].map(|v| v.to_string()));
                args
            }
            // `input text` treats %s as a space
            BridgeCommand::Text(text) => {
                let mut args = s(&["shell", "input", "text"]);
                args.push(text.replace(' ', "%s"));
                args
            }
            BridgeCommand::ForceStop(package) => {
                let mut args = s(&["shell", "am", "force-stop"]);
                args.push(package.clone());
                args
            }
            BridgeCommand::Launch(package) => vec![
                "shell".into(),
                "monkey".into(),
                "-p".into(),
                package.clone(),
                "-c".into(),
                "android.intent.category.LAUNCHER".into(),
                "1".into(),
            ],
            BridgeCommand::Screencap(remote) => {
                let mut args = s(&["shell", "screencap", "-p"]);
                args.push(remote.clone());
                args
            }
            BridgeCommand::Pull { remote, local } => {
                vec!["pull".into(), remote.clone(), local.clone()]
            }
            BridgeCommand::Push { local, remote } => {
                vec!["push".into(), local.clone(), remote.clone()]
            }
            BridgeCommand::Install(apk) => vec!["install".into(), "-r".into(), apk.clone()],
            BridgeCommand::Uninstall(package) => vec!["uninstall".into(), package.clone()],
            BridgeCommand::Reboot => s(&["reboot"]),
            BridgeCommand::Logcat => s(&["logcat", "-d"]),
            BridgeCommand::GetProp => s(&["shell", "getprop"]),
            BridgeCommand::ScreenRecord {
                remote,
                time_limit_secs,
            } => {
                let mut args = s(&["shell", "screenrecord"]);
                if let Some(limit) = time_limit_secs {
                    args.push("--time-limit".into());
                    args.push(limit.to_string());
                }
                args.push(remote.clone());
                args
            }
            BridgeCommand::ExpandNotifications => {
                s(&["shell", "cmd", "statusbar", "expand-notifications"])
            }
        }
    }
}

/// Runs bridge subcommands.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Name shown in command echo lines
    fn program(&self) -> &str;

    async fn run(&self, args: &[String]) -> Result<CommandOutput, BridgeError>;
}

/// The `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: String,
}

impl AdbBridge {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Bridge for AdbBridge {
    fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[String]) -> Result<CommandOutput, BridgeError> {
        tracing::debug!(">> {} {}", self.program, args.join(" "));
        // Bridge commands run to completion; logcat and screenrecord can be long
        run_with_timeout(&self.program, args, None)
            .await
            .map_err(|e| BridgeError::from_failure(&self.program, e))
    }
}

/// Multi-step bridge operations, each a list of commands run in order.
pub mod recipes {
    use super::*;

    /// Capture the screen on the device and pull it to `local`.
    pub fn screenshot(local: &str) -> Vec<BridgeCommand> {
        vec![
            BridgeCommand::Screencap(DEVICE_SCREENSHOT_PATH.to_string()),
            BridgeCommand::Pull {
                remote: DEVICE_SCREENSHOT_PATH.to_string(),
                local: local.to_string(),
            },
        ]
    }

    /// Record for `seconds` on the device, then pull the video to `local`.
    pub fn record(seconds: u32, local: &str) -> Vec<BridgeCommand> {
        vec![
            BridgeCommand::ScreenRecord {
                remote: DEVICE_RECORDING_PATH.to_string(),
                time_limit_secs: Some(seconds),
            },
            BridgeCommand::Pull {
                remote: DEVICE_RECORDING_PATH.to_string(),
                local: local.to_string(),
            },
        ]
    }

    /// Rapid taps at the same point.
    pub fn tap_burst(times: usize, x: u32, y: u32) -> Vec<BridgeCommand> {
        std::iter::repeat_n(BridgeCommand::Tap { x, y }, times).collect()
    }
}
