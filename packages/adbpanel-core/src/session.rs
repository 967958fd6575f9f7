//! Session context.
//!
//! Owns the registry, the connection controller and the bridge. Anything
//! that touches the network or spawns a process runs as a tokio task and
//! reports back over a channel; the owner of the session drains that
//! channel on its own thread with [`Session::pump`] or
//! [`Session::drain_ready`].

use crate::bridge::{AdbBridge, Bridge, BridgeCommand};
use crate::command::CommandOutput;
use crate::config::AppConfig;
use crate::connection::{ConnectError, ConnectOutcome, ConnectionController};
use crate::registry::{ProfileRegistry, RegistryError};
use crate::resolver::{IpResolver, MacResolver};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
    /// Echo of a command about to be (or just) run
    Cmd,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Log {
        level: LogLevel,
        message: String,
        at: DateTime<Utc>,
    },
    Resolved {
        mac: String,
        ip: Option<String>,
    },
    Connected {
        name: String,
        endpoint: String,
    },
    Disconnected {
        name: String,
        endpoint: String,
    },
    /// A connect or disconnect did not reach the device
    ConnectFailed {
        name: String,
        reason: String,
    },
    TaskDone {
        task: String,
    },
}

impl SessionEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        SessionEvent::Log {
            level,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Cloneable handle a background task uses to report back.
#[derive(Clone)]
struct Reporter {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Reporter {
    fn send(&self, event: SessionEvent) {
        // Receiver lives as long as the session; a send can only fail
        // while the session is being torn down
        if self.tx.send(event).is_err() {
            tracing::debug!("Session closed, dropping event");
        }
    }

    fn info(&self, message: impl Into<String>) {
        self.send(SessionEvent::log(LogLevel::Info, message));
    }

    fn error(&self, message: impl Into<String>) {
        self.send(SessionEvent::log(LogLevel::Error, message));
    }

    fn echo(&self, program: &str, args: &[String]) {
        self.send(SessionEvent::log(
            LogLevel::Cmd,
            format!(">> {} {}", display_name(program), args.join(" ")),
        ));
    }

    fn output(&self, output: &CommandOutput) {
        let stdout = output.stdout.trim();
        if !stdout.is_empty() {
            self.info(stdout);
        }
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            self.error(stderr);
        }
    }

    fn done(&self, task: &str) {
        self.send(SessionEvent::TaskDone {
            task: task.to_string(),
        });
    }
}

/// Sends `TaskDone` when dropped, so a task that panics still counts as
/// finished.
struct DoneGuard {
    reporter: Reporter,
    task: String,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.reporter.done(&self.task);
    }
}

/// `adb` rather than `/opt/tools/platform-tools/adb.exe`
fn display_name(program: &str) -> &str {
    Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(program)
}

pub struct Session {
    registry: ProfileRegistry,
    controller: Arc<ConnectionController>,
    bridge: Arc<dyn Bridge>,
    reporter: Reporter,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    pending: usize,
}

impl Session {
    pub fn new(registry: ProfileRegistry, controller: ConnectionController) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let bridge = controller.bridge();
        Self {
            registry,
            controller: Arc::new(controller),
            bridge,
            reporter: Reporter { tx },
            events,
            pending: 0,
        }
    }

    /// System-backed session: registry file, `adb` and the full resolver
    /// chain as configured.
    pub fn from_config(config: &AppConfig) -> Self {
        let registry = ProfileRegistry::load(config.registry_path());
        let bridge: Arc<dyn Bridge> = Arc::new(AdbBridge::new(config.bridge_program()));
        let resolver: Arc<dyn IpResolver> = Arc::new(MacResolver::from_config(config));
        Self::new(registry, ConnectionController::new(resolver, bridge))
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProfileRegistry {
        &mut self.registry
    }

    /// Tasks spawned but not yet finished
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Post a log line from the owning thread.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.reporter.send(SessionEvent::log(level, message));
    }

    /// Connect the named profile in the background.
    pub fn connect(&mut self, name: &str) -> Result<(), RegistryError> {
        let profile = self.registry.get(name)?;
        let controller = Arc::clone(&self.controller);
        let name = name.to_string();
        self.spawn("connect", move |reporter| async move {
            let result = controller.connect(&name, &profile).await;
            if let Some(endpoint) =
                report_connection(&reporter, &controller, &name, &profile.mac, result)
            {
                reporter.send(SessionEvent::Connected { name, endpoint });
            }
        });
        Ok(())
    }

    /// Disconnect the named profile in the background.
    pub fn disconnect(&mut self, name: &str) -> Result<(), RegistryError> {
        let profile = self.registry.get(name)?;
        let controller = Arc::clone(&self.controller);
        let name = name.to_string();
        self.spawn("disconnect", move |reporter| async move {
            let result = controller.disconnect(&name, &profile).await;
            if let Some(endpoint) =
                report_connection(&reporter, &controller, &name, &profile.mac, result)
            {
                reporter.send(SessionEvent::Disconnected { name, endpoint });
            }
        });
        Ok(())
    }

    /// Resolve a MAC in the background and report the answer.
    pub fn resolve(&mut self, mac: &str) {
        let resolver = self.controller.resolver();
        let mac = mac.to_string();
        self.spawn("resolve", move |reporter| async move {
            reporter.info(format!("Searching for {} on the local network", mac));
            let ip = resolver.resolve(&mac).await.map(|ip| ip.to_string());
            match &ip {
                Some(ip) => reporter.info(format!("{} is at {}", mac, ip)),
                None => reporter.error(format!("No IP found for MAC {}", mac)),
            }
            reporter.send(SessionEvent::Resolved { mac, ip });
        });
    }

    /// Run one bridge command in the background.
    pub fn run(&mut self, command: BridgeCommand) {
        self.run_sequence("bridge", vec![command]);
    }

    /// Run bridge commands one after another; a launch failure stops the
    /// rest of the sequence.
    pub fn run_sequence(&mut self, task: &str, commands: Vec<BridgeCommand>) {
        let bridge = Arc::clone(&self.bridge);
        self.spawn(task, move |reporter| async move {
            for command in commands {
                let args = command.args();
                reporter.echo(bridge.program(), &args);
                match bridge.run(&args).await {
                    Ok(output) => reporter.output(&output),
                    Err(e) => {
                        reporter.error(e.to_string());
                        break;
                    }
                }
            }
        });
    }

    /// Wait for every pending task, handing each event to `render` in
    /// arrival order.
    pub async fn pump<F>(&mut self, mut render: F)
    where
        F: FnMut(&SessionEvent),
    {
        while self.pending > 0 {
            let Some(event) = self.events.recv().await else {
                break;
            };
            self.account(&event);
            render(&event);
        }
        // Pick up anything posted from this thread after the last task
        self.drain_ready(render);
    }

    /// Hand over whatever has already arrived without waiting.
    pub fn drain_ready<F>(&mut self, mut render: F) -> usize
    where
        F: FnMut(&SessionEvent),
    {
        let mut drained = 0;
        while let Ok(event) = self.events.try_recv() {
            self.account(&event);
            render(&event);
            drained += 1;
        }
        drained
    }

    fn account(&mut self, event: &SessionEvent) {
        if matches!(event, SessionEvent::TaskDone { .. }) {
            self.pending = self.pending.saturating_sub(1);
        }
    }

    fn spawn<F, Fut>(&mut self, task: &str, work: F)
    where
        F: FnOnce(Reporter) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let guard = DoneGuard {
            reporter: self.reporter.clone(),
            task: task.to_string(),
        };
        let fut = work(self.reporter.clone());
        self.pending += 1;
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }
}

/// Log a connect/disconnect result; returns the endpoint on success.
fn report_connection(
    reporter: &Reporter,
    controller: &ConnectionController,
    name: &str,
    mac: &str,
    result: Result<ConnectOutcome, ConnectError>,
) -> Option<String> {
    match result {
        Ok(outcome) => {
            if outcome.resolved {
                reporter.send(SessionEvent::Resolved {
                    mac: mac.to_string(),
                    ip: outcome.endpoint.split(':').next().map(String::from),
                });
            }
            reporter.echo(controller.bridge().program(), &outcome.args);
            reporter.output(&outcome.output);
            Some(outcome.endpoint)
        }
        Err(e) => {
            reporter.error(e.to_string());
            reporter.send(SessionEvent::ConnectFailed {
                name: name.to_string(),
                reason: e.to_string(),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{CountingResolver, RecordingBridge};
    use crate::registry::DeviceProfile;
    use std::net::Ipv4Addr;

    fn session_with(
        dir: &Path,
        resolver: Arc<CountingResolver>,
        bridge: Arc<RecordingBridge>,
    ) -> Session {
        let registry = ProfileRegistry::load(dir.join("devices.json"));
        Session::new(registry, ConnectionController::new(resolver, bridge))
    }

    fn strip(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .map(|event| match event {
                SessionEvent::Log { level, message, .. } => format!("{:?}: {}", level, message),
                SessionEvent::Resolved { mac, ip } => format!("resolved {} {:?}", mac, ip),
                SessionEvent::Connected { name, endpoint } => {
                    format!("connected {} {}", name, endpoint)
                }
                SessionEvent::Disconnected { name, endpoint } => {
                    format!("disconnected {} {}", name, endpoint)
                }
                SessionEvent::ConnectFailed { name, reason } => {
                    format!("failed {}: {}", name, reason)
                }
                SessionEvent::TaskDone { task } => format!("done {}", task),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_connect_reports_through_channel() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(RecordingBridge {
            stdout: "connected to 192.168.1.50:5555\n".to_string(),
            ..Default::default()
        });
        let mut session = session_with(
            dir.path(),
            Arc::new(CountingResolver::answering(None)),
            bridge.clone(),
        );
        let mut profile = DeviceProfile::new("AA:BB:CC:11:22:33");
        profile.ip = Some("192.168.1.50".to_string());
        session.registry_mut().add("Pixel", profile).unwrap();

        session.connect("Pixel").unwrap();
        assert_eq!(session.pending(), 1);

        let mut events = Vec::new();
        session.pump(|e| events.push(e.clone())).await;

        assert_eq!(session.pending(), 0);
        assert_eq!(
            strip(&events),
            vec![
                "Cmd: >> adb connect 192.168.1.50:5555",
                "Info: connected to 192.168.1.50:5555",
                "connected Pixel 192.168.1.50:5555",
                "done connect",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_profile_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(RecordingBridge::default());
        let mut session = session_with(
            dir.path(),
            Arc::new(CountingResolver::default()),
            bridge.clone(),
        );

        assert!(matches!(
            session.connect("Ghost"),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            session.disconnect("Ghost"),
            Err(RegistryError::NotFound(_))
        ));
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_connect_logs_error() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(RecordingBridge::default());
        let mut session = session_with(
            dir.path(),
            Arc::new(CountingResolver::answering(None)),
            bridge.clone(),
        );
        session
            .registry_mut()
            .add("Pixel", DeviceProfile::new("aa:bb:cc:11:22:33"))
            .unwrap();

        session.connect("Pixel").unwrap();
        let mut events = Vec::new();
        session.pump(|e| events.push(e.clone())).await;

        assert_eq!(
            strip(&events),
            vec![
                "Error: No IP found for MAC aa:bb:cc:11:22:33",
                "failed Pixel: No IP found for MAC aa:bb:cc:11:22:33",
                "done connect",
            ]
        );
        assert!(bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resolved_disconnect_reports_ip() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(RecordingBridge::default());
        let mut session = session_with(
            dir.path(),
            Arc::new(CountingResolver::answering(Some(Ipv4Addr::new(192, 168, 1, 42)))),
            bridge.clone(),
        );
        session
            .registry_mut()
            .add("Pixel", DeviceProfile::new("aa:bb:cc:11:22:33"))
            .unwrap();

        session.disconnect("Pixel").unwrap();
        let mut events = Vec::new();
        session.pump(|e| events.push(e.clone())).await;

        assert_eq!(
            strip(&events),
            vec![
                "resolved aa:bb:cc:11:22:33 Some(\"192.168.1.42\")",
                "Cmd: >> adb disconnect 192.168.1.42:5555",
                "disconnected Pixel 192.168.1.42:5555",
                "done disconnect",
            ]
        );
    }

    #[tokio::test]
    async fn test_sequence_runs_in_order_with_stderr_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(RecordingBridge {
            stderr: "adb: no devices/emulators found".to_string(),
            ..Default::default()
        });
        let mut session = session_with(
            dir.path(),
            Arc::new(CountingResolver::default()),
            bridge.clone(),
        );

        session.run_sequence("screenshot", crate::bridge::recipes::screenshot("shot.png"));
        let mut events = Vec::new();
        session.pump(|e| events.push(e.clone())).await;

        assert_eq!(
            bridge.calls(),
            vec![
                vec!["shell", "screencap", "-p", "/sdcard/screen.png"],
                vec!["pull", "/sdcard/screen.png", "shot.png"],
            ]
        );
        assert_eq!(
            strip(&events),
            vec![
                "Cmd: >> adb shell screencap -p /sdcard/screen.png",
                "Error: adb: no devices/emulators found",
                "Cmd: >> adb pull /sdcard/screen.png shot.png",
                "Error: adb: no devices/emulators found",
                "done screenshot",
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_waits_for_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(CountingResolver::answering(None));
        let mut session = session_with(
            dir.path(),
            resolver.clone(),
            Arc::new(RecordingBridge::default()),
        );

        session.resolve("aa:bb:cc:dd:ee:ff");
        session.run(BridgeCommand::Devices);
        session.resolve("11:22:33:44:55:66");
        assert_eq!(session.pending(), 3);

        let mut done = 0;
        let mut resolved = Vec::new();
        session
            .pump(|e| match e {
                SessionEvent::TaskDone { .. } => done += 1,
                SessionEvent::Resolved { mac, ip } => resolved.push((mac.clone(), ip.clone())),
                _ => {}
            })
            .await;

        assert_eq!(done, 3);
        assert_eq!(resolver.calls(), 2);
        resolved.sort();
        assert_eq!(
            resolved,
            vec![
                ("11:22:33:44:55:66".to_string(), None),
                ("aa:bb:cc:dd:ee:ff".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_task_still_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(
            dir.path(),
            Arc::new(CountingResolver::default()),
            Arc::new(RecordingBridge::default()),
        );

        session.spawn("broken", |_reporter| async {
            panic!("task blew up");
        });
        session.run(BridgeCommand::Devices);

        let mut done = Vec::new();
        let pumped = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            session.pump(|e| {
                if let SessionEvent::TaskDone { task } = e {
                    done.push(task.clone());
                }
            }),
        )
        .await;

        assert!(pumped.is_ok());
        done.sort();
        assert_eq!(done, vec!["bridge", "broken"]);
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let event = SessionEvent::Connected {
            name: "Pixel".to_string(),
            endpoint: "192.168.1.42:5555".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connected");
        assert_eq!(json["endpoint"], "192.168.1.42:5555");

        let log = serde_json::to_value(SessionEvent::log(LogLevel::Cmd, ">> adb devices -l")).unwrap();
        assert_eq!(log["level"], "cmd");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("adb"), "adb");
        assert_eq!(display_name("/opt/tools/platform-tools/adb"), "adb");
    }
}
