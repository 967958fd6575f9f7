//! adbpanel CLI - Control panel for Android devices over wireless debugging
//!
//! This binary provides:
//! - Device profiles (name, MAC, static IP, port) stored in devices.json
//! - Connect/disconnect by profile, finding the device's IP from its MAC
//! - One-shot `adb` actions (keys, taps, text, apps, files, screenshots)

mod profile;

use adbpanel_core::bridge::{self, BridgeCommand, KeyEvent, recipes};
use adbpanel_core::config::{self, AppConfig, ConfigSource};
use adbpanel_core::{LogLevel, Session, SessionEvent};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "adbpanel")]
#[command(author = "adbpanel contributors")]
#[command(version)]
#[command(about = "Control panel for Android devices over wireless debugging")]
#[command(long_about = "
adbpanel drives Android devices through adb over the local network.
Devices are saved as profiles keyed by name; a profile without a static
IP is found on the local /24 from its MAC address every time you connect,
so DHCP reassignments do not break the connection.

Quick start:
  1. Save a device:   adbpanel profile add Pixel AA:BB:CC:11:22:33
  2. Connect:         adbpanel connect Pixel
  3. Send a key:      adbpanel key home
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage device profiles
    #[command(alias = "profiles")]
    Profile {
        #[command(subcommand)]
        action: profile::ProfileAction,
    },

    /// Connect to a saved device (adb connect ip:port)
    Connect {
        /// Profile name
        name: String,
    },

    /// Disconnect a saved device (adb disconnect ip:port)
    Disconnect {
        /// Profile name
        name: String,
    },

    /// Disconnect every device
    DisconnectAll,

    /// Find the IP address of a MAC address on the local network
    Resolve {
        /// Hardware address in any common notation
        mac: String,
    },

    /// List attached devices
    Devices,

    /// Send a key event (home, power, volume-up, volume-down or a key code)
    Key { key: KeyEvent },

    /// Tap the screen
    Tap { x: u32, y: u32 },

    /// Swipe between two points
    Swipe {
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,

        /// Swipe duration in milliseconds
        #[arg(short, long, default_value = "300")]
        duration: u32,
    },

    /// Type text on the device
    Text { text: String },

    /// Launch an app by package name (or spotify, youtube)
    Launch { app: String },

    /// Force-stop an app
    Stop { app: String },

    /// Capture the screen and pull it to this machine
    Screenshot {
        /// Local file to write
        #[arg(short, long, default_value = "screenshot.png")]
        output: String,
    },

    /// Tap the same point rapidly
    Taps {
        /// Number of taps
        #[arg(short, long, default_value = "8")]
        times: usize,

        #[arg(long, default_value = "500")]
        x: u32,

        #[arg(long, default_value = "1000")]
        y: u32,
    },

    /// Pull down the notification shade
    Notifications,

    /// Copy a file from the device
    Pull {
        remote: String,

        /// Local destination
        #[arg(default_value = ".")]
        local: String,
    },

    /// Copy a file to the device
    Push { local: String, remote: String },

    /// Install (or reinstall) an APK
    Install { apk: String },

    /// Uninstall a package
    Uninstall { package: String },

    /// Reboot the device
    Reboot,

    /// Dump the device log
    Logcat,

    /// Show device properties
    Info,

    /// Record the screen and pull the video to this machine
    Record {
        /// Recording length in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u32,

        /// Local file to write
        #[arg(short, long, default_value = "record.mp4")]
        output: String,
    },

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("adbpanel={},adbpanel_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let (config, source) = AppConfig::load();

    if let Commands::Config = cli.command {
        return cmd_config(&cli, &config, source);
    }

    let mut session = Session::from_config(&config);

    match &cli.command {
        Commands::Profile { action } => profile::run(&cli, session.registry_mut(), action),
        Commands::Connect { name } => {
            session.connect(name)?;
            finish(&cli, &mut session).await
        }
        Commands::Disconnect { name } => {
            session.disconnect(name)?;
            finish(&cli, &mut session).await
        }
        Commands::Resolve { mac } => {
            session.resolve(mac);
            finish(&cli, &mut session).await
        }
        Commands::Screenshot { output } => {
            session.run_sequence("screenshot", recipes::screenshot(output));
            finish(&cli, &mut session).await
        }
        Commands::Taps { times, x, y } => {
            session.run_sequence("taps", recipes::tap_burst(*times, *x, *y));
            finish(&cli, &mut session).await
        }
        Commands::Record { seconds, output } => {
            session.log(
                LogLevel::Info,
                format!("Recording for {}s, then saving to {}", seconds, output),
            );
            session.run_sequence("record", recipes::record(*seconds, output));
            finish(&cli, &mut session).await
        }
        Commands::Config => Ok(()),
        other => {
            let Some(command) = single_command(other) else {
                return Ok(());
            };
            session.run(command);
            finish(&cli, &mut session).await
        }
    }
}

/// Subcommands that map onto exactly one bridge invocation
fn single_command(command: &Commands) -> Option<BridgeCommand> {
    let command = match command {
        Commands::DisconnectAll => BridgeCommand::DisconnectAll,
        Commands::Devices => BridgeCommand::Devices,
        Commands::Key { key } => BridgeCommand::Key(*key),
        Commands::Tap { x, y } => BridgeCommand::Tap { x: *x, y: *y },
        Commands::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration,
        } => BridgeCommand::Swipe {
            x1: *x1,
            y1: *y1,
            x2: *x2,
            y2: *y2,
            duration_ms: *duration,
        },
        Commands::Text { text } => BridgeCommand::Text(text.clone()),
        Commands::Launch { app } => BridgeCommand::Launch(bridge::package_for(app).to_string()),
        Commands::Stop { app } => BridgeCommand::ForceStop(bridge::package_for(app).to_string()),
        Commands::Notifications => BridgeCommand::ExpandNotifications,
        Commands::Pull { remote, local } => BridgeCommand::Pull {
            remote: remote.clone(),
            local: local.clone(),
        },
        Commands::Push { local, remote } => BridgeCommand::Push {
            local: local.clone(),
            remote: remote.clone(),
        },
        Commands::Install { apk } => BridgeCommand::Install(apk.clone()),
        Commands::Uninstall { package } => BridgeCommand::Uninstall(package.clone()),
        Commands::Reboot => BridgeCommand::Reboot,
        Commands::Logcat => BridgeCommand::Logcat,
        Commands::Info => BridgeCommand::GetProp,
        _ => return None,
    };
    Some(command)
}

/// Drain the session, printing events as they arrive. Fails when a
/// connect/disconnect/resolve task ended without an answer.
async fn finish(cli: &Cli, session: &mut Session) -> Result<()> {
    let format = cli.format;
    let mut unanswered: Option<String> = None;

    session
        .pump(|event| {
            if let Some(failure) = failure_of(event) {
                unanswered = Some(failure);
            }
            render_event(format, event);
        })
        .await;

    match unanswered {
        Some(message) => anyhow::bail!(message),
        None => Ok(()),
    }
}

/// Events that mean the command as a whole did not get its answer
fn failure_of(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Resolved { mac, ip: None } => Some(format!("No IP found for MAC {}", mac)),
        SessionEvent::ConnectFailed { name, reason } => Some(format!("{}: {}", name, reason)),
        _ => None,
    }
}

fn render_event(format: OutputFormat, event: &SessionEvent) {
    match format {
        OutputFormat::Text => match event {
            SessionEvent::Log {
                level: LogLevel::Error,
                message,
                ..
            } => eprintln!("{}", message),
            SessionEvent::Log { message, .. } => println!("{}", message),
            SessionEvent::Connected { name, endpoint } => {
                println!("Connected {} ({})", name, endpoint)
            }
            SessionEvent::Disconnected { name, endpoint } => {
                println!("Disconnected {} ({})", name, endpoint)
            }
            SessionEvent::Resolved { .. }
            | SessionEvent::ConnectFailed { .. }
            | SessionEvent::TaskDone { .. } => {}
        },
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!("Failed to encode event: {}", e),
        },
    }
}

fn cmd_config(cli: &Cli, config: &AppConfig, source: ConfigSource) -> Result<()> {
    let config_path = config::get_config_file_path_string();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("Loaded from:      {}", source);
            println!("Project root:     {}", config.project_root.display());
            println!("Bridge program:   {}", config.bridge_program());
            println!("Profiles file:    {}", config.registry_path().display());
            println!("Scan export:      {}", config.export_path().display());
            println!(
                "Sweep:            {} hosts per batch, {}ms pause, {}ms per probe",
                config.sweep.batch_size, config.sweep.batch_pause_ms, config.sweep.probe_timeout_ms
            );
            println!("Resolve timeout:  {}s", config.resolver.overall_timeout_secs);
            println!();
            println!("Environment variables:");
            println!("  ADBPANEL_BRIDGE       - Override the adb executable");
            println!("  ADBPANEL_PROJECT_ROOT - Directory holding devices.json and tools/");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "config_file": config_path,
                "source": format!("{}", source),
                "project_root": config.project_root,
                "bridge_program": config.bridge_program(),
                "registry_file": config.registry_path(),
                "export_file": config.export_path(),
                "resolver": config.resolver,
                "sweep": config.sweep,
            }));
        }
    }

    Ok(())
}
