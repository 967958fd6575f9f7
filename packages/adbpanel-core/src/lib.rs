//! adbpanel Core Library
//!
//! This crate provides the core functionality behind the adbpanel tools:
//! - MAC-to-IP resolution (active scan, ping sweep, neighbor table)
//! - Device profile registry persisted to JSON
//! - Wireless debug connect/disconnect and other `adb` commands
//! - A session context that runs blocking work in the background and
//!   reports back over a channel
//!
//! # Example
//!
//! ```no_run
//! use adbpanel_core::{AppConfig, IpResolver, MacResolver};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (config, _source) = AppConfig::load();
//!     let resolver = MacResolver::from_config(&config);
//!
//!     match resolver.resolve("AA:BB:CC:11:22:33").await {
//!         Some(ip) => println!("Device is at {}", ip),
//!         None => println!("Device not found"),
//!     }
//! }
//! ```

pub mod bridge;
pub mod command;
pub mod config;
pub mod connection;
pub mod registry;
pub mod resolver;
pub mod session;

// Re-export commonly used types
pub use bridge::{AdbBridge, Bridge, BridgeCommand, BridgeError, KeyEvent};
pub use command::CommandOutput;
pub use config::{AppConfig, ConfigSource};
pub use connection::{ConnectError, ConnectOutcome, ConnectionController};
pub use registry::{DeviceProfile, ProfileInput, ProfileRegistry, RegistryError};
pub use resolver::{IpResolver, MacResolver, SubnetDescriptor, normalize_mac};
pub use session::{LogLevel, Session, SessionEvent};
