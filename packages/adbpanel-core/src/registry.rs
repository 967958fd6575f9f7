//! Device profile registry.
//!
//! Profiles are keyed by a human-readable name and written to a pretty JSON
//! document on every mutation, so the file on disk always matches memory
//! once a mutating call returns.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5555;

/// A named target device.
///
/// Field order here is the field order in the registry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Hardware address as the user typed it; normalized only when resolving
    pub mac: String,
    #[serde(default = "default_port", deserialize_with = "port_or_default")]
    pub port: u16,
    /// Static IP; when set, MAC resolution is skipped entirely
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Display hint only
    #[serde(default)]
    pub color: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// `"port": null` is written when the port prompt is cancelled
fn port_or_default<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<u16>::deserialize(deserializer)?.unwrap_or(DEFAULT_PORT))
}

impl DeviceProfile {
    pub fn new(mac: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            port: DEFAULT_PORT,
            ip: None,
            notes: None,
            color: None,
        }
    }

    /// Static IP, ignoring blank values left behind by an edit
    pub fn static_ip(&self) -> Option<&str> {
        self.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty())
    }

    /// Multi-line detail block for a named profile
    pub fn describe(&self, name: &str) -> String {
        format!(
            "Name: {}\nMAC: {}\nIP: {}\nPort: {}\nNotes: {}\n",
            name,
            self.mac,
            self.ip.as_deref().unwrap_or("-"),
            self.port,
            self.notes.as_deref().unwrap_or("")
        )
    }
}

impl From<ProfileInput> for DeviceProfile {
    fn from(input: ProfileInput) -> Self {
        Self {
            mac: input.mac,
            port: input.port.unwrap_or(DEFAULT_PORT),
            ip: input.ip,
            notes: input.notes,
            color: input.color,
        }
    }
}

/// Editable profile fields as collected from the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileInput {
    pub mac: String,
    pub port: Option<u16>,
    pub ip: Option<String>,
    pub notes: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Profile not found: {0}")]
    NotFound(String),

    /// The in-memory change was kept but did not reach the disk
    #[error("Failed to write registry {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to import profiles from {}: {reason}", path.display())]
    Import { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// The only owner and writer of device profiles.
#[derive(Debug)]
pub struct ProfileRegistry {
    path: PathBuf,
    profiles: Vec<(String, DeviceProfile)>,
}

impl ProfileRegistry {
    /// Load the registry from `path`. A missing file is an empty registry;
    /// so is a corrupt one (logged, never fatal).
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let profiles = if !path.exists() {
            tracing::debug!("No registry file at {}, starting empty", path.display());
            Vec::new()
        } else {
            match std::fs::read_to_string(&path) {
                Ok(content) => match parse_document(&content) {
                    Ok(profiles) => profiles,
                    Err(e) => {
                        tracing::warn!(
                            "Registry file {} is malformed ({}), starting empty",
                            path.display(),
                            e
                        );
                        Vec::new()
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read registry {}: {}", path.display(), e);
                    Vec::new()
                }
            }
        };

        tracing::info!("Loaded {} device profiles from {}", profiles.len(), path.display());
        Self { path, profiles }
    }

    /// Insert or overwrite `name`. Overwrite confirmation is the caller's job
    /// (see [`ProfileRegistry::contains`]).
    pub fn add(&mut self, name: &str, profile: DeviceProfile) -> Result<()> {
        match self.position(name) {
            Some(idx) => self.profiles[idx].1 = profile,
            None => self.profiles.push((name.to_string(), profile)),
        }
        tracing::info!("Profile '{}' saved", name);
        self.persist()
    }

    /// Full replace of an existing profile.
    pub fn edit(&mut self, name: &str, profile: DeviceProfile) -> Result<()> {
        let idx = self
            .position(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        self.profiles[idx].1 = profile;
        tracing::info!("Profile '{}' updated", name);
        self.persist()
    }

    pub fn delete(&mut self, name: &str) -> Result<DeviceProfile> {
        let idx = self
            .position(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let (_, removed) = self.profiles.remove(idx);
        tracing::info!("Profile '{}' deleted", name);
        self.persist()?;
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Result<DeviceProfile> {
        self.position(name)
            .map(|idx| self.profiles[idx].1.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Profile names in file order
    pub fn list(&self) -> Vec<String> {
        self.profiles.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Write the whole registry document to another file.
    pub fn export_to(&self, path: &Path) -> Result<()> {
        write_document(path, &self.profiles)?;
        tracing::info!("Exported {} profiles to {}", self.profiles.len(), path.display());
        Ok(())
    }

    /// Merge profiles from an exported document. Existing names are
    /// overwritten in place, new names are appended. Returns how many
    /// profiles were read.
    pub fn import_from(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Import {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let imported = parse_document(&content).map_err(|e| RegistryError::Import {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let count = imported.len();
        for (name, profile) in imported {
            match self.position(&name) {
                Some(idx) => self.profiles[idx].1 = profile,
                None => self.profiles.push((name, profile)),
            }
        }
        tracing::info!("Imported {} profiles from {}", count, path.display());
        self.persist()?;
        Ok(count)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.profiles.iter().position(|(n, _)| n == name)
    }

    fn persist(&self) -> Result<()> {
        write_document(&self.path, &self.profiles).inspect_err(|e| {
            tracing::error!("{}", e);
        })
    }
}

/// Parse the registry document. Only a document that is not a JSON object
/// fails; records that do not fit [`DeviceProfile`] are logged and skipped
/// so the rest survive the next write.
fn parse_document(content: &str) -> serde_json::Result<Vec<(String, DeviceProfile)>> {
    // Map keeps source order with serde_json's preserve_order feature
    let document: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;
    let profiles = document
        .into_iter()
        .filter_map(|(name, value)| match serde_json::from_value(value) {
            Ok(profile) => Some((name, profile)),
            Err(e) => {
                tracing::warn!("Skipping unreadable profile '{}': {}", name, e);
                None
            }
        })
        .collect();
    Ok(profiles)
}

/// Serialize with 4-space indentation, matching how the file has always
/// been laid out.
fn render_document(profiles: &[(String, DeviceProfile)]) -> serde_json::Result<Vec<u8>> {
    let mut document = serde_json::Map::new();
    for (name, profile) in profiles {
        document.insert(name.clone(), serde_json::to_value(profile)?);
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document.serialize(&mut serializer)?;
    Ok(buf)
}

fn write_document(path: &Path, profiles: &[(String, DeviceProfile)]) -> Result<()> {
    let persist_err = |source: std::io::Error| RegistryError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let bytes = render_document(profiles).map_err(|e| persist_err(e.into()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(persist_err)?;
    }
    std::fs::write(path, bytes).map_err(persist_err)
}
