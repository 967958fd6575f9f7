//! `adbpanel profile ...` subcommands.

use crate::{Cli, OutputFormat};
use adbpanel_core::registry::DEFAULT_PORT;
use adbpanel_core::{DeviceProfile, ProfileInput, ProfileRegistry};
use anyhow::Result;
use clap::Subcommand;
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ProfileAction {
    /// Save a new profile (asks before overwriting)
    Add {
        name: String,
        mac: String,

        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Static IP; skips MAC lookup on connect
        #[arg(long)]
        ip: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,

        #[arg(short, long)]
        color: Option<String>,

        /// Overwrite an existing profile without asking
        #[arg(long)]
        force: bool,
    },

    /// Change fields of a profile; fields not given keep their value
    Edit {
        name: String,

        #[arg(short, long)]
        mac: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long, conflicts_with = "clear_ip")]
        ip: Option<String>,

        /// Remove the static IP so the MAC is looked up again
        #[arg(long)]
        clear_ip: bool,

        #[arg(short, long)]
        notes: Option<String>,

        #[arg(short, long)]
        color: Option<String>,
    },

    /// Delete a profile (asks for confirmation)
    #[command(alias = "rm")]
    Delete {
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List saved profiles
    #[command(alias = "ls")]
    List,

    /// Show one profile
    Show { name: String },

    /// Write all profiles to a file
    Export { path: PathBuf },

    /// Merge profiles from an exported file
    Import { path: PathBuf },
}

pub fn run(cli: &Cli, registry: &mut ProfileRegistry, action: &ProfileAction) -> Result<()> {
    match action {
        ProfileAction::Add {
            name,
            mac,
            port,
            ip,
            notes,
            color,
            force,
        } => {
            if registry.contains(name)
                && !force
                && !confirm(&format!("Profile '{}' exists. Overwrite?", name))?
            {
                println!("Cancelled.");
                return Ok(());
            }
            let profile = DeviceProfile::from(ProfileInput {
                mac: mac.clone(),
                port: Some(*port),
                ip: ip.clone(),
                notes: notes.clone(),
                color: color.clone(),
            });
            registry.add(name, profile.clone())?;
            print_saved(cli, name, &profile, "saved");
        }
        ProfileAction::Edit {
            name,
            mac,
            port,
            ip,
            clear_ip,
            notes,
            color,
        } => {
            let current = registry.get(name)?;
            let profile = apply_edit(
                current,
                ProfileEdit {
                    mac: mac.clone(),
                    port: *port,
                    ip: ip.clone(),
                    clear_ip: *clear_ip,
                    notes: notes.clone(),
                    color: color.clone(),
                },
            );
            registry.edit(name, profile.clone())?;
            print_saved(cli, name, &profile, "updated");
        }
        ProfileAction::Delete { name, yes } => {
            // Fail on unknown names before asking anything
            registry.get(name)?;
            if !yes && !confirm(&format!("Delete profile '{}'?", name))? {
                println!("Cancelled.");
                return Ok(());
            }
            registry.delete(name)?;
            match cli.format {
                OutputFormat::Text => println!("Profile '{}' deleted", name),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "status": "deleted",
                        "name": name,
                    }));
                }
            }
        }
        ProfileAction::List => {
            let names = registry.list();
            match cli.format {
                OutputFormat::Text => {
                    if names.is_empty() {
                        println!("No profiles saved. Add one with: adbpanel profile add NAME MAC");
                    }
                    for name in &names {
                        let profile = registry.get(name)?;
                        println!(
                            "  {:20} {:20} {}",
                            name,
                            profile.mac,
                            profile.static_ip().unwrap_or("(by MAC)")
                        );
                    }
                }
                OutputFormat::Json => {
                    let mut profiles = Vec::with_capacity(names.len());
                    for name in &names {
                        profiles.push(profile_json(name, &registry.get(name)?));
                    }
                    println!("{}", serde_json::Value::Array(profiles));
                }
            }
        }
        ProfileAction::Show { name } => {
            let profile = registry.get(name)?;
            match cli.format {
                OutputFormat::Text => print!("{}", profile.describe(name)),
                OutputFormat::Json => println!("{}", profile_json(name, &profile)),
            }
        }
        ProfileAction::Export { path } => {
            registry.export_to(path)?;
            match cli.format {
                OutputFormat::Text => {
                    println!("Exported {} profiles to {}", registry.len(), path.display())
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "status": "exported",
                        "count": registry.len(),
                        "path": path,
                    }));
                }
            }
        }
        ProfileAction::Import { path } => {
            let count = registry.import_from(path)?;
            match cli.format {
                OutputFormat::Text => println!("Imported {} profiles from {}", count, path.display()),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "status": "imported",
                        "count": count,
                        "path": path,
                    }));
                }
            }
        }
    }

    Ok(())
}

/// Edit form: `None` keeps the current value.
struct ProfileEdit {
    mac: Option<String>,
    port: Option<u16>,
    ip: Option<String>,
    clear_ip: bool,
    notes: Option<String>,
    color: Option<String>,
}

/// Pre-fill from `current`, then overlay what the user changed.
fn apply_edit(current: DeviceProfile, edit: ProfileEdit) -> DeviceProfile {
    let ip = if edit.clear_ip {
        None
    } else {
        edit.ip.or(current.ip)
    };
    DeviceProfile {
        mac: edit.mac.unwrap_or(current.mac),
        port: edit.port.unwrap_or(current.port),
        ip,
        notes: edit.notes.or(current.notes),
        color: edit.color.or(current.color),
    }
}

fn profile_json(name: &str, profile: &DeviceProfile) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "mac": profile.mac,
        "port": profile.port,
        "ip": profile.ip,
        "notes": profile.notes,
        "color": profile.color,
    })
}

fn print_saved(cli: &Cli, name: &str, profile: &DeviceProfile, status: &str) {
    match cli.format {
        OutputFormat::Text => println!("Profile '{}' {}", name, status),
        OutputFormat::Json => {
            let mut value = profile_json(name, profile);
            value["status"] = serde_json::Value::from(status);
            println!("{}", value);
        }
    }
}

/// Ask a yes/no question on the terminal; anything but y/yes is no.
fn confirm(question: &str) -> Result<bool> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{} [y/N] ", question)?;
    stderr.flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> DeviceProfile {
        DeviceProfile {
            mac: "AA:BB:CC:11:22:33".to_string(),
            port: 5555,
            ip: Some("192.168.1.50".to_string()),
            notes: Some("living room".to_string()),
            color: Some("#00ff00".to_string()),
        }
    }

    fn no_changes() -> ProfileEdit {
        ProfileEdit {
            mac: None,
            port: None,
            ip: None,
            clear_ip: false,
            notes: None,
            color: None,
        }
    }

    #[test]
    fn test_edit_keeps_unspecified_fields() {
        let edited = apply_edit(
            stored(),
            ProfileEdit {
                port: Some(5037),
                ..no_changes()
            },
        );
        assert_eq!(
            edited,
            DeviceProfile {
                port: 5037,
                ..stored()
            }
        );
    }

    #[test]
    fn test_edit_can_clear_static_ip() {
        let edited = apply_edit(
            stored(),
            ProfileEdit {
                clear_ip: true,
                ..no_changes()
            },
        );
        assert_eq!(edited.ip, None);
        assert_eq!(edited.mac, "AA:BB:CC:11:22:33");
    }

    #[test]
    fn test_profile_json_fields() {
        let value = profile_json("Pixel", &stored());
        assert_eq!(value["name"], "Pixel");
        assert_eq!(value["port"], 5555);
        assert_eq!(value["ip"], "192.168.1.50");
    }
}
