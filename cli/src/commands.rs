//! CLI Commands

use clap::Subcommand;
use websettings_core::{ChildSpec, SettingValue, SettingsBackend};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the value of a key
    Get {
        key: String,
    },

    /// Store a value (parsed as JSON, otherwise taken as a string)
    Set {
        key: String,
        value: String,
    },

    /// Remove a key and everything below it
    Remove {
        key: String,
    },

    /// List the keys below a group
    List {
        /// Group prefix, e.g. "window/"
        #[arg(default_value = "")]
        prefix: String,

        /// List every key below the prefix instead of the immediate children
        #[arg(long)]
        all: bool,
    },

    /// Remove every setting of this organization and application
    Clear,

    /// Show backend information
    Status,
}

/// Parse a value given on the command line
pub fn parse_value(raw: &str) -> SettingValue {
    serde_json::from_str(raw).unwrap_or_else(|_| SettingValue::String(raw.to_string()))
}

fn render(value: &SettingValue) -> String {
    match value {
        SettingValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run `command` against `backend`, returning the lines to print
pub fn execute(command: &Command, backend: &dyn SettingsBackend) -> anyhow::Result<Vec<String>> {
    let lines = match command {
        Command::Get { key } => match backend.get(key) {
            Some(value) => vec![render(&value)],
            None => anyhow::bail!("{} is not set", key),
        },

        Command::Set { key, value } => {
            if !backend.is_writable() {
                anyhow::bail!("settings are not writable");
            }
            backend.set(key, parse_value(value));
            Vec::new()
        }

        Command::Remove { key } => {
            backend.remove(key);
            Vec::new()
        }

        Command::List { prefix, all } => {
            let spec = if *all {
                ChildSpec::AllKeys
            } else {
                ChildSpec::ImmediateChildren
            };
            backend.children(prefix, spec)
        }

        Command::Clear => {
            backend.clear();
            Vec::new()
        }

        Command::Status => {
            let file = backend
                .file_name()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            vec![
                format!("Format:    {}", backend.format()),
                format!("Scope:     {}", backend.scope()),
                format!("File:      {}", file),
                format!("Writable:  {}", if backend.is_writable() { "yes" } else { "no" }),
                format!("Fallbacks: {}", if backend.fallbacks_enabled() { "on" } else { "off" }),
                format!("Status:    {:?}", backend.status()),
            ]
        }
    };

    Ok(lines)
}
