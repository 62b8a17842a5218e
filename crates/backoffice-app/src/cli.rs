//! CLI argument definitions for the `backoffice` binary.
//!
//! Uses `clap` with derive macros. Priority resolution: CLI args > env vars >
//! config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Back-office agents over a shared markdown vault.
#[derive(Parser, Debug)]
#[command(name = "backoffice", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Vault root directory.
    #[arg(long = "vault", global = true)]
    pub vault: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Log sends instead of calling providers.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the local agent: tasks, approvals, dispatch and sweeps.
    Orchestrator,
    /// Run the draft-only cloud agent.
    CloudAgent,
    /// Run a polling dispatcher for one action type.
    Dispatcher {
        /// Action type to send.
        #[arg(long, default_value = "whatsapp_reply")]
        action: String,
        /// Process the current approvals once and exit.
        #[arg(long)]
        once: bool,
    },
    /// Expire past-due approval requests and exit.
    SweepExpired,
    /// List current task claims.
    Claims {
        /// Only this agent's claims.
        #[arg(long)]
        agent: Option<String>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > BACKOFFICE_CONFIG env var > ~/.backoffice/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("BACKOFFICE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".backoffice").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".backoffice").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let args = CliArgs::try_parse_from(["backoffice", "orchestrator"]).unwrap();
        assert_eq!(args.command, Command::Orchestrator);
        assert!(!args.dry_run);

        let args = CliArgs::try_parse_from(["backoffice", "cloud-agent", "--dry-run"]).unwrap();
        assert_eq!(args.command, Command::CloudAgent);
        assert!(args.dry_run);

        let args = CliArgs::try_parse_from(["backoffice", "sweep-expired"]).unwrap();
        assert_eq!(args.command, Command::SweepExpired);
    }

    #[test]
    fn test_dispatcher_defaults() {
        let args = CliArgs::try_parse_from(["backoffice", "dispatcher"]).unwrap();
        assert_eq!(
            args.command,
            Command::Dispatcher {
                action: "whatsapp_reply".to_string(),
                once: false,
            }
        );

        let args = CliArgs::try_parse_from([
            "backoffice",
            "dispatcher",
            "--action",
            "email_send",
            "--once",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::Dispatcher {
                action: "email_send".to_string(),
                once: true,
            }
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "backoffice",
            "claims",
            "--agent",
            "local",
            "--config",
            "/tmp/bo.toml",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::Claims {
                agent: Some("local".to_string())
            }
        );
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/bo.toml"));
    }

    #[test]
    fn test_log_level_priority() {
        let args = CliArgs::try_parse_from(["backoffice", "-l", "debug", "claims"]).unwrap();
        assert_eq!(args.resolve_log_level("info"), "debug");
        let args = CliArgs::try_parse_from(["backoffice", "claims"]).unwrap();
        assert_eq!(args.resolve_log_level("warn"), "warn");
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(CliArgs::try_parse_from(["backoffice"]).is_err());
    }
}
