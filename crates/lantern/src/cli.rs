//! Command-line interface for the Lantern server.
//!
//! Every option overrides the matching setting in the configuration file.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the telnet bind address
    pub bind_address: Option<String>,
    /// Optional override for the WebSocket bind address
    pub ws_bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

pub fn command() -> Command {
    Command::new("Lantern Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Telnet and WebSocket server for text games")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Telnet bind address (e.g., 127.0.0.1:4000)"),
        )
        .arg(
            Arg::new("ws-bind")
                .short('w')
                .long("ws-bind")
                .value_name("ADDRESS")
                .help("WebSocket bind address (e.g., 127.0.0.1:4001)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on bad input.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            bind_address: matches.get_one::<String>("bind").cloned(),
            ws_bind_address: matches.get_one::<String>("ws-bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
