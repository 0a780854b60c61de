//! CLI argument definitions for the skillmatch operator tool.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Skillmatch - semantic search over skill and learning-resource catalogs.
#[derive(Parser, Debug)]
#[command(name = "skillmatch", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the persisted catalogs.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replace a catalog's contents with the records in a JSON file.
    Rebuild {
        catalog: String,
        /// JSON array of records.
        records: PathBuf,
    },

    /// Append the records in a JSON file to a catalog.
    Append {
        catalog: String,
        records: PathBuf,
    },

    /// Rank a catalog's records against a free-text query.
    Search {
        catalog: String,
        query: String,
        /// Number of results (defaults to `search.default_k`).
        #[arg(short = 'k')]
        k: Option<usize>,
        /// Only keep records whose field equals the value. Repeatable.
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },

    /// Recommend records for a set of current skills and a career goal.
    Recommend {
        catalog: String,
        #[arg(long = "skill")]
        skills: Vec<String>,
        #[arg(long = "goal")]
        goal: Option<String>,
        #[arg(short = 'k')]
        k: Option<usize>,
    },

    /// Record count, dimension and model of one or all catalogs.
    Stats { catalog: Option<String> },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SKILLMATCH_CONFIG env var > ~/.skillmatch/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SKILLMATCH_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > SKILLMATCH_DATA_DIR env var.
    /// Returns `None` if neither is set (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        if let Some(ref p) = self.data_dir {
            return Some(p.to_string_lossy().to_string());
        }
        std::env::var("SKILLMATCH_DATA_DIR")
            .ok()
            .filter(|v| !v.is_empty())
    }

    /// Resolve the log level: --log-level flag, else the config value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Parse a `key=value` filter argument.
fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".skillmatch").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".skillmatch").join("config.toml");
    }
    PathBuf::from("config.toml")
}
