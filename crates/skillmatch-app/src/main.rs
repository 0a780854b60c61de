//! Skillmatch operator binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Build the shared context (embedder + configured catalogs)
//! 3. Run one administrative command or query
//! 4. Print the result as JSON on stdout
//!
//! Logs go to stderr so stdout stays machine-readable.

mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use skillmatch_core::config::SkillmatchConfig;
use skillmatch_core::error::{Result, SkillmatchError};
use skillmatch_core::types::Record;
use skillmatch_vector::{CatalogManager, SearchFilters, SearchService, SkillmatchContext};

use cli::{CliArgs, Command};

fn load_config(args: &CliArgs) -> Result<SkillmatchConfig> {
    let path = args.resolve_config_path();
    let mut config = if path.exists() {
        SkillmatchConfig::load(&path)?
    } else {
        SkillmatchConfig::default()
    };
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    config.validate()?;
    Ok(config)
}

/// Read a JSON array of records.
fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)?;
    let records: Vec<Record> = serde_json::from_str(&content)?;
    tracing::debug!(path = %path.display(), count = records.len(), "Records read");
    Ok(records)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, ctx: Arc<SkillmatchContext>) -> Result<()> {
    let manager = CatalogManager::new(Arc::clone(&ctx));
    let search = SearchService::new(Arc::clone(&ctx));
    let default_k = ctx.search_config().default_k;

    match command {
        Command::Rebuild { catalog, records } => {
            let records = read_records(&records)?;
            let count = manager.rebuild(&catalog, &records).await?;
            print_json(&manager.stats(&catalog)?)?;
            tracing::info!(catalog = %catalog, count, "Rebuild finished");
        }
        Command::Append { catalog, records } => {
            let records = read_records(&records)?;
            let added = manager.append_records(&catalog, &records).await?;
            print_json(&manager.stats(&catalog)?)?;
            tracing::info!(catalog = %catalog, added, "Append finished");
        }
        Command::Search {
            catalog,
            query,
            k,
            filters,
        } => {
            let filters = filters
                .into_iter()
                .fold(SearchFilters::new(), |f, (key, value)| f.with_field(key, value));
            let results = search
                .search_filtered(&catalog, &query, k.unwrap_or(default_k), &filters)
                .await?;
            print_json(&results)?;
        }
        Command::Recommend {
            catalog,
            skills,
            goal,
            k,
        } => {
            let results = search
                .recommend(&catalog, &skills, goal.as_deref(), k.unwrap_or(default_k))
                .await?;
            print_json(&results)?;
        }
        Command::Stats { catalog: Some(name) } => print_json(&manager.stats(&name)?)?,
        Command::Stats { catalog: None } => print_json(&manager.stats_all())?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Tracing. RUST_LOG wins over the flag and config.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::debug!("Starting skillmatch v{}", env!("CARGO_PKG_VERSION"));

    let ctx = match SkillmatchContext::open(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open catalogs");
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(context = ?ctx, "Context ready");

    match run(args.command, ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ SkillmatchError::Persistence(_)) => {
            eprintln!("error: {} (changes are not saved)", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str, suffix: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_config_applies_data_dir_flag() {
        let file = write_temp(
            "[general]\ndata_dir = \"/from/config\"\n\n[search]\ndefault_k = 7\n",
            ".toml",
        );
        let config_path = file.path().to_string_lossy().to_string();
        let args = CliArgs::try_parse_from([
            "skillmatch",
            "--config",
            &config_path,
            "-d",
            "/from/flag",
            "stats",
        ])
        .unwrap();

        let config = load_config(&args).unwrap();
        assert_eq!(config.general.data_dir, "/from/flag");
        assert_eq!(config.search.default_k, 7);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("absent.toml").to_string_lossy().to_string();
        let data_dir = dir.path().to_string_lossy().to_string();
        let args =
            CliArgs::try_parse_from(["skillmatch", "-c", &config_path, "-d", &data_dir, "stats"])
                .unwrap();

        let config = load_config(&args).unwrap();
        assert_eq!(config.general.data_dir, data_dir);
        assert_eq!(config.catalogs.names, vec!["skills", "resources"]);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let file = write_temp("[search]\ndefault_k = 0\n", ".toml");
        let config_path = file.path().to_string_lossy().to_string();
        let args = CliArgs::try_parse_from(["skillmatch", "-c", &config_path, "-d", "/tmp", "stats"])
            .unwrap();

        assert!(matches!(load_config(&args), Err(SkillmatchError::Config(_))));
    }

    #[test]
    fn test_read_records_accepts_source_field_names() {
        let file = write_temp(
            r#"[
                {"skill_id": 1, "skill_name": "Python", "category": "programming"},
                {"resource_id": 2, "title": "Intro to SQL", "resource_type": "course"}
            ]"#,
            ".json",
        );

        let records = read_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].display.name, "Python");
        assert_eq!(records[1].id, 2);
        assert_eq!(records[1].display.name, "Intro to SQL");
        assert_eq!(records[1].display.extra["resource_type"], "course");
    }

    #[test]
    fn test_read_records_rejects_malformed_json() {
        let file = write_temp(r#"[{"id": 1, "name": "Python"}"#, ".json");
        assert!(read_records(file.path()).is_err());
    }
}
