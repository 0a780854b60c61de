use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SkillmatchError};

/// Top-level configuration for the Skillmatch search core.
///
/// Loaded from `~/.skillmatch/config.toml` by default. Every section is
/// optional; missing keys fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillmatchConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub catalogs: CatalogsConfig,
}

impl SkillmatchConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SkillmatchConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the search core cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(SkillmatchError::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.search.default_k == 0 || self.search.max_k == Some(0) {
            return Err(SkillmatchError::Config(
                "search.default_k and search.max_k must be positive".to_string(),
            ));
        }
        if self.search.filter_overfetch == 0 {
            return Err(SkillmatchError::Config(
                "search.filter_overfetch must be positive".to_string(),
            ));
        }
        if let Some(bad) = self
            .catalogs
            .names
            .iter()
            .find(|name| !is_valid_catalog_name(name))
        {
            return Err(SkillmatchError::Config(format!(
                "invalid catalog name '{}': use letters, digits, '-' or '_'",
                bad
            )));
        }
        Ok(())
    }

    /// Directory holding persisted catalog artifacts.
    pub fn catalog_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join("catalogs")
    }
}

/// Catalog names double as file stems, so they are restricted to a safe set.
pub fn is_valid_catalog_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(raw)
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for persisted catalogs.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.skillmatch/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Directory with `model.onnx` and `tokenizer.json`. When unset the
    /// hashing embedder is used.
    pub model_dir: Option<String>,
    /// Model identifier reported in catalog stats.
    pub model_name: String,
    /// Vector dimension of the hashing embedder.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            model_name: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
        }
    }
}

/// Query defaults and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results returned when the caller does not ask for a count.
    pub default_k: usize,
    /// Optional upper bound on results per query. Unset means a query may
    /// return the whole catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_k: Option<usize>,
    /// Candidate multiplier for filtered searches.
    pub filter_overfetch: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_k: None,
            filter_overfetch: 3,
        }
    }
}

/// Catalogs opened at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogsConfig {
    pub names: Vec<String>,
    /// Write artifacts to `data_dir` after every mutation.
    pub persist: bool,
}

impl Default for CatalogsConfig {
    fn default() -> Self {
        Self {
            names: vec!["skills".to_string(), "resources".to_string()],
            persist: true,
        }
    }
}
