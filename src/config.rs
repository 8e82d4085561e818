use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            extraction: ExtractionConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./catalog_storage")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Model provider: `gemini` or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Render resolution for PDF pages.
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Pages per model call during full-content extraction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_dpi() -> u32 {
    200
}
fn default_batch_size() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Number of ranked catalogs the orchestrator will try per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Load the config file if present, otherwise fall back to defaults.
///
/// Lets `cqa` run without a config file the way the original application
/// ran on built-in settings.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        let config = Config::default();
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.extraction.batch_size == 0 {
        anyhow::bail!("extraction.batch_size must be > 0");
    }

    if config.extraction.dpi == 0 {
        anyhow::bail!("extraction.dpi must be > 0");
    }

    if config.search.top_k < 1 {
        anyhow::bail!("search.top_k must be >= 1");
    }

    match config.llm.provider.as_str() {
        "gemini" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be gemini or disabled.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.search.top_k, 3);
        assert_eq!(config.extraction.batch_size, 8);
        assert!(config.llm.is_enabled());
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut config = Config::default();
        config.llm.provider = "openrouter".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = Config::default();
        config.extraction.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            dir = "/tmp/catalogs"

            [llm]
            provider = "disabled"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.dir, PathBuf::from("/tmp/catalogs"));
        assert!(!config.llm.is_enabled());
        assert_eq!(config.search.top_k, 3);
    }
}
