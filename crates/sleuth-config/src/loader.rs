use std::path::{Path, PathBuf};

use sleuth_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_DIR: &str = ".sleuth";
const CONFIG_FILE: &str = "config.toml";

/// Resolves and reads `config.toml`, then layers `.env` and environment
/// overrides on top.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Search `./.sleuth/config.toml`, then `~/.sleuth/config.toml`.
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from(CONFIG_DIR).join(CONFIG_FILE)];
        if let Some(home) = dirs::home_dir() {
            search_paths.push(home.join(CONFIG_DIR).join(CONFIG_FILE));
        }
        Self { search_paths }
    }

    /// Use exactly one file; it must exist.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            search_paths: vec![path.into()],
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Load the first config file found (or defaults), then apply `.env`
    /// and process environment overrides.
    pub fn load(&self) -> Result<AppConfig> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("loaded environment from {}", path.display());
        }

        let mut config = match self.search_paths.iter().find(|p| p.is_file()) {
            Some(path) => {
                info!("loading config from {}", path.display());
                Self::from_file(path)?
            }
            None if self.search_paths.len() == 1 => {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    self.search_paths[0].display()
                )));
            }
            None => AppConfig::default(),
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `SLEUTH_*` overrides using `lookup` as the environment source.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty("SLEUTH_API_KEY").or_else(|| non_empty("OPENAI_API_KEY")) {
        config.llm.api_key = Some(key);
    }
    if let Some(url) = non_empty("SLEUTH_BASE_URL") {
        config.llm.base_url = url;
    }
    if let Some(model) = non_empty("SLEUTH_MODEL") {
        config.llm.model = model;
    }
    if let Some(dir) = non_empty("SLEUTH_STATE_DIR") {
        config.state.dir = PathBuf::from(dir);
    }
    if let Some(flag) = non_empty("SLEUTH_PERF_MODE") {
        config.perf_mode = matches!(
            flag.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
}
