use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::semantic::DEFAULT_MODEL;

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default bound on a single embedding call in seconds
const DEFAULT_EMBED_TIMEOUT_SECS: u64 = 30;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// Default neighbor count when a caller omits k
const DEFAULT_K: usize = 5;
const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Configuration for transaction retrieval
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Timeout for one embedding call in seconds
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_k")]
    pub default_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            embed_timeout_secs: DEFAULT_EMBED_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            default_k: DEFAULT_K,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_embed_timeout_secs() -> u64 {
    DEFAULT_EMBED_TIMEOUT_SECS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_k() -> usize {
    DEFAULT_K
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let retrieval = &self.retrieval;

        if retrieval.model.trim().is_empty() {
            bail!("retrieval.model must not be empty");
        }
        if retrieval.embed_timeout_secs == 0 {
            bail!("retrieval.embed_timeout_secs must be greater than 0");
        }
        if retrieval.download_timeout_secs == 0 {
            bail!("retrieval.download_timeout_secs must be greater than 0");
        }
        if retrieval.default_k == 0 {
            bail!("retrieval.default_k must be greater than 0");
        }

        self.daemon
            .listen
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("daemon.listen is not a socket address: '{}'", self.daemon.listen))?;

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let path = base_path.join(CONFIG_FILE_NAME);

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("failed to create {}", base_path.display()))?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = self.base_path.join(CONFIG_FILE_NAME);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join("config.yaml").exists());
        assert_eq!(config.retrieval, RetrievalConfig::default());
        assert_eq!(config.daemon.listen, "127.0.0.1:8080");
    }

    #[test]
    fn test_missing_fields_are_filled_and_saved() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.yaml"),
            "retrieval:\n  model: bge-small-en-v1.5\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.retrieval.model, "bge-small-en-v1.5");
        assert_eq!(config.retrieval.default_k, 5);

        let saved = std::fs::read_to_string(tmp.path().join("config.yaml")).unwrap();
        assert!(saved.contains("embed_timeout_secs: 30"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.yaml"),
            "retrieval:\n  embed_timeout_secs: 0\n",
        )
        .unwrap();
        assert!(Config::load_with(tmp.path()).is_err());

        std::fs::write(tmp.path().join("config.yaml"), "daemon:\n  listen: nowhere\n").unwrap();
        assert!(Config::load_with(tmp.path()).is_err());
    }
}
