use crate::{
    app::service::AppService,
    config::Config,
    lock::FileLock,
    semantic::{EmbeddingModel, RetrievalService},
    transactions::TransactionCsv,
};
use anyhow::{anyhow, Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Build the application service over the local data directory.
    ///
    /// Takes the directory lock first and keeps it inside the returned
    /// service, so only one CLI command or daemon writes at a time.
    pub fn create_app_service(paths: &AppPaths) -> Result<AppService> {
        let lock = FileLock::try_acquire(&paths.base_path)
            .context("Failed to lock the data directory")?;

        let config = Config::load_with(&paths.base_path)?;
        let retrieval_config = &config.retrieval;

        let store = Arc::new(
            TransactionCsv::load(&paths.transactions_path.to_string_lossy())
                .context("Failed to load transactions")?,
        );

        log::info!("Loading embedding model '{}'", retrieval_config.model);
        let embedder = Arc::new(
            EmbeddingModel::new(
                &retrieval_config.model,
                paths.base_path.clone(),
                Some(Duration::from_secs(retrieval_config.download_timeout_secs)),
            )
            .context("Failed to initialize embedding model")?,
        );

        let retrieval = RetrievalService::open(
            embedder,
            store.clone(),
            paths.vectors_path.clone(),
            Duration::from_secs(retrieval_config.embed_timeout_secs),
        )
        .context("Failed to open vector index")?;

        Ok(AppService::new(store, Arc::new(retrieval), config).with_lock(lock))
    }

    /// Get application paths, creating the base directory if needed
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths::new(base_path))
    }

    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var("LUMEN_BASE_PATH") {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .map_err(|e| anyhow!("Could not determine home directory: {e:?}"))?
            .context("Home directory path is empty")?;

        Ok(home.join(".local/share/lumen"))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
    pub transactions_path: PathBuf,
    pub vectors_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            transactions_path: base_path.join("transactions.csv"),
            vectors_path: base_path.join("vectors.bin"),
            base_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_paths() {
        let paths = AppPaths::new(PathBuf::from("/test/base"));

        assert_eq!(paths.base_path, PathBuf::from("/test/base"));
        assert_eq!(paths.transactions_path, PathBuf::from("/test/base/transactions.csv"));
        assert_eq!(paths.vectors_path, PathBuf::from("/test/base/vectors.bin"));
    }
}
