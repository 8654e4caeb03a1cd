//! Embedding gateway.
//!
//! - `Embedder`: the text -> fixed-length vector capability retrieval depends on
//! - `EmbeddingModel`: fastembed-backed implementation with a local model cache
//! - `embed_with_timeout`: bounds a single call by a caller-supplied timeout

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Turns text into a vector of fixed dimensionality.
///
/// Implementations must be deterministic for identical input and must accept
/// the empty string.
pub trait Embedder: Send + Sync {
    /// Model name, used to tag persisted vectors.
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Compute the SHA256 hash of a model name for storage identification.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Run `embedder.embed(text)` on a helper thread and wait at most `timeout`.
///
/// A call that overruns keeps running on its thread; its result is dropped.
///
/// Every call spawns its own short-lived thread. Threads are not reused and
/// cannot be cancelled: while the model hangs, each timed-out call leaves one
/// thread blocked, queued behind the model mutex, until the model returns.
pub fn embed_with_timeout(
    embedder: &Arc<dyn Embedder>,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, EmbeddingError> {
    let (tx, rx) = mpsc::channel();
    let embedder = Arc::clone(embedder);
    let text = text.to_string();

    std::thread::Builder::new()
        .name("lumen-embed".to_string())
        .spawn(move || {
            let _ = tx.send(embedder.embed(&text));
        })
        .map_err(|e| EmbeddingError::EmbeddingFailed(format!("Failed to spawn embed thread: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(EmbeddingError::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::EmbeddingFailed(
            "Embed thread exited without a result".to_string(),
        )),
    }
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model is downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let download_timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        // First use may download the model; bound it the same way as a call.
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true);
            let _ = tx.send(
                TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string())),
            );
        });
        let mut model = match rx.recv_timeout(download_timeout) {
            Ok(result) => result?,
            Err(_) => {
                return Err(EmbeddingError::InitFailed(format!(
                    "Model download timed out after {} seconds",
                    download_timeout.as_secs()
                )))
            }
        };

        let dimensions = Self::detect_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix to MiniLM for quantized)",
                name
            ))),
        }
    }

    /// Embed a sample text to learn the model's output dimensions.
    fn detect_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let sample = model
            .embed(vec!["transaction"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to detect dimensions: {}", e)))?;

        sample
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Embedder for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowEmbedder;

    impl Embedder for SlowEmbedder {
        fn name(&self) -> &str {
            "slow"
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(vec![1.0, 0.0])
        }
    }

    #[test]
    fn test_timeout_is_reported_as_error() {
        let embedder: Arc<dyn Embedder> = Arc::new(SlowEmbedder);
        let result = embed_with_timeout(&embedder, "milk", Duration::from_millis(20));
        assert!(matches!(result, Err(EmbeddingError::Timeout(_))));
    }

    #[test]
    fn test_within_timeout_returns_vector() {
        let embedder: Arc<dyn Embedder> = Arc::new(SlowEmbedder);
        let result = embed_with_timeout(&embedder, "milk", Duration::from_secs(10)).unwrap();
        assert_eq!(result, vec![1.0, 0.0]);
    }

    #[test]
    fn test_later_call_succeeds_after_timeout() {
        let embedder: Arc<dyn Embedder> = Arc::new(SlowEmbedder);
        let timed_out = embed_with_timeout(&embedder, "milk", Duration::from_millis(20));
        assert!(matches!(timed_out, Err(EmbeddingError::Timeout(_))));

        let result = embed_with_timeout(&embedder, "bread", Duration::from_secs(10)).unwrap();
        assert_eq!(result, vec![1.0, 0.0]);
    }

    #[test]
    fn test_model_id_hash_is_stable_and_distinct() {
        assert_eq!(model_id_hash("all-MiniLM-L6-v2"), model_id_hash("all-MiniLM-L6-v2"));
        assert_ne!(model_id_hash("all-MiniLM-L6-v2"), model_id_hash("bge-base-en-v1.5"));
    }

    #[test]
    fn test_invalid_model_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = EmbeddingModel::new("nonexistent-model", temp_dir.path().to_path_buf(), None);
        assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
    }

    #[test]
    #[ignore = "requires model download"]
    fn test_embedding_generation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let model =
            EmbeddingModel::new("all-MiniLM-L6-v2", temp_dir.path().to_path_buf(), None).unwrap();

        assert_eq!(model.dimensions(), 384);
        let embedding = model.embed("Transaction at Walmart for groceries").unwrap();
        assert_eq!(embedding.len(), 384);
        assert_eq!(model.embed("").unwrap().len(), 384);
    }
}
