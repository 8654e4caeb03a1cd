//! Retrieval service for transaction similarity search.
//!
//! Coordinates description building, embedding and the vector index:
//! - Indexes transactions (upsert by transaction id)
//! - Ranks stored transactions against free-text queries
//! - Builds the neighborhood context of a stored transaction
//!
//! Expected failures (embedding errors, unknown ids, blank queries) never
//! surface as errors: they are logged and turn into `false`, an empty list or
//! `None`. Mutations are applied in place under the write lock and rolled back
//! when `vectors.bin` cannot be written, so a failed write leaves the index as
//! it was.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;

use crate::semantic::description::describe;
use crate::semantic::embeddings::{embed_with_timeout, model_id_hash, Embedder};
use crate::semantic::index::{record_id, RecordMetadata, VectorIndex, VectorRecord};
use crate::semantic::storage::{VectorStorage, VectorStorageError};
use crate::semantic::summary::summarize;
use crate::transactions::{Transaction, TransactionLookup};

/// Upper bound on results per query, whatever the caller asks for
pub const MAX_RESULTS: usize = 100;

/// Statistics are computed over at most this many records
pub const STATS_SAMPLE_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Embedder reports zero dimensions")]
    ZeroDimensions,

    #[error("Storage error: {0}")]
    Storage(#[from] VectorStorageError),
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarTransaction {
    pub transaction_id: i64,
    pub vendor: String,
    pub category: String,
    pub date: String,
    pub amount: f64,
    pub item_count: u32,
    /// Description the stored vector was built from
    pub document: String,
    /// `1 - cosine distance`, rounded to 3 decimals
    pub similarity_score: f64,
}

/// Neighborhood of a stored transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionContext {
    pub current_transaction: Transaction,
    pub similar_transactions: Vec<SimilarTransaction>,
    pub summary: String,
}

/// Index statistics.
///
/// `total_records` and `dimension` are exact. The unique counts and average
/// amount are computed over the first [`STATS_SAMPLE_LIMIT`] records only and
/// are approximate for larger indexes; `sampled` says how many were looked at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_records: usize,
    pub unique_categories: usize,
    pub unique_vendors: usize,
    pub average_amount: f64,
    pub dimension: usize,
    pub sampled: usize,
    pub model: String,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Service for semantic search over transactions.
pub struct RetrievalService {
    embedder: Arc<dyn Embedder>,
    lookup: Arc<dyn TransactionLookup>,
    index: RwLock<VectorIndex>,
    storage: Option<VectorStorage>,
    model_id: [u8; 32],
    embed_timeout: Duration,
}

impl RetrievalService {
    /// Create a service with an index that lives only in memory.
    pub fn in_memory(
        embedder: Arc<dyn Embedder>,
        lookup: Arc<dyn TransactionLookup>,
        embed_timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        Self::build(embedder, lookup, None, embed_timeout)
    }

    /// Create a service persisted at `vectors_path`, loading what is there.
    ///
    /// A file written by another model or a newer format version is replaced
    /// by a fresh index. Any other load failure is returned.
    pub fn open(
        embedder: Arc<dyn Embedder>,
        lookup: Arc<dyn TransactionLookup>,
        vectors_path: PathBuf,
        embed_timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        Self::build(
            embedder,
            lookup,
            Some(VectorStorage::new(vectors_path)),
            embed_timeout,
        )
    }

    fn build(
        embedder: Arc<dyn Embedder>,
        lookup: Arc<dyn TransactionLookup>,
        storage: Option<VectorStorage>,
        embed_timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let dimensions = embedder.dimensions();
        if dimensions == 0 {
            return Err(RetrievalError::ZeroDimensions);
        }
        let model_id = model_id_hash(embedder.name());

        let index = match &storage {
            Some(storage) if storage.exists() => match storage.load(&model_id, dimensions) {
                Ok(idx) => {
                    log::info!(
                        "Loaded {} vectors from {}",
                        idx.count(),
                        storage.path().display()
                    );
                    idx
                }
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!("Model changed, creating fresh index");
                    VectorIndex::new(dimensions)
                }
                Err(VectorStorageError::VersionMismatch(file_ver, _)) => {
                    log::warn!(
                        "Storage version {} unsupported, creating fresh index",
                        file_ver
                    );
                    VectorIndex::new(dimensions)
                }
                Err(e) => {
                    log::error!("Failed to load vectors: {}", e);
                    return Err(e.into());
                }
            },
            _ => {
                log::info!("No existing index, starting fresh");
                VectorIndex::new(dimensions)
            }
        };

        Ok(Self {
            embedder,
            lookup,
            index: RwLock::new(index),
            storage,
            model_id,
            embed_timeout,
        })
    }

    fn read_index(&self) -> RwLockReadGuard<'_, VectorIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, VectorIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, index: &VectorIndex) -> Result<(), VectorStorageError> {
        match &self.storage {
            Some(storage) => storage.save(index, &self.model_id),
            None => Ok(()),
        }
    }

    /// Index a transaction, replacing any record for the same id.
    ///
    /// Returns `false` when the description could not be embedded or the
    /// record could not be stored; the index is left unchanged in that case.
    pub fn add_transaction(&self, tx: &Transaction) -> bool {
        let document = describe(tx);

        let vector = match embed_with_timeout(&self.embedder, &document, self.embed_timeout) {
            Ok(vector) => vector,
            Err(e) => {
                log::error!("Error embedding transaction {}: {}", tx.id, e);
                return false;
            }
        };

        let metadata = RecordMetadata::new(
            tx.id,
            tx.vendor.as_deref(),
            tx.category.as_deref(),
            tx.date.as_deref(),
            tx.amount,
            tx.items.len(),
        );
        let record = VectorRecord::new(vector, metadata, document);

        let id = record.id.clone();
        let mut index = self.write_index();

        let previous = match index.upsert(record) {
            Ok(previous) => previous,
            Err(e) => {
                log::error!("Error adding transaction {} to vector index: {}", tx.id, e);
                return false;
            }
        };

        if let Err(e) = self.persist(&index) {
            log::error!("Error saving transaction {} to vector index: {}", tx.id, e);
            match previous {
                // the replaced record has the same id and dimensions, so this cannot fail
                Some(previous) => {
                    let _ = index.upsert(previous);
                }
                None => {
                    index.delete(&id);
                }
            }
            return false;
        }

        log::info!("Added transaction {} to vector index", tx.id);
        true
    }

    /// Drop the record of a transaction. Returns whether one was removed.
    pub fn remove_transaction(&self, transaction_id: i64) -> bool {
        let mut index = self.write_index();
        let Some(removed) = index.delete(&record_id(transaction_id)) else {
            return false;
        };

        if let Err(e) = self.persist(&index) {
            log::error!(
                "Error removing transaction {} from vector index: {}",
                transaction_id,
                e
            );
            index.restore(removed);
            return false;
        }

        log::info!(
            "Removed transaction {} from vector index",
            removed.record().transaction_id()
        );
        true
    }

    /// Find the stored transactions closest in meaning to `query`.
    ///
    /// Returns at most `min(k, MAX_RESULTS)` hits, best first. A blank query
    /// or `k == 0` returns nothing without calling the embedder.
    pub fn find_similar(&self, query: &str, k: usize) -> Vec<SimilarTransaction> {
        let k = k.min(MAX_RESULTS);
        if k == 0 {
            return vec![];
        }
        if query.trim().is_empty() {
            log::warn!("Empty query provided");
            return vec![];
        }

        let vector = match embed_with_timeout(&self.embedder, query, self.embed_timeout) {
            Ok(vector) => vector,
            Err(e) => {
                log::error!("Error embedding search query: {}", e);
                return vec![];
            }
        };

        let neighbors = match self.read_index().query(&vector, k) {
            Ok(neighbors) => neighbors,
            Err(e) => {
                log::error!("Error searching for similar transactions: {}", e);
                return vec![];
            }
        };

        let results: Vec<SimilarTransaction> = neighbors
            .into_iter()
            .map(|neighbor| {
                let meta = neighbor.record.metadata;
                SimilarTransaction {
                    transaction_id: meta.transaction_id,
                    vendor: meta.vendor,
                    category: meta.category,
                    date: meta.date,
                    amount: meta.amount,
                    item_count: meta.item_count,
                    document: neighbor.record.document,
                    similarity_score: round_to(1.0 - neighbor.distance, 3),
                }
            })
            .collect();

        log::info!(
            "Found {} similar transactions for query: '{}'",
            results.len(),
            query.chars().take(50).collect::<String>()
        );

        results
    }

    /// Past transactions most similar to a stored one, plus a summary.
    ///
    /// Returns `None` when the transaction is unknown to the store.
    pub fn context_for(&self, transaction_id: i64, k: usize) -> Option<TransactionContext> {
        let tx = match self.lookup.lookup_transaction(transaction_id) {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                log::error!("Transaction {} not found in database", transaction_id);
                return None;
            }
            Err(e) => {
                log::error!("Error looking up transaction {}: {}", transaction_id, e);
                return None;
            }
        };

        let query = describe(&tx);

        // one extra neighbor, the transaction usually matches itself
        let similar_transactions: Vec<SimilarTransaction> = self
            .find_similar(&query, k.saturating_add(1))
            .into_iter()
            .filter(|t| t.transaction_id != transaction_id)
            .take(k)
            .collect();

        let summary = summarize(&similar_transactions);

        log::info!(
            "Retrieved context for transaction {} with {} similar transactions",
            transaction_id,
            similar_transactions.len()
        );

        Some(TransactionContext {
            current_transaction: tx,
            similar_transactions,
            summary,
        })
    }

    /// Index statistics, sampled beyond [`STATS_SAMPLE_LIMIT`] records.
    pub fn stats(&self) -> IndexStats {
        let index = self.read_index();
        let sample = index.sample(STATS_SAMPLE_LIMIT);

        let categories: HashSet<&str> = sample
            .iter()
            .map(|r| r.metadata.category.as_str())
            .filter(|c| !c.is_empty())
            .collect();
        let vendors: HashSet<&str> = sample
            .iter()
            .map(|r| r.metadata.vendor.as_str())
            .filter(|v| !v.is_empty())
            .collect();
        let amounts: Vec<f64> = sample
            .iter()
            .map(|r| r.metadata.amount)
            .filter(|a| *a != 0.0)
            .collect();

        let average_amount = if amounts.is_empty() {
            0.0
        } else {
            round_to(amounts.iter().sum::<f64>() / amounts.len() as f64, 2)
        };

        IndexStats {
            total_records: index.count(),
            unique_categories: categories.len(),
            unique_vendors: vendors.len(),
            average_amount,
            dimension: index.dimensions(),
            sampled: sample.len(),
            model: self.embedder.name().to_string(),
        }
    }

    pub fn count(&self) -> usize {
        self.read_index().count()
    }

    /// Stored record of a transaction, if indexed.
    pub fn get(&self, transaction_id: i64) -> Option<VectorRecord> {
        self.read_index().get(&record_id(transaction_id)).cloned()
    }

    /// Ids of all indexed transactions, in insertion order.
    pub fn transaction_ids(&self) -> Vec<i64> {
        self.read_index()
            .iter()
            .map(|record| record.transaction_id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::embeddings::EmbeddingError;
    use crate::tests::{transaction, MemoryLookup, TrigramEmbedder};

    fn service(embedder: Arc<TrigramEmbedder>) -> RetrievalService {
        RetrievalService::in_memory(
            embedder,
            Arc::new(MemoryLookup::default()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn name(&self) -> &str {
            "failing"
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::EmbeddingFailed("gateway unreachable".to_string()))
        }
    }

    struct WrongSizeEmbedder;

    impl Embedder for WrongSizeEmbedder {
        fn name(&self) -> &str {
            "wrong-size"
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0; 4])
        }
    }

    #[test]
    fn test_blank_query_skips_embedding() {
        let embedder = Arc::new(TrigramEmbedder::default());
        let svc = service(embedder.clone());
        svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61));
        let calls = embedder.calls();

        assert!(svc.find_similar("   ", 5).is_empty());
        assert!(svc.find_similar("", 5).is_empty());
        assert!(svc.find_similar("groceries", 0).is_empty());
        assert_eq!(embedder.calls(), calls);
    }

    #[test]
    fn test_k_is_clamped() {
        let svc = service(Arc::new(TrigramEmbedder::default()));
        for id in 0..120 {
            svc.add_transaction(&transaction(id, "Walmart", "groceries", id as f64));
        }

        assert_eq!(svc.find_similar("groceries", 500).len(), MAX_RESULTS);
        assert_eq!(svc.find_similar("groceries", 7).len(), 7);
    }

    #[test]
    fn test_scores_are_rounded_and_non_increasing() {
        let embedder = Arc::new(TrigramEmbedder::default());
        let svc = service(embedder.clone());
        svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61));
        svc.add_transaction(&transaction(2, "Shell", "transportation", 45.0));
        svc.add_transaction(&transaction(3, "Costco", "groceries", 34.52));

        let results = svc.find_similar("grocery run", 3);
        assert_eq!(results.len(), 3);
        for r in &results {
            assert_eq!(r.similarity_score, round_to(r.similarity_score, 3));
            assert!((-1.0..=1.0).contains(&r.similarity_score));
        }
        assert!(results
            .windows(2)
            .all(|w| w[0].similarity_score >= w[1].similarity_score));

        let vector = embedder.embed("grocery run").unwrap();
        let neighbors = svc.read_index().query(&vector, 3).unwrap();
        assert_eq!(neighbors.len(), results.len());
        for (r, n) in results.iter().zip(&neighbors) {
            assert_eq!(r.transaction_id, n.record.metadata.transaction_id);
            assert_eq!(r.similarity_score, round_to(1.0 - n.distance, 3));
        }
    }

    #[test]
    fn test_upsert_keeps_one_record_with_latest_metadata() {
        let svc = service(Arc::new(TrigramEmbedder::default()));
        assert!(svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61)));
        assert!(svc.add_transaction(&transaction(2, "Shell", "transportation", 45.0)));
        assert_eq!(svc.count(), 2);

        assert!(svc.add_transaction(&transaction(1, "Target", "household", 20.0)));
        assert_eq!(svc.count(), 2);

        let record = svc.get(1).unwrap();
        assert_eq!(record.metadata.vendor, "Target");
        assert_eq!(record.metadata.category, "household");
        assert!(record.document.contains("Target"));
    }

    #[test]
    fn test_embedding_failure_is_reported() {
        let svc = RetrievalService::in_memory(
            Arc::new(FailingEmbedder),
            Arc::new(MemoryLookup::default()),
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(!svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61)));
        assert_eq!(svc.count(), 0);
        assert!(svc.find_similar("groceries", 5).is_empty());
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let svc = RetrievalService::in_memory(
            Arc::new(WrongSizeEmbedder),
            Arc::new(MemoryLookup::default()),
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(!svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61)));
        assert_eq!(svc.count(), 0);
    }

    #[test]
    fn test_remove_transaction() {
        let svc = service(Arc::new(TrigramEmbedder::default()));
        svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61));

        assert!(svc.remove_transaction(1));
        assert!(!svc.remove_transaction(1));
        assert!(svc.get(1).is_none());
    }

    #[test]
    fn test_context_for_unknown_transaction() {
        let svc = service(Arc::new(TrigramEmbedder::default()));
        assert!(svc.context_for(99, 5).is_none());
    }

    #[test]
    fn test_stats_on_empty_index() {
        let svc = service(Arc::new(TrigramEmbedder::default()));
        let stats = svc.stats();

        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.unique_categories, 0);
        assert_eq!(stats.average_amount, 0.0);
        assert_eq!(stats.dimension, TrigramEmbedder::DIMENSIONS);
        assert_eq!(stats.model, "trigram-test");
    }

    #[test]
    fn test_stats_are_sampled() {
        let svc = service(Arc::new(TrigramEmbedder::default()));
        for id in 0..150 {
            let vendor = format!("Vendor {id}");
            svc.add_transaction(&transaction(id, &vendor, "groceries", 10.0));
        }

        let stats = svc.stats();
        assert_eq!(stats.total_records, 150);
        assert_eq!(stats.sampled, STATS_SAMPLE_LIMIT);
        assert_eq!(stats.unique_vendors, STATS_SAMPLE_LIMIT);
        assert_eq!(stats.average_amount, 10.0);
    }

    #[test]
    fn test_persisted_index_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let embedder = Arc::new(TrigramEmbedder::default());
        let lookup = Arc::new(MemoryLookup::default());

        {
            let svc = RetrievalService::open(
                embedder.clone(),
                lookup.clone(),
                path.clone(),
                Duration::from_secs(5),
            )
            .unwrap();
            svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61));
            svc.add_transaction(&transaction(2, "Shell", "transportation", 45.0));
            svc.remove_transaction(2);
        }

        let svc =
            RetrievalService::open(embedder, lookup, path, Duration::from_secs(5)).unwrap();
        assert_eq!(svc.transaction_ids(), vec![1]);
        assert_eq!(svc.get(1).unwrap().metadata.amount, 15.61);
    }

    #[test]
    fn test_failed_persist_leaves_index_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("data");
        std::fs::create_dir_all(&dir).unwrap();

        let svc = RetrievalService::open(
            Arc::new(TrigramEmbedder::default()),
            Arc::new(MemoryLookup::default()),
            dir.join("vectors.bin"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61)));

        std::fs::remove_dir_all(&dir).unwrap();

        assert!(!svc.add_transaction(&transaction(2, "Shell", "transportation", 45.0)));
        assert!(!svc.add_transaction(&transaction(1, "Target", "household", 1.0)));
        assert_eq!(svc.count(), 1);
        assert_eq!(svc.get(1).unwrap().metadata.vendor, "Walmart");
    }

    #[test]
    fn test_failed_persist_restores_removed_record() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("data");
        std::fs::create_dir_all(&dir).unwrap();

        let svc = RetrievalService::open(
            Arc::new(TrigramEmbedder::default()),
            Arc::new(MemoryLookup::default()),
            dir.join("vectors.bin"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61)));
        assert!(svc.add_transaction(&transaction(2, "Shell", "transportation", 45.0)));

        std::fs::remove_dir_all(&dir).unwrap();

        assert!(!svc.remove_transaction(1));
        assert_eq!(svc.transaction_ids(), vec![1, 2]);
        assert_eq!(svc.get(1).unwrap().metadata.vendor, "Walmart");
    }

    #[test]
    fn test_model_change_starts_fresh_index() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let lookup = Arc::new(MemoryLookup::default());

        {
            let svc = RetrievalService::open(
                Arc::new(TrigramEmbedder::default()),
                lookup.clone(),
                path.clone(),
                Duration::from_secs(5),
            )
            .unwrap();
            svc.add_transaction(&transaction(1, "Walmart", "groceries", 15.61));
        }

        let svc = RetrievalService::open(
            Arc::new(TrigramEmbedder::named("trigram-other")),
            lookup,
            path,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(svc.count(), 0);
    }
}
