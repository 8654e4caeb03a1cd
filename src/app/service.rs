use crate::{
    app::errors::AppError,
    config::Config,
    lock::FileLock,
    semantic::{IndexStats, RetrievalService, SimilarTransaction, TransactionContext},
    transactions::{Transaction, TransactionCreate, TransactionManager, TransactionUpdate},
};
use anyhow::Context;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// A stored transaction and whether it made it into the vector index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub indexed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReindexReport {
    pub indexed: usize,
    pub failed: usize,
    /// Vector records dropped because their transaction no longer exists
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub indexed: usize,
}

/// Keeps the transaction store and the retrieval index convergent.
///
/// The store is authoritative: a row is never rolled back because indexing
/// it failed. `reindex` repairs whatever drift that leaves behind.
pub struct AppService {
    store: Arc<dyn TransactionManager>,
    retrieval: Arc<RetrievalService>,
    config: Config,
    _lock: Option<FileLock>,
}

impl AppService {
    pub fn new(
        store: Arc<dyn TransactionManager>,
        retrieval: Arc<RetrievalService>,
        config: Config,
    ) -> Self {
        Self {
            store,
            retrieval,
            config,
            _lock: None,
        }
    }

    /// Keep `lock` held for as long as the service lives.
    pub fn with_lock(mut self, lock: FileLock) -> Self {
        self._lock = Some(lock);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retrieval(&self) -> &RetrievalService {
        &self.retrieval
    }

    fn k_or_default(&self, k: Option<usize>) -> usize {
        k.unwrap_or(self.config.retrieval.default_k)
    }

    pub fn get(&self, id: i64) -> Result<Transaction, AppError> {
        self.store
            .lookup_transaction(id)?
            .ok_or(AppError::NotFound(id))
    }

    pub fn list(&self) -> Result<Vec<Transaction>, AppError> {
        Ok(self.store.list()?)
    }

    pub fn create(&self, create: TransactionCreate) -> Result<IndexedTransaction, AppError> {
        let transaction = self.store.create(create)?;
        log::info!("Created transaction {}", transaction.id);

        let indexed = self.retrieval.add_transaction(&transaction);
        if !indexed {
            log::warn!(
                "Transaction {} stored but not indexed; run reindex to repair",
                transaction.id
            );
        }

        Ok(IndexedTransaction {
            transaction,
            indexed,
        })
    }

    pub fn update(
        &self,
        id: i64,
        update: TransactionUpdate,
    ) -> Result<IndexedTransaction, AppError> {
        self.get(id)?;
        let transaction = self.store.update(id, update)?;

        let indexed = self.retrieval.add_transaction(&transaction);
        if !indexed {
            log::warn!("Transaction {} updated but index is stale", id);
        }

        Ok(IndexedTransaction {
            transaction,
            indexed,
        })
    }

    pub fn delete(&self, id: i64) -> Result<(), AppError> {
        if !self.store.delete(id)? {
            return Err(AppError::NotFound(id));
        }
        log::info!("Deleted transaction {}", id);

        if !self.retrieval.remove_transaction(id) {
            log::warn!("Transaction {} had no vector record", id);
        }

        Ok(())
    }

    pub fn search(&self, query: &str, k: Option<usize>) -> Vec<SimilarTransaction> {
        self.retrieval.find_similar(query, self.k_or_default(k))
    }

    pub fn context(&self, id: i64, k: Option<usize>) -> Result<TransactionContext, AppError> {
        self.get(id)?;
        self.retrieval
            .context_for(id, self.k_or_default(k))
            .ok_or_else(|| anyhow::anyhow!("failed to build context for transaction {id}").into())
    }

    pub fn stats(&self) -> IndexStats {
        self.retrieval.stats()
    }

    /// Re-add every stored transaction and drop orphaned vector records.
    pub fn reindex(&self) -> Result<ReindexReport, AppError> {
        let transactions = self.store.list()?;
        let mut report = ReindexReport::default();

        for transaction in &transactions {
            if self.retrieval.add_transaction(transaction) {
                report.indexed += 1;
            } else {
                report.failed += 1;
            }
        }

        let known: HashSet<i64> = transactions.iter().map(|tx| tx.id).collect();
        for id in self.retrieval.transaction_ids() {
            if !known.contains(&id) && self.retrieval.remove_transaction(id) {
                report.removed += 1;
            }
        }

        log::info!(
            "Reindex complete: {} indexed, {} failed, {} removed",
            report.indexed,
            report.failed,
            report.removed
        );

        Ok(report)
    }

    /// Create transactions from a JSON array of extraction outputs.
    pub fn import(&self, json: &str) -> Result<ImportReport, AppError> {
        let creates: Vec<TransactionCreate> =
            serde_json::from_str(json).context("import file must be a JSON array of transactions")?;

        let mut report = ImportReport::default();
        for create in creates {
            let created = self.create(create)?;
            report.created += 1;
            if created.indexed {
                report.indexed += 1;
            }
        }

        Ok(report)
    }
}
