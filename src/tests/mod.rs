//! Cross-module tests and shared fixtures.
//!
//! `TrigramEmbedder` stands in for the real model: it hashes padded
//! character trigrams of each word into a fixed-size vector, so texts that
//! share word fragments land close together and no model download is needed.


use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::transactions::{Transaction, TransactionItem, TransactionLookup};

pub struct TrigramEmbedder {
    name: String,
    calls: AtomicUsize,
}

impl TrigramEmbedder {
    pub const DIMENSIONS: usize = 4096;

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of embed calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for TrigramEmbedder {
    fn default() -> Self {
        Self::named("trigram-test")
    }
}

impl Embedder for TrigramEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        Self::DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut vector = vec![0f32; Self::DIMENSIONS];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                let slot = crc32fast::hash(trigram.as_bytes()) as usize % Self::DIMENSIONS;
                vector[slot] += 1.0;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }

        Ok(vector)
    }
}

/// Lookup over a plain map, for services that never touch the CSV store.
#[derive(Default)]
pub struct MemoryLookup {
    transactions: RwLock<HashMap<i64, Transaction>>,
}

impl MemoryLookup {
    pub fn insert(&self, tx: Transaction) {
        self.transactions.write().unwrap().insert(tx.id, tx);
    }
}

impl TransactionLookup for MemoryLookup {
    fn lookup_transaction(&self, id: i64) -> anyhow::Result<Option<Transaction>> {
        Ok(self.transactions.read().unwrap().get(&id).cloned())
    }
}

pub fn transaction(id: i64, vendor: &str, category: &str, amount: f64) -> Transaction {
    Transaction {
        id,
        vendor: Some(vendor.to_string()),
        category: Some(category.to_string()),
        amount: Some(amount),
        date: Some("2024-01-15".to_string()),
        ..Default::default()
    }
}

/// The three receipts used by the end-to-end scenarios.
pub fn sample_transactions() -> Vec<Transaction> {
    let with = |id: i64, vendor: &str, category: &str, item: TransactionItem, date: &str, amount| {
        Transaction {
            date: Some(date.to_string()),
            items: vec![item],
            ..transaction(id, vendor, category, amount)
        }
    };

    vec![
        with(1, "Walmart", "groceries", TransactionItem::new("Milk", 3.99), "2024-01-15", 15.61),
        with(2, "Costco", "groceries", TransactionItem::new("Olive Oil", 12.99), "2024-01-20", 34.52),
        with(3, "Shell", "transportation", TransactionItem::new("Gasoline", 45.00), "2024-01-10", 45.00),
    ]
}
