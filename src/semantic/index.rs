//! In-memory vector index with exact cosine nearest-neighbor search.
//!
//! Stores one record per transaction, keyed by a record id derived from the
//! transaction id. Every record carries its embedding, a metadata snapshot and
//! the description that produced the embedding.

use std::collections::HashMap;

use serde::Serialize;

/// Prefix of record ids; the transaction id follows it.
const RECORD_ID_PREFIX: &str = "transaction_";

/// Derive the record id of a transaction.
pub fn record_id(transaction_id: i64) -> String {
    format!("{RECORD_ID_PREFIX}{transaction_id}")
}

/// Denormalized snapshot of a transaction taken at insertion time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordMetadata {
    pub transaction_id: i64,
    pub vendor: String,
    pub category: String,
    pub date: String,
    pub amount: f64,
    pub item_count: u32,
}

impl RecordMetadata {
    /// Build metadata, substituting placeholders for absent fields.
    pub fn new(
        transaction_id: i64,
        vendor: Option<&str>,
        category: Option<&str>,
        date: Option<&str>,
        amount: Option<f64>,
        item_count: usize,
    ) -> Self {
        fn text(value: Option<&str>, placeholder: &str) -> String {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or(placeholder)
                .to_string()
        }

        Self {
            transaction_id,
            vendor: text(vendor, "unknown"),
            category: text(category, "other"),
            date: text(date, "unknown"),
            amount: amount.unwrap_or(0.0),
            item_count: u32::try_from(item_count).unwrap_or(u32::MAX),
        }
    }
}

/// A stored embedding with its metadata and source text.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
    pub document: String,
}

impl VectorRecord {
    pub fn new(vector: Vec<f32>, metadata: RecordMetadata, document: String) -> Self {
        Self {
            id: record_id(metadata.transaction_id),
            vector,
            metadata,
            document,
        }
    }

    pub fn transaction_id(&self) -> i64 {
        self.metadata.transaction_id
    }
}

#[derive(Debug, Clone)]
struct IndexedRecord {
    /// Insertion sequence; breaks distance ties, earliest first
    seq: u64,
    record: VectorRecord,
}

/// A record taken out of the index, remembering its insertion position.
#[derive(Debug, Clone)]
pub struct Removed(IndexedRecord);

impl Removed {
    pub fn record(&self) -> &VectorRecord {
        &self.0.record
    }
}

/// A query hit.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub record: VectorRecord,
    /// Cosine distance, `1 - cosine_similarity`
    pub distance: f64,
}

/// In-memory vector index for semantic search.
///
/// Stores records keyed by record id, supporting:
/// - Upsert/get/delete operations
/// - Exact top-k search by cosine distance
#[derive(Debug, Clone)]
pub struct VectorIndex {
    records: HashMap<String, IndexedRecord>,
    dimensions: usize,
    next_seq: u64,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self::with_capacity(dimensions, 0)
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            records: HashMap::with_capacity(capacity),
            dimensions,
            next_seq: 0,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Insert a record or replace the one stored under the same id.
    ///
    /// A replaced record keeps its original insertion position. Returns the
    /// replaced record, if any.
    pub fn upsert(&mut self, record: VectorRecord) -> Result<Option<VectorRecord>, IndexError> {
        if record.vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: record.vector.len(),
            });
        }
        assert_eq!(
            record.id,
            record_id(record.transaction_id()),
            "record id does not match its transaction id"
        );

        if let Some(existing) = self.records.get_mut(&record.id) {
            let previous = std::mem::replace(&mut existing.record, record);
            return Ok(Some(previous));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.records
            .insert(record.id.clone(), IndexedRecord { seq, record });

        Ok(None)
    }

    pub fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.records.get(id).map(|entry| &entry.record)
    }

    /// Remove a record. Returns the removed record, if it existed.
    pub fn delete(&mut self, id: &str) -> Option<Removed> {
        self.records.remove(id).map(Removed)
    }

    /// Put a removed record back at its original insertion position.
    pub fn restore(&mut self, removed: Removed) {
        let entry = removed.0;
        self.records.insert(entry.record.id.clone(), entry);
    }

    /// Iterate over records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &VectorRecord> {
        let mut entries: Vec<&IndexedRecord> = self.records.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| &entry.record)
    }

    /// Up to `limit` records, taken in insertion order.
    pub fn sample(&self, limit: usize) -> Vec<&VectorRecord> {
        self.iter().take(limit).collect()
    }

    /// Rank all records by cosine distance to `query`, nearest first.
    ///
    /// Returns at most `k` neighbors; `k == 0` yields nothing.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let query_norm = l2_norm(query);

        let mut scored: Vec<(f64, u64, &VectorRecord)> = self
            .records
            .values()
            .map(|entry| {
                assert_eq!(
                    entry.record.vector.len(),
                    self.dimensions,
                    "stored vector {} has wrong dimension",
                    entry.record.id
                );
                let similarity = cosine_similarity(query, query_norm, &entry.record.vector);
                (1.0 - similarity, entry.seq, &entry.record)
            })
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, _, record)| Neighbor {
                record: record.clone(),
                distance,
            })
            .collect())
    }
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

/// Cosine similarity with a precomputed query norm.
/// A zero vector on either side has similarity 0.
fn cosine_similarity(query: &[f32], query_norm: f64, target: &[f32]) -> f64 {
    let target_norm = l2_norm(target);
    if query_norm == 0.0 || target_norm == 0.0 {
        return 0.0;
    }

    let dot: f64 = query
        .iter()
        .zip(target.iter())
        .map(|(&a, &b)| f64::from(a) * f64::from(b))
        .sum();
    dot / (query_norm * target_norm)
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
