//! Semantic retrieval over transactions.
//!
//! Past transactions are turned into natural-language descriptions, embedded
//! locally with fastembed-rs and searched by cosine similarity.
//!
//! # Architecture
//!
//! - `description`: Canonical description text for a transaction
//! - `embeddings`: Embedder trait and the fastembed-backed model
//! - `index`: In-memory vector index with exact top-k search
//! - `storage`: Binary file I/O for vectors.bin persistence
//! - `summary`: One-paragraph summary of a neighbor set
//! - `service`: High-level retrieval service

mod description;
pub mod embeddings;
mod index;
mod service;
mod storage;
mod summary;

pub use embeddings::EmbeddingModel;
pub use service::{
    IndexStats, RetrievalService, SimilarTransaction, TransactionContext, MAX_RESULTS,
};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
