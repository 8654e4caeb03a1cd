//! Binary storage for the vector index.
//!
//! File format: vectors.bin
//!
//! Header (49 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u32 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, in insertion order):
//! - transaction_id: i64 (little-endian)
//! - vector: [f32; dimensions] (little-endian)
//! - amount: f64 (little-endian)
//! - item_count: u32 (little-endian)
//! - vendor, category, date, document: u32 length + UTF-8 bytes each
//!
//! Trailer:
//! - checksum: u32 (CRC32 of all entry bytes)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::{RecordMetadata, VectorIndex, VectorRecord};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(4) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 49;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Storage manager for the vector index.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the vector index from storage.
    ///
    /// Records come back in their original insertion order.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, VectorStorageError> {
        let bytes = std::fs::read(&self.path)?;
        if bytes.len() < HEADER_SIZE {
            return Err(VectorStorageError::InvalidFormat(
                "file shorter than header".to_string(),
            ));
        }

        let header = Self::read_header(&bytes[..HEADER_SIZE])?;
        Self::validate_header(&header, expected_model_id, expected_dimensions)?;

        let body = &bytes[HEADER_SIZE..];
        if body.len() < 4 {
            return Err(VectorStorageError::InvalidFormat(
                "missing entry checksum".to_string(),
            ));
        }
        let (entries, trailer) = body.split_at(body.len() - 4);
        let stored_checksum = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(entries) != stored_checksum {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let capacity = usize::try_from(header.entry_count).unwrap_or(0);
        let mut index = VectorIndex::with_capacity(expected_dimensions, capacity);
        let mut reader = EntryReader::new(entries);

        for _ in 0..header.entry_count {
            let record = reader.read_record(expected_dimensions)?;
            index.upsert(record).map_err(|e| {
                VectorStorageError::InvalidFormat(format!("Stored record rejected: {}", e))
            })?;
        }

        if !reader.is_empty() {
            return Err(VectorStorageError::InvalidFormat(
                "trailing bytes after last entry".to_string(),
            ));
        }

        Ok(index)
    }

    /// Save the vector index to storage.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        let result = Self::write_to_file(&temp_path, index, model_id);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn write_to_file(
        path: &Path,
        index: &VectorIndex,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let dimensions = u32::try_from(index.dimensions()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the header",
                index.dimensions()
            ))
        })?;

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            entry_count: index.count() as u64,
        };
        writer.write_all(&Self::encode_header(&header))?;

        let mut entries = EntryWriter::new(&mut writer);
        for record in index.iter() {
            entries.write_record(record)?;
        }
        let checksum = entries.finish();
        writer.write_all(&checksum.to_le_bytes())?;

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(header_bytes: &[u8]) -> Result<Header, VectorStorageError> {
        let version = header_bytes[0];

        // Version check first
        if version > FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored_checksum = u32::from_le_bytes([
            header_bytes[45],
            header_bytes[46],
            header_bytes[47],
            header_bytes[48],
        ]);
        if stored_checksum != crc32fast::hash(&header_bytes[0..45]) {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let mut dimensions = [0u8; 4];
        dimensions.copy_from_slice(&header_bytes[33..37]);
        let mut entry_count = [0u8; 8];
        entry_count.copy_from_slice(&header_bytes[37..45]);

        Ok(Header {
            version,
            model_id,
            dimensions: u32::from_le_bytes(dimensions),
            entry_count: u64::from_le_bytes(entry_count),
        })
    }

    fn validate_header(
        header: &Header,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(), VectorStorageError> {
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(())
    }

    fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..37].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[37..45].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..45]);
        header_bytes[45..49].copy_from_slice(&checksum.to_le_bytes());

        header_bytes
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u32,
    entry_count: u64,
}

/// Writes entries while accumulating their checksum.
struct EntryWriter<'a, W: Write> {
    writer: &'a mut W,
    hasher: crc32fast::Hasher,
}

impl<'a, W: Write> EntryWriter<'a, W> {
    fn new(writer: &'a mut W) -> Self {
        Self {
            writer,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn put(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.hasher.update(bytes);
        self.writer.write_all(bytes)
    }

    fn put_str(&mut self, value: &str) -> Result<(), VectorStorageError> {
        let len = u32::try_from(value.len())
            .map_err(|_| VectorStorageError::InvalidFormat("string field too long".to_string()))?;
        self.put(&len.to_le_bytes())?;
        self.put(value.as_bytes())?;
        Ok(())
    }

    fn write_record(&mut self, record: &VectorRecord) -> Result<(), VectorStorageError> {
        let meta = &record.metadata;
        self.put(&meta.transaction_id.to_le_bytes())?;
        for &value in &record.vector {
            self.put(&value.to_le_bytes())?;
        }
        self.put(&meta.amount.to_le_bytes())?;
        self.put(&meta.item_count.to_le_bytes())?;
        self.put_str(&meta.vendor)?;
        self.put_str(&meta.category)?;
        self.put_str(&meta.date)?;
        self.put_str(&record.document)?;
        Ok(())
    }

    fn finish(self) -> u32 {
        self.hasher.finalize()
    }
}

/// Cursor over the checksummed entry bytes.
struct EntryReader<'a> {
    bytes: &'a [u8],
}

impl<'a> EntryReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], VectorStorageError> {
        if self.bytes.len() < N {
            return Err(VectorStorageError::InvalidFormat("truncated entry".to_string()));
        }
        let (head, rest) = self.bytes.split_at(N);
        self.bytes = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn take_str(&mut self) -> Result<String, VectorStorageError> {
        let len = u32::from_le_bytes(self.take::<4>()?) as usize;
        if self.bytes.len() < len {
            return Err(VectorStorageError::InvalidFormat("truncated string field".to_string()));
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        String::from_utf8(head.to_vec())
            .map_err(|e| VectorStorageError::InvalidFormat(format!("invalid UTF-8: {}", e)))
    }

    fn read_record(&mut self, dimensions: usize) -> Result<VectorRecord, VectorStorageError> {
        let transaction_id = i64::from_le_bytes(self.take::<8>()?);

        let mut vector = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            vector.push(f32::from_le_bytes(self.take::<4>()?));
        }

        let amount = f64::from_le_bytes(self.take::<8>()?);
        let item_count = u32::from_le_bytes(self.take::<4>()?);
        let vendor = self.take_str()?;
        let category = self.take_str()?;
        let date = self.take_str()?;
        let document = self.take_str()?;

        let metadata = RecordMetadata {
            transaction_id,
            vendor,
            category,
            date,
            amount,
            item_count,
        };

        Ok(VectorRecord::new(vector, metadata, document))
    }
}
