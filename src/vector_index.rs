//! On-disk vector index over manual chunks.
//!
//! Three redb tables live in `index.redb`:
//!
//! - `chunks`: chunk id -> JSON [`StoredChunk`] (text plus citation metadata)
//! - `vectors`: chunk id -> packed embedding (see [`VECTOR_HEADER_SIZE`])
//! - `meta`: the embedding model id, vector dimension, insertion counter and
//!   the chunking/tagging settings the contents were built with
//!
//! Search is exact: every stored vector is scored with cosine similarity in
//! parallel, and equal scores fall back to insertion order.

use std::path::Path;

use rayon::prelude::*;
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    doc_id::parse_chunk_id,
    domain::{Domain, domain_mask, domains_from_mask},
    error::{Error, Result},
};

const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

const META_EMBEDDING_MODEL: &str = "embedding_model";
const META_DIMENSION: &str = "dimension";
const META_NEXT_SEQ: &str = "next_seq";
const META_INGEST_SETTINGS: &str = "ingest_settings";

/// Packed vector entry layout:
/// - 8 bytes: insertion sequence number (u64 LE), used to break score ties
/// - 4 bytes: domain bitmask of the owning document (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
pub const VECTOR_HEADER_SIZE: usize = 16;

/// A chunk as persisted in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub document_id: u64,
    pub document_title: String,
    pub relative_path: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub overlap_chars: usize,
    pub section: Option<String>,
    /// 1-based page the chunk starts on, for paginated sources.
    #[serde(default)]
    pub page: Option<usize>,
    pub domains: Vec<Domain>,
    pub text: String,
}

/// One (vector, chunk) tuple to upsert.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: u64,
    pub vector: Vec<f32>,
    pub chunk: StoredChunk,
}

/// A nearest-neighbour result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub chunk_id: u64,
    pub similarity: f32,
}

struct VectorRow {
    chunk_id: u64,
    seq: u64,
    mask: u32,
    values: Vec<f32>,
}

fn decode_vector(chunk_id: u64, bytes: &[u8]) -> Option<VectorRow> {
    let header = bytes.get(..VECTOR_HEADER_SIZE)?;
    let seq = u64::from_le_bytes(header[0..8].try_into().ok()?);
    let mask = u32::from_le_bytes(header[8..12].try_into().ok()?);
    let dimension = u32::from_le_bytes(header[12..16].try_into().ok()?) as usize;

    let body = &bytes[VECTOR_HEADER_SIZE..];
    if body.len() != dimension * 4 {
        return None;
    }
    let values = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Some(VectorRow {
        chunk_id,
        seq,
        mask,
        values,
    })
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub struct VectorIndex {
    db: Database,
    recovered: bool,
}

impl VectorIndex {
    /// Open or create the index at `path`.
    ///
    /// A corrupt store is deleted and replaced by an empty one;
    /// [`VectorIndex::recovered`] then reports `true` so the caller can
    /// trigger re-ingestion. I/O failures such as a permission error are
    /// returned unchanged and leave the file alone.
    pub fn open(path: &Path) -> Result<Self> {
        match Self::open_database(path) {
            Ok(db) => Ok(Self {
                db,
                recovered: false,
            }),
            Err(err) if err.is_corruption() => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "vector index is unreadable, starting from an empty index"
                );
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Ok(Self {
                    db: Self::open_database(path)?,
                    recovered: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn open_database(path: &Path) -> Result<Database> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(META)?;
        txn.commit()?;

        Ok(db)
    }

    /// Whether the store was found corrupt and recreated empty on open.
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    fn meta(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// The embedding model the stored vectors were produced with.
    pub fn embedding_model(&self) -> Result<Option<String>> {
        self.meta(META_EMBEDDING_MODEL)
    }

    pub fn dimension(&self) -> Result<Option<usize>> {
        Ok(self
            .meta(META_DIMENSION)?
            .and_then(|d| d.parse().ok()))
    }

    /// Fingerprint of the chunking and domain-tagging settings recorded by
    /// the last full rebuild.
    pub fn ingest_settings(&self) -> Result<Option<String>> {
        self.meta(META_INGEST_SETTINGS)
    }

    pub fn set_ingest_settings(&self, settings: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(META)?.insert(META_INGEST_SETTINGS, settings)?;
        txn.commit()?;
        Ok(())
    }

    /// Fail if the index holds vectors from a model other than `model_id`.
    pub fn ensure_embedding_model(&self, model_id: &str) -> Result<()> {
        match self.embedding_model()? {
            Some(indexed) if indexed != model_id => {
                Err(Error::EmbeddingModelMismatch {
                    indexed,
                    configured: model_id.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Insert or replace one chunk.
    pub fn upsert(&self, model_id: &str, entry: &IndexEntry) -> Result<()> {
        self.upsert_batch(model_id, std::slice::from_ref(entry))
    }

    /// Insert or replace chunks in a single transaction.
    ///
    /// Re-upserting an existing chunk id replaces its vector and chunk but
    /// keeps its original insertion position.
    pub fn upsert_batch(&self, model_id: &str, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        write_entries(&txn, model_id, entries)?;
        txn.commit()?;
        Ok(())
    }

    /// Atomically replace the whole index contents with `entries`.
    ///
    /// Readers keep seeing the previous contents until the transaction
    /// commits.
    pub fn replace_all(&self, model_id: &str, entries: &[IndexEntry]) -> Result<()> {
        let txn = self.db.begin_write()?;
        clear_tables(&txn)?;
        write_entries(&txn, model_id, entries)?;
        txn.commit()?;
        Ok(())
    }

    /// Remove every chunk of a document. Returns the number removed.
    pub fn delete_document(&self, document_id: u64) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut chunks = txn.open_table(CHUNKS)?;

            let mut doomed = Vec::new();
            for entry in chunks.iter()? {
                let (k, _) = entry?;
                let chunk_id = k.value();
                if parse_chunk_id(chunk_id).0 == document_id {
                    doomed.push(chunk_id);
                }
            }
            for &chunk_id in &doomed {
                chunks.remove(chunk_id)?;
                vectors.remove(chunk_id)?;
            }
            doomed.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Clear the index, including its embedding model and dimension.
    pub fn reset(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        clear_tables(&txn)?;
        txn.commit()?;
        Ok(())
    }

    /// The `top_k` chunks most similar to `query`, best first.
    ///
    /// With a `filter`, only chunks tagged with at least one of the given
    /// domains are considered. Equal similarities are ordered by insertion.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&[Domain]>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let Some(dimension) = self.dimension()? else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        let filter_mask = filter.map(domain_mask);

        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let Some(row) = decode_vector(k.value(), v.value()) else {
                continue;
            };
            if filter_mask.is_some_and(|mask| (row.mask & mask) == 0) {
                continue;
            }
            rows.push(row);
        }

        let mut scored: Vec<(u64, SearchHit)> = rows
            .par_iter()
            .map(|row| {
                (
                    row.seq,
                    SearchHit {
                        chunk_id: row.chunk_id,
                        similarity: cosine(query, &row.values),
                    },
                )
            })
            .collect();

        scored.sort_by(|(seq_a, a), (seq_b, b)| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(seq_a.cmp(seq_b))
        });
        scored.truncate(top_k);

        debug!(
            considered = rows.len(),
            returned = scored.len(),
            filtered = filter_mask.is_some(),
            "vector search"
        );
        Ok(scored.into_iter().map(|(_, hit)| hit).collect())
    }

    /// Load chunks by id, preserving input order. Missing ids are `None`.
    pub fn get_chunks(&self, chunk_ids: &[u64]) -> Result<Vec<Option<StoredChunk>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;

        let mut results = Vec::with_capacity(chunk_ids.len());
        for &chunk_id in chunk_ids {
            let chunk = match table.get(chunk_id)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };
            results.push(chunk);
        }
        Ok(results)
    }

    /// Every domain carried by at least one indexed chunk.
    pub fn domains(&self) -> Result<Vec<Domain>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;

        let mut mask = 0u32;
        for entry in table.iter()? {
            let (_, v) = entry?;
            if let Some(bits) = v.value().get(8..12) {
                mask |= u32::from_le_bytes([bits[0], bits[1], bits[2], bits[3]]);
            }
        }
        Ok(domains_from_mask(mask))
    }
}

fn clear_tables(txn: &WriteTransaction) -> Result<()> {
    txn.open_table(CHUNKS)?.retain(|_, _| false)?;
    txn.open_table(VECTORS)?.retain(|_, _| false)?;
    txn.open_table(META)?.retain(|_, _| false)?;
    Ok(())
}

fn write_entries(
    txn: &WriteTransaction,
    model_id: &str,
    entries: &[IndexEntry],
) -> Result<()> {
    let mut meta = txn.open_table(META)?;
    let mut vectors = txn.open_table(VECTORS)?;
    let mut chunks = txn.open_table(CHUNKS)?;

    let indexed_model = meta.get(META_EMBEDDING_MODEL)?.map(|v| v.value().to_string());
    match indexed_model {
        Some(indexed) if indexed != model_id => {
            return Err(Error::EmbeddingModelMismatch {
                indexed,
                configured: model_id.to_string(),
            });
        }
        Some(_) => {}
        None => {
            meta.insert(META_EMBEDDING_MODEL, model_id)?;
        }
    }

    let stored_dimension: Option<usize> = meta
        .get(META_DIMENSION)?
        .and_then(|v| v.value().parse().ok());
    let dimension = match (stored_dimension, entries.first()) {
        (Some(d), _) => d,
        (None, Some(first)) => {
            let d = first.vector.len();
            meta.insert(META_DIMENSION, d.to_string().as_str())?;
            d
        }
        (None, None) => return Ok(()),
    };

    let mut next_seq: u64 = meta
        .get(META_NEXT_SEQ)?
        .and_then(|v| v.value().parse().ok())
        .unwrap_or(0);

    for entry in entries {
        if entry.vector.len() != dimension || dimension == 0 {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: entry.vector.len(),
            });
        }

        let existing_seq = vectors
            .get(entry.chunk_id)?
            .and_then(|v| decode_vector(entry.chunk_id, v.value()))
            .map(|row| row.seq);
        let seq = match existing_seq {
            Some(seq) => seq,
            None => {
                next_seq += 1;
                next_seq - 1
            }
        };

        let byte_len =
            VECTOR_HEADER_SIZE + std::mem::size_of_val(entry.vector.as_slice());
        let mut guard = vectors.insert_reserve(entry.chunk_id, byte_len)?;
        let dest = guard.as_mut();
        dest[0..8].copy_from_slice(&seq.to_le_bytes());
        dest[8..12].copy_from_slice(&domain_mask(&entry.chunk.domains).to_le_bytes());
        dest[12..16].copy_from_slice(&(dimension as u32).to_le_bytes());
        dest[VECTOR_HEADER_SIZE..]
            .copy_from_slice(bytemuck::cast_slice(entry.vector.as_slice()));
        drop(guard);

        let json = serde_json::to_vec(&entry.chunk)?;
        chunks.insert(entry.chunk_id, json.as_slice())?;
    }

    meta.insert(META_NEXT_SEQ, next_seq.to_string().as_str())?;
    Ok(())
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("recovered", &self.recovered)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc_id::chunk_id;

    const MODEL: &str = "test-model";

    fn test_index() -> (tempfile::TempDir, VectorIndex) {
        let tmp = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(&tmp.path().join("index.redb")).unwrap();
        (tmp, index)
    }

    fn entry(doc: u64, idx: usize, vector: &[f32], domains: &[Domain]) -> IndexEntry {
        IndexEntry {
            chunk_id: chunk_id(doc, idx),
            vector: vector.to_vec(),
            chunk: StoredChunk {
                document_id: doc,
                document_title: format!("Doc {doc}"),
                relative_path: format!("doc-{doc}.pdf"),
                chunk_index: idx,
                start_char: idx * 10,
                end_char: idx * 10 + 10,
                overlap_chars: 0,
                section: None,
                page: None,
                domains: domains.to_vec(),
                text: format!("chunk {idx} of {doc}"),
            },
        }
    }

    #[test]
    fn empty_index_returns_nothing() {
        let (_tmp, index) = test_index();
        assert!(index.is_empty().unwrap());
        assert!(index.search(&[1.0, 0.0], 5, None).unwrap().is_empty());
        assert!(!index.recovered());
    }

    #[test]
    fn search_orders_by_similarity() {
        let (_tmp, index) = test_index();
        index
            .upsert_batch(
                MODEL,
                &[
                    entry(1, 0, &[0.0, 1.0], &[]),
                    entry(1, 1, &[1.0, 0.0], &[]),
                    entry(1, 2, &[0.7, 0.7], &[]),
                ],
            )
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 3, None).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec![chunk_id(1, 1), chunk_id(1, 2), chunk_id(1, 0)]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn search_respects_top_k() {
        let (_tmp, index) = test_index();
        let entries: Vec<_> =
            (0..10).map(|i| entry(1, i, &[1.0, i as f32], &[])).collect();
        index.upsert_batch(MODEL, &entries).unwrap();

        assert_eq!(index.search(&[1.0, 0.0], 4, None).unwrap().len(), 4);
        assert_eq!(index.search(&[1.0, 0.0], 50, None).unwrap().len(), 10);
        assert!(index.search(&[1.0, 0.0], 0, None).unwrap().is_empty());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let (_tmp, index) = test_index();
        index.upsert(MODEL, &entry(3, 0, &[1.0, 0.0], &[])).unwrap();
        index.upsert(MODEL, &entry(1, 0, &[1.0, 0.0], &[])).unwrap();
        index.upsert(MODEL, &entry(2, 0, &[1.0, 0.0], &[])).unwrap();

        let hits = index.search(&[1.0, 0.0], 3, None).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec![chunk_id(3, 0), chunk_id(1, 0), chunk_id(2, 0)]);
    }

    #[test]
    fn upsert_is_idempotent() {
        let (_tmp, index) = test_index();
        let first = entry(1, 0, &[1.0, 0.0], &[]);
        index.upsert(MODEL, &first).unwrap();
        index.upsert(MODEL, &entry(2, 0, &[1.0, 0.0], &[])).unwrap();

        let mut replaced = first.clone();
        replaced.chunk.text = "replaced".into();
        index.upsert(MODEL, &replaced).unwrap();
        index.upsert(MODEL, &replaced).unwrap();

        assert_eq!(index.len().unwrap(), 2);
        let chunks = index.get_chunks(&[first.chunk_id]).unwrap();
        assert_eq!(chunks[0].as_ref().unwrap().text, "replaced");

        // The replaced chunk keeps its original position among ties.
        let hits = index.search(&[1.0, 0.0], 2, None).unwrap();
        assert_eq!(hits[0].chunk_id, first.chunk_id);
    }

    #[test]
    fn filter_restricts_to_domains() {
        let (_tmp, index) = test_index();
        index
            .upsert_batch(
                MODEL,
                &[
                    entry(1, 0, &[1.0, 0.0], &[Domain::Print]),
                    entry(2, 0, &[0.5, 0.5], &[Domain::Claims]),
                    entry(3, 0, &[0.1, 0.9], &[Domain::Claims, Domain::Remits]),
                ],
            )
            .unwrap();

        let hits = index
            .search(&[1.0, 0.0], 10, Some(&[Domain::Claims]))
            .unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec![chunk_id(2, 0), chunk_id(3, 0)]);

        assert!(index
            .search(&[1.0, 0.0], 10, Some(&[Domain::Analytics]))
            .unwrap()
            .is_empty());
        assert_eq!(
            index.domains().unwrap(),
            vec![Domain::Claims, Domain::Remits, Domain::Print]
        );
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let (_tmp, index) = test_index();
        index.upsert(MODEL, &entry(1, 0, &[1.0, 0.0], &[])).unwrap();

        let err = index
            .upsert(MODEL, &entry(1, 1, &[1.0, 0.0, 0.0], &[]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));

        let err = index.search(&[1.0], 5, None).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn mixing_embedding_models_is_rejected() {
        let (_tmp, index) = test_index();
        index.upsert(MODEL, &entry(1, 0, &[1.0, 0.0], &[])).unwrap();

        let err = index
            .upsert("other-model", &entry(1, 1, &[1.0, 0.0], &[]))
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingModelMismatch { .. }));
        assert!(index.ensure_embedding_model(MODEL).is_ok());
        assert!(index.ensure_embedding_model("other-model").is_err());
    }

    #[test]
    fn delete_document_removes_only_its_chunks() {
        let (_tmp, index) = test_index();
        index
            .upsert_batch(
                MODEL,
                &[
                    entry(1, 0, &[1.0, 0.0], &[]),
                    entry(1, 1, &[1.0, 0.0], &[]),
                    entry(2, 0, &[1.0, 0.0], &[]),
                ],
            )
            .unwrap();

        assert_eq!(index.delete_document(1).unwrap(), 2);
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.delete_document(1).unwrap(), 0);

        let chunks = index.get_chunks(&[chunk_id(1, 0), chunk_id(2, 0)]).unwrap();
        assert!(chunks[0].is_none());
        assert!(chunks[1].is_some());
    }

    #[test]
    fn reset_clears_everything() {
        let (_tmp, index) = test_index();
        index.upsert(MODEL, &entry(1, 0, &[1.0, 0.0], &[])).unwrap();

        index.reset().unwrap();
        assert!(index.is_empty().unwrap());
        assert_eq!(index.embedding_model().unwrap(), None);
        assert_eq!(index.dimension().unwrap(), None);

        // A different model and dimension are accepted after reset.
        index
            .upsert("other-model", &entry(1, 0, &[1.0, 0.0, 0.0], &[]))
            .unwrap();
        assert_eq!(index.dimension().unwrap(), Some(3));
    }

    #[test]
    fn replace_all_swaps_contents() {
        let (_tmp, index) = test_index();
        index
            .upsert_batch(
                MODEL,
                &[entry(1, 0, &[1.0, 0.0], &[]), entry(2, 0, &[0.0, 1.0], &[])],
            )
            .unwrap();

        index
            .replace_all("new-model", &[entry(3, 0, &[1.0, 0.0, 0.0], &[])])
            .unwrap();

        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.embedding_model().unwrap().as_deref(), Some("new-model"));
        let hits = index.search(&[1.0, 0.0, 0.0], 5, None).unwrap();
        assert_eq!(hits[0].chunk_id, chunk_id(3, 0));
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.redb");

        {
            let index = VectorIndex::open(&path).unwrap();
            index
                .upsert(MODEL, &entry(1, 0, &[1.0, 0.0], &[Domain::Rules]))
                .unwrap();
        }

        {
            let index = VectorIndex::open(&path).unwrap();
            assert!(!index.recovered());
            assert_eq!(index.len().unwrap(), 1);
            assert_eq!(index.domains().unwrap(), vec![Domain::Rules]);
            let chunks = index.get_chunks(&[chunk_id(1, 0)]).unwrap();
            assert_eq!(chunks[0].as_ref().unwrap().domains, vec![Domain::Rules]);
        }
    }

    #[test]
    fn corrupt_store_is_treated_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.redb");
        std::fs::write(&path, vec![0xAB; 8192]).unwrap();

        let index = VectorIndex::open(&path).unwrap();
        assert!(index.recovered());
        assert!(index.is_empty().unwrap());

        index.upsert(MODEL, &entry(1, 0, &[1.0, 0.0], &[])).unwrap();
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn io_failure_is_not_treated_as_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory where the index file should be cannot be opened.
        let path = tmp.path().join("index.redb");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep.txt"), "data").unwrap();

        assert!(VectorIndex::open(&path).is_err());
        assert!(path.join("keep.txt").exists());
    }

    #[test]
    fn ingest_settings_round_trip_and_reset() {
        let (_tmp, index) = test_index();
        assert_eq!(index.ingest_settings().unwrap(), None);

        index.set_ingest_settings("chunk_size=1500").unwrap();
        assert_eq!(
            index.ingest_settings().unwrap().as_deref(),
            Some("chunk_size=1500")
        );

        index.reset().unwrap();
        assert_eq!(index.ingest_settings().unwrap(), None);
    }
}
