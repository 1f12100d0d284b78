use std::path::Path;

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};

use tracing::warn;

use crate::error::Result;

const EMBEDDINGS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("embeddings");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// Content-addressed cache of chunk embeddings.
///
/// Entries are keyed by `blake3(model_id \0 text)`, so identical chunk text
/// embedded with the same model is only computed once across syncs and
/// rebuilds.
///
/// Binary format per entry:
/// - 4 bytes: embedding dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
pub struct EmbeddingCache {
    db: Database,
}

impl EmbeddingCache {
    /// Open or create an embedding cache at the given path. A corrupt cache
    /// file is discarded and recreated empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use manualrag::EmbeddingCache;
    ///
    /// let cache = EmbeddingCache::open(&tmp.path().join("cache.redb")).unwrap();
    /// assert_eq!(cache.len().unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        match Self::open_database(path) {
            Ok(db) => Ok(Self { db }),
            Err(err) if err.is_corruption() => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "embedding cache is unreadable, starting from an empty cache"
                );
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Ok(Self {
                    db: Self::open_database(path)?,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn open_database(path: &Path) -> Result<Database> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(EMBEDDINGS)?;
        txn.commit()?;

        Ok(db)
    }

    fn key(model_id: &str, text: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(model_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Look up cached vectors, preserving input order. Misses are `None`.
    pub fn get_many(
        &self,
        model_id: &str,
        texts: &[String],
    ) -> Result<Vec<Option<Vec<f32>>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;

        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            let key = Self::key(model_id, text);
            let vector = table.get(key.as_slice())?.and_then(|guard| {
                let bytes = guard.value();
                let header: [u8; HEADER_SIZE] =
                    bytes.get(..HEADER_SIZE)?.try_into().ok()?;
                let dimension = u32::from_le_bytes(header) as usize;
                let body = &bytes[HEADER_SIZE..];
                (body.len() == dimension * 4).then(|| {
                    body.chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .collect()
                })
            });
            results.push(vector);
        }

        Ok(results)
    }

    /// Store `texts[i] -> vectors[i]` in a single transaction.
    ///
    /// Uses `insert_reserve` for zero-copy writes.
    pub fn put_many(
        &self,
        model_id: &str,
        texts: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if texts.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;
            for (text, vector) in texts.iter().zip(vectors) {
                let key = Self::key(model_id, text);
                let byte_len =
                    HEADER_SIZE + std::mem::size_of_val(vector.as_slice());
                let mut guard = table.insert_reserve(key.as_slice(), byte_len)?;
                let dest = guard.as_mut();

                dest[..HEADER_SIZE]
                    .copy_from_slice(&(vector.len() as u32).to_le_bytes());
                dest[HEADER_SIZE..]
                    .copy_from_slice(bytemuck::cast_slice(vector.as_slice()));
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache").finish_non_exhaustive()
    }
}
