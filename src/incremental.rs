use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config_db::ConfigDb,
    doc_id::DocumentId,
    domain::Domain,
    error::Result,
    ingestion::{IngestReport, Ingestor, serialize_records},
    vector_index::VectorIndex,
    walker::DiscoveredFile,
};

/// Registry entry stored per manual in the config database.
///
/// # Examples
///
/// ```
/// use manualrag::incremental::DocumentRecord;
///
/// let record = DocumentRecord {
///     id: 42,
///     title: "Claims Manual".to_string(),
///     relative_path: "Claims Manual.pdf".to_string(),
///     mtime: 1700000000,
///     domains: vec![],
///     page_count: 12,
///     chunk_count: 30,
/// };
/// let bytes = record.serialize().unwrap();
/// assert_eq!(DocumentRecord::deserialize(&bytes), Some(record));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: u64,
    pub title: String,
    pub relative_path: String,
    pub mtime: u64,
    pub domains: Vec<Domain>,
    pub page_count: usize,
    pub chunk_count: usize,
}

impl DocumentRecord {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Returns `None` if the bytes are not a valid record.
    pub fn deserialize(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// Display id, e.g. `#a1b2c3`.
    pub fn short_id(&self) -> String {
        DocumentId::from_numeric(self.id).to_string()
    }
}

/// Every readable registry entry, sorted by relative path.
pub fn load_registry(config_db: &ConfigDb) -> Result<Vec<DocumentRecord>> {
    let mut records: Vec<DocumentRecord> = config_db
        .list_documents()?
        .into_iter()
        .filter_map(|(id, bytes)| {
            let record = DocumentRecord::deserialize(&bytes);
            if record.is_none() {
                warn!(document = id, "ignoring unreadable registry entry");
            }
            record
        })
        .collect();
    records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(records)
}

/// Result of comparing discovered manuals against the registry.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Manuals not in the registry.
    pub new_files: Vec<DiscoveredFile>,
    /// Manuals whose modification time differs from the registry.
    pub changed_files: Vec<DiscoveredFile>,
    /// Registered manuals no longer on disk.
    pub deleted_ids: Vec<u64>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty()
            && self.changed_files.is_empty()
            && self.deleted_ids.is_empty()
    }
}

/// Compare discovered manuals against the document registry.
pub fn diff_manuals(
    config_db: &ConfigDb,
    discovered: &[DiscoveredFile],
) -> Result<DiffResult> {
    // path -> (doc_id, mtime)
    let known: HashMap<String, (u64, u64)> = load_registry(config_db)?
        .into_iter()
        .map(|r| (r.relative_path, (r.id, r.mtime)))
        .collect();

    let mut result = DiffResult::default();
    let mut seen_paths = HashSet::new();

    for file in discovered {
        seen_paths.insert(file.relative_path.as_str());
        match known.get(&file.relative_path) {
            None => result.new_files.push(file.clone()),
            Some((_, stored_mtime)) if file.mtime != *stored_mtime => {
                result.changed_files.push(file.clone());
            }
            Some(_) => {}
        }
    }

    result.deleted_ids = known
        .iter()
        .filter(|(path, _)| !seen_paths.contains(path.as_str()))
        .map(|(_, (doc_id, _))| *doc_id)
        .collect();
    result.deleted_ids.sort_unstable();

    Ok(result)
}

/// Why a sync has to fall back to a full rebuild, if it does.
pub fn full_rebuild_reason(
    index: &VectorIndex,
    model_id: &str,
    settings: &str,
) -> Result<Option<&'static str>> {
    if index.recovered() {
        return Ok(Some("index was unreadable and has been recreated"));
    }
    if index.is_empty()? {
        return Ok(Some("index is empty"));
    }
    if index.ensure_embedding_model(model_id).is_err() {
        return Ok(Some("embedding model changed"));
    }
    if index.ingest_settings()?.as_deref() != Some(settings) {
        return Ok(Some("chunking or domain settings changed"));
    }
    Ok(None)
}

/// Bring the index and registry in line with `files`, re-ingesting only
/// new and changed manuals.
pub fn sync(
    ingestor: &mut Ingestor,
    files: &[DiscoveredFile],
    index: &VectorIndex,
    config_db: &ConfigDb,
) -> Result<IngestReport> {
    let settings = ingestor.settings_fingerprint();
    if let Some(reason) = full_rebuild_reason(index, ingestor.model_id(), &settings)? {
        info!(reason, "falling back to full rebuild");
        return ingestor.rebuild(files, index, config_db);
    }

    let diff = diff_manuals(config_db, files)?;
    if diff.is_empty() {
        info!("manuals are up to date");
        return Ok(IngestReport::default());
    }
    info!(
        new = diff.new_files.len(),
        changed = diff.changed_files.len(),
        deleted = diff.deleted_ids.len(),
        "syncing manuals"
    );

    let stale: Vec<u64> = diff
        .changed_files
        .iter()
        .map(|f| DocumentId::new(&f.relative_path).numeric)
        .chain(diff.deleted_ids.iter().copied())
        .collect();
    for &doc_id in &stale {
        index.delete_document(doc_id)?;
    }
    config_db.batch_remove_documents(&stale)?;

    let mut to_ingest = diff.new_files;
    to_ingest.extend(diff.changed_files);

    let (documents, skipped) = ingestor.prepare(&to_ingest);
    let (entries, cache_hits) = ingestor.embed(&documents)?;
    index.upsert_batch(ingestor.model_id(), &entries)?;
    config_db.batch_set_documents(&serialize_records(&documents)?)?;

    Ok(IngestReport {
        full_rebuild: false,
        documents: documents.len(),
        empty_documents: documents.iter().filter(|d| d.chunks.is_empty()).count(),
        chunks: entries.len(),
        deleted_documents: diff.deleted_ids.len(),
        cache_hits,
        skipped,
    })
}
