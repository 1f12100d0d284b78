use std::path::Path;

use kdam::{BarExt, tqdm};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    chunking::{ChunkingConfig, chunk_text},
    config::Config,
    config_db::ConfigDb,
    doc_id::{DocumentId, MAX_CHUNKS_PER_DOCUMENT, chunk_id},
    domain::DomainClassifier,
    embedding::{Embedder, embed_with_cache},
    embedding_cache::EmbeddingCache,
    error::{Error, Result},
    extract::{extract_text, extract_title},
    incremental::DocumentRecord,
    vector_index::{IndexEntry, StoredChunk, VectorIndex},
    walker::DiscoveredFile,
};

/// A manual that has been extracted, classified and chunked, ready to embed.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub record: DocumentRecord,
    pub chunks: Vec<(u64, StoredChunk)>,
}

/// A manual that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDocument {
    pub relative_path: String,
    pub reason: String,
}

/// Outcome of a rebuild or sync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Whether the whole index was rebuilt.
    pub full_rebuild: bool,
    /// Manuals (re)ingested, including ones without text.
    pub documents: usize,
    /// Manuals that yielded no text and therefore no chunks.
    pub empty_documents: usize,
    pub chunks: usize,
    /// Manuals dropped from the index because they disappeared.
    pub deleted_documents: usize,
    /// Chunks whose vectors were found in the embedding cache.
    pub cache_hits: usize,
    pub skipped: Vec<SkippedDocument>,
}

/// Extract, classify and chunk one manual.
pub fn prepare_document(
    file: &DiscoveredFile,
    chunking: &ChunkingConfig,
    classifier: &DomainClassifier,
) -> Result<PreparedDocument> {
    let extracted = extract_text(&file.absolute_path, file.format)?;
    let title = extract_title(&extracted.text, Path::new(&file.relative_path));
    let domains = classifier.classify_document(file.file_name(), &extracted.text);
    let doc_id = DocumentId::new(&file.relative_path);

    let chunks = chunk_text(&extracted.text, chunking);
    if chunks.len() > MAX_CHUNKS_PER_DOCUMENT {
        return Err(Error::Extraction {
            path: file.absolute_path.clone(),
            reason: format!(
                "{} chunks exceed the limit of {MAX_CHUNKS_PER_DOCUMENT} per manual",
                chunks.len()
            ),
        });
    }

    let stored = chunks
        .into_iter()
        .map(|chunk| {
            let page = extracted.page_at(chunk.text_start_char());
            (
                chunk_id(doc_id.numeric, chunk.index),
                StoredChunk {
                    document_id: doc_id.numeric,
                    document_title: title.clone(),
                    relative_path: file.relative_path.clone(),
                    chunk_index: chunk.index,
                    start_char: chunk.start_char,
                    end_char: chunk.end_char,
                    overlap_chars: chunk.overlap_chars,
                    section: chunk.section,
                    page,
                    domains: domains.clone(),
                    text: chunk.text,
                },
            )
        })
        .collect::<Vec<_>>();

    Ok(PreparedDocument {
        record: DocumentRecord {
            id: doc_id.numeric,
            title,
            relative_path: file.relative_path.clone(),
            mtime: file.mtime,
            domains,
            page_count: extracted.page_count(),
            chunk_count: stored.len(),
        },
        chunks: stored,
    })
}

/// Turns manuals into index entries.
pub struct Ingestor {
    embedder: Box<dyn Embedder>,
    cache: Option<EmbeddingCache>,
    chunking: ChunkingConfig,
    classifier: DomainClassifier,
    batch_size: usize,
    show_progress: bool,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        embedder: Box<dyn Embedder>,
        cache: Option<EmbeddingCache>,
    ) -> Self {
        Self {
            embedder,
            cache,
            chunking: config.chunking,
            classifier: config.classifier(),
            batch_size: config.embedding_batch_size,
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while embedding.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    /// Fingerprint of the settings that decide chunk boundaries and domain
    /// tags. An index built under a different fingerprint is stale.
    pub fn settings_fingerprint(&self) -> String {
        format!(
            "chunk_size={};chunk_overlap={};domains={}",
            self.chunking.chunk_size(),
            self.chunking.overlap(),
            self.classifier.fingerprint()
        )
    }

    /// Prepare manuals in parallel. Manuals that fail are logged and
    /// returned separately; they never abort the batch.
    pub fn prepare(
        &self,
        files: &[DiscoveredFile],
    ) -> (Vec<PreparedDocument>, Vec<SkippedDocument>) {
        let chunking = &self.chunking;
        let classifier = &self.classifier;
        let results: Vec<_> = files
            .par_iter()
            .map(|file| (file, prepare_document(file, chunking, classifier)))
            .collect();

        let mut documents = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for (file, result) in results {
            match result {
                Ok(doc) => {
                    if doc.chunks.is_empty() {
                        warn!(path = %file.relative_path, "manual has no extractable text");
                    }
                    documents.push(doc);
                }
                Err(err) => {
                    warn!(path = %file.relative_path, error = %err, "skipping manual");
                    skipped.push(SkippedDocument {
                        relative_path: file.relative_path.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        (documents, skipped)
    }

    /// Embed every chunk of `documents`. Returns the entries and the number
    /// of embedding-cache hits.
    pub fn embed(
        &mut self,
        documents: &[PreparedDocument],
    ) -> Result<(Vec<IndexEntry>, usize)> {
        let texts: Vec<String> = documents
            .iter()
            .flat_map(|d| d.chunks.iter().map(|(_, c)| c.text.clone()))
            .collect();
        if texts.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let mut pb = tqdm!(
            total = texts.len(),
            desc = "embedding",
            unit = " chunks",
            disable = !self.show_progress
        );
        let embedded = embed_with_cache(
            self.embedder.as_mut(),
            self.cache.as_ref(),
            &texts,
            self.batch_size,
            &mut |done| {
                let _ = pb.update(done);
            },
        )?;
        if self.show_progress {
            let _ = pb.refresh();
            eprintln!();
        }
        if embedded.cache_hits > 0 {
            info!(hits = embedded.cache_hits, total = texts.len(), "embedding cache hits");
        }

        let entries = documents
            .iter()
            .flat_map(|d| d.chunks.iter())
            .zip(embedded.vectors)
            .map(|((id, chunk), vector)| IndexEntry {
                chunk_id: *id,
                vector,
                chunk: chunk.clone(),
            })
            .collect();
        Ok((entries, embedded.cache_hits))
    }

    /// Replace the index and the document registry with `files`.
    ///
    /// The index swap happens in one transaction, so readers see either the
    /// old or the new contents.
    pub fn rebuild(
        &mut self,
        files: &[DiscoveredFile],
        index: &VectorIndex,
        config_db: &ConfigDb,
    ) -> Result<IngestReport> {
        info!(manuals = files.len(), "rebuilding index");
        let (documents, skipped) = self.prepare(files);
        let (entries, cache_hits) = self.embed(&documents)?;

        index.replace_all(self.embedder.model_id(), &entries)?;
        index.set_ingest_settings(&self.settings_fingerprint())?;
        config_db.replace_documents(&serialize_records(&documents)?)?;

        let report = IngestReport {
            full_rebuild: true,
            documents: documents.len(),
            empty_documents: documents.iter().filter(|d| d.chunks.is_empty()).count(),
            chunks: entries.len(),
            deleted_documents: 0,
            cache_hits,
            skipped,
        };
        info!(
            documents = report.documents,
            chunks = report.chunks,
            skipped = report.skipped.len(),
            "rebuild complete"
        );
        Ok(report)
    }
}

pub(crate) fn serialize_records(
    documents: &[PreparedDocument],
) -> Result<Vec<(u64, Vec<u8>)>> {
    documents
        .iter()
        .map(|d| Ok((d.record.id, d.record.serialize()?)))
        .collect()
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("embedder", &self.embedder.model_id())
            .field("chunking", &self.chunking)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
