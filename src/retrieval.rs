//! Query-time retrieval pipeline.
//!
//! [`Retriever::retrieve`] runs, in order:
//!
//! 1. Classify the query into domain tags.
//! 2. Vector search for `top_k` candidates, restricted to the detected
//!    domains when domain filtering is enabled and any of them exist in the
//!    index.
//! 3. If a filtered search found nothing, search once more without a
//!    filter.
//! 4. Re-rank the candidates down to `rerank_top_k` (or keep the first
//!    `rerank_top_k` by similarity when re-ranking is disabled).
//! 5. Assemble the [`QueryContext`] in final order with citation metadata.

use std::{collections::HashMap, sync::Arc};

use schemars::JsonSchema;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    doc_id::DocumentId,
    domain::{Domain, DomainClassifier, domain_hint},
    embedding::Embedder,
    error::{Error, Result},
    reranker::{Reranker, rerank},
    vector_index::{SearchHit, StoredChunk, VectorIndex},
};

/// Default number of vector-search candidates.
pub const DEFAULT_TOP_K: usize = 20;

/// Default number of passages kept after re-ranking.
pub const DEFAULT_RERANK_TOP_K: usize = 8;

/// Validated retrieval sizing and policy switches.
///
/// # Examples
///
/// ```
/// use manualrag::retrieval::RetrievalConfig;
///
/// assert!(RetrievalConfig::new(20, 8, false, true).is_ok());
/// assert!(RetrievalConfig::new(0, 0, false, true).is_err());
/// assert!(RetrievalConfig::new(5, 8, false, true).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalConfig {
    top_k: usize,
    rerank_top_k: usize,
    enable_domain_filter: bool,
    enable_reranking: bool,
}

impl RetrievalConfig {
    pub fn new(
        top_k: usize,
        rerank_top_k: usize,
        enable_domain_filter: bool,
        enable_reranking: bool,
    ) -> Result<Self> {
        if top_k == 0 {
            return Err(Error::Config("top_k must be greater than zero".into()));
        }
        if rerank_top_k == 0 {
            return Err(Error::Config(
                "rerank_top_k must be greater than zero".into(),
            ));
        }
        if rerank_top_k > top_k {
            return Err(Error::Config(format!(
                "rerank_top_k ({rerank_top_k}) must not exceed top_k ({top_k})"
            )));
        }
        Ok(Self {
            top_k,
            rerank_top_k,
            enable_domain_filter,
            enable_reranking,
        })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn rerank_top_k(&self) -> usize {
        self.rerank_top_k
    }

    pub fn enable_domain_filter(&self) -> bool {
        self.enable_domain_filter
    }

    pub fn enable_reranking(&self) -> bool {
        self.enable_reranking
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            rerank_top_k: DEFAULT_RERANK_TOP_K,
            enable_domain_filter: false,
            enable_reranking: true,
        }
    }
}

/// One passage selected to ground an answer.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ContextPassage {
    /// 1-based position in the final ordering.
    pub rank: usize,
    pub chunk_id: u64,
    /// Short display id of the source manual, e.g. `#a1b2c3`.
    pub document_id: String,
    pub document_title: String,
    pub relative_path: String,
    pub section: Option<String>,
    /// 1-based page the passage starts on, for paginated sources.
    pub page: Option<usize>,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub domains: Vec<Domain>,
    /// Cosine similarity from the vector search.
    pub similarity: f32,
    /// Re-ranker score, absent when re-ranking is disabled.
    pub relevance: Option<f32>,
    pub text: String,
}

/// The ordered passages chosen for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct QueryContext {
    pub query: String,
    /// Domains the query was classified into.
    pub domains: Vec<Domain>,
    /// Domains the vector search was restricted to (empty when unfiltered).
    pub filter: Vec<Domain>,
    /// Whether the filtered search came back empty and was retried
    /// without a filter.
    pub fallback_used: bool,
    pub passages: Vec<ContextPassage>,
}

impl QueryContext {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Sentence describing the query's domains, for the answer generator.
    pub fn domain_hint(&self) -> String {
        domain_hint(&self.domains)
    }
}

/// Composes classifier, embedder, vector index and re-ranker.
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Box<dyn Embedder>,
    reranker: Option<Box<dyn Reranker>>,
    classifier: DomainClassifier,
    config: RetrievalConfig,
    available_domains: Vec<Domain>,
}

impl Retriever {
    /// Build a retriever over `index`.
    ///
    /// Fails if the index was built with a different embedding model than
    /// `embedder`. `reranker` is ignored when re-ranking is disabled in
    /// `config`.
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Box<dyn Embedder>,
        reranker: Option<Box<dyn Reranker>>,
        classifier: DomainClassifier,
        config: RetrievalConfig,
    ) -> Result<Self> {
        index.ensure_embedding_model(embedder.model_id())?;
        let available_domains = index.domains()?;
        let reranker = reranker.filter(|_| config.enable_reranking());

        Ok(Self {
            index,
            embedder,
            reranker,
            classifier,
            config,
            available_domains,
        })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve the passages that ground an answer to `query`.
    ///
    /// Returns at most `rerank_top_k` passages. A blank query returns an
    /// empty context without calling any model.
    pub fn retrieve(&mut self, query: &str) -> Result<QueryContext> {
        self.retrieve_limited(query, None)
    }

    /// Like [`Retriever::retrieve`], keeping at most `limit` passages
    /// (never more than `rerank_top_k`).
    pub fn retrieve_limited(
        &mut self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<QueryContext> {
        let text = query.trim();
        if text.is_empty() {
            return Ok(QueryContext {
                query: query.to_string(),
                ..Default::default()
            });
        }

        let domains = self.classifier.classify_query(text);
        let filter: Vec<Domain> = if self.config.enable_domain_filter() {
            domains
                .iter()
                .copied()
                .filter(|d| self.available_domains.contains(d))
                .collect()
        } else {
            Vec::new()
        };

        let vector = self.embedder.embed(text)?;
        let top_k = self.config.top_k();

        let mut hits = self.index.search(
            &vector,
            top_k,
            (!filter.is_empty()).then_some(filter.as_slice()),
        )?;
        let mut fallback_used = false;
        if hits.is_empty() && !filter.is_empty() {
            info!(
                filter = ?filter,
                "domain-filtered search found nothing, retrying unfiltered"
            );
            hits = self.index.search(&vector, top_k, None)?;
            fallback_used = true;
        }

        let candidates = self.load_candidates(&hits)?;
        let keep = limit
            .unwrap_or(usize::MAX)
            .min(self.config.rerank_top_k());

        let selected: Vec<(usize, Option<f32>)> = match self.reranker.as_mut() {
            Some(reranker) => {
                let pairs: Vec<(&str, u64)> = candidates
                    .iter()
                    .map(|(hit, chunk)| (chunk.text.as_str(), hit.chunk_id))
                    .collect();
                let position: HashMap<u64, usize> = candidates
                    .iter()
                    .enumerate()
                    .map(|(i, (hit, _))| (hit.chunk_id, i))
                    .collect();
                rerank(&mut **reranker, text, &pairs, keep)?
                    .into_iter()
                    .filter_map(|ranked| {
                        position
                            .get(&ranked.chunk_id)
                            .map(|&i| (i, Some(ranked.relevance)))
                    })
                    .collect()
            }
            None => (0..candidates.len().min(keep)).map(|i| (i, None)).collect(),
        };

        let passages: Vec<ContextPassage> = selected
            .into_iter()
            .enumerate()
            .map(|(rank, (i, relevance))| {
                let (hit, chunk) = &candidates[i];
                ContextPassage {
                    rank: rank + 1,
                    chunk_id: hit.chunk_id,
                    document_id: DocumentId::from_numeric(chunk.document_id)
                        .to_string(),
                    document_title: chunk.document_title.clone(),
                    relative_path: chunk.relative_path.clone(),
                    section: chunk.section.clone(),
                    page: chunk.page,
                    chunk_index: chunk.chunk_index,
                    start_char: chunk.start_char,
                    end_char: chunk.end_char,
                    domains: chunk.domains.clone(),
                    similarity: hit.similarity,
                    relevance,
                    text: chunk.text.clone(),
                }
            })
            .collect();

        debug!(
            query = text,
            domains = ?domains,
            candidates = candidates.len(),
            passages = passages.len(),
            fallback_used,
            "retrieved context"
        );

        Ok(QueryContext {
            query: query.to_string(),
            domains,
            filter,
            fallback_used,
            passages,
        })
    }

    fn load_candidates(
        &self,
        hits: &[SearchHit],
    ) -> Result<Vec<(SearchHit, StoredChunk)>> {
        let ids: Vec<u64> = hits.iter().map(|h| h.chunk_id).collect();
        let chunks = self.index.get_chunks(&ids)?;
        Ok(hits
            .iter()
            .zip(chunks)
            .filter_map(|(hit, chunk)| chunk.map(|c| (*hit, c)))
            .collect())
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder.model_id())
            .field(
                "reranker",
                &self.reranker.as_ref().map(|r| r.model_id().to_string()),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
