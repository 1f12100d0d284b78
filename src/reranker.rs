//! Second-pass relevance scoring of retrieval candidates.
//!
//! A [`Reranker`] scores each candidate passage jointly with the query.
//! [`rerank`] turns those scores into the final ordering and is the only
//! entry point the retrieval pipeline uses, so every backend shares the same
//! tie-breaking and truncation rules.

use std::{fmt, str::FromStr};

use candle_core::{Device, IndexOp, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear};
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use tokenizers::{
    PaddingParams, PaddingStrategy, Tokenizer, TruncationParams,
    TruncationStrategy,
};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    model_manager::{ModelManager, default_device, model_files},
};

pub const DEFAULT_RERANKER_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";

/// Longest (query, passage) token sequence fed to the cross-encoder.
const CROSS_ENCODER_MAX_LENGTH: usize = 512;

const COLBERT_PREFIX: &str = "colbert:";
const LEXICAL: &str = "lexical";

/// Scores (query, passage) pairs. Higher is more relevant.
pub trait Reranker: Send {
    fn model_id(&self) -> &str;

    /// One score per passage, in passage order.
    fn score(&mut self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;
}

/// A candidate after re-ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub chunk_id: u64,
    pub relevance: f32,
}

/// Re-score `candidates` (passage text, chunk id) against `query` and keep
/// the best `top_n`.
///
/// Returns `min(top_n, candidates.len())` entries ordered by descending
/// relevance. Equal scores keep their candidate order. An empty candidate
/// list returns immediately without touching the model.
pub fn rerank(
    reranker: &mut dyn Reranker,
    query: &str,
    candidates: &[(&str, u64)],
    top_n: usize,
) -> Result<Vec<RankedCandidate>> {
    if candidates.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }

    let passages: Vec<&str> = candidates.iter().map(|(text, _)| *text).collect();
    let scores = reranker.score(query, &passages)?;
    if scores.len() != candidates.len() {
        return Err(Error::Model(format!(
            "re-ranker returned {} scores for {} candidates",
            scores.len(),
            candidates.len()
        )));
    }

    let mut ranked: Vec<RankedCandidate> = candidates
        .iter()
        .zip(scores)
        .map(|((_, chunk_id), relevance)| RankedCandidate {
            chunk_id: *chunk_id,
            relevance,
        })
        .collect();

    // Stable sort: ties keep candidate order.
    ranked.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    ranked.truncate(top_n);

    debug!(
        candidates = candidates.len(),
        kept = ranked.len(),
        "re-ranked candidates"
    );
    Ok(ranked)
}

/// Re-ranking backend selected from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerankerBackend {
    CrossEncoder { model_id: String },
    Colbert { model_id: String },
    Lexical,
}

impl Default for RerankerBackend {
    fn default() -> Self {
        RerankerBackend::CrossEncoder {
            model_id: DEFAULT_RERANKER_MODEL.to_string(),
        }
    }
}

impl FromStr for RerankerBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == LEXICAL {
            return Ok(RerankerBackend::Lexical);
        }
        if let Some(model_id) = s.strip_prefix(COLBERT_PREFIX) {
            if model_id.is_empty() {
                return Err(Error::Config(
                    "colbert re-ranker needs a model id".into(),
                ));
            }
            return Ok(RerankerBackend::Colbert {
                model_id: model_id.to_string(),
            });
        }
        if s.is_empty() {
            return Err(Error::Config(
                "reranker_model_id must not be empty".into(),
            ));
        }
        Ok(RerankerBackend::CrossEncoder {
            model_id: s.to_string(),
        })
    }
}

impl fmt::Display for RerankerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RerankerBackend::CrossEncoder { model_id } => f.write_str(model_id),
            RerankerBackend::Colbert { model_id } => {
                write!(f, "{COLBERT_PREFIX}{model_id}")
            }
            RerankerBackend::Lexical => f.write_str(LEXICAL),
        }
    }
}

impl RerankerBackend {
    /// Construct the re-ranker. Model weights are loaded lazily on first use.
    pub fn build(&self) -> Box<dyn Reranker> {
        match self {
            RerankerBackend::CrossEncoder { model_id } => {
                Box::new(CrossEncoderReranker::new(model_id.clone()))
            }
            RerankerBackend::Colbert { model_id } => Box::new(ColbertReranker {
                model: ModelManager::with_model_id(model_id.clone()),
            }),
            RerankerBackend::Lexical => Box::new(LexicalReranker),
        }
    }
}

struct LoadedCrossEncoder {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
}

/// BERT sequence-classification cross-encoder.
///
/// Each (query, passage) pair is encoded jointly; the `[CLS]` state goes
/// through the pooler (dense + tanh) and a single-logit classifier head.
pub struct CrossEncoderReranker {
    model_id: String,
    encoder: Option<LoadedCrossEncoder>,
}

impl CrossEncoderReranker {
    pub fn new(model_id: String) -> Self {
        Self {
            model_id,
            encoder: None,
        }
    }

    fn ensure_loaded(&mut self) -> Result<&LoadedCrossEncoder> {
        if self.encoder.is_none() {
            info!(model = %self.model_id, "loading cross-encoder");
            self.encoder = Some(load_cross_encoder(&self.model_id)?);
        }

        self.encoder
            .as_ref()
            .ok_or_else(|| Error::Model("cross-encoder not loaded".into()))
    }
}

fn load_cross_encoder(model_id: &str) -> Result<LoadedCrossEncoder> {
    let files = model_files(
        model_id,
        &["config.json", "tokenizer.json", "model.safetensors"],
    )?;
    let device = default_device();

    let config: Config =
        serde_json::from_str(&std::fs::read_to_string(&files[0])?)?;

    let mut tokenizer = Tokenizer::from_file(&files[1])
        .map_err(|e| Error::Model(format!("loading tokenizer: {e}")))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: CROSS_ENCODER_MAX_LENGTH,
            strategy: TruncationStrategy::LongestFirst,
            ..Default::default()
        }))
        .map_err(|e| Error::Model(format!("configuring tokenizer: {e}")))?;

    let weights = std::fs::read(&files[2])?;
    let vb = VarBuilder::from_buffered_safetensors(weights, DTYPE, &device)?;
    let bert = BertModel::load(vb.pp("bert"), &config)?;
    let pooler = linear(
        config.hidden_size,
        config.hidden_size,
        vb.pp("bert").pp("pooler").pp("dense"),
    )?;
    let classifier = linear(config.hidden_size, 1, vb.pp("classifier"))?;

    Ok(LoadedCrossEncoder {
        bert,
        pooler,
        classifier,
        tokenizer,
        device,
    })
}

impl Reranker for CrossEncoderReranker {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn score(&mut self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let encoder = self.ensure_loaded()?;

        let pairs: Vec<(String, String)> = passages
            .iter()
            .map(|p| (query.to_string(), p.to_string()))
            .collect();
        let encodings = encoder
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| Error::Model(format!("tokenization failed: {e}")))?;

        let stack = |field: fn(&tokenizers::Encoding) -> &[u32]| {
            let rows = encodings
                .iter()
                .map(|e| Tensor::new(field(e), &encoder.device))
                .collect::<candle_core::Result<Vec<_>>>()?;
            Tensor::stack(&rows, 0)
        };
        let input_ids = stack(tokenizers::Encoding::get_ids)?;
        let token_type_ids = stack(tokenizers::Encoding::get_type_ids)?;
        let attention_mask = stack(tokenizers::Encoding::get_attention_mask)?;

        let hidden = encoder.bert.forward(
            &input_ids,
            &token_type_ids,
            Some(&attention_mask),
        )?;
        let cls = hidden.i((.., 0))?;
        let pooled = encoder.pooler.forward(&cls)?.tanh()?;
        let logits = encoder.classifier.forward(&pooled)?;

        Ok(logits.squeeze(1)?.to_device(&Device::Cpu)?.to_vec1::<f32>()?)
    }
}

/// ColBERT late-interaction scoring (MaxSim over token embeddings).
pub struct ColbertReranker {
    model: ModelManager,
}

impl Reranker for ColbertReranker {
    fn model_id(&self) -> &str {
        self.model.model_id()
    }

    fn score(&mut self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.model.encode_query(query)?;
        let texts: Vec<String> = passages.iter().map(|p| p.to_string()).collect();
        let documents = self.model.encode_documents(&texts)?;

        (0..passages.len())
            .map(|i| maxsim(&query_embedding, &documents.get(i)?))
            .collect()
    }
}

/// Compute the MaxSim score between a query embedding and a passage embedding.
///
/// query_embedding: [Q, D] where Q = query tokens, D = embedding dimension
/// doc_embedding: [T, D] where T = passage tokens, D = embedding dimension
///
/// MaxSim = sum over query tokens of max(query_token . doc_token for all doc tokens)
fn maxsim(query_embedding: &Tensor, doc_embedding: &Tensor) -> Result<f32> {
    // Compute similarity matrix [Q, T] = query_emb @ doc_emb^T
    let sim_matrix = query_embedding.matmul(&doc_embedding.t()?)?;

    // Take max along dimension 1 (best passage token per query token)
    let row_maxes = sim_matrix.max(1)?;

    Ok(row_maxes.sum_all()?.to_scalar::<f32>()?)
}

/// Deterministic term-overlap scorer.
///
/// Scores a passage by the fraction of distinct query terms it contains,
/// plus a small bonus for repeated occurrences. Needs no model, which makes
/// it the backend of choice for offline use and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

impl Reranker for LexicalReranker {
    fn model_id(&self) -> &str {
        LEXICAL
    }

    fn score(&mut self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let mut query_terms = terms(query);
        query_terms.sort();
        query_terms.dedup();
        if query_terms.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }

        Ok(passages
            .iter()
            .map(|passage| {
                let passage_terms = terms(passage);
                let mut matched = 0usize;
                let mut occurrences = 0usize;
                for term in &query_terms {
                    let count = passage_terms.iter().filter(|t| *t == term).count();
                    if count > 0 {
                        matched += 1;
                        occurrences += count;
                    }
                }
                let coverage = matched as f32 / query_terms.len() as f32;
                let density =
                    occurrences as f32 / (passage_terms.len().max(1) as f32);
                coverage + density * 0.1
            })
            .collect())
    }
}
