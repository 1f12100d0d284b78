//! Text embedding backends.
//!
//! An [`Embedder`] maps text to fixed-dimension vectors. The backend is picked
//! once at startup from the `embedding_model_id` setting:
//!
//! - `hash:<dimension>` selects [`HashEmbedder`], a deterministic offline
//!   embedder that hashes word tokens into buckets.
//! - anything else is treated as a sentence-transformer BERT checkpoint (a
//!   HuggingFace Hub repository or a local directory) and served by
//!   [`SentenceEmbedder`].

use std::{fmt, str::FromStr};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::{
    embedding_cache::EmbeddingCache,
    error::{Error, Result},
    model_manager::{default_device, model_files},
};

pub const DEFAULT_EMBEDDING_MODEL: &str =
    "sentence-transformers/all-MiniLM-L6-v2";

/// Longest token sequence fed to the sentence encoder.
const MAX_SEQUENCE_LENGTH: usize = 256;

const HASH_PREFIX: &str = "hash:";

/// Maps text to fixed-dimension vectors.
///
/// Implementations must be deterministic: the same text under the same
/// model yields the same vector.
pub trait Embedder: Send {
    /// Identifier recorded in the index so vectors from different models are
    /// never mixed.
    fn model_id(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::Model("embedder returned no vector".into()))
    }
}

/// Embedding backend selected from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingBackend {
    SentenceTransformer { model_id: String },
    Hashed { dimension: usize },
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        EmbeddingBackend::SentenceTransformer {
            model_id: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

impl FromStr for EmbeddingBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(dim) = s.strip_prefix(HASH_PREFIX) {
            let dimension: usize = dim.parse().map_err(|_| {
                Error::Config(format!("invalid hash embedder dimension '{dim}'"))
            })?;
            if dimension == 0 {
                return Err(Error::Config(
                    "hash embedder dimension must be greater than 0".into(),
                ));
            }
            return Ok(EmbeddingBackend::Hashed { dimension });
        }
        if s.is_empty() {
            return Err(Error::Config(
                "embedding_model_id must not be empty".into(),
            ));
        }
        Ok(EmbeddingBackend::SentenceTransformer {
            model_id: s.to_string(),
        })
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingBackend::SentenceTransformer { model_id } => {
                f.write_str(model_id)
            }
            EmbeddingBackend::Hashed { dimension } => {
                write!(f, "{HASH_PREFIX}{dimension}")
            }
        }
    }
}

impl EmbeddingBackend {
    /// Construct the embedder. Model weights are loaded lazily on first use.
    pub fn build(&self) -> Box<dyn Embedder> {
        match self {
            EmbeddingBackend::SentenceTransformer { model_id } => {
                Box::new(SentenceEmbedder::new(model_id.clone()))
            }
            EmbeddingBackend::Hashed { dimension } => {
                Box::new(HashEmbedder::new(*dimension))
            }
        }
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed with blake3 into one of
/// `dimension` buckets with a ±1 sign, and the result is L2-normalized. Texts
/// sharing words have positive cosine similarity, which is enough to
/// exercise the whole pipeline without a model download.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("{HASH_PREFIX}{dimension}"),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

struct LoadedEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Sentence-transformer BERT encoder with masked mean pooling.
pub struct SentenceEmbedder {
    model_id: String,
    encoder: Option<LoadedEncoder>,
}

impl SentenceEmbedder {
    pub fn new(model_id: String) -> Self {
        Self {
            model_id,
            encoder: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.encoder.is_some()
    }

    fn ensure_loaded(&mut self) -> Result<&LoadedEncoder> {
        if self.encoder.is_none() {
            info!(model = %self.model_id, "loading embedding model");
            self.encoder = Some(load_encoder(&self.model_id)?);
        }

        self.encoder
            .as_ref()
            .ok_or_else(|| Error::Model("embedding model not loaded".into()))
    }
}

fn load_encoder(model_id: &str) -> Result<LoadedEncoder> {
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
            max_length: MAX_SEQUENCE_LENGTH,
            ..Default::default()
        }))
        .map_err(|e| Error::Model(format!("configuring tokenizer: {e}")))?;

    let weights = std::fs::read(&files[2])?;
    let vb = VarBuilder::from_buffered_safetensors(weights, DTYPE, &device)?;
    let model = BertModel::load(vb, &config)?;

    Ok(LoadedEncoder {
        model,
        tokenizer,
        device,
    })
}

impl Embedder for SentenceEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encoder = self.ensure_loaded()?;

        let encodings = encoder
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Model(format!("tokenization failed: {e}")))?;

        let ids = encodings
            .iter()
            .map(|e| Tensor::new(e.get_ids(), &encoder.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let masks = encodings
            .iter()
            .map(|e| Tensor::new(e.get_attention_mask(), &encoder.device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = encoder.model.forward(
            &input_ids,
            &token_type_ids,
            Some(&attention_mask),
        )?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;

        Ok(pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }
}

/// Mean over unmasked tokens of a `[B, T, H]` tensor, L2-normalized to
/// `[B, H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask
        .to_device(hidden.device())?
        .to_dtype(hidden.dtype())?
        .unsqueeze(2)?;
    let sum = hidden.broadcast_mul(&mask)?.sum(1)?;
    let lengths = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
    let mean = sum.broadcast_div(&lengths)?;

    let eps = match hidden.dtype() {
        DType::F16 | DType::BF16 => 1e-6,
        _ => 1e-12,
    };
    let norm = (mean.sqr()?.sum_keepdim(1)?.sqrt()? + eps)?;
    Ok(mean.broadcast_div(&norm)?)
}

/// Vectors for a batch of texts plus how many came from the cache.
#[derive(Debug, Default)]
pub struct CachedEmbeddings {
    pub vectors: Vec<Vec<f32>>,
    pub cache_hits: usize,
}

/// Embed `texts`, reusing cached vectors for text already embedded with the
/// same model and storing newly computed ones.
///
/// Misses are sent to the embedder in batches of `batch_size`;
/// `on_progress` is called with the number of texts completed after each
/// batch.
pub fn embed_with_cache(
    embedder: &mut dyn Embedder,
    cache: Option<&EmbeddingCache>,
    texts: &[String],
    batch_size: usize,
    on_progress: &mut dyn FnMut(usize),
) -> Result<CachedEmbeddings> {
    if texts.is_empty() {
        return Ok(CachedEmbeddings::default());
    }

    let model_id = embedder.model_id().to_string();
    let mut slots = match cache {
        Some(cache) => cache.get_many(&model_id, texts)?,
        None => vec![None; texts.len()],
    };

    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(i, _)| i)
        .collect();
    let cache_hits = texts.len() - missing.len();
    on_progress(cache_hits);

    for batch in missing.chunks(batch_size.max(1)) {
        let batch_texts: Vec<String> =
            batch.iter().map(|&i| texts[i].clone()).collect();
        let vectors = embedder.embed_batch(&batch_texts)?;
        if vectors.len() != batch_texts.len() {
            return Err(Error::Model(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                batch_texts.len()
            )));
        }

        if let Some(cache) = cache {
            cache.put_many(&model_id, &batch_texts, &vectors)?;
        }
        for (&i, vector) in batch.iter().zip(vectors) {
            slots[i] = Some(vector);
        }
        on_progress(batch.len());
    }

    debug!(total = texts.len(), cache_hits, "embedded batch");

    let vectors = slots
        .into_iter()
        .map(|slot| {
            slot.ok_or_else(|| Error::Model("missing embedding".into()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CachedEmbeddings {
        vectors,
        cache_hits,
    })
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    /// Counts texts sent to the inner embedder.
    struct CountingEmbedder {
        inner: HashEmbedder,
        embedded: usize,
    }

    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.embedded += texts.len();
            self.inner.embed_batch(texts)
        }
    }

    #[test]
    fn parses_backends() {
        assert_eq!(
            "hash:64".parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::Hashed { dimension: 64 }
        );
        assert_eq!(
            DEFAULT_EMBEDDING_MODEL.parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::default()
        );
        assert!(matches!(
            "hash:0".parse::<EmbeddingBackend>(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            "hash:abc".parse::<EmbeddingBackend>(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            "  ".parse::<EmbeddingBackend>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn backend_display_roundtrips_model_id() {
        let backend = EmbeddingBackend::Hashed { dimension: 32 };
        assert_eq!(backend.to_string(), "hash:32");
        assert_eq!(backend.build().model_id(), "hash:32");
    }

    #[test]
    fn hash_embedder_is_deterministic_and_normalized() {
        let mut embedder = HashEmbedder::new(64);
        let a = embedder.embed("Submit the claim").unwrap();
        let b = embedder.embed("submit THE claim").unwrap();

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hash_embedder_prefers_shared_words() {
        let mut embedder = HashEmbedder::new(256);
        let query = embedder.embed("submit a claim").unwrap();
        let close = embedder.embed("how to submit a claim to the payer").unwrap();
        let far = embedder.embed("printing batch statements").unwrap();

        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[test]
    fn hash_embedder_empty_text_is_zero_vector() {
        let mut embedder = HashEmbedder::new(8);
        assert_eq!(embedder.embed("  ").unwrap(), vec![0.0; 8]);
    }

    #[test]
    fn masked_mean_ignores_padding() {
        // Batch of 1, 3 tokens, hidden 2. The last token is padding.
        let hidden = Tensor::new(
            &[[[1f32, 0.0], [3.0, 0.0], [100.0, 100.0]]],
            &Device::Cpu,
        )
        .unwrap();
        let mask = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu).unwrap();

        let pooled = masked_mean_l2(&hidden, &mask)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert!((pooled[0][0] - 1.0).abs() < 1e-5);
        assert!(pooled[0][1].abs() < 1e-5);
    }

    #[test]
    fn cache_skips_already_embedded_text() {
        let tmp = tempfile::tempdir().unwrap();
        let cache =
            EmbeddingCache::open(&tmp.path().join("cache.redb")).unwrap();
        let mut embedder = CountingEmbedder {
            inner: HashEmbedder::new(16),
            embedded: 0,
        };
        let texts: Vec<String> =
            vec!["one".into(), "two".into(), "three".into()];

        let first =
            embed_with_cache(&mut embedder, Some(&cache), &texts, 2, &mut |_| {})
                .unwrap();
        assert_eq!(first.cache_hits, 0);
        assert_eq!(embedder.embedded, 3);

        let more: Vec<String> = vec!["two".into(), "four".into()];
        let mut progress = 0;
        let second = embed_with_cache(
            &mut embedder,
            Some(&cache),
            &more,
            2,
            &mut |n| progress += n,
        )
        .unwrap();
        assert_eq!(second.cache_hits, 1);
        assert_eq!(embedder.embedded, 4);
        assert_eq!(progress, 2);
        assert_eq!(second.vectors[0], first.vectors[1]);
    }

    #[test]
    fn without_cache_embeds_everything_in_order() {
        let mut embedder = HashEmbedder::new(16);
        let texts: Vec<String> = vec!["a b".into(), "c".into(), "d".into()];

        let result =
            embed_with_cache(&mut embedder, None, &texts, 2, &mut |_| {})
                .unwrap();
        assert_eq!(result.cache_hits, 0);
        assert_eq!(result.vectors, embedder.embed_batch(&texts).unwrap());
    }
}
