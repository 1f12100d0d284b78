//! Layered configuration.
//!
//! [`Settings`] holds raw string values keyed by option name. Values are
//! layered as: built-in default, stored setting in [`ConfigDb`],
//! `MANUALRAG_<OPTION>` environment variable, command-line override. The
//! result is validated once by [`Settings::validate`] into an immutable
//! [`Config`] whose typed pieces are handed to each component.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config_db::ConfigDb,
    data_dir::DataDir,
    domain::{DEFAULT_MAX_DOMAINS, Domain, DomainClassifier, DomainTaxonomy},
    embedding::EmbeddingBackend,
    error::{Error, Result},
    grounding::AnswerBackend,
    reranker::RerankerBackend,
    retrieval::{DEFAULT_RERANK_TOP_K, DEFAULT_TOP_K, RetrievalConfig},
};

pub const CHUNK_SIZE: &str = "chunk_size";
pub const CHUNK_OVERLAP: &str = "chunk_overlap";
pub const TOP_K: &str = "top_k";
pub const RERANK_TOP_K: &str = "rerank_top_k";
pub const ENABLE_DOMAIN_FILTER: &str = "enable_domain_filter";
pub const ENABLE_RERANKING: &str = "enable_reranking";
pub const EMBEDDING_MODEL_ID: &str = "embedding_model_id";
pub const EMBEDDING_BATCH_SIZE: &str = "embedding_batch_size";
pub const RERANKER_MODEL_ID: &str = "reranker_model_id";
pub const ACTIVE_ANSWER_BACKEND: &str = "active_answer_backend";
pub const DOMAIN_THRESHOLD: &str = "domain_threshold";
pub const MAX_QUERY_DOMAINS: &str = "max_query_domains";
pub const MANUALS_DIR: &str = "manuals_dir";

/// Prefix of the per-domain extra keyword options, e.g. `keywords.claims`.
pub const KEYWORDS_PREFIX: &str = "keywords.";

/// Prefix of the environment variables that override settings.
pub const ENV_PREFIX: &str = "MANUALRAG_";

pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;

/// Every plain option name, in display order.
pub const KNOWN_KEYS: &[&str] = &[
    CHUNK_SIZE,
    CHUNK_OVERLAP,
    TOP_K,
    RERANK_TOP_K,
    ENABLE_DOMAIN_FILTER,
    ENABLE_RERANKING,
    EMBEDDING_MODEL_ID,
    EMBEDDING_BATCH_SIZE,
    RERANKER_MODEL_ID,
    ACTIVE_ANSWER_BACKEND,
    DOMAIN_THRESHOLD,
    MAX_QUERY_DOMAINS,
    MANUALS_DIR,
];

/// Built-in default for an option, if it has one.
pub fn default_value(key: &str) -> Option<String> {
    let value = match key {
        CHUNK_SIZE => DEFAULT_CHUNK_SIZE.to_string(),
        CHUNK_OVERLAP => DEFAULT_CHUNK_OVERLAP.to_string(),
        TOP_K => DEFAULT_TOP_K.to_string(),
        RERANK_TOP_K => DEFAULT_RERANK_TOP_K.to_string(),
        ENABLE_DOMAIN_FILTER => "false".to_string(),
        ENABLE_RERANKING => "true".to_string(),
        EMBEDDING_MODEL_ID => EmbeddingBackend::default().to_string(),
        EMBEDDING_BATCH_SIZE => DEFAULT_EMBEDDING_BATCH_SIZE.to_string(),
        RERANKER_MODEL_ID => RerankerBackend::default().to_string(),
        ACTIVE_ANSWER_BACKEND => AnswerBackend::default().to_string(),
        DOMAIN_THRESHOLD => "0".to_string(),
        MAX_QUERY_DOMAINS => DEFAULT_MAX_DOMAINS.to_string(),
        _ => return None,
    };
    Some(value)
}

/// Reject option names that are neither known keys nor
/// `keywords.<domain>` for a valid domain.
pub fn validate_key(key: &str) -> Result<()> {
    if KNOWN_KEYS.contains(&key) {
        return Ok(());
    }
    if let Some(domain) = key.strip_prefix(KEYWORDS_PREFIX) {
        return domain.parse::<Domain>().map(|_| ());
    }
    Err(Error::Config(format!("unknown setting '{key}'")))
}

/// Environment variable that overrides `key`:
/// `keywords.user_management` becomes `MANUALRAG_KEYWORDS_USER_MANAGEMENT`.
pub fn env_var_name(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.replace('.', "_").to_ascii_uppercase())
}

fn keywords_key(domain: Domain) -> String {
    format!("{KEYWORDS_PREFIX}{domain}")
}

/// Raw, unvalidated option values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Settings stored in the config database. Unknown stored keys are
    /// skipped with a warning.
    pub fn from_db(config_db: &ConfigDb) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in config_db.list_settings()? {
            if validate_key(&key).is_err() {
                warn!(key = %key, "ignoring unknown stored setting");
                continue;
            }
            settings.values.insert(key, value);
        }
        Ok(settings)
    }

    /// Layer environment overrides on top, using `lookup` to read variables.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let keys = KNOWN_KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(Domain::ALL.iter().map(|&d| keywords_key(d)));
        for key in keys {
            if let Some(value) = lookup(&env_var_name(&key)) {
                self.values.insert(key, value);
            }
        }
        self
    }

    /// Set one option, rejecting unknown keys.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        validate_key(key)?;
        self.values.insert(key.to_string(), value.into());
        Ok(())
    }

    /// The explicitly set value of `key`, ignoring defaults.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The value of `key` after applying its built-in default.
    pub fn effective(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string).or_else(|| default_value(key))
    }

    /// Every option with an effective value, known keys first, then any
    /// keyword extensions.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = KNOWN_KEYS
            .iter()
            .filter_map(|&k| self.effective(k).map(|v| (k.to_string(), v)))
            .collect();
        entries.extend(
            self.values
                .iter()
                .filter(|(k, _)| k.starts_with(KEYWORDS_PREFIX))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        entries
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<T> {
        let raw = self
            .effective(key)
            .ok_or_else(|| Error::Config(format!("missing value for '{key}'")))?;
        raw.trim().parse().map_err(|_| {
            Error::Config(format!("invalid value '{raw}' for '{key}'"))
        })
    }

    fn parse_bool(&self, key: &str) -> Result<bool> {
        let raw = self.effective(key).unwrap_or_default();
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!(
                "invalid boolean '{raw}' for '{key}'"
            ))),
        }
    }

    fn parse_positive(&self, key: &str) -> Result<usize> {
        let value: usize = self.parse(key)?;
        if value == 0 {
            return Err(Error::Config(format!("'{key}' must be greater than zero")));
        }
        Ok(value)
    }

    /// Validate every option into a typed [`Config`].
    ///
    /// Any invalid value is a fatal configuration error.
    pub fn validate(&self) -> Result<Config> {
        let chunking =
            ChunkingConfig::new(self.parse(CHUNK_SIZE)?, self.parse(CHUNK_OVERLAP)?)?;
        let retrieval = RetrievalConfig::new(
            self.parse(TOP_K)?,
            self.parse(RERANK_TOP_K)?,
            self.parse_bool(ENABLE_DOMAIN_FILTER)?,
            self.parse_bool(ENABLE_RERANKING)?,
        )?;

        let domain_threshold: f32 = self.parse(DOMAIN_THRESHOLD)?;
        if !domain_threshold.is_finite() || domain_threshold < 0.0 {
            return Err(Error::Config(format!(
                "'{DOMAIN_THRESHOLD}' must be a non-negative number"
            )));
        }

        let mut taxonomy = DomainTaxonomy::default();
        for (key, value) in &self.values {
            let Some(name) = key.strip_prefix(KEYWORDS_PREFIX) else {
                continue;
            };
            let domain: Domain = name.parse()?;
            taxonomy = taxonomy.with_extra_keywords(
                domain,
                value.split(',').filter(|k| !k.trim().is_empty()),
            );
        }

        Ok(Config {
            chunking,
            retrieval,
            embedding: self.parse(EMBEDDING_MODEL_ID)?,
            embedding_batch_size: self.parse_positive(EMBEDDING_BATCH_SIZE)?,
            reranker: self.parse(RERANKER_MODEL_ID)?,
            answer: self.parse(ACTIVE_ANSWER_BACKEND)?,
            taxonomy,
            domain_threshold,
            max_query_domains: self.parse_positive(MAX_QUERY_DOMAINS)?,
            manuals_dir: self
                .get(MANUALS_DIR)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        })
    }
}

/// Validated, immutable configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingBackend,
    pub embedding_batch_size: usize,
    pub reranker: RerankerBackend,
    pub answer: AnswerBackend,
    pub taxonomy: DomainTaxonomy,
    pub domain_threshold: f32,
    pub max_query_domains: usize,
    pub manuals_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingBackend::default(),
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            reranker: RerankerBackend::default(),
            answer: AnswerBackend::default(),
            taxonomy: DomainTaxonomy::default(),
            domain_threshold: 0.0,
            max_query_domains: DEFAULT_MAX_DOMAINS,
            manuals_dir: None,
        }
    }
}

impl Config {
    /// Load, layer and validate settings for a data directory.
    pub fn load(config_db: &ConfigDb, overrides: &[(&str, String)]) -> Result<Self> {
        let mut settings =
            Settings::from_db(config_db)?.with_env(|name| std::env::var(name).ok());
        for (key, value) in overrides {
            settings.set(key, value.clone())?;
        }
        settings.validate()
    }

    pub fn classifier(&self) -> DomainClassifier {
        DomainClassifier::new(
            self.taxonomy.clone(),
            self.domain_threshold,
            self.max_query_domains,
        )
    }

    /// The manuals directory: configured path, else `<data dir>/manuals`.
    pub fn manuals_dir(&self, data_dir: &DataDir) -> PathBuf {
        self.manuals_dir
            .clone()
            .unwrap_or_else(|| data_dir.default_manuals_dir())
    }

    /// Resolve `dir` (from a `--manuals` flag) or fall back to the
    /// configured directory.
    pub fn resolve_manuals_dir(&self, data_dir: &DataDir, dir: Option<&Path>) -> PathBuf {
        dir.map(Path::to_path_buf)
            .unwrap_or_else(|| self.manuals_dir(data_dir))
    }
}
