//! manualrag - retrieval-augmented grounding over enterprise manuals.
//!
//! manualrag ingests a directory of PDF, text and markdown manuals, splits
//! them into section-aware chunks, tags each chunk with business domains and
//! stores dense embeddings in a local [redb](https://github.com/cberner/redb)
//! vector index. At query time it classifies the question, searches the
//! matching domains, re-ranks the candidates and returns cited passages
//! ready to be placed in front of an answer model.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use manualrag::{Config, ConfigDb, DataDir, Retriever, VectorIndex};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! let config = Config::load(&config_db, &[]).unwrap();
//! let index = Arc::new(VectorIndex::open(&data_dir.index_db()).unwrap());
//!
//! let mut retriever = Retriever::new(
//!     index,
//!     config.embedding.build(),
//!     Some(config.reranker.build()),
//!     config.classifier(),
//!     config.retrieval,
//! )
//! .unwrap();
//!
//! let context = retriever.retrieve("How do I resubmit a denied claim?").unwrap();
//! for passage in &context.passages {
//!     println!("{} p.{:?}: {}", passage.relative_path, passage.page, passage.text);
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod domain;
pub mod embedding;
pub mod embedding_cache;
pub mod error;
pub mod extract;
pub mod grounding;
pub mod incremental;
pub mod ingestion;
pub mod mcp;
pub mod model_manager;
pub mod reranker;
pub mod retrieval;
pub mod vector_index;
pub mod walker;

pub use config::Config;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use embedding_cache::EmbeddingCache;
pub use error::{Error, Result};
pub use model_manager::ModelManager;
pub use retrieval::Retriever;
pub use vector_index::VectorIndex;
