use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "MANUALRAG_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The MANUALRAG_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/manualrag/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("manualrag")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// On-disk vector index. Safe to delete to force a full re-ingestion.
    pub fn index_db(&self) -> PathBuf {
        self.root.join("index.redb")
    }

    pub fn embedding_cache(&self) -> PathBuf {
        self.root.join("embedding_cache.redb")
    }

    /// Default location of the manuals when `manuals_dir` is not configured.
    pub fn default_manuals_dir(&self) -> PathBuf {
        self.root.join("manuals")
    }
}
