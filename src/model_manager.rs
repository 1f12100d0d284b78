use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use tracing::info;

use crate::error::{Error, Result};

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
pub fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Locate the given files for a model.
///
/// `model_id` is either a local directory holding the files or a
/// HuggingFace Hub repository, in which case the files are downloaded into
/// the hub cache on first use.
pub fn model_files(model_id: &str, files: &[&str]) -> Result<Vec<PathBuf>> {
    let local = Path::new(model_id);
    if local.is_dir() {
        return files
            .iter()
            .map(|name| {
                let path = local.join(name);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(Error::NotFound {
                        kind: "model file",
                        name: path.display().to_string(),
                    })
                }
            })
            .collect();
    }

    let api = hf_hub::api::sync::Api::new()
        .map_err(|e| Error::Model(format!("hub client for {model_id}: {e}")))?;
    let repo = api.model(model_id.to_string());
    files
        .iter()
        .map(|name| {
            repo.get(name).map_err(|e| {
                Error::Model(format!("fetching {name} for {model_id}: {e}"))
            })
        })
        .collect()
}

/// Manages the ColBERT model lifecycle, supporting lazy loading on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// The model is not loaded until the first call to `encode_documents`
    /// or `encode_query`.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            info!(model = %self.model_id, "loading ColBERT model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::Model("ColBERT model not loaded".to_string()))
    }

    /// Encodes passage texts into ColBERT token-level embeddings.
    ///
    /// Returns a 3D tensor of shape `[B, T, D]`.
    pub fn encode_documents(&mut self, texts: &[String]) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        Ok(model.encode(texts, false)?)
    }

    /// Encodes a query string into ColBERT token-level embeddings.
    ///
    /// Returns a 2D tensor of shape `[Q, D]` where Q is the number of query
    /// tokens and D is the embedding dimension.
    pub fn encode_query(&mut self, query: &str) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        let embeddings = model.encode(&[query.to_string()], true)?;
        // Squeeze the batch dimension: [1, Q, D] -> [Q, D]
        Ok(embeddings.squeeze(0)?)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.model_id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
