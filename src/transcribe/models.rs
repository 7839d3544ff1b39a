use anyhow::Context;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::Result;

/// A whisper model resolved on disk.
///
/// Holding `lock` gives exclusive use of the model; whisper.cpp runs are
/// memory-heavy and the pipeline treats the model as non-reentrant.
#[derive(Debug)]
pub struct LoadedModel {
    pub id: String,
    pub path: PathBuf,
    pub lock: tokio::sync::Mutex<()>,
}

/// Process-wide cache of resolved models, keyed by model id.
///
/// Entries are created on first use and never evicted.
#[derive(Debug, Default)]
pub struct ModelCache {
    models: Mutex<HashMap<String, Arc<LoadedModel>>>,
}

static SHARED: OnceLock<Arc<ModelCache>> = OnceLock::new();

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every transcriber in this process
    pub fn shared() -> Arc<ModelCache> {
        SHARED.get_or_init(|| Arc::new(ModelCache::new())).clone()
    }

    /// File name whisper.cpp uses for a model id
    pub fn model_file_name(model_id: &str) -> String {
        format!("ggml-{}.bin", model_id)
    }

    /// Resolve `model_id` under `models_dir`, loading it into the cache on first use
    pub fn get_or_load(&self, models_dir: &Path, model_id: &str) -> Result<Arc<LoadedModel>> {
        if model_id.is_empty()
            || model_id.contains(['/', '\\'])
            || model_id.contains("..")
        {
            anyhow::bail!("Invalid whisper model name: {:?}", model_id);
        }

        let mut models = self
            .models
            .lock()
            .map_err(|_| anyhow::anyhow!("Model cache lock poisoned"))?;

        if let Some(model) = models.get(model_id) {
            return Ok(Arc::clone(model));
        }

        let path = models_dir.join(Self::model_file_name(model_id));
        tracing::info!(
            "Loading whisper model '{}' from {} (first use)",
            model_id,
            path.display()
        );
        let metadata = fs_err::metadata(&path).with_context(|| {
            format!(
                "Whisper model '{}' not found; expected {}",
                model_id,
                path.display()
            )
        })?;
        if !metadata.is_file() || metadata.len() == 0 {
            anyhow::bail!("Whisper model file is empty or not a file: {}", path.display());
        }

        let model = Arc::new(LoadedModel {
            id: model_id.to_string(),
            path,
            lock: tokio::sync::Mutex::new(()),
        });
        models.insert(model_id.to_string(), Arc::clone(&model));

        Ok(model)
    }

    /// Number of models resolved so far
    pub fn len(&self) -> usize {
        self.models.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
