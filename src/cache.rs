//! Cached draw sets keyed by fit signature.
//!
//! A [`FitSignature`] is a SHA-256 digest over the design data, formula,
//! prior hyperparameters and every sampling setting that changes the draws
//! or whether they are accepted (chain layout, seed, adaptation targets,
//! divergence tolerance). Parallelism and time budget are
//! excluded because they do not change the result.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::draws::PosteriorDrawSet;
use crate::error::CacheError;
use crate::formula::{ModelFormula, SurvivalDesign};
use crate::priors::{PriorConfiguration, PriorSpec};
use crate::sampler::SamplingParams;

/// Hex digest identifying one (data, formula, priors, seed) fit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FitSignature(String);

#[derive(Serialize)]
struct SignatureInput<'a> {
    data: String,
    formula: &'a ModelFormula,
    coefficient: &'a PriorSpec,
    shape: &'a PriorSpec,
    intercept: &'a PriorSpec,
    chains: usize,
    warmup: usize,
    iterations: usize,
    seed: u64,
    target_accept: f64,
    max_leapfrog_steps: usize,
    max_divergence_fraction: f64,
}

impl FitSignature {
    pub fn compute(
        design: &SurvivalDesign,
        formula: &ModelFormula,
        priors: &PriorConfiguration,
        params: &SamplingParams,
    ) -> Result<Self, CacheError> {
        let input = SignatureInput {
            data: data_digest(design),
            formula,
            coefficient: &priors.coefficient,
            shape: &priors.shape,
            intercept: &priors.intercept,
            chains: params.chains,
            warmup: params.warmup,
            iterations: params.iterations,
            seed: params.seed,
            target_accept: params.target_accept,
            max_leapfrog_steps: params.max_leapfrog_steps,
            max_divergence_fraction: params.max_divergence_fraction,
        };
        let bytes = serde_json::to_vec(&input).map_err(|e| CacheError::Signature(e.to_string()))?;
        Ok(Self(hex::encode(Sha256::digest(&bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Digest of the numeric content of a design.
pub fn data_digest(design: &SurvivalDesign) -> String {
    let mut hasher = Sha256::new();
    for name in &design.coefficient_names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    for v in design.time.iter().chain(design.event.iter()).chain(design.x.iter()) {
        hasher.update(v.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Storage for fitted draw sets.
pub trait ArtifactStore: Send + Sync {
    /// Returns the cached draw set for `key`, if present.
    fn load(&self, key: &FitSignature) -> Result<Option<PosteriorDrawSet>, CacheError>;
    /// Stores a freshly fitted draw set.
    fn store(&self, key: &FitSignature, draws: &PosteriorDrawSet) -> Result<(), CacheError>;
}

/// Store that never caches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ArtifactStore for NoCache {
    fn load(&self, _key: &FitSignature) -> Result<Option<PosteriorDrawSet>, CacheError> {
        Ok(None)
    }

    fn store(&self, _key: &FitSignature, _draws: &PosteriorDrawSet) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<FitSignature, PosteriorDrawSet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryStore {
    fn load(&self, key: &FitSignature) -> Result<Option<PosteriorDrawSet>, CacheError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Signature("memory store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &FitSignature, draws: &PosteriorDrawSet) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Signature("memory store lock poisoned".into()))?;
        entries.insert(key.clone(), draws.clone());
        Ok(())
    }
}

/// JSON files under a directory, one per signature.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &FitSignature) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }
}

impl ArtifactStore for FileArtifactStore {
    fn load(&self, key: &FitSignature) -> Result<Option<PosteriorDrawSet>, CacheError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        match serde_json::from_str(&text) {
            Ok(draws) => {
                debug!("loaded cached draws from {}", path.display());
                Ok(Some(draws))
            }
            Err(e) => {
                warn!("ignoring unreadable cache entry {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    fn store(&self, key: &FitSignature, draws: &PosteriorDrawSet) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string(draws)?;
        fs::write(&tmp, text).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("stored draws at {}", path.display());
        Ok(())
    }
}
