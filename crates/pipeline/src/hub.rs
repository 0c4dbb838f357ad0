//! Model artifact resolution
//!
//! Identifiers naming an existing directory are read from disk; anything
//! else is treated as a Hugging Face Hub repository and fetched (or taken
//! from the local hub cache) at the configured revision.

use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use textgen_common::config::{ModelOptions, TokenizerOptions};
use textgen_common::error::{Result, TextgenError};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Files needed to build a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    /// Model configuration (`config.json`)
    pub config: PathBuf,

    /// Safetensors weight files, in shard order
    pub weights: Vec<PathBuf>,
}

/// Sharded safetensors index
#[derive(Debug, Deserialize)]
struct WeightsIndex {
    weight_map: BTreeMap<String, String>,
}

/// Where artifacts are read from
enum Source {
    Local(PathBuf),
    Hub(ApiRepo),
}

impl Source {
    fn open(name: &str, revision: &str) -> Result<Self> {
        let path = Path::new(name);
        if path.is_dir() {
            debug!("Reading artifacts from local directory {}", path.display());
            return Ok(Source::Local(path.to_path_buf()));
        }

        let api = Api::new()
            .map_err(|e| TextgenError::pipeline(format!("Failed to initialise hub client: {}", e)))?;
        debug!("Reading artifacts from hub repository {}@{}", name, revision);
        Ok(Source::Hub(api.repo(Repo::with_revision(
            name.to_string(),
            RepoType::Model,
            revision.to_string(),
        ))))
    }

    fn get(&self, file: &str) -> Result<PathBuf> {
        match self {
            Source::Local(dir) => {
                let path = dir.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(TextgenError::pipeline(format!(
                        "{} not found in {}",
                        file,
                        dir.display()
                    )))
                }
            }
            Source::Hub(repo) => repo
                .get(file)
                .map_err(|e| TextgenError::pipeline(format!("Failed to fetch {}: {}", file, e))),
        }
    }
}

/// Resolve the config and weight files of a model
pub fn resolve_model(name: &str, options: &ModelOptions) -> Result<ModelArtifacts> {
    let source = Source::open(name, &options.revision)?;
    let config = source.get(CONFIG_FILE)?;

    let weights = match source.get(WEIGHTS_FILE) {
        Ok(path) => vec![path],
        Err(single) => {
            let index_path = source.get(WEIGHTS_INDEX_FILE).map_err(|_| single)?;
            let index = std::fs::read_to_string(&index_path)?;
            shard_files(&index)?
                .iter()
                .map(|shard| source.get(shard))
                .collect::<Result<Vec<_>>>()?
        }
    };

    info!("Resolved model {}: {} weight file(s)", name, weights.len());
    Ok(ModelArtifacts { config, weights })
}

/// Resolve the `tokenizer.json` of a tokenizer
pub fn resolve_tokenizer(name: &str, options: &TokenizerOptions) -> Result<PathBuf> {
    Source::open(name, &options.revision)?.get(TOKENIZER_FILE)
}

/// List the shard files named by a safetensors index
pub fn shard_files(index: &str) -> Result<Vec<String>> {
    let index: WeightsIndex = serde_json::from_str(index)?;
    let shards: BTreeSet<String> = index.weight_map.into_values().collect();

    if shards.is_empty() {
        return Err(TextgenError::pipeline("Weights index lists no shards"));
    }
    Ok(shards.into_iter().collect())
}
