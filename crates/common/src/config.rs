//! Configuration structures for Textgen
//!
//! This module defines the pipeline definition loaded from YAML and the
//! service configuration read from the environment. Keyword-argument
//! mappings stay free-form in the YAML and are turned into typed options
//! on demand.

use crate::error::{Result, TextgenError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Free-form keyword arguments attached to a pipeline component
pub type Kwargs = BTreeMap<String, serde_json::Value>;

/// Application name reported by `/version` when `APP_NAME` is unset
pub const DEFAULT_APP_NAME: &str = "self contained CPU model";

/// Top-level pipeline document
///
/// The YAML file carries exactly one key, `pipeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSpecFile {
    /// The pipeline definition
    pub pipeline: PipelineSpec,
}

/// Pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSpec {
    /// Task type
    #[serde(rename = "pipeline-type")]
    pub pipeline_type: PipelineType,

    /// Model reference
    pub model: ComponentSpec,

    /// Tokenizer reference
    pub tokenizer: ComponentSpec,

    /// Generation keyword arguments
    #[serde(default)]
    pub kwargs: Kwargs,
}

/// Supported pipeline task types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineType {
    /// Causal language model text generation
    TextGeneration,
}

/// A model or tokenizer reference
///
/// Accepts either a bare identifier or a `{name, kwargs}` mapping and
/// always serializes to the mapping form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ComponentRepr")]
pub struct ComponentSpec {
    /// Hub repository id or local directory
    pub name: String,

    /// Component keyword arguments
    #[serde(default)]
    pub kwargs: Kwargs,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ComponentRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        kwargs: Kwargs,
    },
}

impl From<ComponentRepr> for ComponentSpec {
    fn from(repr: ComponentRepr) -> Self {
        match repr {
            ComponentRepr::Name(name) => ComponentSpec {
                name,
                kwargs: Kwargs::new(),
            },
            ComponentRepr::Full { name, kwargs } => ComponentSpec { name, kwargs },
        }
    }
}

impl ComponentSpec {
    /// Create a reference without keyword arguments
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kwargs: Kwargs::new(),
        }
    }
}

/// Model weight precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightDType {
    /// 32-bit floats
    Float32,

    /// 16-bit floats
    Float16,

    /// Brain floating point
    Bfloat16,
}

impl Default for WeightDType {
    fn default() -> Self {
        WeightDType::Float32
    }
}

/// Execution device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Host CPU
    Cpu,

    /// First CUDA device
    Cuda,
}

impl Default for DeviceKind {
    fn default() -> Self {
        DeviceKind::Cpu
    }
}

/// Typed view of `model.kwargs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Hub revision
    #[serde(default = "default_revision")]
    pub revision: String,

    /// Weight precision
    #[serde(default)]
    pub dtype: WeightDType,

    /// Execution device
    #[serde(default)]
    pub device: DeviceKind,

    /// Keep a KV cache during generation
    #[serde(default = "default_true")]
    pub use_kv_cache: bool,
}

impl ModelOptions {
    const KEYS: &'static [&'static str] = &["revision", "dtype", "device", "use_kv_cache"];
}

/// Typed view of `tokenizer.kwargs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerOptions {
    /// Hub revision
    #[serde(default = "default_revision")]
    pub revision: String,

    /// Let the tokenizer add BOS/EOS markers while encoding
    #[serde(default = "default_true")]
    pub add_special_tokens: bool,
}

impl TokenizerOptions {
    const KEYS: &'static [&'static str] = &["revision", "add_special_tokens"];
}

/// Typed view of the top-level generation `kwargs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Upper bound on generated tokens
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,

    /// Sample instead of greedy decoding
    #[serde(default)]
    pub do_sample: bool,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,

    /// Nucleus sampling threshold
    #[serde(default)]
    pub top_p: Option<f64>,

    /// Top-k sampling cutoff
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Penalty applied to recently generated tokens (1.0 = none)
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,

    /// Window the repetition penalty looks back over
    #[serde(default = "default_repeat_last_n")]
    pub repeat_last_n: usize,

    /// Sampling seed
    #[serde(default)]
    pub seed: Option<u64>,

    /// Prefix the reply with the query
    #[serde(default = "default_true")]
    pub return_full_text: bool,
}

impl GenerationOptions {
    const KEYS: &'static [&'static str] = &[
        "max_new_tokens",
        "do_sample",
        "temperature",
        "top_p",
        "top_k",
        "repetition_penalty",
        "repeat_last_n",
        "seed",
        "return_full_text",
    ];

    /// Validate generation options
    pub fn validate(&self) -> Result<()> {
        if self.max_new_tokens == 0 {
            return Err(TextgenError::config("max_new_tokens must be greater than 0"));
        }
        if self.repetition_penalty <= 0.0 {
            return Err(TextgenError::config("repetition_penalty must be positive"));
        }
        if let Some(temperature) = self.temperature {
            if temperature < 0.0 {
                return Err(TextgenError::config("temperature must not be negative"));
            }
        }
        if self.top_k == Some(0) {
            return Err(TextgenError::config("top_k must be greater than 0"));
        }
        if let Some(top_p) = self.top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                return Err(TextgenError::config("top_p must be in (0, 1]"));
            }
        }
        Ok(())
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            do_sample: false,
            temperature: None,
            top_p: None,
            top_k: None,
            repetition_penalty: default_repetition_penalty(),
            repeat_last_n: default_repeat_last_n(),
            seed: None,
            return_full_text: true,
        }
    }
}

/// Service configuration read from the environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Name reported by `/version`
    pub app_name: String,

    /// Optional prefix the routes are also mounted under
    pub root_path: Option<String>,

    /// Server binding address
    pub bind_address: String,

    /// Server port
    pub port: u16,

    /// Path of the pipeline YAML file
    pub pipeline_config: PathBuf,

    /// Maximum invocations waiting or running
    pub max_pending: usize,

    /// How long an invocation may wait for the model
    pub queue_timeout_ms: u64,
}

/// Default value functions
fn default_revision() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_new_tokens() -> usize {
    64
}

fn default_repetition_penalty() -> f32 {
    1.0
}

fn default_repeat_last_n() -> usize {
    64
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_pipeline_config() -> PathBuf {
    PathBuf::from("configs/llm-pipeline.yaml")
}

fn default_max_pending() -> usize {
    16
}

fn default_queue_timeout_ms() -> u64 {
    30_000
}

/// Deserialize the known keys of a kwargs mapping into `T`
fn typed_kwargs<T: DeserializeOwned>(section: &str, kwargs: &Kwargs, known: &[&str]) -> Result<T> {
    let mut object = serde_json::Map::new();
    for (key, value) in kwargs {
        if known.contains(&key.as_str()) {
            object.insert(key.clone(), value.clone());
        } else {
            warn!("Ignoring unsupported {} kwarg: {}", section, key);
        }
    }

    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| TextgenError::config(format!("Invalid {} kwargs: {}", section, e)))
}

impl PipelineSpecFile {
    /// Load a pipeline definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TextgenError::config(format!("Failed to read pipeline file {}: {}", path.display(), e))
        })?;

        Self::from_yaml_str(&content).map_err(|e| {
            TextgenError::config(format!("Failed to load pipeline file {}: {}", path.display(), e))
        })
    }

    /// Parse and validate a pipeline definition
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let spec: PipelineSpecFile = serde_yaml::from_str(content)
            .map_err(|e| TextgenError::config(format!("Failed to parse pipeline spec: {}", e)))?;

        spec.pipeline.validate()?;
        Ok(spec)
    }
}

impl PipelineSpec {
    /// Validate the definition, including its typed kwargs views
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(TextgenError::config("Model name must not be empty"));
        }
        if self.tokenizer.name.trim().is_empty() {
            return Err(TextgenError::config("Tokenizer name must not be empty"));
        }

        self.model_options()?;
        self.tokenizer_options()?;
        self.generation_options()?.validate()
    }

    /// Typed model options
    pub fn model_options(&self) -> Result<ModelOptions> {
        typed_kwargs("model", &self.model.kwargs, ModelOptions::KEYS)
    }

    /// Typed tokenizer options
    pub fn tokenizer_options(&self) -> Result<TokenizerOptions> {
        typed_kwargs("tokenizer", &self.tokenizer.kwargs, TokenizerOptions::KEYS)
    }

    /// Typed generation options
    pub fn generation_options(&self) -> Result<GenerationOptions> {
        typed_kwargs("generation", &self.kwargs, GenerationOptions::KEYS)
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("TEXTGEN_PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| TextgenError::config(format!("Invalid port number: {}", port)))?,
            None => default_port(),
        };

        let max_pending = match lookup("TEXTGEN_MAX_PENDING") {
            Some(value) => value.parse().map_err(|_| {
                TextgenError::config(format!("Invalid TEXTGEN_MAX_PENDING: {}", value))
            })?,
            None => default_max_pending(),
        };

        let queue_timeout_ms = match lookup("TEXTGEN_QUEUE_TIMEOUT_MS") {
            Some(value) => value.parse().map_err(|_| {
                TextgenError::config(format!("Invalid TEXTGEN_QUEUE_TIMEOUT_MS: {}", value))
            })?,
            None => default_queue_timeout_ms(),
        };

        let config = ServiceConfig {
            app_name: lookup("APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
            root_path: lookup("ROOT_PATH").filter(|p| !p.is_empty()),
            bind_address: lookup("TEXTGEN_BIND_ADDRESS").unwrap_or_else(default_bind_address),
            port,
            pipeline_config: lookup("TEXTGEN_PIPELINE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(default_pipeline_config),
            max_pending,
            queue_timeout_ms,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_pending == 0 {
            return Err(TextgenError::config("TEXTGEN_MAX_PENDING must be greater than 0"));
        }

        if let Some(root_path) = &self.root_path {
            if !root_path.starts_with('/')
                || root_path == "/"
                || root_path.contains(['*', '{', '}'])
            {
                return Err(TextgenError::config(format!(
                    "ROOT_PATH must start with '/' and name a literal prefix: {}",
                    root_path
                )));
            }
        }

        Ok(())
    }

    /// Socket address to bind
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.bind_address, self.port).parse()?)
    }

    /// Get queue timeout as Duration
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}
