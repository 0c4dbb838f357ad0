//! Causal language model loading
//!
//! The architecture is picked from the `model_type` of `config.json` and
//! the weights are memory-mapped from safetensors through candle. Each
//! architecture is wrapped behind [`CausalLM`] so the generation loop does
//! not care which one it drives.

use crate::hub::ModelArtifacts;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{llama, mistral, qwen2};
use serde_json::Value;
use textgen_common::config::{DeviceKind, ModelOptions, WeightDType};
use textgen_common::error::{Result, TextgenError};
use tracing::{info, warn};

/// A causal language model with its own KV cache
pub trait CausalLM: Send {
    /// Run `input` (shape `[1, seq_len]`) starting at position `pos`
    ///
    /// Returns the logits of the last position as a 1-D tensor.
    fn forward(&mut self, input: &Tensor, pos: usize) -> Result<Tensor>;

    /// Drop all cached state
    fn reset(&mut self) -> Result<()>;

    /// Device the model runs on
    fn device(&self) -> &Device;

    /// Longest sequence the model accepts, if known
    fn max_seq_len(&self) -> Option<usize> {
        None
    }
}

/// Supported model architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Llama,
    Mistral,
    Qwen2,
}

impl Architecture {
    /// Map a `config.json` `model_type`
    pub fn from_model_type(model_type: &str) -> Result<Self> {
        match model_type {
            "llama" => Ok(Architecture::Llama),
            "mistral" => Ok(Architecture::Mistral),
            "qwen2" => Ok(Architecture::Qwen2),
            other => Err(TextgenError::model(format!(
                "Unsupported model type: {}",
                other
            ))),
        }
    }
}

/// A loaded model with the metadata generation needs
pub struct LoadedModel {
    pub model: Box<dyn CausalLM>,
    pub architecture: Architecture,
    /// End-of-sequence ids named by `config.json`
    pub eos_token_ids: Vec<u32>,
}

pub(crate) fn candle_error(err: candle_core::Error) -> TextgenError {
    TextgenError::model(err.to_string())
}

/// Pick the execution device
pub fn device(kind: DeviceKind) -> Result<Device> {
    match kind {
        DeviceKind::Cpu => Ok(Device::Cpu),
        DeviceKind::Cuda => {
            if candle_core::utils::cuda_is_available() {
                Device::new_cuda(0).map_err(candle_error)
            } else {
                warn!("CUDA requested but not available, running on CPU");
                Ok(Device::Cpu)
            }
        }
    }
}

fn dtype(kind: WeightDType) -> DType {
    match kind {
        WeightDType::Float32 => DType::F32,
        WeightDType::Float16 => DType::F16,
        WeightDType::Bfloat16 => DType::BF16,
    }
}

/// Read the `eos_token_id` field, which is either an id or a list of ids
pub fn eos_token_ids(config: &Value) -> Vec<u32> {
    match config.get("eos_token_id") {
        Some(Value::Number(id)) => id.as_u64().map(|id| vec![id as u32]).unwrap_or_default(),
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(Value::as_u64)
            .map(|id| id as u32)
            .collect(),
        _ => Vec::new(),
    }
}

/// Load a model from resolved artifacts
pub fn load(artifacts: &ModelArtifacts, options: &ModelOptions) -> Result<LoadedModel> {
    let config: Value = serde_json::from_slice(&std::fs::read(&artifacts.config)?)?;
    let model_type = config
        .get("model_type")
        .and_then(Value::as_str)
        .ok_or_else(|| TextgenError::model("config.json has no model_type"))?;
    let architecture = Architecture::from_model_type(model_type)?;

    let device = device(options.device)?;
    let dtype = dtype(options.dtype);
    let max_seq_len = config
        .get("max_position_embeddings")
        .and_then(Value::as_u64)
        .map(|n| n as usize);

    info!(
        "Loading {:?} model from {} file(s) as {:?} on {:?}",
        architecture,
        artifacts.weights.len(),
        dtype,
        device
    );

    // Safety: the weight files are not modified while mapped.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&artifacts.weights, dtype, &device) }
        .map_err(candle_error)?;

    let model: Box<dyn CausalLM> = match architecture {
        Architecture::Llama => {
            let llama_config: llama::LlamaConfig = serde_json::from_value(config.clone())?;
            let llama_config = llama_config.into_config(false);
            let inner = llama::Llama::load(vb, &llama_config).map_err(candle_error)?;
            let cache = llama::Cache::new(options.use_kv_cache, dtype, &llama_config, &device)
                .map_err(candle_error)?;
            Box::new(LlamaModel {
                inner,
                config: llama_config,
                cache,
                dtype,
                device,
                use_kv_cache: options.use_kv_cache,
                max_seq_len,
            })
        }
        Architecture::Mistral => {
            let mistral_config: mistral::Config = serde_json::from_value(config.clone())?;
            let inner = mistral::Model::new(&mistral_config, vb).map_err(candle_error)?;
            Box::new(MistralModel {
                inner,
                device,
                max_seq_len,
            })
        }
        Architecture::Qwen2 => {
            let qwen_config: qwen2::Config = serde_json::from_value(config.clone())?;
            let inner = qwen2::ModelForCausalLM::new(&qwen_config, vb).map_err(candle_error)?;
            Box::new(Qwen2Model {
                inner,
                device,
                max_seq_len,
            })
        }
    };

    Ok(LoadedModel {
        model,
        architecture,
        eos_token_ids: eos_token_ids(&config),
    })
}

struct LlamaModel {
    inner: llama::Llama,
    config: llama::Config,
    cache: llama::Cache,
    dtype: DType,
    device: Device,
    use_kv_cache: bool,
    max_seq_len: Option<usize>,
}

impl CausalLM for LlamaModel {
    fn forward(&mut self, input: &Tensor, pos: usize) -> Result<Tensor> {
        self.inner
            .forward(input, pos, &mut self.cache)
            .and_then(|logits| logits.flatten_all())
            .map_err(candle_error)
    }

    fn reset(&mut self) -> Result<()> {
        self.cache = llama::Cache::new(self.use_kv_cache, self.dtype, &self.config, &self.device)
            .map_err(candle_error)?;
        Ok(())
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn max_seq_len(&self) -> Option<usize> {
        self.max_seq_len
    }
}

struct MistralModel {
    inner: mistral::Model,
    device: Device,
    max_seq_len: Option<usize>,
}

impl CausalLM for MistralModel {
    fn forward(&mut self, input: &Tensor, pos: usize) -> Result<Tensor> {
        self.inner
            .forward(input, pos)
            .and_then(|logits| logits.flatten_all())
            .map_err(candle_error)
    }

    fn reset(&mut self) -> Result<()> {
        self.inner.clear_kv_cache();
        Ok(())
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn max_seq_len(&self) -> Option<usize> {
        self.max_seq_len
    }
}

struct Qwen2Model {
    inner: qwen2::ModelForCausalLM,
    device: Device,
    max_seq_len: Option<usize>,
}

impl CausalLM for Qwen2Model {
    fn forward(&mut self, input: &Tensor, pos: usize) -> Result<Tensor> {
        self.inner
            .forward(input, pos)
            .and_then(|logits| logits.flatten_all())
            .map_err(candle_error)
    }

    fn reset(&mut self) -> Result<()> {
        self.inner.clear_kv_cache();
        Ok(())
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn max_seq_len(&self) -> Option<usize> {
        self.max_seq_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_architecture_from_model_type() {
        assert_eq!(Architecture::from_model_type("llama").unwrap(), Architecture::Llama);
        assert_eq!(Architecture::from_model_type("qwen2").unwrap(), Architecture::Qwen2);
        assert!(matches!(
            Architecture::from_model_type("gpt2"),
            Err(TextgenError::Model(_))
        ));
    }

    #[test]
    fn test_eos_token_ids() {
        assert_eq!(eos_token_ids(&json!({"eos_token_id": 2})), vec![2]);
        assert_eq!(
            eos_token_ids(&json!({"eos_token_id": [128001, 128009]})),
            vec![128001, 128009]
        );
        assert!(eos_token_ids(&json!({})).is_empty());
    }

    #[test]
    fn test_cpu_device() {
        assert!(device(DeviceKind::Cpu).unwrap().is_cpu());
    }

    #[test]
    fn test_load_rejects_unknown_model_type() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        std::fs::write(&config, r#"{"model_type": "gpt2"}"#).unwrap();

        let artifacts = ModelArtifacts {
            config,
            weights: vec![dir.path().join("model.safetensors")],
        };
        let options = ModelOptions {
            revision: "main".to_string(),
            dtype: WeightDType::Float32,
            device: DeviceKind::Cpu,
            use_kv_cache: true,
        };

        assert!(matches!(load(&artifacts, &options), Err(TextgenError::Model(_))));
    }
}
