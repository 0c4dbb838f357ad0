//! Autoregressive token generation
//!
//! The first step feeds the whole prompt, every later step feeds only the
//! token sampled last and relies on the model's KV cache. Without a cache
//! the model is reset and fed the full context at each step.

use crate::model::{candle_error, CausalLM};
use crate::sampling::Sampler;
use candle_core::Tensor;
use textgen_common::error::{Result, TextgenError};
use tracing::{debug, trace};

/// Generation limits for one request
#[derive(Debug, Clone)]
pub struct GenerationParams<'a> {
    /// Upper bound on generated tokens
    pub max_new_tokens: usize,

    /// Tokens that end the sequence
    pub eos_token_ids: &'a [u32],

    /// Reuse the model's KV cache between steps
    pub use_kv_cache: bool,
}

/// Tokens produced for one prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedTokens {
    /// Prompt tokens actually fed to the model
    pub prompt: Vec<u32>,

    /// Generated tokens, without the end-of-sequence marker
    pub generated: Vec<u32>,

    /// Whether generation stopped on an end-of-sequence token
    pub stopped_on_eos: bool,
}

/// Keep the tail of the prompt that leaves room for the generated tokens
pub fn fit_prompt(prompt: &[u32], max_new_tokens: usize, max_seq_len: Option<usize>) -> Vec<u32> {
    match max_seq_len {
        Some(max_seq_len) if prompt.len() + max_new_tokens > max_seq_len => {
            let keep = max_seq_len.saturating_sub(max_new_tokens).max(1);
            debug!(
                "Prompt of {} tokens truncated to its last {} tokens",
                prompt.len(),
                keep
            );
            prompt[prompt.len().saturating_sub(keep)..].to_vec()
        }
        _ => prompt.to_vec(),
    }
}

/// Tokens that may follow a prompt of `prompt_len` within the context window
pub fn new_token_budget(prompt_len: usize, max_new_tokens: usize, max_seq_len: Option<usize>) -> usize {
    match max_seq_len {
        Some(max_seq_len) => max_new_tokens.min(max_seq_len.saturating_sub(prompt_len)),
        None => max_new_tokens,
    }
}

/// Generate tokens following `prompt`
pub fn generate(
    model: &mut dyn CausalLM,
    sampler: &mut Sampler,
    prompt: &[u32],
    params: &GenerationParams<'_>,
) -> Result<GeneratedTokens> {
    if prompt.is_empty() {
        return Err(TextgenError::invalid_input("Prompt encodes to no tokens"));
    }

    let max_seq_len = model.max_seq_len();
    let prompt = fit_prompt(prompt, params.max_new_tokens, max_seq_len);
    let budget = new_token_budget(prompt.len(), params.max_new_tokens, max_seq_len);
    if budget < params.max_new_tokens {
        debug!("Context window limits generation to {} tokens", budget);
    }
    let mut tokens = prompt.clone();
    let mut generated = Vec::with_capacity(budget);
    let mut stopped_on_eos = false;

    model.reset()?;

    for index in 0..budget {
        let start_pos = if params.use_kv_cache && index > 0 {
            tokens.len() - 1
        } else {
            if index > 0 {
                model.reset()?;
            }
            0
        };

        let input = Tensor::new(&tokens[start_pos..], model.device())
            .and_then(|t| t.unsqueeze(0))
            .map_err(candle_error)?;
        let logits = model.forward(&input, start_pos)?;
        let next = sampler.sample(&logits, &tokens)?;
        trace!("Step {}: sampled token {}", index, next);

        if params.eos_token_ids.contains(&next) {
            stopped_on_eos = true;
            break;
        }

        tokens.push(next);
        generated.push(next);
    }

    debug!(
        "Generated {} tokens from a {} token prompt (eos: {})",
        generated.len(),
        prompt.len(),
        stopped_on_eos
    );

    Ok(GeneratedTokens {
        prompt,
        generated,
        stopped_on_eos,
    })
}
