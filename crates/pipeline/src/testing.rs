//! Test doubles shared by the pipeline tests

use crate::model::CausalLM;
use crate::tokenizer::TextTokenizer;
use candle_core::{Device, Tensor};
use textgen_common::error::{Result, TextgenError};

pub(crate) const VOCAB_SIZE: usize = 7;
pub(crate) const EOS: u32 = 5;

const WORD_TOKENIZER: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"[UNK]": 0, "hello": 1, "world": 2, "foo": 3, "bar": 4, "</s>": 5, "baz": 6},
    "unk_token": "[UNK]"
  }
}"#;

/// Whitespace word-level tokenizer over a seven word vocabulary
pub(crate) fn word_tokenizer() -> TextTokenizer {
    TextTokenizer::from_bytes(WORD_TOKENIZER, true).unwrap()
}

/// Model that emits a fixed token script, one token per forward pass
pub(crate) struct ScriptedModel {
    script: Vec<u32>,
    step: usize,
    device: Device,
    max_seq_len: Option<usize>,
    /// `(input length, position)` of every forward call
    pub(crate) calls: Vec<(usize, usize)>,
    pub(crate) resets: usize,
}

impl ScriptedModel {
    pub(crate) fn new(script: Vec<u32>) -> Self {
        Self {
            script,
            step: 0,
            device: Device::Cpu,
            max_seq_len: None,
            calls: Vec::new(),
            resets: 0,
        }
    }

    pub(crate) fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = Some(max_seq_len);
        self
    }
}

impl CausalLM for ScriptedModel {
    fn forward(&mut self, input: &Tensor, pos: usize) -> Result<Tensor> {
        let len = input
            .dims()
            .last()
            .copied()
            .ok_or_else(|| TextgenError::model("empty input"))?;
        self.calls.push((len, pos));

        let next = self
            .script
            .get(self.step)
            .copied()
            .ok_or_else(|| TextgenError::model("script exhausted"))?;
        self.step += 1;

        let mut logits = vec![0f32; VOCAB_SIZE];
        logits[next as usize] = 10.0;
        Tensor::new(logits, &self.device).map_err(|e| TextgenError::model(e.to_string()))
    }

    fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        Ok(())
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn max_seq_len(&self) -> Option<usize> {
        self.max_seq_len
    }
}
