//! Next-token selection

use crate::model::candle_error;
use candle_core::Tensor;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use rand::Rng;
use textgen_common::config::GenerationOptions;
use textgen_common::error::Result;

/// Temperature used when sampling is enabled without one
const DEFAULT_TEMPERATURE: f64 = 1.0;

/// Candle logits processor plus repetition penalty
pub struct Sampler {
    processor: LogitsProcessor,
    repetition_penalty: f32,
    repeat_last_n: usize,
}

impl Sampler {
    /// Build a sampler from generation options
    ///
    /// Decoding is greedy unless `do_sample` is set; a zero temperature
    /// also falls back to greedy.
    pub fn new(options: &GenerationOptions) -> Self {
        let sampling = Self::sampling(options);
        let seed = options.seed.unwrap_or_else(|| rand::thread_rng().gen());

        Self {
            processor: LogitsProcessor::from_sampling(seed, sampling),
            repetition_penalty: options.repetition_penalty,
            repeat_last_n: options.repeat_last_n,
        }
    }

    fn sampling(options: &GenerationOptions) -> Sampling {
        if !options.do_sample {
            return Sampling::ArgMax;
        }

        let temperature = options.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if temperature <= 0. {
            return Sampling::ArgMax;
        }

        match (options.top_k, options.top_p) {
            (None, None) => Sampling::All { temperature },
            (Some(k), None) => Sampling::TopK { k, temperature },
            (None, Some(p)) => Sampling::TopP { p, temperature },
            (Some(k), Some(p)) => Sampling::TopKThenTopP { k, p, temperature },
        }
    }

    /// Pick the next token from 1-D logits given the tokens so far
    pub fn sample(&mut self, logits: &Tensor, context: &[u32]) -> Result<u32> {
        let logits = logits
            .to_dtype(candle_core::DType::F32)
            .map_err(candle_error)?;

        let logits = if self.repetition_penalty == 1. || context.is_empty() {
            logits
        } else {
            let start_at = context.len().saturating_sub(self.repeat_last_n);
            candle_transformers::utils::apply_repeat_penalty(
                &logits,
                self.repetition_penalty,
                &context[start_at..],
            )
            .map_err(candle_error)?
        };

        self.processor.sample(&logits).map_err(candle_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn logits(values: &[f32]) -> Tensor {
        Tensor::new(values, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_greedy_by_default() {
        let options = GenerationOptions {
            temperature: Some(0.8),
            ..Default::default()
        };
        assert!(matches!(Sampler::sampling(&options), Sampling::ArgMax));

        let mut sampler = Sampler::new(&options);
        assert_eq!(sampler.sample(&logits(&[0.1, 3.0, 0.2]), &[]).unwrap(), 1);
    }

    #[test]
    fn test_sampling_modes() {
        let options = GenerationOptions {
            do_sample: true,
            temperature: Some(0.7),
            top_k: Some(40),
            top_p: Some(0.9),
            ..Default::default()
        };
        assert!(matches!(
            Sampler::sampling(&options),
            Sampling::TopKThenTopP { k: 40, .. }
        ));

        let options = GenerationOptions {
            do_sample: true,
            temperature: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(Sampler::sampling(&options), Sampling::ArgMax));

        let options = GenerationOptions {
            do_sample: true,
            ..Default::default()
        };
        assert!(matches!(Sampler::sampling(&options), Sampling::All { .. }));
    }

    #[test]
    fn test_repetition_penalty_changes_choice() {
        let options = GenerationOptions {
            repetition_penalty: 10.0,
            ..Default::default()
        };
        let mut sampler = Sampler::new(&options);

        // Token 1 wins on raw logits but was just generated.
        let next = sampler.sample(&logits(&[0.0, 3.0, 2.0]), &[1]).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let options = GenerationOptions {
            do_sample: true,
            temperature: Some(1.0),
            seed: Some(42),
            ..Default::default()
        };
        let values = [1.0, 1.1, 0.9, 1.05];

        let mut first = Sampler::new(&options);
        let mut second = Sampler::new(&options);
        for _ in 0..8 {
            assert_eq!(
                first.sample(&logits(&values), &[]).unwrap(),
                second.sample(&logits(&values), &[]).unwrap()
            );
        }
    }
}
