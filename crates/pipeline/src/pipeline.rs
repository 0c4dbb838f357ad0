//! Text-generation pipeline
//!
//! A pipeline is bootstrapped once from a [`PipelineSpec`] and then
//! serves any number of invocations. Each invocation tokenizes the query,
//! generates a continuation and decodes it.

use crate::generation::{generate, GenerationParams};
use crate::hub;
use crate::model::{self, CausalLM};
use crate::sampling::Sampler;
use crate::tokenizer::TextTokenizer;
use parking_lot::Mutex;
use std::time::Instant;
use textgen_common::config::{GenerationOptions, PipelineSpec};
use textgen_common::error::{Result, TextgenError};
use textgen_common::{LatencyTimer, METRICS};
use tracing::{debug, info};

/// Anything that turns a text query into a text reply
pub trait TextGenerator: Send + Sync {
    /// Generate a reply for `query`
    fn invoke(&self, query: &str) -> Result<String>;
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    /// Reply text
    pub text: String,

    /// Prompt tokens fed to the model
    pub prompt_tokens: usize,

    /// Tokens generated
    pub generated_tokens: usize,
}

/// Tokenize → generate → decode
pub struct Pipeline {
    tokenizer: TextTokenizer,
    model: Mutex<Box<dyn CausalLM>>,
    options: GenerationOptions,
    eos_token_ids: Vec<u32>,
    use_kv_cache: bool,
}

impl Pipeline {
    /// Build a pipeline from its definition
    ///
    /// Downloads (or reads) the tokenizer and model and loads the weights.
    pub fn from_spec(spec: &PipelineSpec) -> Result<Self> {
        spec.validate()?;

        let model_options = spec.model_options()?;
        let tokenizer_options = spec.tokenizer_options()?;
        let generation_options = spec.generation_options()?;

        info!(
            "Bootstrapping text-generation pipeline: model={}, tokenizer={}",
            spec.model.name, spec.tokenizer.name
        );

        let start = Instant::now();
        let tokenizer_path = hub::resolve_tokenizer(&spec.tokenizer.name, &tokenizer_options)?;
        let tokenizer = TextTokenizer::from_file(tokenizer_path, &tokenizer_options)?;

        let artifacts = hub::resolve_model(&spec.model.name, &model_options)?;
        let loaded = model::load(&artifacts, &model_options)?;

        info!(
            "Pipeline ready in {:.2}s ({:?})",
            start.elapsed().as_secs_f64(),
            loaded.architecture
        );

        let mut pipeline = Self::new(
            tokenizer,
            loaded.model,
            generation_options,
            &loaded.eos_token_ids,
        )?;
        pipeline.use_kv_cache = model_options.use_kv_cache;
        Ok(pipeline)
    }

    /// Assemble a pipeline from already loaded parts
    pub fn new(
        tokenizer: TextTokenizer,
        model: Box<dyn CausalLM>,
        options: GenerationOptions,
        configured_eos: &[u32],
    ) -> Result<Self> {
        options.validate()?;
        let eos_token_ids = tokenizer.eos_token_ids(configured_eos);
        if eos_token_ids.is_empty() {
            debug!("No end-of-sequence token known, generation runs to max_new_tokens");
        }

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            options,
            eos_token_ids,
            use_kv_cache: true,
        })
    }

    /// Generation options in effect
    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Run the pipeline on a query
    pub fn run(&self, query: &str) -> Result<PipelineOutput> {
        if query.trim().is_empty() {
            return Err(TextgenError::invalid_input("Query must not be empty"));
        }

        let prompt = self.tokenizer.encode(query)?;
        let params = GenerationParams {
            max_new_tokens: self.options.max_new_tokens,
            eos_token_ids: &self.eos_token_ids,
            use_kv_cache: self.use_kv_cache,
        };

        let start = Instant::now();
        // Per-request sampler: a configured seed yields the same reply every time.
        let mut sampler = Sampler::new(&self.options);
        let tokens = METRICS.generation.generation_duration.time(|| {
            let mut model = self.model.lock();
            generate(model.as_mut(), &mut sampler, &prompt, &params)
        })?;
        METRICS.record_generation(
            tokens.prompt.len(),
            tokens.generated.len(),
            start.elapsed().as_secs_f64(),
        );

        let continuation = self
            .tokenizer
            .continuation(&tokens.prompt, &tokens.generated)?;
        let text = if self.options.return_full_text {
            format!("{}{}", query, continuation)
        } else {
            continuation
        };

        Ok(PipelineOutput {
            text,
            prompt_tokens: tokens.prompt.len(),
            generated_tokens: tokens.generated.len(),
        })
    }
}

impl TextGenerator for Pipeline {
    fn invoke(&self, query: &str) -> Result<String> {
        self.run(query).map(|output| output.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{word_tokenizer, ScriptedModel, EOS};

    fn pipeline(script: Vec<u32>, options: GenerationOptions) -> Pipeline {
        Pipeline::new(word_tokenizer(), Box::new(ScriptedModel::new(script)), options, &[]).unwrap()
    }

    #[test]
    fn test_invoke_returns_full_text() {
        let pipeline = pipeline(vec![3, 4, EOS], GenerationOptions::default());
        let response = pipeline.invoke("hello world").unwrap();

        assert_eq!(response, "hello world foo bar");
        assert!(response.starts_with("hello world"));
    }

    #[test]
    fn test_invoke_continuation_only() {
        let options = GenerationOptions {
            return_full_text: false,
            ..Default::default()
        };
        let pipeline = pipeline(vec![3, EOS], options);

        assert_eq!(pipeline.invoke("hello").unwrap(), " foo");
    }

    #[test]
    fn test_run_reports_token_counts() {
        let options = GenerationOptions {
            max_new_tokens: 2,
            ..Default::default()
        };
        let pipeline = pipeline(vec![3, 4, 6], options);
        let output = pipeline.run("hello world baz").unwrap();

        assert_eq!(output.prompt_tokens, 3);
        assert_eq!(output.generated_tokens, 2);
        assert_eq!(output.text, "hello world baz foo bar");
    }

    #[test]
    fn test_seeded_sampling_repeats_across_requests() {
        let options = GenerationOptions {
            do_sample: true,
            temperature: Some(5.0),
            seed: Some(7),
            max_new_tokens: 1,
            ..Default::default()
        };
        let pipeline = pipeline(vec![2; 6], options);

        let replies: Vec<String> = (0..6).map(|_| pipeline.invoke("hello").unwrap()).collect();
        assert!(replies.iter().all(|reply| reply == &replies[0]));
    }

    #[test]
    fn test_empty_query_rejected() {
        let pipeline = pipeline(vec![3], GenerationOptions::default());

        assert!(matches!(
            pipeline.invoke("   "),
            Err(TextgenError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = GenerationOptions {
            max_new_tokens: 0,
            ..Default::default()
        };
        let result = Pipeline::new(word_tokenizer(), Box::new(ScriptedModel::new(vec![])), options, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_model_errors_propagate() {
        let pipeline = pipeline(vec![], GenerationOptions::default());
        assert!(matches!(
            pipeline.invoke("hello"),
            Err(TextgenError::Model(_))
        ));
    }
}
