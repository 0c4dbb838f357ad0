//! Textgen Pipeline
//!
//! Self-contained text-generation pipeline on top of candle. Loads a causal
//! language model and its tokenizer from the Hugging Face hub (or a local
//! directory) and turns queries into generated text.

pub mod generation;
pub mod hub;
pub mod model;
pub mod pipeline;
pub mod prompt;
pub mod sampling;
pub mod scheduler;
pub mod tokenizer;

#[cfg(test)]
mod testing;

pub use model::{Architecture, CausalLM};
pub use pipeline::{Pipeline, PipelineOutput, TextGenerator};
pub use prompt::PromptTemplate;
pub use scheduler::{InvokeScheduler, SchedulerConfig};
pub use tokenizer::TextTokenizer;
