//! One-shot text generation from the command line.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use textgen_common::PipelineSpecFile;
use textgen_pipeline::{Pipeline, PromptTemplate};
use tracing::info;

/// Run a text-generation pipeline once and print the reply.
#[derive(Parser, Debug)]
#[command(name = "textgen-generate", about = "Run a text-generation pipeline once")]
struct Args {
    /// Query to send to the pipeline.
    prompt: String,

    /// Pipeline YAML file.
    #[arg(long, short, default_value = "configs/llm-pipeline.yaml")]
    config: PathBuf,

    /// Prompt template with a single placeholder, e.g. "Question: {question}\n\nAnswer: ".
    #[arg(long, short)]
    template: Option<String>,

    /// Override the pipeline's max_new_tokens.
    #[arg(long)]
    max_new_tokens: Option<usize>,
}

/// Place the prompt into the template's only placeholder
fn render(template: &str, prompt: &str) -> Result<String> {
    // Unescape the common sequences so templates can be passed on one line.
    let template = template.replace("\\n", "\n").replace("\\t", "\t");
    let template = PromptTemplate::from_template(&template)?;

    let variables = template.variables();
    let [name] = variables.as_slice() else {
        bail!(
            "Template must have exactly one placeholder, found {:?}",
            variables
        );
    };

    let values = HashMap::from([(name.to_string(), prompt.to_string())]);
    Ok(template.format(&values)?)
}

fn main() -> Result<()> {
    textgen_server::init_cli_tracing();
    let args = Args::parse();

    let mut spec = PipelineSpecFile::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(max_new_tokens) = args.max_new_tokens {
        spec.pipeline
            .kwargs
            .insert("max_new_tokens".to_string(), max_new_tokens.into());
    }

    let query = match &args.template {
        Some(template) => render(template, &args.prompt)?,
        None => args.prompt.clone(),
    };

    let pipeline = Pipeline::from_spec(&spec.pipeline)?;
    let output = pipeline.run(&query)?;
    info!(
        "Generated {} tokens from {} prompt tokens",
        output.generated_tokens, output.prompt_tokens
    );

    println!("{}", output.text);
    Ok(())
}
