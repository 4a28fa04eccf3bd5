//! Prompt Assembler binary entry point.
//!
//! Fills templates from the configured template directory and prints the
//! assembled prompt to stdout. All logs go to stderr.

// Enable the coverage attribute when running with nightly for llvm-cov exclusions
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use prompt_assembler::composer::CompositionStrategy;
use prompt_assembler::config::Config;
use prompt_assembler::error::AppError;
use prompt_assembler::loader::FileSystemLoader;
use prompt_assembler::manager::{PromptManager, PromptRequest, TemplateCall};
use prompt_assembler::params::ParameterSet;
use prompt_assembler::security::Escaper;

#[derive(Parser)]
#[command(
    name = "prompt-assembler",
    version,
    about = "Assemble LLM prompts from templates with injection defenses"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fill one or more templates and print the composed prompt
    Fill {
        /// Template paths, relative to PROMPT_TEMPLATE_DIR
        #[arg(required = true)]
        templates: Vec<String>,

        /// Parameter as key=value, shared by every template
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Context documents appended as titled sections
        #[arg(short, long)]
        context: Vec<String>,

        /// sequential, parallel or hierarchical
        #[arg(short, long, default_value = "sequential")]
        strategy: CompositionStrategy,

        /// Strip escape delimiters for human reading
        #[arg(short, long)]
        display: bool,
    },

    /// Score a piece of text and print the detection result as JSON
    Check {
        /// Text to analyze
        text: String,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn run(cli: Cli, config: Config) -> Result<String, AppError> {
    let loader = Arc::new(FileSystemLoader::new(&config.template_dir));
    let manager = PromptManager::new(config, loader);

    match cli.command {
        Command::Fill {
            templates,
            params,
            context,
            strategy,
            display,
        } => {
            let params: ParameterSet = params.into_iter().collect();
            let request = PromptRequest {
                templates: templates
                    .into_iter()
                    .map(|id| TemplateCall::new(id, params.clone()))
                    .collect(),
                context,
                strategy,
            };
            let prompt = manager.build_prompt(&request)?;
            Ok(if display {
                Escaper::strip_delimiters(&prompt)
            } else {
                prompt
            })
        }
        Command::Check { text } => {
            let detection = manager.analyze(&text);
            Ok(serde_json::to_string_pretty(&detection)?)
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
fn main() {
    let cli = Cli::parse();

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", AppError::from(e));
            std::process::exit(2);
        }
    };

    // Initialize logging to stderr only (stdout is for the prompt)
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            config
                .log_level
                .parse()
                .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::debug!(
        "Configuration loaded: template_dir={}, strict_mode={}, cache_max_size={}",
        config.template_dir,
        config.strict_mode,
        config.cache_max_size
    );

    match run(cli, config) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
