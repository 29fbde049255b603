//! huginn: command line front end.
//!
//! Scores correlation candidates and runs cached, rate-limited generations
//! against the configured provider.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use huginn::cache::kinds::FreeformQuestion;
use huginn::{
    Candidate, FileStore, GenerationOptions, GovernorConfig, InsightGovernor, KvStore,
    MetricTable, NoSeries, Secrets,
};

/// Huginn CLI
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version)]
#[command(about = "Rate-limited, cached AI insights for a health dashboard")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pick the hero insight from a JSON list of candidates
    Score {
        /// Candidates file (JSON array)
        candidates: PathBuf,
        /// Daily metric values (JSON object of metric -> [value|null])
        #[arg(short, long)]
        series: Option<PathBuf>,
        /// Print every candidate in rank order
        #[arg(long)]
        all: bool,
    },

    /// Ask a free-form question through a context's limiter and cache
    Ask {
        /// Rate-limited context to use
        #[arg(long, default_value = "dashboard")]
        context: String,
        /// Question (or omit to read from stdin)
        prompt: Option<String>,
        /// Model override
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show the effective configuration for a context
    Limits {
        /// Context name
        #[arg(default_value = "dashboard")]
        context: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = GovernorConfig::load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Score {
            candidates,
            series,
            all,
        } => {
            let candidates: Vec<Candidate> =
                serde_json::from_str(&std::fs::read_to_string(&candidates)?)?;
            let ranked = match series {
                Some(path) => {
                    let table: MetricTable =
                        serde_json::from_str(&std::fs::read_to_string(&path)?)?;
                    huginn::scorer::rank(&candidates, &table)
                }
                None => huginn::scorer::rank(&candidates, &NoSeries),
            };

            if all {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else if let Some(best) = ranked.first() {
                println!("{}", serde_json::to_string_pretty(best)?);
            } else {
                println!("no candidates");
            }
        }

        Command::Ask {
            context,
            prompt,
            model,
        } => {
            let prompt = resolve_text(prompt, "ask")?;
            let governor = build_governor(&config, &context).await?;

            let mut options = GenerationOptions::new();
            if let Some(model) = model {
                options = options.model(model);
            }
            let request = FreeformQuestion {
                question: prompt.clone(),
                date: None,
            };
            let generation = governor
                .explain(&context, &request, &prompt, &options)
                .await?;

            info!(context = %context, source = ?generation.source, success = generation.success, "ask finished");
            println!("{}", generation.text);
            if let Some(error) = generation.error {
                eprintln!("warning: served fallback text ({error})");
            }
        }

        Command::Limits { context } => {
            let limits = config.limits_for(&context).to_limiter_config();
            println!("context: {context}");
            println!("max_requests: {}", limits.max_requests);
            println!("window: {:?}", limits.window);
            println!("min_spacing: {:?}", limits.effective_min_spacing());
            println!("provider: {} ({})", config.provider.name, config.provider.default_model);
        }
    }

    Ok(())
}

/// Build a governor backed by the on-disk cache.
async fn build_governor(
    config: &GovernorConfig,
    context: &str,
) -> Result<InsightGovernor, huginn::HuginnError> {
    let secrets = Secrets::load()?;
    let mut contexts = config.context_names();
    if !contexts.contains(&context) {
        contexts.push(context);
    }

    let cache_path = config.cache_path()?;
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut store = FileStore::open(cache_path.clone()).await?;
    if let Some(bytes) = config.cache.capacity_bytes {
        store = store.with_capacity(bytes);
    }

    InsightGovernor::builder()
        .dispatcher_config(config.dispatcher_config())
        .cache_config(config.cache_config())
        .credentials(secrets.credentials(&contexts))
        .client_factory(Arc::new(config.client_factory()?))
        .store(Arc::new(store) as Arc<dyn KvStore>)
        .build()
        .await
}

/// Resolve input text from argument and/or stdin.
///
/// If both are present, they are concatenated (argument first, then stdin).
fn resolve_text(arg: Option<String>, command: &str) -> Result<String, Box<dyn std::error::Error>> {
    let stdin_is_pipe = !io::stdin().is_terminal();
    let stdin_text = if stdin_is_pipe {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        let trimmed = buf.trim().to_string();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    } else {
        None
    };

    match (arg, stdin_text) {
        (Some(a), Some(s)) => Ok(format!("{a}\n\n{s}")),
        (Some(a), None) => Ok(a),
        (None, Some(s)) => Ok(s),
        (None, None) => {
            Err(format!("{command}: no input provided (pass text as argument or via stdin)").into())
        }
    }
}
