//! llm-observer CLI - Analyze prompts and replay recorded provider calls

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use llm_observer::{
    adapters::context_from_payloads,
    cache::{canonicalize_prompt, detect_cache_breakers},
    config::ObserverConfig,
    event::validate_event,
    metrics::UsageSession,
    pricing::PricingCatalog,
    privacy::scrub,
    EventContext, Observer,
};
use serde::Deserialize;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "llm-observer")]
#[command(about = "Report usage, cost and prompt-cache efficiency of LLM provider calls")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config file (default: ~/.config/llm-observer/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the event for a prompt and print it as JSON
    Analyze {
        /// Prompt text, or a file path when --file is set
        input: String,

        /// Treat INPUT as a file path
        #[arg(short, long)]
        file: bool,

        #[arg(short, long, default_value = "gpt-4o-mini")]
        model: String,

        #[arg(short, long, default_value = "openai")]
        provider: String,

        #[arg(long, default_value = "0")]
        prompt_tokens: u64,

        #[arg(long, default_value = "0")]
        completion_tokens: u64,

        /// Analyze the prompt this many times, printing the last event
        #[arg(long, default_value = "1")]
        repeat: usize,
    },

    /// Replay recorded calls (JSON lines) through the observer
    Replay {
        /// File with one `{provider, request, response, latency_ms}` object per line
        input: PathBuf,

        #[arg(long, value_enum, default_value = "table")]
        format: ReportFormat,

        /// Also write the JSON report to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds to wait for queued telemetry on exit
        #[arg(long, default_value = "5")]
        shutdown_timeout: f64,
    },

    /// Print the canonical form and cache breakers of a prompt
    Canonicalize {
        /// Prompt text
        input: String,
    },

    /// Validate a serialized event against the v1 schema
    Validate {
        /// JSON file containing one event
        input: PathBuf,
    },

    /// List models in the pricing catalog
    Pricing {
        /// Catalog file (default: bundled catalog)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show effective configuration (file + environment)
    Show,

    /// Show configuration file path
    Path,
}

/// One line of a replay file
#[derive(Deserialize)]
struct RecordedCall {
    provider: String,
    request: Value,
    #[serde(default)]
    response: Value,
    #[serde(default)]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(ObserverConfig::default_path);

    match cli.command {
        Commands::Analyze {
            input,
            file,
            model,
            provider,
            prompt_tokens,
            completion_tokens,
            repeat,
        } => {
            let prompt = if file {
                std::fs::read_to_string(&input)
                    .with_context(|| format!("Failed to read prompt file {input}"))?
            } else {
                input
            };
            let context = EventContext::new(provider, model, prompt)
                .with_tokens(prompt_tokens, completion_tokens);
            run_analyze(&config_path, context, repeat)?;
        }
        Commands::Replay {
            input,
            format,
            output,
            shutdown_timeout,
        } => {
            run_replay(&config_path, &input, format, output, shutdown_timeout).await?;
        }
        Commands::Canonicalize { input } => {
            run_canonicalize(&input);
        }
        Commands::Validate { input } => {
            run_validate(&input)?;
        }
        Commands::Pricing { path } => {
            show_pricing(path.as_deref())?;
        }
        Commands::Config(cmd) => {
            run_config_command(&config_path, cmd)?;
        }
    }

    Ok(())
}

fn run_analyze(config_path: &Path, context: EventContext, repeat: usize) -> Result<()> {
    // Analysis is local; never send telemetry from here
    let mut config = ObserverConfig::load_from(config_path)?;
    config.enabled = false;
    let observer = Observer::new(config);

    let mut last = None;
    for _ in 0..repeat.max(1) {
        last = observer.record(&context);
    }

    let event = last.context("Event construction failed")?;
    println!("{}", serde_json::to_string_pretty(&event)?);
    Ok(())
}

async fn run_replay(
    config_path: &Path,
    input: &Path,
    format: ReportFormat,
    output: Option<PathBuf>,
    shutdown_timeout: f64,
) -> Result<()> {
    let config = ObserverConfig::load_from(config_path)?;
    info!(
        telemetry = !config.local_only(),
        endpoint = %scrub(config.endpoint.as_deref()),
        "Replaying recorded calls"
    );

    let observer = Observer::new(config);
    let session = UsageSession::start(observer.listeners());

    let file = std::fs::File::open(input)
        .with_context(|| format!("Failed to open {}", input.display()))?;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let call: RecordedCall = match serde_json::from_str(&line) {
            Ok(call) => call,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed record");
                continue;
            }
        };

        let context =
            context_from_payloads(&call.provider, &call.request, &call.response, call.latency_ms);
        observer.record(&context);
    }

    observer
        .shutdown(Duration::from_secs_f64(shutdown_timeout.max(0.0).min(3600.0)), true)
        .await;
    session.close();

    let report = session.report();
    match format {
        ReportFormat::Table => println!("{report}"),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if !observer.config().local_only() {
        let counters = observer.telemetry_counters();
        println!();
        println!("=== Telemetry ===");
        println!("Sent: {}", counters.sent);
        println!("Dropped: {}", counters.dropped);
        println!("Failures: {}", counters.failures);
        println!("Abandoned on shutdown: {}", counters.abandoned_on_shutdown);
        println!("Sampled out: {}", counters.sampled_out);
    }

    if let Some(path) = output {
        let written = session.save_json(&path)?;
        info!(path = %written.display(), "Report written");
    }

    Ok(())
}

fn run_canonicalize(input: &str) {
    println!("{}", canonicalize_prompt(input));

    let breakers = detect_cache_breakers(input);
    if breakers.is_empty() {
        return;
    }
    println!();
    println!("=== Cache Breakers ===");
    for breaker in breakers {
        println!(
            "{} (confidence {:.2}): {}",
            breaker.category, breaker.confidence, breaker.hint
        );
    }
}

fn run_validate(input: &Path) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let value: Value = serde_json::from_str(&content)?;

    match validate_event(&value) {
        Ok(()) => println!("Event is valid"),
        Err(e) => {
            println!("Event is invalid: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn show_pricing(path: Option<&Path>) -> Result<()> {
    let catalog = match path {
        Some(path) => PricingCatalog::load_from(path)?,
        None => (*PricingCatalog::bundled()).clone(),
    };

    println!("=== Pricing Catalog ===");
    println!("Version: {}", catalog.version);
    println!("Updated: {}", catalog.updated_at);
    println!("Source: {}", catalog.source);
    println!();

    let mut models: Vec<_> = catalog.models.iter().collect();
    models.sort_by(|a, b| a.0.cmp(b.0));
    println!("{:<32} {:>12} {:>12}", "Model", "Input/1M", "Output/1M");
    for (model, pricing) in models {
        println!(
            "{:<32} {:>12} {:>12}",
            model,
            format!("${:.2}", pricing.input_per_million),
            format!("${:.2}", pricing.output_per_million)
        );
    }

    Ok(())
}

fn run_config_command(path: &Path, cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            ObserverConfig::default().save_to(path)?;
            println!("Configuration file created at: {}", path.display());
            println!();
            println!("Telemetry is disabled by default. To enable it, set:");
            println!("  export LLM_OBSERVER_ENABLED=true");
            println!("  export LLM_OBSERVER_ENDPOINT=https://collector.example/v1/events");
            println!("  export LLM_OBSERVER_API_KEY=your_key");
        }
        ConfigCommands::Show => {
            let mut config = ObserverConfig::load_from(path)?;
            // Mask API key in display
            if config.api_key.is_some() {
                config.api_key = Some("***".to_string());
            }
            println!("{}", toml::to_string_pretty(&config)?);
            println!("# local_only = {}", config.local_only());
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist - run 'config init' to create)");
            }
        }
    }
    Ok(())
}
