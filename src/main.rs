use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use deckscript::backoff::BackoffPolicy;
use deckscript::config::{Config, DEFAULT_CONFIG_PATH};
use deckscript::llm::create_llm;
use deckscript::progress::ConsoleSink;
use deckscript::retry::RetryingInvoker;
use deckscript::script::SlideAnalyzer;
use deckscript::workflow::BatchOrchestrator;
use deckscript::{pptx, report, setup};
use log::warn;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "deckscript", version, about = "Turn a slide deck into speaker scripts for three audiences")]
struct Cli {
    /// Path to the YAML config
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze every slide of a .pptx file and write a markdown report
    Analyze {
        file: PathBuf,
        /// Report path (defaults to <output_folder>/<deck name>.md)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also dump the raw results as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        /// Run a deck-level narrative review after the slides
        #[arg(long)]
        review: bool,
        /// Override the configured model
        #[arg(long)]
        model: Option<String>,
    },
    /// List models that can generate content
    Models,
    /// Check that the API key is accepted
    CheckKey,
}

fn load_or_create_config(path: &Path) -> Result<Config> {
    if path.exists() {
        return Config::load(path);
    }
    let config = Config::default();
    config.save(path)?;
    eprintln!(
        "Created {}. Fill in llm.gemini.api_key (or set GEMINI_API_KEY) if it is not set yet.",
        path.display()
    );
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match load_or_create_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            return Err(e);
        }
    };

    match cli.command {
        Command::Analyze {
            file,
            output,
            json,
            review,
            model,
        } => analyze(&mut config, &cli.config, &file, output, json, review, model).await,
        Command::Models => {
            let model = config.llm.model().unwrap_or(setup::default_model(&config.llm.provider));
            let llm = create_llm(&config, Some(model))?;
            for name in llm.list_models().await? {
                println!("{name}");
            }
            Ok(())
        }
        Command::CheckKey => {
            let model = config.llm.model().unwrap_or(setup::default_model(&config.llm.provider));
            let llm = create_llm(&config, Some(model))?;
            match setup::check_key(llm.as_ref()).await {
                Ok(count) => {
                    println!("✅ Connected. Your key is valid ({count} models available).");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("❌ Connection failed: {:#}", e);
                    Err(e)
                }
            }
        }
    }
}

async fn analyze(
    config: &mut Config,
    config_path: &Path,
    file: &Path,
    output: Option<PathBuf>,
    json: Option<PathBuf>,
    review: bool,
    model: Option<String>,
) -> Result<()> {
    config.ensure_directories()?;
    if model.is_none() {
        setup::run_setup(config, config_path).await?;
    }
    let llm = create_llm(config, model.as_deref())?;

    let slides = pptx::load_slides(file)?;
    if slides.is_empty() {
        bail!("No slides found in {}", file.display());
    }
    println!("Analyzing {} slides from {}", slides.len(), file.display());

    let invoker = RetryingInvoker::new(
        BackoffPolicy::new(config.llm.retry_delay_seconds, config.llm.jitter_seconds),
        config.llm.max_attempts(),
    );
    let orchestrator = BatchOrchestrator::new(invoker, config.llm.pacing());

    let cancel = orchestrator.cancel_flag();
    // first Ctrl-C stops at the next check point, a second one exits at once
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping after the current step... (Ctrl-C again to quit now)");
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let analyzer = SlideAnalyzer::new(llm.as_ref());
    let sink = ConsoleSink::new(slides.len())?;
    let batch = orchestrator.process(&slides, &analyzer, Vec::new(), &sink).await;
    sink.finish();

    let deck_review = if review && !batch.cancelled && !batch.results.is_empty() {
        match orchestrator.review(&batch.results, &analyzer, &sink).await {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("Deck review failed: {}", e);
                eprintln!("Deck review failed: {}", e);
                None
            }
        }
    } else {
        None
    };

    let title = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "deck".to_string());
    let output = output.unwrap_or_else(|| Path::new(&config.output_folder).join(format!("{title}.md")));
    report::write_markdown(&output, &title, &batch.results, deck_review.as_ref())?;
    if let Some(json) = json {
        report::write_json(&json, &batch.results)?;
    }

    println!(
        "Analyzed {}/{} slides ({} failed, {} retries). Report: {}",
        batch.results.len(),
        slides.len(),
        batch.failures.len(),
        batch.retries,
        output.display()
    );
    for failure in &batch.failures {
        println!("  - slide {}: {}", failure.index, failure.message);
    }
    if batch.cancelled {
        println!("Stopped early; the report covers the slides finished so far.");
    }
    Ok(())
}
