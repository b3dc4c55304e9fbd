use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use tracing::{error, info};

use prioria::cases::{resolve_input, CaseTable};
use prioria::config::{api_key_from_env, Config};
use prioria::evaluator::RiskEvaluator;
use prioria::gemini_client::GeminiClient;
use prioria::{batch, report};

/// Clinical Risk Index (IRC) scoring with a hosted LLM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Gemini model name (overrides the settings file)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Settings file (default: ~/.prioria/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score a single patient summary
    Evaluate {
        /// Summary text (reads stdin when neither --text nor --file is given)
        #[arg(short, long, conflicts_with = "file")]
        text: Option<String>,

        /// Read the summary from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the assessment as JSON
        #[arg(long)]
        json: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Score every row of a patient spreadsheet
    Batch {
        /// Input .xlsx/.ods/.csv (default: casos_pacientes.xlsx, then casos_pacientes.csv)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write sorted results to a .csv or .json file
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for results
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load(&config_path)?;
    if let Some(model) = &args.model {
        config.model = model.clone();
    }

    let api_key = api_key_from_env().inspect_err(|e| error!("Configuration error: {}", e))?;

    let client = GeminiClient::with_options(
        &api_key,
        &config.api_endpoint,
        &config.model,
        config.request_timeout(),
    )
    .context("Failed to create Gemini client")?;
    let evaluator = RiskEvaluator::new(Box::new(client));
    info!("PRIOR-IA starting with model {}", evaluator.model_name());

    match args.command {
        Command::Evaluate {
            text,
            file,
            json,
            no_color,
        } => evaluate_command(&evaluator, text, file, json, use_color(no_color)).await,
        Command::Batch {
            input,
            export,
            no_color,
        } => batch_command(&evaluator, &config, input, export, use_color(no_color)).await,
    }
}

fn use_color(no_color: bool) -> bool {
    !no_color && std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

async fn evaluate_command(
    evaluator: &RiskEvaluator,
    text: Option<String>,
    file: Option<PathBuf>,
    json: bool,
    color: bool,
) -> Result<()> {
    let summary = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read summary from {:?}", path))?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read summary from stdin")?;
            buf
        }
    };
    if summary.trim().is_empty() {
        bail!("Patient summary cannot be empty");
    }

    let assessment = evaluator
        .evaluate(summary.trim())
        .await
        .inspect_err(|e| error!("Evaluation failed: {}", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assessment)?);
    } else {
        print!("{}", report::render_assessment(&assessment, color));
    }
    Ok(())
}

async fn batch_command(
    evaluator: &RiskEvaluator,
    config: &Config,
    input: Option<PathBuf>,
    export: Option<PathBuf>,
    color: bool,
) -> Result<()> {
    let source = resolve_input(input.as_deref(), &config.default_xlsx, &config.default_csv)?;
    let table = CaseTable::load(&source)?;

    let result = batch::run_batch(evaluator, &table, |progress| {
        eprintln!(
            "[{}/{} {:>3.0}%] Procesando ID: {}",
            progress.done,
            progress.total,
            progress.fraction() * 100.0,
            progress.id
        );
    })
    .await
    .inspect_err(|e| error!("Batch aborted before processing: {}", e))?;

    println!();
    print!("{}", report::render_table(&result, color));
    println!();
    println!("{}", report::render_summary(&result));

    if let Some(path) = export {
        report::export(&result, &path)?;
        println!("Resultados exportados a {}", path.display());
    }

    info!("Batch {} complete", result.run_id);
    Ok(())
}
