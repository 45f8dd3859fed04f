use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::{debug, info};

use counsel_lens::config::AppConfig;
use counsel_lens::pipeline;

/// counsel_lens - Counseling records analysis pipeline
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Input CSV file (overrides data.input_file from the config)
    #[arg(short, long)]
    input: Option<String>,

    /// Output directory (overrides data.output_dir from the config)
    #[arg(short, long)]
    output_dir: Option<String>,

    /// Comma-separated stages to run (default: all stages)
    #[arg(short, long)]
    stages: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();

    info!("Starting counsel_lens");
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut cfg = AppConfig::load(Path::new(&args.config))?;
    if let Some(input) = args.input {
        debug!("Using input file from --input argument: {}", input);
        cfg.data.input_file = input;
    }
    if let Some(output_dir) = args.output_dir {
        debug!("Using output directory from --output-dir argument: {}", output_dir);
        cfg.data.output_dir = output_dir;
    }

    let stages: Vec<String> = match args.stages {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => pipeline::STAGES.iter().map(|s| s.to_string()).collect(),
    };

    // Friendlier error than the ingest one when the first stage will need
    // the input file.
    let input_path = Path::new(&cfg.data.input_file);
    if stages.iter().any(|s| s == "preprocess") && !input_path.exists() {
        return Err(anyhow::anyhow!(
            "Input file not found at {}\n\
             Use --input to point at the records CSV, or set data.input_file in {}.\n\
             Example config.yaml:\n\
             data:\n  input_file: \"data/counsel_records.csv\"\n  output_dir: \"outputs\"\n",
            input_path.display(),
            args.config
        ));
    }

    info!(
        "Run parameters - input={}, output_dir={}, stages={}",
        cfg.data.input_file,
        cfg.data.output_dir,
        stages.join(",")
    );

    pipeline::run(&cfg, &stages).await
}
