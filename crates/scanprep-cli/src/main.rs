// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanprep command line.
//
// Entry point. Initialises logging, loads the configuration, and runs one
// subcommand. Results are printed to stdout as JSON; logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use scanprep_core::error::{Result, ScanprepError};
use scanprep_core::human_errors::humanize_error;
use scanprep_core::{ImageId, PreprocessingOptions, PreprocessingResult, ScanprepConfig};
use scanprep_document::scan::noise::NoiseReducer;
use scanprep_document::{ImageIdAllocator, ImageSource, PreprocessingPipeline, decode, score};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "scanprep")]
#[command(version, about = "Prepare scanned document images for text recognition", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preprocess one image and print the result as JSON
    Preprocess {
        /// Input image file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Image id (allocated from the id counter when absent)
        #[arg(long, value_name = "ID")]
        id: Option<String>,

        /// Configuration file (JSON)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Artifact root directory (overrides the configuration)
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        #[command(flatten)]
        steps: StepFlags,
    },

    /// Preprocess several images in parallel
    Batch {
        /// Input image files
        #[arg(value_name = "INPUTS", required = true)]
        inputs: Vec<PathBuf>,

        /// Configuration file (JSON)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Artifact root directory (overrides the configuration)
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Number of parallel threads
        #[arg(short = 'j', long, value_name = "N")]
        threads: Option<usize>,
    },

    /// Print the quality score and noise measurement of an image
    Score {
        /// Input image file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Configuration file (JSON), for the noise thresholds
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Output file path
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Per-run overrides of the configured default steps.
#[derive(Args, Debug, Default)]
struct StepFlags {
    /// Estimate and undo page rotation
    #[arg(long)]
    deskew: bool,

    /// Skip contrast enhancement
    #[arg(long)]
    no_contrast: bool,

    /// Reduce noise when noise is detected
    #[arg(long)]
    denoise: bool,

    /// Sharpen when earlier steps lost edge energy
    #[arg(long)]
    sharpen: bool,

    /// Do not emit a binary artifact
    #[arg(long)]
    no_binarize: bool,
}

impl StepFlags {
    fn apply(&self, mut options: PreprocessingOptions) -> PreprocessingOptions {
        if self.deskew {
            options.auto_deskew = true;
        }
        if self.no_contrast {
            options.enhance_contrast = false;
        }
        if self.denoise {
            options.reduce_noise = true;
        }
        if self.sharpen {
            options.sharpen = true;
        }
        if self.no_binarize {
            options.binarize = false;
        }
        options
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Preprocess {
            input,
            id,
            config,
            out,
            steps,
        } => cmd_preprocess(&input, id, config.as_deref(), out, &steps),
        Commands::Batch {
            inputs,
            config,
            out,
            threads,
        } => cmd_batch(&inputs, config.as_deref(), out, threads),
        Commands::Score { input, config } => cmd_score(&input, config.as_deref()),
        Commands::InitConfig { path, force } => cmd_init_config(&path, force),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            let human = humanize_error(&err);
            eprintln!("Error: {}", human.message);
            eprintln!("  {}", human.suggestion);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>, out: Option<PathBuf>) -> Result<ScanprepConfig> {
    let mut config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            ScanprepConfig::load(path)?
        }
        None => ScanprepConfig::default(),
    };
    if let Some(out) = out {
        config.output_root = out;
    }
    Ok(config)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_preprocess(
    input: &Path,
    id: Option<String>,
    config: Option<&Path>,
    out: Option<PathBuf>,
    steps: &StepFlags,
) -> Result<bool> {
    let config = load_config(config, out)?;
    let pipeline = PreprocessingPipeline::new(&config)?;
    let id = match id {
        Some(id) => ImageId::new(id)?,
        None => ImageIdAllocator::open(&config.id_counter_path).next_id()?,
    };
    let options = steps.apply(config.defaults);

    let result = pipeline.preprocess(&ImageSource::path(input), &id, &options);
    print_json(&result)?;
    Ok(result.is_success())
}

fn cmd_batch(
    inputs: &[PathBuf],
    config: Option<&Path>,
    out: Option<PathBuf>,
    threads: Option<usize>,
) -> Result<bool> {
    let config = load_config(config, out)?;

    if let Some(num_threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .map_err(|e| ScanprepError::Config(format!("failed to configure thread pool: {e}")))?;
        info!(num_threads, "Thread pool configured");
    }

    let pipeline = PreprocessingPipeline::new(&config)?;
    let allocator = ImageIdAllocator::open(&config.id_counter_path);
    let jobs = inputs
        .iter()
        .map(|input| Ok((input.clone(), allocator.next_id()?)))
        .collect::<Result<Vec<_>>>()?;

    info!(count = jobs.len(), "Processing batch");
    let options = config.defaults;
    let results: Vec<PreprocessingResult> = jobs
        .par_iter()
        .map(|(input, id)| {
            let result = pipeline.preprocess(&ImageSource::path(input), id, &options);
            if let PreprocessingResult::Failure { message } = &result {
                warn!(input = %input.display(), id = %id, error = %message, "Batch item failed");
            }
            result
        })
        .collect();

    print_json(&results)?;
    let failed = results.iter().filter(|r| !r.is_success()).count();
    info!(total = results.len(), failed, "Batch complete");
    Ok(failed == 0)
}

fn cmd_score(input: &Path, config: Option<&Path>) -> Result<bool> {
    let config = load_config(config, None)?;
    let buffer = decode(&ImageSource::path(input))?;
    let gray = buffer.to_gray();
    let noise = NoiseReducer::new(&config.tuning).assess(&gray);

    print_json(&serde_json::json!({
        "width": buffer.width(),
        "height": buffer.height(),
        "channels": buffer.channel_count(),
        "quality_score": score(&gray),
        "noise_level": noise.level,
        "noise_detected": noise.detected,
    }))?;
    Ok(true)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Err(ScanprepError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    ScanprepConfig::default().save(path)?;
    info!(path = %path.display(), "Default configuration written");
    Ok(true)
}
