use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use specsim::config::AppConfig;
use specsim::export::{self, ExportFormat};
use specsim::filter::{FilterSpec, ScoreThreshold, restrict_wavelength};
use specsim::loader;
use specsim::scorer::{BatchScorer, CancelToken, ScoredTable};
use specsim::similarity::AlgorithmRegistry;
use specsim::spectrum::{SpectralRecord, batch_statistics};

#[derive(Parser)]
#[command(name = "specsim", version, about = "UV-Vis spectral similarity analyzer")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmName {
    Sam,
    Cosine,
    Pearson,
}

impl AlgorithmName {
    fn name(&self) -> &'static str {
        match self {
            Self::Sam => "sam",
            Self::Cosine => "cosine",
            Self::Pearson => "pearson",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

impl From<OutputFormat> for ExportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Csv => ExportFormat::Csv,
            OutputFormat::Json => ExportFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Import spectra and show batch statistics
    List {
        /// CSV files or directories (defaults to config file data_dirs)
        paths: Vec<PathBuf>,
    },

    /// Score every spectrum against a reference spectrum
    Score {
        /// CSV files or directories (defaults to config file data_dirs)
        paths: Vec<PathBuf>,

        /// Experiment id of the reference spectrum
        #[arg(short, long)]
        reference: String,

        /// Algorithms to run (defaults to config file, then all built-ins)
        #[arg(short, long, value_enum)]
        algorithm: Vec<AlgorithmName>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Scale each spectrum by its maximum absorbance before scoring
        #[arg(long)]
        normalize: bool,

        /// Lower wavelength bound (inclusive), applied before scoring
        #[arg(long)]
        min_wavelength: Option<f64>,

        /// Upper wavelength bound (inclusive), applied before scoring
        #[arg(long)]
        max_wavelength: Option<f64>,

        /// Keep only these experiment ids in the result (repeatable)
        #[arg(long = "experiment")]
        experiments: Vec<String>,

        /// Score threshold, e.g. "sam>=0.8" or "pearson<=0.2" (repeatable)
        #[arg(long = "threshold")]
        thresholds: Vec<String>,

        /// Show the N best-scoring spectra
        #[arg(short = 'n', long)]
        top: Option<usize>,

        /// Algorithm to rank --top results by
        #[arg(long, value_enum, default_value = "sam")]
        sort: AlgorithmName,

        /// Write results to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write results to a timestamped file in the export directory
        #[arg(long)]
        save: bool,

        /// Output format for --output / --save
        #[arg(long, value_enum, default_value = "csv")]
        format: OutputFormat,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    match cli.command {
        Commands::List { paths } => {
            let records = load_records(&paths, &config)?;
            print_batch(&records);
        }

        Commands::Score {
            paths,
            reference,
            algorithm,
            jobs,
            normalize,
            min_wavelength,
            max_wavelength,
            experiments,
            thresholds,
            top,
            sort,
            output,
            save,
            format,
        } => {
            let mut records = load_records(&paths, &config)?;

            if normalize {
                records = records.iter().map(SpectralRecord::normalized).collect();
            }
            if min_wavelength.is_some() || max_wavelength.is_some() {
                let lo = min_wavelength.unwrap_or(f64::NEG_INFINITY);
                let hi = max_wavelength.unwrap_or(f64::INFINITY);
                records = records
                    .iter()
                    .map(|r| restrict_wavelength(r, lo, hi))
                    .collect();
            }

            let reference_record = records
                .iter()
                .find(|r| r.experiment_id() == reference)
                .cloned()
                .with_context(|| {
                    format!("Reference spectrum '{reference}' not found in the imported data")
                })?;

            let algorithms: Vec<String> = if algorithm.is_empty() {
                config.resolve_algorithms()
            } else {
                algorithm.iter().map(|a| a.name().to_string()).collect()
            };
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };

            let scorer = BatchScorer::new(AlgorithmRegistry::new(), workers);
            let table = scorer
                .score(&reference_record, &records, &algorithms, &CancelToken::new())
                .context("Scoring failed")?;

            let spec = FilterSpec {
                wavelength_min: None,
                wavelength_max: None,
                experiment_ids: if experiments.is_empty() {
                    None
                } else {
                    Some(experiments.into_iter().collect())
                },
                thresholds: thresholds
                    .iter()
                    .map(|t| t.parse::<ScoreThreshold>().map_err(anyhow::Error::msg))
                    .collect::<Result<Vec<_>>>()?,
            };
            let view = if spec.is_empty() {
                (*table).clone()
            } else {
                spec.apply(&table)
            };

            print_table(&view);
            if view.len() < table.len() {
                println!();
                println!("({} of {} rows after filtering)", view.len(), table.len());
            }

            if let Some(n) = top {
                print_top(&view, sort.name(), n);
            }

            let export_path = match (output, save) {
                (Some(path), _) => Some(path),
                (None, true) => {
                    let dir = config
                        .export_dir
                        .clone()
                        .unwrap_or_else(|| PathBuf::from("."));
                    Some(export::default_output_path(
                        &dir,
                        "similarity",
                        format.into(),
                    ))
                }
                (None, false) => None,
            };
            if let Some(path) = export_path {
                export::export_table(&view, &path, format.into())
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!();
                println!("Results written to {}", path.display());
            }
        }
    }

    Ok(())
}

/// Resolve input paths (CLI args > config data_dirs) and import every CSV.
fn load_records(paths: &[PathBuf], config: &AppConfig) -> Result<Vec<SpectralRecord>> {
    let paths: Vec<PathBuf> = if !paths.is_empty() {
        paths.to_vec()
    } else if !config.data_dirs.is_empty() {
        config.data_dirs.clone()
    } else {
        anyhow::bail!("No input files. Pass paths as arguments or set data_dirs in config.");
    };

    let files = loader::collect_csv_files(&paths);
    if files.is_empty() {
        anyhow::bail!("No CSV files found in the given paths");
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} files ({eta})",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    let mut records = Vec::new();
    for file in &files {
        let spectra = loader::load_csv(file)
            .with_context(|| format!("Failed to import {}", file.display()))?;
        records.extend(spectra);
        pb.inc(1);
    }
    pb.finish_and_clear();

    loader::check_unique(&records)?;
    println!(
        "Imported {} spectra from {} file{}",
        records.len(),
        files.len(),
        if files.len() == 1 { "" } else { "s" }
    );
    Ok(records)
}

fn print_batch(records: &[SpectralRecord]) {
    let Some(stats) = batch_statistics(records) else {
        println!("No spectra loaded.");
        return;
    };

    println!();
    println!(
        "{} spectra, {} points each, {:.1}–{:.1} nm (mean step {:.2} nm)",
        stats.total_spectra,
        stats.points_per_spectrum,
        stats.wavelength_min,
        stats.wavelength_max,
        stats.wavelength_step
    );
    println!(
        "absorbance: mean {:.4}, std {:.4}, range {:.4}–{:.4}",
        stats.absorbance_mean, stats.absorbance_std, stats.absorbance_min, stats.absorbance_max
    );
    println!();

    for record in records {
        let (lo, hi) = record.wavelength_range().unwrap_or((0.0, 0.0));
        let source = record
            .metadata()
            .get("source_file")
            .map(|v| v.to_string())
            .unwrap_or_default();
        println!(
            "{:<24} {:>5} points  {:>7.1}–{:<7.1} nm  {}",
            record.experiment_id(),
            record.len(),
            lo,
            hi,
            source
        );
    }
}

fn print_table(table: &ScoredTable) {
    println!();
    println!("Reference: {}", table.reference_id);
    println!();

    print!("{:<24}", "experiment");
    for algorithm in &table.algorithms {
        print!(" {:>24}", algorithm);
    }
    println!();

    for row in &table.rows {
        print!("{:<24}", row.experiment_id);
        for algorithm in &table.algorithms {
            let cell = row
                .score(algorithm)
                .map(|s| s.to_string())
                .unwrap_or_default();
            print!(" {:>24}", cell);
        }
        println!();
    }
}

fn print_top(table: &ScoredTable, algorithm: &str, n: usize) {
    let ranked = table.top_by(algorithm, n);
    println!();
    if ranked.is_empty() {
        println!("No defined {algorithm} scores to rank.");
        return;
    }
    println!("Top {} by {}:", ranked.len(), algorithm);
    for (i, (id, score)) in ranked.iter().enumerate() {
        println!("{:>3}. {:<24} {:.6}", i + 1, id, score);
    }
}
