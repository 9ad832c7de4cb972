use std::{net::SocketAddr, path::PathBuf, process};

use clap::{Args, Parser, Subcommand};
use hearo_prep::{
    config::PipelineConfig,
    datasets::{self, lazy_download_boundaries},
    matching::MatchStrategy,
    pipeline::{self, OutputPaths, PipelineReport},
    sampling::sample_per_country,
    PrepError, Result,
};
use tracing::{debug, info};

/// Prepare radio station data for byte-range delivery to a map client.
#[derive(Debug, Parser)]
#[command(name = "hearo-prep", version)]
struct Cli {
    /// JSON configuration file; every field is optional
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

/// Flags that take precedence over the configuration file.
#[derive(Debug, Args)]
struct Overrides {
    #[arg(long, global = true)]
    min_stations: Option<usize>,
    #[arg(long, global = true)]
    samples_per_country: Option<usize>,
    #[arg(long, global = true)]
    seed: Option<u64>,
    #[arg(long, global = true)]
    padding_slack: Option<usize>,
    /// Join stations by country name instead of by coordinates
    #[arg(long, global = true)]
    match_by_name: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download Natural Earth country boundaries if not already present
    Download {
        #[arg(long, default_value = "data")]
        dir: PathBuf,
        #[arg(long, default_value = "10m")]
        scale: String,
    },
    /// Reduce every country to a representative point and export them
    PrepareGeometry {
        #[arg(long)]
        boundaries: PathBuf,
        #[arg(long, default_value = pipeline::CENTROIDS_FILE)]
        output: PathBuf,
    },
    /// Join stations to countries and apply the filters
    Match {
        #[arg(long)]
        boundaries: PathBuf,
        #[arg(long)]
        stations: PathBuf,
        #[arg(long, default_value = pipeline::ENRICHED_FILE)]
        output: PathBuf,
    },
    /// Pick a seeded sample of stations per country
    Sample {
        #[arg(long, default_value = pipeline::ENRICHED_FILE)]
        input: PathBuf,
        #[arg(long, default_value = pipeline::SAMPLED_FILE)]
        output: PathBuf,
    },
    /// Pack stations into fixed-width JSONL plus index
    Pack {
        #[arg(long, default_value = pipeline::SAMPLED_FILE)]
        input: PathBuf,
        #[arg(long, default_value = "public")]
        output_dir: PathBuf,
    },
    /// Serve a directory with HTTP range support
    Serve {
        #[arg(long, default_value = "public")]
        root: PathBuf,
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
    /// Run every stage from raw inputs to packed output
    Run {
        /// Boundaries GeoJSON; downloaded into `data/` when omitted
        #[arg(long)]
        boundaries: Option<PathBuf>,
        #[arg(long)]
        stations: PathBuf,
        #[arg(long, default_value = "public")]
        output_dir: PathBuf,
    },
}

fn setup_logging(verbose: u8, quiet: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hearo_prep={level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
    debug!("Logging initialized at level: {}", level);
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    let overrides = &cli.overrides;
    if let Some(min) = overrides.min_stations {
        config.min_stations = min;
    }
    if let Some(samples) = overrides.samples_per_country {
        config.samples_per_country = samples;
    }
    if let Some(seed) = overrides.seed {
        config.sample_seed = seed;
    }
    if let Some(slack) = overrides.padding_slack {
        config.padding_slack = slack;
    }
    if overrides.match_by_name {
        config.match_strategy = MatchStrategy::Name;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Download { dir, scale } => {
            let path = lazy_download_boundaries(&dir, &scale)?;
            println!("{}", path.display());
        }
        Command::PrepareGeometry { boundaries, output } => {
            let shapes = datasets::load_country_shapes(&boundaries)?;
            let failures = pipeline::prepare_geometry(&shapes, &output)?;
            PipelineReport {
                geometry_failures: failures,
                ..PipelineReport::default()
            }
            .log();
        }
        Command::Match {
            boundaries,
            stations,
            output,
        } => {
            let shapes = datasets::load_country_shapes(&boundaries)?;
            let stations = datasets::load_stations(&stations)?;
            let mut report = PipelineReport::default();
            let enriched = pipeline::enrich(stations, &shapes, &config, &mut report)?;
            report.unmatched.log();
            datasets::write_enriched(&output, &enriched)?;
        }
        Command::Sample { input, output } => {
            let enriched = datasets::read_enriched(&input)?;
            let sampled = sample_per_country(enriched, &config.sampling());
            datasets::write_enriched(&output, &sampled)?;
        }
        Command::Pack { input, output_dir } => {
            let stations = datasets::read_enriched(&input)?;
            let outputs = OutputPaths::in_dir(&output_dir);
            let index = pipeline::package(&stations, &config, &outputs.data, &outputs.index)?;
            info!(
                "{} stations across {} countries",
                index.total_records(),
                index.countries.len()
            );
        }
        Command::Serve { root, addr } => {
            let runtime = tokio::runtime::Runtime::new()
                .map_err(|e| PrepError::Server {
                    message: format!("failed to create async runtime: {e}"),
                })?;
            runtime.block_on(hearo_prep::serve::serve(root, addr))?;
        }
        Command::Run {
            boundaries,
            stations,
            output_dir,
        } => {
            let boundaries = match boundaries {
                Some(path) => path,
                None => lazy_download_boundaries(&PathBuf::from("data"), "10m")?,
            };
            let outputs = OutputPaths::in_dir(&output_dir);
            pipeline::run(&boundaries, &stations, &outputs, &config)?;
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    if let Err(error) = run(cli) {
        eprintln!("Error: {error}");
        process::exit(1);
    }
}
