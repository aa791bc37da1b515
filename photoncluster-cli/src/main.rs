//! photoncluster: density clustering and noise filtering of photon-counting
//! LiDAR samples from the command line.
#![allow(clippy::uninlined_format_args, clippy::too_many_lines)]

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use photoncluster_algorithms::{
    ClusteringAlgorithm, DbscanClustering, DbscanConfig, DensityFilter, DensityFilterConfig,
    DirectionalConfig, DirectionalFilter, DistanceCache, KDistanceConfig, KDistanceEstimator,
};
use photoncluster_core::{Clustering, Point2D};
use photoncluster_io::{read_points, Delimiter, PointFileReader, ResultWriter};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    PhotonIo(#[from] photoncluster_io::Error),

    #[error("{0}")]
    Core(#[from] photoncluster_core::Error),

    #[error("cannot write summary: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no points read from {0}")]
    NoPoints(String),
}

/// Density clustering for photon-counting LiDAR point samples.
#[derive(Parser)]
#[command(name = "photoncluster")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand that reads points.
#[derive(Args, Debug)]
struct InputArgs {
    /// Input point file(s), two numeric columns per line
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Field separator: comma, semicolon, tab, whitespace or any
    #[arg(short, long, default_value_t = Delimiter::Any)]
    delimiter: Delimiter,

    /// Output file path (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Options of the multi-threaded engines.
#[derive(Args, Debug)]
struct EngineArgs {
    /// Worker threads (default: available cores)
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,

    /// Maximum number of memoized distances
    #[arg(long, default_value_t = 1 << 22)]
    cache_capacity: usize,

    /// Write a JSON run summary to this path
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl EngineArgs {
    fn parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(|| KDistanceConfig::default().parallelism)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sorted k-distance curve, for choosing eps
    Kdist {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Rank of the neighbor
        #[arg(short, long, default_value = "4")]
        k: usize,
    },

    /// Isotropic DBSCAN
    Dbscan {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Neighborhood radius
        #[arg(long)]
        eps: f64,

        /// Core threshold, the sample itself included
        #[arg(long, default_value = "4")]
        min_pts: usize,

        /// Print the k-distance curve (k = min-pts - 1) to stdout before clustering
        #[arg(long)]
        print_k_distances: bool,
    },

    /// Anisotropic density filter with a best-fit ellipse per sample
    DensityFilter {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Semi-axis along the unrotated x direction
        #[arg(long)]
        eps_a: f64,

        /// Semi-axis along the unrotated y direction
        #[arg(long)]
        eps_b: f64,

        /// Orientations tried over 180 degrees
        #[arg(long, default_value = "6")]
        sectors: usize,

        /// Core threshold, the sample itself included
        #[arg(long, default_value = "4")]
        min_pts: usize,
    },

    /// Directional weighted signal / noise filter
    Directional {
        #[command(flatten)]
        input: InputArgs,

        /// Kernel extent along the orientation
        #[arg(long, default_value = "5.0")]
        semi_major: f64,

        /// Kernel extent across the orientation
        #[arg(long, default_value = "2.0")]
        semi_minor: f64,

        /// Half-width of the along-track candidate window
        #[arg(long, default_value = "2.0")]
        window: f64,

        /// Orientations tried over 180 degrees
        #[arg(long, default_value = "12")]
        steps: usize,

        /// Highest score still labelled signal
        #[arg(long, default_value = "60.0")]
        threshold: f64,

        /// Also write `x y theta score` lines to this path
        #[arg(long)]
        scores: Option<PathBuf>,
    },

    /// Show information about point files
    Info {
        /// Input point file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Field separator
        #[arg(short, long, default_value_t = Delimiter::Any)]
        delimiter: Delimiter,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn load(input: &InputArgs) -> Result<Vec<Point2D>> {
    let points = read_points(&input.input, input.delimiter)?;
    if points.is_empty() {
        let names: Vec<String> = input.input.iter().map(|p| p.display().to_string()).collect();
        return Err(CliError::NoPoints(names.join(", ")));
    }
    Ok(points)
}

/// Opens the output file, or stdout when no path is given.
fn open_output(path: Option<&Path>) -> Result<ResultWriter<Box<dyn Write>>> {
    let sink: Box<dyn Write> = match path {
        Some(path) => {
            let file = File::create(path).map_err(|source| photoncluster_io::Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
            log::info!("writing output to {}", path.display());
            Box::new(file)
        }
        None => Box::new(io::stdout().lock()),
    };
    Ok(ResultWriter::new(sink))
}

fn write_summary(
    path: &Path,
    algorithm: &dyn ClusteringAlgorithm,
    clustering: &Clustering,
    cache: &DistanceCache,
    elapsed_s: f64,
) -> Result<()> {
    let stats = cache.stats();
    let summary = serde_json::json!({
        "algorithm": algorithm.name(),
        "points": clustering.len(),
        "clusters": clustering.cluster_count(),
        "core_points": clustering.core_count(),
        "outliers": clustering.outliers().len(),
        "elapsed_s": elapsed_s,
        "cache": {
            "hits": stats.hits,
            "misses": stats.misses,
            "evictions": stats.evictions,
        },
    });
    let file = File::create(path).map_err(|source| photoncluster_io::Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(file, &summary)?;
    Ok(())
}

fn report(clustering: &Clustering, elapsed_s: f64) {
    eprintln!(
        "{} points: {} clusters, {} core, {} outliers in {:.2}s",
        clustering.len(),
        clustering.cluster_count(),
        clustering.core_count(),
        clustering.outliers().len(),
        elapsed_s
    );
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Kdist { input, engine, k } => {
            let points = load(&input)?;
            let cache = DistanceCache::new(engine.cache_capacity)?;
            let config = KDistanceConfig {
                k,
                parallelism: engine.parallelism(),
            };
            let start = Instant::now();
            let curve = KDistanceEstimator::new(config, &cache)?.estimate(&points)?;
            log::info!(
                "k-distance curve of {} points in {:.2}s",
                curve.len(),
                start.elapsed().as_secs_f64()
            );

            open_output(input.output.as_deref())?.write_k_distances(&curve)?;
            if let Some(eps) = curve.suggest_radius() {
                eprintln!("Suggested eps (k = {}): {}", k, eps);
            }
        }

        Commands::Dbscan {
            input,
            engine,
            eps,
            min_pts,
            print_k_distances,
        } => {
            let points = load(&input)?;
            let config = DbscanConfig::new(eps, min_pts)
                .with_parallelism(engine.parallelism())
                .with_cache_capacity(engine.cache_capacity);
            let dbscan = DbscanClustering::new(config)?;

            if print_k_distances {
                match dbscan.k_distances(&points) {
                    Ok(curve) => {
                        ResultWriter::new(io::stdout().lock()).write_k_distances(&curve)?;
                    }
                    Err(e @ photoncluster_core::Error::InsufficientPoints { .. }) => {
                        log::warn!("skipping k-distance curve: {e}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let start = Instant::now();
            let clustering = dbscan.cluster(&points)?;
            let elapsed_s = start.elapsed().as_secs_f64();

            open_output(input.output.as_deref())?.write_clustering(&clustering)?;
            if let Some(path) = &engine.summary {
                write_summary(path, &dbscan, &clustering, dbscan.cache(), elapsed_s)?;
            }
            report(&clustering, elapsed_s);
        }

        Commands::DensityFilter {
            input,
            engine,
            eps_a,
            eps_b,
            sectors,
            min_pts,
        } => {
            let points = load(&input)?;
            let config = DensityFilterConfig::new(eps_a, eps_b, sectors, min_pts)
                .with_parallelism(engine.parallelism())
                .with_cache_capacity(engine.cache_capacity);
            let filter = DensityFilter::new(config)?;

            let start = Instant::now();
            let clustering = filter.cluster(&points)?;
            let elapsed_s = start.elapsed().as_secs_f64();

            open_output(input.output.as_deref())?.write_clustering(&clustering)?;
            if let Some(path) = &engine.summary {
                write_summary(path, &filter, &clustering, filter.cache(), elapsed_s)?;
            }
            report(&clustering, elapsed_s);
        }

        Commands::Directional {
            input,
            semi_major,
            semi_minor,
            window,
            steps,
            threshold,
            scores,
        } => {
            let points = load(&input)?;
            let filter = DirectionalFilter::new(DirectionalConfig {
                semi_major,
                semi_minor,
                window,
                orientation_steps: steps,
                threshold,
            })?;

            let start = Instant::now();
            let scored = filter.score(&points);
            let labels = filter.label(&scored);
            let elapsed_s = start.elapsed().as_secs_f64();

            if let Some(path) = &scores {
                ResultWriter::create(path)?.write_directional_scores(&scored)?;
            }
            open_output(input.output.as_deref())?.write_labels(&labels)?;
            let noise = labels.iter().filter(|cp| cp.is_noise()).count();
            eprintln!(
                "{} points: {} signal, {} noise in {:.2}s",
                labels.len(),
                labels.len() - noise,
                noise,
                elapsed_s
            );
        }

        Commands::Info { input, delimiter } => {
            let mut reader = PointFileReader::new(delimiter);
            for path in &input {
                reader.read_file(path)?;
            }
            let stats = reader.stats();
            let points = reader.points();

            println!("Files: {}", input.len());
            println!("Lines: {}", stats.lines);
            println!("Points: {}", points.len());
            println!("Skipped lines: {}", stats.skipped);
            println!("Duplicates: {}", stats.duplicates);

            if !points.is_empty() {
                let (min_x, max_x) = bounds(points.iter().map(Point2D::x));
                let (min_y, max_y) = bounds(points.iter().map(Point2D::y));
                println!("X range: {} - {}", min_x, max_x);
                println!("Y range: {} - {}", min_y, max_y);
            }
        }
    }

    Ok(())
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dbscan() {
        let cli = Cli::try_parse_from([
            "photoncluster",
            "dbscan",
            "points.txt",
            "--eps",
            "1.5",
            "--min-pts",
            "3",
            "-d",
            "comma",
            "--print-k-distances",
        ])
        .unwrap();
        match cli.command {
            Commands::Dbscan {
                input,
                eps,
                min_pts,
                print_k_distances,
                ..
            } => {
                assert_eq!(input.input, vec![PathBuf::from("points.txt")]);
                assert_eq!(input.delimiter, Delimiter::Comma);
                assert!((eps - 1.5).abs() < f64::EPSILON);
                assert_eq!(min_pts, 3);
                assert!(print_k_distances);
            }
            _ => panic!("expected dbscan"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_delimiter() {
        assert!(Cli::try_parse_from(["photoncluster", "info", "a.txt", "-d", "pipe"]).is_err());
    }

    #[test]
    fn test_dbscan_writes_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("points.txt");
        let output = dir.path().join("clusters.csv");
        let summary = dir.path().join("summary.json");
        std::fs::write(&input, "0 0\n0.5 0\n0 0.5\nbad line\n20 20\n").unwrap();

        let cli = Cli::try_parse_from([
            "photoncluster",
            "dbscan",
            input.to_str().unwrap(),
            "--eps",
            "1.0",
            "--min-pts",
            "3",
            "-o",
            output.to_str().unwrap(),
            "--summary",
            summary.to_str().unwrap(),
            "-j",
            "2",
        ])
        .unwrap();
        run(cli).unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text, "0,0,0\n0,0.5,0\n0.5,0,0\n20,20,-1\n");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
        assert_eq!(json["clusters"], 1);
        assert_eq!(json["outliers"], 1);
    }

    #[test]
    fn test_k_distances_skipped_on_small_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("points.txt");
        let output = dir.path().join("clusters.csv");
        std::fs::write(&input, "0 0\n0.5 0\n").unwrap();

        let cli = Cli::try_parse_from([
            "photoncluster",
            "dbscan",
            input.to_str().unwrap(),
            "--eps",
            "1.0",
            "--min-pts",
            "4",
            "--print-k-distances",
            "-o",
            output.to_str().unwrap(),
        ])
        .unwrap();
        run(cli).unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text, "0,0,-1\n0.5,0,-1\n");
    }

    #[test]
    fn test_invalid_eps_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("points.txt");
        let output = dir.path().join("clusters.csv");
        std::fs::write(&input, "0 0\n1 1\n").unwrap();

        let cli = Cli::try_parse_from([
            "photoncluster",
            "dbscan",
            input.to_str().unwrap(),
            "--eps",
            "0",
            "-o",
            output.to_str().unwrap(),
        ])
        .unwrap();
        let err = run(cli).unwrap_err();
        assert!(err.to_string().contains("eps"));
        assert!(!output.exists());
    }
}
