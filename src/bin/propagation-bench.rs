use chrono::Utc;
use clap::{Parser, Subcommand};
use propagation_bench::{
    config::{self, AnalyzeArgs, MarkerPatterns, RunArgs, RunConfig},
    extract,
    fetch::{self, LogFetcher},
    propagation,
    propagation::NodePropagation,
    report::{self, RunDetails},
    RUN_DIR_FORMAT,
};
use std::path::{Path, PathBuf};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::prelude::*;

const LOG_FILE: &str = "propagation-bench.log";

#[derive(Parser, Debug)]
#[command(name = "propagation-bench", author, version, about, long_about = Some("Propagation Bench\n\n\
Measure block propagation latency across a test network from its node logs"))]
struct Cli {
    #[command(subcommand)]
    command: BenchCommand,
    /// Max stdout log level
    #[arg(long, global = true, default_value_t = LevelFilter::INFO)]
    log_level_stdout: LevelFilter,
    /// Max file log level
    #[arg(long, global = true, default_value_t = LevelFilter::DEBUG)]
    log_level: LevelFilter,
}

#[derive(Subcommand, Debug)]
enum BenchCommand {
    /// Full workflow: download logs, extract markers, write the analysis
    Run(RunArgs),
    /// Download node logs for the time window
    Download(RunArgs),
    /// Write the propagation report for an existing log directory
    Extract(AnalyzeArgs),
    /// Write the statistics summary for an existing log directory
    Analyze(AnalyzeArgs),
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        BenchCommand::Run(args) => {
            let config = config::resolve_run_args(args).await?;
            let run_dir = prepare_run_dir(&config).await?;
            init_tracing(&run_dir, cli.log_level, cli.log_level_stdout)?;

            if config.skip_download {
                info!("using existing logs in {}", run_dir.display());
            } else {
                download(&config, &run_dir).await?;
            }

            let results = collect_results(&run_dir, &config.nodes, &config.patterns).await;
            let report_path = report::write_report(&run_dir, &results).await?;
            info!(
                "block propagation report created: {}",
                report_path.display()
            );
            let analysis_path = report::write_analysis(&run_dir, &results).await?;
            info!("analysis complete: {}", analysis_path.display());
            info!("benchmarking complete, log directory: {}", run_dir.display());
            Ok(())
        }
        BenchCommand::Download(args) => {
            let config = config::resolve_run_args(args).await?;
            let run_dir = prepare_run_dir(&config).await?;
            init_tracing(&run_dir, cli.log_level, cli.log_level_stdout)?;
            if config.skip_download {
                warn!("--skip-download does nothing for the download command");
                return Ok(());
            }
            download(&config, &run_dir).await
        }
        BenchCommand::Extract(args) => {
            init_stdout_tracing(cli.log_level_stdout);
            let patterns = MarkerPatterns::new(&args.seal_pattern, &args.import_pattern)?;
            let nodes = config::nodes_for_analysis(&args.log_dir).await?;
            let results = collect_results(&args.log_dir, &nodes, &patterns).await;
            let report_path = report::write_report(&args.log_dir, &results).await?;
            info!(
                "block propagation report created: {}",
                report_path.display()
            );
            Ok(())
        }
        BenchCommand::Analyze(args) => {
            init_stdout_tracing(cli.log_level_stdout);
            let patterns = MarkerPatterns::new(&args.seal_pattern, &args.import_pattern)?;
            let nodes = config::nodes_for_analysis(&args.log_dir).await?;
            let results = collect_results(&args.log_dir, &nodes, &patterns).await;
            let analysis_path = report::write_analysis(&args.log_dir, &results).await?;
            info!("analysis complete: {}", analysis_path.display());
            Ok(())
        }
    }
}

/// A fresh timestamped directory per download, so re-runs never overwrite
/// prior results; `--skip-download` reuses the given directory instead.
async fn prepare_run_dir(config: &RunConfig) -> anyhow::Result<PathBuf> {
    if config.skip_download {
        return Ok(config
            .log_dir
            .clone()
            .expect("log dir checked at config time"));
    }
    let run_dir = config
        .output_dir
        .join(Utc::now().format(RUN_DIR_FORMAT).to_string());
    tokio::fs::create_dir_all(&run_dir).await?;
    Ok(run_dir)
}

async fn download(config: &RunConfig, run_dir: &Path) -> anyhow::Result<()> {
    let endpoint = config
        .endpoint
        .as_ref()
        .expect("endpoint checked at config time");
    let window = config.window.expect("window checked at config time");
    let fetcher = LogFetcher::new(endpoint, config.timeout)?;

    info!(
        "downloading logs for {} nodes into {}",
        config.nodes.len(),
        run_dir.display()
    );
    let failed = fetch::download_all(&fetcher, &config.nodes, window, config.limit, run_dir).await;
    if !failed.is_empty() {
        warn!("no logs downloaded for: {}", failed.join(", "));
    }

    let details = RunDetails {
        url: endpoint.url.clone(),
        from_time: window.0,
        to_time: window.1,
        nodes: config.nodes.clone(),
        failed_nodes: failed,
        seal_pattern: config.patterns.seal.as_str().to_string(),
        import_pattern: config.patterns.import.as_str().to_string(),
        downloaded_at: Utc::now(),
    };
    let details_path = report::write_run_details(run_dir, &details).await?;
    info!("run details written to {}", details_path.display());
    Ok(())
}

/// Parse every node's log into propagation results. A node without a log
/// file (a failed download) still appears in the report, with no data.
async fn collect_results(
    run_dir: &Path,
    nodes: &[String],
    patterns: &MarkerPatterns,
) -> Vec<NodePropagation> {
    let mut results = Vec::new();
    for node in nodes {
        let path = run_dir.join(format!("{node}.txt"));
        let events = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => extract::extract_events(node, &contents, patterns),
            Err(err) => {
                warn!("no log for {node} at {}: {err}", path.display());
                Vec::new()
            }
        };
        results.push(propagation::propagation_for_node(node, &events));
    }
    results
}

fn init_tracing(
    run_dir: &Path,
    log_level: LevelFilter,
    log_level_stdout: LevelFilter,
) -> anyhow::Result<()> {
    let log_file = std::fs::File::create(run_dir.join(LOG_FILE))?;
    let file_layer = tracing_subscriber::fmt::layer().with_writer(log_file);
    let stdout_layer = tracing_subscriber::fmt::layer();
    tracing_subscriber::registry()
        .with(stdout_layer.with_filter(log_level_stdout))
        .with(file_layer.with_filter(log_level))
        .init();
    Ok(())
}

fn init_stdout_tracing(log_level_stdout: LevelFilter) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(log_level_stdout))
        .init();
}
