use anyhow::{bail, Context, Result};
use as_topo::congestion::ScoreParams;
use as_topo::hop::Hop;
use as_topo::pipeline;
use as_topo::topology::build::PathSelection;
use as_topo::topology::output;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map as JsonMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

#[derive(Parser)]
#[command(
    name = "as-topo",
    about = "AS-level topology construction and congestion localization from traceroutes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an AS-level topology graph from traceroute files.
    Topology(TopologyArgs),
    /// Score a topology from RTT change detections and locate the causes.
    Congestion(CongestionArgs),
}

#[derive(Args)]
struct TopologyArgs {
    /// Directory storing the traceroute files.
    #[arg(short = 'd', long = "directory")]
    directory: PathBuf,
    /// Suffix of the files to be considered in the directory.
    #[arg(short = 's', long = "suffix")]
    suffix: String,
    /// A priori known common destination of the measurements.
    #[arg(short = 'e', long = "end")]
    end: Option<String>,
    /// Beginning of the rendered window, "YYYY-MM-DD HH:MM:SS +ZZZZ".
    #[arg(short = 'b', long = "begin-time")]
    begin_time: Option<String>,
    /// End of the rendered window, same format as the beginning.
    #[arg(short = 't', long = "stop-time")]
    stop_time: Option<String>,
    /// Output .json file.
    #[arg(short = 'o', long = "outfile", default_value = "graph.json")]
    outfile: PathBuf,
}

#[derive(Args)]
struct CongestionArgs {
    /// Topology .json file produced by the topology stage.
    #[arg(short = 'g', long = "topology")]
    topology: PathBuf,
    /// Suffix of the change-detection files to be considered.
    #[arg(short = 's', long = "suffix")]
    suffix: String,
    /// Directory containing the change-detection results.
    #[arg(short = 'd', long = "directory")]
    directory: PathBuf,
    /// Beginning of the scored window, "YYYY-MM-DD HH:MM:SS +ZZZZ".
    #[arg(short = 'b', long = "begin-time")]
    begin_time: String,
    /// End of the scored window, same format as the beginning.
    #[arg(short = 't', long = "stop-time")]
    stop_time: String,
    /// Output .json file.
    #[arg(short = 'o', long = "outfile")]
    outfile: PathBuf,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Topology(args) => {
            init_logging("topology.log").and_then(|_| run_topology(args))
        }
        Command::Congestion(args) => {
            init_logging("congestion.log").and_then(|_| run_congestion(args))
        }
    };
    match outcome {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(err = %format_args!("{err:#}"), "aborted");
            eprintln!("Error: {err:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn init_logging(file_name: &str) -> Result<()> {
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_name)
        .with_context(|| format!("cannot open log file {file_name}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    // The default hook prints worker panics to stderr only; route them into
    // the log with a traceback before they unwind and fail the batch.
    std::panic::set_hook(Box::new(|panic| {
        let trace = std::backtrace::Backtrace::force_capture();
        tracing::error!(%panic, "worker panicked, traceback:\n{}", trace);
    }));
    Ok(())
}

fn parse_time(value: &str) -> Result<i64> {
    let parsed = chrono::DateTime::parse_from_str(value, TIME_FORMAT)
        .with_context(|| format!("invalid time {value:?}, expected format {TIME_FORMAT}"))?;
    Ok(parsed.timestamp())
}

/// Files in `dir` ending in `suffix`, skipping editor leftovers. Sorted so
/// node numbering is reproducible across runs.
fn files_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("cannot read directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(suffix) && !name.starts_with('~') {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn run_topology(args: TopologyArgs) -> Result<()> {
    let files = files_with_suffix(&args.directory, &args.suffix)?;
    if files.is_empty() {
        tracing::error!(
            directory = %args.directory.display(),
            suffix = %args.suffix,
            "no input file found"
        );
        bail!(
            "no file with suffix {} in {}",
            args.suffix,
            args.directory.display()
        );
    }

    let begin = args.begin_time.as_deref().map(parse_time).transpose()?;
    let stop = args.stop_time.as_deref().map(parse_time).transpose()?;
    if begin.is_none() && stop.is_none() {
        tracing::info!("no time window given, keeping the first traceroute of each probe");
    }

    let selection = PathSelection {
        end: args.end.as_deref().map(Hop::parse),
        begin,
        stop,
        ..PathSelection::default()
    };

    let mut meta = JsonMap::new();
    meta.insert("directory".to_owned(), json!(args.directory));
    meta.insert("suffix".to_owned(), json!(args.suffix));
    meta.insert("end".to_owned(), json!(args.end));
    meta.insert("beginTime".to_owned(), json!(args.begin_time));
    meta.insert("stopTime".to_owned(), json!(args.stop_time));
    meta.insert("outfile".to_owned(), json!(args.outfile));

    let topo = pipeline::build_topology(&files, &selection, meta);
    let document = output::to_document(&topo, false);
    output::write_document(&args.outfile, &document)
        .with_context(|| format!("cannot write {}", args.outfile.display()))?;
    Ok(())
}

fn run_congestion(args: CongestionArgs) -> Result<()> {
    let document = output::read_document(&args.topology)
        .with_context(|| format!("cannot read topology {}", args.topology.display()))?;
    let mut topo = output::topology_from_document(&document)
        .with_context(|| format!("invalid topology {}", args.topology.display()))?;
    tracing::info!(
        nodes = topo.node_count(),
        links = topo.edge_count(),
        "topology loaded"
    );

    let files = files_with_suffix(&args.directory, &args.suffix)?;
    if files.is_empty() {
        bail!(
            "no file with suffix {} in {}",
            args.suffix,
            args.directory.display()
        );
    }

    let begin = parse_time(&args.begin_time)?;
    let stop = parse_time(&args.stop_time)?;
    let params = ScoreParams::new(begin, stop);

    pipeline::run_congestion(&mut topo, &files, &params)?;

    let document = output::to_document(&topo, true);
    output::write_document(&args.outfile, &document)
        .with_context(|| format!("cannot write {}", args.outfile.display()))?;
    Ok(())
}
