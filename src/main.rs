mod config;
mod db;
mod error;
mod extract;
mod git;
mod libgit;
mod models;
mod parser;
mod sink;
#[cfg(test)]
mod test_support;

use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use tracing_subscriber::EnvFilter;
use config::Settings;
use db::Database;
use error::ExtractError;
use extract::{GitLogExtractor, RunSummary, Strategy};
use models::TimeWindow;
use sink::{JsonLinesSink, RecordSink};

#[derive(Parser, Debug)]
#[command(author, version, about = "Extract git commit history into SQLite")]
struct Args {
    #[arg(help = "Path to the git repository", default_value = ".")]
    repo: PathBuf,

    #[arg(long, help = "Earliest commit date to include (YYYY-MM-DD or RFC 3339)", value_name = "DATE")]
    since: Option<String>,

    #[arg(long, help = "Commit date to stop before, exclusive (YYYY-MM-DD or RFC 3339)", value_name = "DATE")]
    to: Option<String>,

    #[arg(long, value_enum, default_value_t = Strategy::GitLog, help = "How to read history")]
    strategy: Strategy,

    #[arg(long, help = "SQLite database to write to", value_name = "PATH")]
    db: Option<PathBuf>,

    #[arg(long, help = "git executable to run", value_name = "PATH")]
    git: Option<String>,

    #[arg(
        long,
        conflicts_with_all = ["since", "to", "compare"],
        help = "Parse a rendered log file instead of running git ('-' for stdin)",
        value_name = "FILE"
    )]
    input: Option<PathBuf>,

    #[arg(long, help = "Print records as JSON lines instead of writing the database")]
    dry_run: bool,

    #[arg(long, help = "Run every strategy over the window and compare counts")]
    compare: bool,

    #[arg(long, help = "Drop and recreate the tables before extracting")]
    reset: bool,

    #[arg(short, long, help = "Log progress to stderr")]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::resolve(args.db.clone(), args.git.clone())?;
    let window = config::parse_window(args.since.as_deref(), args.to.as_deref())?;

    let running = Arc::new(AtomicBool::new(true));
    if polls_interrupts(&args) {
        let running = running.clone();
        let _ = ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        });
    }

    if args.compare {
        return handle_compare(&args, &settings, window, running);
    }

    if args.dry_run {
        let stdout = io::stdout();
        let mut sink = JsonLinesSink::new(stdout.lock());
        let summary = extract_into(&args, &settings, window, running, &mut sink)?;
        let _stdout = sink.finish()?;
        eprintln!("{}", describe(&summary));
        return Ok(());
    }

    let mut db = Database::open(&settings.database_path)?;
    if args.reset {
        db.reset()?;
        println!("✓ Database cleared");
    }

    let mut writer = db.begin()?;
    let summary = extract_into(&args, &settings, window, running, &mut writer)?;
    writer.commit()?;

    println!("✓ {}", describe(&summary));
    println!(
        "  {}: {} commits, {} file changes",
        settings.database_path.display(),
        db.count_commits()?,
        db.count_file_changes()?
    );

    Ok(())
}

/// Repository sources stop on a cleared flag. A rendered log may block on a
/// read that never sees it, so `--input` keeps the default Ctrl+C behaviour
/// and the open transaction dies with the process.
fn polls_interrupts(args: &Args) -> bool {
    args.input.is_none()
}

/// Stream records from the selected source into `sink`.
fn extract_into(
    args: &Args,
    settings: &Settings,
    window: TimeWindow,
    running: Arc<AtomicBool>,
    sink: &mut dyn RecordSink,
) -> Result<RunSummary, ExtractError> {
    if let Some(input) = &args.input {
        tracing::info!("Parsing rendered log from {}", input.display());
        return extract_from_file(input, sink);
    }

    tracing::info!(
        strategy = ?args.strategy,
        since = %window.since,
        to = %window.to,
        "Extracting {}",
        args.repo.display()
    );

    let repo = git::repo_root(&settings.git_binary, &args.repo)?;
    match args.strategy {
        Strategy::GitLog => {
            let extractor = GitLogExtractor::new(&settings.git_binary, &repo, running);
            extract::pump(extractor.records(window)?, sink)
        }
        strategy => {
            let extractor = strategy.build(&settings.git_binary, &repo, running)?;
            let entries = extractor.entries(window)?;
            extract::pump(extract::records_of(entries), sink)
        }
    }
}

fn extract_from_file(input: &Path, sink: &mut dyn RecordSink) -> Result<RunSummary, ExtractError> {
    if input == Path::new("-") {
        let stdin = io::stdin();
        let lines = git::read_lines(stdin.lock());
        return extract::pump(parser::LogParser::new(lines), sink);
    }

    let file = File::open(input).map_err(error::SourceError::from)?;
    let lines = git::read_lines(BufReader::new(file));
    extract::pump(parser::LogParser::new(lines), sink)
}

fn handle_compare(
    args: &Args,
    settings: &Settings,
    window: TimeWindow,
    running: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let repo = git::repo_root(&settings.git_binary, &args.repo)?;

    let mut results = Vec::new();
    for strategy in Strategy::ALL {
        let extractor = strategy.build(&settings.git_binary, &repo, running.clone())?;
        let comparison = extract::measure(extractor.as_ref(), window)?;

        println!(
            "{:<8} {:>7} commits {:>8} file changes {:>6} binary  {:.2?}",
            comparison.strategy,
            comparison.summary.commits,
            comparison.summary.file_changes,
            comparison.summary.binary_changes,
            comparison.summary.elapsed
        );
        results.push(comparison);
    }

    if let Some((first, rest)) = results.split_first() {
        for other in rest {
            if other.commit_ids != first.commit_ids {
                println!("! {} and {} disagree on the commit list", first.strategy, other.strategy);
            }
        }
    }

    Ok(())
}

fn describe(summary: &RunSummary) -> String {
    format!(
        "Extracted {} commits, {} file changes ({} binary) in {:.2?}",
        summary.commits, summary.file_changes, summary.binary_changes, summary.elapsed
    )
}
