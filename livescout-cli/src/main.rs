use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use livescout::{
    search::{QueryRun, SearchEngine, SearchQuery, SessionId, StreamEvent},
    FileResult, QueryFilters, SearchConfig, SearchError, SearchSummary,
};
use std::io::{self, BufRead, IsTerminal, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, SearchError>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options that shape the session's file set and scan
#[derive(Args, Clone)]
struct CliSessionConfig {
    /// Root directory to search in (can be specified multiple times)
    #[arg(short = 'd', long = "root")]
    roots: Vec<PathBuf>,

    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many files have matched
    #[arg(long)]
    max_results: Option<usize>,

    /// Stop scanning a file after this many matches
    #[arg(long)]
    max_matches_per_file: Option<usize>,

    /// Search at most this many files
    #[arg(long = "max-files")]
    max_files: Option<usize>,

    /// Skip files larger than this many bytes
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Number of files scanned per batch
    #[arg(long)]
    batch_size: Option<NonZeroUsize>,

    /// Number of threads to use
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Do not honour .gitignore and .ignore files
    #[arg(long)]
    no_ignore: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

/// Query-time filters and output format
#[derive(Args, Clone)]
struct CliOutputConfig {
    /// Only search files matching these globs (comma-separated)
    #[arg(short = 'i', long, default_value = "")]
    include: String,

    /// Skip files matching these globs (comma-separated)
    #[arg(short = 'x', long, default_value = "")]
    exclude: String,

    /// Print one JSON event per line
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search files for a literal, case-insensitive query
    Search {
        /// Text to search for
        query: String,

        #[command(flatten)]
        session: CliSessionConfig,

        #[command(flatten)]
        output: CliOutputConfig,

        /// Show only statistics, not matches
        #[arg(short, long)]
        stats: bool,
    },

    /// List the files a search would scan, in result order
    Files {
        #[command(flatten)]
        session: CliSessionConfig,
    },

    /// Read queries from stdin, one per line; each line replaces the last
    Interactive {
        #[command(flatten)]
        session: CliSessionConfig,

        #[command(flatten)]
        output: CliOutputConfig,
    },

    /// Print the effective configuration as YAML
    Config {
        #[command(flatten)]
        session: CliSessionConfig,
    },
}

fn main() -> Result<()> {
    run()
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Search {
            query,
            session,
            output,
            stats,
        } => {
            let engine = build_engine(&session)?;
            let filters = QueryFilters::new(&output.include, &output.exclude)?;
            let session = SessionId::new("cli");
            open_with_spinner(&engine, &session);

            let Some(run) = engine.submit_query_with(&session, &query, &filters)? else {
                println!("Empty query, nothing to search");
                return Ok(());
            };

            if stats {
                let summary = run.collect_summary();
                print_stats(&summary, &engine);
                return Ok(());
            }

            let mut out = io::stdout().lock();
            let summary = stream_run(run, output.json, &mut out)?;
            if !output.json && !summary.is_empty() {
                writeln!(
                    out,
                    "\nFound {} matches in {} files",
                    summary.total_matches, summary.files_with_matches
                )?;
            }
            Ok(())
        }

        Commands::Files { session } => {
            let engine = build_engine(&session)?;
            let session = SessionId::new("cli");
            open_with_spinner(&engine, &session);

            let mut out = io::stdout().lock();
            for file in engine.session_files(&session)?.iter() {
                writeln!(out, "{}", file.display_path())?;
            }
            Ok(())
        }

        Commands::Interactive { session, output } => {
            let engine = build_engine(&session)?;
            let filters = QueryFilters::new(&output.include, &output.exclude)?;
            let session = SessionId::new("interactive");
            open_with_spinner(&engine, &session);
            interactive(&engine, &session, &filters, output.json)
        }

        Commands::Config { session } => {
            let config = load_config(&session)?;
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

fn load_config(args: &CliSessionConfig) -> Result<SearchConfig> {
    let file_config = SearchConfig::load_from(args.config.as_deref())?;

    let defaults = SearchConfig::default();
    let cli_config = SearchConfig {
        roots: if args.roots.is_empty() {
            defaults.roots.clone()
        } else {
            args.roots.clone()
        },
        max_results: args.max_results,
        max_matches_per_file: args.max_matches_per_file,
        max_files_to_search: args.max_files,
        max_file_size: args.max_file_size.unwrap_or(defaults.max_file_size),
        batch_size: args.batch_size.unwrap_or(defaults.batch_size),
        use_ignore_files: !args.no_ignore,
        thread_count: args.threads.unwrap_or(defaults.thread_count),
        log_level: args
            .log_level
            .clone()
            .unwrap_or_else(|| defaults.log_level.clone()),
        ..defaults
    };

    let config = file_config.merge_with_cli(cli_config);
    config.validate()?;
    Ok(config)
}

fn build_engine(args: &CliSessionConfig) -> Result<SearchEngine> {
    let config = load_config(args)?;
    init_logging(&config.log_level);
    debug!("Roots: {:?}", config.roots);
    SearchEngine::from_config(config)
}

/// Logs go to stderr so stdout only carries results. `RUST_LOG` wins over
/// the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn open_with_spinner(engine: &SearchEngine, session: &SessionId) -> usize {
    let spinner = if io::stderr().is_terminal() {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Resolving files");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let count = engine.open_session(session);
    spinner.finish_and_clear();
    count
}

/// Writes every event of `run` as it arrives and returns what was delivered.
fn stream_run(run: QueryRun, json: bool, out: &mut impl Write) -> Result<SearchSummary> {
    let query = run.query().clone();
    let mut summary = SearchSummary::new();

    for event in run {
        if json {
            serde_json::to_writer(&mut *out, &event).map_err(io::Error::from)?;
            writeln!(out)?;
        } else {
            match &event {
                StreamEvent::FirstBatch(results) | StreamEvent::MoreResults(results) => {
                    for file_result in results {
                        print_file_result(file_result, &query, out)?;
                    }
                }
                StreamEvent::NoResults => writeln!(out, "No results found")?,
                StreamEvent::Done => {}
            }
        }
        out.flush()?;
        summary.add_batch(event.into_results());
    }
    Ok(summary)
}

/// Streams one interactive run under a header naming its query.
fn print_run(run: QueryRun, json: bool, out: &mut impl Write) -> Result<SearchSummary> {
    if !json {
        writeln!(out, "{} {}", "==>".cyan(), run.query())?;
    }
    stream_run(run, json, out)
}

fn print_file_result(result: &FileResult, query: &SearchQuery, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", result.relative_path.blue().bold())?;
    for m in &result.matches {
        let chars: Vec<char> = m.preview.chars().collect();
        let start = m.preview_column.min(chars.len());
        let end = (start + query.char_len()).min(chars.len());
        let before: String = chars[..start].iter().collect();
        let hit: String = chars[start..end].iter().collect();
        let after: String = chars[end..].iter().collect();

        writeln!(
            out,
            "  {}:{}: {}{}{}",
            m.line.to_string().green(),
            m.column + 1,
            before,
            hit.red().bold(),
            after
        )?;
    }
    Ok(())
}

fn print_stats(summary: &SearchSummary, engine: &SearchEngine) {
    let stats = engine.metrics().get_stats();
    println!(
        "Found {} matches in {} files",
        summary.total_matches, summary.files_with_matches
    );
    println!(
        "Scanned {} files ({} bytes), skipped {} oversized, {} unreadable",
        stats.files_scanned, stats.bytes_read, stats.files_oversized, stats.files_failed
    );
}

/// Each stdin line is submitted as a new query for the same session. A worker
/// drains runs in order; a run superseded by a later line stops at its next
/// batch and the worker moves on.
fn interactive(
    engine: &SearchEngine,
    session: &SessionId,
    filters: &QueryFilters,
    json: bool,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<QueryRun>();

    let worker = thread::spawn(move || {
        let stdout = io::stdout();
        for run in rx {
            let mut out = stdout.lock();
            if let Err(e) = print_run(run, json, &mut out) {
                error!("Failed to write results: {}", e);
                break;
            }
        }
    });

    for line in io::stdin().lock().lines() {
        let line = line?;
        match engine.submit_query_with(session, &line, filters)? {
            Some(run) => {
                if tx.send(run).is_err() {
                    break;
                }
            }
            None => debug!("Cleared query"),
        }
    }

    drop(tx);
    if worker.join().is_err() {
        error!("Result printer panicked");
    }
    engine.close_session(session);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use livescout::MemoryFileStore;
    use std::sync::Arc;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_for(query: &str) -> QueryRun {
        let store = Arc::new(MemoryFileStore::with_files("/ws", &[("a.txt", "needle")]));
        let engine = SearchEngine::new(SearchConfig::default(), store).unwrap();
        let session = SessionId::new("test");
        engine.open_session(&session);
        engine.submit_query(&session, query).unwrap().unwrap()
    }

    #[test]
    fn test_print_run_header_failure_is_reported() {
        let result = print_run(run_for("needle"), false, &mut BrokenPipe);
        assert!(matches!(result, Err(SearchError::IoError(_))));
    }

    #[test]
    fn test_print_run_writes_header_and_results() {
        colored::control::set_override(false);
        let mut out = Vec::new();
        let summary = print_run(run_for("needle"), false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("==> needle\n"));
        assert!(text.contains("a.txt"));
        assert_eq!(summary.files_with_matches, 1);
    }
}
