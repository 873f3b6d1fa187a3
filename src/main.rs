use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use diff_collection::diff::raw::RawDiff;
use diff_collection::{
    CollectionOptions, Config, Diff, DiffCollection, DiffCollectionError, OutputError, SourceError,
    UnifiedDiffReader,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "diff-collection")]
#[command(about = "Collect git diffs under file, line and byte limits")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML file with [limits] and [patch] tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read `git diff` output and collect it
    Collect {
        /// Diff file to read instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,

        #[command(flatten)]
        limits: LimitArgs,

        #[arg(long, value_enum, default_value_t = Format::Summary)]
        format: Format,
    },
    /// Compare two revisions of a repository
    #[cfg(feature = "git")]
    Compare {
        base: String,
        head: String,

        /// Only diff these paths
        paths: Vec<String>,

        /// Repository path
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Diff the trees directly instead of against the merge base
        #[arg(long)]
        straight: bool,

        #[arg(long)]
        ignore_whitespace_change: bool,

        #[command(flatten)]
        limits: LimitArgs,

        #[arg(long, value_enum, default_value_t = Format::Summary)]
        format: Format,
    },
    /// Print shell completions
    Completions { shell: clap_complete::Shell },
    /// Print the man page
    Man,
}

/// Command-line overrides for the configured limits
#[derive(Args)]
struct LimitArgs {
    #[arg(long)]
    max_files: Option<usize>,

    #[arg(long)]
    max_lines: Option<usize>,

    #[arg(long)]
    max_bytes: Option<usize>,

    /// Collect everything regardless of limits
    #[arg(long)]
    no_limits: bool,

    /// Collapse large diffs and diffs past the safe limits
    #[arg(long)]
    collapse: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Summary,
    Json,
}

impl LimitArgs {
    fn apply(&self, mut options: CollectionOptions) -> CollectionOptions {
        if let Some(n) = self.max_files {
            options.max_files = n;
        }
        if let Some(n) = self.max_lines {
            options.max_lines = n;
        }
        if self.max_bytes.is_some() {
            options.max_bytes = self.max_bytes;
        }
        if self.no_limits {
            options.limits = false;
        }
        if self.collapse {
            options.expanded = false;
        }
        options
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Collect { input, limits, format } => {
            let reader: Box<dyn BufRead> = match input {
                Some(path) => {
                    let file = File::open(&path).map_err(|e| SourceError::Read {
                        message: format!("{}: {e}", path.display()),
                    })?;
                    Box::new(BufReader::new(file))
                }
                None => Box::new(io::stdin().lock()),
            };
            let options = limits.apply(config.to_options());
            let mut collection = DiffCollection::new(UnifiedDiffReader::new(reader), options);
            write_collection(&mut collection, format)?;
        }
        #[cfg(feature = "git")]
        Commands::Compare {
            base,
            head,
            paths,
            repo,
            straight,
            ignore_whitespace_change,
            limits,
            format,
        } => {
            let repository = git2::Repository::discover(&repo).map_err(|e| {
                diff_collection::CompareError::Backend {
                    message: e.message().to_string(),
                }
            })?;
            let compare_options = diff_collection::CompareOptions {
                straight,
                ignore_whitespace_change,
                paths,
            };
            let mut comparison = diff_collection::collect_comparison(
                &diff_collection::GitCompare::new(&repository),
                &base,
                &head,
                &compare_options,
                limits.apply(config.to_options()),
            )?;
            if let Format::Summary = format {
                eprintln!("{} commit(s) between {base} and {head}", comparison.commits.len());
            }
            write_collection(&mut comparison.diffs, format)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "diff-collection",
                &mut io::stdout(),
            );
        }
        Commands::Man => {
            clap_mangen::Man::new(Cli::command())
                .render(&mut io::stdout())
                .map_err(write_error)?;
        }
    }

    Ok(())
}

fn write_error(e: io::Error) -> OutputError {
    OutputError::Write {
        message: e.to_string(),
    }
}

fn write_collection<'a, I, R, E>(
    collection: &mut DiffCollection<I>,
    format: Format,
) -> Result<(), DiffCollectionError>
where
    I: Iterator<Item = Result<R, E>>,
    R: Into<RawDiff<'a>>,
    DiffCollectionError: From<E>,
{
    let mut out = io::stdout().lock();

    match format {
        Format::Json => {
            let export = collection.export()?;
            serde_json::to_writer_pretty(&mut out, &export).map_err(|e| OutputError::Serialize {
                message: e.to_string(),
            })?;
            writeln!(out).map_err(write_error)?;
        }
        Format::Summary => {
            let mut index = 0;
            while let Some(diff) = collection.get(index)? {
                writeln!(out, "{}", summary_line(diff)).map_err(write_error)?;
                index += 1;
            }
            let real_size = collection.real_size()?;
            let line_count = collection.line_count()?;
            let written = match collection.overflow_reason()? {
                Some(reason) => writeln!(
                    out,
                    "{real_size} files, {line_count} lines (stopped: {reason:?})"
                ),
                None => writeln!(out, "{real_size} files, {line_count} lines"),
            };
            written.map_err(write_error)?;
        }
    }

    Ok(())
}

fn summary_line(diff: &Diff) -> String {
    let status = if diff.is_new_file() {
        'A'
    } else if diff.is_deleted_file() {
        'D'
    } else if diff.is_renamed_file() {
        'R'
    } else {
        'M'
    };
    let path = if diff.is_renamed_file() {
        format!("{} -> {}", diff.old_path(), diff.new_path())
    } else {
        diff.new_path().to_string()
    };
    let detail = if diff.is_too_large() {
        "too large".to_string()
    } else if diff.is_collapsed() {
        "collapsed".to_string()
    } else if diff.is_binary() {
        "binary".to_string()
    } else if diff.is_submodule_change() {
        "submodule".to_string()
    } else {
        format!("{} lines", diff.line_count())
    };

    format!("{status} {path} ({detail})")
}
