//! CLI entry point for `mailscan`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use mailscan::classify::{Policy, Predicate};
use mailscan::config::Config;
use mailscan::parser::multipart::Walker;
use mailscan::scan::{inspect, PathQueue, ScanOptions, Scanner};

/// Find MIME attachments in mail files and flag messages that match a
/// detection policy.
#[derive(Parser)]
#[command(name = "mailscan", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Message files or directories to scan
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Detection policy (overrides the config file)
    #[arg(short, long, value_enum, global = true)]
    policy: Option<Policy>,

    /// Maximum multipart nesting depth
    #[arg(long, value_name = "N", global = true)]
    max_depth: Option<usize>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan messages and print the labels of flagged ones
    Scan {
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
        /// Print one JSON report per message
        #[arg(long)]
        json: bool,
        /// Show a progress spinner
        #[arg(long)]
        progress: bool,
    },
    /// List attachments, optionally writing them to a directory
    Attachments {
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
        /// Directory to extract decoded attachments into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = mailscan::config::load_config();

    // Configure logging: stderr + optional log file
    setup_logging(log_level(cli.verbose, &config.general.log_level), &config);

    let mut options = ScanOptions::from_config(&config.scan);
    if let Some(policy) = cli.policy {
        options.policy = policy;
    }
    if let Some(depth) = cli.max_depth {
        options.walker = Walker::new(depth);
    }

    match cli.command {
        Some(Commands::Scan {
            paths,
            json,
            progress,
        }) => {
            options.json = json || config.output.json;
            cmd_scan(paths, options, progress)
        }
        Some(Commands::Attachments { paths, output }) => {
            cmd_attachments(paths, &options, output.as_deref())
        }
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
        None => {
            if cli.paths.is_empty() {
                Cli::command().print_help()?;
                return Ok(());
            }
            options.json = config.output.json;
            cmd_scan(cli.paths, options, false)
        }
    }
}

/// Pick the log filter: the configured level, raised by each `-v`.
fn log_level(verbose: u8, configured: &str) -> &str {
    match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_dir = mailscan::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailscan.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn cmd_scan(paths: Vec<PathBuf>, options: ScanOptions, progress: bool) -> anyhow::Result<()> {
    let start = Instant::now();
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    let mut scanner = Scanner::new(options, stdout.lock(), stderr.lock());

    let summary = if progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} Scanning {pos} message(s) [{elapsed_precise}]")
                .expect("valid template"),
        );
        let summary = scanner.run(
            paths,
            Some(&|processed| {
                pb.set_position(processed as u64);
            }),
        )?;
        pb.finish_and_clear();
        summary
    } else {
        scanner.run(paths, None)?
    };

    tracing::debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        policy = %options.policy,
        scanned = summary.scanned,
        "Batch complete"
    );
    Ok(())
}

fn cmd_attachments(
    paths: Vec<PathBuf>,
    options: &ScanOptions,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    if let Some(dir) = output {
        std::fs::create_dir_all(dir)?;
    }

    let mut stdout = std::io::stdout().lock();
    let mut messages = 0usize;
    let mut extracted = 0usize;

    for path in PathQueue::new(paths) {
        let inspection = match inspect(&path, options) {
            Ok(inspection) => inspection,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping message");
                continue;
            }
        };
        messages += 1;

        writeln!(stdout, "{}  ({})", inspection.label, path.display())?;
        let found = &inspection.attachments.value;
        if found.is_empty() {
            writeln!(stdout, "    (no attachments)")?;
        }
        for att in found {
            let flag = if options.policy.matches(att) { "*" } else { " " };
            writeln!(
                stdout,
                "  {flag} {:<40} {:>10}  {:<28} depth {}",
                att.name,
                format_size(att.size(), BINARY),
                att.content_type.as_deref().unwrap_or("-"),
                att.depth
            )?;
        }
        for anomaly in &inspection.attachments.anomalies {
            writeln!(stdout, "    ! {anomaly}")?;
        }

        if let Some(dir) = output {
            let written = mailscan::export::attachment::export_message_attachments(
                &inspection.label,
                found,
                dir,
            )?;
            extracted += written.len();
        }
    }

    if let Some(dir) = output {
        writeln!(
            stdout,
            "  Extracted {} attachment(s) from {} message(s) to {}",
            extracted,
            messages,
            dir.display()
        )?;
    }
    Ok(())
}

fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailscan", &mut std::io::stdout());
    Ok(())
}

fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
