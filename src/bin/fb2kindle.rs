//! CLI binary for fb2kindle.
//!
//! A thin shim over the library crate: `convert` runs files through the job
//! scheduler, `console` runs the chat front-end over stdin/stdout.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fb2kindle::{
    Bot, BotConfig, ConsoleTransport, ConversionOutcome, ConversionRequest, ConverterConfig,
    IncomingDocument, JobEvents, JobScheduler, MemoryUserStore, Profile, Update,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI job events using indicatif ───────────────────────────────────────────

/// Renders one bar for the whole batch and a line per finished job.
struct CliJobEvents {
    bar: ProgressBar,
    names: Mutex<HashMap<u64, String>>,
    failures: AtomicUsize,
}

impl CliJobEvents {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} books  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            names: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
        })
    }

    fn name(&self, job_id: u64) -> String {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
            .unwrap_or_else(|| format!("job {job_id}"))
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl JobEvents for CliJobEvents {
    fn on_job_submitted(&self, job_id: u64, request: &ConversionRequest) {
        let name = request
            .input_path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.input_path().display().to_string());
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, name);
    }

    fn on_job_started(&self, job_id: u64) {
        self.bar.set_message(self.name(job_id));
    }

    fn on_output_line(&self, _job_id: u64, line: &str) {
        let line: String = line.chars().take(60).collect();
        self.bar.set_message(dim(&line));
    }

    fn on_job_complete(&self, job_id: u64, outcome: &ConversionOutcome) {
        let name = self.name(job_id);
        if outcome.is_success() {
            let elapsed = outcome.elapsed().unwrap_or_default();
            self.bar
                .println(format!("  {} {}  {}", green("✓"), name, dim(elapsed)));
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
            self.bar
                .println(format!("  {} {}  {}", red("✗"), name, red(outcome.message())));
        }
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one book, keep it local
  fb2kindle --converter-path /opt/fb2converter convert book.fb2

  # Convert and mail to a Kindle, four at a time, ten minute limit each
  fb2kindle --jobs 4 --timeout 600 convert --email me@kindle.com *.fb2

  # Settings from a JSON file, outcomes as JSON
  fb2kindle --config converter.json convert --json book.fb2.zip

  # Talk to the bot front-end in the terminal
  fb2kindle console --admin-chat-id 1
  > /start
  > /email me@kindle.com
  > /doc ./book.fb2

ENVIRONMENT VARIABLES:
  FB2KINDLE_CONFIG          JSON file with converter settings
  FB2KINDLE_CONVERTER_PATH  Directory containing the converter's run.sh
  FB2KINDLE_JOBS            Maximum concurrent conversions
  FB2KINDLE_TIMEOUT         Per-conversion timeout in seconds
  RUST_LOG                  Override the log filter
"#;

/// Convert fb2 books for Kindle through an external converter.
#[derive(Parser, Debug)]
#[command(
    name = "fb2kindle",
    version,
    about = "Convert fb2 books for Kindle through an external converter",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    /// JSON file with converter settings. Flags below override it.
    #[arg(long, global = true, env = "FB2KINDLE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory containing the converter's run.sh.
    #[arg(long, global = true, env = "FB2KINDLE_CONVERTER_PATH")]
    converter_path: Option<PathBuf>,

    /// Maximum number of conversions running at once.
    #[arg(short, long, global = true, env = "FB2KINDLE_JOBS")]
    jobs: Option<usize>,

    /// Per-conversion timeout in seconds.
    #[arg(long, global = true, env = "FB2KINDLE_TIMEOUT")]
    timeout: Option<u64>,

    /// Delete the input file after conversion.
    #[arg(long, global = true)]
    delete_input: bool,

    /// Delete the converted file after a successful conversion.
    #[arg(long, global = true)]
    delete_output: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FB2KINDLE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FB2KINDLE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Convert one or more books.
    Convert(ConvertArgs),
    /// Run the chat front-end on stdin/stdout.
    Console(ConsoleArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// .fb2 or .fb2.zip files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Requester id passed to the converter.
    #[arg(long, default_value_t = 0)]
    chat_id: i64,

    /// Kindle address to mail the result to. Empty skips mailing.
    #[arg(long, env = "FB2KINDLE_EMAIL", default_value = "")]
    email: String,

    /// Use the profile without embedded fonts.
    #[arg(long)]
    no_fonts: bool,

    /// Print outcomes as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "FB2KINDLE_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ConsoleArgs {
    /// Chat id used for every line typed.
    #[arg(long, default_value_t = 1)]
    chat_id: i64,

    /// First name used in the greeting.
    #[arg(long, default_value = "reader")]
    first_name: String,

    /// Chat allowed to run /users.
    #[arg(long)]
    admin_chat_id: Option<i64>,

    /// Where received documents are stored.
    #[arg(long, env = "FB2KINDLE_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = match &cli.mode {
        Mode::Convert(args) => !cli.quiet && !args.no_progress && !args.json,
        Mode::Console(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    match cli.mode {
        Mode::Convert(ref args) => run_convert(args, config, show_progress, cli.quiet).await,
        Mode::Console(ref args) => run_console(args, config).await,
    }
}

/// Layer CLI flags over the JSON config (or the defaults).
fn build_config(cli: &Cli) -> Result<ConverterConfig> {
    let base = match &cli.config {
        Some(path) => ConverterConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConverterConfig::default(),
    };

    let mut builder = base.into_builder();
    if let Some(ref path) = cli.converter_path {
        builder = builder.converter_path(path);
    }
    if let Some(jobs) = cli.jobs {
        builder = builder.max_concurrent_jobs(jobs);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.timeout_secs(secs);
    }
    if cli.delete_input {
        builder = builder.delete_input_file(true);
    }
    if cli.delete_output {
        builder = builder.delete_output_file(true);
    }
    builder.build().context("Invalid configuration")
}

async fn run_convert(
    args: &ConvertArgs,
    config: ConverterConfig,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let mut scheduler = JobScheduler::new(config).context("Failed to start scheduler")?;
    let events = show_progress.then(|| CliJobEvents::new(args.inputs.len()));
    if let Some(ref events) = events {
        scheduler = scheduler.events(Arc::clone(events) as Arc<dyn JobEvents>);
    }

    let profile = Profile::for_embed_fonts(!args.no_fonts);
    let handles: Vec<_> = args
        .inputs
        .iter()
        .map(|input| {
            let request = ConversionRequest::new(input, args.chat_id, args.email.clone(), profile);
            scheduler.submit(request)
        })
        .collect();
    let outcomes = futures::future::join_all(handles).await;

    if let Some(ref events) = events {
        events.finish();
    }

    if args.json {
        let report: Vec<_> = args
            .inputs
            .iter()
            .zip(&outcomes)
            .map(|(input, outcome)| serde_json::json!({ "input": input, "outcome": outcome }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise outcomes")?
        );
    } else if !quiet && !show_progress {
        for (input, outcome) in args.inputs.iter().zip(&outcomes) {
            print_outcome(input, outcome);
        }
    }

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    if !quiet && !args.json {
        eprintln!(
            "{} {}/{} books converted",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&(outcomes.len() - failed).to_string()),
            outcomes.len()
        );
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} conversions failed", outcomes.len());
    }
    Ok(())
}

fn print_outcome(input: &Path, outcome: &ConversionOutcome) {
    match outcome.output_path() {
        Some(path) if outcome.is_success() => {
            println!("{} → {}", input.display(), path.display())
        }
        _ => println!("{}: {}", input.display(), outcome.message()),
    }
}

async fn run_console(args: &ConsoleArgs, config: ConverterConfig) -> Result<()> {
    let scheduler = JobScheduler::new(config).context("Failed to start scheduler")?;
    let mut bot_config = BotConfig {
        admin_chat_id: args.admin_chat_id,
        ..BotConfig::default()
    };
    if let Some(ref dir) = args.data_dir {
        bot_config.data_dir = dir.clone();
    }
    let bot = Bot::new(
        bot_config,
        Arc::new(ConsoleTransport::stdout()),
        Arc::new(MemoryUserStore::new()),
        Arc::new(scheduler),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = Vec::new();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(handle) = bot.handle(parse_console_line(args, line)) {
            pending.push(handle);
        }
    }

    // Let queued conversions reply before exiting.
    futures::future::join_all(pending).await;
    Ok(())
}

/// `/doc <path>` uploads a local file; anything else is chat text.
fn parse_console_line(args: &ConsoleArgs, line: &str) -> Update {
    match line.strip_prefix("/doc ") {
        Some(path) => {
            let path = path.trim();
            let file_name = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string());
            Update::Document {
                chat_id: args.chat_id,
                document: IncomingDocument {
                    file_id: path.to_string(),
                    file_name,
                    sender_id: args.chat_id,
                },
            }
        }
        None => Update::Text {
            chat_id: args.chat_id,
            first_name: args.first_name.clone(),
            text: line.to_string(),
        },
    }
}
