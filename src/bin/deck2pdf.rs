//! CLI binary for deck2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `CaptureConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use deck2pdf::filename::pdf_filename;
use deck2pdf::{
    inspect, CaptureConfig, CaptureObserver, CaptureOutput, DocumentSink, FileSink, Observer,
    ProgressEvent, StrategyKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Terminal observer: a spinner until the page count is known, then a bar
/// that restarts from zero if the run falls back to another strategy.
struct CliProgressObserver {
    bar: ProgressBar,
}

impl CliProgressObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Locating");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: u32) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(u64::from(total));
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Capturing");
    }
}

impl CaptureObserver for CliProgressObserver {
    fn on_capture_start(&self, total_pages: u32) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_pages} pages"))
        ));
    }

    fn on_strategy_start(&self, strategy: StrategyKind) {
        self.bar.set_position(0);
        self.bar.reset_eta();
        self.bar.println(format!("  {} via {}", cyan("→"), strategy));
    }

    fn on_progress(&self, event: ProgressEvent) {
        self.bar.set_position(u64::from(event.current));
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}",
            green("✓"),
            event.current,
            event.total
        ));
    }

    fn on_complete(&self) {
        self.bar.finish_and_clear();
    }

    fn on_error(&self, message: &str) {
        self.bar.finish_and_clear();
        let msg = if message.chars().count() > 100 {
            format!("{}\u{2026}", message.chars().take(99).collect::<String>())
        } else {
            message.to_string()
        };
        eprintln!("{} {}", red("✘"), red(&msg));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Capture into the current directory
  deck2pdf https://decks.example.com/view/abc123

  # Choose the output directory and file name
  deck2pdf https://decks.example.com/view/abc123 -o ~/Downloads --name board-update

  # Be gentler with a strict host
  deck2pdf --max-attempts 5 --retry-delay-ms 2000 https://decks.example.com/view/abc123

  # Only report the page count and title
  deck2pdf --inspect-only https://decks.example.com/view/abc123

  # JSON summary for scripting
  deck2pdf --json https://decks.example.com/view/abc123 > result.json

STRATEGIES:
  direct link       GET <document>/page_data/<n>, then download the image it names
  rendered capture  page through the live view and screenshot each page
                    (requires a build with --features browser and --browser)

  Direct link is tried first; on any failure the rendered capture restarts
  from page 1. --no-direct-link skips straight to rendered capture.

ENVIRONMENT VARIABLES:
  DECK2PDF_OUTPUT_DIR     Default output directory
  DECK2PDF_MAX_ATTEMPTS   Fetch attempts per request
  RUST_LOG                Override log filter (e.g. deck2pdf=debug)
"#;

/// Capture paginated web presentations into a single PDF.
#[derive(Parser, Debug)]
#[command(
    name = "deck2pdf",
    version,
    about = "Capture paginated web presentations into a single PDF",
    long_about = "Capture a hosted, page-at-a-time presentation into one PDF. The page count is \
discovered from the viewer itself; pages are fetched by direct image link where possible and \
captured from the rendered view otherwise.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document viewer URL.
    url: String,

    /// Directory to write the PDF into.
    #[arg(short, long, env = "DECK2PDF_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// File name (without .pdf) instead of one derived from the title.
    #[arg(long, env = "DECK2PDF_NAME")]
    name: Option<String>,

    /// Skip the direct-link strategy.
    #[arg(long, env = "DECK2PDF_NO_DIRECT_LINK")]
    no_direct_link: bool,

    /// Attempts per network fetch, including the first.
    #[arg(long, env = "DECK2PDF_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=20))]
    max_attempts: u32,

    /// Base backoff after a failed fetch, in milliseconds (multiplied by attempt number).
    #[arg(long, env = "DECK2PDF_RETRY_DELAY_MS", default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Pause after a page is ready and before it is captured, in milliseconds.
    #[arg(long, env = "DECK2PDF_SETTLE_MS", default_value_t = 1000)]
    settle_ms: u64,

    /// Pause after each viewport capture, in milliseconds.
    #[arg(long, env = "DECK2PDF_COOLDOWN_MS", default_value_t = 600)]
    cooldown_ms: u64,

    /// Longest wait for a page to report ready, in seconds.
    #[arg(long, env = "DECK2PDF_LOAD_TIMEOUT_SECS", default_value_t = 10)]
    load_timeout_secs: u64,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "DECK2PDF_HTTP_TIMEOUT", default_value_t = 30)]
    http_timeout: u64,

    /// Output a JSON summary instead of human-readable text.
    #[arg(long, env = "DECK2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DECK2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Print title and page count only, no capture.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DECK2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DECK2PDF_QUIET")]
    quiet: bool,

    /// Open the document in headless Chrome (enables rendered capture).
    #[cfg(feature = "browser")]
    #[arg(long, env = "DECK2PDF_BROWSER")]
    browser: bool,

    /// Chrome/Chromium binary to launch.
    #[cfg(feature = "browser")]
    #[arg(long, env = "DECK2PDF_CHROME")]
    chrome_path: Option<PathBuf>,

    /// Show the browser window.
    #[cfg(feature = "browser")]
    #[arg(long)]
    headed: bool,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    path: &'a Path,
    #[serde(flatten)]
    output: &'a CaptureOutput,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&cli.url, &config)
            .await
            .context("Failed to inspect document")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize document info")?
            );
        } else {
            println!("URL:          {}", info.url);
            if let Some(ref t) = info.title {
                println!("Title:        {}", t);
            }
            println!("Pages:        {}", info.total_pages);
            println!("Showing page: {}", info.current_page);
            println!("Found via:    {:?}", info.method);
            println!("File name:    {}", info.filename);
        }
        return Ok(());
    }

    // ── Run capture ──────────────────────────────────────────────────────
    let observer: Option<Observer> = if show_progress {
        Some(CliProgressObserver::new() as Arc<dyn CaptureObserver>)
    } else {
        None
    };

    let mut output = run_capture(&cli, &config, observer)
        .await
        .context("Capture failed")?;

    if let Some(ref name) = cli.name {
        output.filename = pdf_filename(Some(name), &config.default_filename);
    }
    let path = FileSink::new(cli.output_dir.clone())
        .save(&output.filename, &output.pdf)
        .await
        .context("Failed to save PDF")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&JsonSummary {
            path: &path,
            output: &output,
        })
        .context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        eprintln!(
            "{}  {} pages via {}  {}ms  →  {}",
            green("✔"),
            output.page_count,
            output.strategy,
            output.stats.total_duration_ms,
            bold(&path.display().to_string()),
        );
        if let Some(ref reason) = output.stats.fallback_reason {
            eprintln!("   {} {}", dim("direct link failed:"), dim(reason));
        }
    }

    Ok(())
}

#[cfg(not(feature = "browser"))]
async fn run_capture(
    cli: &Cli,
    config: &CaptureConfig,
    observer: Option<Observer>,
) -> Result<CaptureOutput> {
    Ok(deck2pdf::capture_url(&cli.url, config, observer).await?)
}

#[cfg(feature = "browser")]
async fn run_capture(
    cli: &Cli,
    config: &CaptureConfig,
    observer: Option<Observer>,
) -> Result<CaptureOutput> {
    use deck2pdf::browser::{BrowserOptions, BrowserSession};
    use deck2pdf::{
        Capturer, DirectLinkSource, HttpTransport, RenderedCaptureSource, ReqwestTransport,
        StrategySet,
    };

    if !cli.browser {
        return Ok(deck2pdf::capture_url(&cli.url, config, observer).await?);
    }

    let options = BrowserOptions {
        chrome_path: cli.chrome_path.clone(),
        headless: !cli.headed,
        ..BrowserOptions::default()
    };
    let session = Arc::new(
        BrowserSession::open(&cli.url, &options)
            .await
            .context("Failed to open the document in the browser")?,
    );

    let result = async {
        let probe = session.probe().await?;
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(config.http_timeout_secs, &config.user_agent)?);
        let direct = DirectLinkSource::new(transport, &cli.url, config)?;
        let rendered = RenderedCaptureSource::new(session.clone(), config);

        let mut capturer = Capturer::new(config.clone());
        if let Some(obs) = observer {
            capturer = capturer.with_observer(obs);
        }
        capturer
            .capture(&cli.url, &probe, StrategySet::with_fallback(&direct, &rendered))
            .await
    }
    .await;

    session.close().await;
    Ok(result?)
}

/// Map CLI args to `CaptureConfig`.
fn build_config(cli: &Cli) -> Result<CaptureConfig> {
    CaptureConfig::builder()
        .max_attempts(cli.max_attempts)
        .base_delay(Duration::from_millis(cli.retry_delay_ms))
        .settle_delay(Duration::from_millis(cli.settle_ms))
        .capture_cooldown(Duration::from_millis(cli.cooldown_ms))
        .load_timeout(Duration::from_secs(cli.load_timeout_secs))
        .http_timeout_secs(cli.http_timeout)
        .use_direct_link(!cli.no_direct_link)
        .build()
        .context("Invalid configuration")
}
