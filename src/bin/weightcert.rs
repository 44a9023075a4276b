//! CLI binary for weightcert.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use weightcert::{
    default_output_path, extract_file, write_record, CacheMode, ExtractionConfig, ExtractionOutput,
    ExtractionProgressCallback, ProgressCallback, SchemaChoice, ValidationResult,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page. Pages complete out of
/// order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_extraction_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Reading");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, line_count: usize) {
        let secs = self.elapsed_secs(page_num);
        let mark = if line_count == 0 { yellow("○") } else { green("✓") };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            mark,
            page_num,
            total,
            dim(&format!("{line_count:>4} lines")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, weights_found: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages read, {} weights found",
            green("✔"),
            bold(&total_pages.to_string()),
            bold(&weights_found.to_string())
        );
    }
}

impl Drop for CliProgressCallback {
    fn drop(&mut self) {
        // A fatal error skips on_extraction_complete; don't leave the bar behind.
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract and print the record as JSON
  weightcert CM-25-181B.pdf

  # Write the record next to the PDF (CM-25-181B_converted.json)
  weightcert --save CM-25-181B.pdf

  # Write to a chosen file and check it against the built-in schema
  weightcert CM-25-181B.pdf -o record.json --validate

  # Custom schema; exit non-zero if the record does not conform
  weightcert CM-25-181B.pdf --schema cert.schema.json --strict

  # Full output: record, warnings, validation result and run statistics
  weightcert --json CM-25-181B.pdf > run.json

  # Higher DPI for a faint scan, persistent page cache
  weightcert --dpi 300 --cache-dir ~/.cache/weightcert scan.pdf

EXIT STATUS:
  0  record extracted (and valid, when --strict)
  1  fatal error (missing engine, unreadable PDF, no text on any page, …)
  2  --strict and the record does not conform to the schema

ENVIRONMENT VARIABLES:
  WEIGHTCERT_OUTPUT        Same as -o
  WEIGHTCERT_DPI           Rendering DPI
  WEIGHTCERT_CACHE_DIR     Persistent page-image cache directory
  WEIGHTCERT_TESSERACT     Path to the tesseract binary
  WEIGHTCERT_PDFIUM_LIB    Path to libpdfium (file or directory)
  WEIGHTCERT_LANG          Tesseract language (default: eng)
  RUST_LOG                 Log filter, overrides -v / -q

SETUP:
  Needs the pdfium shared library and tesseract (4.x or 5.x) with the
  language data for --lang installed.
"#;

/// Extract structured records from scanned weight-calibration certificates.
#[derive(Parser, Debug)]
#[command(
    name = "weightcert",
    version,
    about = "Extract structured records from scanned weight-calibration certificates",
    long_about = "Rasterise a scanned calibration-certificate PDF, OCR every page with tesseract, \
and rebuild the certificate header fields and weight tables into a JSON record. \
Optionally validates the record against a JSON Schema.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Certificate PDF.
    input: PathBuf,

    /// Write the record JSON to this file instead of stdout.
    #[arg(short, long, env = "WEIGHTCERT_OUTPUT", conflicts_with = "save")]
    output: Option<PathBuf>,

    /// Write the record next to the input as `<stem>_converted.json`.
    #[arg(long)]
    save: bool,

    /// Print the full run output (record, warnings, validation, stats) as JSON.
    #[arg(long, env = "WEIGHTCERT_JSON")]
    json: bool,

    /// Validate against the built-in certificate schema.
    #[arg(long, conflicts_with = "schema")]
    validate: bool,

    /// Validate against a JSON Schema file.
    #[arg(long, env = "WEIGHTCERT_SCHEMA")]
    schema: Option<PathBuf>,

    /// Exit with status 2 when the record does not conform to the schema.
    #[arg(long, env = "WEIGHTCERT_STRICT")]
    strict: bool,

    /// Rendering DPI (72–600; 150–300 recommended).
    #[arg(long, env = "WEIGHTCERT_DPI", default_value_t = 180,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Keep rendered pages in this directory across runs.
    #[arg(long, env = "WEIGHTCERT_CACHE_DIR", conflicts_with = "no_cache")]
    cache_dir: Option<PathBuf>,

    /// Do not cache rendered pages at all.
    #[arg(long)]
    no_cache: bool,

    /// Number of pages rasterised and OCR'd concurrently.
    #[arg(short, long, env = "WEIGHTCERT_CONCURRENCY", default_value_t = 4,
          value_parser = clap::value_parser!(u64).range(1..=64))]
    concurrency: u64,

    /// Per-page timeout for rendering and for OCR, in seconds.
    #[arg(long, env = "WEIGHTCERT_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Tesseract language(s), e.g. `eng` or `eng+deu`.
    #[arg(long, env = "WEIGHTCERT_LANG", default_value = "eng")]
    lang: String,

    /// Path to the tesseract binary.
    #[arg(long, env = "WEIGHTCERT_TESSERACT")]
    tesseract: Option<PathBuf>,

    /// Path to the pdfium shared library or its directory.
    #[arg(long, env = "WEIGHTCERT_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "WEIGHTCERT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "WEIGHTCERT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "WEIGHTCERT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v asks for everything.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract_file(&cli.input, &config)
        .await
        .with_context(|| format!("Extraction of {} failed", cli.input.display()))?;

    let target = match (&cli.output, cli.save) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => Some(default_output_path(&cli.input)),
        (None, false) => None,
    };

    if let Some(ref path) = target {
        write_record(path, &output.record)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if target.is_none() {
        let json = output.record.to_json_pretty().context("Failed to serialise record")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(json.as_bytes())
            .and_then(|_| handle.write_all(b"\n"))
            .context("Failed to write to stdout")?;
    }

    if !cli.quiet {
        print_summary(&output, target.as_ref());
    }

    if cli.strict && matches!(output.validation, Some(ValidationResult::Invalid(_))) {
        std::process::exit(2);
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let schema = if let Some(ref path) = cli.schema {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read schema from {:?}", path))?;
        let value: serde_json::Value =
            serde_json::from_str(&text).with_context(|| format!("Schema {:?} is not JSON", path))?;
        SchemaChoice::Custom(value)
    } else if cli.validate {
        SchemaChoice::BuiltIn
    } else {
        SchemaChoice::None
    };

    let cache = match (&cli.cache_dir, cli.no_cache) {
        (_, true) => CacheMode::Disabled,
        (Some(dir), false) => CacheMode::Directory(dir.clone()),
        (None, false) => CacheMode::Memory,
    };

    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency as usize)
        .page_timeout_secs(cli.timeout)
        .cache(cache)
        .schema(schema)
        .ocr_language(cli.lang.clone());

    if let Some(ref path) = cli.tesseract {
        builder = builder.tesseract_binary(path);
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_library(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Run summary on stderr: counts, warnings and the validation outcome.
fn print_summary(output: &ExtractionOutput, written: Option<&PathBuf>) {
    let record = &output.record;
    let stats = &output.stats;

    eprintln!(
        "{}  {}  {} top-level + {} in {} sets  {}ms{}",
        if output.warnings.is_empty() { green("✔") } else { cyan("⚠") },
        bold(record.metadata.certificate_number.as_deref().unwrap_or("(no certificate number)")),
        stats.top_level_weights,
        stats.set_weights,
        stats.weight_sets,
        stats.total_duration_ms,
        written
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default(),
    );

    for warning in &output.warnings {
        eprintln!("   {} {}", yellow("!"), dim(&warning.to_string()));
    }

    match output.validation {
        Some(ValidationResult::Valid) => eprintln!("   {} record conforms to the schema", green("✓")),
        Some(ValidationResult::Invalid(ref violations)) => {
            eprintln!("   {} {} schema violation(s)", red("✗"), violations.len());
            for v in violations {
                eprintln!("     {}  {}", bold(&v.path), dim(&v.message));
            }
        }
        None => {}
    }
}
