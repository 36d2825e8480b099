//! CLI binary for pdf-redact.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `RedactionConfig`, prints results, and turns errors into exit codes.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_redact::{
    block_on_detached, explode, inspect, load_regions_file, merge, redact, FillColor,
    InspectBackend, PipelineState, ProgressCallback, RasterBackend, RedactError, RedactionConfig,
    RedactionProgressCallback, RedactionRegion,
};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner naming the current state, switching to a bar
/// while pages are being redacted.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
    }
}

impl RedactionProgressCallback for CliProgressCallback {
    fn on_state_change(&self, _from: PipelineState, to: PipelineState) {
        let label = match to {
            PipelineState::Rasterizing => "Rendering",
            PipelineState::Redacting => "Redacting",
            PipelineState::Reassembling => "Assembling",
            PipelineState::Scrubbing => "Scrubbing",
            PipelineState::Verified => "Verified",
            PipelineState::Delivered => "Delivered",
            PipelineState::Failed => "Failed",
            PipelineState::Created => "Preparing",
        };
        self.bar.set_prefix(label);
        self.bar.set_message("");
    }

    fn on_pages_rendered(&self, total_pages: usize) {
        self.bar
            .println(format!("  {} {} pages rasterised", green("✓"), total_pages));
    }

    fn on_page_redacted(&self, page_num: usize, total_pages: usize, regions: usize) {
        if self.bar.length() != Some(total_pages as u64) {
            self.activate_bar(total_pages);
        }
        self.bar.println(format!(
            "  {} Page {:>3}  {}",
            green("✓"),
            page_num,
            dim(&format!("{regions} region(s)"))
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, redacted_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages sanitized, {} redacted",
            green("✔"),
            bold(&total_pages.to_string()),
            redacted_pages
        );
    }

    fn on_run_failed(&self, _error: &str) {
        self.bar.abandon();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Flatten and scrub (writes leak-final.pdf)
  redact leak.pdf

  # Black out a 400x40 px box on page 2 at 150 DPI
  redact leak.pdf --region 2:100,120,400,40 --out clean.pdf

  # Regions from a file, higher resolution
  redact leak.pdf --regions-file regions.json --resolution 300

  # Manual workflow: explode, edit the PNGs, merge
  redact leak.pdf --explode --out leak_pages/
  redact leak_pages/ --merge --out leak-final.pdf

  # List metadata fields of a document
  redact --inspect-only leak.pdf --inspector exiftool

REGIONS FILE:
  [ { "page": 1, "x": 100, "y": 120, "width": 400, "height": 40 } ]
  Pages are 1-indexed. Coordinates are pixels of the page rendered at
  --resolution, measured from the top-left corner.

EXIT CODES:
  0      success
  1      usage, configuration or I/O error
  2      document cannot be opened or rendered
  3      a page failed to rasterise
  4      invalid or out-of-bounds redaction region
  5      reassembly failed
  6      a stage timed out
  7      external tool unavailable or failed
  10-19  metadata still present after scrubbing (10 + field count, max 19)

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH   Path to libpdfium (file or directory)
  RUST_LOG          Override log filter (e.g. pdf_redact=debug)
"#;

/// Sanitize PDF documents for publication.
#[derive(Parser, Debug)]
#[command(
    name = "redact",
    version,
    about = "Flatten, redact and scrub PDF documents before publication",
    long_about = "Render every page of a PDF to pixels, burn in redaction boxes, and rebuild a \
new PDF with no text layer, no scripts and no metadata. The output is verified metadata-free \
before it is written.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF to sanitize (or, with --merge, a directory of page images).
    input: PathBuf,

    /// Output file (or directory with --explode).
    #[arg(short, long, env = "REDACT_OUT")]
    out: Option<PathBuf>,

    /// Rendering resolution in DPI (72–600). Region coordinates use this scale.
    #[arg(short, long, env = "REDACT_RESOLUTION", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    resolution: u32,

    /// Region to black out, as PAGE:X,Y,W,H (1-indexed page). Repeatable.
    #[arg(long = "region", env = "REDACT_REGIONS", value_delimiter = ';')]
    regions: Vec<RedactionRegion>,

    /// JSON file with regions: [{"page":1,"x":..,"y":..,"width":..,"height":..}].
    #[arg(long, env = "REDACT_REGIONS_FILE")]
    regions_file: Option<PathBuf>,

    /// Fill colour for regions, RRGGBB or black/white.
    #[arg(long, env = "REDACT_FILL", default_value = "000000")]
    fill: FillColor,

    /// Page renderer.
    #[arg(long, env = "REDACT_RASTERIZER", value_enum, default_value = "pdfium")]
    rasterizer: RasterArg,

    /// Metadata checker used to verify the output.
    #[arg(long, env = "REDACT_INSPECTOR", value_enum, default_value = "lopdf")]
    inspector: InspectArg,

    /// Time budget per stage, in seconds.
    #[arg(long, env = "REDACT_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Pages redacted in parallel.
    #[arg(short, long, env = "REDACT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Longest rendered page edge in pixels; larger pages fail the run.
    #[arg(long, env = "REDACT_MAX_PIXELS", default_value_t = 10_000)]
    max_pixels: u32,

    /// PDF user password for encrypted documents. Prefer the REDACT_PASSWORD
    /// env var; with --rasterizer poppler the password is passed to pdftoppm
    /// on its command line, where other local users can see it.
    #[arg(long, env = "REDACT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Parent directory for the per-run working area.
    #[arg(long, env = "REDACT_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Path to libpdfium (file or directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Write page PNGs for manual editing instead of a PDF.
    #[arg(long, conflicts_with_all = ["merge", "inspect_only"])]
    explode: bool,

    /// Treat INPUT as a directory of page images and build a sanitized PDF.
    #[arg(long, conflicts_with = "inspect_only")]
    merge: bool,

    /// List metadata fields of INPUT and exit.
    #[arg(long)]
    inspect_only: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "REDACT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "REDACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "REDACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "REDACT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RasterArg {
    Pdfium,
    Poppler,
}

impl From<RasterArg> for RasterBackend {
    fn from(v: RasterArg) -> Self {
        match v {
            RasterArg::Pdfium => RasterBackend::Pdfium,
            RasterArg::Poppler => RasterBackend::Poppler,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum InspectArg {
    Lopdf,
    Exiftool,
}

impl From<InspectArg> for InspectBackend {
    fn from(v: InspectArg) -> Self {
        match v {
            InspectArg::Lopdf => InspectBackend::Lopdf,
            InspectArg::Exiftool => InspectBackend::Exiftool,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; -v always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
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

    // A timed-out pdfium render keeps its blocking thread; don't wait for it.
    let outcome = block_on_detached(run(&cli, show_progress))
        .map_err(anyhow::Error::from)
        .and_then(|result| result);
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if !cli.quiet || cli.json {
                eprintln!("{} {:#}", red("✘"), err);
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Exit code of the first `RedactError` in the chain; 1 for anything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<RedactError>())
        .map(RedactError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RedactionProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, progress_cb)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let report = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else {
            println!("File:       {}", report.path.display());
            println!("Inspector:  {}", report.inspector);
            if report.is_clean() {
                println!("Metadata:   {}", green("none found"));
            } else {
                println!("Metadata:   {} field(s)", report.fields.len());
                for field in &report.fields {
                    println!("  - {field}");
                }
            }
        }
        return Ok(());
    }

    let regions = collect_regions(cli)?;

    // ── Explode mode ─────────────────────────────────────────────────────
    if cli.explode {
        let report = explode(&cli.input, cli.out.as_deref(), &regions, &config)
            .await
            .context("Explode failed")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else if !cli.quiet {
            eprintln!(
                "{}  {} page images  →  {}",
                green("✔"),
                report.pages.len(),
                bold(&report.output_dir.display().to_string())
            );
            eprintln!(
                "   {}",
                dim("Edit the images, then run: redact <DIR> --merge --out <FILE>")
            );
        }
        return Ok(());
    }

    // ── Sanitize / merge ─────────────────────────────────────────────────
    let report = if cli.merge {
        if !regions.is_empty() {
            anyhow::bail!("--region and --regions-file cannot be combined with --merge");
        }
        let out = cli
            .out
            .clone()
            .unwrap_or_else(|| merged_output_path(&cli.input));
        merge(&cli.input, &out, &config)
            .await
            .context("Merge failed")?
    } else {
        redact(&cli.input, cli.out.as_deref(), &regions, &config)
            .await
            .context("Sanitization failed")?
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        let out = report
            .output_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            green("✔"),
            report.page_count,
            report.timings.total_ms,
            bold(&out)
        );
        if !report.removed_metadata.is_empty() {
            eprintln!(
                "   {}",
                dim(&format!(
                    "removed: {}",
                    report.removed_metadata.join(", ")
                ))
            );
        }
    }
    Ok(())
}

/// Map CLI args to `RedactionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RedactionConfig> {
    let mut builder = RedactionConfig::builder()
        .dpi(cli.resolution)
        .max_rendered_pixels(cli.max_pixels)
        .concurrency(cli.concurrency)
        .tool_timeout_secs(cli.timeout)
        .fill(cli.fill)
        .rasterizer(cli.rasterizer.into())
        .inspector(cli.inspector.into());

    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_dir(dir.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `--region` flags followed by the regions file, if any.
fn collect_regions(cli: &Cli) -> Result<Vec<RedactionRegion>> {
    let mut regions = cli.regions.clone();
    if let Some(ref path) = cli.regions_file {
        let from_file = load_regions_file(path)
            .with_context(|| format!("Failed to load regions from {}", path.display()))?;
        regions.extend(from_file);
    }
    Ok(regions)
}

/// `<dir>-final.pdf` beside a merge input directory.
fn merged_output_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "merged".to_string());
    let name = name.strip_suffix("_pages").unwrap_or(&name).to_string();
    dir.with_file_name(format!("{name}-final.pdf"))
}
