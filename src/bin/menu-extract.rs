//! CLI binary for menu-extract.
//!
//! A thin shim over the library crate: maps flags to `ExtractionConfig`,
//! runs one job operation and prints the resulting document.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use menu_extract::{
    CategoryKey, ExtractionConfig, ExtractionProgressCallback, JobId, JsonlAuditLog,
    MenuExtractor, ProgressCallback, Stage, StageAttempts, UnitId,
};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One progress bar per stage; units complete out of order, so each unit's
/// start time is keyed by its display name.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, unit: &UnitId) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&unit.to_string()))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage, units: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} units  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.reset();
        self.bar.set_length(units as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(stage.name());
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{stage}: {units} unit(s)"))
        ));
    }

    fn on_unit_start(&self, unit: &UnitId) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(unit.to_string(), Instant::now());
        }
        self.bar.set_message(unit.to_string());
    }

    fn on_unit_complete(&self, unit: &UnitId, attempts: u32) {
        let secs = self.elapsed(unit);
        let retries = if attempts > 1 {
            format!("{attempts} attempts")
        } else {
            String::new()
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            green("✓"),
            unit,
            dim(&retries),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_unit_error(&self, unit: &UnitId, error: &str) {
        let secs = self.elapsed(unit);
        let msg = match error.char_indices().nth(100) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            unit,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, stage: Stage, units: usize) {
        self.bar.println(format!(
            "{} {} complete ({} unit(s))",
            green("✔"),
            bold(&stage.to_string()),
            units
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Whole pipeline in one go
  menu-extract run menu.pdf --restaurant "Chez Nous" -o menu.json

  # Step by step, with a review of the categories
  JOB=$(menu-extract new menu.pdf)
  menu-extract categories $JOB --restaurant "Chez Nous"
  menu-extract show $JOB categories -o categories.json
  $EDITOR categories.json
  menu-extract edit $JOB categories categories.json
  menu-extract items $JOB
  menu-extract bases $JOB
  menu-extract addons $JOB -o menu.json

  # Re-extract one category of stage 3
  menu-extract reextract $JOB bases --page 2 --category p2-c1

  # Counts and history
  menu-extract summary $JOB --history

  # Housekeeping
  menu-extract jobs
  menu-extract rm $JOB

STORAGE LAYOUT:
  {storage}/uploads/{job}.pdf
  {storage}/outputs/{job}/phase1_categories_raw.json
  {storage}/outputs/{job}/phase1_categories_reviewed.json
  {storage}/outputs/{job}/phase2_items.json
  {storage}/outputs/{job}/phase3_bases.json
  {storage}/outputs/{job}/phase4_final.json
  {storage}/outputs/{job}/history.jsonl

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Make libpdfium loadable (e.g. LD_LIBRARY_PATH / DYLD_LIBRARY_PATH).
  3. Extract:         menu-extract run menu.pdf --restaurant "Chez Nous"
"#;

/// Extract structured, priced menu data from menu PDFs using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "menu-extract",
    version,
    about = "Extract structured, priced menu data from menu PDFs using Vision LLMs",
    long_about = "Runs a four-stage extraction over a restaurant menu PDF: categories, items, \
base pricing and items with add-ons. Every stage writes a validated JSON document that the \
next stage builds on and that can be reviewed or edited in between.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding uploaded PDFs and stage documents.
    #[arg(long, global = true, env = "MENU_EXTRACT_STORAGE_DIR", default_value = "./storage")]
    storage_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Maximum number of model calls in flight.
    #[arg(short, long, global = true, env = "MENU_EXTRACT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Max LLM output tokens per call.
    #[arg(long, global = true, env = "MENU_EXTRACT_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "MENU_EXTRACT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Attempts per unit for every stage (default: 2, items 3).
    #[arg(long, global = true, env = "MENU_EXTRACT_ATTEMPTS")]
    attempts: Option<u32>,

    /// Pause between attempts, in milliseconds.
    #[arg(long, global = true, env = "MENU_EXTRACT_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "MENU_EXTRACT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Longest side of a rendered page, in pixels.
    #[arg(long, global = true, env = "MENU_EXTRACT_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// PDF user password for encrypted menus.
    #[arg(long, global = true, env = "MENU_EXTRACT_PASSWORD")]
    password: Option<String>,

    /// Directory of prompt template overrides (categories.txt, items.txt, …).
    #[arg(long, global = true, env = "MENU_EXTRACT_PROMPTS_DIR")]
    prompts_dir: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, global = true, env = "MENU_EXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MENU_EXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MENU_EXTRACT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a menu PDF and print the new job id.
    New { pdf: PathBuf },

    /// Stage 1: find the categories on every page.
    Categories {
        job: String,
        #[arg(long)]
        restaurant: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stage 2: items of every category.
    Items {
        job: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stage 3: base pricing of every category.
    Bases {
        job: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stage 4: items with their add-ons.
    Addons {
        job: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a PDF and run all four stages.
    Run {
        pdf: PathBuf,
        #[arg(long)]
        restaurant: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the current document of a stage.
    Show {
        job: String,
        #[arg(value_enum)]
        stage: StageArg,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace a stage document with an edited JSON file.
    Edit {
        job: String,
        #[arg(value_enum)]
        stage: StageArg,
        file: PathBuf,
    },

    /// Re-extract one category of stage 2, 3 or 4.
    Reextract {
        job: String,
        #[arg(value_enum)]
        stage: StageArg,
        #[arg(long)]
        page: usize,
        /// Category key, e.g. p2-c1.
        #[arg(long)]
        category: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Page, category and item counts of a job.
    Summary {
        job: String,
        /// Also print the job's history.
        #[arg(long)]
        history: bool,
    },

    /// List stored jobs, newest first, with the last stage each reached.
    Jobs,

    /// Delete a job's PDF, documents and history.
    Rm { job: String },
}

impl Command {
    /// Whether the command calls the model.
    fn needs_model(&self) -> bool {
        !matches!(
            self,
            Command::New { .. }
                | Command::Show { .. }
                | Command::Edit { .. }
                | Command::Summary { .. }
                | Command::Jobs
                | Command::Rm { .. }
        )
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StageArg {
    Categories,
    Items,
    Bases,
    Addons,
}

impl From<StageArg> for Stage {
    fn from(v: StageArg) -> Self {
        match v {
            StageArg::Categories => Stage::Categories,
            StageArg::Items => Stage::Items,
            StageArg::Bases => Stage::Bases,
            StageArg::Addons => Stage::Addons,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && cli.command.needs_model();
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let storage_dir = config.storage_dir.clone();
    let extractor = if cli.command.needs_model() {
        MenuExtractor::from_config(config).context("Failed to set up the vision model")?
    } else {
        MenuExtractor::offline(config).context("Invalid configuration")?
    };

    match &cli.command {
        Command::New { pdf } => {
            let job = create_job(&extractor, pdf).await?;
            println!("{job}");
        }
        Command::Categories {
            job,
            restaurant,
            output,
        } => {
            let job = parse_job(job)?;
            let doc = extractor
                .extract_categories(&job, restaurant)
                .await
                .context("Category extraction failed")?;
            emit(&doc, output.as_deref()).await?;
        }
        Command::Items { job, output } => {
            let doc = extractor
                .extract_items(&parse_job(job)?)
                .await
                .context("Item extraction failed")?;
            emit(&doc, output.as_deref()).await?;
        }
        Command::Bases { job, output } => {
            let doc = extractor
                .extract_bases(&parse_job(job)?)
                .await
                .context("Base pricing extraction failed")?;
            emit(&doc, output.as_deref()).await?;
        }
        Command::Addons { job, output } => {
            let doc = extractor
                .extract_addons(&parse_job(job)?)
                .await
                .context("Add-on extraction failed")?;
            emit(&doc, output.as_deref()).await?;
        }
        Command::Run {
            pdf,
            restaurant,
            output,
        } => {
            let job = create_job(&extractor, pdf).await?;
            if !cli.quiet {
                eprintln!("{} job {}", cyan("◆"), bold(job.as_str()));
            }
            let doc = extractor
                .run_all(&job, restaurant)
                .await
                .with_context(|| format!("Extraction of job {job} failed"))?;
            emit(&doc, output.as_deref()).await?;
            if !cli.quiet {
                let summary = extractor.summary(&job).await?;
                eprintln!("{}  {}", green("✔"), summary);
            }
        }
        Command::Show { job, stage, output } => {
            let doc = extractor
                .load_document(&parse_job(job)?, (*stage).into())
                .await
                .context("Failed to load document")?;
            emit(&doc, output.as_deref()).await?;
        }
        Command::Edit { job, stage, file } => {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            let stage: Stage = (*stage).into();
            extractor
                .replace_document(&parse_job(job)?, stage, value)
                .await
                .context("Edit rejected")?;
            if !cli.quiet {
                eprintln!("{} {} document replaced", green("✔"), stage);
            }
        }
        Command::Reextract {
            job,
            stage,
            page,
            category,
            output,
        } => {
            let key = CategoryKey::from(category.clone());
            let doc = extractor
                .reextract(&parse_job(job)?, (*stage).into(), *page, &key)
                .await
                .with_context(|| format!("Re-extraction of {category} failed"))?;
            emit(&doc, output.as_deref()).await?;
        }
        Command::Summary { job, history } => {
            let job = parse_job(job)?;
            let summary = extractor.summary(&job).await?;
            println!("{summary}");
            if *history {
                let events = JsonlAuditLog::new(&storage_dir).history(&job).await?;
                for event in events {
                    let status = match &event.error_message {
                        None => green("ok"),
                        Some(e) => red(e),
                    };
                    println!(
                        "{}  {:<22} {:<12} {}",
                        dim(&event.at.to_rfc3339()),
                        event.stage.to_string(),
                        format!("{:?}", event.action),
                        status
                    );
                }
            }
        }
        Command::Jobs => {
            for listing in extractor.list_jobs().await? {
                println!("{listing}");
            }
        }
        Command::Rm { job } => {
            let job = parse_job(job)?;
            extractor
                .delete_job(&job)
                .await
                .with_context(|| format!("Failed to delete job {job}"))?;
            if !cli.quiet {
                eprintln!("{} job {} deleted", green("✔"), job);
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .storage_dir(&cli.storage_dir)
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .max_rendered_pixels(cli.max_pixels);

    if let Some(n) = cli.attempts {
        builder = builder.attempts(StageAttempts::uniform(n));
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref dir) = cli.prompts_dir {
        builder = builder.prompts_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn parse_job(s: &str) -> Result<JobId> {
    s.parse().context("Invalid job id")
}

async fn create_job(extractor: &MenuExtractor, pdf: &Path) -> Result<JobId> {
    let bytes = tokio::fs::read(pdf)
        .await
        .with_context(|| format!("Failed to read {}", pdf.display()))?;
    extractor
        .create_job(&bytes)
        .await
        .with_context(|| format!("Failed to upload {}", pdf.display()))
}

/// Pretty JSON to `output`, or to stdout.
async fn emit<T: Serialize>(doc: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(doc).context("Failed to serialise document")?;
    match output {
        Some(path) => tokio::fs::write(path, json + "\n")
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
