//! CLI binary for sta-review.
//!
//! A thin shim over the library crate: maps flags to `ReviewConfig`, keeps
//! credits and history in a JSON state file (or Postgres with the
//! `postgres` feature) and prints the report.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use sta_review::{
    load_document, AnalysisRequest, CreditLedger, CreditStatus, CreditStore, CreditView, HistoryStore,
    LlmModelProvider, MemoryStore, PdfiumExtractor, ProgressCallback, ReviewConfig,
    ReviewOutcome, ReviewProgressCallback, ReviewState, Reviewer, SessionProvider, StaticSession,
};
use std::io;
use std::path::PathBuf;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that shows the current review state and the streamed byte count.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Reviewing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ReviewProgressCallback for CliProgressCallback {
    fn on_state(&self, state: ReviewState) {
        match state {
            ReviewState::Done | ReviewState::Failed => self.bar.finish_and_clear(),
            other => self.bar.set_message(other.to_string()),
        }
    }

    fn on_chunk(&self, _chunk_len: usize, total_len: usize) {
        self.bar.set_message(format!("receiving answer… {total_len} bytes"));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Free tier, no account needed
  sta-review review paper.pdf --model gemini-2.5-flash-lite

  # Paid tier charged to a user's monthly allowance
  STA_MONTHLY_CREDIT=300 sta-review --user alice review paper.pdf

  # Review a PDF straight from a URL, JSON output
  sta-review --user alice review https://arxiv.org/pdf/1706.03762 --json

  # Which tiers can alice use right now?
  sta-review --user alice models

  # Remaining credits and past reviews
  sta-review --user alice credits
  sta-review --user alice history

MODEL TIERS:
  Model                   Label      Credits
  ──────────────────────  ─────────  ───────
  gemini-2.5-flash-lite   Superfast  0
  gemini-2.5-flash        Flash      50  (default)
  gemini-2.5-pro          Pro        100

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY       Google Gemini API key (default provider)
  STA_LLM_PROVIDER     Override provider (gemini, openai, anthropic, ollama, …)
  STA_MONTHLY_CREDIT   Credits per user per month; 0 or unset disables paid tiers
  STA_USER             Signed-in user id
  STA_STATE_FILE       JSON file holding balances and history
  STA_DATABASE_URL     Postgres URL (postgres feature) instead of the state file
  PDFIUM_LIB_PATH      Directory or path of libpdfium
"#;

/// Score research papers with an LLM under a monthly credit allowance.
#[derive(Parser, Debug)]
#[command(
    name = "sta-review",
    version,
    about = "Score PDF papers with an LLM: STA quality score and AI-authorship suspicion",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Signed-in user id. Without it only free tiers are available.
    #[arg(long, global = true, env = "STA_USER")]
    user: Option<String>,

    /// Credits per user per calendar month (≤ 0 disables paid tiers).
    #[arg(long, global = true, env = "STA_MONTHLY_CREDIT", default_value = "0")]
    monthly_credit: String,

    /// LLM provider: gemini, openai, anthropic, ollama, …
    #[arg(long, global = true, env = "STA_LLM_PROVIDER")]
    provider: Option<String>,

    /// JSON state file for balances and history.
    #[arg(long, global = true, env = "STA_STATE_FILE", default_value = "sta-review-state.json")]
    state: PathBuf,

    /// Postgres connection string; replaces the state file.
    #[cfg(feature = "postgres")]
    #[arg(long, global = true, env = "STA_DATABASE_URL")]
    database_url: Option<String>,

    /// Output JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "STA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "STA_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Review a PDF (local path or HTTP/HTTPS URL).
    Review {
        input: String,

        /// Model id from the catalog. Default: gemini-2.5-flash.
        #[arg(long, env = "STA_MODEL")]
        model: Option<String>,

        /// Wait for the whole answer instead of streaming it.
        #[arg(long)]
        no_stream: bool,

        /// Disable the progress spinner.
        #[arg(long)]
        no_progress: bool,

        /// Text file replacing the built-in task description.
        #[arg(long)]
        system_prompt: Option<PathBuf>,

        /// Max output tokens.
        #[arg(long, default_value_t = 8192)]
        max_tokens: usize,

        /// Sampling temperature (0.0–2.0).
        #[arg(long, default_value_t = 0.2)]
        temperature: f32,

        /// HTTP download timeout in seconds.
        #[arg(long, default_value_t = 120)]
        download_timeout: u64,
    },
    /// List model tiers and whether each is available.
    Models,
    /// Show this month's remaining credits.
    Credits,
    /// List past reviews, newest first.
    History,
}

/// Credit and history backends plus where to save them afterwards.
struct Stores {
    credits: Arc<dyn CreditStore>,
    history: Arc<dyn HistoryStore>,
    snapshot: Option<(Arc<MemoryStore>, PathBuf)>,
}

impl Stores {
    async fn open(cli: &Cli) -> Result<Self> {
        #[cfg(feature = "postgres")]
        if let Some(ref url) = cli.database_url {
            let store = Arc::new(
                sta_review::PgStore::connect(url)
                    .await
                    .context("Failed to connect to Postgres")?,
            );
            store.ensure_schema().await.context("Failed to create tables")?;
            return Ok(Self {
                credits: store.clone(),
                history: store,
                snapshot: None,
            });
        }

        let store = Arc::new(
            MemoryStore::load(&cli.state)
                .await
                .with_context(|| format!("Failed to read state file {:?}", cli.state))?,
        );
        Ok(Self {
            credits: store.clone(),
            history: store.clone(),
            snapshot: Some((store, cli.state.clone())),
        })
    }

    async fn persist(&self) -> Result<()> {
        if let Some((ref store, ref path)) = self.snapshot {
            store
                .save(path)
                .await
                .with_context(|| format!("Failed to write state file {:?}", path))?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides all the feedback that matters during a review.
    let show_progress = matches!(
        cli.command,
        Command::Review { no_progress: false, .. }
    ) && !cli.quiet
        && !cli.json;
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

    let session = StaticSession::new(cli.user.clone());
    let stores = Stores::open(&cli).await?;

    match cli.command {
        Command::Review {
            ref input,
            ref model,
            no_stream,
            no_progress: _,
            ref system_prompt,
            max_tokens,
            temperature,
            download_timeout,
        } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn ReviewProgressCallback>)
            } else {
                None
            };

            let mut builder = ReviewConfig::builder()
                .monthly_credit_limit_str(&cli.monthly_credit)
                .streaming(!no_stream)
                .max_tokens(max_tokens)
                .temperature(temperature)
                .download_timeout_secs(download_timeout);
            if let Some(ref name) = cli.provider {
                builder = builder.provider_name(name.clone());
            }
            if let Some(ref path) = system_prompt {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
                builder = builder.system_prompt(text);
            }
            if let Some(cb) = progress {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build().context("Invalid configuration")?;

            let document = load_document(input, config.download_timeout_secs)
                .await
                .context("Failed to load PDF")?;

            let model_provider = Arc::new(LlmModelProvider::from_config(&config));
            let reviewer = Reviewer::new(
                config,
                model_provider,
                Arc::new(PdfiumExtractor::new()),
                stores.credits.clone(),
                stores.history.clone(),
            );

            let mut request = AnalysisRequest::new(Some(document)).user(session.current());
            if let Some(ref id) = model {
                request = request.model(id.clone());
            }

            let mut outcome = reviewer.review(request).await.context("Review failed")?;

            if let Some(handle) = outcome.reconciliation.take() {
                if let Ok(Some(snapshot)) = handle.await {
                    outcome.credits = CreditStatus::Stale(snapshot);
                }
            }
            stores.persist().await?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome).context("Failed to serialise output")?
                );
            } else {
                print_outcome(&outcome);
            }
        }

        Command::Models => {
            let config = base_config(&cli)?;
            let ledger = CreditLedger::new(stores.credits.clone(), config.monthly_credit_limit);
            let user = session.current();
            let view = ledger.view(user.as_deref()).await;
            let statuses = ledger.availability(&config.catalog, user.as_deref(), &view);

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&statuses).context("Failed to serialise output")?
                );
            } else {
                for status in &statuses {
                    let o = &status.option;
                    let cost = if o.cost > 0 {
                        format!("{} credits", o.cost)
                    } else {
                        "free".to_string()
                    };
                    match status.denied {
                        None => println!(
                            "{} {:<24} {:<10} {}",
                            green("✓"),
                            o.id,
                            o.label,
                            dim(&cost)
                        ),
                        Some(ref reason) => println!(
                            "{} {:<24} {:<10} {}  {}",
                            red("✗"),
                            o.id,
                            o.label,
                            dim(&cost),
                            dim(&reason.to_string())
                        ),
                    }
                }
            }
            stores.persist().await?;
        }

        Command::Credits => {
            let config = base_config(&cli)?;
            let ledger = CreditLedger::new(stores.credits.clone(), config.monthly_credit_limit);
            let view = ledger.view(session.current().as_deref()).await;
            if cli.json {
                let json = match view {
                    CreditView::Loaded(ref s) => serde_json::to_value(s)?,
                    ref other => serde_json::json!({ "status": other.display_text() }),
                };
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                println!("Paid Model Credits  {}", bold(&view.display_text()));
            }
            stores.persist().await?;
        }

        Command::History => {
            let Some(user) = session.current() else {
                anyhow::bail!("History requires a signed-in user (--user or STA_USER)");
            };
            let records = stores
                .history
                .list_for_owner(&user)
                .await
                .context("Failed to load history")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("{}", dim("No reviews yet."));
            } else {
                for r in &records {
                    println!(
                        "{}  {}  STA {}  AI {}",
                        dim(&r.created_at.format("%Y-%m-%d %H:%M").to_string()),
                        bold(&r.title),
                        r.score.as_deref().unwrap_or("-"),
                        r.ai_score.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
    }

    Ok(())
}

fn base_config(cli: &Cli) -> Result<ReviewConfig> {
    let mut builder = ReviewConfig::builder().monthly_credit_limit_str(&cli.monthly_credit);
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name.clone());
    }
    builder.build().context("Invalid configuration")
}

fn print_outcome(outcome: &ReviewOutcome) {
    match outcome.report {
        Some(ref report) => {
            let r = &report.result;
            println!("{}", bold(r.title.as_deref().unwrap_or("Untitled")));
            if !report.authors.is_empty() {
                println!("{}", dim(&report.authors.join("; ")));
            }
            println!();
            println!("STA score      {}", bold(&report.sta_display()));
            println!("AI suspicion   {}", bold(&report.suspicion_display()));
            if let Some(ref usage) = r.score_usage {
                println!("\n{}\n{}", cyan("Scoring"), usage);
            }
            if let Some(ref reason) = r.ai_reason {
                println!("\n{}\n{}", cyan("AI rationale"), reason);
            }
            if let Some(ref summary) = r.summary {
                println!("\n{}\n{}", cyan("Summary"), summary);
            }
        }
        None => println!("{}", outcome.raw_text),
    }

    eprintln!();
    match outcome.credits {
        CreditStatus::Untouched => {}
        CreditStatus::Settled(ref s) => eprintln!("{} credits left: {}", green("✔"), s),
        CreditStatus::Stale(ref s) => eprintln!("{} credits (may be stale): {}", cyan("⚠"), s),
    }
    for w in &outcome.warnings {
        eprintln!("{} {}", cyan("⚠"), w);
    }
    eprintln!(
        "{}",
        dim(&format!(
            "{} ({} chunks, {}ms)",
            outcome.model, outcome.stats.chunks, outcome.stats.total_duration_ms
        ))
    );
}
