//! CLI binary for diagram-migrate.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `MigrationConfig`, draws one progress bar per phase and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use diagram_migrate::{
    migrate, plan, Credentials, MigrationConfig, MigrationProgressCallback, MigrationReport, Phase,
    ProgressCallback, ProgressPolicy, XmlDatasetSource,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
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
fn blue(s: &str) -> String {
    format!("\x1b[1;34m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One progress bar per phase. Whether the bar moves when a diagram is
/// dispatched or when it settles is decided by `policy`.
struct CliProgressCallback {
    bar: Mutex<Option<ProgressBar>>,
    policy: ProgressPolicy,
}

impl CliProgressCallback {
    fn new(policy: ProgressPolicy) -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
            policy,
        })
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            f(bar);
        }
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Convert => "Converting",
        Phase::Upload => "Uploading",
    }
}

impl MigrationProgressCallback for CliProgressCallback {
    fn on_phase_start(&self, phase: Phase, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} diagrams  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix(phase_label(phase));
        bar.enable_steady_tick(Duration::from_millis(80));
        *self.bar.lock().unwrap_or_else(|e| e.into_inner()) = Some(bar);
    }

    fn on_diagram_dispatched(&self, _phase: Phase, name: &str) {
        let advance = self.policy.advances_on_dispatch();
        self.with_bar(|bar| {
            bar.set_message(dim(name));
            if advance {
                bar.inc(1);
            }
        });
    }

    fn on_diagram_complete(&self, _phase: Phase, _name: &str) {
        if self.policy.advances_on_settle() {
            self.with_bar(|bar| bar.inc(1));
        }
    }

    fn on_diagram_error(&self, _phase: Phase, name: &str, error: &str) {
        let advance = self.policy.advances_on_settle();
        // Truncate very long error messages to keep output tidy.
        let msg = match error.char_indices().nth(100) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.with_bar(|bar| {
            bar.println(format!("  {} {}  {}", red("✗"), name, red(&msg)));
            if advance {
                bar.inc(1);
            }
        });
    }

    fn on_phase_complete(&self, phase: Phase, total: usize, succeeded: usize) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(|e| e.into_inner()).take() {
            bar.finish_and_clear();
        }
        let failed = total.saturating_sub(succeeded);
        let verb = match phase {
            Phase::Convert => "converted",
            Phase::Upload => "uploaded",
        };
        if failed == 0 {
            eprintln!("{} {} diagrams {verb}", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} diagrams {verb}  ({} failed)",
                red("⚠"),
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full run
  diagram-migrate -v svc -x 'vendor-pw' -u agent -p 'target-pw' \
      -a https://vendor.example.com/api -w https://records.example.gov \
      -i DiagramExport.xml

  # See what would be converted and what is reused, without any network call
  diagram-migrate ... --dry-run

  # Try the first 10 records only, with debug logs
  diagram-migrate ... --limit 10 --logging

RESUMING:
  Every converted diagram is written to --output-dir before it is uploaded.
  Rerunning the same command skips conversion for anything already there and
  uploads it again together with the newly converted diagrams.

EXIT CODES:
  0  every diagram converted and uploaded
  1  fatal error (login refused, dataset unreadable, deadline exceeded, ...)
  2  run completed but some diagrams failed (see the report)
"#;

/// Convert legacy diagrams through the vendor API and upload them to the target application.
#[derive(Parser, Debug)]
#[command(
    name = "diagram-migrate",
    version,
    about = "Convert legacy diagrams and upload them to the target application",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Vendor user name for the conversion API.
    #[arg(short = 'v', long, env = "MIGRATE_VENDOR_USER")]
    vendor_user_name: String,

    /// Vendor password for the conversion API.
    #[arg(short = 'x', long, env = "MIGRATE_VENDOR_PASSWORD", hide_env_values = true)]
    vendor_password: String,

    /// User name for the target application.
    #[arg(short = 'u', long, env = "MIGRATE_USER")]
    user_name: String,

    /// Password for the target application.
    #[arg(short = 'p', long, env = "MIGRATE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Dataset file containing the diagrams.
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Base URL of the conversion API.
    #[arg(short = 'a', long, env = "MIGRATE_API")]
    api: String,

    /// Base URL of the target application.
    #[arg(short = 'w', long = "web-url", env = "MIGRATE_WEB_URL")]
    web_url: String,

    /// Enable DEBUG-level logs.
    #[arg(short = 'l', long, env = "MIGRATE_LOGGING")]
    logging: bool,

    /// Directory for converted artifacts (the resume checkpoint).
    #[arg(short, long, env = "MIGRATE_OUTPUT_DIR", default_value = "converted")]
    output_dir: PathBuf,

    /// Where the target session is saved after login.
    #[arg(long, env = "MIGRATE_SESSION_FILE", default_value = "state.json")]
    session_file: PathBuf,

    /// Maximum concurrent conversion calls.
    #[arg(long, default_value_t = 5)]
    convert_concurrency: usize,

    /// Maximum concurrent uploads.
    #[arg(long, default_value_t = 5)]
    upload_concurrency: usize,

    /// Retries per diagram on a transient conversion failure.
    #[arg(long, default_value_t = 2)]
    max_retries: u32,

    /// Per conversion-call timeout in seconds.
    #[arg(long, default_value_t = 60)]
    api_timeout: u64,

    /// Per login / upload timeout in seconds.
    #[arg(long, default_value_t = 60)]
    upload_timeout: u64,

    /// Deadline for the whole run in seconds (0 disables it).
    #[arg(long, default_value_t = 3600)]
    run_timeout: u64,

    /// Only process the first N records.
    #[arg(long)]
    limit: Option<usize>,

    /// Group field value on the upload form.
    #[arg(long, default_value = "Templates")]
    group: String,

    /// File name declared for each uploaded attachment.
    #[arg(long, default_value = "template.sce")]
    file_name: String,

    /// Advance progress bars when work is dispatched or when it completes.
    #[arg(long, value_enum, default_value = "completion")]
    progress_on: PolicyArg,

    /// Load and partition the dataset, print the plan, and stop.
    #[arg(long)]
    dry_run: bool,

    /// Print the final report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "MIGRATE_NO_PROGRESS")]
    no_progress: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PolicyArg {
    Dispatch,
    Completion,
}

impl From<PolicyArg> for ProgressPolicy {
    fn from(v: PolicyArg) -> Self {
        match v {
            PolicyArg::Dispatch => ProgressPolicy::Dispatch,
            PolicyArg::Completion => ProgressPolicy::Completion,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars provide the feedback that matters; keep library INFO
    // logs out of their way unless explicitly asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.dry_run;
    let filter = if cli.logging {
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
        .with_target(false)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new(cli.progress_on.clone().into());
        Some(cb as Arc<dyn MigrationProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Dry run ──────────────────────────────────────────────────────────
    if cli.dry_run {
        let plan = plan(&cli.input, &config, &XmlDatasetSource::default())
            .await
            .context("Failed to plan migration")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("Failed to serialise plan")?
            );
        } else {
            println!("Records:      {}", plan.total_records);
            println!("To convert:   {}", plan.to_convert.len());
            for name in &plan.to_convert {
                println!("  + {name}");
            }
            println!("Reused:       {}", plan.reused.len());
            println!("Would upload: {}", plan.upload_count());
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Run migration ────────────────────────────────────────────────────
    let report = migrate(&cli.input, &config)
        .await
        .context("Migration failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&report);
    }

    Ok(if report.is_complete_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn print_summary(report: &MigrationReport) {
    if report.is_complete_success() {
        eprintln!(
            "{}",
            blue(&format!(
                "Diagram templates successfully uploaded! ({} diagrams)",
                report.succeeded()
            ))
        );
    } else {
        eprintln!(
            "{} {} uploaded, {} failed",
            red("⚠"),
            bold(&report.succeeded().to_string()),
            red(&report.failed().to_string()),
        );
        for failure in &report.failures {
            eprintln!("  {} [{}] {}", red("✗"), failure.phase(), failure);
        }
    }
    eprintln!(
        "   {} converted, {} reused, {}ms total",
        dim(&report.converted.len().to_string()),
        dim(&report.reused.len().to_string()),
        report.total_duration_ms,
    );
}

/// Map CLI args to `MigrationConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<MigrationConfig> {
    let mut builder = MigrationConfig::builder()
        .vendor_api(&cli.api)
        .vendor_credentials(Credentials::new(&cli.vendor_user_name, &cli.vendor_password))
        .target_url(&cli.web_url)
        .target_credentials(Credentials::new(&cli.user_name, &cli.password))
        .output_dir(&cli.output_dir)
        .session_state_path(&cli.session_file)
        .convert_concurrency(cli.convert_concurrency)
        .upload_concurrency(cli.upload_concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .upload_timeout_secs(cli.upload_timeout)
        .run_timeout_secs((cli.run_timeout > 0).then_some(cli.run_timeout))
        .limit(cli.limit)
        .upload_group(&cli.group)
        .upload_file_name(&cli.file_name);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
