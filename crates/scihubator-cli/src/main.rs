use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use scihubator_core::config_file::{self, ConfigFile};
use scihubator_core::{
    BatchPipeline, BatchRunner, DEFAULT_IDENTIFIER_KEY, IdentifierSet, PipelineConfig,
    RunOutcome, RunRequest, SelectionMode,
};
use scihubator_pdf_mupdf::MupdfBackend;
use scihubator_scihub::SciHubClient;
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

const DEFAULT_LABEL: &str = "SciHubator";

/// SciHubator - Import papers from Sci-Hub by DOI as annotated text segments
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// DOIs to import; comma-separated lists are accepted
    dois: Vec<String>,

    /// Read DOIs from a file (one or more comma-separated DOIs per line)
    #[arg(short = 'f', long)]
    from_file: Option<PathBuf>,

    /// What to keep from each paper: "plain" (whole text) or "bibliography"
    #[arg(short, long)]
    mode: Option<SelectionMode>,

    /// Shorthand for --mode bibliography
    #[arg(short, long, conflicts_with = "mode")]
    bibliography: bool,

    /// Label of the resulting collection
    #[arg(short, long)]
    label: Option<String>,

    /// Write the result as JSON to this path instead of printing it
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Sci-Hub mirror base URL
    #[arg(long)]
    mirror: Option<String>,

    /// Per-download timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Annotation key recording each segment's DOI
    #[arg(long)]
    identifier_key: Option<String>,

    /// Number the output segments under this annotation key
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "num")]
    auto_number: Option<String>,

    /// Parent directory for temporary downloads
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Fully resolved run settings: flags > env vars > config file > defaults.
#[derive(Debug)]
struct Settings {
    mirror: Option<String>,
    fetch_timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    user_agent: Option<String>,
    header_margin: Option<f32>,
    footer_margin: Option<f32>,
    label: String,
    mode: SelectionMode,
    pipeline: PipelineConfig,
}

impl Settings {
    fn resolve(cli: &Cli, file: ConfigFile) -> Self {
        let retrieval = file.retrieval.unwrap_or_default();
        let out = file.output.unwrap_or_default();
        let staging = file.staging.unwrap_or_default();
        let extraction = file.extraction.unwrap_or_default();

        let mode = if cli.bibliography {
            SelectionMode::Bibliography
        } else {
            cli.mode.or(out.mode).unwrap_or_default()
        };

        Self {
            mirror: cli
                .mirror
                .clone()
                .or_else(|| std::env::var("SCIHUB_MIRROR").ok())
                .or(retrieval.mirror_url),
            fetch_timeout_secs: cli
                .timeout
                .or_else(|| {
                    std::env::var("SCIHUB_TIMEOUT")
                        .ok()
                        .and_then(|v| v.parse().ok())
                })
                .or(retrieval.fetch_timeout_secs),
            probe_timeout_secs: retrieval.probe_timeout_secs,
            user_agent: retrieval.user_agent,
            header_margin: extraction.header_margin,
            footer_margin: extraction.footer_margin,
            label: cli
                .label
                .clone()
                .or(out.label)
                .unwrap_or_else(|| DEFAULT_LABEL.to_string()),
            mode,
            pipeline: PipelineConfig {
                identifier_key: cli
                    .identifier_key
                    .clone()
                    .or(out.identifier_key)
                    .unwrap_or_else(|| DEFAULT_IDENTIFIER_KEY.to_string()),
                auto_number_key: cli.auto_number.clone().or(out.auto_number_key),
                staging_dir: cli
                    .staging_dir
                    .clone()
                    .or_else(|| staging.dir.map(PathBuf::from)),
            },
        }
    }

    fn retrieval(&self) -> anyhow::Result<SciHubClient> {
        let mut builder = SciHubClient::builder();
        if let Some(mirror) = &self.mirror {
            builder = builder.mirror_url(mirror);
        }
        if let Some(secs) = self.fetch_timeout_secs {
            builder = builder.fetch_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.probe_timeout_secs {
            builder = builder.probe_timeout(Duration::from_secs(secs));
        }
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent);
        }
        Ok(builder.build()?)
    }

    fn extraction(&self) -> MupdfBackend {
        let mut backend = MupdfBackend::new();
        if let Some(ratio) = self.header_margin {
            backend = backend.with_header_margin(ratio);
        }
        if let Some(ratio) = self.footer_margin {
            backend = backend.with_footer_margin(ratio);
        }
        backend
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("tracing subscriber already set; skipping re-initialization");
    }
}

/// Gather the raw DOI input from positional arguments and `--from-file`.
fn collect_input(cli: &Cli) -> anyhow::Result<String> {
    let mut parts = cli.dois.clone();
    if let Some(path) = &cli.from_file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read DOI list {}: {}", path.display(), e))?;
        parts.extend(content.lines().map(str::to_string));
    }
    Ok(parts.join(","))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let color = ColorMode(!cli.no_color);
    let settings = Settings::resolve(&cli, config_file::load_config());
    tracing::debug!(?settings, "resolved settings");

    let (identifiers, added) = IdentifierSet::parse(&collect_input(&cli)?);
    let mut stderr = std::io::stderr();
    if added.had_duplicates() {
        output::print_duplicate_notice(&mut stderr, color)?;
    }
    if identifiers.is_empty() {
        anyhow::bail!("Please enter one or many valid DOIs.");
    }

    let pipeline = BatchPipeline::new(
        Arc::new(settings.retrieval()?),
        Arc::new(settings.extraction()),
        settings.pipeline.clone(),
    );
    let runner = BatchRunner::new(pipeline);
    let request = RunRequest::from_set(&identifiers, settings.mode, settings.label.clone());
    let mut handle = runner.start(request)?;

    // Set up Ctrl+C handler
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/dim}] {pos:>3}% {msg}")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message(format!("Step 1/3: Pre-processing {} DOI(s)...", identifiers.len()));
    while let Some(event) = handle.next_progress().await {
        bar.set_position(u64::from(event.percent));
        bar.set_message(event.message);
    }
    bar.finish_and_clear();

    let report = match handle.wait().await {
        RunOutcome::Completed(report) => report,
        RunOutcome::Failed(err) => anyhow::bail!(output::failure_message(&err)),
        RunOutcome::Cancelled => anyhow::bail!("Run cancelled; no output produced."),
    };

    let mut stdout = std::io::stdout();
    match &cli.output {
        Some(path) => {
            let file = std::io::BufWriter::new(std::fs::File::create(path)?);
            serde_json::to_writer_pretty(file, &report)?;
            tracing::info!(path = %path.display(), "result written");
        }
        None => output::print_units(&mut stdout, &report, color)?,
    }
    output::print_summary(&mut stderr, &report, color)?;
    stdout.flush()?;

    Ok(())
}
