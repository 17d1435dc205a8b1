//! The batch state machine: validate, download, extract + select, assemble.
//!
//! Identifiers are processed strictly one after another, in request order.
//! Cancellation is cooperative and observed between identifiers (and between
//! pages while concatenating extracted text). Downloaded documents live in a
//! per-run temporary directory that is removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::assemble::{assemble, number_units};
use crate::backend::{ExtractionBackend, RetrievalBackend};
use crate::section::select_section;
use crate::{
    BatchReport, DEFAULT_IDENTIFIER_KEY, DocumentOutput, Identifier, Phase, ProgressEvent,
    RunError, RunOutcome, RunRequest, RunState,
};

/// Settings that stay fixed across runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Annotation key carrying each unit's identifier.
    pub identifier_key: String,
    /// When set, units of the final result are numbered 1..N under this key.
    pub auto_number_key: Option<String>,
    /// Parent directory for per-run temporary storage (system temp dir if unset).
    pub staging_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            identifier_key: DEFAULT_IDENTIFIER_KEY.to_string(),
            auto_number_key: None,
            staging_dir: None,
        }
    }
}

/// Why a run stopped before assembling.
enum Halt {
    Failed(RunError),
    Cancelled,
}

impl From<RunError> for Halt {
    fn from(err: RunError) -> Self {
        Halt::Failed(err)
    }
}

/// Outbound side of a run: progress events and state transitions.
struct Reporter {
    progress: mpsc::UnboundedSender<ProgressEvent>,
    state: watch::Sender<RunState>,
}

impl Reporter {
    fn enter(&self, state: RunState) {
        tracing::debug!(?state, "run state changed");
        self.state.send_replace(state);
    }

    fn progress(&self, phase: Phase, percent: u8, message: String) {
        // The caller may have stopped listening; the run carries on regardless.
        let _ = self.progress.send(ProgressEvent {
            phase,
            percent,
            message,
        });
    }
}

/// Drives identifiers through retrieval, extraction and section selection.
pub struct BatchPipeline {
    retrieval: Arc<dyn RetrievalBackend>,
    extraction: Arc<dyn ExtractionBackend>,
    config: PipelineConfig,
}

impl BatchPipeline {
    pub fn new(
        retrieval: Arc<dyn RetrievalBackend>,
        extraction: Arc<dyn ExtractionBackend>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            retrieval,
            extraction,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run to its terminal state on the current task.
    ///
    /// Progress is pushed to `progress`, every state transition to `state`.
    /// The final state sent on `state` always matches the returned outcome.
    pub async fn run(
        &self,
        request: RunRequest,
        progress: mpsc::UnboundedSender<ProgressEvent>,
        state: watch::Sender<RunState>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let reporter = Reporter { progress, state };
        tracing::info!(
            identifiers = request.identifiers.len(),
            mode = %request.mode,
            retrieval = self.retrieval.name(),
            "starting batch run"
        );

        let outcome = match self.execute(&request, &reporter, &cancel).await {
            Ok(report) => {
                tracing::info!(
                    units = report.result.len(),
                    missing_bibliographies = report.missing_count(),
                    "batch run completed"
                );
                RunOutcome::Completed(report)
            }
            Err(Halt::Failed(err)) => {
                tracing::warn!(error = %err, "batch run failed");
                RunOutcome::Failed(err)
            }
            Err(Halt::Cancelled) => {
                tracing::info!("batch run cancelled");
                RunOutcome::Cancelled
            }
        };
        reporter.enter(outcome.state());
        outcome
    }

    async fn execute(
        &self,
        request: &RunRequest,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, Halt> {
        reporter.enter(RunState::Validating);
        if request.identifiers.is_empty() {
            return Err(RunError::EmptyInput.into());
        }
        if !self.retrieval.probe().await {
            return Err(RunError::ServiceUnreachable.into());
        }
        checkpoint(cancel)?;

        // Dropped (and deleted) whenever this function returns.
        let staging = self.create_staging()?;
        tracing::debug!(path = %staging.path().display(), "created staging directory");

        let artifacts = self
            .download_all(&request.identifiers, staging.path(), reporter, cancel)
            .await?;
        let (outputs, missing) = self
            .extract_all(request, &artifacts, reporter, cancel)
            .await?;
        drop(staging);

        reporter.enter(RunState::Assembling);
        reporter.progress(
            Phase::Assembling,
            100,
            "Step 3/3: Post-processing...".to_string(),
        );
        let mut result = assemble(outputs, &request.output_label);
        if let Some(key) = &self.config.auto_number_key {
            number_units(&mut result, key);
        }

        Ok(BatchReport {
            result,
            missing_bibliographies: missing,
        })
    }

    fn create_staging(&self) -> Result<TempDir, RunError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("scihubator-");
        let dir = match &self.config.staging_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Fetch every identifier into `staging`, failing fast on the first error.
    async fn download_all(
        &self,
        identifiers: &[Identifier],
        staging: &Path,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, Halt> {
        reporter.enter(RunState::Downloading);
        let total = identifiers.len();
        let mut artifacts = Vec::with_capacity(total);

        for (i, identifier) in identifiers.iter().enumerate() {
            checkpoint(cancel)?;
            reporter.progress(
                Phase::Downloading,
                percent(i as f64, total),
                format!("Step 1/3: Downloading {identifier} ({}/{total})", i + 1),
            );

            let destination = staging.join(format!("{i}.pdf"));
            if let Err(err) = self.retrieval.fetch(identifier, &destination).await {
                return Err(RunError::DownloadFailed {
                    identifier: identifier.clone(),
                    detail: err.to_string(),
                }
                .into());
            }
            tracing::debug!(%identifier, path = %destination.display(), "fetched document");
            artifacts.push(destination);

            reporter.progress(
                Phase::Downloading,
                percent((i + 1) as f64, total),
                format!("Downloaded {identifier} ({}/{total})", i + 1),
            );
        }
        checkpoint(cancel)?;
        Ok(artifacts)
    }

    /// Extract and select each downloaded document, in identifier order.
    async fn extract_all(
        &self,
        request: &RunRequest,
        artifacts: &[PathBuf],
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<(Vec<(Identifier, DocumentOutput)>, Vec<Identifier>), Halt> {
        reporter.enter(RunState::Extracting);
        let total = request.identifiers.len();
        let mut outputs = Vec::with_capacity(total);
        let mut missing = Vec::new();

        for (i, (identifier, path)) in request.identifiers.iter().zip(artifacts).enumerate() {
            checkpoint(cancel)?;

            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(RunError::MissingArtifact {
                    identifier: identifier.clone(),
                }
                .into());
            }

            let pages = self.extract_pages(identifier, path).await?;
            let page_count = pages.len();
            let mut text = String::new();
            for (p, page) in pages.iter().enumerate() {
                checkpoint(cancel)?;
                text.push_str(page);
                let done = i as f64 + (p + 1) as f64 / page_count as f64;
                reporter.progress(
                    Phase::Extracting,
                    percent(done, total),
                    format!(
                        "Step 2/3: Processing {identifier} (page {}/{page_count})",
                        p + 1
                    ),
                );
            }
            if page_count == 0 {
                reporter.progress(
                    Phase::Extracting,
                    percent((i + 1) as f64, total),
                    format!("Step 2/3: Processing {identifier} (no pages)"),
                );
            }

            let selection =
                select_section(text, identifier, request.mode, &self.config.identifier_key);
            if selection.missing_bibliography {
                tracing::warn!(%identifier, "no bibliography detected");
                missing.push(identifier.clone());
            }
            outputs.push((identifier.clone(), selection.output));
        }
        Ok((outputs, missing))
    }

    async fn extract_pages(&self, identifier: &Identifier, path: &Path) -> Result<Vec<String>, Halt> {
        let extraction = Arc::clone(&self.extraction);
        let path = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || extraction.extract_pages(&path))
            .await
            .map_err(|e| format!("task join error: {e}"))
            .and_then(|r| r.map_err(|e| e.to_string()));

        extracted.map_err(|detail| {
            Halt::Failed(RunError::ExtractionFailed {
                identifier: identifier.clone(),
                detail,
            })
        })
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), Halt> {
    if cancel.is_cancelled() {
        Err(Halt::Cancelled)
    } else {
        Ok(())
    }
}

/// Share of `done` out of `total`, truncated to a whole percent.
fn percent(done: f64, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (100.0 * done / total as f64).clamp(0.0, 100.0) as u8
}
