use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod assemble;
pub mod backend;
pub mod config_file;
pub mod identifiers;
pub mod pipeline;
pub mod runner;
pub mod section;

// Re-export for convenience
pub use assemble::{assemble, number_units};
pub use backend::{BackendError, ExtractionBackend, FetchError, FetchFuture, RetrievalBackend};
pub use identifiers::{AddOutcome, IdentifierError, IdentifierSet};
pub use pipeline::{BatchPipeline, PipelineConfig};
pub use runner::{BatchRunner, RunHandle, StartError};
pub use section::{Selection, find_bibliography, select_section};

/// Default annotation key under which every unit records its source DOI.
pub const DEFAULT_IDENTIFIER_KEY: &str = "source_identifier";
/// Annotation key naming the document part a unit was cut from.
pub const PART_KEY: &str = "part";
/// `part` value of a detected bibliography.
pub const BIBLIOGRAPHY_PART: &str = "Bibliography";
/// `part` value of the placeholder emitted when no bibliography was detected.
pub const EMPTY_BIBLIOGRAPHY_PART: &str = "Empty Bibliography";
/// Label of the collection wrapping a detected bibliography.
pub const BIBLIOGRAPHY_LABEL: &str = "Bibliography";
/// Label of the placeholder unit emitted when no bibliography was detected.
pub const EMPTY_BIBLIOGRAPHY_LABEL: &str = "Empty Bibliography section";

/// A document identifier (usually a DOI) as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An annotated span of extracted text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub label: Option<String>,
    pub text: String,
    pub annotations: BTreeMap<String, String>,
}

impl Unit {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            label: None,
            text: text.into(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotate(key, value);
        self
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// An ordered sequence of units carrying a label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedCollection {
    pub label: String,
    pub units: Vec<Unit>,
}

impl AnnotatedCollection {
    pub fn new(label: impl Into<String>, units: Vec<Unit>) -> Self {
        Self {
            label: label.into(),
            units,
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// What a single identifier contributes to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentOutput {
    Unit(Unit),
    Collection(AnnotatedCollection),
}

impl DocumentOutput {
    pub fn units(&self) -> &[Unit] {
        match self {
            Self::Unit(unit) => std::slice::from_ref(unit),
            Self::Collection(collection) => &collection.units,
        }
    }

    pub fn units_mut(&mut self) -> &mut [Unit] {
        match self {
            Self::Unit(unit) => std::slice::from_mut(unit),
            Self::Collection(collection) => &mut collection.units,
        }
    }

    pub fn into_units(self) -> Vec<Unit> {
        match self {
            Self::Unit(unit) => vec![unit],
            Self::Collection(collection) => collection.units,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Unit(unit) => unit.label.as_deref(),
            Self::Collection(collection) => Some(&collection.label),
        }
    }
}

/// Final output of one run.
///
/// A one-identifier run hands back that identifier's output untouched;
/// larger runs concatenate every contribution, in identifier order, under
/// the caller's label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum BatchResult {
    Single(DocumentOutput),
    Concatenated(AnnotatedCollection),
}

impl BatchResult {
    pub fn units(&self) -> &[Unit] {
        match self {
            Self::Single(output) => output.units(),
            Self::Concatenated(collection) => &collection.units,
        }
    }

    pub fn units_mut(&mut self) -> &mut [Unit] {
        match self {
            Self::Single(output) => output.units_mut(),
            Self::Concatenated(collection) => &mut collection.units,
        }
    }

    pub fn len(&self) -> usize {
        self.units().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units().is_empty()
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Single(output) => output.label(),
            Self::Concatenated(collection) => Some(&collection.label),
        }
    }
}

/// How extracted text is turned into units. Chosen per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// The whole document becomes one unit.
    #[default]
    Plain,
    /// Only the text from the bibliography heading onward is kept.
    Bibliography,
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::Bibliography => f.write_str("bibliography"),
        }
    }
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "all" => Ok(Self::Plain),
            "bibliography" | "bib" => Ok(Self::Bibliography),
            other => Err(format!(
                "unknown selection mode '{other}' (expected 'plain' or 'bibliography')"
            )),
        }
    }
}

/// A request to process one snapshot of identifiers.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub identifiers: Vec<Identifier>,
    pub mode: SelectionMode,
    pub output_label: String,
}

impl RunRequest {
    pub fn new(
        identifiers: Vec<Identifier>,
        mode: SelectionMode,
        output_label: impl Into<String>,
    ) -> Self {
        Self {
            identifiers,
            mode,
            output_label: output_label.into(),
        }
    }

    /// Snapshot the set; later edits to `set` do not affect the request.
    pub fn from_set(set: &IdentifierSet, mode: SelectionMode, output_label: impl Into<String>) -> Self {
        Self::new(set.snapshot(), mode, output_label)
    }
}

/// Lifecycle of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RunState {
    #[default]
    Idle,
    Validating,
    Downloading,
    Extracting,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Phase tag carried by progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Downloading,
    Extracting,
    Assembling,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downloading => f.write_str("downloading"),
            Self::Extracting => f.write_str("extracting"),
            Self::Assembling => f.write_str("assembling"),
        }
    }
}

/// Progress events emitted by a run, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// 0..=100 within the current phase.
    pub percent: u8,
    pub message: String,
}

/// Payload of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub result: BatchResult,
    /// Identifiers for which bibliography mode found no heading, in input order.
    pub missing_bibliographies: Vec<Identifier>,
}

impl BatchReport {
    pub fn missing_count(&self) -> usize {
        self.missing_bibliographies.len()
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("no identifiers to process")]
    EmptyInput,
    #[error("retrieval service is unreachable")]
    ServiceUnreachable,
    #[error("download failed for {identifier}: {detail}")]
    DownloadFailed {
        identifier: Identifier,
        detail: String,
    },
    #[error("no document was retrieved for {identifier}")]
    MissingArtifact { identifier: Identifier },
    #[error("text extraction failed for {identifier}: {detail}")]
    ExtractionFailed {
        identifier: Identifier,
        detail: String,
    },
    #[error("could not prepare temporary storage: {0}")]
    Staging(#[from] std::io::Error),
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl RunError {
    /// The identifier that caused the failure, if any.
    pub fn identifier(&self) -> Option<&Identifier> {
        match self {
            Self::DownloadFailed { identifier, .. }
            | Self::MissingArtifact { identifier }
            | Self::ExtractionFailed { identifier, .. } => Some(identifier),
            _ => None,
        }
    }
}

/// Terminal event of a run. Exactly one is produced per run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(BatchReport),
    Failed(RunError),
    Cancelled,
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            Self::Completed(_) => RunState::Completed,
            Self::Failed(_) => RunState::Failed,
            Self::Cancelled => RunState::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_mode_parses_aliases() {
        assert_eq!("Plain".parse::<SelectionMode>(), Ok(SelectionMode::Plain));
        assert_eq!(
            " bib ".parse::<SelectionMode>(),
            Ok(SelectionMode::Bibliography)
        );
        assert!("sections".parse::<SelectionMode>().is_err());
    }

    #[test]
    fn batch_result_units_cover_both_shapes() {
        let single = BatchResult::Single(DocumentOutput::Unit(Unit::new("a")));
        assert_eq!(single.len(), 1);

        let concatenated = BatchResult::Concatenated(AnnotatedCollection::new(
            "out",
            vec![Unit::new("a"), Unit::new("b")],
        ));
        assert_eq!(concatenated.len(), 2);
        assert_eq!(concatenated.label(), Some("out"));
    }

    #[test]
    fn run_error_reports_offending_identifier() {
        let err = RunError::ExtractionFailed {
            identifier: Identifier::new("10.1/b"),
            detail: "bad xref".into(),
        };
        assert_eq!(err.identifier().map(Identifier::as_str), Some("10.1/b"));
        assert!(RunError::EmptyInput.identifier().is_none());
    }

    #[test]
    fn serialized_result_is_tagged() {
        let result = BatchResult::Single(DocumentOutput::Unit(
            Unit::new("text").with_annotation(DEFAULT_IDENTIFIER_KEY, "10.1/a"),
        ));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["shape"], "single");
        assert_eq!(json["kind"], "unit");
        assert_eq!(json["annotations"]["source_identifier"], "10.1/a");
    }
}
