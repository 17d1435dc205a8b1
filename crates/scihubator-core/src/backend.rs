//! Interfaces to the two external collaborators: document retrieval and
//! page-text extraction.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use thiserror::Error;

use crate::Identifier;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("document not found")]
    NotFound,
    #[error("service returned HTTP {0}")]
    Status(u16),
    #[error("service did not return a PDF")]
    NotPdf,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open document: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<(), FetchError>> + Send + 'a>>;

/// A service that can deliver the document behind an identifier.
///
/// Implementations make a single attempt per call; the pipeline never retries.
pub trait RetrievalBackend: Send + Sync {
    /// Human-readable name used in logs (e.g. "Sci-Hub").
    fn name(&self) -> &str;

    /// Quick health check. Must return `false` rather than fail on network
    /// errors and must finish within a bounded timeout.
    fn probe<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Download the document for `identifier` into `destination`.
    fn fetch<'a>(&'a self, identifier: &'a Identifier, destination: &'a Path) -> FetchFuture<'a>;
}

/// Page-level text extraction from a document on disk.
///
/// Called from a blocking thread; implementations may do CPU-heavy work.
pub trait ExtractionBackend: Send + Sync {
    /// Extract one string per page, in page order.
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, BackendError>;
}
