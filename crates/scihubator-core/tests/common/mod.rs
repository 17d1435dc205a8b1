//! In-memory retrieval and extraction backends shared by the integration tests.
//!
//! Documents are stored as page lists; "downloading" writes the pages to the
//! destination joined by form feeds and "extracting" splits them again.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use scihubator_core::{
    BackendError, BatchPipeline, ExtractionBackend, FetchError, FetchFuture, Identifier,
    PipelineConfig, RetrievalBackend,
};
use tokio::sync::Semaphore;

pub const PAGE_BREAK: char = '\u{c}';
/// Document body that makes [`PageSplitter`] fail.
pub const CORRUPT: &str = "%CORRUPT%";

#[derive(Default)]
pub struct MockRetrieval {
    pub reachable: bool,
    pub documents: HashMap<String, Vec<String>>,
    /// Identifiers whose fetch fails.
    pub failing: HashSet<String>,
    /// Identifiers whose fetch "succeeds" without writing anything.
    pub silent: HashSet<String>,
    /// When set, each fetch waits for a permit before returning.
    pub gate: Option<Arc<Semaphore>>,
    pub on_fetch: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub fetched: Mutex<Vec<String>>,
    pub probes: Mutex<usize>,
}

impl MockRetrieval {
    pub fn reachable() -> Self {
        Self {
            reachable: true,
            ..Self::default()
        }
    }

    pub fn with_document(mut self, id: &str, pages: &[&str]) -> Self {
        self.documents
            .insert(id.to_string(), pages.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn failing_on(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn silent_on(mut self, id: &str) -> Self {
        self.silent.insert(id.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl RetrievalBackend for MockRetrieval {
    fn name(&self) -> &str {
        "mock"
    }

    fn probe<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            *self.probes.lock().unwrap() += 1;
            self.reachable
        })
    }

    fn fetch<'a>(&'a self, identifier: &'a Identifier, destination: &'a Path) -> FetchFuture<'a> {
        Box::pin(async move {
            let id = identifier.as_str();
            self.fetched.lock().unwrap().push(id.to_string());
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if let Some(hook) = &self.on_fetch {
                hook(id);
            }
            if self.failing.contains(id) {
                return Err(FetchError::NotFound);
            }
            if self.silent.contains(id) {
                return Ok(());
            }
            let pages = self.documents.get(id).ok_or(FetchError::NotFound)?;
            let body = pages.join(&PAGE_BREAK.to_string());
            std::fs::write(destination, body)?;
            Ok(())
        })
    }
}

/// Splits a staged document back into its pages.
pub struct PageSplitter;

impl ExtractionBackend for PageSplitter {
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, BackendError> {
        let body = std::fs::read_to_string(path)?;
        if body.contains(CORRUPT) {
            return Err(BackendError::OpenError("malformed document".into()));
        }
        Ok(body.split(PAGE_BREAK).map(str::to_string).collect())
    }
}

pub fn ids(values: &[&str]) -> Vec<Identifier> {
    values.iter().map(|v| Identifier::new(*v)).collect()
}

pub fn pipeline(retrieval: Arc<MockRetrieval>, staging: &Path) -> BatchPipeline {
    pipeline_with(retrieval, staging, PipelineConfig::default())
}

pub fn pipeline_with(
    retrieval: Arc<MockRetrieval>,
    staging: &Path,
    config: PipelineConfig,
) -> BatchPipeline {
    let config = PipelineConfig {
        staging_dir: Some(staging.to_path_buf()),
        ..config
    };
    BatchPipeline::new(retrieval, Arc::new(PageSplitter), config)
}

/// Entries left behind under a staging root.
pub fn leftovers(staging: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(staging)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
