//! Document source contracts + fixture-backed board source.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use boardrank_core::{CommentView, DocumentView};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "boardrank-adapters";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transient source failure: {0}")]
    Transient(String),
}

/// One traversed item. Reads may fail transiently and may be repeated.
#[async_trait]
pub trait DocumentHandle: Send + Sync {
    /// Zero-based position in traversal order.
    fn position(&self) -> u64;

    async fn document(&self) -> Result<Option<DocumentView>, SourceError>;

    /// Opens a fresh pass over the document's comments.
    fn comments(&self) -> BoxStream<'_, Result<CommentView, SourceError>>;
}

/// Board traversal in a stable, source-defined order (newest first for real boards).
#[async_trait]
pub trait DocumentSource: Send {
    fn source_id(&self) -> &str;

    async fn next_handle(&mut self) -> Result<Option<Box<dyn DocumentHandle>>, SourceError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureBoard {
    pub board_id: String,
    #[serde(default)]
    pub entries: Vec<FixtureEntry>,
    /// Traversal itself fails once this many handles have been handed out.
    #[serde(default)]
    pub fail_traversal_after: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureEntry {
    #[serde(default)]
    pub document: Option<DocumentView>,
    #[serde(default)]
    pub comments: Vec<CommentView>,
    #[serde(default)]
    pub faults: FixtureFaults,
}

impl FixtureEntry {
    pub fn new(document: DocumentView, comments: Vec<CommentView>) -> Self {
        Self {
            document: Some(document),
            comments,
            faults: FixtureFaults::default(),
        }
    }

    pub fn with_faults(mut self, faults: FixtureFaults) -> Self {
        self.faults = faults;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureFaults {
    /// Leading `document()` calls that fail transiently.
    #[serde(default)]
    pub document_failures: u32,
    /// Per leading comment pass: comments yielded before that pass fails.
    #[serde(default)]
    pub comment_failures: Vec<usize>,
}

pub fn load_fixture_board(path: impl AsRef<Path>) -> Result<FixtureBoard> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub struct FixtureSource {
    board_id: String,
    entries: std::vec::IntoIter<FixtureEntry>,
    handed_out: usize,
    fail_traversal_after: Option<usize>,
}

impl FixtureSource {
    pub fn new(board: FixtureBoard) -> Self {
        Self {
            board_id: board.board_id,
            entries: board.entries.into_iter(),
            handed_out: 0,
            fail_traversal_after: board.fail_traversal_after,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        load_fixture_board(path).map(Self::new)
    }
}

#[async_trait]
impl DocumentSource for FixtureSource {
    fn source_id(&self) -> &str {
        &self.board_id
    }

    async fn next_handle(&mut self) -> Result<Option<Box<dyn DocumentHandle>>, SourceError> {
        if self.fail_traversal_after == Some(self.handed_out) {
            return Err(SourceError::Transient(format!(
                "board {} listing failed after {} items",
                self.board_id, self.handed_out
            )));
        }
        let Some(entry) = self.entries.next() else {
            return Ok(None);
        };
        let position = self.handed_out as u64;
        self.handed_out += 1;
        Ok(Some(Box::new(FixtureHandle {
            position,
            entry,
            document_calls: AtomicU32::new(0),
            comment_passes: AtomicUsize::new(0),
        })))
    }
}

struct FixtureHandle {
    position: u64,
    entry: FixtureEntry,
    document_calls: AtomicU32,
    comment_passes: AtomicUsize,
}

#[async_trait]
impl DocumentHandle for FixtureHandle {
    fn position(&self) -> u64 {
        self.position
    }

    async fn document(&self) -> Result<Option<DocumentView>, SourceError> {
        let call = self.document_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.entry.faults.document_failures {
            return Err(SourceError::Transient(format!(
                "document read {} at position {} timed out",
                call + 1,
                self.position
            )));
        }
        Ok(self.entry.document.clone())
    }

    fn comments(&self) -> BoxStream<'_, Result<CommentView, SourceError>> {
        let pass = self.comment_passes.fetch_add(1, Ordering::SeqCst);
        let comments = self.entry.comments.iter().cloned().map(Ok);
        let items: Vec<_> = match self.entry.faults.comment_failures.get(pass) {
            Some(&fail_after) => comments
                .take(fail_after)
                .chain(std::iter::once(Err(SourceError::Transient(format!(
                    "comment pass {} at position {} dropped",
                    pass + 1,
                    self.position
                )))))
                .collect(),
            None => comments.collect(),
        };
        stream::iter(items).boxed()
    }
}
