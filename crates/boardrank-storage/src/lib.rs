//! Retry-hardened fetching + durable checkpoint storage for boardrank.

use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use boardrank_core::{merge_all, AggregateSnapshot};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "boardrank-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait between attempt `attempt_index` and the next one: `base_delay * 2^attempt_index`.
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    Success { value: T, attempts: usize },
    Exhausted { attempts: usize, last_error: Option<String> },
}

impl<T> FetchOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Runs `attempt` until it yields a value or the policy runs out of attempts.
///
/// Each attempt resolves to `Ok(Some(value))` on success, `Ok(None)` when the
/// source had no data, or `Err(_)` on a transient failure. Failures are logged and
/// never propagated; exhaustion is reported as [`FetchOutcome::Exhausted`].
pub async fn fetch_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt: F,
) -> FetchOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    let attempts = policy.attempts();
    let mut last_error = None;

    for attempt_index in 0..attempts {
        match attempt().await {
            Ok(Some(value)) => {
                return FetchOutcome::Success {
                    value,
                    attempts: attempt_index + 1,
                }
            }
            Ok(None) => debug!(label, attempt = attempt_index + 1, "fetch returned no data"),
            Err(err) => {
                warn!(
                    label,
                    attempt = attempt_index + 1,
                    max_attempts = attempts,
                    error = %err,
                    "fetch attempt failed"
                );
                last_error = Some(err.to_string());
            }
        }

        if attempt_index + 1 < attempts {
            tokio::time::sleep(policy.delay_for_attempt(attempt_index)).await;
        }
    }

    warn!(label, attempts, "fetch retries exhausted");
    FetchOutcome::Exhausted {
        attempts,
        last_error,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome<T> {
    Complete {
        items: Vec<T>,
        attempts: usize,
    },
    Truncated {
        items: Vec<T>,
        attempts: usize,
        last_error: Option<String>,
    },
}

impl<T> SequenceOutcome<T> {
    pub fn items(&self) -> &[T] {
        match self {
            Self::Complete { items, .. } | Self::Truncated { items, .. } => items,
        }
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Complete { items, .. } | Self::Truncated { items, .. } => items,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Reads a whole sequence, restarting from empty whenever a pass fails midway.
///
/// Items are buffered per pass and only a completed pass is returned as
/// [`SequenceOutcome::Complete`]. Once every pass has failed, the longest partial
/// pass comes back as [`SequenceOutcome::Truncated`].
pub async fn fetch_sequence_with_retry<T, E, F, S>(
    policy: &RetryPolicy,
    label: &str,
    mut open: F,
) -> SequenceOutcome<T>
where
    F: FnMut() -> S,
    S: Stream<Item = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts();
    let mut best_partial = Vec::new();
    let mut last_error = None;

    for attempt_index in 0..attempts {
        let mut stream = std::pin::pin!(open());
        let mut buffer = Vec::new();
        let mut failure = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(value) => buffer.push(value),
                Err(err) => {
                    failure = Some(err.to_string());
                    break;
                }
            }
        }

        let Some(error) = failure else {
            return SequenceOutcome::Complete {
                items: buffer,
                attempts: attempt_index + 1,
            };
        };

        warn!(
            label,
            attempt = attempt_index + 1,
            max_attempts = attempts,
            buffered = buffer.len(),
            error = %error,
            "sequence pass failed; discarding partial pass"
        );
        if buffer.len() > best_partial.len() {
            best_partial = buffer;
        }
        last_error = Some(error);

        if attempt_index + 1 < attempts {
            tokio::time::sleep(policy.delay_for_attempt(attempt_index)).await;
        }
    }

    warn!(
        label,
        attempts,
        kept = best_partial.len(),
        "sequence retries exhausted; keeping longest partial pass"
    );
    SequenceOutcome::Truncated {
        items: best_partial,
        attempts,
        last_error,
    }
}

/// In-progress run state persisted periodically during ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub run_id: Uuid,
    pub run_started_at: DateTime<Utc>,
    pub written_at: DateTime<Utc>,
    pub processed_count: u64,
    pub snapshot: AggregateSnapshot,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid checkpoint or snapshot: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Write(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the checkpoint on disk via temp-file write + rename.
    pub async fn write(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let span = info_span!("checkpoint_write", run_id = %state.run_id, path = %self.path.display());
        write_atomic(&self.path, &bytes).instrument(span).await?;
        debug!(
            processed = state.processed_count,
            writers = state.snapshot.writer_count(),
            "checkpoint written"
        );
        Ok(())
    }

    /// Loads the checkpoint; `Ok(None)` when none has been written yet.
    pub async fn load(&self) -> Result<Option<CheckpointState>, CheckpointError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Checkpoint(CheckpointState),
    Snapshot(AggregateSnapshot),
}

/// Reads a snapshot from either a checkpoint file or a bare snapshot file.
pub async fn load_snapshot_file(path: &Path) -> Result<AggregateSnapshot, CheckpointError> {
    let bytes = fs::read(path).await.map_err(|source| CheckpointError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: SnapshotFile =
        serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(match file {
        SnapshotFile::Checkpoint(state) => state.snapshot,
        SnapshotFile::Snapshot(snapshot) => snapshot,
    })
}

/// Loads every usable input. Blank and missing paths are skipped with a warning;
/// unreadable or corrupt files fail the whole load.
pub async fn load_snapshot_files(
    paths: &[PathBuf],
) -> Result<Vec<AggregateSnapshot>, CheckpointError> {
    let mut snapshots = Vec::with_capacity(paths.len());
    for path in paths {
        if path.as_os_str().to_string_lossy().trim().is_empty() {
            warn!("skipping blank snapshot path");
            continue;
        }
        if !fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "snapshot file not found; skipping");
            continue;
        }
        snapshots.push(load_snapshot_file(path).await?);
    }
    Ok(snapshots)
}

pub async fn write_snapshot_file(
    path: &Path,
    snapshot: &AggregateSnapshot,
) -> Result<(), CheckpointError> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    write_atomic(path, &bytes).await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSnapshot {
    pub inputs_loaded: usize,
    pub snapshot: AggregateSnapshot,
}

/// Loads every usable input, merges, finalizes at `now` and writes the result to `out`.
pub async fn merge_snapshot_files(
    inputs: &[PathBuf],
    out: &Path,
    now: DateTime<Utc>,
) -> anyhow::Result<MergedSnapshot> {
    let snapshots = load_snapshot_files(inputs).await?;
    let inputs_loaded = snapshots.len();
    let mut snapshot = merge_all(snapshots).context("merging snapshots")?;
    snapshot.finalize(now);
    write_snapshot_file(out, &snapshot)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    Ok(MergedSnapshot {
        inputs_loaded,
        snapshot,
    })
}

/// Writes `bytes` to a sibling temp file and renames it over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}
