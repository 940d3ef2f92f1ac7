//! Ingestion pipeline: window gating, dedup, checkpointing and run orchestration.

use std::collections::HashSet;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use boardrank_adapters::{DocumentHandle, DocumentSource, FixtureSource};
use boardrank_core::{AggregateSnapshot, CommentIdentity, ScoreWeights};
use boardrank_storage::{
    fetch_sequence_with_retry, fetch_with_retry, CheckpointState, CheckpointStore, RetryPolicy,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "boardrank-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub retry: RetrySettings,
    pub checkpoint_path: PathBuf,
    pub checkpoint_every: u64,
    pub old_streak_limit: u32,
    pub weights: ScoreWeights,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            window_start: utc_midnight(2024, 1, 1),
            window_end: utc_midnight(2025, 1, 1),
            retry: RetrySettings::default(),
            checkpoint_path: PathBuf::from("data.json"),
            checkpoint_every: 10,
            old_streak_limit: 20,
            weights: ScoreWeights::default(),
        }
    }
}

fn utc_midnight(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

impl RunConfig {
    /// Optional YAML file, then `BOARDRANK_*` environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => Self::default(),
        };
        let config = base.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup("BOARDRANK_CHECKPOINT_PATH") {
            self.checkpoint_path = PathBuf::from(path);
        }
        if let Some(every) = lookup("BOARDRANK_CHECKPOINT_EVERY") {
            self.checkpoint_every = every
                .parse()
                .with_context(|| format!("BOARDRANK_CHECKPOINT_EVERY={every}"))?;
        }
        if let Some(attempts) = lookup("BOARDRANK_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts
                .parse()
                .with_context(|| format!("BOARDRANK_MAX_ATTEMPTS={attempts}"))?;
        }
        if let Some(delay) = lookup("BOARDRANK_BASE_DELAY_MS") {
            self.retry.base_delay_ms = delay
                .parse()
                .with_context(|| format!("BOARDRANK_BASE_DELAY_MS={delay}"))?;
        }
        if let Some(start) = lookup("BOARDRANK_WINDOW_START") {
            self.window_start = parse_config_time(&start)
                .with_context(|| format!("BOARDRANK_WINDOW_START={start}"))?;
        }
        if let Some(end) = lookup("BOARDRANK_WINDOW_END") {
            self.window_end = parse_config_time(&end)
                .with_context(|| format!("BOARDRANK_WINDOW_END={end}"))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_start > self.window_end {
            bail!(
                "window start {} is after window end {}",
                self.window_start,
                self.window_end
            );
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.checkpoint_every == 0 {
            bail!("checkpoint_every must be at least 1");
        }
        if self.old_streak_limit == 0 {
            bail!("old_streak_limit must be at least 1");
        }
        Ok(())
    }

    pub fn window(&self) -> Result<WindowGate> {
        WindowGate::new(self.window_start, self.window_end)
    }
}

fn parse_config_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(boardrank_core::normalize_timestamp(raw)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPosition {
    TooNew,
    InRange,
    TooOld,
}

/// Inclusive `[start, end]` aggregation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGate {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl WindowGate {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            bail!("window start {start} is after window end {end}");
        }
        Ok(Self { start, end })
    }

    pub fn classify(&self, at: DateTime<Utc>) -> WindowPosition {
        if at > self.end {
            WindowPosition::TooNew
        } else if at < self.start {
            WindowPosition::TooOld
        } else {
            WindowPosition::InRange
        }
    }
}

/// Identities seen so far within one scope (a run, or one document's comments).
#[derive(Debug, Clone)]
pub struct DedupTracker<K> {
    seen: HashSet<K>,
}

impl<K> Default for DedupTracker<K> {
    fn default() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }
}

impl<K: Eq + Hash> DedupTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `id` is seen, false afterwards.
    pub fn observe(&mut self, id: K) -> bool {
        self.seen.insert(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub documents_seen: u64,
    pub in_range: u64,
    pub too_new: u64,
    pub too_old: u64,
    pub duplicates: u64,
    pub unavailable: u64,
    pub malformed_timestamps: u64,
    pub unattributed_articles: u64,
    pub comments_recorded: u64,
    pub comments_skipped: u64,
    pub truncated_comment_streams: u64,
    pub checkpoints_written: u64,
    pub checkpoint_failures: u64,
}

/// Mutable state of one ingestion run, threaded through every step.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub run_started_at: DateTime<Utc>,
    pub snapshot: AggregateSnapshot,
    pub processed_count: u64,
    pub seen_documents: DedupTracker<String>,
    pub old_streak: u32,
    pub stats: RunStats,
}

impl RunContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            run_started_at: now,
            snapshot: AggregateSnapshot::new(),
            processed_count: 0,
            seen_documents: DedupTracker::new(),
            old_streak: 0,
            stats: RunStats::default(),
        }
    }

    /// Continues from a checkpoint with a fresh dedup set.
    pub fn resume(checkpoint: CheckpointState, now: DateTime<Utc>) -> Self {
        Self {
            snapshot: checkpoint.snapshot,
            processed_count: checkpoint.processed_count,
            ..Self::new(now)
        }
    }

    pub fn checkpoint_state(&self, now: DateTime<Utc>) -> CheckpointState {
        CheckpointState {
            run_id: self.run_id,
            run_started_at: self.run_started_at,
            written_at: now,
            processed_count: self.processed_count,
            snapshot: self.snapshot.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unavailable,
    MalformedTimestamp,
    Duplicate,
    TooNew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    InRange,
    Skipped(SkipReason),
    TooOld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    SourceExhausted,
    OldStreak,
    SourceFailed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stop_reason: StopReason,
    pub processed_count: u64,
    pub writers: usize,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub checkpoint_path: String,
    pub stats: RunStats,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub snapshot: AggregateSnapshot,
}

pub struct IngestionLoop {
    gate: WindowGate,
    retry: RetryPolicy,
    checkpoint_every: u64,
    old_streak_limit: u32,
    store: CheckpointStore,
    cancel: CancellationToken,
}

impl IngestionLoop {
    pub fn new(config: &RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            gate: config.window()?,
            retry: config.retry.policy(),
            checkpoint_every: config.checkpoint_every,
            old_streak_limit: config.old_streak_limit,
            store: CheckpointStore::new(config.checkpoint_path.clone()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, source: &mut dyn DocumentSource) -> Result<RunOutcome> {
        self.run_with_context(source, RunContext::new(Utc::now()))
            .await
    }

    /// Picks up the checkpoint on disk if there is one; a corrupt checkpoint is an error.
    pub async fn resume(&self, source: &mut dyn DocumentSource) -> Result<RunOutcome> {
        let now = Utc::now();
        let ctx = match self
            .store
            .load()
            .await
            .with_context(|| format!("loading checkpoint {}", self.store.path().display()))?
        {
            Some(checkpoint) => {
                info!(
                    processed = checkpoint.processed_count,
                    writers = checkpoint.snapshot.writer_count(),
                    "resuming from checkpoint"
                );
                RunContext::resume(checkpoint, now)
            }
            None => RunContext::new(now),
        };
        self.run_with_context(source, ctx).await
    }

    pub async fn run_with_context(
        &self,
        source: &mut dyn DocumentSource,
        ctx: RunContext,
    ) -> Result<RunOutcome> {
        let span = info_span!("ingestion_run", run_id = %ctx.run_id, source_id = source.source_id());
        self.drive(source, ctx).instrument(span).await
    }

    async fn drive(&self, source: &mut dyn DocumentSource, mut ctx: RunContext) -> Result<RunOutcome> {
        info!(
            window_start = %self.gate.start,
            window_end = %self.gate.end,
            "ingestion started"
        );

        let stop_reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break StopReason::Cancelled,
                next = source.next_handle() => next,
            };
            let handle = match next {
                Ok(Some(handle)) => handle,
                Ok(None) => break StopReason::SourceExhausted,
                Err(err) => {
                    warn!(error = %err, "source traversal failed; stopping");
                    break StopReason::SourceFailed;
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break StopReason::Cancelled,
                outcome = self.process_document(&mut ctx, handle.as_ref()) => outcome,
            };

            if outcome == DocumentOutcome::TooOld {
                ctx.old_streak += 1;
                if ctx.old_streak >= self.old_streak_limit {
                    info!(
                        streak = ctx.old_streak,
                        "consecutive documents predate the window; stopping"
                    );
                    break StopReason::OldStreak;
                }
            } else {
                ctx.old_streak = 0;
            }

            if outcome == DocumentOutcome::InRange {
                ctx.processed_count += 1;
                if ctx.processed_count % self.checkpoint_every == 0 {
                    self.periodic_checkpoint(&mut ctx).await;
                }
            }
        };

        let finished_at = Utc::now();
        if stop_reason == StopReason::Cancelled {
            warn!(
                processed = ctx.processed_count,
                "ingestion cancelled; writing final checkpoint"
            );
        }

        // The checkpoint keeps unknown dates unknown so a resumed run widens from real observations.
        self.store
            .write(&ctx.checkpoint_state(finished_at))
            .await
            .with_context(|| format!("writing final checkpoint {}", self.store.path().display()))?;
        ctx.stats.checkpoints_written += 1;

        if stop_reason != StopReason::Cancelled {
            if ctx.snapshot.date_range().is_none() {
                warn!("no in-range documents; falling back to a one-day window ending now");
            }
            ctx.snapshot.finalize(finished_at);
        }

        info!(
            ?stop_reason,
            processed = ctx.processed_count,
            writers = ctx.snapshot.writer_count(),
            "ingestion finished"
        );

        let summary = RunSummary {
            run_id: ctx.run_id,
            source_id: source.source_id().to_string(),
            started_at: ctx.run_started_at,
            finished_at,
            stop_reason,
            processed_count: ctx.processed_count,
            writers: ctx.snapshot.writer_count(),
            start_date: ctx.snapshot.start_date,
            end_date: ctx.snapshot.end_date,
            checkpoint_path: self.store.path().display().to_string(),
            stats: ctx.stats,
        };
        Ok(RunOutcome {
            summary,
            snapshot: ctx.snapshot,
        })
    }

    async fn periodic_checkpoint(&self, ctx: &mut RunContext) {
        let now = Utc::now();
        match self.store.write(&ctx.checkpoint_state(now)).await {
            Ok(()) => {
                ctx.stats.checkpoints_written += 1;
                let elapsed_minutes = (now - ctx.run_started_at).num_seconds() as f64 / 60.0;
                info!(
                    processed = ctx.processed_count,
                    elapsed_minutes = %format!("{elapsed_minutes:.2}"),
                    "checkpoint saved"
                );
            }
            Err(err) => {
                ctx.stats.checkpoint_failures += 1;
                warn!(error = %err, processed = ctx.processed_count, "checkpoint write failed; continuing");
            }
        }
    }

    /// Handles one traversed item. All snapshot mutation happens after the last await.
    pub async fn process_document(
        &self,
        ctx: &mut RunContext,
        handle: &dyn DocumentHandle,
    ) -> DocumentOutcome {
        ctx.stats.documents_seen += 1;
        let position = handle.position();

        let label = format!("document@{position}");
        let Some(document) = fetch_with_retry(&self.retry, &label, || handle.document())
            .await
            .into_value()
        else {
            ctx.stats.unavailable += 1;
            return DocumentOutcome::Skipped(SkipReason::Unavailable);
        };

        let posted_at = match document.timestamp() {
            Ok(posted_at) => posted_at,
            Err(err) => {
                warn!(position, error = %err, "skipping document with malformed timestamp");
                ctx.stats.malformed_timestamps += 1;
                return DocumentOutcome::Skipped(SkipReason::MalformedTimestamp);
            }
        };

        let document_id = document.identity();
        if !ctx.seen_documents.observe(document_id.clone()) {
            debug!(position, %document_id, "duplicate document; skipping");
            ctx.stats.duplicates += 1;
            return DocumentOutcome::Skipped(SkipReason::Duplicate);
        }

        match self.gate.classify(posted_at) {
            WindowPosition::TooNew => {
                debug!(position, %posted_at, "document is newer than the window; skipping");
                ctx.stats.too_new += 1;
                return DocumentOutcome::Skipped(SkipReason::TooNew);
            }
            WindowPosition::TooOld => {
                debug!(position, %posted_at, "document predates the window");
                ctx.stats.too_old += 1;
                return DocumentOutcome::TooOld;
            }
            WindowPosition::InRange => {}
        }

        let label = format!("comments@{document_id}");
        let comments =
            fetch_sequence_with_retry(&self.retry, &label, || handle.comments()).await;
        if !comments.is_complete() {
            ctx.stats.truncated_comment_streams += 1;
        }

        match document.author.identity() {
            Some(writer) => ctx
                .snapshot
                .record_article(writer, &document.author.display_name),
            None => {
                warn!(position, %document_id, "document has no usable author; article not counted");
                ctx.stats.unattributed_articles += 1;
            }
        }

        let mut seen_comments: DedupTracker<CommentIdentity> = DedupTracker::new();
        for comment in comments.into_items() {
            if !seen_comments.observe(comment.identity()) {
                continue;
            }
            match comment.author.identity() {
                Some(writer) => {
                    ctx.snapshot
                        .record_reply(writer, &comment.author.display_name);
                    ctx.stats.comments_recorded += 1;
                }
                None => {
                    warn!(position, %document_id, "comment has no usable author; skipping");
                    ctx.stats.comments_skipped += 1;
                }
            }
        }

        ctx.snapshot.widen_date_range(posted_at);
        ctx.stats.in_range += 1;
        DocumentOutcome::InRange
    }
}

/// Runs one ingestion pass over a fixture board.
pub async fn ingest_fixture(
    config: &RunConfig,
    fixture: &Path,
    resume: bool,
    cancel: CancellationToken,
) -> Result<RunOutcome> {
    let mut source = FixtureSource::from_path(fixture)?;
    let pipeline = IngestionLoop::new(config)?.with_cancellation(cancel);
    if resume {
        pipeline.resume(&mut source).await
    } else {
        pipeline.run(&mut source).await
    }
}
