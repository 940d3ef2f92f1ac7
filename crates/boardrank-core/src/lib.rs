//! Core domain model, aggregation, merge and ranking for boardrank.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CRATE_NAME: &str = "boardrank-core";

/// Display name the board substitutes for writers with no visible nickname.
pub const BLANK_NICKNAME: &str = "\u{3164}";
/// Suffix the board appends to nicknames it truncated for display.
pub const TRUNCATION_MARKER: &str = "..";

/// Stable key distinguishing one writer from another. Compared byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriterIdentity(String);

impl WriterIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WriterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WriterIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Structured author key handed over by a document source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriterKey {
    pub display_name: String,
    #[serde(default)]
    pub account_id: Option<String>,
}

impl WriterKey {
    pub fn new(display_name: impl Into<String>, account_id: Option<&str>) -> Self {
        Self {
            display_name: display_name.into(),
            account_id: account_id.map(str::to_string),
        }
    }

    /// Account id when present, display name otherwise. `None` when the key carries neither.
    pub fn identity(&self) -> Option<WriterIdentity> {
        match self.account_id.as_deref() {
            Some(id) if !id.is_empty() => Some(WriterIdentity::new(id)),
            _ if !self.display_name.is_empty() => Some(WriterIdentity::new(self.display_name.clone())),
            _ => None,
        }
    }
}

/// Whether a nickname may appear in the displayed nickname set.
pub fn is_displayable_nickname(nickname: &str) -> bool {
    !nickname.is_empty() && nickname != BLANK_NICKNAME && !nickname.ends_with(TRUNCATION_MARKER)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("unparseable timestamp {0:?}")]
    Unparseable(String),
}

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y.%m.%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

/// Normalizes a source timestamp to UTC. Zone-less timestamps are taken as UTC already.
pub fn normalize_timestamp(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let raw = raw.trim();
    if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
        return Ok(zoned.with_timezone(&Utc));
    }
    for format in ZONED_FORMATS {
        if let Ok(zoned) = DateTime::parse_from_str(raw, format) {
            return Ok(zoned.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(TimestampError::Unparseable(raw.to_string()))
}

/// Read-only view of a board document as exposed by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentView {
    #[serde(default)]
    pub id: Option<String>,
    pub author: WriterKey,
    pub time: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl DocumentView {
    /// Explicit id, or a sha256 over author, time, account id, content and title.
    pub fn identity(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        let mut base = format!(
            "{}_{}_{}",
            self.author.display_name,
            self.time,
            self.author.account_id.as_deref().unwrap_or_default()
        );
        for part in [&self.content, &self.title] {
            if let Some(text) = part.as_deref().filter(|text| !text.is_empty()) {
                base.push('_');
                base.push_str(text);
            }
        }
        let mut hasher = Sha256::new();
        hasher.update(base.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>, TimestampError> {
        normalize_timestamp(&self.time)
    }
}

/// Read-only view of a single comment on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentView {
    #[serde(default)]
    pub id: Option<String>,
    pub author: WriterKey,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommentIdentity {
    Explicit(String),
    Derived {
        author: WriterKey,
        content: Option<String>,
        time: Option<String>,
    },
}

impl CommentView {
    /// Explicit id if present, else the `(author, content, time)` tuple.
    pub fn identity(&self) -> CommentIdentity {
        match &self.id {
            Some(id) => CommentIdentity::Explicit(id.clone()),
            None => CommentIdentity::Derived {
                author: self.author.clone(),
                content: self.content.clone(),
                time: self.time.clone(),
            },
        }
    }
}

/// Per-writer aggregate. Scoring fields stay unset until [`RankEngine::rank`] runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterRecord {
    pub article_count: u64,
    pub reply_count: u64,
    #[serde(default)]
    pub nicknames: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_rank: Option<u32>,
}

impl WriterRecord {
    fn note_nickname(&mut self, nickname: &str) {
        if is_displayable_nickname(nickname) {
            self.nicknames.insert(nickname.to_string());
        }
    }

    /// Nicknames suitable for display, sorted.
    pub fn display_nicknames(&self) -> Vec<String> {
        self.nicknames
            .iter()
            .filter(|nick| is_displayable_nickname(nick))
            .cloned()
            .collect()
    }

    pub fn clear_scoring(&mut self) {
        self.score = None;
        self.article_rank = None;
        self.reply_rank = None;
    }

    fn absorb(&mut self, other: WriterRecord) {
        self.article_count += other.article_count;
        self.reply_count += other.reply_count;
        self.nicknames.extend(other.nicknames);
        self.clear_scoring();
    }
}

/// One aggregate state: optional date range plus per-writer records.
///
/// The serialized form requires `records` and rejects unknown fields, so an
/// unrelated JSON document never loads as an empty aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateSnapshot {
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub records: BTreeMap<WriterIdentity, WriterRecord>,
}

impl AggregateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_article(&mut self, identity: WriterIdentity, nickname: &str) {
        let record = self.records.entry(identity).or_default();
        record.article_count += 1;
        record.note_nickname(nickname);
    }

    pub fn record_reply(&mut self, identity: WriterIdentity, nickname: &str) {
        let record = self.records.entry(identity).or_default();
        record.reply_count += 1;
        record.note_nickname(nickname);
    }

    pub fn widen_date_range(&mut self, at: DateTime<Utc>) {
        self.start_date = min_present(self.start_date, Some(at));
        self.end_date = max_present(self.end_date, Some(at));
    }

    /// Fills in absent dates. With nothing known, falls back to the day ending at `now`.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        match (self.start_date, self.end_date) {
            (None, None) => {
                self.start_date = Some(now - Duration::days(1));
                self.end_date = Some(now);
            }
            (Some(start), None) => self.end_date = Some(start),
            (None, Some(end)) => self.start_date = Some(end),
            (Some(_), Some(_)) => {}
        }
    }

    pub fn date_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.start_date?, self.end_date?))
    }

    pub fn total_articles(&self) -> u64 {
        self.records.values().map(|r| r.article_count).sum()
    }

    pub fn total_replies(&self) -> u64 {
        self.records.values().map(|r| r.reply_count).sum()
    }

    pub fn writer_count(&self) -> usize {
        self.records.len()
    }
}

fn min_present<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn max_present<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("no snapshots to merge")]
    EmptyInput,
}

/// Combines two snapshots. Commutative and associative.
pub fn merge(a: AggregateSnapshot, b: AggregateSnapshot) -> AggregateSnapshot {
    let mut records = a.records;
    for (identity, record) in b.records {
        match records.get_mut(&identity) {
            Some(existing) => existing.absorb(record),
            None => {
                records.insert(identity, record);
            }
        }
    }
    AggregateSnapshot {
        start_date: min_present(a.start_date, b.start_date),
        end_date: max_present(a.end_date, b.end_date),
        records,
    }
}

/// Folds [`merge`] left to right. An empty input is an error, never an empty snapshot.
pub fn merge_all<I>(snapshots: I) -> Result<AggregateSnapshot, MergeError>
where
    I: IntoIterator<Item = AggregateSnapshot>,
{
    let mut snapshots = snapshots.into_iter();
    let first = snapshots.next().ok_or(MergeError::EmptyInput)?;
    Ok(snapshots.fold(first, merge))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub article: u64,
    pub reply: u64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            article: 3,
            reply: 1,
        }
    }
}

impl ScoreWeights {
    pub fn score(&self, record: &WriterRecord) -> u64 {
        record
            .article_count
            .saturating_mul(self.article)
            .saturating_add(record.reply_count.saturating_mul(self.reply))
    }
}

/// Dense ranking: sorts descending by `metric`, ties broken by `key` ascending.
/// Equal metric values share a rank; the next distinct value gets the next rank.
pub fn dense_rank<T, K: Ord>(
    mut items: Vec<T>,
    metric: impl Fn(&T) -> u64,
    key: impl Fn(&T) -> K,
) -> Vec<(u32, T)> {
    items.sort_by(|a, b| metric(b).cmp(&metric(a)).then_with(|| key(a).cmp(&key(b))));
    let mut ranked = Vec::with_capacity(items.len());
    let mut rank = 0u32;
    let mut previous = None;
    for item in items {
        let value = metric(&item);
        if previous != Some(value) {
            rank += 1;
            previous = Some(value);
        }
        ranked.push((rank, item));
    }
    ranked
}

fn metric_ranks(
    records: &BTreeMap<WriterIdentity, WriterRecord>,
    metric: fn(&WriterRecord) -> u64,
) -> BTreeMap<WriterIdentity, u32> {
    dense_rank(records.iter().collect(), |entry| metric(entry.1), |entry| entry.0)
        .into_iter()
        .map(|(rank, (identity, _))| (identity.clone(), rank))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub identity: WriterIdentity,
    pub nicknames: Vec<String>,
    pub score: u64,
    pub share_percent: f64,
    pub article_count: u64,
    pub article_rank: u32,
    pub reply_count: u64,
    pub reply_rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
    pub total_score: u64,
}

/// Percentage share of `total`; 0 when nothing was scored.
pub fn share_percent(score: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        score as f64 / total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RankEngine {
    weights: ScoreWeights,
}

impl RankEngine {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Attaches score, article rank and reply rank to every record.
    pub fn rank(&self, snapshot: &mut AggregateSnapshot) {
        let records = &snapshot.records;
        let (article_ranks, reply_ranks) = std::thread::scope(|scope| {
            let articles = scope.spawn(|| metric_ranks(records, |r| r.article_count));
            let replies = scope.spawn(|| metric_ranks(records, |r| r.reply_count));
            (
                articles.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
                replies.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
            )
        });

        for (identity, record) in snapshot.records.iter_mut() {
            record.score = Some(self.weights.score(record));
            record.article_rank = article_ranks.get(identity).copied();
            record.reply_rank = reply_ranks.get(identity).copied();
        }
    }

    /// Ranks the snapshot and returns its score-ordered leaderboard.
    pub fn leaderboard(&self, snapshot: &mut AggregateSnapshot) -> Leaderboard {
        self.rank(snapshot);
        let scored = snapshot
            .records
            .iter()
            .map(|(identity, record)| (identity, record, self.weights.score(record)))
            .collect::<Vec<_>>();
        let total_score = scored
            .iter()
            .fold(0_u64, |total, (_, _, score)| total.saturating_add(*score));

        let entries = dense_rank(scored, |entry| entry.2, |entry| entry.0)
            .into_iter()
            .map(|(rank, (identity, record, score))| LeaderboardEntry {
                rank,
                identity: identity.clone(),
                nicknames: record.display_nicknames(),
                score,
                share_percent: share_percent(score, total_score),
                article_count: record.article_count,
                article_rank: record.article_rank.unwrap_or_default(),
                reply_count: record.reply_count,
                reply_rank: record.reply_rank.unwrap_or_default(),
            })
            .collect();

        Leaderboard {
            entries,
            total_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).expect("ts").with_timezone(&Utc)
    }

    fn record(article: u64, reply: u64) -> WriterRecord {
        WriterRecord {
            article_count: article,
            reply_count: reply,
            ..Default::default()
        }
    }

    #[test]
    fn writer_key_prefers_account_id() {
        assert_eq!(
            WriterKey::new("Alice", Some("7")).identity(),
            Some(WriterIdentity::new("7"))
        );
        assert_eq!(
            WriterKey::new("Alice", None).identity(),
            Some(WriterIdentity::new("Alice"))
        );
        assert_eq!(
            WriterKey::new("Alice", Some("")).identity(),
            Some(WriterIdentity::new("Alice"))
        );
        assert_eq!(WriterKey::new("", None).identity(), None);
    }

    #[test]
    fn naive_timestamps_are_taken_as_utc() {
        assert_eq!(
            normalize_timestamp("2024-03-01 12:30:00").expect("naive"),
            ts("2024-03-01T12:30:00Z")
        );
        assert_eq!(
            normalize_timestamp("2024.03.01 12:30:00").expect("dotted"),
            ts("2024-03-01T12:30:00Z")
        );
    }

    #[test]
    fn zoned_timestamps_are_converted_to_utc() {
        assert_eq!(
            normalize_timestamp("2024-03-01T09:00:00+09:00").expect("kst"),
            ts("2024-03-01T00:00:00Z")
        );
        assert_eq!(
            normalize_timestamp("2024-03-01 09:00:00+09:00").expect("spaced kst"),
            ts("2024-03-01T00:00:00Z")
        );
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert_eq!(
            normalize_timestamp("yesterday"),
            Err(TimestampError::Unparseable("yesterday".into()))
        );
    }

    #[test]
    fn document_identity_falls_back_to_content_hash() {
        let mut doc = DocumentView {
            id: None,
            author: WriterKey::new("Alice", Some("7")),
            time: "2024-03-01 12:30:00".into(),
            title: Some("hello".into()),
            content: Some("body".into()),
        };
        let derived = doc.identity();
        assert_eq!(derived.len(), 64);
        assert_eq!(derived, doc.clone().identity());

        doc.title = Some("other".into());
        assert_ne!(doc.identity(), derived);

        doc.id = Some("1234".into());
        assert_eq!(doc.identity(), "1234");
    }

    #[test]
    fn comment_identity_uses_tuple_without_id() {
        let comment = CommentView {
            id: None,
            author: WriterKey::new("Bob", Some("9")),
            content: Some("hi".into()),
            time: Some("2024-03-01 12:31:00".into()),
        };
        let twin = comment.clone();
        assert_eq!(comment.identity(), twin.identity());

        let with_id = CommentView {
            id: Some("c1".into()),
            ..comment
        };
        assert_eq!(with_id.identity(), CommentIdentity::Explicit("c1".into()));
    }

    #[test]
    fn blank_and_truncated_nicknames_count_but_are_not_displayed() {
        let mut snapshot = AggregateSnapshot::new();
        let id = WriterIdentity::new("7");
        snapshot.record_article(id.clone(), "X");
        snapshot.record_article(id.clone(), BLANK_NICKNAME);
        snapshot.record_reply(id.clone(), "Y..");

        let record = &snapshot.records[&id];
        assert_eq!(record.article_count, 2);
        assert_eq!(record.reply_count, 1);
        assert_eq!(record.nicknames, BTreeSet::from(["X".to_string()]));
    }

    #[test]
    fn display_nicknames_filter_loaded_sets() {
        let record = WriterRecord {
            nicknames: BTreeSet::from(["X".into(), BLANK_NICKNAME.into(), "Y..".into()]),
            ..Default::default()
        };
        assert_eq!(record.display_nicknames(), vec!["X".to_string()]);
    }

    #[test]
    fn widen_date_range_tracks_min_and_max() {
        let mut snapshot = AggregateSnapshot::new();
        assert_eq!(snapshot.date_range(), None);

        for raw in [
            "2024-05-01T00:00:00Z",
            "2024-02-01T00:00:00Z",
            "2024-09-01T00:00:00Z",
        ] {
            snapshot.widen_date_range(ts(raw));
        }
        assert_eq!(
            snapshot.date_range(),
            Some((ts("2024-02-01T00:00:00Z"), ts("2024-09-01T00:00:00Z")))
        );
    }

    #[test]
    fn finalize_falls_back_to_one_day_ending_now() {
        let now = ts("2025-01-10T00:00:00Z");
        let mut snapshot = AggregateSnapshot::new();
        snapshot.finalize(now);
        assert_eq!(
            snapshot.date_range(),
            Some((ts("2025-01-09T00:00:00Z"), now))
        );

        let mut half = AggregateSnapshot {
            start_date: Some(ts("2024-02-01T00:00:00Z")),
            ..Default::default()
        };
        half.finalize(now);
        assert_eq!(half.end_date, half.start_date);
    }

    #[test]
    fn merge_sums_counts_and_keeps_present_dates() {
        let mut a = AggregateSnapshot {
            start_date: Some(ts("2025-02-01T00:00:00Z")),
            end_date: None,
            ..Default::default()
        };
        a.record_article("7".into(), "Alice");
        let mut b = AggregateSnapshot {
            start_date: Some(ts("2025-02-08T00:00:00Z")),
            end_date: Some(ts("2025-02-14T00:00:00Z")),
            ..Default::default()
        };
        b.record_article("7".into(), "Alicia");
        b.record_reply("9".into(), "Bob");

        let merged = merge(a, b);
        assert_eq!(merged.start_date, Some(ts("2025-02-01T00:00:00Z")));
        assert_eq!(merged.end_date, Some(ts("2025-02-14T00:00:00Z")));
        let alice = &merged.records[&WriterIdentity::new("7")];
        assert_eq!(alice.article_count, 2);
        assert_eq!(
            alice.nicknames,
            BTreeSet::from(["Alice".to_string(), "Alicia".to_string()])
        );
        assert_eq!(merged.records[&WriterIdentity::new("9")].reply_count, 1);
    }

    #[test]
    fn merge_all_rejects_empty_input() {
        assert_eq!(merge_all(Vec::new()), Err(MergeError::EmptyInput));
    }

    #[test]
    fn merge_all_of_one_is_identity() {
        let mut only = AggregateSnapshot::new();
        only.record_reply("9".into(), "Bob");
        only.widen_date_range(ts("2024-06-01T00:00:00Z"));
        assert_eq!(merge_all(vec![only.clone()]), Ok(only));
    }

    #[test]
    fn merge_with_empty_snapshot_is_unchanged() {
        let mut full = AggregateSnapshot::new();
        full.record_article("7".into(), "Alice");
        full.widen_date_range(ts("2024-06-01T00:00:00Z"));
        assert_eq!(merge(full.clone(), AggregateSnapshot::new()), full);
        assert_eq!(merge(AggregateSnapshot::new(), full.clone()), full);
    }

    #[test]
    fn dense_rank_shares_ties_without_gaps() {
        let ranked = dense_rank(
            vec![("a", 5), ("b", 9), ("c", 5), ("d", 1)],
            |item| item.1,
            |item| item.0,
        );
        let ranks = ranked
            .iter()
            .map(|(rank, (key, _))| (*key, *rank))
            .collect::<Vec<_>>();
        assert_eq!(ranks, vec![("b", 1), ("a", 2), ("c", 2), ("d", 3)]);
    }

    #[test]
    fn rank_attaches_scores_and_metric_ranks() {
        let mut snapshot = AggregateSnapshot::new();
        snapshot.records.insert("a".into(), record(2, 0));
        snapshot.records.insert("b".into(), record(0, 6));
        snapshot.records.insert("c".into(), record(2, 1));

        RankEngine::default().rank(&mut snapshot);

        let a = &snapshot.records[&WriterIdentity::new("a")];
        let b = &snapshot.records[&WriterIdentity::new("b")];
        let c = &snapshot.records[&WriterIdentity::new("c")];
        assert_eq!((a.score, a.article_rank, a.reply_rank), (Some(6), Some(1), Some(3)));
        assert_eq!((b.score, b.article_rank, b.reply_rank), (Some(6), Some(2), Some(1)));
        assert_eq!((c.score, c.article_rank, c.reply_rank), (Some(7), Some(1), Some(2)));
    }

    #[test]
    fn leaderboard_orders_by_score_then_identity() {
        let mut snapshot = AggregateSnapshot::new();
        snapshot.records.insert("b".into(), record(1, 0));
        snapshot.records.insert("a".into(), record(0, 3));
        snapshot.records.insert("z".into(), record(2, 0));

        let board = RankEngine::default().leaderboard(&mut snapshot);
        let order = board
            .entries
            .iter()
            .map(|e| (e.identity.as_str(), e.rank))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![("z", 1), ("a", 2), ("b", 2)]);
        assert_eq!(board.total_score, 12);
    }

    #[test]
    fn leaderboard_of_empty_snapshot_scores_zero() {
        let board = RankEngine::default().leaderboard(&mut AggregateSnapshot::new());
        assert!(board.entries.is_empty());
        assert_eq!(board.total_score, 0);
        assert_eq!(share_percent(0, 0), 0.0);
    }

    #[test]
    fn custom_weights_change_scores() {
        let engine = RankEngine::new(ScoreWeights {
            article: 5,
            reply: 2,
        });
        assert_eq!(engine.weights().score(&record(1, 1)), 7);
    }

    #[test]
    fn snapshot_json_keeps_absent_dates_absent() {
        let snapshot = AggregateSnapshot::new();
        let json = serde_json::to_string(&snapshot).expect("serialize");
        let back: AggregateSnapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.start_date, None);
        assert_eq!(back.end_date, None);
    }

    #[test]
    fn snapshot_json_rejects_other_shapes() {
        for json in [
            "{}",
            r#"{"board_id":"sample-board","entries":[]}"#,
            r#"{"records":{},"schema_version":1}"#,
        ] {
            assert!(
                serde_json::from_str::<AggregateSnapshot>(json).is_err(),
                "{json} should not load"
            );
        }
        let bare: AggregateSnapshot = serde_json::from_str(r#"{"records":{}}"#).expect("bare");
        assert_eq!(bare, AggregateSnapshot::new());
    }

    #[test]
    fn huge_weights_saturate_instead_of_overflowing() {
        let weights = ScoreWeights {
            article: u64::MAX,
            reply: u64::MAX,
        };
        assert_eq!(weights.score(&record(2, 1)), u64::MAX);
    }
}
