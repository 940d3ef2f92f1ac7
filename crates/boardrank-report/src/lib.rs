//! Text report rendering and leaderboard snapshot export.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use boardrank_core::{AggregateSnapshot, Leaderboard, ScoreWeights};
use boardrank_storage::write_atomic;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

pub const CRATE_NAME: &str = "boardrank-report";

const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ReportBundle {
    pub report_path: PathBuf,
    pub leaderboard_path: PathBuf,
    pub parquet_path: PathBuf,
    pub manifest_path: PathBuf,
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Renders the ranked snapshot as a markdown report.
pub fn render_report(
    snapshot: &AggregateSnapshot,
    leaderboard: &Leaderboard,
    weights: ScoreWeights,
) -> String {
    let mut lines = vec![
        "# Board Ranking Report".to_string(),
        String::new(),
        format!(
            "- Period: {} ~ {}",
            format_date(snapshot.start_date),
            format_date(snapshot.end_date)
        ),
        format!(
            "- Scoring: article +{}, reply +{}",
            weights.article, weights.reply
        ),
        format!(
            "- Total articles: {}, total replies: {}",
            snapshot.total_articles(),
            snapshot.total_replies()
        ),
        format!("- Writers: {}", snapshot.writer_count()),
        format!("- Total score: {}", leaderboard.total_score),
        String::new(),
        "## Leaderboard".to_string(),
    ];

    for entry in &leaderboard.entries {
        lines.push(format!(
            "- {}. {}({}) | score {} | share {:.2}% | articles {} (#{}), replies {} (#{})",
            entry.rank,
            entry.nicknames.join(","),
            entry.identity,
            entry.score,
            entry.share_percent,
            entry.article_count,
            entry.article_rank,
            entry.reply_count,
            entry.reply_rank
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

/// One row per leaderboard entry, in rank order.
pub fn write_leaderboard_parquet(path: &Path, leaderboard: &Leaderboard) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("rank", DataType::UInt32, false),
        ArrowField::new("identity", DataType::Utf8, false),
        ArrowField::new("nicknames", DataType::Utf8, false),
        ArrowField::new("score", DataType::UInt64, false),
        ArrowField::new("share_percent", DataType::Float64, false),
        ArrowField::new("article_count", DataType::UInt64, false),
        ArrowField::new("article_rank", DataType::UInt32, false),
        ArrowField::new("reply_count", DataType::UInt64, false),
        ArrowField::new("reply_rank", DataType::UInt32, false),
    ]));

    let entries = &leaderboard.entries;
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt32Array::from(
                entries.iter().map(|e| e.rank).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                entries
                    .iter()
                    .map(|e| e.identity.to_string())
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                entries
                    .iter()
                    .map(|e| e.nicknames.join(","))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                entries.iter().map(|e| e.score).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                entries.iter().map(|e| e.share_percent).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                entries.iter().map(|e| e.article_count).collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(
                entries.iter().map(|e| e.article_rank).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                entries.iter().map(|e| e.reply_count).collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(
                entries.iter().map(|e| e.reply_rank).collect::<Vec<_>>(),
            )),
        ],
    )
    .context("building leaderboard record batch")?;

    write_parquet(path, batch)
}

fn manifest_entry(name: &str, out_dir: &Path, path: &Path) -> Result<ReportManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(out_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ReportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

/// Writes `report.md`, `leaderboard.json`, `writers.parquet` and a sha256 `manifest.json` into `out_dir`.
pub async fn write_report_bundle(
    out_dir: &Path,
    snapshot: &AggregateSnapshot,
    leaderboard: &Leaderboard,
    weights: ScoreWeights,
) -> Result<ReportBundle> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let report_path = out_dir.join("report.md");
    write_atomic(
        &report_path,
        render_report(snapshot, leaderboard, weights).as_bytes(),
    )
    .await?;

    let leaderboard_path = out_dir.join("leaderboard.json");
    let leaderboard_json = serde_json::to_vec_pretty(&serde_json::json!({
        "start_date": snapshot.start_date,
        "end_date": snapshot.end_date,
        "weights": weights,
        "leaderboard": leaderboard,
    }))
    .context("serializing leaderboard")?;
    write_atomic(&leaderboard_path, &leaderboard_json).await?;

    let parquet_path = out_dir.join("writers.parquet");
    write_leaderboard_parquet(&parquet_path, leaderboard)?;

    let manifest = ReportManifest {
        schema_version: 1,
        generated_at: Utc::now(),
        files: vec![
            manifest_entry("report", out_dir, &report_path)?,
            manifest_entry("leaderboard", out_dir, &leaderboard_path)?,
            manifest_entry("writers", out_dir, &parquet_path)?,
        ],
    };
    let manifest_path = out_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    write_atomic(&manifest_path, &bytes).await?;

    info!(
        out_dir = %out_dir.display(),
        entries = leaderboard.entries.len(),
        "report bundle written"
    );
    Ok(ReportBundle {
        report_path,
        leaderboard_path,
        parquet_path,
        manifest_path,
    })
}
