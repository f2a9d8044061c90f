//! 学習メトリクスのイベントログ（JSONL、追記のみ）
//!
//! 1行1イベント: `{ts, source, runId, eventType, ...payload}`。
//! 書き込みに失敗しても警告を出すだけで学習は止めない。

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::common::io::ensure_parent_dir;
use crate::common::utc_timestamp;

/// `source` フィールドの値
pub const METRICS_SOURCE: &str = "deep";

/// プロセスごとに一意な実行 ID（開始時刻 + PID）
pub fn new_run_id() -> String {
    format!("deep-{}-{}", chrono::Utc::now().timestamp_millis(), std::process::id())
}

/// 学習開始時のオプション
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    pub games: u64,
    pub difficulty: String,
    pub workers: u64,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub hidden_layers: Vec<usize>,
    pub resume: bool,
    pub warm_start: bool,
    pub checkpoint: String,
    pub early_stop_patience: usize,
    pub early_stop_min_delta: f64,
    pub early_stop_min_epochs: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStart {
    pub options: RunOptions,
    pub device: String,
    pub sample_count: usize,
    pub resumed_from_checkpoint: bool,
    pub warm_started: bool,
    pub start_epoch: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochRecord {
    pub epoch: usize,
    pub total_epochs: usize,
    pub loss: f64,
    pub train_mse: f64,
    pub train_mae: f64,
    pub train_acc: f64,
    pub val_mse: f64,
    pub val_mae: f64,
    pub val_acc: f64,
    pub elapsed_seconds: f64,
    pub eta_seconds: f64,
    pub sample_count: usize,
    pub best_val_mse: f64,
    pub best_epoch: usize,
    pub early_stop_wait: usize,
    pub early_stop_patience: usize,
}

/// 学習の終了状態
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    EarlyStopped,
    Interrupted,
}

/// 正常終了時の最終指標
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEndSummary {
    pub selected_epoch: usize,
    pub train_mse: f64,
    pub train_mae: f64,
    pub train_acc: f64,
    pub val_mse: f64,
    pub val_mae: f64,
    pub val_acc: f64,
    pub best_val_mse: f64,
    pub best_epoch: usize,
    pub early_stop_patience: usize,
    pub early_stop_min_delta: f64,
    pub early_stop_min_epochs: usize,
    pub early_stopped: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEnd {
    pub status: RunStatus,
    pub epochs_completed: usize,
    pub sample_count: usize,
    #[serde(flatten)]
    pub summary: Option<RunEndSummary>,
}

/// メトリクスイベント
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "eventType", rename_all = "snake_case")]
pub enum MetricEvent {
    RunStart(RunStart),
    Epoch(EpochRecord),
    RunEnd(RunEnd),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Record<'a> {
    ts: String,
    source: &'a str,
    run_id: &'a str,
    #[serde(flatten)]
    event: &'a MetricEvent,
}

/// JSONL メトリクスログ
pub struct MetricsLog {
    path: PathBuf,
    run_id: String,
}

impl MetricsLog {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// イベントを1行追記する（失敗は警告のみ）
    pub fn emit(&self, event: &MetricEvent) {
        if let Err(e) = self.append(event) {
            log::warn!("failed to write metrics log: {e:#}");
        }
    }

    fn append(&self, event: &MetricEvent) -> Result<()> {
        let record = Record {
            ts: utc_timestamp(),
            source: METRICS_SOURCE,
            run_id: &self.run_id,
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        ensure_parent_dir(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn run_end(status: RunStatus, summary: Option<RunEndSummary>) -> MetricEvent {
        MetricEvent::RunEnd(RunEnd {
            status,
            epochs_completed: 3,
            sample_count: 100,
            summary,
        })
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_run_id_format() {
        let id = new_run_id();
        let parts: Vec<_> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "deep");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2], std::process::id().to_string());
    }

    #[test]
    fn test_events_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics").join("training-metrics.jsonl");
        let log = MetricsLog::new(&path, "deep-1-2");
        assert_eq!(log.path(), path);

        log.emit(&run_end(RunStatus::Interrupted, None));
        log.emit(&run_end(
            RunStatus::EarlyStopped,
            Some(RunEndSummary {
                selected_epoch: 2,
                train_mse: 0.1,
                train_mae: 0.2,
                train_acc: 0.9,
                val_mse: 0.15,
                val_mae: 0.25,
                val_acc: 0.8,
                best_val_mse: 0.14,
                best_epoch: 2,
                early_stop_patience: 1,
                early_stop_min_delta: 0.0,
                early_stop_min_epochs: 0,
                early_stopped: true,
            }),
        ));

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);

        let first = &lines[0];
        assert_eq!(first["source"], "deep");
        assert_eq!(first["runId"], "deep-1-2");
        assert_eq!(first["eventType"], "run_end");
        assert_eq!(first["status"], "interrupted");
        assert_eq!(first["epochsCompleted"], 3);
        assert!(first.get("selectedEpoch").is_none());
        assert!(first["ts"].as_str().unwrap().ends_with('Z'));

        let second = &lines[1];
        assert_eq!(second["status"], "early_stopped");
        assert_eq!(second["selectedEpoch"], 2);
        assert_eq!(second["earlyStopped"], true);
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // ディレクトリに対しては追記できない
        let log = MetricsLog::new(dir.path(), "deep-1-2");
        log.emit(&run_end(RunStatus::Completed, None));
        assert!(log.append(&run_end(RunStatus::Completed, None)).is_err());
    }
}
