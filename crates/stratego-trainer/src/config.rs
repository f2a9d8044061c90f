//! 学習設定

use crate::error::ConfigError;
use std::path::PathBuf;

/// 既定の出力モデルパス
pub const DEFAULT_OUTPUT_PATH: &str = "lib/stratego/trained-model.json";
/// 既定のチェックポイントパス
pub const DEFAULT_CHECKPOINT_PATH: &str = ".stratego-cache/deep-training.ckpt";
/// 既定のメトリクスログパス
pub const DEFAULT_METRICS_LOG_PATH: &str = ".stratego-cache/metrics/training-metrics.jsonl";

/// 学習設定
#[derive(Clone, Debug)]
pub struct TrainConfig {
    /// エクスポート先（ウォームスタート元も兼ねる）
    pub output_path: PathBuf,
    /// チェックポイントのパス（`.gz` なら gzip 圧縮）
    pub checkpoint_path: PathBuf,
    /// メトリクスログ（JSONL）のパス
    pub metrics_log_path: PathBuf,
    /// エポック数
    pub epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f32,
    /// 重み減衰（AdamW）
    pub weight_decay: f32,
    /// 隠れ層の幅
    pub hidden_layers: Vec<usize>,
    /// チェックポイントからのリジューム
    pub resume: bool,
    /// エクスポート済みモデルからのウォームスタート
    pub warm_start: bool,
    /// チェックポイント保存間隔（エポック単位）
    pub save_every: usize,
    /// 改善なしで許容するエポック数（0 で早期終了無効）
    pub early_stop_patience: usize,
    /// 改善とみなす val_mse の最小減少量
    pub early_stop_min_delta: f64,
    /// このエポック未満では早期終了しない
    pub early_stop_min_epochs: usize,
    /// シード値
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            metrics_log_path: PathBuf::from(DEFAULT_METRICS_LOG_PATH),
            epochs: 60,
            batch_size: 1024,
            learning_rate: 0.0015,
            weight_decay: 0.0001,
            hidden_layers: vec![96, 48],
            resume: true,
            warm_start: true,
            save_every: 1,
            early_stop_patience: 6,
            early_stop_min_delta: 0.002,
            early_stop_min_epochs: 10,
            seed: 42,
        }
    }
}

impl TrainConfig {
    /// 学習開始前の検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.save_every == 0 {
            return Err(ConfigError::NotPositive {
                name: "save-every",
                value: 0,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::NotPositive {
                name: "batch-size",
                value: 0,
            });
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::InvalidRate {
                name: "lr",
                value: f64::from(self.learning_rate),
            });
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(ConfigError::Negative {
                name: "weight-decay",
                value: f64::from(self.weight_decay),
            });
        }
        if !(self.early_stop_min_delta.is_finite() && self.early_stop_min_delta >= 0.0) {
            return Err(ConfigError::Negative {
                name: "early-stop-min-delta",
                value: self.early_stop_min_delta,
            });
        }
        if self.hidden_layers.is_empty() {
            return Err(ConfigError::NoHiddenLayers);
        }
        if let Some(width) = self.hidden_layers.iter().find(|&&w| w == 0) {
            return Err(ConfigError::InvalidHiddenLayer(width.to_string()));
        }
        Ok(())
    }
}

/// `"96,48"` 形式の隠れ層指定を解析
pub fn parse_hidden_layers(value: &str) -> Result<Vec<usize>, ConfigError> {
    let mut hidden = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let width: i64 =
            entry.parse().map_err(|_| ConfigError::InvalidHiddenLayer(entry.to_string()))?;
        if width <= 0 {
            return Err(ConfigError::InvalidHiddenLayer(entry.to_string()));
        }
        hidden.push(width as usize);
    }
    if hidden.is_empty() {
        return Err(ConfigError::NoHiddenLayers);
    }
    Ok(hidden)
}

/// 1 以上の整数オプションを検証
pub fn positive(name: &'static str, value: i64) -> Result<usize, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::NotPositive { name, value });
    }
    Ok(value as usize)
}

/// 0 以上の整数オプションを検証
pub fn non_negative(name: &'static str, value: i64) -> Result<usize, ConfigError> {
    if value < 0 {
        return Err(ConfigError::Negative {
            name,
            value: value as f64,
        });
    }
    Ok(value as usize)
}
