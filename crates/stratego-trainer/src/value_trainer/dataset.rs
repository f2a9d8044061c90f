//! 教師データセット
//!
//! 自己対局で生成された JSON データセットを読み込み、スキーマを検証して
//! 学習用 / 検証用の分割を作る。

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::common::io::open_reader;
use crate::error::ConfigError;

/// 学習用データの割合
const TRAIN_FRACTION_NUM: usize = 9;
const TRAIN_FRACTION_DEN: usize = 10;

/// エクスポートで使える難易度ラベル
const KNOWN_DIFFICULTIES: [&str; 4] = ["medium", "hard", "extreme", "mixed"];

/// データセットファイルのドキュメント（検証前）
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDocument {
    pub feature_names: Option<Vec<String>>,
    pub samples: Option<Vec<Sample>>,
    #[serde(default)]
    pub meta: DatasetMeta,
}

/// 学習用のサンプル
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sample {
    pub features: Vec<f32>,
    /// 目標値（-1..1 に正規化済みの局面評価）
    pub target: f32,
}

/// データセットの生成情報
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetMeta {
    #[serde(default)]
    pub games: u64,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_workers")]
    pub workers: u64,
}

fn default_difficulty() -> String {
    "mixed".to_string()
}

fn default_workers() -> u64 {
    1
}

impl Default for DatasetMeta {
    fn default() -> Self {
        Self {
            games: 0,
            difficulty: default_difficulty(),
            workers: default_workers(),
        }
    }
}

impl DatasetMeta {
    /// エクスポート用の難易度ラベル（未知の値は "mixed"）
    pub fn difficulty_label(&self) -> &str {
        if KNOWN_DIFFICULTIES.contains(&self.difficulty.as_str()) {
            &self.difficulty
        } else {
            "mixed"
        }
    }
}

/// 検証済みデータセット
#[derive(Debug)]
pub struct Dataset {
    feature_names: Vec<String>,
    samples: Vec<Sample>,
    meta: DatasetMeta,
}

impl Dataset {
    /// JSON ファイル（`.gz` / `-` 対応）から読み込み
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader =
            open_reader(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let document: DatasetDocument = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse dataset {}", path.display()))?;
        let dataset = Self::from_document(document)
            .with_context(|| format!("Invalid dataset {}", path.display()))?;
        Ok(dataset)
    }

    /// ドキュメントのスキーマを検証
    pub fn from_document(document: DatasetDocument) -> Result<Self, ConfigError> {
        let feature_names = match document.feature_names {
            Some(names) if !names.is_empty() => names,
            _ => return Err(ConfigError::MissingFeatureNames),
        };
        let samples = match document.samples {
            Some(samples) if !samples.is_empty() => samples,
            _ => return Err(ConfigError::NoSamples),
        };
        if let Some((index, sample)) = samples
            .iter()
            .enumerate()
            .find(|(_, s)| s.features.len() != feature_names.len())
        {
            return Err(ConfigError::FeatureDimensionMismatch {
                index,
                expected: feature_names.len(),
                actual: sample.features.len(),
            });
        }

        Ok(Self {
            feature_names,
            samples,
            meta: document.meta,
        })
    }

    /// サンプル数
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// 空かどうか（検証済みなら常に false）
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 入力次元
    pub fn input_size(&self) -> usize {
        self.feature_names.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn sample(&self, index: usize) -> &Sample {
        &self.samples[index]
    }

    pub fn meta(&self) -> &DatasetMeta {
        &self.meta
    }
}

/// 学習用 / 検証用のインデックス分割
#[derive(Clone, Debug)]
pub struct Split {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    /// 検証用が空になり学習用を流用しているか
    pub validation_reuses_train: bool,
}

impl Split {
    /// シードから決定的に分割する。
    ///
    /// 先頭 `max(1, floor(0.9 * N))` 件が学習用、残りが検証用。残りが空の場合は
    /// 学習用インデックスをそのまま検証用に使う（小さなデータセットでは
    /// 学習・検証メトリクスが同じ値になる）。
    pub fn new(sample_count: usize, seed: u64) -> Self {
        let mut permutation: Vec<usize> = (0..sample_count).collect();
        permutation.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

        let split_index =
            (sample_count * TRAIN_FRACTION_NUM / TRAIN_FRACTION_DEN).max(1).min(sample_count);
        let validation = permutation.split_off(split_index);
        let train = permutation;

        if validation.is_empty() {
            log::warn!(
                "validation split is empty ({sample_count} samples); reusing training samples for validation"
            );
            return Self {
                validation: train.clone(),
                train,
                validation_reuses_train: true,
            };
        }

        Self {
            train,
            validation,
            validation_reuses_train: false,
        }
    }
}
