//! 推論用モデルのエクスポート
//!
//! 推論エンジンが読むのはこの JSON だけ。オプティマイザの状態は含めない。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::Path;

use super::network::ValueNetwork;
use crate::common::io::{open_reader, write_atomically};
use crate::common::utc_timestamp;

/// エクスポート形式のバージョン
pub const EXPORT_VERSION: u32 = 2;

/// `training.framework` に書く名前
pub const FRAMEWORK: &str = "stratego-trainer";

/// エクスポートされたモデル
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedModel {
    pub version: u32,
    pub kind: String,
    pub feature_names: Vec<String>,
    pub layers: Vec<ExportedLayer>,
    pub output_activation: String,
    pub training: TrainingInfo,
}

/// 1層分（重みは出力次元優先で平坦化）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedLayer {
    pub input_size: usize,
    pub output_size: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub activation: String,
}

/// 学習時の情報
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingInfo {
    pub generated_at: String,
    pub games: u64,
    pub position_samples: usize,
    pub epochs: usize,
    pub difficulty: String,
    pub framework: String,
    pub device: String,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub hidden_layers: Vec<usize>,
    pub workers: u64,
}

impl Default for TrainingInfo {
    fn default() -> Self {
        Self {
            generated_at: utc_timestamp(),
            games: 0,
            position_samples: 0,
            epochs: 0,
            difficulty: "mixed".to_string(),
            framework: FRAMEWORK.to_string(),
            device: "cpu".to_string(),
            batch_size: 0,
            learning_rate: 0.0,
            hidden_layers: Vec::new(),
            workers: 1,
        }
    }
}

impl ExportedModel {
    /// ネットワークの現在の重みからエクスポート形式を作成
    ///
    /// 隠れ層は "tanh"、最終層は "linear"（全体の出力に別途 tanh をかける）。
    pub fn from_network(
        network: &ValueNetwork,
        feature_names: &[String],
        training: TrainingInfo,
    ) -> Self {
        let last = network.layers().len() - 1;
        let layers = network
            .layers()
            .iter()
            .enumerate()
            .map(|(index, layer)| ExportedLayer {
                input_size: layer.input_size(),
                output_size: layer.output_size(),
                weights: layer.weights().to_vec(),
                bias: layer.bias().to_vec(),
                activation: if index < last { "tanh" } else { "linear" }.to_string(),
            })
            .collect();

        Self {
            version: EXPORT_VERSION,
            kind: "mlp".to_string(),
            feature_names: feature_names.to_vec(),
            layers,
            output_activation: "tanh".to_string(),
            training,
        }
    }

    /// 整形済み JSON として書き出す（既存ファイルはアトミックに置き換える）
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        write_atomically(path, |w| {
            serde_json::to_writer_pretty(&mut *w, self).map_err(io::Error::from)?;
            w.write_all(b"\n")
        })
        .with_context(|| format!("Failed to write model to {}", path.display()))
    }

    /// エクスポート済みモデルを読み込む
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader =
            open_reader(path).with_context(|| format!("Failed to open {}", path.display()))?;
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse model {}", path.display()))
    }
}
