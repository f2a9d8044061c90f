//! チェックポイント（学習状態の保存と検証付きリジューム）
//!
//! 保存内容: バージョン、エポック、特徴量名、隠れ層構成、サンプル数、保存時刻、
//! モデルのパラメータ、オプティマイザの内部状態。
//!
//! 読み込みは失敗しても例外を出さず、常に `(1, false)` のコールドスタート値に
//! フォールバックする。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::network::{ModelState, ValueNetwork};
use super::optimizer::{AdamW, OptimizerState};
use crate::common::io::{open_reader, write_atomically};
use crate::common::utc_timestamp;
use crate::error::Incompatibility;

/// チェックポイント形式のバージョン
pub const CHECKPOINT_VERSION: u32 = 1;

/// 保存される学習状態
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub version: u32,
    pub epoch: usize,
    pub feature_names: Vec<String>,
    pub hidden_layers: Vec<usize>,
    pub sample_count: usize,
    pub saved_at: String,
    pub model_state: ModelState,
    pub optimizer_state: OptimizerState,
}

impl TrainingState {
    /// 現在のネットワークとオプティマイザから学習状態を作成
    pub fn capture(
        epoch: usize,
        feature_names: &[String],
        network: &ValueNetwork,
        optimizer: &AdamW,
        sample_count: usize,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            epoch,
            feature_names: feature_names.to_vec(),
            hidden_layers: network.hidden_layers(),
            sample_count,
            saved_at: utc_timestamp(),
            model_state: network.state(),
            optimizer_state: optimizer.state(),
        }
    }
}

/// 検証前のチェックポイント（すべてのフィールドが欠けている可能性がある）
#[derive(Debug, Default, Deserialize)]
struct StoredCheckpoint {
    version: Option<u32>,
    epoch: Option<usize>,
    feature_names: Option<Vec<String>>,
    hidden_layers: Option<Vec<usize>>,
    sample_count: Option<usize>,
    saved_at: Option<String>,
    model_state: Option<ModelState>,
    optimizer_state: Option<OptimizerState>,
}

/// リジューム結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resume {
    /// 学習を開始するエポック（1始まり）
    pub start_epoch: usize,
    /// チェックポイントから復元したか
    pub resumed: bool,
}

impl Resume {
    pub const COLD_START: Resume = Resume {
        start_epoch: 1,
        resumed: false,
    };
}

/// チェックポイントマネージャ
pub struct CheckpointManager {
    path: PathBuf,
    writes: usize,
}

impl CheckpointManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// このプロセスで書き込んだ回数
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// 学習状態を保存（既存のチェックポイントはアトミックに置き換える）
    pub fn save(&mut self, state: &TrainingState) -> Result<()> {
        write_atomically(&self.path, |w| serde_json::to_writer(w, state).map_err(io::Error::from))
            .with_context(|| format!("Failed to save checkpoint to {}", self.path.display()))?;
        self.writes += 1;
        log::debug!("Saved checkpoint: epoch {} -> {}", state.epoch, self.path.display());
        Ok(())
    }

    /// チェックポイントを読み込んでスキーマを検証する。
    ///
    /// 検証順: 読み込み → バージョン → 特徴量名 → 隠れ層構成 → モデル / オプティマイザ状態の有無
    pub fn validate(
        &self,
        expected_features: &[String],
        expected_hidden: &[usize],
    ) -> Result<TrainingState, Incompatibility> {
        if !self.path.exists() {
            return Err(Incompatibility::Missing);
        }
        let reader =
            open_reader(&self.path).map_err(|e| Incompatibility::Unreadable(e.to_string()))?;
        let stored: StoredCheckpoint = serde_json::from_reader(reader)
            .map_err(|e| Incompatibility::Unreadable(e.to_string()))?;

        if stored.version != Some(CHECKPOINT_VERSION) {
            return Err(Incompatibility::VersionMismatch {
                expected: CHECKPOINT_VERSION,
                actual: stored.version,
            });
        }
        let feature_names = match stored.feature_names {
            Some(names) if names == expected_features => names,
            _ => return Err(Incompatibility::FeatureSchema),
        };
        let hidden_layers = match stored.hidden_layers {
            Some(hidden) if hidden == expected_hidden => hidden,
            actual => {
                return Err(Incompatibility::HiddenLayers {
                    expected: expected_hidden.to_vec(),
                    actual,
                });
            }
        };
        let (Some(model_state), Some(optimizer_state)) =
            (stored.model_state, stored.optimizer_state)
        else {
            return Err(Incompatibility::MissingState);
        };

        Ok(TrainingState {
            version: CHECKPOINT_VERSION,
            epoch: stored.epoch.unwrap_or(0),
            feature_names,
            hidden_layers,
            sample_count: stored.sample_count.unwrap_or(0),
            saved_at: stored.saved_at.unwrap_or_default(),
            model_state,
            optimizer_state,
        })
    }

    /// 検証済みの学習状態をネットワークとオプティマイザに復元する。
    ///
    /// どちらかの形状が合わない場合はどちらも変更しない。
    fn restore(
        state: &TrainingState,
        network: &mut ValueNetwork,
        optimizer: &mut AdamW,
    ) -> Result<(), Incompatibility> {
        let mut restored_network = network.clone();
        restored_network
            .load_state(&state.model_state)
            .map_err(|e| Incompatibility::ModelShape(e.to_string()))?;
        let mut restored_optimizer = optimizer.clone();
        restored_optimizer
            .load_state(&state.optimizer_state)
            .map_err(|e| Incompatibility::OptimizerShape(e.to_string()))?;

        *network = restored_network;
        *optimizer = restored_optimizer;
        Ok(())
    }

    /// リジュームを試みる。
    ///
    /// 失敗した場合は理由をログに出して `(1, false)` を返す（エラーにはしない）。
    /// 成功した場合はモデルとオプティマイザを書き換えて `(epoch + 1, true)` を返す。
    pub fn load(
        &self,
        expected_features: &[String],
        expected_hidden: &[usize],
        network: &mut ValueNetwork,
        optimizer: &mut AdamW,
    ) -> Resume {
        let result = self
            .validate(expected_features, expected_hidden)
            .and_then(|state| Self::restore(&state, network, optimizer).map(|()| state));

        match result {
            Ok(state) => {
                log::info!(
                    "[resume] resumed from {} at epoch {} (saved_at={})",
                    self.path.display(),
                    state.epoch,
                    state.saved_at
                );
                Resume {
                    start_epoch: (state.epoch + 1).max(1),
                    resumed: true,
                }
            }
            Err(Incompatibility::Missing) => {
                log::debug!("[resume] no checkpoint at {}", self.path.display());
                Resume::COLD_START
            }
            Err(reason) => {
                log::warn!("[resume] {reason}, starting from scratch");
                Resume::COLD_START
            }
        }
    }

    /// チェックポイントを削除（存在しなければ何もしない）
    pub fn remove(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
