//! オプティマイザ（AdamW）
//!
//! PyTorch の `torch.optim.AdamW` と同じ更新式:
//! - p ← p · (1 - lr · wd)
//! - m ← β1 · m + (1 - β1) · g
//! - v ← β2 · v + (1 - β2) · g²
//! - p ← p - (lr / (1 - β1^t)) · m / (√v / √(1 - β2^t) + ε)
//!
//! モーメントとステップ数はチェックポイントに保存し、リジューム時に復元する。

use serde::{Deserialize, Serialize};

use super::network::ValueNetwork;
use crate::error::ShapeMismatch;

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

/// 1パラメータテンソル分のモーメント
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MomentState {
    pub exp_avg: Vec<f32>,
    pub exp_avg_sq: Vec<f32>,
}

impl MomentState {
    fn zeros(len: usize) -> Self {
        Self {
            exp_avg: vec![0.0; len],
            exp_avg_sq: vec![0.0; len],
        }
    }
}

/// オプティマイザの内部状態
///
/// `moments` は層ごとに [重み, バイアス] の順で並ぶ。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub step: u64,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub moments: Vec<MomentState>,
}

/// AdamW オプティマイザ
#[derive(Clone, Debug)]
pub struct AdamW {
    learning_rate: f32,
    weight_decay: f32,
    step: u64,
    moments: Vec<MomentState>,
}

impl AdamW {
    /// ネットワークの形状に合わせてゼロ初期化したオプティマイザを作成
    pub fn new(network: &ValueNetwork, learning_rate: f32, weight_decay: f32) -> Self {
        let moments = network
            .layers()
            .iter()
            .flat_map(|l| [l.weights().len(), l.bias().len()])
            .map(MomentState::zeros)
            .collect();
        Self {
            learning_rate,
            weight_decay,
            step: 0,
            moments,
        }
    }

    /// 実行済みのステップ数
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// 累積済みの勾配でパラメータを更新
    pub fn step(&mut self, network: &mut ValueNetwork) {
        self.step += 1;
        let t = self.step as f64;
        let bias_correction1 = (1.0 - f64::from(BETA1).powf(t)) as f32;
        let bias_correction2_sqrt = ((1.0 - f64::from(BETA2).powf(t)) as f32).sqrt();
        let step_size = self.learning_rate / bias_correction1;
        let decay = 1.0 - self.learning_rate * self.weight_decay;

        let mut moments = self.moments.iter_mut();
        for layer in network.layers_mut() {
            for (params, grads) in layer.params_and_grads() {
                let Some(moment) = moments.next() else {
                    return;
                };
                for (((p, &g), m), v) in params
                    .iter_mut()
                    .zip(grads)
                    .zip(moment.exp_avg.iter_mut())
                    .zip(moment.exp_avg_sq.iter_mut())
                {
                    *p *= decay;
                    *m = BETA1 * *m + (1.0 - BETA1) * g;
                    *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                    let denom = v.sqrt() / bias_correction2_sqrt + EPSILON;
                    *p -= step_size * *m / denom;
                }
            }
        }
    }

    /// 内部状態のコピー
    pub fn state(&self) -> OptimizerState {
        OptimizerState {
            step: self.step,
            learning_rate: self.learning_rate,
            weight_decay: self.weight_decay,
            moments: self.moments.clone(),
        }
    }

    /// 内部状態を復元する。
    ///
    /// 学習率と重み減衰は現在の設定を維持し、ステップ数とモーメントのみ戻す。
    /// 形状が一致しない場合は何も変更しない。
    pub fn load_state(&mut self, state: &OptimizerState) -> Result<(), ShapeMismatch> {
        if state.moments.len() != self.moments.len() {
            return Err(ShapeMismatch {
                what: "optimizer parameter count".to_string(),
                expected: self.moments.len(),
                actual: state.moments.len(),
            });
        }
        for (index, (current, stored)) in self.moments.iter().zip(&state.moments).enumerate() {
            let expected = current.exp_avg.len();
            for actual in [stored.exp_avg.len(), stored.exp_avg_sq.len()] {
                if actual != expected {
                    return Err(ShapeMismatch {
                        what: format!("optimizer moment {index}"),
                        expected,
                        actual,
                    });
                }
            }
        }
        self.step = state.step;
        self.moments = state.moments.clone();
        Ok(())
    }
}
