//! 評価指標（MSE / MAE / 符号一致率）

use rayon::prelude::*;

use super::dataset::Dataset;
use super::network::ValueNetwork;

/// 予測値を勝ち / 引き分け / 負けに量子化する閾値
pub const SIGN_THRESHOLD: f32 = 0.15;

/// 評価結果
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EvalMetrics {
    pub mse: f64,
    pub mae: f64,
    /// 量子化したクラスが一致した割合（0..1）
    pub sign_accuracy: f64,
}

/// 予測値の量子化（±0.15 の不感帯付き）
pub fn quantize_prediction(prediction: f32) -> i8 {
    if prediction > SIGN_THRESHOLD {
        1
    } else if prediction < -SIGN_THRESHOLD {
        -1
    } else {
        0
    }
}

/// 目標値の量子化（厳密な符号）
pub fn quantize_target(target: f32) -> i8 {
    if target > 0.0 {
        1
    } else if target < 0.0 {
        -1
    } else {
        0
    }
}

/// 指定したサンプルでネットワークを評価する
pub fn evaluate(network: &ValueNetwork, dataset: &Dataset, indices: &[usize]) -> EvalMetrics {
    if indices.is_empty() {
        return EvalMetrics::default();
    }

    let (squared, absolute, hits) = indices
        .par_iter()
        .map(|&index| {
            let sample = dataset.sample(index);
            let prediction = network.predict(&sample.features);
            let diff = f64::from(prediction - sample.target);
            let hit = quantize_prediction(prediction) == quantize_target(sample.target);
            (diff * diff, diff.abs(), usize::from(hit))
        })
        .reduce(|| (0.0, 0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1, a.2 + b.2));

    let n = indices.len() as f64;
    EvalMetrics {
        mse: squared / n,
        mae: absolute / n,
        sign_accuracy: hits as f64 / n,
    }
}
