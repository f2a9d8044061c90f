//! 学習可能な評価値ネットワーク（全結合 MLP）
//!
//! 入力 → 隠れ層（tanh）… → 出力1ユニット → tanh。出力は (-1, 1) に収まり、
//! 正規化済みの局面評価値と同じスケールになる。
//!
//! 重みは出力次元優先（`weights[o * input_size + i]`）で保持する。
//! エクスポート形式と同じ並びなのでコピーだけで入出力できる。

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ShapeMismatch;

/// 1層分のパラメータ（チェックポイント / スナップショット用）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    pub input_size: usize,
    pub output_size: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// ネットワーク全体のパラメータ
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub layers: Vec<LayerState>,
}

/// 全結合層（勾配バッファ付き）
#[derive(Clone, Debug)]
pub struct Linear {
    input_size: usize,
    output_size: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
    grad_weights: Vec<f32>,
    grad_bias: Vec<f32>,
}

impl Linear {
    /// PyTorch の `nn.Linear` と同じ一様分布 `U(-1/√fan_in, 1/√fan_in)` で初期化
    fn new<R: Rng>(input_size: usize, output_size: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (input_size as f32).sqrt();
        let weights = (0..input_size * output_size)
            .map(|_| rng.random_range(-bound..bound))
            .collect();
        let bias = (0..output_size).map(|_| rng.random_range(-bound..bound)).collect();
        Self {
            input_size,
            output_size,
            weights,
            bias,
            grad_weights: vec![0.0; input_size * output_size],
            grad_bias: vec![0.0; output_size],
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    pub(crate) fn params_and_grads(&mut self) -> [(&mut [f32], &[f32]); 2] {
        [
            (self.weights.as_mut_slice(), self.grad_weights.as_slice()),
            (self.bias.as_mut_slice(), self.grad_bias.as_slice()),
        ]
    }

    /// tanh(W x + b)
    fn forward_tanh(&self, input: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input.len(), self.input_size);
        self.weights
            .chunks_exact(self.input_size)
            .zip(&self.bias)
            .map(|(row, b)| {
                let z = row.iter().zip(input).fold(*b, |acc, (w, x)| acc + w * x);
                z.tanh()
            })
            .collect()
    }

    fn state(&self) -> LayerState {
        LayerState {
            input_size: self.input_size,
            output_size: self.output_size,
            weights: self.weights.clone(),
            bias: self.bias.clone(),
        }
    }

    fn check_state(&self, index: usize, state: &LayerState) -> Result<(), ShapeMismatch> {
        let checks = [
            ("input_size", self.input_size, state.input_size),
            ("output_size", self.output_size, state.output_size),
            ("weights", self.weights.len(), state.weights.len()),
            ("bias", self.bias.len(), state.bias.len()),
        ];
        for (what, expected, actual) in checks {
            if expected != actual {
                return Err(ShapeMismatch {
                    what: format!("layer {index} {what}"),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// 学習可能なネットワーク
#[derive(Clone, Debug)]
pub struct ValueNetwork {
    layers: Vec<Linear>,
}

impl ValueNetwork {
    /// 新しいネットワークをランダム初期化で作成
    ///
    /// `hidden` は空でないこと（設定検証で保証する）。
    pub fn new<R: Rng>(input_size: usize, hidden: &[usize], rng: &mut R) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut previous = input_size;
        for &width in hidden {
            layers.push(Linear::new(previous, width, rng));
            previous = width;
        }
        layers.push(Linear::new(previous, 1, rng));
        Self { layers }
    }

    pub fn layers(&self) -> &[Linear] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Linear] {
        &mut self.layers
    }

    pub fn input_size(&self) -> usize {
        self.layers[0].input_size
    }

    /// 隠れ層の幅（出力層を除く）
    pub fn hidden_layers(&self) -> Vec<usize> {
        self.layers[..self.layers.len() - 1].iter().map(|l| l.output_size).collect()
    }

    /// パラメータ数
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(|l| l.weights.len() + l.bias.len()).sum()
    }

    /// 推論（-1..1）
    pub fn predict(&self, features: &[f32]) -> f32 {
        let mut activation = features.to_vec();
        for layer in &self.layers {
            activation = layer.forward_tanh(&activation);
        }
        activation[0]
    }

    /// 順伝播（各層の出力をキャッシュ）
    ///
    /// `acts[0]` が入力、`acts[l + 1]` が層 `l` の tanh 後の出力。
    fn forward_cached(&self, features: &[f32]) -> Vec<Vec<f32>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(features.to_vec());
        for layer in &self.layers {
            let next = layer.forward_tanh(&acts[acts.len() - 1]);
            acts.push(next);
        }
        acts
    }

    /// 勾配をゼロにリセット
    pub fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.grad_weights.fill(0.0);
            layer.grad_bias.fill(0.0);
        }
    }

    /// 1サンプル分の二乗誤差を計算し、`scale` 倍した勾配を累積する。
    ///
    /// バッチ平均の MSE を最小化する場合は `scale = 1 / batch_size`。
    /// 戻り値はスケール前の二乗誤差。
    pub fn accumulate_gradients(&mut self, features: &[f32], target: f32, scale: f32) -> f32 {
        let acts = self.forward_cached(features);
        let prediction = acts[acts.len() - 1][0];
        let diff = prediction - target;

        // d(loss)/d(z) = 2 * diff * tanh'(z)
        let mut delta = vec![2.0 * diff * scale * (1.0 - prediction * prediction)];

        for (l, layer) in self.layers.iter_mut().enumerate().rev() {
            let input = &acts[l];
            for (o, &d) in delta.iter().enumerate() {
                layer.grad_bias[o] += d;
                let row = &mut layer.grad_weights[o * layer.input_size..(o + 1) * layer.input_size];
                for (g, &x) in row.iter_mut().zip(input) {
                    *g += d * x;
                }
            }

            if l == 0 {
                break;
            }

            let mut prev_delta = vec![0.0f32; layer.input_size];
            for (o, &d) in delta.iter().enumerate() {
                let row = &layer.weights[o * layer.input_size..(o + 1) * layer.input_size];
                for (p, &w) in prev_delta.iter_mut().zip(row) {
                    *p += w * d;
                }
            }
            for (p, &h) in prev_delta.iter_mut().zip(input) {
                *p *= 1.0 - h * h;
            }
            delta = prev_delta;
        }

        diff * diff
    }

    /// パラメータのディープコピー
    pub fn state(&self) -> ModelState {
        ModelState {
            layers: self.layers.iter().map(Linear::state).collect(),
        }
    }

    /// パラメータを復元する。形状が一致しない場合は何も変更しない。
    pub fn load_state(&mut self, state: &ModelState) -> Result<(), ShapeMismatch> {
        if state.layers.len() != self.layers.len() {
            return Err(ShapeMismatch {
                what: "layer count".to_string(),
                expected: self.layers.len(),
                actual: state.layers.len(),
            });
        }
        for (index, (layer, source)) in self.layers.iter().zip(&state.layers).enumerate() {
            layer.check_state(index, source)?;
        }
        for (layer, source) in self.layers.iter_mut().zip(&state.layers) {
            layer.weights.copy_from_slice(&source.weights);
            layer.bias.copy_from_slice(&source.bias);
        }
        Ok(())
    }
}
