//! ウォームスタート（エクスポート済みモデルからの重み読み込み）
//!
//! チェックポイントからリジュームしなかった場合にだけ使う。推論用の重みだけを
//! 取り込み、オプティマイザは常に新規のまま。

use serde::Deserialize;
use std::path::Path;

use super::network::{LayerState, ModelState, ValueNetwork};
use crate::common::io::open_reader;
use crate::error::Incompatibility;

/// 検証前のエクスポート済みモデル
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportCandidate {
    kind: Option<String>,
    feature_names: Option<Vec<String>>,
    layers: Option<Vec<CandidateLayer>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateLayer {
    input_size: Option<usize>,
    output_size: Option<usize>,
    weights: Option<Vec<f32>>,
    bias: Option<Vec<f32>>,
}

/// エクスポート済みモデルを検証し、ネットワークに読み込める形に変換する。
///
/// 最初に見つかった不一致で打ち切る。
pub fn validate<P: AsRef<Path>>(
    path: P,
    network: &ValueNetwork,
    expected_features: &[String],
) -> Result<ModelState, Incompatibility> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Incompatibility::Missing);
    }
    let reader = open_reader(path).map_err(|e| Incompatibility::Unreadable(e.to_string()))?;
    let candidate: ExportCandidate =
        serde_json::from_reader(reader).map_err(|e| Incompatibility::Unreadable(e.to_string()))?;

    if candidate.kind.as_deref() != Some("mlp") {
        return Err(Incompatibility::NotMlp(candidate.kind));
    }
    if candidate.feature_names.as_deref() != Some(expected_features) {
        return Err(Incompatibility::FeatureSchema);
    }
    let Some(source_layers) = candidate.layers else {
        return Err(Incompatibility::MissingLayers);
    };
    let target_layers = network.layers();
    if source_layers.len() != target_layers.len() {
        return Err(Incompatibility::LayerCount {
            expected: target_layers.len(),
            actual: source_layers.len(),
        });
    }

    let mut layers = Vec::with_capacity(source_layers.len());
    for (index, (source, target)) in source_layers.into_iter().zip(target_layers).enumerate() {
        let expected_in = target.input_size();
        let expected_out = target.output_size();
        if source.input_size != Some(expected_in) || source.output_size != Some(expected_out) {
            return Err(Incompatibility::LayerShape {
                layer: index,
                expected_in,
                expected_out,
                actual_in: source.input_size,
                actual_out: source.output_size,
            });
        }
        let weights = match source.weights {
            Some(w) if w.len() == expected_in * expected_out => w,
            other => {
                return Err(Incompatibility::WeightLength {
                    layer: index,
                    expected: expected_in * expected_out,
                    actual: other.map(|w| w.len()),
                });
            }
        };
        let bias = match source.bias {
            Some(b) if b.len() == expected_out => b,
            other => {
                return Err(Incompatibility::BiasLength {
                    layer: index,
                    expected: expected_out,
                    actual: other.map(|b| b.len()),
                });
            }
        };
        layers.push(LayerState {
            input_size: expected_in,
            output_size: expected_out,
            weights,
            bias,
        });
    }

    Ok(ModelState { layers })
}

/// エクスポート済みモデルから重みを読み込む。
///
/// 失敗した場合は理由をログに出して false を返し、ネットワークは変更しない。
pub fn load<P: AsRef<Path>>(
    path: P,
    network: &mut ValueNetwork,
    expected_features: &[String],
) -> bool {
    let path = path.as_ref();
    let applied = validate(path, network, expected_features).and_then(|state| {
        network.load_state(&state).map_err(|e| Incompatibility::ModelShape(e.to_string()))
    });
    match applied {
        Ok(()) => {
            log::info!("[warm-start] loaded weights from {}", path.display());
            true
        }
        Err(Incompatibility::Missing) => {
            log::debug!("[warm-start] no exported model at {}", path.display());
            false
        }
        Err(reason) => {
            log::warn!("[warm-start] {reason}, skipping");
            false
        }
    }
}
