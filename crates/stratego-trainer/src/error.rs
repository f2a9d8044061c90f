//! エラー型
//!
//! - `ConfigError`: 学習開始前に検出する致命的な設定・データセットのエラー
//! - `Incompatibility`: チェックポイント / ウォームスタート元を採用しない理由。
//!   呼び出し側でログに出してコールドスタートにフォールバックする。

/// 学習を開始できない設定エラー
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Dataset is missing featureNames")]
    MissingFeatureNames,

    #[error("Dataset contains no samples")]
    NoSamples,

    #[error("Dataset feature dimension mismatch at sample {index}: expected {expected}, got {actual}")]
    FeatureDimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("At least one hidden layer is required")]
    NoHiddenLayers,

    #[error("Hidden layer sizes must be positive integers: {0}")]
    InvalidHiddenLayer(String),

    #[error("--{name} must be a positive integer (got {value})")]
    NotPositive { name: &'static str, value: i64 },

    #[error("--{name} must be >= 0 (got {value})")]
    Negative { name: &'static str, value: f64 },

    #[error("--{name} must be a finite positive number (got {value})")]
    InvalidRate { name: &'static str, value: f64 },
}

/// 永続化された補助状態を採用できない理由
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Incompatibility {
    #[error("file not found")]
    Missing,

    #[error("failed to read ({0})")]
    Unreadable(String),

    #[error("checkpoint version mismatch: expected {expected}, got {actual:?}")]
    VersionMismatch { expected: u32, actual: Option<u32> },

    #[error("feature schema mismatch")]
    FeatureSchema,

    #[error("hidden-layer mismatch: expected {expected:?}, got {actual:?}")]
    HiddenLayers {
        expected: Vec<usize>,
        actual: Option<Vec<usize>>,
    },

    #[error("checkpoint is missing model/optimizer state")]
    MissingState,

    #[error("existing model is not MLP (kind={0:?})")]
    NotMlp(Option<String>),

    #[error("invalid MLP layer payload")]
    MissingLayers,

    #[error("layer count mismatch: expected {expected}, got {actual}")]
    LayerCount { expected: usize, actual: usize },

    #[error("layer {layer} shape mismatch: expected {expected_in}x{expected_out}, got {actual_in:?}x{actual_out:?}")]
    LayerShape {
        layer: usize,
        expected_in: usize,
        expected_out: usize,
        actual_in: Option<usize>,
        actual_out: Option<usize>,
    },

    #[error("layer {layer} weight shape mismatch: expected {expected} values, got {actual:?}")]
    WeightLength {
        layer: usize,
        expected: usize,
        actual: Option<usize>,
    },

    #[error("layer {layer} bias shape mismatch: expected {expected} values, got {actual:?}")]
    BiasLength {
        layer: usize,
        expected: usize,
        actual: Option<usize>,
    },

    #[error("model state does not fit the network ({0})")]
    ModelShape(String),

    #[error("optimizer state does not fit the network ({0})")]
    OptimizerShape(String),
}

/// パラメータの形状不一致（ModelState / OptimizerState の復元時）
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("shape mismatch at {what}: expected {expected}, got {actual}")]
pub struct ShapeMismatch {
    pub what: String,
    pub expected: usize,
    pub actual: usize,
}
