//! Stratego 局面評価 MLP の学習
//!
//! 主要コンポーネント:
//! - データセット読み込みと学習 / 検証分割
//! - MLP（tanh 活性）と AdamW
//! - チェックポイント（検証付きリジューム）とウォームスタート
//! - 早期終了、メトリクスログ、エクスポート
//! - 中断可能な学習ループ

pub mod checkpoint;
pub mod dataset;
pub mod early_stop;
pub mod evaluation;
pub mod export;
pub mod interrupt;
pub mod metrics_log;
pub mod network;
pub mod optimizer;
pub mod trainer;
pub mod warm_start;

pub use dataset::Dataset;
pub use interrupt::InterruptFlag;
pub use trainer::{RunSummary, TrainOutcome, Trainer};
