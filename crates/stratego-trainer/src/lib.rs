//! Stratego 局面評価値ネットワークの学習ツール
//!
//! 中断・再開に耐える学習ループ（チェックポイント、ウォームスタート、早期終了、
//! シグナルによる安全な停止）と、推論エンジン向けの JSON エクスポートを提供する。

pub mod common;
pub mod config;
pub mod error;
pub mod value_trainer;
