//! Stratego 局面評価 MLP の学習
//!
//! Ctrl-C / SIGTERM を受けると実行中のバッチを終えてからチェックポイントを保存し、
//! 途中までのモデルをエクスポートして終了コード 130 で終わる。
//! `--resume`（既定）で再実行すると続きから学習する。

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stratego_trainer::config::{
    self, DEFAULT_CHECKPOINT_PATH, DEFAULT_METRICS_LOG_PATH, DEFAULT_OUTPUT_PATH, TrainConfig,
};
use stratego_trainer::value_trainer::{Dataset, Trainer};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Resumable value-network trainer for Stratego",
    allow_negative_numbers = true
)]
struct Cli {
    /// 教師データセット（JSON、.gz 可）
    #[arg(long)]
    dataset: PathBuf,

    /// 出力モデル（ウォームスタート元も兼ねる）
    #[arg(long, default_value = DEFAULT_OUTPUT_PATH)]
    out: PathBuf,

    /// エポック数
    #[arg(long, default_value_t = 60)]
    epochs: i64,

    /// バッチサイズ
    #[arg(long, default_value_t = 1024)]
    batch_size: i64,

    /// 学習率
    #[arg(long, default_value_t = 0.0015)]
    lr: f32,

    /// 重み減衰
    #[arg(long, default_value_t = 0.0001)]
    weight_decay: f32,

    /// 隠れ層の幅（カンマ区切り）
    #[arg(long, default_value = "96,48")]
    hidden: String,

    /// チェックポイントのパス（.gz なら圧縮）
    #[arg(long, default_value = DEFAULT_CHECKPOINT_PATH)]
    checkpoint: PathBuf,

    /// メトリクスログ（JSONL）のパス
    #[arg(long, default_value = DEFAULT_METRICS_LOG_PATH)]
    metrics_log: PathBuf,

    /// チェックポイントから再開する（既定）
    #[arg(long, overrides_with = "no_resume")]
    resume: bool,

    /// チェックポイントを無視して最初から学習する
    #[arg(long, overrides_with = "resume")]
    no_resume: bool,

    /// 既存の出力モデルから重みを読み込む（既定）
    #[arg(long, overrides_with = "no_warm_start")]
    warm_start: bool,

    /// ランダム初期化から学習する
    #[arg(long, overrides_with = "warm_start")]
    no_warm_start: bool,

    /// チェックポイント保存間隔（エポック）
    #[arg(long, default_value_t = 1)]
    save_every: i64,

    /// 改善なしで許容するエポック数（0 で無効）
    #[arg(long, default_value_t = 6)]
    early_stop_patience: i64,

    /// 改善とみなす val_mse の最小減少量
    #[arg(long, default_value_t = 0.002)]
    early_stop_min_delta: f64,

    /// このエポック未満では早期終了しない
    #[arg(long, default_value_t = 10)]
    early_stop_min_epochs: i64,

    /// シード値
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

impl Cli {
    fn to_config(&self) -> Result<TrainConfig> {
        let config = TrainConfig {
            output_path: self.out.clone(),
            checkpoint_path: self.checkpoint.clone(),
            metrics_log_path: self.metrics_log.clone(),
            epochs: config::non_negative("epochs", self.epochs)?,
            batch_size: config::positive("batch-size", self.batch_size)?,
            learning_rate: self.lr,
            weight_decay: self.weight_decay,
            hidden_layers: config::parse_hidden_layers(&self.hidden)?,
            resume: !self.no_resume,
            warm_start: !self.no_warm_start,
            save_every: config::positive("save-every", self.save_every)?,
            early_stop_patience: config::non_negative(
                "early-stop-patience",
                self.early_stop_patience,
            )?,
            early_stop_min_delta: self.early_stop_min_delta,
            early_stop_min_epochs: config::non_negative(
                "early-stop-min-epochs",
                self.early_stop_min_epochs,
            )?,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.to_config()?;

    let dataset = Dataset::load(&cli.dataset)?;
    log::info!("Loaded {} samples from {}", dataset.len(), cli.dataset.display());

    let mut trainer = Trainer::new(config, &dataset)?;
    trainer
        .interrupted()
        .install_signal_handler()
        .context("Failed to install signal handler")?;

    let outcome = trainer.train()?;
    let code = outcome.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["train_value_net", "--dataset", "data.json"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).to_config().unwrap();
        assert_eq!(config.epochs, 60);
        assert_eq!(config.batch_size, 1024);
        assert_eq!(config.hidden_layers, vec![96, 48]);
        assert!(config.resume);
        assert!(config.warm_start);
        assert_eq!(config.save_every, 1);
        assert_eq!(config.early_stop_patience, 6);
        assert_eq!(config.early_stop_min_epochs, 10);
        assert_eq!(config.output_path, PathBuf::from(DEFAULT_OUTPUT_PATH));
    }

    #[test]
    fn test_negated_flags() {
        let config = parse(&["--no-resume", "--no-warm-start"]).to_config().unwrap();
        assert!(!config.resume);
        assert!(!config.warm_start);

        // 後に指定したほうが優先
        let config = parse(&["--no-resume", "--resume"]).to_config().unwrap();
        assert!(config.resume);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(parse(&["--save-every", "0"]).to_config().is_err());
        assert!(parse(&["--early-stop-patience", "-1"]).to_config().is_err());
        assert!(parse(&["--early-stop-min-delta", "-0.5"]).to_config().is_err());
        assert!(parse(&["--hidden", "32,x"]).to_config().is_err());
        assert!(parse(&["--early-stop-patience", "0"]).to_config().is_ok());
    }

    #[test]
    fn test_zero_epochs_is_accepted() {
        let config = parse(&["--epochs", "0"]).to_config().unwrap();
        assert_eq!(config.epochs, 0);
        assert!(parse(&["--epochs", "-1"]).to_config().is_err());
    }
}
