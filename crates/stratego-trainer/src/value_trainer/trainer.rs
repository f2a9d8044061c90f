//! 学習ループ
//!
//! 中断フラグはエポック先頭、バッチ先頭、エポックのバッチループ終了後に確認する。
//! 最終バッチ中に届いた中断もそのエポックの評価より先に処理される。中断を検出したら
//! チェックポイントを保存し、途中までの重みをエクスポートし、`run_end`
//! （interrupted）を記録して `TrainOutcome::Interrupted` を返す。
//!
//! 各エポックのシャッフル順は `(seed, epoch)` だけで決まるので、リジュームした
//! 実行も中断しなかった実行と同じバッチ順で学習する。

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::time::Instant;

use super::checkpoint::{CheckpointManager, Resume, TrainingState};
use super::dataset::{Dataset, Split};
use super::early_stop::EarlyStopping;
use super::evaluation::{EvalMetrics, evaluate};
use super::export::{ExportedModel, TrainingInfo};
use super::interrupt::InterruptFlag;
use super::metrics_log::{
    EpochRecord, MetricEvent, MetricsLog, RunEnd, RunEndSummary, RunOptions, RunStart, RunStatus,
    new_run_id,
};
use super::network::ValueNetwork;
use super::optimizer::AdamW;
use super::warm_start;
use crate::config::TrainConfig;

/// 学習デバイス（CPU のみ）
const DEVICE: &str = "cpu";

/// 初期重み用の乱数ストリーム（分割はストリーム 0、シャッフルはエポック番号を使う）
const INIT_STREAM: u64 = u64::MAX;

/// バッチ完了ごとに `(epoch, batch_index)` で呼ばれるコールバック
pub type BatchObserver = Box<dyn FnMut(usize, usize)>;

/// 学習結果のまとめ
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    /// このプロセスで学習を始めたエポック
    pub start_epoch: usize,
    pub resumed: bool,
    pub warm_started: bool,
    /// 完了（中断時は重みが更新された）最後のエポック
    pub epochs_completed: usize,
    /// エクスポートした重みのエポック
    pub selected_epoch: usize,
    /// 最終的な学習用データでの指標（中断時は None）
    pub train_metrics: Option<EvalMetrics>,
    /// 最終的な検証用データでの指標（中断時は None）
    pub val_metrics: Option<EvalMetrics>,
    /// このプロセスでのチェックポイント書き込み回数
    pub checkpoint_writes: usize,
}

/// 学習の終わり方
#[derive(Clone, Debug, PartialEq)]
pub enum TrainOutcome {
    Completed(RunSummary),
    EarlyStopped(RunSummary),
    Interrupted(RunSummary),
}

impl TrainOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            Self::Completed(summary) | Self::EarlyStopped(summary) | Self::Interrupted(summary) => {
                summary
            }
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed(_) => RunStatus::Completed,
            Self::EarlyStopped(_) => RunStatus::EarlyStopped,
            Self::Interrupted(_) => RunStatus::Interrupted,
        }
    }

    /// プロセスの終了コード（中断は 130）
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted(_) => 130,
            _ => 0,
        }
    }
}

/// 1エポック分の学習結果
struct EpochRun {
    avg_loss: f64,
    batches: usize,
}

/// リジューム / ウォームスタートの結果
#[derive(Clone, Copy)]
struct StartState {
    resume: Resume,
    warm_started: bool,
}

/// トレーナー
pub struct Trainer<'a> {
    config: TrainConfig,
    dataset: &'a Dataset,
    split: Split,
    network: ValueNetwork,
    optimizer: AdamW,
    checkpoints: CheckpointManager,
    metrics: MetricsLog,
    interrupted: InterruptFlag,
    batch_observer: Option<BatchObserver>,
}

impl<'a> Trainer<'a> {
    /// 新しいトレーナーを作成（ネットワークはシードから初期化）
    pub fn new(config: TrainConfig, dataset: &'a Dataset) -> Result<Self> {
        config.validate()?;

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        rng.set_stream(INIT_STREAM);
        let network = ValueNetwork::new(dataset.input_size(), &config.hidden_layers, &mut rng);
        let optimizer = AdamW::new(&network, config.learning_rate, config.weight_decay);
        let split = Split::new(dataset.len(), config.seed);
        let checkpoints = CheckpointManager::new(&config.checkpoint_path);
        let metrics = MetricsLog::new(&config.metrics_log_path, new_run_id());

        Ok(Self {
            config,
            dataset,
            split,
            network,
            optimizer,
            checkpoints,
            metrics,
            interrupted: InterruptFlag::new(),
            batch_observer: None,
        })
    }

    /// 中断フラグを取得
    pub fn interrupted(&self) -> InterruptFlag {
        self.interrupted.clone()
    }

    /// バッチ完了ごとのコールバックを設定
    pub fn set_batch_observer<F>(&mut self, observer: F)
    where
        F: FnMut(usize, usize) + 'static,
    {
        self.batch_observer = Some(Box::new(observer));
    }

    pub fn network(&self) -> &ValueNetwork {
        &self.network
    }

    pub fn split(&self) -> &Split {
        &self.split
    }

    pub fn run_id(&self) -> &str {
        self.metrics.run_id()
    }

    /// 学習を実行
    pub fn train(&mut self) -> Result<TrainOutcome> {
        let dataset = self.dataset;
        let sample_count = dataset.len();
        let total_epochs = self.config.epochs;

        let start = self.restore_start_state();
        let start_epoch = start.resume.start_epoch;

        log::info!(
            "[setup] device={DEVICE} samples={sample_count} train={} val={} hidden={:?} epochs={total_epochs} \
             start_epoch={start_epoch} resume={} warm_start={} loaded_checkpoint={} loaded_weights={} \
             early_stop_patience={} early_stop_min_delta={} early_stop_min_epochs={}",
            self.split.train.len(),
            self.split.validation.len(),
            self.config.hidden_layers,
            on_off(self.config.resume),
            on_off(self.config.warm_start),
            yes_no(start.resume.resumed),
            yes_no(start.warm_started),
            self.config.early_stop_patience,
            self.config.early_stop_min_delta,
            self.config.early_stop_min_epochs,
        );
        log::info!(
            "[setup] parameters={} checkpoint={} metrics={}",
            self.network.param_count(),
            self.checkpoints.path().display(),
            self.metrics.path().display()
        );

        self.metrics.emit(&MetricEvent::RunStart(RunStart {
            options: self.run_options(),
            device: DEVICE.to_string(),
            sample_count,
            resumed_from_checkpoint: start.resume.resumed,
            warm_started: start.warm_started,
            start_epoch,
        }));

        let started_at = Instant::now();
        let mut early_stopping = EarlyStopping::new(
            self.config.early_stop_patience,
            self.config.early_stop_min_delta,
            self.config.early_stop_min_epochs,
        );
        let mut last_completed_epoch = start_epoch - 1;
        let mut last_epoch_with_updates = start_epoch - 1;
        let mut early_stopped = false;

        for epoch in start_epoch..=total_epochs {
            if self.interrupted.is_requested() {
                return self.finish_interrupted(
                    start,
                    last_epoch_with_updates.max(last_completed_epoch),
                );
            }

            let run = self.train_epoch(epoch);
            if run.batches > 0 {
                last_epoch_with_updates = epoch;
            }
            // 最終バッチの学習中に届いた中断もここで拾う
            if self.interrupted.is_requested() {
                return self.finish_interrupted(
                    start,
                    last_epoch_with_updates.max(last_completed_epoch),
                );
            }

            let train_metrics = evaluate(&self.network, dataset, &self.split.train);
            let val_metrics = evaluate(&self.network, dataset, &self.split.validation);
            early_stopping.record(epoch, val_metrics.mse, &self.network);

            let elapsed = started_at.elapsed().as_secs_f64();
            let eta = if epoch == total_epochs {
                0.0
            } else {
                let epochs_run = (epoch - start_epoch + 1) as f64;
                elapsed / epochs_run * (total_epochs - epoch) as f64
            };

            log::info!(
                "[epoch] {epoch}/{total_epochs} loss={:.4} train_mse={:.4} val_mse={:.4} val_acc={:.1}% \
                 best_val_mse={:.4} best_epoch={} es_wait={}/{} elapsed={} eta={}",
                run.avg_loss,
                train_metrics.mse,
                val_metrics.mse,
                val_metrics.sign_accuracy * 100.0,
                early_stopping.best_val_mse(),
                early_stopping.best_epoch(),
                early_stopping.wait(),
                early_stopping.patience(),
                format_duration(elapsed),
                format_duration(eta),
            );
            self.metrics.emit(&MetricEvent::Epoch(EpochRecord {
                epoch,
                total_epochs,
                loss: run.avg_loss,
                train_mse: train_metrics.mse,
                train_mae: train_metrics.mae,
                train_acc: train_metrics.sign_accuracy,
                val_mse: val_metrics.mse,
                val_mae: val_metrics.mae,
                val_acc: val_metrics.sign_accuracy,
                elapsed_seconds: round_millis(elapsed),
                eta_seconds: round_millis(eta),
                sample_count,
                best_val_mse: early_stopping.best_val_mse(),
                best_epoch: early_stopping.best_epoch(),
                early_stop_wait: early_stopping.wait(),
                early_stop_patience: early_stopping.patience(),
            }));
            last_completed_epoch = epoch;

            if epoch % self.config.save_every == 0 {
                let state = TrainingState::capture(
                    epoch,
                    dataset.feature_names(),
                    &self.network,
                    &self.optimizer,
                    sample_count,
                );
                // 定期保存の失敗では学習を止めない
                match self.checkpoints.save(&state) {
                    Ok(()) => log::info!(
                        "[checkpoint] epoch={epoch} saved={}",
                        self.checkpoints.path().display()
                    ),
                    Err(e) => log::warn!("[checkpoint] {e:#}"),
                }
            }

            if early_stopping.should_stop(epoch) {
                early_stopped = true;
                log::info!(
                    "[early-stop] epoch={epoch} no val_mse improvement >= {} for {} epochs; \
                     best_epoch={} best_val_mse={:.4}",
                    early_stopping.min_delta(),
                    early_stopping.patience(),
                    early_stopping.best_epoch(),
                    early_stopping.best_val_mse(),
                );
                break;
            }
        }

        self.finish_completed(start, last_completed_epoch, &early_stopping, early_stopped)
    }

    /// チェックポイントからのリジューム、だめならウォームスタート
    fn restore_start_state(&mut self) -> StartState {
        let dataset = self.dataset;
        let feature_names = dataset.feature_names();
        let resume = if self.config.resume {
            self.checkpoints.load(
                feature_names,
                &self.config.hidden_layers,
                &mut self.network,
                &mut self.optimizer,
            )
        } else {
            Resume::COLD_START
        };
        let warm_started = !resume.resumed
            && self.config.warm_start
            && warm_start::load(&self.config.output_path, &mut self.network, feature_names);

        StartState {
            resume,
            warm_started,
        }
    }

    /// エポックのシャッフル順（`seed` と `epoch` だけで決まる）
    fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order = self.split.train.clone();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        rng.set_stream(epoch as u64);
        order.shuffle(&mut rng);
        order
    }

    /// 1エポックの学習
    fn train_epoch(&mut self, epoch: usize) -> EpochRun {
        let dataset = self.dataset;
        let batch_size = self.config.batch_size;
        let order = self.epoch_order(epoch);
        let num_batches = order.len().div_ceil(batch_size);

        let progress = ProgressBar::new(num_batches as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} loss:{msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut running_loss = 0.0f64;
        let mut batches = 0usize;

        for (batch_idx, batch) in order.chunks(batch_size).enumerate() {
            if self.interrupted.is_requested() {
                break;
            }

            self.network.zero_grad();
            let scale = 1.0 / batch.len() as f32;
            let mut batch_loss = 0.0f64;
            for &index in batch {
                let sample = dataset.sample(index);
                batch_loss += f64::from(self.network.accumulate_gradients(
                    &sample.features,
                    sample.target,
                    scale,
                ));
            }
            self.optimizer.step(&mut self.network);

            running_loss += batch_loss / batch.len() as f64;
            batches += 1;

            if batch_idx % 10 == 0 {
                progress.set_message(format!("{:.6}", running_loss / batches as f64));
            }
            progress.inc(1);

            if let Some(observer) = self.batch_observer.as_mut() {
                observer(epoch, batch_idx);
            }
        }

        progress.finish_and_clear();

        EpochRun {
            avg_loss: running_loss / batches.max(1) as f64,
            batches,
        }
    }

    /// 中断時の後処理（チェックポイント保存、途中モデルのエクスポート）
    fn finish_interrupted(
        &mut self,
        start: StartState,
        epochs_completed: usize,
    ) -> Result<TrainOutcome> {
        let sample_count = self.dataset.len();
        let state = TrainingState::capture(
            epochs_completed,
            self.dataset.feature_names(),
            &self.network,
            &self.optimizer,
            sample_count,
        );
        self.checkpoints.save(&state)?;
        self.export(epochs_completed)?;

        log::warn!(
            "[interrupt] checkpoint saved to {}; partial model exported to {}",
            self.checkpoints.path().display(),
            self.config.output_path.display()
        );
        log::warn!("[interrupt] rerun with --resume to continue from this checkpoint");

        self.metrics.emit(&MetricEvent::RunEnd(RunEnd {
            status: RunStatus::Interrupted,
            epochs_completed,
            sample_count,
            summary: None,
        }));

        Ok(TrainOutcome::Interrupted(RunSummary {
            start_epoch: start.resume.start_epoch,
            resumed: start.resume.resumed,
            warm_started: start.warm_started,
            epochs_completed,
            selected_epoch: epochs_completed,
            train_metrics: None,
            val_metrics: None,
            checkpoint_writes: self.checkpoints.writes(),
        }))
    }

    /// 正常終了時の後処理（最良モデルの復元、エクスポート、チェックポイント削除）
    fn finish_completed(
        &mut self,
        start: StartState,
        last_completed_epoch: usize,
        early_stopping: &EarlyStopping,
        early_stopped: bool,
    ) -> Result<TrainOutcome> {
        let dataset = self.dataset;
        let sample_count = dataset.len();

        let mut selected_epoch = last_completed_epoch;
        if let Some(best_epoch) = early_stopping.restore_best(&mut self.network) {
            selected_epoch = best_epoch;
            if early_stopped {
                log::info!("[early-stop] restored best epoch {best_epoch} weights before export");
            }
        }

        self.export(selected_epoch)?;

        match self.checkpoints.remove() {
            Ok(true) => log::info!("[checkpoint] removed={}", self.checkpoints.path().display()),
            Ok(false) => {}
            Err(e) => log::warn!(
                "[checkpoint] failed to remove {}: {e}",
                self.checkpoints.path().display()
            ),
        }

        let train_metrics = evaluate(&self.network, dataset, &self.split.train);
        let val_metrics = evaluate(&self.network, dataset, &self.split.validation);

        log::info!(
            "[done] saved={} selected_epoch={selected_epoch} completed_epochs={last_completed_epoch} \
             train_mse={:.4} train_mae={:.4} train_acc={:.1}% val_mse={:.4} val_mae={:.4} val_acc={:.1}%",
            self.config.output_path.display(),
            train_metrics.mse,
            train_metrics.mae,
            train_metrics.sign_accuracy * 100.0,
            val_metrics.mse,
            val_metrics.mae,
            val_metrics.sign_accuracy * 100.0,
        );

        let (best_val_mse, best_epoch) = if early_stopping.best_epoch() > 0 {
            (early_stopping.best_val_mse(), early_stopping.best_epoch())
        } else {
            (val_metrics.mse, selected_epoch)
        };
        let status = if early_stopped {
            RunStatus::EarlyStopped
        } else {
            RunStatus::Completed
        };
        self.metrics.emit(&MetricEvent::RunEnd(RunEnd {
            status,
            epochs_completed: last_completed_epoch,
            sample_count,
            summary: Some(RunEndSummary {
                selected_epoch,
                train_mse: train_metrics.mse,
                train_mae: train_metrics.mae,
                train_acc: train_metrics.sign_accuracy,
                val_mse: val_metrics.mse,
                val_mae: val_metrics.mae,
                val_acc: val_metrics.sign_accuracy,
                best_val_mse,
                best_epoch,
                early_stop_patience: early_stopping.patience(),
                early_stop_min_delta: early_stopping.min_delta(),
                early_stop_min_epochs: early_stopping.min_epochs(),
                early_stopped,
            }),
        }));

        let summary = RunSummary {
            start_epoch: start.resume.start_epoch,
            resumed: start.resume.resumed,
            warm_started: start.warm_started,
            epochs_completed: last_completed_epoch,
            selected_epoch,
            train_metrics: Some(train_metrics),
            val_metrics: Some(val_metrics),
            checkpoint_writes: self.checkpoints.writes(),
        };
        Ok(if early_stopped {
            TrainOutcome::EarlyStopped(summary)
        } else {
            TrainOutcome::Completed(summary)
        })
    }

    /// 現在の重みをエクスポート（`epochs` はメタデータに記録するエポック）
    fn export(&self, epochs: usize) -> Result<()> {
        let meta = self.dataset.meta();
        let info = TrainingInfo {
            games: meta.games,
            position_samples: self.dataset.len(),
            epochs,
            difficulty: meta.difficulty_label().to_string(),
            device: DEVICE.to_string(),
            batch_size: self.config.batch_size,
            learning_rate: self.config.learning_rate,
            hidden_layers: self.config.hidden_layers.clone(),
            workers: meta.workers,
            ..TrainingInfo::default()
        };
        ExportedModel::from_network(&self.network, self.dataset.feature_names(), info)
            .write(&self.config.output_path)
    }

    fn run_options(&self) -> RunOptions {
        let meta = self.dataset.meta();
        RunOptions {
            games: meta.games,
            difficulty: meta.difficulty.clone(),
            workers: meta.workers,
            epochs: self.config.epochs,
            batch_size: self.config.batch_size,
            learning_rate: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            hidden_layers: self.config.hidden_layers.clone(),
            resume: self.config.resume,
            warm_start: self.config.warm_start,
            checkpoint: self.config.checkpoint_path.display().to_string(),
            early_stop_patience: self.config.early_stop_patience,
            early_stop_min_delta: self.config.early_stop_min_delta,
            early_stop_min_epochs: self.config.early_stop_min_epochs,
        }
    }
}

/// 経過時間の表示（`1h02m03s` / `4m05s` / `6s`）
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let remaining = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes:02}m{remaining:02}s")
    } else if minutes > 0 {
        format!("{minutes}m{remaining:02}s")
    } else {
        format!("{remaining}s")
    }
}

fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_trainer::dataset::{DatasetDocument, Sample};
    use rand::Rng;
    use std::path::Path;

    fn dataset(n: usize) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let samples = (0..n)
            .map(|_| {
                let features = vec![rng.random_range(-1.0f32..1.0), rng.random_range(-1.0f32..1.0)];
                let target = (0.6 * features[0] - 0.4 * features[1]).clamp(-1.0, 1.0);
                Sample { features, target }
            })
            .collect();
        Dataset::from_document(DatasetDocument {
            feature_names: Some(vec!["material".to_string(), "mobility".to_string()]),
            samples: Some(samples),
            ..DatasetDocument::default()
        })
        .unwrap()
    }

    fn config(dir: &Path) -> TrainConfig {
        TrainConfig {
            output_path: dir.join("model.json"),
            checkpoint_path: dir.join("deep.ckpt"),
            metrics_log_path: dir.join("metrics.jsonl"),
            epochs: 2,
            batch_size: 8,
            learning_rate: 0.01,
            weight_decay: 0.0,
            hidden_layers: vec![4],
            early_stop_patience: 0,
            early_stop_min_epochs: 0,
            ..TrainConfig::default()
        }
    }

    fn metric_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0s");
        assert_eq!(format_duration(-3.0), "0s");
        assert_eq!(format_duration(59.9), "59s");
        assert_eq!(format_duration(61.0), "1m01s");
        assert_eq!(format_duration(3723.0), "1h02m03s");
    }

    #[test]
    fn test_epoch_order_depends_only_on_seed_and_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(60);
        let a = Trainer::new(config(dir.path()), &data).unwrap();
        let b = Trainer::new(config(dir.path()), &data).unwrap();

        assert_eq!(a.epoch_order(3), b.epoch_order(3));
        assert_ne!(a.epoch_order(3), a.epoch_order(4));

        let mut sorted = a.epoch_order(3);
        sorted.sort_unstable();
        let mut train = a.split().train.clone();
        train.sort_unstable();
        assert_eq!(sorted, train);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(10);
        let config = TrainConfig {
            batch_size: 0,
            ..config(dir.path())
        };
        assert!(Trainer::new(config, &data).is_err());
    }

    #[test]
    fn test_completed_run() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(40);
        let config = config(dir.path());
        let mut trainer = Trainer::new(config.clone(), &data).unwrap();

        let outcome = trainer.train().unwrap();
        assert_eq!(outcome.status(), RunStatus::Completed);
        assert_eq!(outcome.exit_code(), 0);

        let summary = outcome.summary();
        assert_eq!(summary.start_epoch, 1);
        assert!(!summary.resumed);
        assert!(!summary.warm_started);
        assert_eq!(summary.epochs_completed, 2);
        assert_eq!(summary.checkpoint_writes, 2);
        assert!(summary.val_metrics.is_some());

        assert!(!config.checkpoint_path.exists());
        let model = ExportedModel::read(&config.output_path).unwrap();
        assert_eq!(model.feature_names, data.feature_names());
        assert_eq!(model.training.position_samples, 40);

        let events = metric_lines(&config.metrics_log_path);
        let kinds: Vec<_> = events.iter().map(|e| e["eventType"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["run_start", "epoch", "epoch", "run_end"]);
        assert_eq!(events[3]["status"], "completed");
        assert_eq!(events[0]["runId"], trainer.run_id());
    }

    #[test]
    fn test_interrupt_before_first_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(40);
        let config = config(dir.path());
        let mut trainer = Trainer::new(config.clone(), &data).unwrap();
        trainer.interrupted().request();

        let outcome = trainer.train().unwrap();
        assert_eq!(outcome.status(), RunStatus::Interrupted);
        assert_eq!(outcome.exit_code(), 130);
        assert_eq!(outcome.summary().epochs_completed, 0);

        // 次回は1エポック目から
        let checkpoints = CheckpointManager::new(&config.checkpoint_path);
        let state = checkpoints.validate(data.feature_names(), &[4]).unwrap();
        assert_eq!(state.epoch, 0);
        assert!(config.output_path.exists());

        let events = metric_lines(&config.metrics_log_path);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["status"], "interrupted");
        assert_eq!(events[1]["epochsCompleted"], 0);
    }

    #[test]
    fn test_interrupt_during_final_batch_of_last_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(40);
        let config = config(dir.path());
        let mut trainer = Trainer::new(config.clone(), &data).unwrap();
        let last_batch = trainer.split().train.len().div_ceil(config.batch_size) - 1;
        let flag = trainer.interrupted();
        trainer.set_batch_observer(move |epoch, batch| {
            if epoch == 2 && batch == last_batch {
                flag.request();
            }
        });

        let outcome = trainer.train().unwrap();
        assert_eq!(outcome.status(), RunStatus::Interrupted);
        assert_eq!(outcome.exit_code(), 130);
        assert_eq!(outcome.summary().epochs_completed, 2);
        // エポック1の定期保存 + 中断時の保存
        assert_eq!(outcome.summary().checkpoint_writes, 2);

        let checkpoints = CheckpointManager::new(&config.checkpoint_path);
        let state = checkpoints.validate(data.feature_names(), &[4]).unwrap();
        assert_eq!(state.epoch, 2);

        let events = metric_lines(&config.metrics_log_path);
        let kinds: Vec<_> = events.iter().map(|e| e["eventType"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["run_start", "epoch", "run_end"]);
        assert_eq!(events[2]["status"], "interrupted");
        assert_eq!(events[2]["epochsCompleted"], 2);
    }

    #[test]
    fn test_zero_epochs_exports_initial_weights() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(40);
        let config = TrainConfig {
            epochs: 0,
            ..config(dir.path())
        };
        let mut trainer = Trainer::new(config.clone(), &data).unwrap();

        let outcome = trainer.train().unwrap();
        assert_eq!(outcome.status(), RunStatus::Completed);
        let summary = outcome.summary();
        assert_eq!(summary.epochs_completed, 0);
        assert_eq!(summary.selected_epoch, 0);
        assert_eq!(summary.checkpoint_writes, 0);

        let model = ExportedModel::read(&config.output_path).unwrap();
        assert_eq!(model.training.epochs, 0);
        for (exported, live) in model.layers.iter().zip(trainer.network().layers()) {
            assert_eq!(exported.weights, live.weights());
        }

        let events = metric_lines(&config.metrics_log_path);
        let kinds: Vec<_> = events.iter().map(|e| e["eventType"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["run_start", "run_end"]);
        assert_eq!(events[1]["epochsCompleted"], 0);
    }

    #[test]
    fn test_early_stop_exports_best_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(40);
        // 改善とみなされるのは最初のエポックだけ
        let config = TrainConfig {
            epochs: 10,
            early_stop_patience: 1,
            early_stop_min_delta: 1e9,
            ..config(dir.path())
        };
        let mut trainer = Trainer::new(config.clone(), &data).unwrap();

        let outcome = trainer.train().unwrap();
        assert_eq!(outcome.status(), RunStatus::EarlyStopped);
        assert_eq!(outcome.summary().epochs_completed, 2);
        assert_eq!(outcome.summary().selected_epoch, 1);

        let model = ExportedModel::read(&config.output_path).unwrap();
        assert_eq!(model.training.epochs, 1);
        for (exported, live) in model.layers.iter().zip(trainer.network().layers()) {
            assert_eq!(exported.weights, live.weights());
            assert_eq!(exported.bias, live.bias());
        }

        let events = metric_lines(&config.metrics_log_path);
        let end = events.last().unwrap();
        assert_eq!(end["status"], "early_stopped");
        assert_eq!(end["bestEpoch"], 1);
        assert_eq!(end["earlyStopped"], true);
    }

    #[test]
    fn test_checkpoint_past_last_epoch_finishes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(40);
        let config = config(dir.path());

        let mut first = Trainer::new(config.clone(), &data).unwrap();
        first.interrupted().request();
        first.train().unwrap();

        // epochs=2 に対してエポック2までのチェックポイントを用意する
        let mut checkpoints = CheckpointManager::new(&config.checkpoint_path);
        let mut state = checkpoints.validate(data.feature_names(), &[4]).unwrap();
        state.epoch = 2;
        checkpoints.save(&state).unwrap();

        let mut trainer = Trainer::new(config.clone(), &data).unwrap();
        let outcome = trainer.train().unwrap();
        assert_eq!(outcome.status(), RunStatus::Completed);
        let summary = outcome.summary();
        assert!(summary.resumed);
        assert_eq!(summary.start_epoch, 3);
        assert_eq!(summary.epochs_completed, 2);
        assert_eq!(summary.selected_epoch, 2);
        assert_eq!(summary.checkpoint_writes, 0);
        assert!(!config.checkpoint_path.exists());
    }
}
