//! 早期終了と最良モデルの保持
//!
//! - 検証 MSE が `min_delta` 以上改善 → best 更新、スナップショット取得、待ちカウンタをリセット
//! - 改善なし → 待ちカウンタを加算
//! - `patience > 0` かつ `epoch >= min_epochs` かつ待ちカウンタが `patience` に達したら停止
//!
//! 学習終了時には最良スナップショットをネットワークに戻してからエクスポートする。

use super::network::{ModelState, ValueNetwork};

/// 早期終了コントローラ
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    min_epochs: usize,
    best_val_mse: f64,
    best_epoch: usize,
    best_snapshot: Option<ModelState>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64, min_epochs: usize) -> Self {
        Self {
            patience,
            min_delta,
            min_epochs,
            best_val_mse: f64::INFINITY,
            best_epoch: 0,
            best_snapshot: None,
            wait: 0,
        }
    }

    /// 完了したエポックの検証 MSE を記録する。改善した場合は true。
    pub fn record(&mut self, epoch: usize, val_mse: f64, network: &ValueNetwork) -> bool {
        let improved = self.best_epoch == 0 || (self.best_val_mse - val_mse) >= self.min_delta;
        if improved {
            self.best_val_mse = val_mse;
            self.best_epoch = epoch;
            self.best_snapshot = Some(network.state());
            self.wait = 0;
        } else {
            self.wait += 1;
        }
        improved
    }

    /// このエポックで学習を打ち切るか
    pub fn should_stop(&self, epoch: usize) -> bool {
        self.patience > 0 && epoch >= self.min_epochs && self.wait >= self.patience
    }

    /// 最良スナップショットをネットワークに戻す。戻したエポックを返す。
    pub fn restore_best(&self, network: &mut ValueNetwork) -> Option<usize> {
        let snapshot = self.best_snapshot.as_ref()?;
        match network.load_state(snapshot) {
            Ok(()) => Some(self.best_epoch),
            Err(e) => {
                log::warn!("[early-stop] failed to restore best snapshot: {e}");
                None
            }
        }
    }

    pub fn best_val_mse(&self) -> f64 {
        self.best_val_mse
    }

    /// 最良エポック（未記録なら 0）
    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn wait(&self) -> usize {
        self.wait
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    pub fn min_delta(&self) -> f64 {
        self.min_delta
    }

    pub fn min_epochs(&self) -> usize {
        self.min_epochs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn network(seed: u64) -> ValueNetwork {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        ValueNetwork::new(2, &[3], &mut rng)
    }

    #[test]
    fn test_first_epoch_always_improves() {
        let mut es = EarlyStopping::new(3, 0.01, 0);
        assert!(es.record(1, 5.0, &network(1)));
        assert_eq!(es.best_epoch(), 1);
        assert_eq!(es.best_val_mse(), 5.0);
        assert_eq!(es.wait(), 0);
    }

    #[test]
    fn test_improvement_needs_min_delta() {
        let net = network(1);
        let mut es = EarlyStopping::new(3, 0.01, 0);
        es.record(1, 0.50, &net);
        // 0.005 の改善は min_delta 未満
        assert!(!es.record(2, 0.495, &net));
        assert_eq!(es.wait(), 1);
        assert_eq!(es.best_val_mse(), 0.50);
        // 0.01 ちょうどの改善は採用
        assert!(es.record(3, 0.49, &net));
        assert_eq!(es.best_epoch(), 3);
        assert_eq!(es.wait(), 0);
    }

    #[test]
    fn test_never_stops_before_min_epochs() {
        let net = network(1);
        let mut es = EarlyStopping::new(2, 0.0, 10);
        es.record(1, 1.0, &net);
        for epoch in 2..10 {
            assert!(!es.record(epoch, 2.0, &net));
            assert!(!es.should_stop(epoch), "stopped at epoch {epoch}");
        }
        es.record(10, 2.0, &net);
        assert!(es.should_stop(10));
    }

    #[test]
    fn test_stops_after_patience() {
        let net = network(1);
        let mut es = EarlyStopping::new(2, 0.0, 0);
        es.record(1, 1.0, &net);
        es.record(2, 1.5, &net);
        assert!(!es.should_stop(2));
        es.record(3, 1.5, &net);
        assert!(es.should_stop(3));
    }

    #[test]
    fn test_zero_patience_disables_stopping() {
        let net = network(1);
        let mut es = EarlyStopping::new(0, 0.0, 0);
        es.record(1, 1.0, &net);
        for epoch in 2..20 {
            es.record(epoch, 9.0, &net);
            assert!(!es.should_stop(epoch));
        }
    }

    #[test]
    fn test_restore_best_snapshot() {
        let mut es = EarlyStopping::new(5, 0.0, 0);
        let mut live = network(1);
        assert_eq!(es.restore_best(&mut live), None);

        es.record(1, 0.3, &live);
        let best = live.state();

        // 学習が進んで重みが変わり、検証が悪化した
        live.load_state(&network(2).state()).unwrap();
        assert!(!es.record(2, 0.4, &live));
        assert_ne!(live.state(), best);

        assert_eq!(es.restore_best(&mut live), Some(1));
        assert_eq!(live.state(), best);
    }
}
