//! 中断フラグ
//!
//! SIGINT / SIGTERM を受けると立つ。学習ループはエポック先頭とバッチ先頭の
//! 2か所でのみ確認するため、実行中のバッチは必ず最後まで処理される。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 中断要求フラグ（複製しても同じフラグを共有する）
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 中断を要求する。最初の要求のときだけ true を返す。
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Ctrl-C / SIGTERM ハンドラを登録（プロセスごとに1回だけ呼べる）
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            if flag.request() {
                log::warn!("[interrupt] interrupt received, saving checkpoint after current batch...");
            }
        })
    }
}
