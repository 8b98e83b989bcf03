//! 一度だけ立てられる停止シグナル。
//!
//! フラグ参照（`is_set`）に加えて、`crossbeam_channel::select!` の中で待てるように
//! 「送信されないチャネル」の受信側を配る。`trigger` で送信側を drop すると
//! 全ての受信側が即座に `Disconnected` を返す。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

struct Inner {
    flag: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// シグナルを立てる。2回目以降は何もしない。初回のみ `true` を返す。
    pub fn trigger(&self) -> bool {
        if self.inner.flag.swap(true, Ordering::SeqCst) {
            return false;
        }
        // ロックが poison されていても送信側は確実に捨てる
        let mut guard = self.inner.tx.lock().unwrap_or_else(|e| e.into_inner());
        guard.take();
        true
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// `select!` で待つための受信側。シグナル後は常に即時 `Err` を返す。
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.rx
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal").field("set", &self.is_set()).finish()
    }
}
