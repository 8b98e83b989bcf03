//! 評価ワーカー群。
//!
//! 各ワーカーは作業キューから1件ずつ取り出して採点し、結果キューに流すだけで、
//! 共有する可変状態を持たない。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::evaluator::{EvalOutcome, OpeningScorer};
use crate::opening::decode;
use crate::reader::WorkItem;

/// 作業キュー待ちの上限。タイムアウトは単なる再試行。
pub const WORK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 結果キューの要素。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultItem {
    Scored { opening: String, outcome: EvalOutcome },
    /// ワーカーが終了した。ワーカー1つにつき1個だけ送られる。
    WorkerExited { worker: usize },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub evaluated: u64,
    /// 着手0 / 盤外で評価しなかった件数
    pub skipped: u64,
    /// 1件の処理中に panic した件数
    pub faults: u64,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerStats>>,
}

impl WorkerPool {
    pub fn spawn(
        workers: usize,
        board_size: u32,
        scorer: Arc<dyn OpeningScorer>,
        work_rx: Receiver<WorkItem>,
        result_tx: Sender<ResultItem>,
    ) -> std::io::Result<Self> {
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let scorer = Arc::clone(&scorer);
            let rx = work_rx.clone();
            let tx = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("opening-worker-{id}"))
                .spawn(move || worker_main(id, board_size, scorer.as_ref(), &rx, &tx))?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    /// 全ワーカーが終了済みか。
    pub fn all_finished(&self) -> bool {
        self.handles.iter().all(|h| h.is_finished())
    }

    pub fn into_handles(self) -> Vec<JoinHandle<WorkerStats>> {
        self.handles
    }
}

fn worker_main(
    id: usize,
    board_size: u32,
    scorer: &dyn OpeningScorer,
    rx: &Receiver<WorkItem>,
    tx: &Sender<ResultItem>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    loop {
        let item = match rx.recv_timeout(WORK_POLL_INTERVAL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let WorkItem::Opening(text) = item else {
            break;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| score_item(&text, board_size, scorer))) {
            Ok(Some(outcome)) => {
                stats.evaluated += 1;
                // 集計側が先に終わっていれば捨てるだけ
                let _ = tx.send(ResultItem::Scored {
                    opening: text,
                    outcome,
                });
            }
            Ok(None) => stats.skipped += 1,
            Err(payload) => {
                stats.faults += 1;
                log::error!(
                    "worker {id}: fault while scoring {text}: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
    let _ = tx.send(ResultItem::WorkerExited { worker: id });
    log::debug!(
        "worker {id} exited: evaluated={} skipped={} faults={}",
        stats.evaluated,
        stats.skipped,
        stats.faults
    );
    stats
}

/// 1件を採点する。評価対象にならない開局は `None`。
fn score_item(text: &str, board_size: u32, scorer: &dyn OpeningScorer) -> Option<EvalOutcome> {
    let opening = decode(text);
    if let Err(e) = opening.validate(board_size) {
        log::debug!("skip {text}: {e}");
        return None;
    }
    Some(scorer.score(&opening))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
