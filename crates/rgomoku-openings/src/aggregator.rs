//! 評価結果の集計。`AcceptedSet` を変更するのはここだけ。

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam_channel::{self as chan, Receiver};

use crate::checkpoint::AcceptedSet;
use crate::evaluator::EvalOutcome;
use crate::pool::ResultItem;
use crate::signal::StopSignal;

/// 結果待ちの上限。タイムアウトのたびに生存確認を行う。
pub const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// |評価値| が `max_eval` 未満のものだけを通す。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BalanceFilter {
    pub max_eval: i32,
}

impl BalanceFilter {
    pub fn new(max_eval: i32) -> Self {
        Self { max_eval }
    }

    pub fn accepts(&self, score: Option<i32>) -> bool {
        score.is_some_and(|s| i64::from(s).abs() < i64::from(self.max_eval))
    }
}

/// 1件の結果に対する判定。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accepted { score: i32 },
    Unscored,
    Unbalanced { score: i32 },
    Duplicate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    /// ワーカーが全て終了した、または結果キューが切断された
    PoolDrained,
    Interrupted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateReport {
    pub processed: u64,
    pub accepted: u64,
    pub rejected_unscored: u64,
    pub rejected_unbalanced: u64,
    pub duplicates: u64,
    pub checkpoints: u64,
    pub stop_reason: StopReason,
}

#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    pub target: usize,
    pub workers: usize,
    pub filter: BalanceFilter,
    pub checkpoint_path: PathBuf,
    pub save_interval: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    processed: u64,
    accepted: u64,
    rejected_unscored: u64,
    rejected_unbalanced: u64,
    duplicates: u64,
    checkpoints: u64,
}

pub struct Aggregator {
    cfg: AggregatorConfig,
    set: AcceptedSet,
    counters: Counters,
    last_save: Instant,
}

impl Aggregator {
    pub fn new(cfg: AggregatorConfig, set: AcceptedSet) -> Self {
        Self {
            cfg,
            set,
            counters: Counters::default(),
            last_save: Instant::now(),
        }
    }

    pub fn accepted(&self) -> &AcceptedSet {
        &self.set
    }

    pub fn into_accepted(self) -> AcceptedSet {
        self.set
    }

    pub fn target_reached(&self) -> bool {
        self.set.len() >= self.cfg.target
    }

    /// 結果を判定し、採用なら集合に加える。
    pub fn handle(&mut self, opening: &str, outcome: &EvalOutcome) -> Verdict {
        self.counters.processed += 1;
        let verdict = self.judge(opening, outcome);
        match &verdict {
            Verdict::Accepted { score } => {
                self.counters.accepted += 1;
                log::info!(
                    "[OK] [{}/{}] {opening} (eval: {score})",
                    self.set.len(),
                    self.cfg.target
                );
                if self.last_save.elapsed() >= self.cfg.save_interval {
                    self.checkpoint();
                }
            }
            Verdict::Unscored => {
                self.counters.rejected_unscored += 1;
                log::debug!("reject {opening}: {}", outcome.label());
            }
            Verdict::Unbalanced { score } => {
                self.counters.rejected_unbalanced += 1;
                log::debug!("reject {opening}: eval {score}");
            }
            Verdict::Duplicate => self.counters.duplicates += 1,
        }
        verdict
    }

    fn judge(&mut self, opening: &str, outcome: &EvalOutcome) -> Verdict {
        let Some(score) = outcome.score() else {
            return Verdict::Unscored;
        };
        if !self.cfg.filter.accepts(Some(score)) {
            return Verdict::Unbalanced { score };
        }
        let key = self.set.key_of(opening);
        if self.set.contains_key(&key) {
            return Verdict::Duplicate;
        }
        self.set.insert_with_key(opening.to_string(), key);
        Verdict::Accepted { score }
    }

    /// 途中保存。失敗してもログのみで集計は続ける。
    pub fn checkpoint(&mut self) {
        match self.set.save(&self.cfg.checkpoint_path) {
            Ok(()) => {
                self.counters.checkpoints += 1;
                log::info!("[SAVE] {} openings saved", self.set.len());
            }
            Err(e) => log::error!("checkpoint failed: {e}"),
        }
        self.last_save = Instant::now();
    }

    /// 停止条件のいずれかが成立するまで結果を受け取り続ける。
    ///
    /// `pool_finished` は結果待ちがタイムアウトした時に呼ばれ、`true` なら
    /// これ以上結果は来ないとみなす。
    pub fn run(
        &mut self,
        results: &Receiver<ResultItem>,
        stop: &StopSignal,
        pool_finished: &dyn Fn() -> bool,
    ) -> AggregateReport {
        let mut exited = 0usize;
        let reason = loop {
            if self.target_reached() {
                break StopReason::TargetReached;
            }
            if stop.is_set() {
                break StopReason::Interrupted;
            }
            chan::select! {
                recv(results) -> msg => match msg {
                    Ok(ResultItem::Scored { opening, outcome }) => {
                        self.handle(&opening, &outcome);
                    }
                    Ok(ResultItem::WorkerExited { worker }) => {
                        exited += 1;
                        log::debug!("worker {worker} exited ({exited}/{})", self.cfg.workers);
                        if exited >= self.cfg.workers {
                            break StopReason::PoolDrained;
                        }
                    }
                    Err(_) => break StopReason::PoolDrained,
                },
                recv(stop.receiver()) -> _ => break StopReason::Interrupted,
                default(RESULT_POLL_INTERVAL) => {
                    if pool_finished() {
                        break self.drain_remaining(results);
                    }
                }
            }
        };
        log::info!("aggregator stopped: {reason:?}");
        self.report(reason)
    }

    /// 全員終了後、キューに残っている結果を処理する。
    fn drain_remaining(&mut self, results: &Receiver<ResultItem>) -> StopReason {
        for item in results.try_iter() {
            if let ResultItem::Scored { opening, outcome } = item {
                self.handle(&opening, &outcome);
                if self.target_reached() {
                    return StopReason::TargetReached;
                }
            }
        }
        StopReason::PoolDrained
    }

    pub fn report(&self, stop_reason: StopReason) -> AggregateReport {
        let c = &self.counters;
        AggregateReport {
            processed: c.processed,
            accepted: c.accepted,
            rejected_unscored: c.rejected_unscored,
            rejected_unbalanced: c.rejected_unbalanced,
            duplicates: c.duplicates,
            checkpoints: c.checkpoints,
            stop_reason,
        }
    }
}
