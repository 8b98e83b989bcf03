//! 起動から後始末までの全体制御。
//!
//! 起動順: 前提確認 → checkpoint 読み込み → ジェネレータ → reader → ワーカー → 集計。
//! 集計がどの理由で止まっても同じ後始末を通り、最後に必ず保存する。

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{self as chan, Receiver};

use crate::aggregator::{AggregateReport, Aggregator};
use crate::checkpoint::AcceptedSet;
use crate::config::RunConfig;
use crate::evaluator::{EvaluatorClient, OpeningScorer};
use crate::generator::{GeneratorProcess, GENERATOR_TERM_GRACE};
use crate::pool::{WorkerPool, WorkerStats};
use crate::process::check_executable;
use crate::reader::{CandidateReader, ReaderReport};
use crate::signal::StopSignal;

/// 停止後、ワーカーが自然に抜けるのを待つ時間。
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// kill switch を立てた後の追加猶予。これを過ぎたワーカーは切り離す。
pub const WORKER_KILL_GRACE: Duration = Duration::from_secs(1);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug)]
pub enum RunOutcome {
    /// checkpoint の時点で目標数に達していた。外部プロセスは起動していない。
    AlreadySatisfied { have: usize, target: usize },
    Completed(RunSummary),
}

#[derive(Debug)]
pub struct RunSummary {
    pub initial: usize,
    pub total: usize,
    pub added: usize,
    pub report: AggregateReport,
    /// 時間内に終わらなかった場合は `None`
    pub reader: Option<ReaderReport>,
    pub workers: WorkerStats,
    /// 時間内に終わらず切り離したワーカー数
    pub detached_workers: usize,
}

/// 候補の入力元。
enum Source {
    Generator(GeneratorProcess),
    Lines(Receiver<String>),
}

pub struct Supervisor {
    cfg: RunConfig,
    stop: StopSignal,
    kill_switch: StopSignal,
}

impl Supervisor {
    /// `stop` は外部（Ctrl-C など）から立てられる停止要求。
    pub fn new(cfg: RunConfig, stop: StopSignal) -> Self {
        Self {
            cfg,
            stop,
            kill_switch: StopSignal::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.cfg
    }

    /// ジェネレータと評価エンジンを起動して目標数まで集める。
    pub fn run(&self) -> Result<RunOutcome> {
        self.cfg.validate()?;
        check_executable(&self.cfg.rapfi, "evaluator")?;
        if self.cfg.generator_path() != self.cfg.rapfi.as_path() {
            check_executable(self.cfg.generator_path(), "generator")?;
        }

        let set = self.load_checkpoint()?;
        if set.len() >= self.cfg.count {
            return Ok(self.already_satisfied(&set));
        }

        let generator = GeneratorProcess::spawn(&self.cfg.generator_config())?;
        let scorer = Arc::new(EvaluatorClient::new(
            self.cfg.evaluator_config(),
            self.kill_switch.clone(),
        ));
        self.pipeline(set, Source::Generator(generator), scorer).map(RunOutcome::Completed)
    }

    /// 任意の行ストリームと採点器で同じパイプラインを回す。外部バイナリの確認は行わない。
    pub fn run_with(
        &self,
        lines: Receiver<String>,
        scorer: Arc<dyn OpeningScorer>,
    ) -> Result<RunOutcome> {
        self.cfg.validate()?;
        let set = self.load_checkpoint()?;
        if set.len() >= self.cfg.count {
            return Ok(self.already_satisfied(&set));
        }
        self.pipeline(set, Source::Lines(lines), scorer).map(RunOutcome::Completed)
    }

    fn load_checkpoint(&self) -> Result<AcceptedSet> {
        AcceptedSet::load(&self.cfg.output, self.cfg.board_size)
            .context("failed to load existing openings")
    }

    fn already_satisfied(&self, set: &AcceptedSet) -> RunOutcome {
        log::info!(
            "already have {} openings, target is {}",
            set.len(),
            self.cfg.count
        );
        RunOutcome::AlreadySatisfied {
            have: set.len(),
            target: self.cfg.count,
        }
    }

    fn pipeline(
        &self,
        set: AcceptedSet,
        source: Source,
        scorer: Arc<dyn OpeningScorer>,
    ) -> Result<RunSummary> {
        let cfg = &self.cfg;
        let workers = cfg.threads;
        let initial = set.len();
        log::info!("using {workers} workers");
        log::info!("have {initial} openings, need {} more", cfg.count - initial);

        let (work_tx, work_rx) = chan::bounded(cfg.queue_capacity());
        let (result_tx, result_rx) = chan::unbounded();

        let reader = match source {
            Source::Generator(generator) => CandidateReader::from_generator(
                generator,
                work_tx,
                work_rx.clone(),
                workers,
                self.stop.clone(),
            ),
            Source::Lines(lines) => {
                CandidateReader::new(lines, work_tx, work_rx.clone(), workers, self.stop.clone())
            }
        };
        let reader_handle = reader.spawn().context("failed to spawn candidate reader")?;

        let pool = match WorkerPool::spawn(workers, cfg.board_size, scorer, work_rx, result_tx) {
            Ok(pool) => pool,
            Err(e) => {
                self.stop.trigger();
                join_within(reader_handle, GENERATOR_TERM_GRACE + Duration::from_secs(1));
                return Err(e).context("failed to spawn worker threads");
            }
        };

        let mut aggregator = Aggregator::new(cfg.aggregator_config(), set);
        let report = aggregator.run(&result_rx, &self.stop, &|| {
            pool.all_finished() && reader_handle.is_finished()
        });

        // ---- teardown ----
        self.stop.trigger();
        let (worker_stats, detached_workers) = self.join_workers(pool);
        let reader = join_within(reader_handle, GENERATOR_TERM_GRACE + Duration::from_secs(1));
        if reader.is_none() {
            log::warn!("candidate reader did not finish in time; detaching");
        }

        let set = aggregator.into_accepted();
        set.save(&cfg.output)
            .with_context(|| format!("failed to save openings to {}", cfg.output.display()))?;

        let total = set.len();
        Ok(RunSummary {
            initial,
            total,
            added: total - initial,
            report,
            reader,
            workers: worker_stats,
            detached_workers,
        })
    }

    /// ワーカーを時間制限付きで回収する。戻り値は (集計, 切り離した数)。
    fn join_workers(&self, pool: WorkerPool) -> (WorkerStats, usize) {
        let handles = pool.into_handles();
        let all_done = || handles.iter().all(|h| h.is_finished());

        if !wait_until(Instant::now() + WORKER_JOIN_TIMEOUT, all_done) {
            log::warn!("workers still running after {WORKER_JOIN_TIMEOUT:?}, aborting evaluations");
            self.kill_switch.trigger();
            wait_until(Instant::now() + WORKER_KILL_GRACE, all_done);
        }

        let mut total = WorkerStats::default();
        let mut detached = 0;
        for handle in handles {
            if !handle.is_finished() {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                log::warn!("{name} did not stop; detaching");
                detached += 1;
                continue;
            }
            match handle.join() {
                Ok(stats) => {
                    total.evaluated += stats.evaluated;
                    total.skipped += stats.skipped;
                    total.faults += stats.faults;
                }
                Err(_) => log::error!("worker thread panicked"),
            }
        }
        (total, detached)
    }
}

/// `done` が真になるまで待つ。期限内に真になれば `true`。
fn wait_until(deadline: Instant, mut done: impl FnMut() -> bool) -> bool {
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(JOIN_POLL_INTERVAL);
    }
}

/// 期限内に終わったスレッドだけ join する。終わらなければ切り離して `None`。
fn join_within<T>(handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    if !wait_until(Instant::now() + timeout, || handle.is_finished()) {
        return None;
    }
    handle.join().ok()
}
