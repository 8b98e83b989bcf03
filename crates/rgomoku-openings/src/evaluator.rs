//! 外部評価エンジン（Gomocup プロトコルの brain）による開局の採点。
//!
//! 1局面ごとにプロセスを起動し、`START` / `INFO` / `BOARD` を送って出力を回収する。
//! どんな失敗も [`EvalOutcome`] のいずれかに落とし、呼び出し側には伝播させない。

use std::fmt::Write as _;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel as chan;

use crate::opening::Opening;
use crate::process::{ManagedProcess, PipeSpec};
use crate::signal::StopSignal;

/// 持ち時間に上乗せする壁時計の猶予。
pub const EVAL_GRACE: Duration = Duration::from_secs(5);
/// stdout が閉じた後、プロセスの自然終了を待つ時間。
pub const EVAL_EXIT_GRACE: Duration = Duration::from_millis(200);

const EVAL_MARKER: &str = "Eval ";

#[derive(Clone, Debug)]
pub struct EvaluatorConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub board_size: u32,
    /// 1局面あたりの思考時間 (ms)。`INFO timeout_turn` としてそのまま渡す。
    pub eval_time_ms: u64,
}

impl EvaluatorConfig {
    /// プロセスを打ち切るまでの壁時計時間。
    pub fn wall_budget(&self) -> Duration {
        Duration::from_millis(self.eval_time_ms) + EVAL_GRACE
    }
}

/// 1回の評価の結末。`score()` が `None` のものは全て「未採点」として扱われる。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalOutcome {
    Scored(i32),
    /// 詰み表示（`+M5` など）。数値評価ではないので未採点。
    Mate(String),
    /// 評価行が無い、または数値として読めない
    NoEval,
    TimedOut,
    /// teardown 中の強制打ち切り
    Aborted,
    /// 起動失敗・I/O エラー
    Failed(String),
}

impl EvalOutcome {
    pub fn score(&self) -> Option<i32> {
        match self {
            EvalOutcome::Scored(v) => Some(*v),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EvalOutcome::Scored(_) => "scored",
            EvalOutcome::Mate(_) => "mate",
            EvalOutcome::NoEval => "no_eval",
            EvalOutcome::TimedOut => "timed_out",
            EvalOutcome::Aborted => "aborted",
            EvalOutcome::Failed(_) => "failed",
        }
    }
}

/// ワーカーから見た採点器。テストでは外部プロセスなしの実装に差し替える。
pub trait OpeningScorer: Send + Sync {
    fn score(&self, opening: &Opening) -> EvalOutcome;
}

pub struct EvaluatorClient {
    config: EvaluatorConfig,
    kill_switch: StopSignal,
}

impl EvaluatorClient {
    /// `kill_switch` が立つと実行中の評価プロセスを即座に kill して `Aborted` を返す。
    pub fn new(config: EvaluatorConfig, kill_switch: StopSignal) -> Self {
        Self {
            config,
            kill_switch,
        }
    }

    pub fn evaluate(&self, opening: &Opening) -> EvalOutcome {
        match self.run(opening) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::debug!("evaluator failed: {e:#}");
                EvalOutcome::Failed(format!("{e:#}"))
            }
        }
    }

    fn run(&self, opening: &Opening) -> Result<EvalOutcome> {
        let cfg = &self.config;
        let pipes = PipeSpec {
            stdin: true,
            stdout: true,
            stderr_inherit: false,
        };
        let mut proc =
            ManagedProcess::spawn(&cfg.path, &cfg.args, pipes, EVAL_EXIT_GRACE, "evaluator")?;
        let mut stdout = proc.take_stdout()?;

        let (tx, rx) = chan::bounded::<std::io::Result<Vec<u8>>>(1);
        thread::Builder::new()
            .name("evaluator-stdout".to_string())
            .spawn(move || {
                let mut buf = Vec::new();
                let res = stdout.read_to_end(&mut buf).map(|_| buf);
                let _ = tx.send(res);
            })
            .context("failed to spawn evaluator stdout reader")?;

        let request = build_request(opening, cfg.board_size, cfg.eval_time_ms);
        let mut stdin = proc.take_stdin()?;
        // 早期終了したエンジンへの書き込み失敗（EPIPE）は出力の判定に任せる
        if let Err(e) = stdin.write_all(request.as_bytes()).and_then(|_| stdin.flush()) {
            log::debug!("evaluator: failed to write request: {e}");
        }
        drop(stdin);
        proc.mark_running();

        let start = Instant::now();
        chan::select! {
            recv(rx) -> msg => {
                let bytes = msg
                    .map_err(|_| anyhow!("evaluator stdout reader exited without result"))?
                    .context("failed to read evaluator output")?;
                let output = String::from_utf8_lossy(&bytes);
                let outcome = parse_eval_output(&output);
                log::trace!("evaluator: {} in {:?}", outcome.label(), start.elapsed());
                Ok(outcome)
            }
            recv(self.kill_switch.receiver()) -> _ => {
                proc.kill();
                Ok(EvalOutcome::Aborted)
            }
            default(cfg.wall_budget()) => {
                log::debug!("evaluator: no result within {:?}, killing", cfg.wall_budget());
                proc.kill();
                Ok(EvalOutcome::TimedOut)
            }
        }
    }
}

impl OpeningScorer for EvaluatorClient {
    fn score(&self, opening: &Opening) -> EvalOutcome {
        self.evaluate(opening)
    }
}

/// 評価エンジンへの入力。先手(1)・後手(2)を交互に付ける。
pub fn build_request(opening: &Opening, board_size: u32, eval_time_ms: u64) -> String {
    let mut req = String::new();
    let _ = writeln!(req, "START {board_size}");
    let _ = writeln!(req, "INFO timeout_turn {eval_time_ms}");
    req.push_str("BOARD\n");
    for (mv, player) in opening.tagged_moves() {
        let _ = writeln!(req, "{},{},{}", mv.col, mv.row, player);
    }
    req.push_str("DONE\n");
    req
}

/// 出力から最初に読める `Eval <score>` を取り出す。
///
/// 詰み表示（`M` を含むトークン）はその時点で未採点とする。数値として読めない
/// トークンは無視して後続の行を探す。
pub fn parse_eval_output(output: &str) -> EvalOutcome {
    for line in output.lines() {
        let Some(idx) = line.find(EVAL_MARKER) else {
            continue;
        };
        let Some(token) = line[idx + EVAL_MARKER.len()..].split_whitespace().next() else {
            continue;
        };
        if token.contains('M') {
            return EvalOutcome::Mate(token.to_string());
        }
        let digits = token.strip_prefix('+').unwrap_or(token);
        if let Ok(v) = digits.parse::<i32>() {
            return EvalOutcome::Scored(v);
        }
    }
    EvalOutcome::NoEval
}
