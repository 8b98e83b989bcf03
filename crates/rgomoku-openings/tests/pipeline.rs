//! パイプライン全体の結合テスト。
//!
//! 大半は外部プロセスを使わず、行ストリームと採点器を差し替えて `Supervisor::run_with` を回す。

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as chan;
use rgomoku_openings::opening::Symmetry;
use rgomoku_openings::{
    decode, encode, AcceptedSet, EvalOutcome, Opening, OpeningScorer, RunConfig, RunOutcome,
    RunSummary, StopReason, StopSignal, Supervisor,
};

const BOARD: u32 = 15;

fn config(dir: &Path, count: usize, threads: usize) -> RunConfig {
    RunConfig {
        count,
        threads,
        board_size: BOARD,
        output: dir.join("openings.txt"),
        save_interval: 3600,
        ..RunConfig::default()
    }
}

/// 全ての開局に同じ結果を返す。
struct ConstScorer(EvalOutcome);

impl OpeningScorer for ConstScorer {
    fn score(&self, _: &Opening) -> EvalOutcome {
        self.0.clone()
    }
}

/// 開局文字列ごとに結果を決める。表に無いものは未採点。
struct TableScorer(HashMap<String, EvalOutcome>);

impl OpeningScorer for TableScorer {
    fn score(&self, opening: &Opening) -> EvalOutcome {
        encode(opening.moves())
            .and_then(|text| self.0.get(&text).cloned())
            .unwrap_or(EvalOutcome::NoEval)
    }
}

/// 閉じた行ストリーム
fn lines<I, S>(items: I) -> chan::Receiver<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let (tx, rx) = chan::unbounded();
    for item in items {
        tx.send(item.into()).unwrap();
    }
    rx
}

fn completed(outcome: RunOutcome) -> RunSummary {
    match outcome {
        RunOutcome::Completed(summary) => summary,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

fn saved_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
}

#[test]
fn symmetric_variants_are_accepted_once_under_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let base = decode("h8i9k9");
    let variants: Vec<String> = Symmetry::ALL
        .iter()
        .map(|sym| encode(&sym.apply_all(base.moves(), BOARD)).unwrap())
        .collect();
    // 同じ形を 8 通りの向きで 5 周流す
    let stream: Vec<String> = (0..5).flat_map(|_| variants.clone()).collect();

    let sup = Supervisor::new(config(dir.path(), 10, 4), StopSignal::new());
    let summary = completed(
        sup.run_with(lines(stream), Arc::new(ConstScorer(EvalOutcome::Scored(0))))
            .unwrap(),
    );

    assert_eq!(summary.report.stop_reason, StopReason::PoolDrained);
    assert_eq!(summary.total, 1);
    assert_eq!(summary.report.accepted, 1);
    assert_eq!(summary.report.duplicates, 39);
    assert_eq!(saved_lines(&sup.config().output).len(), 1);
}

#[test]
fn run_stops_at_target() {
    let dir = tempfile::tempdir().unwrap();
    // 全マスの 1 手開局。対称形を除いても 5 種類より多い
    let stream: Vec<String> = ('a'..='o')
        .flat_map(|c| (1..=15).map(move |r| format!("{c}{r}")))
        .collect();

    let sup = Supervisor::new(config(dir.path(), 5, 3), StopSignal::new());
    let summary = completed(
        sup.run_with(lines(stream), Arc::new(ConstScorer(EvalOutcome::Scored(1))))
            .unwrap(),
    );

    assert_eq!(summary.report.stop_reason, StopReason::TargetReached);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.added, 5);
    assert_eq!(saved_lines(&sup.config().output).len(), 5);
}

#[test]
fn balance_filter_boundary_through_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let table: HashMap<String, EvalOutcome> = [
        ("a1", EvalOutcome::Scored(25)),
        ("a2", EvalOutcome::Scored(24)),
        ("a3", EvalOutcome::Scored(-24)),
        ("a4", EvalOutcome::TimedOut),
        ("a5", EvalOutcome::Scored(-25)),
        ("a6", EvalOutcome::Mate("+M9".to_string())),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let sup = Supervisor::new(config(dir.path(), 10, 2), StopSignal::new());
    let summary = completed(
        sup.run_with(lines(["a1", "a2", "a3", "a4", "a5", "a6"]), Arc::new(TableScorer(table)))
            .unwrap(),
    );

    let mut accepted = saved_lines(&sup.config().output);
    accepted.sort();
    assert_eq!(accepted, ["a2", "a3"]);
    assert_eq!(summary.report.rejected_unbalanced, 2);
    assert_eq!(summary.report.rejected_unscored, 2);
}

#[test]
fn diagnostics_blanks_and_invalid_openings_never_reach_the_aggregator() {
    let dir = tempfile::tempdir().unwrap();
    let stream = ["MESSAGE start", "", "ERROR hiccup", "z99", "x", "h8", "DEBUG d"];

    let sup = Supervisor::new(config(dir.path(), 10, 2), StopSignal::new());
    let summary = completed(
        sup.run_with(lines(stream), Arc::new(ConstScorer(EvalOutcome::Scored(0))))
            .unwrap(),
    );

    assert_eq!(summary.report.processed, 1);
    assert_eq!(summary.workers.skipped, 2);
    let reader = summary.reader.unwrap();
    assert_eq!(reader.candidates, 3);
    assert_eq!(reader.diagnostics, 3);
    assert_eq!(saved_lines(&sup.config().output), ["h8"]);
}

#[test]
fn resume_appends_to_existing_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 3, 1);
    fs::write(&cfg.output, "h8\n\n i9 \n").unwrap();

    let sup = Supervisor::new(cfg, StopSignal::new());
    // 1 ワーカーなので先頭の o15 が採用された時点で目標に達する
    let summary = completed(
        sup.run_with(
            lines(["o15", "a1", "g7", "b2"]),
            Arc::new(ConstScorer(EvalOutcome::Scored(0))),
        )
        .unwrap(),
    );

    assert_eq!(summary.initial, 2);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.report.stop_reason, StopReason::TargetReached);
    assert_eq!(saved_lines(&sup.config().output), ["h8", "i9", "o15"]);
}

#[test]
fn checkpoint_load_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("openings.txt");
    fs::write(&path, "h8i9\ni9h8\nh8g9\n\nj10k11\nh8i9\n").unwrap();

    let first = AcceptedSet::load(&path, BOARD).unwrap();
    assert_eq!(first.openings(), ["h8i9", "j10k11"]);
    first.save(&path).unwrap();
    let second = AcceptedSet::load(&path, BOARD).unwrap();
    assert_eq!(second.openings(), first.openings());
}

#[test]
fn interrupt_stops_run_and_persists_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = chan::unbounded();
    for opening in ["a1", "a2", "a3"] {
        tx.send(opening.to_string()).unwrap();
    }

    let stop = StopSignal::new();
    let sup = Supervisor::new(config(dir.path(), 100, 2), stop.clone());
    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        stop.trigger();
    });
    let start = Instant::now();
    let summary =
        completed(sup.run_with(rx, Arc::new(ConstScorer(EvalOutcome::Scored(0)))).unwrap());
    trigger.join().unwrap();
    drop(tx);

    assert_eq!(summary.report.stop_reason, StopReason::Interrupted);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(summary.reader.unwrap().stopped);
    assert_eq!(saved_lines(&sup.config().output).len(), summary.total);
}

/// kill switch を無視して居座る採点器
struct StuckScorer;

impl OpeningScorer for StuckScorer {
    fn score(&self, _: &Opening) -> EvalOutcome {
        thread::sleep(Duration::from_secs(10));
        EvalOutcome::Scored(0)
    }
}

#[test]
fn straggling_worker_is_detached_after_bounded_wait() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = chan::unbounded();
    tx.send("h8".to_string()).unwrap();

    let stop = StopSignal::new();
    let sup = Supervisor::new(config(dir.path(), 10, 1), stop.clone());
    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        stop.trigger();
    });
    let start = Instant::now();
    let summary = completed(sup.run_with(rx, Arc::new(StuckScorer)).unwrap());
    trigger.join().unwrap();

    assert_eq!(summary.detached_workers, 1);
    assert_eq!(summary.total, 0);
    // 2 秒 + 1 秒の待ちで打ち切る
    assert!(start.elapsed() < Duration::from_secs(6));
    assert_eq!(fs::read_to_string(&sup.config().output).unwrap(), "");
    drop(tx);
}

#[cfg(unix)]
mod external {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn satisfied_checkpoint_launches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("launched");
        let rapfi = script(dir.path(), "pbrain-rapfi", &format!("touch {}", marker.display()));
        let cfg = RunConfig {
            rapfi,
            ..config(dir.path(), 2, 2)
        };
        fs::write(&cfg.output, "h8\ni9\nj10\n").unwrap();

        let outcome = Supervisor::new(cfg, StopSignal::new()).run().unwrap();
        assert!(matches!(outcome, RunOutcome::AlreadySatisfied { have: 3, target: 2 }));
        assert!(!marker.exists());
    }

    #[test]
    fn end_to_end_with_shell_generator_and_evaluator() {
        let dir = tempfile::tempdir().unwrap();
        let sh = |body: &str| vec!["-c".to_string(), body.to_string()];
        let cfg = RunConfig {
            rapfi: "/bin/sh".into(),
            // 受け取った手数を評価値として返す
            evaluator_args: sh("n=$(grep -c ','); echo \"MESSAGE depth 4 Eval $n\"; echo 7,7"),
            generator_args: sh(
                "printf 'MESSAGE warming up\\nh8i9\\n\\ni9h8\\nj10k11\\nh8i9j10k11l12\\n'",
            ),
            eval_time: 1000,
            max_eval: 3,
            ..config(dir.path(), 10, 2)
        };

        let sup = Supervisor::new(cfg, StopSignal::new());
        let summary = completed(sup.run().unwrap());

        // 2 手の開局は評価値 2 で採用、5 手は 5 で不採用。h8i9 と i9h8 は同形なので先着の一方だけ残る
        let saved = saved_lines(&sup.config().output);
        assert_eq!(saved.len(), 2);
        assert!(saved.contains(&"j10k11".to_string()));
        assert!(saved.iter().any(|s| s == "h8i9" || s == "i9h8"));
        assert_eq!(summary.report.stop_reason, StopReason::PoolDrained);
        assert_eq!(summary.report.duplicates, 1);
        assert_eq!(summary.report.rejected_unbalanced, 1);
    }
}
