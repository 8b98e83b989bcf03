//! ジェネレータ出力を作業キューへ流し込む。

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{self as chan, Receiver, SendTimeoutError, Sender};

use crate::generator::GeneratorProcess;
use crate::signal::StopSignal;

/// 終了センチネル送信の再試行間隔。
pub const SENTINEL_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// ログ専用行の接頭辞。
pub const DIAGNOSTIC_PREFIXES: [&str; 3] = ["MESSAGE", "ERROR", "DEBUG"];

/// 作業キューの要素。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkItem {
    Opening(String),
    /// これ以上仕事は無い。ワーカー1つにつき1個送られる。
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind<'a> {
    Blank,
    Diagnostic(&'a str),
    Candidate(&'a str),
}

pub fn classify_line(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        LineKind::Blank
    } else if DIAGNOSTIC_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        LineKind::Diagnostic(trimmed)
    } else {
        LineKind::Candidate(trimmed)
    }
}

/// 診断行の受け取り先。
pub type DiagnosticSink = Box<dyn FnMut(&str) + Send>;

/// 既定の診断行出力。`ERROR` は warn、それ以外は info で `generator` ターゲットに流す。
pub fn log_diagnostic(line: &str) {
    if line.starts_with("ERROR") {
        log::warn!(target: "generator", "{line}");
    } else {
        log::info!(target: "generator", "{line}");
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaderReport {
    pub candidates: u64,
    pub diagnostics: u64,
    /// 停止時に未着手のまま捨てた候補
    pub discarded: u64,
    pub stopped: bool,
}

pub struct CandidateReader {
    lines: Receiver<String>,
    generator: Option<GeneratorProcess>,
    work_tx: Sender<WorkItem>,
    /// 停止時に未着手の仕事を捨てるための受信側
    work_rx: Receiver<WorkItem>,
    workers: usize,
    stop: StopSignal,
    sink: DiagnosticSink,
}

impl CandidateReader {
    pub fn new(
        lines: Receiver<String>,
        work_tx: Sender<WorkItem>,
        work_rx: Receiver<WorkItem>,
        workers: usize,
        stop: StopSignal,
    ) -> Self {
        Self {
            lines,
            generator: None,
            work_tx,
            work_rx,
            workers,
            stop,
            sink: Box::new(log_diagnostic),
        }
    }

    /// ジェネレータの stdout を入力にし、終了時にプロセスを止める。
    pub fn from_generator(
        generator: GeneratorProcess,
        work_tx: Sender<WorkItem>,
        work_rx: Receiver<WorkItem>,
        workers: usize,
        stop: StopSignal,
    ) -> Self {
        let lines = generator.lines.clone();
        let mut reader = Self::new(lines, work_tx, work_rx, workers, stop);
        reader.generator = Some(generator);
        reader
    }

    pub fn with_sink(mut self, sink: DiagnosticSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<ReaderReport>> {
        thread::Builder::new().name("candidate-reader".to_string()).spawn(move || self.run())
    }

    pub fn run(mut self) -> ReaderReport {
        let mut report = ReaderReport::default();
        loop {
            if self.stop.is_set() {
                report.stopped = true;
                break;
            }
            chan::select! {
                recv(self.lines) -> line => {
                    let Ok(line) = line else {
                        log::info!("generator stream ended");
                        break;
                    };
                    match classify_line(&line) {
                        LineKind::Blank => {}
                        LineKind::Diagnostic(text) => {
                            report.diagnostics += 1;
                            (self.sink)(text);
                        }
                        LineKind::Candidate(opening) => {
                            if !self.enqueue(opening.to_string()) {
                                report.stopped = true;
                                break;
                            }
                            report.candidates += 1;
                        }
                    }
                }
                recv(self.stop.receiver()) -> _ => {
                    report.stopped = true;
                    break;
                }
            }
        }

        self.send_sentinels(&mut report);

        if let Some(mut generator) = self.generator.take() {
            generator.shutdown();
        }
        log::debug!(
            "reader finished: candidates={} diagnostics={} discarded={} stopped={}",
            report.candidates,
            report.diagnostics,
            report.discarded,
            report.stopped
        );
        report
    }

    /// 作業キューに積む。満杯の間に停止された場合は `false`。
    fn enqueue(&self, opening: String) -> bool {
        chan::select! {
            send(self.work_tx, WorkItem::Opening(opening)) -> res => res.is_ok(),
            recv(self.stop.receiver()) -> _ => false,
        }
    }

    /// ワーカー数ぶんの `Shutdown` を送る。停止中は未着手の仕事を先に捨てる。
    fn send_sentinels(&self, report: &mut ReaderReport) {
        let mut sent = 0usize;
        let mut drained = false;
        while sent < self.workers {
            if !drained && self.stop.is_set() {
                drained = true;
                let (discarded, sentinels) = self.drain();
                report.stopped = true;
                report.discarded += discarded;
                sent -= sentinels;
            }
            match self.work_tx.send_timeout(WorkItem::Shutdown, SENTINEL_RETRY_INTERVAL) {
                Ok(()) => sent += 1,
                Err(SendTimeoutError::Timeout(_)) => {}
                Err(SendTimeoutError::Disconnected(_)) => {
                    log::warn!("work queue disconnected before all shutdown sentinels were sent");
                    break;
                }
            }
        }
    }

    /// キューに残った要素を全て取り出す。戻り値は (捨てた候補数, 取り出したセンチネル数)。
    fn drain(&self) -> (u64, usize) {
        let mut discarded = 0;
        let mut sentinels = 0;
        while let Ok(item) = self.work_rx.try_recv() {
            match item {
                WorkItem::Opening(_) => discarded += 1,
                WorkItem::Shutdown => sentinels += 1,
            }
        }
        (discarded, sentinels)
    }
}
