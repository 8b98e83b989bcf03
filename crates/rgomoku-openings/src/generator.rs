//! 開局候補ジェネレータ（`pbrain-rapfi opengen`）の起動と stdout の中継。

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel as chan;

use crate::process::{ManagedProcess, PipeSpec};

/// ジェネレータ終了要求後の猶予。
pub const GENERATOR_TERM_GRACE: Duration = Duration::from_secs(5);

/// opengen に渡す探索設定。
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub path: PathBuf,
    pub board_size: u32,
    pub min_moves: u32,
    pub max_moves: u32,
    pub balance_nodes: u64,
    pub threads: usize,
    /// 実行ファイルの直後に付けるサブコマンド等
    pub extra_args: Vec<String>,
}

impl GeneratorConfig {
    pub fn command_args(&self) -> Vec<String> {
        let size = self.board_size.to_string();
        let min_moves = self.min_moves.to_string();
        let max_moves = self.max_moves.to_string();
        let nodes = self.balance_nodes.to_string();
        let threads = self.threads.to_string();
        let mut args = self.extra_args.clone();
        args.extend(
            [
                "opengen",
                "-n",
                "999999999",
                "--boardsize",
                size.as_str(),
                "--rule",
                "freestyle",
                "--min-move",
                min_moves.as_str(),
                "--max-move",
                max_moves.as_str(),
                "--balance1-node",
                nodes.as_str(),
                "--balance2-node",
                nodes.as_str(),
                "--balance-window",
                "15",
                "--balance1-fast-check-window",
                "40",
                "--thread",
                threads.as_str(),
                "--hashsize",
                "8192",
                "-q",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args
    }
}

/// 起動済みジェネレータ。`lines` はプロセスの stdout が閉じると切断される。
///
/// stdout 中継スレッドは join しない。パイプが閉じるか受信側が drop されると終わる。
pub struct GeneratorProcess {
    pub process: ManagedProcess,
    pub lines: chan::Receiver<String>,
}

impl GeneratorProcess {
    pub fn spawn(cfg: &GeneratorConfig) -> Result<Self> {
        let pipes = PipeSpec {
            stdin: false,
            stdout: true,
            stderr_inherit: true,
        };
        let mut process = ManagedProcess::spawn(
            &cfg.path,
            &cfg.command_args(),
            pipes,
            GENERATOR_TERM_GRACE,
            "generator",
        )?;
        let stdout = process.take_stdout()?;
        let (tx, rx) = chan::unbounded::<String>();
        thread::Builder::new()
            .name("generator-stdout".to_string())
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    match line {
                        Ok(l) => {
                            if tx.send(l).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            log::debug!(target: "generator", "stdout read error: {e}");
                            break;
                        }
                    }
                }
            })
            .context("failed to spawn generator stdout reader")?;
        process.mark_running();
        log::info!("generator started (pid {})", process.id());
        Ok(Self { process, lines: rx })
    }

    /// 終了要求 → 猶予 → kill。drop 時にも同じ処理が走る。
    pub fn shutdown(&mut self) {
        self.process.terminate();
    }
}
