//! 評価値が均衡した五目並べの開局集を作る。
//!
//! # 使用例
//!
//! ```shell
//! cargo run -p rgomoku-openings --release --bin balanced_openings -- \
//!   --rapfi ./pbrain-rapfi --board-size 15 --count 500 --threads 8 \
//!   --output runs/openings/15x15.txt
//! ```
//!
//! 出力ファイルが既にあれば続きから集める。Ctrl-C で止めても採用済みの分は保存される。

use std::backtrace::Backtrace;
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;

use rgomoku_openings::{PreconditionError, RunConfig, RunOutcome, StopSignal, Supervisor};

#[derive(clap::Parser, Debug)]
#[command(about = "generate balanced Gomoku openings with pbrain-rapfi")]
struct Cli {
    /// TOML file with base settings (command-line flags take precedence)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target number of openings in the output file [default: 200]
    #[arg(long, short = 'n')]
    count: Option<usize>,

    /// Output file path [default: openings.txt]
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Path to pbrain-rapfi (evaluator) [default: ./pbrain-rapfi]
    #[arg(long)]
    rapfi: Option<PathBuf>,

    /// Opening generator binary (defaults to --rapfi)
    #[arg(long)]
    generator: Option<PathBuf>,

    /// Board size [default: 20]
    #[arg(long)]
    board_size: Option<u32>,

    /// Maximum absolute evaluation for balanced openings [default: 25]
    #[arg(long)]
    max_eval: Option<i32>,

    /// Evaluation time per opening in milliseconds [default: 15000]
    #[arg(long)]
    eval_time: Option<u64>,

    /// Number of worker threads [default: available parallelism]
    #[arg(long)]
    threads: Option<usize>,

    /// Checkpoint interval in seconds [default: 60]
    #[arg(long)]
    save_interval: Option<u64>,

    /// Minimum moves in an opening [default: 7]
    #[arg(long)]
    min_moves: Option<u32>,

    /// Maximum moves in an opening [default: 11]
    #[arg(long)]
    max_moves: Option<u32>,

    /// Nodes used by the generator for balancing [default: 100000000]
    #[arg(long)]
    balance_nodes: Option<u64>,

    /// Log filter (env_logger syntax, RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    /// 設定ファイル（あれば）を土台に、明示された引数で上書きする。
    fn resolve(&self) -> Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::from_toml_file(path)?,
            None => RunConfig::default(),
        };
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = &self.$field {
                    cfg.$field = v.clone();
                })*
            };
        }
        overlay!(
            count,
            output,
            rapfi,
            board_size,
            max_eval,
            eval_time,
            threads,
            save_interval,
            min_moves,
            max_moves,
            balance_nodes,
        );
        if self.generator.is_some() {
            cfg.generator = self.generator.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn install_panic_hook() {
    panic::set_hook(Box::new(|info: &PanicHookInfo<'_>| {
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "<unknown>".to_string());
        let thread = std::thread::current().name().unwrap_or("<unnamed>").to_string();
        let backtrace = Backtrace::capture().to_string();
        let summary: Vec<&str> =
            backtrace.lines().map(str::trim).filter(|l| !l.is_empty()).take(8).collect();
        log::error!(
            target: "panic",
            "panic in {thread}: payload='{payload}' location={location} backtrace={}",
            if summary.is_empty() { "<no backtrace>".to_string() } else { summary.join(" | ") }
        );
    }));
}

fn run(cli: &Cli) -> Result<()> {
    let cfg = cli.resolve().context("invalid configuration")?;
    let output = cfg.output.clone();

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            if stop.trigger() {
                eprintln!("\n[INT] Interrupted, shutting down...");
            }
        })
        .context("failed to install Ctrl-C handler")?;
    }

    match Supervisor::new(cfg, stop).run()? {
        RunOutcome::AlreadySatisfied { have, target } => {
            println!("[DONE] Already have {have} openings, target is {target}");
        }
        RunOutcome::Completed(summary) => {
            let r = &summary.report;
            log::info!(
                "processed={} accepted={} unscored={} unbalanced={} duplicates={} stop={:?}",
                r.processed,
                r.accepted,
                r.rejected_unscored,
                r.rejected_unbalanced,
                r.duplicates,
                r.stop_reason
            );
            if summary.workers.faults > 0 {
                log::warn!("{} openings were dropped by worker faults", summary.workers.faults);
            }
            println!(
                "[DONE] +{} openings, {} total in {}",
                summary.added,
                summary.total,
                output.display()
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level.as_str()))
        .target(env_logger::Target::Stderr)
        .init();
    install_panic_hook();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(pre) = e.downcast_ref::<PreconditionError>() {
                eprintln!("[ERROR] {pre}");
            } else {
                eprintln!("[ERROR] {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
