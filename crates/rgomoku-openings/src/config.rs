//! 実行設定。
//!
//! 既定値 → TOML ファイル → コマンドライン引数の順に上書きされる。

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::aggregator::{AggregatorConfig, BalanceFilter};
use crate::error::ConfigError;
use crate::evaluator::EvaluatorConfig;
use crate::generator::GeneratorConfig;

pub const MIN_BOARD_SIZE: u32 = 5;
/// 列を 1 文字で表すため 26 路まで
pub const MAX_BOARD_SIZE: u32 = 26;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// 出力ファイルに揃える開局数
    pub count: usize,
    pub output: PathBuf,
    /// 評価エンジン（pbrain-rapfi）
    pub rapfi: PathBuf,
    /// 開局ジェネレータ。未指定なら `rapfi` を使う
    pub generator: Option<PathBuf>,
    /// 評価エンジンの起動引数
    pub evaluator_args: Vec<String>,
    /// ジェネレータの `opengen` より前に付ける引数
    pub generator_args: Vec<String>,
    pub board_size: u32,
    pub max_eval: i32,
    /// 1局面の評価時間 (ms)
    pub eval_time: u64,
    pub threads: usize,
    /// 途中保存の間隔 (秒)
    pub save_interval: u64,
    pub min_moves: u32,
    pub max_moves: u32,
    pub balance_nodes: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            count: 200,
            output: PathBuf::from("openings.txt"),
            rapfi: PathBuf::from("./pbrain-rapfi"),
            generator: None,
            evaluator_args: Vec::new(),
            generator_args: Vec::new(),
            board_size: 20,
            max_eval: 25,
            eval_time: 15_000,
            threads: default_threads(),
            save_interval: 60,
            min_moves: 7,
            max_moves: 11,
            balance_nodes: 100_000_000,
        }
    }
}

pub fn default_threads() -> usize {
    std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

impl RunConfig {
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { field, reason })
        };
        if self.count == 0 {
            return invalid("count", "must be at least 1".into());
        }
        if self.threads == 0 {
            return invalid("threads", "must be at least 1".into());
        }
        if !(MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&self.board_size) {
            return invalid(
                "board_size",
                format!(
                    "{} is outside {MIN_BOARD_SIZE}..={MAX_BOARD_SIZE}",
                    self.board_size
                ),
            );
        }
        if self.min_moves > self.max_moves {
            return invalid(
                "min_moves",
                format!("{} exceeds max_moves {}", self.min_moves, self.max_moves),
            );
        }
        if self.max_eval <= 0 {
            return invalid("max_eval", format!("{} must be positive", self.max_eval));
        }
        Ok(())
    }

    pub fn generator_path(&self) -> &Path {
        self.generator.as_deref().unwrap_or(&self.rapfi)
    }

    /// 作業キューの容量
    pub fn queue_capacity(&self) -> usize {
        self.threads.saturating_mul(2)
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            path: self.rapfi.clone(),
            args: self.evaluator_args.clone(),
            board_size: self.board_size,
            eval_time_ms: self.eval_time,
        }
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            path: self.generator_path().to_path_buf(),
            board_size: self.board_size,
            min_moves: self.min_moves,
            max_moves: self.max_moves,
            balance_nodes: self.balance_nodes,
            threads: self.threads,
            extra_args: self.generator_args.clone(),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            target: self.count,
            workers: self.threads,
            filter: BalanceFilter::new(self.max_eval),
            checkpoint_path: self.output.clone(),
            save_interval: Duration::from_secs(self.save_interval),
        }
    }
}
