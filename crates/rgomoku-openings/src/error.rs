//! Error types for the opening pipeline.
//!
//! 評価の失敗（タイムアウト・クラッシュ・詰み表示）はエラーではなく
//! [`crate::evaluator::EvalOutcome`] で表現するため、ここには含めない。

use std::path::PathBuf;

use crate::opening::Move;

/// 開局が有効な形をしていない
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OpeningError {
    #[error("opening has no moves")]
    Empty,

    #[error("move {mv} is outside the {board_size}x{board_size} board")]
    OutOfBoard { mv: Move, board_size: u32 },
}

/// 起動前提の不成立（外部バイナリが無い / 実行できない）。致命的。
#[derive(thiserror::Error, Debug)]
pub enum PreconditionError {
    #[error("{role} binary not found: {}", path.display())]
    Missing { role: &'static str, path: PathBuf },

    #[error("{role} binary is not executable: {}", path.display())]
    NotExecutable { role: &'static str, path: PathBuf },
}

#[derive(thiserror::Error, Debug)]
pub enum CheckpointError {
    #[error("failed to read checkpoint {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write checkpoint {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
