//! Balanced Gomoku opening generator.
//!
//! 外部ジェネレータ（`pbrain-rapfi opengen`）が出す開局候補を評価エンジンで採点し、
//! 評価値が 0 付近のものだけを盤面対称性で重複を除きながら目標数まで集める。
//!
//! ```text
//! generator ─▶ CandidateReader ─▶ work queue ─▶ workers ─▶ result queue ─▶ Aggregator
//!                                                  │
//!                                             evaluator
//! ```

pub mod aggregator;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod generator;
pub mod opening;
pub mod pool;
pub mod process;
pub mod reader;
pub mod signal;
pub mod supervisor;

pub use aggregator::{AggregateReport, BalanceFilter, StopReason};
pub use checkpoint::AcceptedSet;
pub use config::RunConfig;
pub use error::{CheckpointError, ConfigError, OpeningError, PreconditionError};
pub use evaluator::{EvalOutcome, EvaluatorClient, OpeningScorer};
pub use opening::{canonicalize, decode, encode, CanonicalKey, Move, Opening};
pub use signal::StopSignal;
pub use supervisor::{RunOutcome, RunSummary, Supervisor};
