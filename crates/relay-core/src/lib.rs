//! relay-core
//!
//! Core building blocks of the relay batch-task orchestrator.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, item, lease, outcome, errors）
//! - **ports**: 抽象化レイヤー（WorkStore, Verifier, PromptBuilder, Clock, IdGenerator）
//! - **process**: 外部プロセスの実行（timeout, 2段階終了, stdout/stderr の同時読み取り）
//! - **parser**: NDJSON イベントストリーム → transcript + verdict
//! - **log**: 追記専用の outcome log と transcript ファイル
//! - **app**: Scheduler / WorkerLoop / 設定 / shutdown
//! - **impls**: ports の実装（InMemory / SQLite ストア, verifier, prompt テンプレート）

pub mod app;
pub mod domain;
pub mod impls;
pub mod log;
pub mod parser;
pub mod ports;
pub mod process;

pub use app::{OrchestratorConfig, RunReport, Scheduler, Shutdown};
pub use domain::{ItemId, OrchestratorError, Outcome, OutcomeStatus, RunId, WorkItem};
