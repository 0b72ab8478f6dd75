//! App - アプリケーション層
//!
//! ports を組み合わせて orchestrator を組み立てます。
//!
//! # 主要コンポーネント
//! - **Scheduler**: N 個のワーカーループを起動し、RunReport を返す
//! - **WorkerLoop**: lease → prompt → run → parse → verify → log → release
//! - **OrchestratorConfig**: JSON 設定 + `RELAY_*` 環境変数
//! - **Shutdown**: graceful / force の2段階停止
//! - **StatusBoard**: ループごとの状態 (watch channel)

pub mod config;
pub mod heartbeat;
pub mod scheduler;
pub mod shutdown;
pub mod status;
mod worker_loop;

// 主要な型を再エクスポート
pub use self::config::{ConfigError, OrchestratorConfig, StoreConfig, VerifierConfig};
pub use self::heartbeat::Heartbeat;
pub use self::scheduler::{RunReport, Scheduler};
pub use self::shutdown::{Shutdown, spawn_ctrl_c_listener};
pub use self::status::{LoopState, StatusBoard, StatusReporter};
