//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryWorkStore**: テスト・単発実行用のストア
//! - **SqliteWorkStore**: 複数 orchestrator プロセスで共有できるストア
//! - **TemplatePrompt**: `{id}` / `{name}` / `{payload.<field>}` テンプレート
//! - **AcceptAll / FileExistsVerifier / CommandVerifier**: 副作用の検証

pub mod inmem_store;
pub mod prompt;
pub mod sqlite_store;
pub mod verifiers;

// 主要な型を再エクスポート
pub use self::inmem_store::InMemoryWorkStore;
pub use self::prompt::TemplatePrompt;
pub use self::sqlite_store::SqliteWorkStore;
pub use self::verifiers::{AcceptAll, CommandVerifier, FileExistsVerifier};
