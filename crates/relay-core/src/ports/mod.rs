//! Ports - 抽象化レイヤー
//!
//! Each trait here is a seam to an external collaborator (work store,
//! verifier, clock, ID source, prompt source). The scheduler depends only on
//! these traits; concrete implementations live in `impls`.

pub mod clock;
pub mod id_generator;
pub mod prompt;
pub mod verifier;
pub mod work_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::prompt::{PromptBuilder, PromptError};
pub use self::verifier::{Verification, Verifier};
pub use self::work_store::{StoreError, WorkStore};
