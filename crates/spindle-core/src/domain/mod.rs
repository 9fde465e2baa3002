//! Domain - ドメインモデル（状態機械・エラー・設定・命名）

pub mod config;
pub mod errors;
pub mod naming;
pub mod state;

pub use self::config::LoopConfig;
pub use self::errors::{QueueError, SpindleError, WorkError, WorkPanic};
pub use self::naming::{DEFAULT_NAME_PREFIX, next_loop_name};
pub use self::state::{CodeLocation, Lifecycle, LoopExit, LoopState};
