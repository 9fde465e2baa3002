//! App - アプリケーション層
//!
//! domain の状態機械と ports を組み合わせて、ワーカースレッドを持つループを実装します。
//!
//! # 主要コンポーネント
//! - **ControlledLoop**: 1 本のワーカースレッドで work を繰り返し実行
//! - **LoopBuilder**: ControlledLoop の構築（callback、interval、名前）
//! - **ControlHandle**: callback からの pause / terminate
//! - **AsyncQueueWorker**: BlockingQueue を消費するループ
//! - **BatchQueueWorker**: まとめて取り出して処理するループ
//! - **LoopStatus**: 状態のスナップショット

pub mod batch_worker;
pub mod builder;
pub mod control;
pub mod controlled_loop;
pub mod queue_worker;
pub mod status;

mod runner;

// 主要な型を再エクスポート
pub use self::batch_worker::{BatchQueueWorker, BatchWorkerBuilder};
pub use self::builder::LoopBuilder;
pub use self::control::{ControlHandle, log_and_continue};
pub use self::controlled_loop::ControlledLoop;
pub use self::queue_worker::{AsyncQueueWorker, QueueWorkerBuilder};
pub use self::status::{LoopStatus, QueueWorkerStatus};
