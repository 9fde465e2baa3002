//! spindle-core - 制御可能なバックグラウンドループ
//!
//! ループごとにワーカースレッド 1 本、
//! どのスレッドからでも pause / wake / budget / close できる。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（state machine, errors, config, naming）
//! - **ports**: 抽象化レイヤー（BlockingQueue, Interrupt）
//! - **app**: アプリケーションロジック（ControlledLoop, AsyncQueueWorker, ControlHandle, status）
//! - **impls**: 実装（InMemoryBlockingQueue）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    AsyncQueueWorker, BatchQueueWorker, ControlHandle, ControlledLoop, LoopBuilder, LoopStatus,
    QueueWorkerStatus, log_and_continue,
};
pub use domain::{
    Lifecycle, LoopConfig, LoopExit, LoopState, QueueError, SpindleError, WorkError,
};
pub use impls::InMemoryBlockingQueue;
pub use ports::{BlockingQueue, Interrupt};
