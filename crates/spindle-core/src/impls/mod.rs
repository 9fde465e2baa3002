//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBlockingQueue**: bounded / unbounded のメモリ上キュー

pub mod inmem_queue;

pub use self::inmem_queue::InMemoryBlockingQueue;
