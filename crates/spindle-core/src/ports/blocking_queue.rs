//! BlockingQueue port - ブロッキング FIFO キュー
//!
//! AsyncQueueWorker が消費するキューの抽象化です。
//!
//! # 設計原則
//! - blocking take / put は `Interrupt` で中断できる
//! - `offer` は容量を見て即座に返る（満杯なら item を返却）
//! - `wake_all` は割り込み時に待機中のスレッドを起こすために使う

use crate::domain::errors::QueueError;

use super::interrupt::Interrupt;

pub trait BlockingQueue<T>: Send + Sync {
    /// 投入（満杯の間はブロック）
    fn put(&self, item: T, interrupt: &Interrupt) -> Result<(), QueueError>;

    /// ブロックせずに投入（空きが無ければ item を返却）
    fn offer(&self, item: T) -> Result<(), T>;

    /// 取り出し（空の間はブロック）
    ///
    /// `interrupt` が立ったら `QueueError::Interrupted`
    fn take(&self, interrupt: &Interrupt) -> Result<T, QueueError>;

    /// ブロックせずに取り出し
    fn poll(&self) -> Option<T>;

    /// 最初の 1 件までブロックし、合計 `max` 件まで取り出す
    /// `max` が 0 なら 1 として扱う
    fn take_batch(&self, max: usize, interrupt: &Interrupt) -> Result<Vec<T>, QueueError> {
        let first = self.take(interrupt)?;
        let mut batch = Vec::with_capacity(max.clamp(1, 64));
        batch.push(first);
        while batch.len() < max {
            match self.poll() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        Ok(batch)
    }

    fn len(&self) -> usize;

    /// unbounded なら `None`
    fn capacity(&self) -> Option<usize> {
        None
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 全 item を破棄し、破棄した件数を返す
    fn clear(&self) -> usize;

    /// `put` / `take` で待機中のスレッドを全て起こし、割り込みを再確認させる
    fn wake_all(&self);
}
