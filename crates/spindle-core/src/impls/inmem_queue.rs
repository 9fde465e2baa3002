//! InMemoryBlockingQueue - メモリ上のブロッキングキュー
//!
//! # 学習ポイント
//! - Mutex + Condvar による blocking take / put
//! - not_empty / not_full の 2 本の Condvar で待ち手を分ける
//! - Interrupt はロック内で確認してから wait する（取りこぼし防止）

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::domain::errors::QueueError;
use crate::ports::{BlockingQueue, Interrupt};

/// InMemoryBlockingQueue は bounded / unbounded の FIFO
///
/// # 実装詳細
/// - VecDeque<T> を Mutex で排他制御
/// - take 待ちは `not_empty`、put 待ちは `not_full` で通知
/// - capacity が None なら unbounded
///
/// # 使用例
/// ```ignore
/// let queue = InMemoryBlockingQueue::bounded(128)?;
/// queue.put("job".to_string(), &interrupt)?;
/// let job = queue.take(&interrupt)?;
/// ```
pub struct InMemoryBlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<T> InMemoryBlockingQueue<T> {
    pub fn unbounded() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: None,
        }
    }

    pub fn bounded(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::InvalidCapacity(capacity));
        }
        Ok(Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: Some(capacity),
        })
    }

    fn is_full(&self, items: &VecDeque<T>) -> bool {
        self.capacity.is_some_and(|cap| items.len() >= cap)
    }
}

impl<T> Default for InMemoryBlockingQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T: Send> BlockingQueue<T> for InMemoryBlockingQueue<T> {
    fn put(&self, item: T, interrupt: &Interrupt) -> Result<(), QueueError> {
        let mut items = self.items.lock();
        loop {
            if interrupt.is_interrupted() {
                return Err(QueueError::Interrupted);
            }
            if !self.is_full(&items) {
                items.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut items);
        }
    }

    fn offer(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if self.is_full(&items) {
            return Err(item);
        }
        items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    fn take(&self, interrupt: &Interrupt) -> Result<T, QueueError> {
        let mut items = self.items.lock();
        loop {
            if interrupt.is_interrupted() {
                return Err(QueueError::Interrupted);
            }
            if let Some(item) = items.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            self.not_empty.wait(&mut items);
        }
    }

    fn poll(&self) -> Option<T> {
        let mut items = self.items.lock();
        let item = items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    fn take_batch(&self, max: usize, interrupt: &Interrupt) -> Result<Vec<T>, QueueError> {
        let mut items = self.items.lock();
        loop {
            if interrupt.is_interrupted() {
                return Err(QueueError::Interrupted);
            }
            if !items.is_empty() {
                let count = max.max(1).min(items.len());
                let batch: Vec<T> = items.drain(..count).collect();
                self.not_full.notify_all();
                return Ok(batch);
            }
            self.not_empty.wait(&mut items);
        }
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }

    fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        self.not_full.notify_all();
        dropped
    }

    fn wake_all(&self) {
        // ロックを取ってから通知する: フラグ確認と wait の間に割り込ませない
        let _items = self.items.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
