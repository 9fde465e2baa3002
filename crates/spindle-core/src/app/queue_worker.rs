//! AsyncQueueWorker - キューを消費する ControlledLoop
//!
//! 1 iteration = blocking take → handler → 結果の振り分け。
//! プロデューサは何スレッドからでも `add` / `offer` できます。
//!
//! # 学習ポイント
//! - ControlledLoop の公開 API だけで組み立てる（内部状態には触らない）
//! - ループの `Interrupt` にキューの `wake_all` を登録して、take 中の close を解く
//! - take 中の割り込みは終了の合図であってエラーではない

use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::domain::config::LoopConfig;
use crate::domain::errors::{QueueError, SpindleError, WorkError};
use crate::domain::state::{Lifecycle, LoopExit, LoopState};
use crate::impls::InMemoryBlockingQueue;
use crate::ports::{BlockingQueue, Interrupt};

use super::builder::LoopBuilder;
use super::control::{ControlHandle, log_and_continue};
use super::controlled_loop::ControlledLoop;
use super::status::QueueWorkerStatus;

type ItemHandler<T> = Box<dyn FnMut(&T) -> Result<bool, WorkError> + Send>;
type ItemErrorHandler<T> = Box<dyn FnMut(T) + Send>;
type LoopErrorHandler = Box<dyn FnMut(&ControlHandle, WorkError) + Send>;

/// QueueBinding はキューと、take 中の consumer を起こす Interrupt の組
pub(crate) struct QueueBinding<T> {
    pub(crate) queue: Arc<dyn BlockingQueue<T>>,
    pub(crate) interrupt: Interrupt,
}

impl<T: Send + 'static> QueueBinding<T> {
    pub(crate) fn new(queue: Arc<dyn BlockingQueue<T>>) -> Self {
        let interrupt = Interrupt::new();
        let weak = Arc::downgrade(&queue);
        interrupt.on_interrupt(move || {
            if let Some(queue) = weak.upgrade() {
                queue.wake_all();
            }
        });
        Self { queue, interrupt }
    }

    pub(crate) fn add(&self, item: T, loop_name: &str) -> Result<(), QueueError> {
        if self.interrupt.is_interrupted() {
            warn!(loop_name = %loop_name, "worker has been closed, add rejected");
            return Err(QueueError::Closed);
        }
        self.queue
            .put(item, &self.interrupt)
            .map_err(|err| match err {
                QueueError::Interrupted => QueueError::Closed,
                other => other,
            })
    }

    pub(crate) fn offer(&self, item: T, loop_name: &str) -> bool {
        if self.interrupt.is_interrupted() {
            warn!(loop_name = %loop_name, "worker has been closed, offer rejected");
            return false;
        }
        self.queue.offer(item).is_ok()
    }

    pub(crate) fn try_add(&self, item: T, loop_name: &str) -> Result<(), QueueError> {
        if self.interrupt.is_interrupted() {
            warn!(loop_name = %loop_name, "worker has been closed, add rejected");
            return Err(QueueError::Closed);
        }
        self.queue
            .offer(item)
            .map_err(|_| QueueError::Full(self.queue.capacity().unwrap_or(usize::MAX)))
    }
}

impl<T> Clone for QueueBinding<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            interrupt: self.interrupt.clone(),
        }
    }
}

/// QueueWorkerBuilder は AsyncQueueWorker を構築
pub struct QueueWorkerBuilder<T> {
    queue: Arc<dyn BlockingQueue<T>>,
    handler: ItemHandler<T>,
    on_item_error: Option<ItemErrorHandler<T>>,
    on_error: LoopErrorHandler,
    name: Option<String>,
    interval: Duration,
}

impl<T: Send + 'static> QueueWorkerBuilder<T> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// `config` の name と interval を適用
    pub fn config(mut self, config: &LoopConfig) -> Self {
        if let Some(name) = &config.name {
            self.name = Some(name.clone());
        }
        self.interval = config.interval();
        self
    }

    /// handler が `Ok(false)` を返した item を受け取る
    pub fn with_item_error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        self.on_item_error = Some(Box::new(handler));
        self
    }

    /// handler のエラーと panic を受け取る（既定は [`log_and_continue`]）
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&ControlHandle, WorkError) + Send + 'static,
    {
        self.on_error = Box::new(handler);
        self
    }

    pub fn build(self) -> Result<AsyncQueueWorker<T>, SpindleError> {
        let binding = QueueBinding::new(self.queue);
        let mut handler = self.handler;
        let mut on_item_error = self.on_item_error;

        let source = binding.clone();
        let work = move || -> Result<bool, WorkError> {
            let item = match source.queue.take(&source.interrupt) {
                Ok(item) => item,
                Err(QueueError::Interrupted) => {
                    trace!("queue take interrupted");
                    return Ok(true);
                }
                Err(err) => return Err(err.into()),
            };
            if !handler(&item)? {
                if let Some(on_item_error) = on_item_error.as_mut() {
                    on_item_error(item);
                }
            }
            Ok(true)
        };

        let mut builder = LoopBuilder::new(work)
            .interval(self.interval)
            .with_error_handler(self.on_error)
            .with_interrupt(binding.interrupt.clone());
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        Ok(AsyncQueueWorker {
            inner: builder.build()?,
            binding,
        })
    }
}

/// AsyncQueueWorker は BlockingQueue を消費するバックグラウンドワーカー
///
/// # 使用例
/// ```ignore
/// let worker = AsyncQueueWorker::of_consumer(|line: &String| println!("{line}"))
///     .name("printer")
///     .build()?;
/// worker.start()?;
/// worker.add("hello".to_string())?;
/// worker.close();
/// ```
pub struct AsyncQueueWorker<T> {
    inner: ControlledLoop,
    binding: QueueBinding<T>,
}

impl<T: Send + 'static> AsyncQueueWorker<T> {
    /// `Ok(true)` は処理済み、`Ok(false)` は item error handler へ、`Err` は error handler へ
    pub fn builder<Q, F>(queue: Arc<Q>, handler: F) -> QueueWorkerBuilder<T>
    where
        Q: BlockingQueue<T> + 'static,
        F: FnMut(&T) -> Result<bool, WorkError> + Send + 'static,
    {
        let queue: Arc<dyn BlockingQueue<T>> = queue;
        QueueWorkerBuilder {
            queue,
            handler: Box::new(handler),
            on_item_error: None,
            on_error: Box::new(log_and_continue),
            name: None,
            interval: Duration::ZERO,
        }
    }

    /// unbounded なメモリキューで構築（全 item を処理済み扱い）
    pub fn of_consumer<F>(mut consumer: F) -> QueueWorkerBuilder<T>
    where
        F: FnMut(&T) + Send + 'static,
    {
        Self::builder(Arc::new(InMemoryBlockingQueue::unbounded()), move |item: &T| {
            consumer(item);
            Ok(true)
        })
    }

    /// unbounded なメモリキューと成功判定 predicate で構築
    pub fn of_predicate<F>(mut predicate: F) -> QueueWorkerBuilder<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Self::builder(Arc::new(InMemoryBlockingQueue::unbounded()), move |item: &T| {
            Ok(predicate(item))
        })
    }

    /// 投入（bounded キューが満杯の間はブロック）
    ///
    /// ワーカー終了後は `QueueError::Closed`
    pub fn add(&self, item: T) -> Result<(), QueueError> {
        self.binding.add(item, &self.inner.name())
    }

    /// `add` と同じだが、満杯ならブロックせず `QueueError::Full`
    pub fn try_add(&self, item: T) -> Result<(), QueueError> {
        self.binding.try_add(item, &self.inner.name())
    }

    /// 満杯またはワーカー終了後は `false`
    pub fn offer(&self, item: T) -> bool {
        self.binding.offer(item, &self.inner.name())
    }

    /// 現在のキュー長（診断用）
    pub fn size(&self) -> usize {
        self.binding.queue.len()
    }

    /// 待機中の item を破棄（ワーカーが取り出し済みの item は対象外）
    pub fn clear(&self) -> usize {
        self.binding.queue.clear()
    }

    pub fn start(&self) -> Result<(), SpindleError> {
        self.inner.start()
    }

    pub fn start_if_not_started(&self) -> Result<(), SpindleError> {
        self.inner.start_if_not_started()
    }

    pub fn start_or_wake(&self) -> Result<(), SpindleError> {
        self.inner.start_or_wake()
    }

    pub fn pause(&self) {
        self.inner.pause();
    }

    pub fn pause_for(&self, wait: Duration) {
        self.inner.pause_for(wait);
    }

    pub fn pause_after_loops(&self, loops: u64) -> Result<(), SpindleError> {
        self.inner.pause_after_loops(loops)
    }

    pub fn wake(&self) {
        self.inner.wake();
    }

    pub fn close(&self) -> bool {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn name(&self) -> String {
        self.inner.name()
    }

    pub fn set_name(&self, name: impl Into<String>) -> &Self {
        self.inner.set_name(name);
        self
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }

    pub fn state(&self) -> LoopState {
        self.inner.state()
    }

    pub fn status(&self) -> QueueWorkerStatus {
        QueueWorkerStatus {
            worker: self.inner.status(),
            queued: self.size(),
        }
    }

    pub fn join(&self) -> Option<LoopExit> {
        self.inner.join()
    }

    pub fn wait_stopped(&self, timeout: Duration) -> Option<LoopExit> {
        self.inner.wait_stopped(timeout)
    }

    pub async fn stopped(&self) -> LoopExit {
        self.inner.stopped().await
    }

    /// 内部の ControlledLoop（ここに無い操作用）
    pub fn controlled_loop(&self) -> &ControlledLoop {
        &self.inner
    }
}

impl<T> std::fmt::Debug for AsyncQueueWorker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncQueueWorker")
            .field("inner", &self.inner)
            .field("queued", &self.binding.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_handles_items_in_order() {
        let (tx, rx) = mpsc::channel();
        let worker = AsyncQueueWorker::of_consumer(move |item: &u32| {
            tx.send(*item).unwrap();
        })
        .name("order-test")
        .build()
        .unwrap();
        worker.start().unwrap();

        for i in 0..5 {
            worker.add(i).unwrap();
        }
        let seen: Vec<u32> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        assert!(worker.close());
        assert!(matches!(worker.wait_stopped(WAIT), Some(LoopExit::Closed)));
    }

    #[test]
    fn test_rejected_items_reach_item_error_handler() {
        let rejected = Arc::new(Mutex::new(Vec::new()));
        let worker = AsyncQueueWorker::of_predicate(|item: &i32| item % 2 == 0)
            .with_item_error_handler({
                let rejected = Arc::clone(&rejected);
                move |item| rejected.lock().push(item)
            })
            .build()
            .unwrap();
        worker.start().unwrap();
        for i in 1..=4 {
            worker.add(i).unwrap();
        }

        let deadline = std::time::Instant::now() + WAIT;
        while rejected.lock().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*rejected.lock(), vec![1, 3]);
        worker.close();
    }

    #[test]
    fn test_handler_errors_do_not_stop_the_worker() {
        let (tx, rx) = mpsc::channel();
        let queue = Arc::new(InMemoryBlockingQueue::<&'static str>::unbounded());
        let worker = AsyncQueueWorker::builder(queue, move |item: &&'static str| {
            let n: i32 = item.parse()?;
            tx.send(n).unwrap();
            Ok(true)
        })
        .build()
        .unwrap();
        worker.start().unwrap();

        worker.add("oops").unwrap();
        worker.add("7").unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 7);
        assert!(!worker.is_closed());
        worker.close();
    }

    #[test]
    fn test_close_releases_blocked_take() {
        let worker = AsyncQueueWorker::of_consumer(|_: &u8| {}).build().unwrap();
        worker.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert!(worker.close());
        assert!(matches!(worker.wait_stopped(WAIT), Some(LoopExit::Closed)));
        assert_eq!(worker.lifecycle(), Lifecycle::Terminated);
    }

    #[test]
    fn test_closed_worker_rejects_items() {
        let worker = AsyncQueueWorker::of_consumer(|_: &u8| {}).build().unwrap();
        worker.close();
        assert_eq!(worker.add(1), Err(QueueError::Closed));
        assert!(!worker.offer(2));
        assert_eq!(worker.size(), 0);
    }

    #[test]
    fn test_dead_worker_rejects_items() {
        let queue = Arc::new(InMemoryBlockingQueue::<u8>::unbounded());
        let worker = AsyncQueueWorker::builder(queue, |_: &u8| Err("bad item".into()))
            .with_error_handler(|_ctrl, _err| panic!("error handler blew up"))
            .build()
            .unwrap();
        worker.start().unwrap();
        worker.add(1).unwrap();

        let exit = worker.wait_stopped(WAIT).unwrap();
        assert!(exit.is_failure());
        assert_eq!(worker.lifecycle(), Lifecycle::Terminated);
        assert!(worker.is_closed());

        assert_eq!(worker.add(2), Err(QueueError::Closed));
        assert!(!worker.offer(3));
        assert_eq!(worker.try_add(4), Err(QueueError::Closed));
        assert_eq!(worker.size(), 0);
        assert!(!worker.close());
    }

    #[test]
    fn test_bounded_queue_reports_full() {
        let queue = Arc::new(InMemoryBlockingQueue::bounded(1).unwrap());
        let worker = AsyncQueueWorker::builder(queue, |_: &u8| Ok(true))
            .build()
            .unwrap();
        assert!(worker.offer(1));
        assert!(!worker.offer(2));
        assert_eq!(worker.try_add(3), Err(QueueError::Full(1)));
        assert_eq!(worker.clear(), 1);
        assert_eq!(worker.status().queued, 0);
    }
}
