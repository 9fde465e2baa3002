//! BatchQueueWorker - まとめて取り出して処理するキューワーカー
//!
//! 1 iteration で最初の 1 件が来るまでブロックし、その時点で溜まっている分を
//! `max_batch` 件まで一括で handler に渡します。

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::domain::errors::{QueueError, SpindleError, WorkError};
use crate::domain::state::{Lifecycle, LoopExit, LoopState};
use crate::ports::BlockingQueue;

use super::builder::LoopBuilder;
use super::control::{ControlHandle, log_and_continue};
use super::controlled_loop::ControlledLoop;
use super::queue_worker::QueueBinding;
use super::status::QueueWorkerStatus;

type BatchHandler<T> = Box<dyn FnMut(&[T]) -> Result<bool, WorkError> + Send>;
type BatchErrorHandler<T> = Box<dyn FnMut(Vec<T>) + Send>;

pub struct BatchWorkerBuilder<T> {
    queue: Arc<dyn BlockingQueue<T>>,
    max_batch: usize,
    handler: BatchHandler<T>,
    on_batch_error: Option<BatchErrorHandler<T>>,
    on_error: Box<dyn FnMut(&ControlHandle, WorkError) + Send>,
    name: Option<String>,
    interval: Duration,
}

impl<T: Send + 'static> BatchWorkerBuilder<T> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// handler が `Ok(false)` を返したバッチを受け取る
    pub fn with_batch_error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        self.on_batch_error = Some(Box::new(handler));
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&ControlHandle, WorkError) + Send + 'static,
    {
        self.on_error = Box::new(handler);
        self
    }

    pub fn build(self) -> Result<BatchQueueWorker<T>, SpindleError> {
        if self.max_batch == 0 {
            return Err(SpindleError::InvalidArgument(
                "max_batch must be at least 1".to_string(),
            ));
        }
        let binding = QueueBinding::new(self.queue);
        let max_batch = self.max_batch;
        let mut handler = self.handler;
        let mut on_batch_error = self.on_batch_error;

        let source = binding.clone();
        let work = move || -> Result<bool, WorkError> {
            let batch = match source.queue.take_batch(max_batch, &source.interrupt) {
                Ok(batch) => batch,
                Err(QueueError::Interrupted) => {
                    trace!("queue take_batch interrupted");
                    return Ok(true);
                }
                Err(err) => return Err(err.into()),
            };
            trace!(size = batch.len(), "batch taken");
            if !handler(batch.as_slice())? {
                if let Some(on_batch_error) = on_batch_error.as_mut() {
                    on_batch_error(batch);
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
        Ok(BatchQueueWorker {
            inner: builder.build()?,
            binding,
        })
    }
}

/// BatchQueueWorker はキューから最大 `max_batch` 件ずつ handler に渡す
pub struct BatchQueueWorker<T> {
    inner: ControlledLoop,
    binding: QueueBinding<T>,
}

impl<T: Send + 'static> BatchQueueWorker<T> {
    pub fn builder<Q, F>(queue: Arc<Q>, max_batch: usize, handler: F) -> BatchWorkerBuilder<T>
    where
        Q: BlockingQueue<T> + 'static,
        F: FnMut(&[T]) -> Result<bool, WorkError> + Send + 'static,
    {
        let queue: Arc<dyn BlockingQueue<T>> = queue;
        BatchWorkerBuilder {
            queue,
            max_batch,
            handler: Box::new(handler),
            on_batch_error: None,
            on_error: Box::new(log_and_continue),
            name: None,
            interval: Duration::ZERO,
        }
    }

    pub fn add(&self, item: T) -> Result<(), QueueError> {
        self.binding.add(item, &self.inner.name())
    }

    pub fn offer(&self, item: T) -> bool {
        self.binding.offer(item, &self.inner.name())
    }

    pub fn size(&self) -> usize {
        self.binding.queue.len()
    }

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

    pub fn wait_stopped(&self, timeout: Duration) -> Option<LoopExit> {
        self.inner.wait_stopped(timeout)
    }

    pub fn join(&self) -> Option<LoopExit> {
        self.inner.join()
    }

    pub async fn stopped(&self) -> LoopExit {
        self.inner.stopped().await
    }

    pub fn controlled_loop(&self) -> &ControlledLoop {
        &self.inner
    }
}

impl<T> std::fmt::Debug for BatchQueueWorker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchQueueWorker")
            .field("inner", &self.inner)
            .field("queued", &self.binding.queue.len())
            .finish()
    }
}
