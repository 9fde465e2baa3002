//! Errors - エラー型と分類
//!
//! # 分類
//! - **InvalidArgument**: 設定エラー（構築時・呼び出し時に同期的に拒否）
//! - **WorkFailed**: 致命的な実行エラー（error handler 未登録のまま work が失敗）
//! - **Queue**: キュー操作のエラー（割り込み、満杯、クローズ済み）
//!
//! 回復可能な実行エラーは `WorkError` として error handler に渡され、
//! ここの enum には現れません。

use std::any::Any;

use thiserror::Error;

/// work と item handler が返すエラー型
pub type WorkError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SpindleError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to spawn worker thread for loop [{loop_name}]")]
    Spawn {
        loop_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("loop [{loop_name}] processing exception, the worker stopped")]
    WorkFailed {
        loop_name: String,
        #[source]
        source: WorkError,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("interrupted while blocked on the queue")]
    Interrupted,

    #[error("queue is full (capacity={0})")]
    Full(usize),

    #[error("worker has been closed, item rejected")]
    Closed,

    #[error("queue capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),
}

/// WorkPanic は work 内の panic を `Err` と同じ経路に流すための変換
#[derive(Debug, Error)]
#[error("work function panicked: {message}")]
pub struct WorkPanic {
    pub message: String,
}

impl WorkPanic {
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_failed_keeps_source() {
        let err = SpindleError::WorkFailed {
            loop_name: "l-1".to_string(),
            source: "boom".into(),
        };
        assert!(err.to_string().contains("[l-1]"));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn test_panic_payload_is_readable() {
        let payload = std::panic::catch_unwind(|| panic!("bad {}", 42)).unwrap_err();
        let panic = WorkPanic::from_payload(payload);
        assert_eq!(panic.message, "bad 42");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(WorkPanic::from_payload(payload).message, "non-string panic payload");
    }

    #[test]
    fn test_queue_error_converts() {
        let err: SpindleError = QueueError::Closed.into();
        assert!(matches!(err, SpindleError::Queue(QueueError::Closed)));
    }
}
