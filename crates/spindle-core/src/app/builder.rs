//! LoopBuilder - ControlledLoop の構築
//!
//! # 学習ポイント
//! - Builder パターンで callback・interval・名前を流れるように設定
//! - 起動時検証（Fail-fast）: 不正な設定は build() で `InvalidArgument`

use std::sync::Arc;
use std::time::Duration;

use crate::domain::config::LoopConfig;
use crate::domain::errors::{SpindleError, WorkError};
use crate::domain::naming::resolve_name;
use crate::ports::Interrupt;

use super::control::{ControlHandle, log_and_continue};
use super::controlled_loop::{ControlledLoop, Shared};
use super::runner::{ErrorHandler, FalseHandler, LoopRunner, WorkFn};

/// LoopBuilder は ControlledLoop を構築
///
/// # 使用例
/// ```ignore
/// let worker = LoopBuilder::new(|| Ok(step()))
///     .name("stepper")
///     .interval(Duration::from_millis(100))
///     .with_false_handler(|ctrl| ctrl.pause_for(Duration::from_secs(1)))
///     .with_error_handler(|ctrl, err| {
///         ctrl.log_error(err.as_ref());
///         ctrl.terminate();
///     })
///     .build()?;
/// ```
pub struct LoopBuilder {
    work: WorkFn,
    on_false: Option<FalseHandler>,
    on_error: Option<ErrorHandler>,
    name: Option<String>,
    interval: Duration,
    interrupt: Option<Interrupt>,
    budget: Option<u64>,
}

impl LoopBuilder {
    pub fn new<F>(work: F) -> Self
    where
        F: FnMut() -> Result<bool, WorkError> + Send + 'static,
    {
        Self {
            work: Box::new(work),
            on_false: None,
            on_error: None,
            name: None,
            interval: Duration::ZERO,
            interrupt: None,
            budget: None,
        }
    }

    pub fn from_config<F>(work: F, config: &LoopConfig) -> Self
    where
        F: FnMut() -> Result<bool, WorkError> + Send + 'static,
    {
        let mut builder = Self::new(work).interval(config.interval());
        if let Some(name) = &config.name {
            builder = builder.name(name.clone());
        }
        if config.continue_on_error {
            builder = builder.continue_on_error();
        }
        builder
    }

    /// 名前を設定（空白なら自動採番）
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// iteration ごとの sleep 間隔を設定（0 なら sleep しない）
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// work が `false` を返したときの handler を登録
    pub fn with_false_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&ControlHandle) + Send + 'static,
    {
        self.on_false = Some(Box::new(handler));
        self
    }

    /// work が失敗したときの handler を登録（未登録なら失敗でループ終了）
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&ControlHandle, WorkError) + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// エラーをログに出して次の iteration へ
    pub fn continue_on_error(self) -> Self {
        self.with_error_handler(log_and_continue)
    }

    /// monitor の外でブロックする work と Interrupt を共有
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// 起動後 `loops` 回実行したら pause
    pub fn pause_after_loops(mut self, loops: u64) -> Self {
        self.budget = Some(loops);
        self
    }

    pub fn build(self) -> Result<ControlledLoop, SpindleError> {
        if self.budget == Some(0) {
            return Err(SpindleError::InvalidArgument(
                "pause_after_loops requires at least one iteration".to_string(),
            ));
        }
        let interrupt = self.interrupt.unwrap_or_default();
        if interrupt.is_interrupted() {
            return Err(SpindleError::InvalidArgument(
                "interrupt is already triggered".to_string(),
            ));
        }

        let name = resolve_name(self.name.as_deref());
        let shared = Shared::new(name, self.interval, interrupt, self.budget);
        let runner = LoopRunner::new(
            Arc::clone(&shared),
            self.work,
            self.on_false,
            self.on_error,
        );
        Ok(ControlledLoop::from_parts(shared, runner))
    }
}
