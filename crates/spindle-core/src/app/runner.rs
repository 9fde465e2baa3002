//! LoopRunner - ワーカースレッドで実行される本体
//!
//! # フロー（1 iteration）
//! 1. gate: 割り込み確認、iteration budget の消費、pause 中なら monitor で待機
//! 2. work 実行（ロックの外）。panic も `WorkError` として扱う
//! 3. false → false handler、Err → error handler（無ければ致命的エラーで終了）
//! 4. interval だけ sleep（割り込まれたら終了）

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, error};

use crate::domain::errors::{SpindleError, WorkError, WorkPanic};
use crate::domain::state::{CodeLocation, Gate, LoopExit};

use super::control::ControlHandle;
use super::controlled_loop::Shared;

pub(crate) type WorkFn = Box<dyn FnMut() -> Result<bool, WorkError> + Send>;
pub(crate) type FalseHandler = Box<dyn FnMut(&ControlHandle) + Send>;
pub(crate) type ErrorHandler = Box<dyn FnMut(&ControlHandle, WorkError) + Send>;

pub(crate) struct LoopRunner {
    shared: Arc<Shared>,
    work: WorkFn,
    on_false: Option<FalseHandler>,
    on_error: Option<ErrorHandler>,
    handle: ControlHandle,
}

impl LoopRunner {
    pub(crate) fn new(
        shared: Arc<Shared>,
        work: WorkFn,
        on_false: Option<FalseHandler>,
        on_error: Option<ErrorHandler>,
    ) -> Self {
        let handle = ControlHandle::new(Arc::clone(&shared));
        Self {
            shared,
            work,
            on_false,
            on_error,
            handle,
        }
    }

    pub(crate) fn run(mut self) {
        let name = self.shared.name();
        debug!(loop_name = %name, "loop start");
        let guard = ExitGuard {
            shared: Some(Arc::clone(&self.shared)),
        };

        let exit = match self.run_loop() {
            Ok(()) => LoopExit::Closed,
            Err(err) => {
                error!(
                    loop_name = %self.shared.name(),
                    error = %err,
                    cause = %source_of(&err),
                    "loop stopped by an unhandled work error"
                );
                LoopExit::Failed(Arc::new(err))
            }
        };
        guard.disarm(exit);
        debug!(loop_name = %self.shared.name(), "loop end");
    }

    fn run_loop(&mut self) -> Result<(), SpindleError> {
        loop {
            if !self.pass_gate() {
                return Ok(());
            }
            self.execute()?;
            if !self.rest() {
                return Ok(());
            }
        }
    }

    /// work 前のチェックポイント。`false` は割り込み
    fn pass_gate(&self) -> bool {
        let mut control = self.shared.control.lock();
        let mut paused = false;
        loop {
            if self.shared.interrupt.is_interrupted() {
                if paused {
                    debug!(loop_name = %self.shared.name(), "loop was interrupted during waiting");
                }
                return false;
            }
            match control.gate(Instant::now()) {
                Gate::Proceed => {
                    control.location = CodeLocation::AfterGate;
                    if paused {
                        debug!(loop_name = %self.shared.name(), "loop wake");
                    }
                    return true;
                }
                Gate::Hold(deadline) => {
                    if !paused {
                        debug!(loop_name = %self.shared.name(), ?deadline, "loop pause");
                        paused = true;
                    }
                    match deadline {
                        Some(deadline) => {
                            let _ = self.shared.monitor.wait_until(&mut control, deadline);
                        }
                        None => self.shared.monitor.wait(&mut control),
                    }
                }
            }
        }
    }

    fn execute(&mut self) -> Result<(), SpindleError> {
        let work = &mut self.work;
        let result = match panic::catch_unwind(AssertUnwindSafe(|| work())) {
            Ok(result) => result,
            Err(payload) => Err(Box::new(WorkPanic::from_payload(payload)) as WorkError),
        };
        self.shared.iterations.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                if let Some(on_false) = self.on_false.as_mut() {
                    on_false(&self.handle);
                }
                Ok(())
            }
            Err(source) => match self.on_error.as_mut() {
                Some(on_error) => {
                    on_error(&self.handle, source);
                    Ok(())
                }
                None => Err(SpindleError::WorkFailed {
                    loop_name: self.shared.name(),
                    source,
                }),
            },
        }
    }

    /// iteration 間の sleep。`false` は割り込み
    fn rest(&self) -> bool {
        let mut control = self.shared.control.lock();
        control.location = CodeLocation::BeforeGate;
        let interval = control.interval;
        if interval.is_zero() {
            return !self.shared.interrupt.is_interrupted();
        }
        // wake()/pause() during the delay do not shorten it
        let deadline = Instant::now().checked_add(interval);
        loop {
            if self.shared.interrupt.is_interrupted() {
                debug!(loop_name = %self.shared.name(), "loop was interrupted during sleep");
                return false;
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return true,
                Some(deadline) => {
                    let _ = self.shared.monitor.wait_until(&mut control, deadline);
                }
                None => self.shared.monitor.wait(&mut control),
            }
        }
    }
}

fn source_of(err: &SpindleError) -> String {
    std::error::Error::source(err)
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// work の外（callback の panic など）で unwind しても exit を記録し、
/// 完了通知を必ず発火させる
struct ExitGuard {
    shared: Option<Arc<Shared>>,
}

impl ExitGuard {
    fn disarm(mut self, exit: LoopExit) {
        if let Some(shared) = self.shared.take() {
            shared.finish(exit);
        }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let loop_name = shared.name();
            error!(loop_name = %loop_name, "loop worker unwound outside the work function");
            let source: WorkError = Box::new(WorkPanic {
                message: "callback panicked".to_string(),
            });
            shared.finish(LoopExit::Failed(Arc::new(SpindleError::WorkFailed {
                loop_name,
                source,
            })));
        }
    }
}
