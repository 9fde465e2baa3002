//! ControlHandle - callback に渡す制御用ハンドル
//!
//! false handler / error handler がループのペースや寿命に影響を与えるための
//! 窓口です。ループ内部の可変状態そのものは見せません。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, trace};

use crate::domain::errors::WorkError;

use super::controlled_loop::Shared;

#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
}

impl ControlHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// wake されるまで pause
    pub fn pause(&self) {
        self.shared.pause(Duration::ZERO);
    }

    /// `wait` の間 pause（0 なら無期限）
    pub fn pause_for(&self, wait: Duration) {
        self.shared.pause(wait);
    }

    /// 何もせず次の iteration へ（明示用）
    pub fn continue_next_loop(&self) {
        trace!(loop_name = %self.shared.name(), "continue to the next round");
    }

    /// ループの `close()` と同じ
    pub fn terminate(&self) -> bool {
        self.shared.close()
    }

    pub fn log_error(&self, err: &dyn std::error::Error) {
        error!(
            loop_name = %self.shared.name(),
            error = %err,
            "loop processing exception, continue to the next round"
        );
    }

    pub fn name(&self) -> String {
        self.shared.name()
    }
}

impl fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlHandle")
            .field("loop_name", &self.shared.name())
            .finish()
    }
}

/// 標準の error handler: ログに出して次の iteration へ
pub fn log_and_continue(ctrl: &ControlHandle, err: WorkError) {
    ctrl.log_error(err.as_ref());
}
