//! Status - ステータスクエリ
//!
//! ループの状態をロック 1 回分のスナップショットとして返します。
//! serde で JSON にできるので、CLI やログにそのまま出せます。

use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::state::{Lifecycle, LoopState};

use super::controlled_loop::Shared;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub name: String,
    pub lifecycle: Lifecycle,
    pub state: LoopState,
    pub iterations: u64,
    /// `pause_after_loops` の残り回数（有効な間だけ）
    pub pending_budget: Option<u64>,
    pub interval_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    /// `close()` 要求済み（ワーカーはまだ終了処理中の可能性あり）
    pub closing: bool,
}

impl LoopStatus {
    pub(crate) fn capture(shared: &Shared) -> Self {
        let name = shared.name();
        let control = shared.control.lock();
        Self {
            name,
            lifecycle: control.lifecycle(),
            state: control.state,
            iterations: shared.iterations.load(Ordering::SeqCst),
            pending_budget: (control.state == LoopState::PauseAfterN)
                .then_some(control.pending_budget),
            interval_ms: u64::try_from(control.interval.as_millis()).unwrap_or(u64::MAX),
            started_at: control.started_at,
            closing: shared.interrupt.is_interrupted() && !control.state.is_terminal(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueWorkerStatus {
    #[serde(flatten)]
    pub worker: LoopStatus,
    pub queued: usize,
}
