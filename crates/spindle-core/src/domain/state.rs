//! LoopState - ループの状態機械
//!
//! # 学習ポイント
//! - `LoopControl` はループの monitor で守られたレコード
//! - 遷移は必ずロックを持ったままメソッド経由で行う（ワーカーと管理操作が競合しない）

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SpindleError;

/// LoopState はワーカーの状態
///
/// 状態遷移:
/// - Running -> Pausing -> PausedTimed | PausedIndefinite -> Running
/// - Running -> PauseAfterN -> (budget 消費) Pausing -> PausedIndefinite
/// - 任意 -> Terminated（終端）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Running,

    /// budget 付きで実行中。使い切ったら pause
    PauseAfterN,

    /// pause 要求済みだが、ワーカーはまだ待機に入っていない
    Pausing,

    PausedTimed,

    PausedIndefinite,

    Terminated,
}

impl LoopState {
    /// 終端状態か（これ以上遷移しない）
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Terminated)
    }

    /// pause の待機中か
    pub fn is_paused(self) -> bool {
        matches!(self, LoopState::PausedTimed | LoopState::PausedIndefinite)
    }

    fn holds_worker(self) -> bool {
        matches!(
            self,
            LoopState::Pausing | LoopState::PausedTimed | LoopState::PausedIndefinite
        )
    }
}

/// CodeLocation は現在のサイクルでワーカーが gate の前後どちらにいるか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeLocation {
    /// サイクル間・pause 中・未起動。次の gate はまだ budget を消費していない
    BeforeGate,
    /// gate 通過後。実行中の iteration は消費済み
    AfterGate,
}

/// Lifecycle は診断・テスト用の粗いライフサイクル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lifecycle {
    New,
    Runnable,
    Waiting,
    Terminated,
}

/// LoopExit はワーカーの終了理由
#[derive(Debug, Clone)]
pub enum LoopExit {
    /// `close()` による協調的な終了
    Closed,
    /// error handler 未登録のまま work が失敗
    Failed(Arc<SpindleError>),
}

impl LoopExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, LoopExit::Failed(_))
    }

    pub fn error(&self) -> Option<&SpindleError> {
        match self {
            LoopExit::Closed => None,
            LoopExit::Failed(err) => Some(err),
        }
    }
}

/// gate を 1 回確認した結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    /// 次の iteration を実行
    Proceed,
    /// 待機。`Some` は時限 pause の期限
    Hold(Option<Instant>),
}

#[derive(Debug)]
pub(crate) struct LoopControl {
    pub(crate) state: LoopState,
    pub(crate) pending_wait: Duration,
    pub(crate) pending_budget: u64,
    pub(crate) location: CodeLocation,
    pub(crate) interval: Duration,
    pub(crate) started: bool,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) exit: Option<LoopExit>,
    deadline: Option<Instant>,
}

impl LoopControl {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            state: LoopState::Running,
            pending_wait: Duration::ZERO,
            pending_budget: 0,
            location: CodeLocation::BeforeGate,
            interval,
            started: false,
            started_at: None,
            exit: None,
            deadline: None,
        }
    }

    /// `pause(wait)`: 0 なら無期限
    ///
    /// 待機中のワーカーは通知後に状態を読み直し、新しい時間で待ち直す
    pub(crate) fn request_pause(&mut self, wait: Duration) {
        self.pending_wait = wait;
        self.state = LoopState::Pausing;
    }

    /// `pause_after_loops(n)`（`n >= 1`）
    ///
    /// gate 通過後なら実行中の iteration も `n` 回のうちに数える
    pub(crate) fn request_pause_after(&mut self, n: u64) {
        self.pending_budget = match self.location {
            CodeLocation::BeforeGate => n,
            CodeLocation::AfterGate => n.saturating_sub(1),
        };
        self.state = LoopState::PauseAfterN;
    }

    /// pause（要求中・待機中）を取り消したら `true`
    pub(crate) fn request_wake(&mut self) -> bool {
        if !self.state.holds_worker() {
            return false;
        }
        self.pending_wait = Duration::ZERO;
        self.pending_budget = 0;
        self.deadline = None;
        self.state = LoopState::Running;
        true
    }

    /// ワーカー側: `now` 時点で gate を 1 回通す
    pub(crate) fn gate(&mut self, now: Instant) -> Gate {
        loop {
            match self.state {
                LoopState::Running | LoopState::Terminated => return Gate::Proceed,
                LoopState::PauseAfterN => {
                    if self.pending_budget == 0 {
                        self.pending_wait = Duration::ZERO;
                        self.state = LoopState::Pausing;
                        continue;
                    }
                    self.pending_budget -= 1;
                    return Gate::Proceed;
                }
                LoopState::Pausing => {
                    // consumed exactly once, when the wait begins
                    let wait = std::mem::take(&mut self.pending_wait);
                    self.deadline = if wait.is_zero() {
                        None
                    } else {
                        now.checked_add(wait)
                    };
                    self.state = if self.deadline.is_some() {
                        LoopState::PausedTimed
                    } else {
                        LoopState::PausedIndefinite
                    };
                    return Gate::Hold(self.deadline);
                }
                LoopState::PausedTimed => match self.deadline {
                    Some(deadline) if now < deadline => return Gate::Hold(Some(deadline)),
                    _ => {
                        self.deadline = None;
                        self.state = LoopState::Running;
                        return Gate::Proceed;
                    }
                },
                LoopState::PausedIndefinite => return Gate::Hold(None),
            }
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        if self.state.is_terminal() {
            Lifecycle::Terminated
        } else if !self.started {
            Lifecycle::New
        } else if self.state.is_paused() {
            Lifecycle::Waiting
        } else {
            Lifecycle::Runnable
        }
    }

    pub(crate) fn terminate(&mut self, exit: LoopExit) {
        self.state = LoopState::Terminated;
        self.deadline = None;
        if self.exit.is_none() {
            self.exit = Some(exit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn control() -> LoopControl {
        LoopControl::new(Duration::ZERO)
    }

    #[test]
    fn test_indefinite_pause_holds_until_wake() {
        let mut c = control();
        let now = Instant::now();
        c.request_pause(Duration::ZERO);
        assert_eq!(c.gate(now), Gate::Hold(None));
        assert_eq!(c.state, LoopState::PausedIndefinite);
        assert_eq!(c.gate(now + Duration::from_secs(60)), Gate::Hold(None));

        assert!(c.request_wake());
        assert_eq!(c.gate(now), Gate::Proceed);
    }

    #[test]
    fn test_timed_pause_elapses() {
        let mut c = control();
        let now = Instant::now();
        c.request_pause(Duration::from_millis(100));
        let deadline = now + Duration::from_millis(100);
        assert_eq!(c.gate(now), Gate::Hold(Some(deadline)));
        assert_eq!(c.pending_wait, Duration::ZERO);
        assert_eq!(c.gate(now + Duration::from_millis(50)), Gate::Hold(Some(deadline)));
        assert_eq!(c.gate(deadline), Gate::Proceed);
        assert_eq!(c.state, LoopState::Running);
    }

    #[test]
    fn test_fresh_pause_replaces_running_wait() {
        let mut c = control();
        let now = Instant::now();
        c.request_pause(Duration::from_secs(10));
        assert_eq!(c.gate(now), Gate::Hold(Some(now + Duration::from_secs(10))));

        let later = now + Duration::from_secs(1);
        c.request_pause(Duration::from_millis(20));
        assert_eq!(
            c.gate(later),
            Gate::Hold(Some(later + Duration::from_millis(20)))
        );
    }

    #[test]
    fn test_wake_before_wait_cancels_pause() {
        let mut c = control();
        c.request_pause(Duration::ZERO);
        assert!(c.request_wake());
        assert_eq!(c.gate(Instant::now()), Gate::Proceed);
    }

    #[test]
    fn test_wake_without_pause_is_noop() {
        let mut c = control();
        assert!(!c.request_wake());
        c.request_pause_after(2);
        assert!(!c.request_wake());
        assert_eq!(c.state, LoopState::PauseAfterN);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(10)]
    fn test_budget_allows_exactly_n_iterations(#[case] n: u64) {
        let mut c = control();
        let now = Instant::now();
        c.request_pause_after(n);
        for _ in 0..n {
            assert_eq!(c.gate(now), Gate::Proceed);
        }
        assert_eq!(c.gate(now), Gate::Hold(None));
        assert_eq!(c.state, LoopState::PausedIndefinite);
    }

    #[rstest]
    #[case(CodeLocation::BeforeGate, 3, 3)]
    #[case(CodeLocation::AfterGate, 3, 2)]
    #[case(CodeLocation::AfterGate, 1, 0)]
    fn test_budget_depends_on_code_location(
        #[case] location: CodeLocation,
        #[case] n: u64,
        #[case] expected: u64,
    ) {
        let mut c = control();
        c.location = location;
        c.request_pause_after(n);
        assert_eq!(c.pending_budget, expected);
    }

    #[test]
    fn test_repeated_budget_request_does_not_double_charge() {
        let mut c = control();
        c.location = CodeLocation::AfterGate;
        c.request_pause_after(4);
        c.request_pause_after(4);
        assert_eq!(c.pending_budget, 3);
    }

    #[test]
    fn test_pause_deactivates_budget_but_keeps_value() {
        let mut c = control();
        c.request_pause_after(5);
        c.request_pause(Duration::ZERO);
        assert_eq!(c.state, LoopState::Pausing);
        assert_eq!(c.pending_budget, 5);
        assert_eq!(c.gate(Instant::now()), Gate::Hold(None));
    }

    #[test]
    fn test_budget_request_releases_paused_worker() {
        let mut c = control();
        let now = Instant::now();
        c.request_pause(Duration::ZERO);
        assert_eq!(c.gate(now), Gate::Hold(None));
        c.request_pause_after(1);
        assert_eq!(c.gate(now), Gate::Proceed);
        assert_eq!(c.gate(now), Gate::Hold(None));
    }

    #[test]
    fn test_lifecycle_mapping() {
        let mut c = control();
        assert_eq!(c.lifecycle(), Lifecycle::New);
        c.started = true;
        assert_eq!(c.lifecycle(), Lifecycle::Runnable);
        c.request_pause(Duration::ZERO);
        assert_eq!(c.lifecycle(), Lifecycle::Runnable);
        c.gate(Instant::now());
        assert_eq!(c.lifecycle(), Lifecycle::Waiting);
        c.terminate(LoopExit::Closed);
        assert_eq!(c.lifecycle(), Lifecycle::Terminated);
    }

    #[test]
    fn test_first_exit_wins() {
        let mut c = control();
        c.terminate(LoopExit::Closed);
        c.terminate(LoopExit::Failed(Arc::new(SpindleError::InvalidArgument(
            "late".to_string(),
        ))));
        assert!(matches!(c.exit, Some(LoopExit::Closed)));
    }
}
