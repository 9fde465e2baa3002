//! ControlledLoop - 制御可能なループワーカー
//!
//! 1 インスタンスにつきワーカースレッドは 1 本だけ。スレッドを継承するのではなく
//! 保持する（composition）ので、設定は builder で流れるように書けます。
//!
//! # 学習ポイント
//! - 状態は `Mutex<LoopControl>` が唯一の正本。遷移は必ずロック内
//! - 同じ Condvar (`monitor`) を pause の待機・ループ間の sleep・停止待ちに使う
//! - work 関数はロックの外で実行する（遅い work が管理操作を止めない）
//! - 終了は `Interrupt` で協調的に伝える。実行中の iteration は最後まで走る

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Condvar, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::domain::errors::{SpindleError, WorkError};
use crate::domain::state::{Lifecycle, LoopControl, LoopExit, LoopState};
use crate::ports::Interrupt;

use super::builder::LoopBuilder;
use super::control::ControlHandle;
use super::runner::LoopRunner;
use super::status::LoopStatus;

/// Shared は `ControlledLoop`・ワーカー・`ControlHandle` で共有する状態
pub(crate) struct Shared {
    name: RwLock<String>,
    pub(crate) control: Mutex<LoopControl>,
    pub(crate) monitor: Condvar,
    pub(crate) interrupt: Interrupt,
    pub(crate) iterations: AtomicU64,
    exit_tx: watch::Sender<Option<LoopExit>>,
}

impl Shared {
    pub(crate) fn new(
        name: String,
        interval: Duration,
        interrupt: Interrupt,
        budget: Option<u64>,
    ) -> Arc<Self> {
        let mut control = LoopControl::new(interval);
        if let Some(n) = budget {
            control.request_pause_after(n);
        }
        let (exit_tx, _) = watch::channel(None);
        let shared = Arc::new(Self {
            name: RwLock::new(name),
            control: Mutex::new(control),
            monitor: Condvar::new(),
            interrupt,
            iterations: AtomicU64::new(0),
            exit_tx,
        });

        // 割り込まれたら monitor で待っているワーカーを起こす
        let weak = Arc::downgrade(&shared);
        shared.interrupt.on_interrupt(move || {
            if let Some(shared) = weak.upgrade() {
                let _control = shared.control.lock();
                shared.monitor.notify_all();
            }
        });
        shared
    }

    pub(crate) fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.write() = name;
    }

    fn is_closing(&self, control: &LoopControl) -> bool {
        control.state.is_terminal() || self.interrupt.is_interrupted()
    }

    pub(crate) fn pause(&self, wait: Duration) {
        let name = self.name();
        let mut control = self.control.lock();
        if self.is_closing(&control) {
            warn!(loop_name = %name, "pause ignored, loop is closed");
            return;
        }
        control.request_pause(wait);
        self.monitor.notify_all();
        debug!(loop_name = %name, ?wait, "pause requested");
    }

    pub(crate) fn pause_after(&self, loops: u64) -> Result<(), SpindleError> {
        if loops == 0 {
            return Err(SpindleError::InvalidArgument(
                "pause_after_loops requires at least one iteration".to_string(),
            ));
        }
        let name = self.name();
        let mut control = self.control.lock();
        if self.is_closing(&control) {
            warn!(loop_name = %name, "pause_after_loops ignored, loop is closed");
            return Ok(());
        }
        control.request_pause_after(loops);
        self.monitor.notify_all();
        debug!(
            loop_name = %name,
            loops,
            budget = control.pending_budget,
            location = ?control.location,
            "pause after loops requested"
        );
        Ok(())
    }

    pub(crate) fn wake(&self) {
        let name = self.name();
        let mut control = self.control.lock();
        if self.is_closing(&control) {
            warn!(loop_name = %name, "wake ignored, loop is closed");
            return;
        }
        if control.request_wake() {
            self.monitor.notify_all();
            debug!(loop_name = %name, "wake requested");
        }
    }

    /// 終了を要求した呼び出しだけが `true` を返す
    pub(crate) fn close(&self) -> bool {
        let name = self.name();
        if self.control.lock().state.is_terminal() {
            warn!(loop_name = %name, "loop already terminated, close ignored");
            return false;
        }
        // ロックを持ったまま interrupt しない（waker が同じロックを取る）
        if !self.interrupt.interrupt() {
            warn!(loop_name = %name, "loop already closed, do not close it again");
            return false;
        }
        debug!(loop_name = %name, "close requested");

        let started = self.control.lock().started;
        if !started {
            self.finish(LoopExit::Closed);
        }
        true
    }

    /// 最終遷移。最初に記録された exit が優先
    pub(crate) fn finish(&self, exit: LoopExit) {
        let exit = {
            let mut control = self.control.lock();
            control.terminate(exit);
            self.monitor.notify_all();
            control.exit.clone()
        };
        // close() 以外の経路で終わっても add / offer を拒否させる（ロックの外で）
        self.interrupt.interrupt();
        self.exit_tx.send_replace(exit);
    }

    fn wait_stopped(&self, timeout: Duration) -> Option<LoopExit> {
        let deadline = Instant::now().checked_add(timeout);
        let mut control = self.control.lock();
        loop {
            if let Some(exit) = &control.exit {
                return Some(exit.clone());
            }
            match deadline {
                Some(deadline) => {
                    if self.monitor.wait_until(&mut control, deadline).timed_out() {
                        return control.exit.clone();
                    }
                }
                None => self.monitor.wait(&mut control),
            }
        }
    }
}

/// ControlledLoop は work を繰り返し実行するバックグラウンドワーカー
///
/// # 使用例
/// ```ignore
/// let worker = ControlledLoop::of_runnable(|| poll_once())
///     .name("poller")
///     .interval(Duration::from_millis(500))
///     .continue_on_error()
///     .build()?;
/// worker.start()?;
/// worker.pause();
/// worker.wake();
/// worker.close();
/// ```
///
/// drop すると close される（実行中の iteration は最後まで走る）
pub struct ControlledLoop {
    shared: Arc<Shared>,
    runner: Mutex<Option<LoopRunner>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ControlledLoop {
    pub fn builder<F>(work: F) -> LoopBuilder
    where
        F: FnMut() -> Result<bool, WorkError> + Send + 'static,
    {
        LoopBuilder::new(work)
    }

    /// 常に成功扱いの work から構築
    pub fn of_runnable<F>(mut work: F) -> LoopBuilder
    where
        F: FnMut() + Send + 'static,
    {
        LoopBuilder::new(move || {
            work();
            Ok(true)
        })
    }

    /// 失敗しない（bool だけ返す）work から構築
    pub fn of_supplier<F>(mut work: F) -> LoopBuilder
    where
        F: FnMut() -> bool + Send + 'static,
    {
        LoopBuilder::new(move || Ok(work()))
    }

    pub(crate) fn from_parts(shared: Arc<Shared>, runner: LoopRunner) -> Self {
        Self {
            shared,
            runner: Mutex::new(Some(runner)),
            thread: Mutex::new(None),
        }
    }

    /// ワーカーを起動。2 回目以降・終了後はログを出すだけ
    pub fn start(&self) -> Result<(), SpindleError> {
        let name = self.shared.name();
        let mut control = self.shared.control.lock();
        if self.shared.is_closing(&control) {
            warn!(loop_name = %name, "wrong invocation! loop has ended");
            return Ok(());
        }
        if control.started {
            debug!(loop_name = %name, "loop already started");
            return Ok(());
        }
        let Some(runner) = self.runner.lock().take() else {
            return Ok(());
        };
        control.started = true;
        control.started_at = Some(Utc::now());

        let spawned = thread::Builder::new()
            .name(name.replace('\0', ""))
            .spawn(move || runner.run());
        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(source) => {
                drop(control);
                error!(loop_name = %name, error = %source, "failed to spawn worker thread");
                let recorded = std::io::Error::new(source.kind(), source.to_string());
                self.shared
                    .finish(LoopExit::Failed(Arc::new(SpindleError::Spawn {
                        loop_name: name.clone(),
                        source: recorded,
                    })));
                Err(SpindleError::Spawn {
                    loop_name: name,
                    source,
                })
            }
        }
    }

    pub fn start_if_not_started(&self) -> Result<(), SpindleError> {
        {
            let control = self.shared.control.lock();
            if control.started || self.shared.is_closing(&control) {
                return Ok(());
            }
        }
        self.start()
    }

    /// 未起動なら start、起動済みなら wake、終了後は warn
    pub fn start_or_wake(&self) -> Result<(), SpindleError> {
        let started = {
            let control = self.shared.control.lock();
            if self.shared.is_closing(&control) {
                warn!(loop_name = %self.shared.name(), "wrong invocation! loop has ended");
                return Ok(());
            }
            control.started
        };
        if started {
            self.shared.wake();
            Ok(())
        } else {
            self.start()
        }
    }

    /// `wake()` されるまで pause
    pub fn pause(&self) {
        self.shared.pause(Duration::ZERO);
    }

    /// `wait` の間 pause（`Duration::ZERO` なら無期限）
    pub fn pause_for(&self, wait: Duration) {
        self.shared.pause(wait);
    }

    /// あと `loops` 回実行したら無期限 pause
    ///
    /// 実行中の iteration も 1 回に数える。pause 中のワーカーも再開させる
    pub fn pause_after_loops(&self, loops: u64) -> Result<(), SpindleError> {
        self.shared.pause_after(loops)
    }

    pub fn wake(&self) {
        self.shared.wake();
    }

    /// 協調的な終了を要求してすぐに返る
    ///
    /// 実際に終了を要求した呼び出しだけが `true`
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// close 済み、または終了処理中
    pub fn is_closed(&self) -> bool {
        let control = self.shared.control.lock();
        self.shared.is_closing(&control)
    }

    pub fn set_interval(&self, interval: Duration) {
        self.shared.control.lock().interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.shared.control.lock().interval
    }

    pub fn name(&self) -> String {
        self.shared.name()
    }

    /// ログ用の名前を変更（OS スレッド名は起動時のまま）
    pub fn set_name(&self, name: impl Into<String>) -> &Self {
        self.shared.set_name(name.into());
        self
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.control.lock().lifecycle()
    }

    pub fn state(&self) -> LoopState {
        self.shared.control.lock().state
    }

    /// 完了した work の回数（成功・false・失敗を含む）
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::SeqCst)
    }

    /// ワーカーが見ている Interrupt（ブロッキング処理と共有する）
    pub fn interrupt(&self) -> Interrupt {
        self.shared.interrupt.clone()
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle::new(Arc::clone(&self.shared))
    }

    pub fn status(&self) -> LoopStatus {
        LoopStatus::capture(&self.shared)
    }

    /// ワーカースレッドの終了を待ち、終了理由を返す
    ///
    /// 未起動なら待たずに記録済みの exit を返す。ワーカー自身から呼ぶと `None`
    pub fn join(&self) -> Option<LoopExit> {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                warn!(loop_name = %self.shared.name(), "join called from the worker itself");
                *self.thread.lock() = Some(handle);
                return None;
            }
            if handle.join().is_err() {
                error!(loop_name = %self.shared.name(), "worker thread panicked");
            }
        }
        self.shared.control.lock().exit.clone()
    }

    /// 最大 `timeout` だけワーカーの停止を待つ
    pub fn wait_stopped(&self, timeout: Duration) -> Option<LoopExit> {
        self.shared.wait_stopped(timeout)
    }

    /// ワーカーが停止したら完了する
    pub async fn stopped(&self) -> LoopExit {
        let mut rx = self.shared.exit_tx.subscribe();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).clone(),
            Err(_) => None,
        };
        exit.unwrap_or(LoopExit::Closed)
    }
}

impl Drop for ControlledLoop {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.shared.close();
        }
    }
}

impl std::fmt::Debug for ControlledLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.shared.control.lock();
        f.debug_struct("ControlledLoop")
            .field("name", &self.shared.name())
            .field("state", &control.state)
            .field("started", &control.started)
            .finish()
    }
}
