//! Interrupt - 協調的な割り込みトークン
//!
//! Java の `Thread.interrupt()` に相当するものを明示的なトークンで表現します。
//!
//! # 学習ポイント
//! - フラグは一度立てたら戻らない（単調）
//! - waker を登録しておくと、割り込み時に呼ばれる
//!   （Condvar で待っている側を起こすために使う）
//! - 待つ側は「ロック内でフラグ確認 → wait」、起こす側は「フラグ設定 → ロック取得 → notify」
//!   の順序を守ることで wakeup の取りこぼしを防ぐ

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

type Waker = Box<dyn Fn() + Send + Sync>;

/// Interrupt は共有・clone 可能な一度きりの割り込みフラグ
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// フラグを立てて、登録済みの waker を全て実行
    ///
    /// 実際に遷移させた呼び出しだけが `true`
    pub fn interrupt(&self) -> bool {
        if self.inner.flag.swap(true, Ordering::SeqCst) {
            return false;
        }
        let wakers = self.inner.wakers.lock();
        for wake in wakers.iter() {
            wake();
        }
        true
    }

    /// waker を登録。既にフラグが立っていれば即実行
    ///
    /// waker は複数回呼ばれうるので、ブロックしないこと
    pub fn on_interrupt<F>(&self, waker: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut wakers = self.inner.wakers.lock();
        if self.is_interrupted() {
            drop(wakers);
            waker();
            return;
        }
        wakers.push(Box::new(waker));
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
