//! Ports - 抽象化レイヤー
//!
//! ループが外部とやり取りする境界を定義します。
//! - **BlockingQueue**: プロデューサとワーカーの間の FIFO
//! - **Interrupt**: ワーカーと、ワーカーが実行するブロッキング処理の割り込み

pub mod blocking_queue;
pub mod interrupt;

pub use self::blocking_queue::BlockingQueue;
pub use self::interrupt::Interrupt;
