//! 同步原语：关中断临界区、可重入互斥锁与计数信号量
//!
//! 互斥锁和信号量都不自旋，阻塞与唤醒全部交给调度器完成。

mod mutex;
mod semaphore;
mod up;

pub use mutex::{LockOutcome, Mutex};
pub use semaphore::Semaphore;
pub use up::{IntrGuard, UPIntrFreeCell, UPIntrRefMut};
