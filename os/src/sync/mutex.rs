//! 可重入的阻塞互斥锁

use super::IntrGuard;
use crate::task::{TaskId, TaskManager, WaitReason};
use alloc::collections::VecDeque;

/// 加锁的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// 已持有锁（首次获得或重入）
    Acquired,
    /// 调用者已阻塞，解锁时会把所有权直接交给它
    Blocked,
}

/// 互斥锁：所有者、重入计数、FIFO 等待队列
#[derive(Debug, Default)]
pub struct Mutex {
    owner: Option<TaskId>,
    count: usize,
    wait_queue: VecDeque<TaskId>,
}

impl Mutex {
    /// 创建一个未被持有的互斥锁
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前所有者
    pub fn owner(&self) -> Option<TaskId> {
        self.owner
    }

    /// 重入计数
    pub fn count(&self) -> usize {
        self.count
    }

    /// 等待者数量
    pub fn waiters(&self) -> usize {
        self.wait_queue.len()
    }

    /// 加锁
    ///
    /// 锁空闲时获得锁；调用者已持有时计数加一；否则调用者阻塞并让出处理器。
    pub fn lock(&mut self, tasks: &mut TaskManager, tid: TaskId) -> LockOutcome {
        let _guard = IntrGuard::new();
        match self.owner {
            None => {
                self.owner = Some(tid);
                self.count = 1;
                LockOutcome::Acquired
            }
            Some(owner) if owner == tid => {
                self.count += 1;
                LockOutcome::Acquired
            }
            Some(_) => {
                self.wait_queue.push_back(tid);
                tasks.block(tid, WaitReason::Mutex);
                LockOutcome::Blocked
            }
        }
    }

    /// 解锁，返回调用者是否为所有者
    ///
    /// 非所有者解锁会被忽略。计数归零时若有等待者，所有权直接交给队首并将其唤醒。
    pub fn unlock(&mut self, tasks: &mut TaskManager, tid: TaskId) -> bool {
        let _guard = IntrGuard::new();
        if self.owner != Some(tid) {
            warn!(
                "[kernel] task {:?} unlocks a mutex owned by {:?}, ignored",
                tid, self.owner
            );
            return false;
        }
        self.count -= 1;
        if self.count == 0 {
            match self.wait_queue.pop_front() {
                Some(next) => {
                    self.owner = Some(next);
                    self.count = 1;
                    tasks.wake(next);
                }
                None => self.owner = None,
            }
        }
        true
    }
}
