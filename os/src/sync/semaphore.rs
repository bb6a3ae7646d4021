//! 计数信号量

use super::{IntrGuard, LockOutcome};
use crate::task::{TaskId, TaskManager, WaitReason};
use alloc::collections::VecDeque;

/// 信号量：计数与 FIFO 等待队列
#[derive(Debug, Default)]
pub struct Semaphore {
    count: usize,
    wait_queue: VecDeque<TaskId>,
}

impl Semaphore {
    /// 以初始计数创建
    pub fn new(count: usize) -> Self {
        Self {
            count,
            wait_queue: VecDeque::new(),
        }
    }

    /// 当前计数
    pub fn count(&self) -> usize {
        self.count
    }

    /// 等待者数量
    pub fn waiters(&self) -> usize {
        self.wait_queue.len()
    }

    /// P 操作：计数大于零则减一，否则阻塞调用者
    pub fn wait(&mut self, tasks: &mut TaskManager, tid: TaskId) -> LockOutcome {
        let _guard = IntrGuard::new();
        if self.count > 0 {
            self.count -= 1;
            LockOutcome::Acquired
        } else {
            self.wait_queue.push_back(tid);
            tasks.block(tid, WaitReason::Semaphore);
            LockOutcome::Blocked
        }
    }

    /// V 操作：有等待者时直接唤醒队首，否则计数加一
    pub fn notify(&mut self, tasks: &mut TaskManager) -> Option<TaskId> {
        let _guard = IntrGuard::new();
        match self.wait_queue.pop_front() {
            Some(tid) => {
                tasks.wake(tid);
                Some(tid)
            }
            None => {
                self.count += 1;
                None
            }
        }
    }
}
