//! [`Processor`]：记录 CPU 上正在运行的任务

use super::TaskId;

/// 处理器管理结构
#[derive(Debug, Default)]
pub struct Processor {
    /// 当前处理器上正在执行的任务
    current: Option<TaskId>,
    /// 就绪队列为空时运行的空闲任务
    idle: Option<TaskId>,
    /// 任务切换次数
    switches: usize,
}

impl Processor {
    /// 创建一个空的处理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前任务
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// 空闲任务
    pub fn idle(&self) -> Option<TaskId> {
        self.idle
    }

    /// 登记空闲任务
    pub fn set_idle(&mut self, idle: TaskId) {
        self.idle = Some(idle);
    }

    /// 切换到 `next`
    pub fn switch_to(&mut self, next: TaskId) {
        if self.current.is_some() {
            self.switches += 1;
        }
        self.current = Some(next);
    }

    /// 累计切换次数
    pub fn switches(&self) -> usize {
        self.switches
    }
}
