//! [`TaskManager`]：任务表、就绪队列、睡眠队列与轮转调度
//!
//! 正在运行的任务一直留在就绪队列队首，时间片用完或主动让出时才移到队尾。
//! 空闲任务从不进入就绪队列，只在队列为空时被选中。
//! 每个修改调度状态的操作都在关中断的临界区内完成，并以 [`TaskManager::dispatch`] 收尾。

use super::{Processor, SlotPool, TaskControlBlock, TaskId, TaskStatus, WaitReason};
use crate::config::{TICK_MS, TIME_SLICE_TICKS};
use crate::sync::IntrGuard;
use alloc::collections::VecDeque;

/// 调度器
pub struct TaskManager {
    tasks: SlotPool<TaskControlBlock>, // 全部任务
    ready_queue: VecDeque<TaskId>,     // 就绪队列，队首为当前任务
    sleep_queue: VecDeque<TaskId>,     // 睡眠队列
    processor: Processor,
    init: Option<TaskId>,
}

impl TaskManager {
    /// 最多容纳 `capacity` 个任务
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: SlotPool::new(capacity),
            ready_queue: VecDeque::new(),
            sleep_queue: VecDeque::new(),
            processor: Processor::new(),
            init: None,
        }
    }

    /// 放入任务表；表满时原样交还，便于调用者回滚
    pub fn insert(&mut self, task: TaskControlBlock) -> Result<TaskId, TaskControlBlock> {
        self.tasks.insert(task).map(TaskId)
    }

    /// 从任务表中移除，任务不能还在任何队列里
    pub fn remove(&mut self, id: TaskId) -> Option<TaskControlBlock> {
        assert!(
            !self.ready_queue.contains(&id) && !self.sleep_queue.contains(&id),
            "removing queued task {:?}",
            id
        );
        assert_ne!(Some(id), self.processor.current(), "removing the running task");
        self.tasks.remove(id.0)
    }

    /// 不可变访问
    pub fn get(&self, id: TaskId) -> Option<&TaskControlBlock> {
        self.tasks.get(id.0)
    }

    /// 可变访问
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskControlBlock> {
        self.tasks.get_mut(id.0)
    }

    /// 访问一个必定存在的任务
    pub fn task(&self, id: TaskId) -> &TaskControlBlock {
        self.tasks
            .get(id.0)
            .unwrap_or_else(|| panic!("task {:?} does not exist", id))
    }

    /// 可变访问一个必定存在的任务
    pub fn task_mut(&mut self, id: TaskId) -> &mut TaskControlBlock {
        self.tasks
            .get_mut(id.0)
            .unwrap_or_else(|| panic!("task {:?} does not exist", id))
    }

    /// 按槽位顺序遍历全部任务
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &TaskControlBlock)> {
        self.tasks.iter().map(|(idx, task)| (TaskId(idx), task))
    }

    /// 按槽位顺序可变遍历全部任务
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (TaskId, &mut TaskControlBlock)> {
        self.tasks.iter_mut().map(|(idx, task)| (TaskId(idx), task))
    }

    /// 任务数
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// 是否没有任务
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 通过 pid 查找
    pub fn find_pid(&self, pid: usize) -> Option<TaskId> {
        self.iter().find(|(_, task)| task.pid == pid).map(|(id, _)| id)
    }

    /// 当前任务
    pub fn current(&self) -> TaskId {
        self.processor
            .current()
            .unwrap_or_else(|| panic!("no task is running"))
    }

    /// 空闲任务
    pub fn idle(&self) -> Option<TaskId> {
        self.processor.idle()
    }

    /// 登记空闲任务；此前没有任何任务在运行时它成为当前任务
    pub fn set_idle(&mut self, idle: TaskId) {
        self.processor.set_idle(idle);
        if self.processor.current().is_none() {
            self.processor.switch_to(idle);
            self.task_mut(idle).status = TaskStatus::Running;
        }
    }

    /// 初始化进程
    pub fn init(&self) -> Option<TaskId> {
        self.init
    }

    /// 登记初始化进程
    pub fn set_init(&mut self, init: TaskId) {
        self.init = Some(init);
    }

    /// 累计切换次数
    pub fn switches(&self) -> usize {
        self.processor.switches()
    }

    /// 就绪队列（队首为当前任务）
    pub fn ready_queue(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ready_queue.iter().copied()
    }

    /// 是否在就绪队列中
    pub fn is_ready(&self, id: TaskId) -> bool {
        self.ready_queue.contains(&id)
    }

    /// 是否在睡眠队列中
    pub fn is_sleeping(&self, id: TaskId) -> bool {
        self.sleep_queue.contains(&id)
    }

    /// 把新建或被唤醒的任务加入就绪队列队尾
    pub fn start(&mut self, id: TaskId) {
        let _guard = IntrGuard::new();
        let task = self.task_mut(id);
        assert!(
            matches!(task.status, TaskStatus::Created | TaskStatus::Waiting(_)),
            "task {:?} cannot become ready from {:?}",
            id,
            task.status
        );
        task.status = TaskStatus::Ready;
        self.ready_queue.push_back(id);
    }

    /// 唤醒阻塞的任务
    pub fn wake(&mut self, id: TaskId) {
        self.start(id);
    }

    fn remove_from_ready(&mut self, id: TaskId) {
        if let Some(pos) = self.ready_queue.iter().position(|t| *t == id) {
            self.ready_queue.remove(pos);
        }
    }

    /// 把队首（当前任务）移到队尾，重置时间片
    fn rotate(&mut self) {
        if let Some(head) = self.ready_queue.pop_front() {
            self.ready_queue.push_back(head);
            let task = self.task_mut(head);
            task.status = TaskStatus::Ready;
            task.slice_left = TIME_SLICE_TICKS;
        }
    }

    /// 选出就绪队列队首（为空时选空闲任务）并切换过去
    ///
    /// 发生切换时返回新的当前任务。
    pub fn dispatch(&mut self) -> Option<TaskId> {
        let _guard = IntrGuard::new();
        let next = self.ready_queue.front().copied().or(self.processor.idle())?;
        let prev = self.processor.current();
        self.task_mut(next).status = TaskStatus::Running;
        if prev == Some(next) {
            return None;
        }
        if let Some(prev) = prev {
            // 只有空闲任务会在仍为 Running 时被换下
            if let Some(task) = self.tasks.get_mut(prev.0) {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Ready;
                }
            }
        }
        trace!("dispatch {:?} -> {:?}", prev, next);
        self.processor.switch_to(next);
        Some(next)
    }

    /// 时钟中断：时间片记账、唤醒睡眠到期的任务，然后调度
    pub fn tick(&mut self) -> Option<TaskId> {
        let _guard = IntrGuard::new();
        let current = self.current();
        if Some(current) != self.idle() && self.ready_queue.front() == Some(&current) {
            let task = self.task_mut(current);
            task.slice_left = task.slice_left.saturating_sub(1);
            if task.slice_left == 0 {
                self.rotate();
            }
        }
        let mut i = 0;
        while i < self.sleep_queue.len() {
            let id = self.sleep_queue[i];
            let task = self
                .tasks
                .get_mut(id.0)
                .unwrap_or_else(|| panic!("sleeping task {:?} does not exist", id));
            task.sleep_ticks = task.sleep_ticks.saturating_sub(1);
            if task.sleep_ticks == 0 {
                task.status = TaskStatus::Ready;
                self.sleep_queue.remove(i);
                self.ready_queue.push_back(id);
            } else {
                i += 1;
            }
        }
        self.dispatch()
    }

    /// 睡眠 `duration_ms` 毫秒，向上取整到时钟周期；非正数不做任何事
    pub fn sleep(&mut self, id: TaskId, duration_ms: isize) {
        if duration_ms <= 0 {
            return;
        }
        let _guard = IntrGuard::new();
        let ticks = (duration_ms as usize + TICK_MS - 1) / TICK_MS;
        self.remove_from_ready(id);
        let task = self.task_mut(id);
        task.status = TaskStatus::Sleeping;
        task.sleep_ticks = ticks;
        self.sleep_queue.push_back(id);
        self.dispatch();
    }

    /// 主动让出：就绪任务多于一个时把当前任务移到队尾
    pub fn yield_current(&mut self) {
        let _guard = IntrGuard::new();
        if self.ready_queue.len() > 1 {
            self.rotate();
            self.dispatch();
        }
    }

    /// 阻塞任务：移出就绪队列，进入等待状态，然后调度
    ///
    /// 没有超时也不能被取消，只有显式的 [`TaskManager::wake`] 能让它回到就绪队列。
    pub fn block(&mut self, id: TaskId, reason: WaitReason) {
        let _guard = IntrGuard::new();
        self.remove_from_ready(id);
        self.task_mut(id).status = TaskStatus::Waiting(reason);
        self.dispatch();
    }

    /// 任务退出：离开所有队列成为僵尸，由调用者随后调度
    pub fn retire(&mut self, id: TaskId) {
        let _guard = IntrGuard::new();
        self.remove_from_ready(id);
        self.sleep_queue.retain(|t| *t != id);
        self.task_mut(id).status = TaskStatus::Zombie;
    }

    /// 检查队列成员关系：每个任务至多属于一个队列，且与状态一致
    pub fn check_queues(&self) -> bool {
        let mut running = 0;
        for (id, task) in self.iter() {
            let in_ready = self.ready_queue.iter().filter(|t| **t == id).count();
            let in_sleep = self.sleep_queue.iter().filter(|t| **t == id).count();
            let ok = match task.status {
                // 空闲任务被换下后是 Ready，但从不进入就绪队列
                TaskStatus::Ready if Some(id) == self.idle() => in_ready == 0 && in_sleep == 0,
                TaskStatus::Ready => in_ready == 1 && in_sleep == 0,
                TaskStatus::Running => {
                    running += 1;
                    let queued = if Some(id) == self.idle() { 0 } else { 1 };
                    in_ready == queued && in_sleep == 0 && Some(id) == self.processor.current()
                }
                TaskStatus::Sleeping => in_ready == 0 && in_sleep == 1,
                TaskStatus::Created | TaskStatus::Waiting(_) | TaskStatus::Zombie => {
                    in_ready == 0 && in_sleep == 0
                }
            };
            if !ok {
                warn!("task {:?} ({:?}) breaks queue membership", id, task.status);
                return false;
            }
        }
        running <= 1
            && self.ready_queue.len() + self.sleep_queue.len() <= self.tasks.len()
            && self
                .ready_queue
                .front()
                .map_or(true, |head| Some(*head) == self.processor.current())
    }
}
