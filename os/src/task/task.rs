//! 任务控制块与任务状态
use super::{DescriptorSlot, Privilege, TrapContext};
use crate::config::{MAX_FD, TIME_SLICE_TICKS};
use crate::error::{KernelError, KernelResult};
use crate::fs::File;
use crate::mm::{AddressSpace, PhysPageNum};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

/// 任务在任务表中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

/// 阻塞原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// 在 `wait` 中等待子进程
    Child,
    /// 在互斥锁上等待
    Mutex,
    /// 在信号量上等待（包括设备信号量）
    Semaphore,
}

/// 任务状态
///
/// `Created -> Ready -> Running -> {Ready, Sleeping, Waiting} -> Zombie`，
/// 僵尸任务被父进程回收后槽位释放。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// 已初始化，尚未进入就绪队列
    Created,
    /// 在就绪队列中
    Ready,
    /// 正在运行（位于就绪队列队首，或者是空闲任务）
    Running,
    /// 在睡眠队列中
    Sleeping,
    /// 在某个等待队列中
    Waiting(WaitReason),
    /// 已退出，等待回收
    Zombie,
}

/// 任务控制块
pub struct TaskControlBlock {
    /// 进程标识符
    pub pid: usize,
    /// 诊断用的名字
    pub name: String,
    /// 状态
    pub status: TaskStatus,
    /// 运行的特权级
    pub privilege: Privilege,
    /// 父任务，只用于通知与重新认领，不拥有它
    pub parent: Option<TaskId>,
    /// 最近一次陷入时保存的寄存器
    pub context: TrapContext,
    /// 独占的地址空间
    pub space: AddressSpace,
    /// 独占的内核栈页帧
    pub kernel_stack: PhysPageNum,
    /// 独占的描述符槽
    pub descriptor: DescriptorSlot,
    /// 堆的起点
    pub heap_start: usize,
    /// 当前的 program break
    pub heap_end: usize,
    /// 文件描述符表，长度固定为 `MAX_FD`
    pub fd_table: Vec<Option<Arc<dyn File>>>,
    /// 退出码
    pub exit_code: i32,
    /// 剩余时间片
    pub slice_left: usize,
    /// 剩余睡眠时钟数
    pub sleep_ticks: usize,
}

impl TaskControlBlock {
    /// 新建处于 `Created` 状态的任务控制块
    pub fn new(
        pid: usize,
        name: &str,
        privilege: Privilege,
        context: TrapContext,
        space: AddressSpace,
        kernel_stack: PhysPageNum,
        descriptor: DescriptorSlot,
    ) -> Self {
        Self {
            pid,
            name: String::from(name),
            status: TaskStatus::Created,
            privilege,
            parent: None,
            context,
            space,
            kernel_stack,
            descriptor,
            heap_start: 0,
            heap_end: 0,
            fd_table: vec![None; MAX_FD],
            exit_code: 0,
            slice_left: TIME_SLICE_TICKS,
            sleep_ticks: 0,
        }
    }

    /// 是否为僵尸
    pub fn is_zombie(&self) -> bool {
        self.status == TaskStatus::Zombie
    }

    /// 最小的空闲文件描述符
    pub fn alloc_fd(&self) -> KernelResult<usize> {
        self.fd_table
            .iter()
            .position(|f| f.is_none())
            .ok_or(KernelError::NoFreeFd)
    }

    /// 放入一个打开的文件，返回描述符
    pub fn install_fd(&mut self, file: Arc<dyn File>) -> KernelResult<usize> {
        let fd = self.alloc_fd()?;
        self.fd_table[fd] = Some(file);
        Ok(fd)
    }

    /// 描述符对应的文件
    pub fn file(&self, fd: usize) -> KernelResult<Arc<dyn File>> {
        self.fd_table
            .get(fd)
            .and_then(|f| f.clone())
            .ok_or(KernelError::BadFd)
    }

    /// 关闭描述符
    pub fn close_fd(&mut self, fd: usize) -> KernelResult<()> {
        self.fd_table
            .get_mut(fd)
            .and_then(|f| f.take())
            .map(|_| ())
            .ok_or(KernelError::BadFd)
    }
}
