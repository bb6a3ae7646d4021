//! 任务管理
//!
//! 有关任务管理的所有内容，例如创建、调度和回收任务，均在此模块中实现。
//! [`TaskManager`] 持有全部任务控制块以及就绪、睡眠队列；[`Processor`] 记录正在运行的任务。
//! 需要同时动用页帧、描述符表和文件系统的进程操作（fork、exec、exit、wait、sbrk）
//! 在 [`process`] 中作为 [`crate::Kernel`] 的方法实现。
//!
//! 上下文切换完全由软件完成：陷入入口把寄存器保存到当前任务的 [`TrapContext`]，
//! 调度改变当前任务后，出口恢复的就是新任务保存的 [`TrapContext`]。

mod context;
mod descriptor;
mod id;
mod manager;
mod process;
mod processor;
#[allow(clippy::module_inception)]
mod task;

pub use context::{Privilege, TrapContext};
pub use descriptor::{DescriptorSlot, DescriptorTable, TaskDescriptor};
pub use id::{RecycleAllocator, SlotPool};
pub use manager::TaskManager;
pub use processor::Processor;
pub use task::{TaskControlBlock, TaskId, TaskStatus, WaitReason};

/// 空闲任务的 pid
pub const IDLE_PID: usize = 0;
/// 初始化进程的 pid
pub const INIT_PID: usize = 1;
