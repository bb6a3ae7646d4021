//! 内核状态与启动
//!
//! [`Kernel`] 拥有页帧分配器、共享内核映射、描述符表、pid 分配器、调度器、
//! 文件系统、设备表以及用户创建的同步对象。所有修改都发生在关中断的陷入路径上。

use crate::arch;
use crate::config::{
    INIT_PROC_PATH, KERNEL_STACK_SIZE, MAX_SYNC_OBJECTS, MAX_TASKS, PAGE_SIZE, USER_BASE,
};
use crate::drivers::{DeviceId, DeviceTable};
use crate::error::{KernelError, KernelResult};
use crate::fs::{File, FileSystem, Stdin, Stdout};
use crate::mm::{AddressSpace, FrameAllocator, PTEFlags, PhysAddr, PhysWindow, VirtAddr};
use crate::sync::{Mutex, Semaphore};
use crate::task::{
    DescriptorTable, Privilege, RecycleAllocator, SlotPool, TaskId, TaskManager, TrapContext,
};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

/// 一段可用的物理内存 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// 起始物理地址
    pub start: usize,
    /// 结束物理地址
    pub end: usize,
}

/// 引导程序交给内核的信息
#[derive(Debug, Clone, Copy)]
pub struct BootInfo<'a> {
    /// 可用物理内存
    pub regions: &'a [MemoryRegion],
    /// 内核映像结束的物理地址，之前的内存不交给页帧分配器
    pub kernel_end: usize,
    /// 访问物理内存的窗口
    pub window: PhysWindow,
}

/// 内核全部可变状态
pub struct Kernel {
    /// 物理页帧
    pub frames: FrameAllocator,
    /// 共享内核映射的模板
    pub kernel_space: AddressSpace,
    /// 任务描述符表
    pub descriptors: DescriptorTable,
    /// pid 分配器
    pub pids: RecycleAllocator,
    /// 调度器
    pub tasks: TaskManager,
    /// 文件系统
    pub fs: Box<dyn FileSystem>,
    /// 设备
    pub devices: DeviceTable,
    /// 用户创建的互斥锁
    pub mutexes: SlotPool<Mutex>,
    /// 用户创建的信号量
    pub semaphores: SlotPool<Semaphore>,
    /// 启动以来的时钟中断数
    pub ticks: usize,
}

/// 初始化内核：页帧池、共享映射、空闲任务以及从 [`INIT_PROC_PATH`] 装入的 init
pub fn kernel_init(
    boot_info: &BootInfo<'_>,
    fs: Box<dyn FileSystem>,
    devices: DeviceTable,
) -> KernelResult<Kernel> {
    kernel_init_with_capacity(boot_info, fs, devices, MAX_TASKS)
}

/// 指定任务表容量的 [`kernel_init`]
pub fn kernel_init_with_capacity(
    boot_info: &BootInfo<'_>,
    fs: Box<dyn FileSystem>,
    devices: DeviceTable,
    max_tasks: usize,
) -> KernelResult<Kernel> {
    let region = boot_info
        .regions
        .iter()
        .max_by_key(|r| r.end.saturating_sub(r.start))
        .ok_or(KernelError::OutOfFrames)?;
    let start = PhysAddr(region.start.max(boot_info.kernel_end));
    let end = PhysAddr(region.end.min(USER_BASE));
    if start.ceil() >= end.floor() {
        return Err(KernelError::OutOfFrames);
    }
    let mut frames = FrameAllocator::new(start, end, boot_info.window);
    info!(
        "[kernel] physical frames [{:#x}, {:#x}), {} pages",
        start.0,
        end.0,
        frames.total_frames()
    );

    // 共享区：1:1 映射全部受管理的物理内存，第 0 页留空以捕获空指针
    let mut kernel_space = AddressSpace::new_bare(&mut frames)?;
    let mapped_end = PhysAddr::from(end.floor()).0;
    kernel_space.map(
        &mut frames,
        VirtAddr(PAGE_SIZE),
        PhysAddr(PAGE_SIZE),
        mapped_end / PAGE_SIZE - 1,
        PTEFlags::P | PTEFlags::RW,
    )?;

    let mut kernel = Kernel {
        frames,
        kernel_space,
        descriptors: DescriptorTable::new(),
        pids: RecycleAllocator::new(0),
        tasks: TaskManager::new(max_tasks),
        fs,
        devices,
        mutexes: SlotPool::new(MAX_SYNC_OBJECTS),
        semaphores: SlotPool::new(MAX_SYNC_OBJECTS),
        ticks: 0,
    };

    let idle = kernel.task_init("idle", arch::idle_entry(), 0, Privilege::Kernel)?;
    let idle_stack_top = kernel.kernel_stack_top(idle);
    kernel.tasks.task_mut(idle).context.user_esp = idle_stack_top;
    kernel.tasks.set_idle(idle);

    let init = kernel.task_init("init", 0, 0, Privilege::User)?;
    kernel.tasks.set_init(init);
    kernel.exec(init, INIT_PROC_PATH, &[String::from(INIT_PROC_PATH)])?;
    kernel.install_stdio(init)?;
    kernel.tasks.start(init);
    Ok(kernel)
}

impl Kernel {
    /// 给 init 装上标准输入、输出、错误
    fn install_stdio(&mut self, task: TaskId) -> KernelResult<()> {
        let keyboard = self.devices.get(DeviceId::Keyboard).ok_or(KernelError::NoDevice)?;
        let console = self.devices.get(DeviceId::Console).ok_or(KernelError::NoDevice)?;
        let stdin: Arc<dyn File> = Arc::new(Stdin::new(DeviceId::Keyboard, keyboard));
        let stdout: Arc<dyn File> = Arc::new(Stdout::new(console));
        let task = self.tasks.task_mut(task);
        task.install_fd(stdin)?;
        task.install_fd(stdout.clone())?;
        task.install_fd(stdout)?;
        Ok(())
    }

    /// 任务的内核栈顶
    pub fn kernel_stack_top(&self, task: TaskId) -> usize {
        let stack = self.tasks.task(task).kernel_stack;
        self.frames.window().ptr(PhysAddr::from(stack)) as usize + KERNEL_STACK_SIZE
    }

    /// 当前任务的内核栈顶
    pub fn current_kernel_stack_top(&self) -> usize {
        self.kernel_stack_top(self.tasks.current())
    }

    /// 装入 `task` 的内核栈与页目录
    pub fn switch_to(&self, task: TaskId) {
        let descriptor = self.descriptors.get(&self.tasks.task(task).descriptor);
        arch::set_kernel_stack(descriptor.kernel_stack_top);
        arch::load_page_directory(descriptor.page_directory);
    }

    /// 调度出第一个任务并返回它的上下文，由启动代码 `iret` 进入
    pub fn jump_to_first_task(&mut self) -> TrapContext {
        self.tasks.dispatch();
        let first = self.tasks.current();
        self.switch_to(first);
        info!("[kernel] jump to {}", self.tasks.task(first).name);
        self.tasks.task(first).context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MEMORY_START;
    use crate::test_support::{console_devices, MemFs, SimulatedRam};

    #[test]
    fn frames_start_after_kernel_image() {
        let ram = SimulatedRam::new(0x20_0000);
        let regions = [
            MemoryRegion { start: 0x1000, end: 0x9_f000 },
            MemoryRegion { start: ram.start().0, end: ram.end().0 },
        ];
        let boot_info = BootInfo {
            regions: &regions,
            kernel_end: MEMORY_START + 0x4_0000,
            window: ram.window(),
        };
        let kernel = kernel_init(&boot_info, Box::new(MemFs::with_init()), console_devices()).unwrap();
        assert_eq!(kernel.frames.total_frames(), (0x20_0000 - 0x4_0000) / PAGE_SIZE);
        let shared = kernel.kernel_space.resolve(VirtAddr(MEMORY_START + 0x123));
        assert_eq!(shared, Some(PhysAddr(MEMORY_START + 0x123)));
        assert!(kernel.kernel_space.resolve(VirtAddr(0)).is_none());
        assert_eq!(kernel.tasks.len(), 2);
    }

    #[test]
    fn missing_init_fails_boot() {
        let ram = SimulatedRam::new(0x20_0000);
        let regions = [MemoryRegion { start: ram.start().0, end: ram.end().0 }];
        let boot_info = BootInfo {
            regions: &regions,
            kernel_end: 0,
            window: ram.window(),
        };
        let result = kernel_init(&boot_info, Box::new(MemFs::new()), console_devices());
        assert_eq!(result.err(), Some(KernelError::NotFound));
        let empty = BootInfo { regions: &[], ..boot_info };
        assert!(kernel_init(&empty, Box::new(MemFs::new()), console_devices()).is_err());
    }

    #[test]
    fn first_task_loads_its_descriptor() {
        let kernel = crate::test_support::boot();
        let init = kernel.tasks.current();
        let cpu = arch::snapshot();
        assert_eq!(cpu.page_directory, kernel.tasks.task(init).space.token());
        assert_eq!(cpu.kernel_stack, kernel.current_kernel_stack_top());
        assert!(kernel.tasks.task(init).context.from_user());
    }
}
