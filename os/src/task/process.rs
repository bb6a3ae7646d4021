//! 进程的创建、替换、退出与回收
//!
//! 这些操作要同时动用页帧分配器、描述符表、pid 分配器和任务表，因此实现为 [`Kernel`] 的方法。
//! 多步的创建过程（task_init、fork、exec）在任何一步失败时都会回滚已经分配的资源。

use super::{
    Privilege, TaskControlBlock, TaskDescriptor, TaskId, TaskStatus, TrapContext, WaitReason,
};
use crate::config::{
    KERNEL_STACK_SIZE, MAX_ARGS, PAGE_SIZE, USER_STACK_BOTTOM, USER_STACK_PAGES, USER_STACK_TOP,
};
use crate::error::{KernelError, KernelResult};
use crate::fs::OpenFlags;
use crate::kernel::Kernel;
use crate::loader::ElfImage;
use crate::mm::{AddressSpace, FrameAllocator, PTEFlags, PhysAddr, VirtAddr, VirtPageNum};
use alloc::string::String;
use alloc::vec::Vec;

const KERNEL_STACK_PAGES: usize = KERNEL_STACK_SIZE / PAGE_SIZE;

impl Kernel {
    /// 创建一个处于 `Created` 状态的任务，从 `entry` 开始执行，初始栈顶为 `sp`
    ///
    /// 分配描述符槽、内核栈和一个只含共享映射的地址空间；
    /// 任何资源耗尽都会完整回滚。
    pub fn task_init(
        &mut self,
        name: &str,
        entry: usize,
        sp: usize,
        privilege: Privilege,
    ) -> KernelResult<TaskId> {
        let space = AddressSpace::new(&mut self.frames, &self.kernel_space)?;
        let context = TrapContext::init_context(privilege, entry, sp);
        let id = self.create_task(name, privilege, context, space)?;
        trace!("[kernel] task_init {:?} \"{}\"", id, name);
        Ok(id)
    }

    /// 为已经准备好地址空间和上下文的任务分配其余资源；失败时连同 `space` 一起释放
    fn create_task(
        &mut self,
        name: &str,
        privilege: Privilege,
        context: TrapContext,
        space: AddressSpace,
    ) -> KernelResult<TaskId> {
        let kernel_stack = match self.frames.alloc_zeroed(KERNEL_STACK_PAGES) {
            Ok(ppn) => ppn,
            Err(e) => {
                space.destroy(&mut self.frames);
                return Err(e);
            }
        };
        let kernel_stack_top =
            self.frames.window().ptr(PhysAddr::from(kernel_stack)) as usize + KERNEL_STACK_SIZE;
        let descriptor = match self.descriptors.alloc(TaskDescriptor {
            kernel_stack_top,
            page_directory: space.token(),
        }) {
            Ok(slot) => slot,
            Err(e) => {
                self.frames.free(kernel_stack, KERNEL_STACK_PAGES);
                space.destroy(&mut self.frames);
                return Err(e);
            }
        };
        let pid = self.pids.alloc();
        let task = TaskControlBlock::new(pid, name, privilege, context, space, kernel_stack, descriptor);
        match self.tasks.insert(task) {
            Ok(id) => Ok(id),
            Err(task) => {
                self.release(task);
                Err(KernelError::NoTaskSlot)
            }
        }
    }

    /// 交还任务独占的全部资源
    fn release(&mut self, task: TaskControlBlock) {
        let TaskControlBlock {
            pid,
            space,
            kernel_stack,
            descriptor,
            ..
        } = task;
        space.destroy(&mut self.frames);
        self.frames.free(kernel_stack, KERNEL_STACK_PAGES);
        self.descriptors.free(descriptor);
        self.pids.dealloc(pid);
    }

    /// 复制 `parent`，返回子任务
    ///
    /// 子任务的寄存器与父任务相同，只是返回值为 0；用户页逐页做物理拷贝；
    /// 文件描述符共享同一个打开的文件。失败时父任务不受影响。
    pub fn fork(&mut self, parent: TaskId) -> KernelResult<TaskId> {
        let (space, mut context, name, privilege) = {
            let task = self.tasks.task(parent);
            let space = task.space.copy(&mut self.frames, &self.kernel_space)?;
            (space, task.context, task.name.clone(), task.privilege)
        };
        context.set_return(0);
        let child = self.create_task(&name, privilege, context, space)?;

        let (fd_table, heap_start, heap_end) = {
            let task = self.tasks.task(parent);
            (task.fd_table.clone(), task.heap_start, task.heap_end)
        };
        let task = self.tasks.task_mut(child);
        task.parent = Some(parent);
        task.fd_table = fd_table;
        task.heap_start = heap_start;
        task.heap_end = heap_end;
        let child_pid = task.pid;
        self.tasks.start(child);
        trace!(
            "[kernel] pid {} forked pid {}",
            self.tasks.task(parent).pid,
            child_pid
        );
        Ok(child)
    }

    /// 用 `path` 处的可执行文件替换 `caller` 的地址空间
    ///
    /// 新地址空间完全建好之后才替换，之前的任何失败都不影响调用者。
    /// 打开的文件描述符保留。
    pub fn exec(&mut self, caller: TaskId, path: &str, argv: &[String]) -> KernelResult<()> {
        if argv.len() > MAX_ARGS {
            return Err(KernelError::InvalidArgument);
        }
        let data = self.fs.open(path, OpenFlags::RDONLY)?.read_all()?;
        let elf = ElfImage::parse(&data)?;
        let mut space = AddressSpace::new(&mut self.frames, &self.kernel_space)?;
        let (heap_start, sp) = match load_image(&mut self.frames, &mut space, &elf, &data, argv) {
            Ok(layout) => layout,
            Err(e) => {
                space.destroy(&mut self.frames);
                return Err(e);
            }
        };

        let is_current = self.tasks.current() == caller;
        let task = self.tasks.task_mut(caller);
        let old = core::mem::replace(&mut task.space, space);
        task.context = TrapContext::app_init_context(elf.entry, sp);
        task.privilege = Privilege::User;
        task.heap_start = heap_start;
        task.heap_end = heap_start;
        task.name = String::from(path);
        self.descriptors
            .set_page_directory(&task.descriptor, task.space.token());
        if is_current {
            task.space.activate();
        }
        old.destroy(&mut self.frames);
        info!("[kernel] pid {} exec {}", self.tasks.task(caller).pid, path);
        Ok(())
    }

    /// 结束 `caller`
    ///
    /// 关闭所有文件，子任务交给 init，成为僵尸并离开就绪队列；
    /// 父任务在 wait 中阻塞时唤醒它，出现需要 init 回收的孤儿僵尸时唤醒 init。
    pub fn exit(&mut self, caller: TaskId, status: i32) {
        let init = self.tasks.init();
        if Some(caller) == init {
            panic!("init process exited with status {}", status);
        }
        if Some(caller) == self.tasks.idle() {
            panic!("idle task exited");
        }
        let task = self.tasks.task_mut(caller);
        task.fd_table.iter_mut().for_each(|fd| *fd = None);
        task.exit_code = status;
        let parent = task.parent;
        info!("[kernel] pid {} exited with status {}", task.pid, status);

        let mut orphaned_zombie = false;
        for (_, child) in self.tasks.iter_mut() {
            if child.parent == Some(caller) {
                child.parent = init;
                orphaned_zombie |= child.is_zombie();
            }
        }
        self.tasks.retire(caller);

        for waiter in [parent, init.filter(|_| orphaned_zombie)].into_iter().flatten() {
            let waiting = self
                .tasks
                .get(waiter)
                .map_or(false, |t| t.status == TaskStatus::Waiting(WaitReason::Child));
            if waiting {
                self.tasks.wake(waiter);
            }
        }
        self.tasks.dispatch();
    }

    /// 回收 `caller` 的一个僵尸子任务，返回其 pid，并把退出码写到 `status_ptr`（非 0 时）
    ///
    /// 没有僵尸子任务时阻塞，被唤醒后重新执行。
    pub fn wait(&mut self, caller: TaskId, status_ptr: usize) -> KernelResult<usize> {
        let zombie = self
            .tasks
            .iter()
            .find(|(_, task)| task.parent == Some(caller) && task.is_zombie())
            .map(|(id, _)| id);
        let Some(child) = zombie else {
            self.tasks.block(caller, WaitReason::Child);
            return Err(KernelError::Restart);
        };
        let status = self.tasks.task(child).exit_code;
        if status_ptr != 0 {
            self.tasks
                .task(caller)
                .space
                .write_u32(status_ptr, status as u32)?;
        }
        let task = self
            .tasks
            .remove(child)
            .unwrap_or_else(|| panic!("zombie {:?} vanished", child));
        let pid = task.pid;
        self.release(task);
        Ok(pid)
    }

    /// 把 program break 移动 `increment` 字节，返回原来的 break
    pub fn sbrk(&mut self, caller: TaskId, increment: isize) -> KernelResult<usize> {
        let task = self.tasks.task_mut(caller);
        let old = task.heap_end;
        let new = (old as isize)
            .checked_add(increment)
            .filter(|new| *new >= 0)
            .map(|new| new as usize)
            .ok_or(KernelError::InvalidArgument)?;
        if new < task.heap_start || new > USER_STACK_BOTTOM {
            return Err(KernelError::InvalidArgument);
        }
        let old_top = VirtAddr(old).ceil();
        let new_top = VirtAddr(new).ceil();
        if new_top > old_top {
            task.space.map_framed(
                &mut self.frames,
                old_top.into(),
                new_top.0 - old_top.0,
                PTEFlags::US | PTEFlags::RW,
            )?;
        } else if new_top < old_top {
            task.space
                .unmap(&mut self.frames, new_top.into(), old_top.0 - new_top.0, true);
        }
        task.heap_end = new;
        Ok(old)
    }
}

/// 把映像装入 `space` 并建立用户栈，返回 (堆起点, 初始栈顶)
fn load_image(
    frames: &mut FrameAllocator,
    space: &mut AddressSpace,
    elf: &ElfImage,
    data: &[u8],
    argv: &[String],
) -> KernelResult<(usize, usize)> {
    for segment in elf.segments.iter() {
        let start = VirtAddr(segment.vaddr).floor();
        let end = VirtAddr(segment.end()).ceil();
        let mut flags = PTEFlags::US;
        if segment.writable {
            flags |= PTEFlags::RW;
        }
        if end > start {
            space.map_framed(frames, start.into(), end.0 - start.0, flags)?;
        }
        space.copy_to_user(
            segment.vaddr,
            &data[segment.offset..segment.offset + segment.file_size],
        )?;
    }
    let heap_start = VirtAddr::from(VirtAddr(elf.end()).ceil()).0;

    let stack_bottom = VirtPageNum(USER_STACK_BOTTOM / PAGE_SIZE);
    space.map_framed(
        frames,
        stack_bottom.into(),
        USER_STACK_PAGES,
        PTEFlags::US | PTEFlags::RW,
    )?;
    let sp = push_args(space, argv)?;
    Ok((heap_start, sp))
}

/// 在用户栈上按 cdecl 布置 `main(argc, argv)` 的参数
///
/// 自高向低依次是：参数字符串、对齐、`NULL`、argv 指针数组、argv、argc、伪返回地址。
fn push_args(space: &AddressSpace, argv: &[String]) -> KernelResult<usize> {
    let mut sp = USER_STACK_TOP;
    let mut pointers = Vec::with_capacity(argv.len());
    for arg in argv.iter() {
        sp = sp
            .checked_sub(arg.len() + 1)
            .filter(|sp| *sp >= USER_STACK_BOTTOM)
            .ok_or(KernelError::InvalidArgument)?;
        space.copy_to_user(sp, arg.as_bytes())?;
        space.copy_to_user(sp + arg.len(), &[0])?;
        pointers.push(sp as u32);
    }
    sp &= !3;
    push_word(space, &mut sp, 0)?;
    for ptr in pointers.iter().rev() {
        push_word(space, &mut sp, *ptr)?;
    }
    let argv_ptr = sp as u32;
    push_word(space, &mut sp, argv_ptr)?;
    push_word(space, &mut sp, argv.len() as u32)?;
    push_word(space, &mut sp, 0)?;
    Ok(sp)
}

/// 向用户栈压入一个字，越过栈底时报错
fn push_word(space: &AddressSpace, sp: &mut usize, value: u32) -> KernelResult<()> {
    *sp -= 4;
    if *sp < USER_STACK_BOTTOM {
        return Err(KernelError::InvalidArgument);
    }
    space.write_u32(*sp, value)
}
