//! 陷入处理
//!
//! 所有中断、异常和系统调用都从汇编入口进入 [`Kernel::handle_trap`]。
//! 它先把陷入帧保存到当前任务，处理完毕、调度之后，
//! 再把（可能已经换成另一个任务的）上下文写回陷入帧，由入口 `iret` 返回。

use crate::arch::{self, IRQ_DISK, IRQ_KEYBOARD, IRQ_TIMER, SYSCALL_VECTOR};
use crate::error::ERESTART;
use crate::kernel::Kernel;
use crate::syscall::syscall;
use crate::task::{TaskId, TrapContext};

impl Kernel {
    /// 处理一次陷入，返回时 `frame` 中是接下来要运行的任务的上下文
    pub fn handle_trap(&mut self, frame: &mut TrapContext) {
        let entry = self.tasks.current();
        self.tasks.task_mut(entry).context = *frame;
        match frame.vector {
            vector @ 0..=31 => self.handle_exception(entry, vector),
            IRQ_TIMER => {
                arch::end_of_interrupt(IRQ_TIMER);
                self.ticks += 1;
                self.tasks.tick();
            }
            vector @ (IRQ_KEYBOARD | IRQ_DISK) => {
                arch::end_of_interrupt(vector);
                self.handle_device_irq(vector);
            }
            SYSCALL_VECTOR => self.handle_syscall(entry),
            vector => {
                warn!("[kernel] unexpected interrupt {}", vector);
                arch::end_of_interrupt(vector);
            }
        }
        let current = self.tasks.current();
        if current != entry {
            self.switch_to(current);
        }
        *frame = self.tasks.task(current).context;
    }

    /// 硬件异常：用户态的任务被终止，内核态的异常使机器停机
    fn handle_exception(&mut self, entry: TaskId, vector: usize) {
        let task = self.tasks.task(entry);
        let cx = task.context;
        error!(
            "[kernel] {} (vector {}, error code {:#x}) in pid {} \"{}\" at {:#x}",
            arch::exception_name(vector),
            vector,
            cx.error_code,
            task.pid,
            task.name,
            cx.eip
        );
        error!("[kernel] {:#x?}", cx);
        if cx.from_user() {
            self.exit(entry, cx.error_code as i32);
        } else {
            arch::halt();
        }
    }

    /// 设备中断：交给设备处理，再唤醒在设备信号量上等待的任务
    fn handle_device_irq(&mut self, vector: usize) {
        if let Some(id) = self.devices.handle_irq(vector) {
            if let Some(semaphore) = self.devices.semaphore_mut(id) {
                semaphore.notify(&mut self.tasks);
            }
        }
        self.tasks.dispatch();
    }

    /// 系统调用：返回值写入调用者的上下文，需要重新执行时回退到 `int 0x80`
    fn handle_syscall(&mut self, caller: TaskId) {
        let cx = self.tasks.task(caller).context;
        let ret = syscall(self, caller, cx.syscall_id(), cx.syscall_args());
        if let Some(task) = self.tasks.get_mut(caller) {
            if ret == ERESTART {
                task.context.rewind_syscall();
            } else {
                task.context.set_return(ret);
            }
        }
    }
}
