//! 用户态互斥锁与信号量
//!
//! 阻塞的调用者被唤醒时已经拿到了锁（或信号量），所以阻塞与否都返回 0，不需要重新执行。

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::sync::{LockOutcome, Mutex, Semaphore};
use crate::task::TaskId;

/// 创建互斥锁，返回编号
pub fn sys_mutex_create(kernel: &mut Kernel, caller: TaskId, _args: [usize; 4]) -> KernelResult<isize> {
    let id = kernel
        .mutexes
        .insert(Mutex::new())
        .map_err(|_| KernelError::NoSyncSlot)?;
    trace!("kernel:pid[{}] sys_mutex_create -> {}", kernel.tasks.task(caller).pid, id);
    Ok(id as isize)
}

/// 对 `args[0]` 号互斥锁加锁
pub fn sys_mutex_lock(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let mutex = kernel
        .mutexes
        .get_mut(args[0])
        .ok_or(KernelError::InvalidArgument)?;
    if mutex.lock(&mut kernel.tasks, caller) == LockOutcome::Blocked {
        trace!("kernel:pid[{}] blocked on mutex {}", kernel.tasks.task(caller).pid, args[0]);
    }
    Ok(0)
}

/// 对 `args[0]` 号互斥锁解锁，非所有者的解锁被忽略
pub fn sys_mutex_unlock(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let mutex = kernel
        .mutexes
        .get_mut(args[0])
        .ok_or(KernelError::InvalidArgument)?;
    mutex.unlock(&mut kernel.tasks, caller);
    Ok(0)
}

/// 以初始计数 `args[0]` 创建信号量，返回编号
pub fn sys_semaphore_create(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let id = kernel
        .semaphores
        .insert(Semaphore::new(args[0]))
        .map_err(|_| KernelError::NoSyncSlot)?;
    trace!("kernel:pid[{}] sys_semaphore_create -> {}", kernel.tasks.task(caller).pid, id);
    Ok(id as isize)
}

/// 在 `args[0]` 号信号量上等待
pub fn sys_semaphore_wait(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let semaphore = kernel
        .semaphores
        .get_mut(args[0])
        .ok_or(KernelError::InvalidArgument)?;
    semaphore.wait(&mut kernel.tasks, caller);
    Ok(0)
}

/// 通知 `args[0]` 号信号量
pub fn sys_semaphore_notify(kernel: &mut Kernel, _caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let semaphore = kernel
        .semaphores
        .get_mut(args[0])
        .ok_or(KernelError::InvalidArgument)?;
    semaphore.notify(&mut kernel.tasks);
    Ok(0)
}
