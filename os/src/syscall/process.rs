//! 进程管理系统调用

use crate::arch;
use crate::config::{MAX_ARGS, MAX_PATH_LEN};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::task::TaskId;
use alloc::string::String;
use alloc::vec::Vec;

/// 睡眠 `args[0]` 毫秒
pub fn sys_sleep(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    trace!("kernel:pid[{}] sys_sleep", kernel.tasks.task(caller).pid);
    kernel.tasks.sleep(caller, args[0] as isize);
    Ok(0)
}

/// 获取当前进程的 PID
pub fn sys_getpid(kernel: &mut Kernel, caller: TaskId, _args: [usize; 4]) -> KernelResult<isize> {
    Ok(kernel.tasks.task(caller).pid as isize)
}

/// 获取父进程的 PID，没有父进程时为 0
pub fn sys_getppid(kernel: &mut Kernel, caller: TaskId, _args: [usize; 4]) -> KernelResult<isize> {
    let parent = kernel.tasks.task(caller).parent;
    Ok(parent
        .and_then(|p| kernel.tasks.get(p))
        .map_or(0, |p| p.pid as isize))
}

/// 进程创建（fork），父进程得到子进程 PID，子进程得到 0
pub fn sys_fork(kernel: &mut Kernel, caller: TaskId, _args: [usize; 4]) -> KernelResult<isize> {
    trace!("kernel:pid[{}] sys_fork", kernel.tasks.task(caller).pid);
    let child = kernel.fork(caller)?;
    Ok(kernel.tasks.task(child).pid as isize)
}

/// 进程执行（exec）：`args[0]` 为路径，`args[1]` 为以 NULL 结尾的参数指针数组（可以为 0）
pub fn sys_exec(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let (path, argv) = {
        let space = &kernel.tasks.task(caller).space;
        let path = space.read_cstr(args[0], MAX_PATH_LEN)?;
        let mut argv: Vec<String> = Vec::new();
        if args[1] == 0 {
            argv.push(path.clone());
        } else {
            loop {
                let ptr = space.read_u32(args[1] + argv.len() * 4)? as usize;
                if ptr == 0 {
                    break;
                }
                if argv.len() == MAX_ARGS {
                    return Err(KernelError::InvalidArgument);
                }
                argv.push(space.read_cstr(ptr, MAX_PATH_LEN)?);
            }
        }
        (path, argv)
    };
    trace!("kernel:pid[{}] sys_exec {}", kernel.tasks.task(caller).pid, path);
    kernel.exec(caller, &path, &argv)?;
    Ok(0)
}

/// 让出处理器
pub fn sys_yield(kernel: &mut Kernel, caller: TaskId, _args: [usize; 4]) -> KernelResult<isize> {
    trace!("kernel:pid[{}] sys_yield", kernel.tasks.task(caller).pid);
    kernel.tasks.yield_current();
    Ok(0)
}

/// 进程退出
pub fn sys_exit(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    kernel.exit(caller, args[0] as i32);
    Ok(0)
}

/// 等待任意子进程结束，退出码写到 `args[0]`（非 0 时）
pub fn sys_wait(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    kernel.wait(caller, args[0]).map(|pid| pid as isize)
}

/// 调整 program break，返回原来的 break
pub fn sys_sbrk(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    kernel
        .sbrk(caller, args[0] as isize)
        .map(|old| old as isize)
}

/// 关机
pub fn sys_poweroff(kernel: &mut Kernel, caller: TaskId, _args: [usize; 4]) -> KernelResult<isize> {
    info!("[kernel] poweroff requested by pid {}", kernel.tasks.task(caller).pid);
    arch::poweroff();
    Ok(0)
}

/// 重启
pub fn sys_reboot(kernel: &mut Kernel, caller: TaskId, _args: [usize; 4]) -> KernelResult<isize> {
    info!("[kernel] reboot requested by pid {}", kernel.tasks.task(caller).pid);
    arch::reboot();
    Ok(0)
}
