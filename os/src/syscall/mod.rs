//! Implementation of syscalls
//!
//! The single entry point to all system calls, [`syscall()`], is called
//! whenever userspace executes `int 0x80`: the id is in `eax`, up to four
//! arguments in `ebx`, `ecx`, `edx`, `esi`, and the result goes back in `eax`.
//!
//! For clarity, each single syscall is implemented as its own function, named
//! `sys_` then the name of the syscall, in the submodules. Handlers return a
//! [`KernelResult`]; errors become negative errno values here. A handler that
//! blocked the caller returns [`KernelError::Restart`] so the trap path rewinds
//! `eip` and the call runs again once the caller is woken.

mod fs;
mod process;
mod sync;

use crate::config::MAX_SYSCALL;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::task::TaskId;
use fs::*;
use lazy_static::*;
use process::*;
use sync::*;

/// sleep syscall
pub const SYSCALL_SLEEP: usize = 0;
/// getpid syscall
pub const SYSCALL_GETPID: usize = 1;
/// fork syscall
pub const SYSCALL_FORK: usize = 2;
/// exec syscall
pub const SYSCALL_EXEC: usize = 3;
/// yield syscall
pub const SYSCALL_YIELD: usize = 4;
/// open syscall
pub const SYSCALL_OPEN: usize = 5;
/// close syscall
pub const SYSCALL_CLOSE: usize = 6;
/// read syscall
pub const SYSCALL_READ: usize = 7;
/// write syscall
pub const SYSCALL_WRITE: usize = 8;
/// seek syscall
pub const SYSCALL_SEEK: usize = 9;
/// ioctl syscall
pub const SYSCALL_IOCTL: usize = 10;
/// isatty syscall
pub const SYSCALL_ISATTY: usize = 11;
/// fstat syscall
pub const SYSCALL_FSTAT: usize = 12;
/// sbrk syscall
pub const SYSCALL_SBRK: usize = 13;
/// dup syscall
pub const SYSCALL_DUP: usize = 14;
/// unlink syscall
pub const SYSCALL_UNLINK: usize = 15;
/// exit syscall
pub const SYSCALL_EXIT: usize = 16;
/// wait syscall
pub const SYSCALL_WAIT: usize = 17;
/// opendir syscall
pub const SYSCALL_OPENDIR: usize = 18;
/// readdir syscall
pub const SYSCALL_READDIR: usize = 19;
/// closedir syscall
pub const SYSCALL_CLOSEDIR: usize = 20;
/// poweroff syscall
pub const SYSCALL_POWEROFF: usize = 21;
/// reboot syscall
pub const SYSCALL_REBOOT: usize = 22;
/// mutex_create syscall
pub const SYSCALL_MUTEX_CREATE: usize = 23;
/// mutex_lock syscall
pub const SYSCALL_MUTEX_LOCK: usize = 24;
/// mutex_unlock syscall
pub const SYSCALL_MUTEX_UNLOCK: usize = 25;
/// semaphore_create syscall
pub const SYSCALL_SEMAPHORE_CREATE: usize = 26;
/// semaphore_wait syscall
pub const SYSCALL_SEMAPHORE_WAIT: usize = 27;
/// semaphore_notify syscall
pub const SYSCALL_SEMAPHORE_NOTIFY: usize = 28;
/// getppid syscall
pub const SYSCALL_GETPPID: usize = 29;

/// 系统调用处理函数
pub type SyscallHandler = fn(&mut Kernel, TaskId, [usize; 4]) -> KernelResult<isize>;

lazy_static! {
    static ref SYSCALL_TABLE: [Option<SyscallHandler>; MAX_SYSCALL] = {
        let handlers: [(usize, SyscallHandler); 30] = [
            (SYSCALL_SLEEP, sys_sleep),
            (SYSCALL_GETPID, sys_getpid),
            (SYSCALL_FORK, sys_fork),
            (SYSCALL_EXEC, sys_exec),
            (SYSCALL_YIELD, sys_yield),
            (SYSCALL_OPEN, sys_open),
            (SYSCALL_CLOSE, sys_close),
            (SYSCALL_READ, sys_read),
            (SYSCALL_WRITE, sys_write),
            (SYSCALL_SEEK, sys_seek),
            (SYSCALL_IOCTL, sys_ioctl),
            (SYSCALL_ISATTY, sys_isatty),
            (SYSCALL_FSTAT, sys_fstat),
            (SYSCALL_SBRK, sys_sbrk),
            (SYSCALL_DUP, sys_dup),
            (SYSCALL_UNLINK, sys_unlink),
            (SYSCALL_EXIT, sys_exit),
            (SYSCALL_WAIT, sys_wait),
            (SYSCALL_OPENDIR, sys_opendir),
            (SYSCALL_READDIR, sys_readdir),
            (SYSCALL_CLOSEDIR, sys_close),
            (SYSCALL_POWEROFF, sys_poweroff),
            (SYSCALL_REBOOT, sys_reboot),
            (SYSCALL_MUTEX_CREATE, sys_mutex_create),
            (SYSCALL_MUTEX_LOCK, sys_mutex_lock),
            (SYSCALL_MUTEX_UNLOCK, sys_mutex_unlock),
            (SYSCALL_SEMAPHORE_CREATE, sys_semaphore_create),
            (SYSCALL_SEMAPHORE_WAIT, sys_semaphore_wait),
            (SYSCALL_SEMAPHORE_NOTIFY, sys_semaphore_notify),
            (SYSCALL_GETPPID, sys_getppid),
        ];
        let mut table: [Option<SyscallHandler>; MAX_SYSCALL] = [None; MAX_SYSCALL];
        for (id, handler) in handlers {
            table[id] = Some(handler);
        }
        table
    };
}

/// handle syscall `syscall_id` issued by `caller` with `args`
pub fn syscall(kernel: &mut Kernel, caller: TaskId, syscall_id: usize, args: [usize; 4]) -> isize {
    let result = match SYSCALL_TABLE.get(syscall_id).copied().flatten() {
        Some(handler) => handler(kernel, caller, args),
        None => {
            warn!("[kernel] unsupported syscall_id: {}", syscall_id);
            Err(KernelError::NoSys(syscall_id))
        }
    };
    match result {
        Ok(ret) => ret,
        Err(e) => {
            if !matches!(e, KernelError::Restart) {
                debug!("[kernel] syscall {} failed: {}", syscall_id, e);
            }
            e.errno()
        }
    }
}
