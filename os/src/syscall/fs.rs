//! 文件与文件系统相关的系统调用

use crate::config::MAX_PATH_LEN;
use crate::error::{KernelError, KernelResult};
use crate::fs::{DirEntry, File, OpenFlags, SeekWhence};
use crate::kernel::Kernel;
use crate::mm::UserBuffer;
use crate::sync::LockOutcome;
use crate::task::TaskId;
use alloc::string::String;
use alloc::sync::Arc;

fn user_path(kernel: &Kernel, caller: TaskId, ptr: usize) -> KernelResult<String> {
    kernel.tasks.task(caller).space.read_cstr(ptr, MAX_PATH_LEN)
}

fn user_buffer(kernel: &Kernel, caller: TaskId, ptr: usize, len: usize, write: bool) -> KernelResult<UserBuffer<'static>> {
    let buffers = kernel.tasks.task(caller).space.translated_byte_buffer(ptr, len, write)?;
    Ok(UserBuffer::new(buffers))
}

fn file(kernel: &Kernel, caller: TaskId, fd: usize) -> KernelResult<Arc<dyn File>> {
    kernel.tasks.task(caller).file(fd)
}

/// 打开文件：`args[0]` 为路径，`args[1]` 为 [`OpenFlags`]
pub fn sys_open(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let path = user_path(kernel, caller, args[0])?;
    let flags = OpenFlags::from_bits(args[1] as u32).ok_or(KernelError::InvalidArgument)?;
    trace!("kernel:pid[{}] sys_open {} {:?}", kernel.tasks.task(caller).pid, path, flags);
    let file = kernel.fs.open(&path, flags)?;
    kernel.tasks.task_mut(caller).install_fd(file).map(|fd| fd as isize)
}

/// 关闭文件描述符（也用于 closedir）
pub fn sys_close(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    trace!("kernel:pid[{}] sys_close {}", kernel.tasks.task(caller).pid, args[0]);
    kernel.tasks.task_mut(caller).close_fd(args[0])?;
    Ok(0)
}

/// 从 `args[0]` 读取 `args[2]` 字节到用户缓冲区 `args[1]`
///
/// 设备暂时没有数据时，调用者在设备信号量上阻塞，被中断唤醒后重新执行。
pub fn sys_read(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    trace!("kernel:pid[{}] sys_read", kernel.tasks.task(caller).pid);
    let file = file(kernel, caller, args[0])?;
    if !file.readable() {
        return Err(KernelError::BadFd);
    }
    loop {
        let buf = user_buffer(kernel, caller, args[1], args[2], true)?;
        match file.read(buf) {
            Err(KernelError::WouldBlock(device)) => {
                let semaphore = kernel
                    .devices
                    .semaphore_mut(device)
                    .ok_or(KernelError::NoDevice)?;
                // 中断早于读者到达时信号量已有计数，直接再读一次
                if semaphore.wait(&mut kernel.tasks, caller) == LockOutcome::Blocked {
                    return Err(KernelError::Restart);
                }
            }
            result => return result.map(|len| len as isize),
        }
    }
}

/// 把用户缓冲区 `args[1]` 中的 `args[2]` 字节写到 `args[0]`
pub fn sys_write(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    trace!("kernel:pid[{}] sys_write", kernel.tasks.task(caller).pid);
    let file = file(kernel, caller, args[0])?;
    if !file.writable() {
        return Err(KernelError::BadFd);
    }
    let buf = user_buffer(kernel, caller, args[1], args[2], false)?;
    file.write(buf).map(|len| len as isize)
}

/// 移动读写位置：`args[1]` 为有符号偏移，`args[2]` 为基准
pub fn sys_seek(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let whence = SeekWhence::try_from(args[2])?;
    let pos = file(kernel, caller, args[0])?.seek(args[1] as isize, whence)?;
    Ok(pos as isize)
}

/// 设备控制
pub fn sys_ioctl(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let ret = file(kernel, caller, args[0])?.ioctl(args[1], args[2])?;
    Ok(ret as isize)
}

/// 是否为终端，是返回 1，否则返回 0
pub fn sys_isatty(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    Ok(file(kernel, caller, args[0])?.is_tty() as isize)
}

/// 把文件元数据写到用户地址 `args[1]`
pub fn sys_fstat(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let stat = file(kernel, caller, args[0])?.stat()?;
    kernel
        .tasks
        .task(caller)
        .space
        .copy_to_user(args[1], &stat.to_bytes())?;
    Ok(0)
}

/// 复制文件描述符，返回最小的空闲描述符
pub fn sys_dup(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let task = kernel.tasks.task_mut(caller);
    let file = task.file(args[0])?;
    task.install_fd(file).map(|fd| fd as isize)
}

/// 删除文件
pub fn sys_unlink(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let path = user_path(kernel, caller, args[0])?;
    trace!("kernel:pid[{}] sys_unlink {}", kernel.tasks.task(caller).pid, path);
    kernel.fs.unlink(&path)?;
    Ok(0)
}

/// 打开目录，返回描述符
pub fn sys_opendir(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    let path = user_path(kernel, caller, args[0])?;
    let dir = kernel.fs.open_dir(&path)?;
    kernel.tasks.task_mut(caller).install_fd(dir).map(|fd| fd as isize)
}

/// 读取一个目录项到用户缓冲区 `args[1]`（容量 `args[2]`）
///
/// 读到目录项返回 1，目录读完返回 0。
pub fn sys_readdir(kernel: &mut Kernel, caller: TaskId, args: [usize; 4]) -> KernelResult<isize> {
    if args[2] < DirEntry::HEADER + 1 {
        return Err(KernelError::InvalidArgument);
    }
    let dir = file(kernel, caller, args[0])?;
    match dir.read_dir()? {
        Some(entry) => {
            let record = entry.encode(args[2])?;
            kernel.tasks.task(caller).space.copy_to_user(args[1], &record)?;
            Ok(1)
        }
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::USER_BASE;
    use crate::drivers::DeviceId;
    use crate::fs::{OpenFlags, Stat, StatMode};
    use crate::task::{TaskStatus, WaitReason};
    use crate::test_support::{boot, boot_with, run_syscall, MemFs};
    use alloc::vec;
    use alloc::vec::Vec;

    const DATA: usize = USER_BASE + 0x1000;

    fn put(kernel: &mut crate::Kernel, va: usize, bytes: &[u8]) {
        let init = kernel.tasks.current();
        kernel.tasks.task(init).space.copy_to_user(va, bytes).unwrap();
    }

    fn get(kernel: &crate::Kernel, va: usize, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        let task = kernel.tasks.current();
        kernel.tasks.task(task).space.copy_from_user(va, &mut bytes).unwrap();
        bytes
    }

    fn kernel_with_file() -> crate::Kernel {
        let fs = MemFs::with_init();
        fs.add_file("/etc/motd", b"hello, world");
        boot_with(fs, crate::config::MAX_TASKS)
    }

    #[test]
    fn open_read_seek_close() {
        let mut kernel = kernel_with_file();
        put(&mut kernel, DATA, b"/etc/motd\0");
        let fd = run_syscall(&mut kernel, SYSCALL_OPEN, [DATA, 0, 0, 0]).eax;
        assert_eq!(fd, 3);

        let buf = DATA + 0x100;
        assert_eq!(run_syscall(&mut kernel, SYSCALL_READ, [fd, buf, 5, 0]).eax, 5);
        assert_eq!(get(&kernel, buf, 5), b"hello");
        assert_eq!(run_syscall(&mut kernel, SYSCALL_SEEK, [fd, (-5isize) as usize, 2, 0]).eax, 7);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_READ, [fd, buf, 64, 0]).eax, 5);
        assert_eq!(get(&kernel, buf, 5), b"world");
        assert_eq!(run_syscall(&mut kernel, SYSCALL_READ, [fd, buf, 64, 0]).eax, 0);

        // 只读打开的文件不能写
        assert_eq!(run_syscall(&mut kernel, SYSCALL_WRITE, [fd, buf, 1, 0]).eax as isize, -9);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_CLOSE, [fd, 0, 0, 0]).eax, 0);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_CLOSE, [fd, 0, 0, 0]).eax as isize, -9);
    }

    #[test]
    fn open_missing_file_and_bad_pointer() {
        let mut kernel = boot();
        put(&mut kernel, DATA, b"/nope\0");
        assert_eq!(run_syscall(&mut kernel, SYSCALL_OPEN, [DATA, 0, 0, 0]).eax as isize, -2);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_OPEN, [0x10, 0, 0, 0]).eax as isize, -14);
        assert_eq!(
            run_syscall(&mut kernel, SYSCALL_READ, [0, 0xC000_0000, 4, 0]).eax as isize,
            -14
        );
    }

    #[test]
    fn create_write_and_unlink() {
        let mut kernel = boot();
        put(&mut kernel, DATA, b"/tmp/log\0abc");
        let flags = (OpenFlags::CREATE | OpenFlags::RDWR).bits() as usize;
        let fd = run_syscall(&mut kernel, SYSCALL_OPEN, [DATA, flags, 0, 0]).eax;
        assert_eq!(run_syscall(&mut kernel, SYSCALL_WRITE, [fd, DATA + 9, 3, 0]).eax, 3);

        let stat = DATA + 0x200;
        assert_eq!(run_syscall(&mut kernel, SYSCALL_FSTAT, [fd, stat, 0, 0]).eax, 0);
        let bytes = get(&kernel, stat, Stat::SIZE);
        assert_eq!(&bytes[8..12], &StatMode::FILE.bits().to_le_bytes());
        assert_eq!(&bytes[16..20], &3u32.to_le_bytes());

        assert_eq!(run_syscall(&mut kernel, SYSCALL_UNLINK, [DATA, 0, 0, 0]).eax, 0);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_OPEN, [DATA, 0, 0, 0]).eax as isize, -2);
    }

    #[test]
    fn dup_and_isatty() {
        let mut kernel = boot();
        assert_eq!(run_syscall(&mut kernel, SYSCALL_ISATTY, [0, 0, 0, 0]).eax, 1);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_ISATTY, [9, 0, 0, 0]).eax as isize, -9);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_IOCTL, [1, 0, 0, 0]).eax, 0);

        run_syscall(&mut kernel, SYSCALL_CLOSE, [0, 0, 0, 0]);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_DUP, [2, 0, 0, 0]).eax, 0);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_ISATTY, [0, 0, 0, 0]).eax, 1);
    }

    #[test]
    fn readdir_lists_entries_then_ends() {
        let mut kernel = kernel_with_file();
        put(&mut kernel, DATA, b"/etc\0");
        let fd = run_syscall(&mut kernel, SYSCALL_OPENDIR, [DATA, 0, 0, 0]).eax;
        let buf = DATA + 0x100;
        assert_eq!(run_syscall(&mut kernel, SYSCALL_READDIR, [fd, buf, 8, 0]).eax as isize, -22);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_READDIR, [fd, buf, 64, 0]).eax, 1);
        let record = get(&kernel, buf, 13);
        assert_eq!(&record[0..4], &12u32.to_le_bytes());
        assert_eq!(&record[4..8], &1u32.to_le_bytes());
        assert_eq!(&record[8..], b"motd\0");
        assert_eq!(run_syscall(&mut kernel, SYSCALL_READDIR, [fd, buf, 64, 0]).eax, 0);
        assert_eq!(run_syscall(&mut kernel, SYSCALL_CLOSEDIR, [fd, 0, 0, 0]).eax, 0);
    }

    #[test]
    fn pending_keystroke_is_read_without_blocking() {
        let mut kernel = boot();
        let init = kernel.tasks.current();
        let keyboard = kernel.devices.get(DeviceId::Keyboard).unwrap();
        // 中断先于读者到达：数据已在缓冲区中
        crate::arch::push_scancode(0x1e);
        keyboard.handle_irq();
        let frame = run_syscall(&mut kernel, SYSCALL_READ, [0, DATA, 4, 0]);
        assert_eq!(frame.eax, 1);
        assert_eq!(get(&kernel, DATA, 1), b"a");
        assert_eq!(kernel.tasks.task(init).status, TaskStatus::Running);

        run_syscall(&mut kernel, SYSCALL_READ, [0, DATA, 4, 0]);
        assert_eq!(
            kernel.tasks.task(init).status,
            TaskStatus::Waiting(WaitReason::Semaphore)
        );
    }
}
