//! 内核错误类型
//!
//! 内核内部统一使用 [`KernelError`] 传播可恢复的错误，
//! 到系统调用边界再通过 [`KernelError::errno`] 转换为负数返回值。

use crate::drivers::DeviceId;
use thiserror::Error;

/// 不会返回给用户态的内部值：系统调用需要在任务被唤醒后重新执行
pub const ERESTART: isize = -512;

/// 可恢复的内核错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    /// 没有空闲的物理页帧
    #[error("out of physical frames")]
    OutOfFrames,
    /// 没有空闲的任务描述符槽
    #[error("descriptor table exhausted")]
    NoDescriptorSlot,
    /// 没有空闲的任务槽
    #[error("task table exhausted")]
    NoTaskSlot,
    /// 文件描述符表已满
    #[error("no free file descriptor")]
    NoFreeFd,
    /// 互斥锁/信号量表已满
    #[error("no free synchronization object")]
    NoSyncSlot,
    /// 无效的文件描述符
    #[error("bad file descriptor")]
    BadFd,
    /// 无效参数
    #[error("invalid argument")]
    InvalidArgument,
    /// 用户地址未映射或越界
    #[error("bad user address {0:#x}")]
    BadAddress(usize),
    /// 文件或目录不存在
    #[error("no such file or directory")]
    NotFound,
    /// 不是合法的可执行文件
    #[error("invalid executable: {0}")]
    BadExecutable(&'static str),
    /// 不存在的设备
    #[error("no such device")]
    NoDevice,
    /// 不是终端
    #[error("not a tty")]
    NotTty,
    /// 设备/文件读写失败
    #[error("i/o error")]
    Io,
    /// 未实现的系统调用
    #[error("unsupported syscall {0}")]
    NoSys(usize),
    /// 资源暂不可用，需要等待设备
    #[error("would block on {0:?}")]
    WouldBlock(DeviceId),
    /// 任务已阻塞，唤醒后重新执行系统调用
    #[error("restart syscall")]
    Restart,
}

impl KernelError {
    /// 转换为系统调用返回给用户态的负数错误码
    pub fn errno(&self) -> isize {
        match self {
            KernelError::NotFound => -2,
            KernelError::Io => -5,
            KernelError::BadExecutable(_) => -8,
            KernelError::BadFd => -9,
            KernelError::NoDescriptorSlot | KernelError::NoTaskSlot | KernelError::NoSyncSlot => -11,
            KernelError::OutOfFrames => -12,
            KernelError::BadAddress(_) => -14,
            KernelError::NoDevice => -19,
            KernelError::InvalidArgument => -22,
            KernelError::NoFreeFd => -24,
            KernelError::NotTty => -25,
            KernelError::NoSys(_) => -38,
            KernelError::WouldBlock(_) | KernelError::Restart => ERESTART,
        }
    }
}

/// 内核结果类型
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_are_negative() {
        let all = [
            KernelError::OutOfFrames,
            KernelError::NoDescriptorSlot,
            KernelError::NoTaskSlot,
            KernelError::NoFreeFd,
            KernelError::BadFd,
            KernelError::InvalidArgument,
            KernelError::BadAddress(0),
            KernelError::NotFound,
            KernelError::BadExecutable("magic"),
            KernelError::NoDevice,
            KernelError::NotTty,
            KernelError::Io,
            KernelError::NoSys(99),
        ];
        for e in all {
            assert!(e.errno() < 0, "{:?}", e);
            assert_ne!(e.errno(), ERESTART);
        }
        assert_eq!(KernelError::Restart.errno(), ERESTART);
    }
}
