//! Stdin & Stdout
use super::{File, Stat, StatMode};
use crate::drivers::{Device, DeviceId};
use crate::error::{KernelError, KernelResult};
use crate::mm::UserBuffer;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// 从键盘读取字符的 stdin 文件
pub struct Stdin {
    device: Arc<dyn Device>,
    id: DeviceId,
}

/// 向控制台输出字符的 stdout 文件
pub struct Stdout {
    device: Arc<dyn Device>,
}

impl Stdin {
    /// 以设备 `id` 为输入源
    pub fn new(id: DeviceId, device: Arc<dyn Device>) -> Self {
        Self { device, id }
    }
}

impl Stdout {
    /// 以 `device` 为输出目标
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self { device }
    }
}

impl File for Stdin {
    fn readable(&self) -> bool {
        true
    }

    fn writable(&self) -> bool {
        false
    }

    // 没有输入时交给调用者在设备信号量上等待
    fn read(&self, mut user_buf: UserBuffer<'_>) -> KernelResult<usize> {
        if user_buf.is_empty() {
            return Ok(0);
        }
        let mut data = alloc::vec![0u8; user_buf.len()];
        match self.device.read(0, &mut data)? {
            0 => Err(KernelError::WouldBlock(self.id)),
            len => Ok(user_buf.copy_from(&data[..len])),
        }
    }

    fn write(&self, _user_buf: UserBuffer<'_>) -> KernelResult<usize> {
        Err(KernelError::BadFd)
    }

    fn stat(&self) -> KernelResult<Stat> {
        Ok(Stat::new(self.id as u32, 0, StatMode::CHAR, 0))
    }

    fn is_tty(&self) -> bool {
        true
    }

    fn ioctl(&self, _request: usize, _arg: usize) -> KernelResult<usize> {
        Ok(0)
    }
}

impl File for Stdout {
    fn readable(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        true
    }

    fn read(&self, _user_buf: UserBuffer<'_>) -> KernelResult<usize> {
        Err(KernelError::BadFd)
    }

    fn write(&self, user_buf: UserBuffer<'_>) -> KernelResult<usize> {
        let mut data = Vec::with_capacity(user_buf.len());
        user_buf.collect_into(&mut data);
        self.device.write(0, &data)
    }

    fn stat(&self) -> KernelResult<Stat> {
        Ok(Stat::new(DeviceId::Console as u32, 0, StatMode::CHAR, 0))
    }

    fn is_tty(&self) -> bool {
        true
    }

    fn ioctl(&self, _request: usize, _arg: usize) -> KernelResult<usize> {
        Ok(0)
    }
}
