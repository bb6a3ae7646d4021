//! 设备接口与设备表
//!
//! 具体的磁盘、TTY 驱动不属于内核核心，核心只通过 [`Device`] 调用它们。
//! 会产生中断的设备各自带一个信号量：读者在数据未到达时在上面阻塞，
//! 中断处理完成后由陷入分发代码 notify。

mod console;

pub use console::{ConsoleDevice, Keyboard};

use crate::arch::{IRQ_DISK, IRQ_KEYBOARD};
use crate::error::KernelResult;
use crate::sync::Semaphore;
use alloc::sync::Arc;

/// 设备编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceId {
    /// 控制台输出
    Console = 0,
    /// 键盘输入
    Keyboard = 1,
    /// 磁盘
    Disk = 2,
}

impl DeviceId {
    const COUNT: usize = 3;

    /// 设备的中断向量
    pub fn irq(&self) -> Option<usize> {
        match self {
            DeviceId::Console => None,
            DeviceId::Keyboard => Some(IRQ_KEYBOARD),
            DeviceId::Disk => Some(IRQ_DISK),
        }
    }

    /// 由中断向量找到设备
    pub fn from_irq(vector: usize) -> Option<Self> {
        match vector {
            IRQ_KEYBOARD => Some(DeviceId::Keyboard),
            IRQ_DISK => Some(DeviceId::Disk),
            _ => None,
        }
    }
}

/// 字节设备
pub trait Device: Send + Sync {
    /// 从 `addr` 处读取，返回读到的字节数；没有数据时返回 0
    fn read(&self, addr: usize, buf: &mut [u8]) -> KernelResult<usize>;

    /// 向 `addr` 处写入，返回写入的字节数
    fn write(&self, addr: usize, buf: &[u8]) -> KernelResult<usize>;

    /// 处理设备中断
    fn handle_irq(&self) {}
}

struct DeviceSlot {
    device: Arc<dyn Device>,
    semaphore: Semaphore,
}

/// 已注册的设备
pub struct DeviceTable {
    slots: [Option<DeviceSlot>; DeviceId::COUNT],
}

impl DeviceTable {
    /// 空设备表
    pub fn new() -> Self {
        Self {
            slots: [None, None, None],
        }
    }

    /// 注册设备，替换同编号的旧设备
    pub fn register(&mut self, id: DeviceId, device: Arc<dyn Device>) {
        info!("[kernel] register device {:?}", id);
        self.slots[id as usize] = Some(DeviceSlot {
            device,
            semaphore: Semaphore::new(0),
        });
    }

    /// 查找设备
    pub fn get(&self, id: DeviceId) -> Option<Arc<dyn Device>> {
        self.slots[id as usize].as_ref().map(|slot| slot.device.clone())
    }

    /// 设备的中断信号量
    pub fn semaphore_mut(&mut self, id: DeviceId) -> Option<&mut Semaphore> {
        self.slots[id as usize].as_mut().map(|slot| &mut slot.semaphore)
    }

    /// 把中断交给对应设备处理，返回设备编号
    pub fn handle_irq(&mut self, vector: usize) -> Option<DeviceId> {
        let id = DeviceId::from_irq(vector)?;
        match self.slots[id as usize].as_ref() {
            Some(slot) => {
                slot.device.handle_irq();
                Some(id)
            }
            None => {
                warn!("[kernel] interrupt {} from unregistered device {:?}", vector, id);
                None
            }
        }
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}
