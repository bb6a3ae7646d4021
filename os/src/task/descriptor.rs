//! 任务描述符表
//!
//! 每个任务独占一个描述符槽，其中记录切换到该任务时要装入的内核栈顶和页目录。
//! 槽位数量有界，耗尽时创建任务失败。

use super::SlotPool;
use crate::config::MAX_DESCRIPTORS;
use crate::error::{KernelError, KernelResult};

/// 切换到任务时需要的硬件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// 写入 TSS.esp0 的内核栈顶
    pub kernel_stack_top: usize,
    /// 装入 cr3 的页目录物理地址
    pub page_directory: usize,
}

/// 描述符槽的所有权凭证，不可复制，只能交还给 [`DescriptorTable::free`]
#[derive(Debug, PartialEq, Eq)]
pub struct DescriptorSlot(usize);

impl DescriptorSlot {
    /// 槽位下标
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 有界描述符表
pub struct DescriptorTable {
    pool: SlotPool<TaskDescriptor>,
}

impl DescriptorTable {
    /// 容量为 `MAX_DESCRIPTORS` 的描述符表
    pub fn new() -> Self {
        Self::with_capacity(MAX_DESCRIPTORS)
    }

    /// 指定容量
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: SlotPool::new(capacity),
        }
    }

    /// 占用一个槽位
    pub fn alloc(&mut self, descriptor: TaskDescriptor) -> KernelResult<DescriptorSlot> {
        self.pool
            .insert(descriptor)
            .map(DescriptorSlot)
            .map_err(|_| KernelError::NoDescriptorSlot)
    }

    /// 交还槽位
    pub fn free(&mut self, slot: DescriptorSlot) {
        if self.pool.remove(slot.0).is_none() {
            panic!("descriptor slot {} is not allocated", slot.0);
        }
    }

    /// 槽位内容
    pub fn get(&self, slot: &DescriptorSlot) -> TaskDescriptor {
        match self.pool.get(slot.0) {
            Some(descriptor) => *descriptor,
            None => panic!("descriptor slot {} is not allocated", slot.0),
        }
    }

    /// 更新页目录（exec 换地址空间时）
    pub fn set_page_directory(&mut self, slot: &DescriptorSlot, page_directory: usize) {
        if let Some(descriptor) = self.pool.get_mut(slot.0) {
            descriptor.page_directory = page_directory;
        }
    }

    /// 已占用的槽位数
    pub fn in_use(&self) -> usize {
        self.pool.len()
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}
