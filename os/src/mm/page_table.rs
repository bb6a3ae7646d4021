//! i386 页表项与用户缓冲区

use super::PhysPageNum;
use crate::config::PAGE_SIZE_BITS;
use alloc::vec::Vec;

bitflags! {
    /// 页目录项/页表项标志
    pub struct PTEFlags: u32 {
        const P   = 1 << 0;  // 存在
        const RW  = 1 << 1;  // 可写
        const US  = 1 << 2;  // 用户态可访问
        const PWT = 1 << 3;  // 写透
        const PCD = 1 << 4;  // 禁用缓存
        const A   = 1 << 5;  // 已访问
        const D   = 1 << 6;  // 已修改
        const PS  = 1 << 7;  // 4MiB 大页（仅页目录项）
        const G   = 1 << 8;  // 全局
    }
}

/// 页目录项或页表项
#[derive(Copy, Clone, PartialEq, Eq, Default)]
#[repr(C)]
pub struct PageTableEntry {
    /// 原始位
    pub bits: u32,
}

impl PageTableEntry {
    /// 指向 `ppn` 的表项
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        PageTableEntry {
            bits: ((ppn.0 << PAGE_SIZE_BITS) as u32) | flags.bits(),
        }
    }
    /// 空表项
    pub fn empty() -> Self {
        PageTableEntry { bits: 0 }
    }
    /// 指向的物理页号
    pub fn ppn(&self) -> PhysPageNum {
        PhysPageNum((self.bits >> PAGE_SIZE_BITS) as usize)
    }
    /// 标志位
    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits)
    }
    /// 是否存在
    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::P)
    }
    /// 是否可写
    pub fn writable(&self) -> bool {
        self.flags().contains(PTEFlags::RW)
    }
    /// 用户态是否可访问
    pub fn user(&self) -> bool {
        self.flags().contains(PTEFlags::US)
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("ppn", &self.ppn())
            .field("flags", &self.flags())
            .finish()
    }
}

/// 从用户空间传入内核的缓冲区，可能跨越多个不连续的物理页
pub struct UserBuffer<'a> {
    /// 各个物理上连续的片段
    pub buffers: Vec<&'a mut [u8]>,
}

impl<'a> UserBuffer<'a> {
    /// 由若干片段构造
    pub fn new(buffers: Vec<&'a mut [u8]>) -> Self {
        Self { buffers }
    }

    /// 单个内核缓冲区
    pub fn from_slice(buffer: &'a mut [u8]) -> Self {
        Self {
            buffers: alloc::vec![buffer],
        }
    }

    /// 总长度
    pub fn len(&self) -> usize {
        self.buffers.iter().map(|b| b.len()).sum()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 从 `src` 复制尽可能多的字节，返回复制的字节数
    pub fn copy_from(&mut self, src: &[u8]) -> usize {
        let mut copied = 0;
        for buffer in self.buffers.iter_mut() {
            if copied == src.len() {
                break;
            }
            let n = buffer.len().min(src.len() - copied);
            buffer[..n].copy_from_slice(&src[copied..copied + n]);
            copied += n;
        }
        copied
    }

    /// 把内容依次追加到 `dst`
    pub fn collect_into(&self, dst: &mut Vec<u8>) {
        for buffer in self.buffers.iter() {
            dst.extend_from_slice(buffer);
        }
    }
}

impl<'a> IntoIterator for UserBuffer<'a> {
    type Item = *mut u8;
    type IntoIter = UserBufferIterator<'a>;
    fn into_iter(self) -> Self::IntoIter {
        UserBufferIterator {
            buffers: self.buffers,
            current_buffer: 0,
            current_idx: 0,
        }
    }
}

/// 逐字节遍历 [`UserBuffer`]
pub struct UserBufferIterator<'a> {
    buffers: Vec<&'a mut [u8]>,
    current_buffer: usize,
    current_idx: usize,
}

impl Iterator for UserBufferIterator<'_> {
    type Item = *mut u8;
    fn next(&mut self) -> Option<Self::Item> {
        while self.current_buffer < self.buffers.len()
            && self.current_idx >= self.buffers[self.current_buffer].len()
        {
            self.current_buffer += 1;
            self.current_idx = 0;
        }
        if self.current_buffer >= self.buffers.len() {
            return None;
        }
        let r = &mut self.buffers[self.current_buffer][self.current_idx] as *mut u8;
        self.current_idx += 1;
        Some(r)
    }
}
