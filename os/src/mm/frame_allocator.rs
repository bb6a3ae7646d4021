//! 物理页帧分配器
//!
//! 一段连续的物理内存，每页对应位图中的一位，置位表示该页恰好被一个使用者占有。
//! 分配采用 next-fit：从上次分配结束的位置开始寻找足够长的连续空闲区间。
//! 分配器不知道页帧的主人，也不负责清零（[`FrameAllocator::alloc_zeroed`] 除外）。

use super::{PageTableEntry, PhysAddr, PhysPageNum};
use crate::config::{PAGE_SIZE, PTE_PER_PAGE};
use crate::error::{KernelError, KernelResult};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::{self, Debug, Formatter};

/// 物理内存窗口：内核通过 `物理地址 + offset` 访问任意受管理的物理页
///
/// 裸机上所有物理内存都被 1:1 映射在共享区，`offset` 为 0。
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PhysWindow {
    offset: usize,
}

impl PhysWindow {
    /// 1:1 映射
    pub const IDENTITY: Self = Self { offset: 0 };

    /// 以给定偏移创建窗口
    pub const fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// 物理地址在内核中的指针
    pub fn ptr(&self, pa: PhysAddr) -> *mut u8 {
        pa.0.wrapping_add(self.offset) as *mut u8
    }

    /// 一整页的字节
    pub fn page_bytes(&self, ppn: PhysPageNum) -> &'static mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr(ppn.into()), PAGE_SIZE) }
    }

    /// 把一页解释为页目录或页表
    pub fn pte_array(&self, ppn: PhysPageNum) -> &'static mut [PageTableEntry] {
        unsafe {
            core::slice::from_raw_parts_mut(self.ptr(ppn.into()) as *mut PageTableEntry, PTE_PER_PAGE)
        }
    }
}

impl Debug for PhysWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PhysWindow(+{:#x})", self.offset))
    }
}

/// 位图式物理页帧分配器
pub struct FrameAllocator {
    base: PhysPageNum,    // 第一页
    total: usize,         // 总页数
    bitmap: Vec<u64>,     // 占用位图
    cursor: usize,        // next-fit 起点
    used: usize,          // 已占用页数
    window: PhysWindow,
}

impl FrameAllocator {
    /// 管理 `[start, end)` 中所有完整的页
    pub fn new(start: PhysAddr, end: PhysAddr, window: PhysWindow) -> Self {
        let base = start.ceil();
        let total = end.floor().0.saturating_sub(base.0);
        trace!("frame allocator: {:?} + {} frames", base, total);
        Self {
            base,
            total,
            bitmap: vec![0; (total + 63) / 64],
            cursor: 0,
            used: 0,
            window,
        }
    }

    /// 物理内存窗口
    pub fn window(&self) -> PhysWindow {
        self.window
    }

    /// 总页数
    pub fn total_frames(&self) -> usize {
        self.total
    }

    /// 空闲页数
    pub fn free_frames(&self) -> usize {
        self.total - self.used
    }

    fn test(&self, bit: usize) -> bool {
        self.bitmap[bit / 64] & (1 << (bit % 64)) != 0
    }

    fn set(&mut self, bit: usize, value: bool) {
        if value {
            self.bitmap[bit / 64] |= 1 << (bit % 64);
        } else {
            self.bitmap[bit / 64] &= !(1 << (bit % 64));
        }
    }

    /// `ppn` 是否已被分配
    pub fn is_allocated(&self, ppn: PhysPageNum) -> bool {
        ppn.0 >= self.base.0 && ppn.0 - self.base.0 < self.total && self.test(ppn.0 - self.base.0)
    }

    /// 在 `[from, to)` 中找长度为 `count` 的连续空闲位
    fn find_run(&self, from: usize, to: usize, count: usize) -> Option<usize> {
        let mut start = from;
        let mut len = 0;
        for bit in from..to {
            if self.test(bit) {
                start = bit + 1;
                len = 0;
            } else {
                len += 1;
                if len == count {
                    return Some(start);
                }
            }
        }
        None
    }

    /// 分配 `count` 个物理上连续的页帧，内容未定义
    pub fn alloc(&mut self, count: usize) -> KernelResult<PhysPageNum> {
        assert!(count > 0, "alloc zero frames");
        if count > self.free_frames() {
            return Err(KernelError::OutOfFrames);
        }
        let start = self
            .find_run(self.cursor, self.total, count)
            .or_else(|| self.find_run(0, (self.cursor + count - 1).min(self.total), count))
            .ok_or(KernelError::OutOfFrames)?;
        for bit in start..start + count {
            self.set(bit, true);
        }
        self.used += count;
        self.cursor = (start + count) % self.total.max(1);
        Ok(PhysPageNum(self.base.0 + start))
    }

    /// 分配并清零
    pub fn alloc_zeroed(&mut self, count: usize) -> KernelResult<PhysPageNum> {
        let ppn = self.alloc(count)?;
        for i in 0..count {
            self.window.page_bytes(PhysPageNum(ppn.0 + i)).fill(0);
        }
        Ok(ppn)
    }

    /// 释放从 `ppn` 开始的 `count` 个页帧，重复释放视为致命错误
    pub fn free(&mut self, ppn: PhysPageNum, count: usize) {
        assert!(
            ppn.0 >= self.base.0 && ppn.0 + count <= self.base.0 + self.total,
            "frame {:?} out of range",
            ppn
        );
        let start = ppn.0 - self.base.0;
        for bit in start..start + count {
            if !self.test(bit) {
                panic!("Frame ppn={:#x} has not been allocated!", self.base.0 + bit);
            }
            self.set(bit, false);
        }
        self.used -= count;
    }
}

impl Debug for FrameAllocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "FrameAllocator:{:?}+{} used={}",
            self.base, self.total, self.used
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SimulatedRam;
    use proptest::prelude::*;

    fn allocator(frames: usize) -> (SimulatedRam, FrameAllocator) {
        let ram = SimulatedRam::new(frames * PAGE_SIZE);
        let frames = FrameAllocator::new(ram.start(), ram.end(), ram.window());
        (ram, frames)
    }

    #[test]
    fn next_fit_and_wrap_around() {
        let (_ram, mut frames) = allocator(8);
        let a = frames.alloc(3).unwrap();
        let b = frames.alloc(3).unwrap();
        assert_eq!(b.0, a.0 + 3);
        frames.free(a, 3);
        // 游标在 6，剩余的 2 页不够，回绕到开头
        let c = frames.alloc(3).unwrap();
        assert_eq!(c, a);
        assert_eq!(frames.free_frames(), 2);
        assert_eq!(frames.alloc(3), Err(KernelError::OutOfFrames));
        let d = frames.alloc(2).unwrap();
        assert_eq!(d.0, b.0 + 3);
        assert_eq!(frames.free_frames(), 0);
    }

    #[test]
    fn fragmented_pool_reports_out_of_frames() {
        let (_ram, mut frames) = allocator(4);
        let pages: Vec<_> = (0..4).map(|_| frames.alloc(1).unwrap()).collect();
        frames.free(pages[0], 1);
        frames.free(pages[2], 1);
        assert_eq!(frames.free_frames(), 2);
        assert_eq!(frames.alloc(2), Err(KernelError::OutOfFrames));
        assert!(frames.alloc(1).is_ok());
    }

    #[test]
    fn zeroed_frames_are_clean() {
        let (_ram, mut frames) = allocator(2);
        let ppn = frames.alloc(1).unwrap();
        frames.window().page_bytes(ppn).fill(0xAA);
        frames.free(ppn, 1);
        let again = frames.alloc_zeroed(2).unwrap();
        assert!(frames.window().page_bytes(ppn).iter().all(|b| *b == 0));
        assert!(frames.is_allocated(again));
    }

    #[test]
    #[should_panic(expected = "has not been allocated")]
    fn double_free_is_fatal() {
        let (_ram, mut frames) = allocator(2);
        let ppn = frames.alloc(1).unwrap();
        frames.free(ppn, 1);
        frames.free(ppn, 1);
    }

    proptest! {
        #[test]
        fn bits_track_ownership(ops in proptest::collection::vec((1usize..4, any::<bool>()), 1..64)) {
            let (_ram, mut frames) = allocator(32);
            let mut owned: Vec<(PhysPageNum, usize)> = Vec::new();
            for (count, free_first) in ops {
                if free_first && !owned.is_empty() {
                    let (ppn, n) = owned.remove(0);
                    frames.free(ppn, n);
                }
                if let Ok(ppn) = frames.alloc(count) {
                    // 新分配的区间不能与任何已持有的区间重叠
                    for (other, n) in owned.iter() {
                        prop_assert!(ppn.0 + count <= other.0 || other.0 + n <= ppn.0);
                    }
                    owned.push((ppn, count));
                }
                let held: usize = owned.iter().map(|(_, n)| n).sum();
                prop_assert_eq!(frames.free_frames(), 32 - held);
            }
        }
    }
}
