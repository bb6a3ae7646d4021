//! 32 位物理/虚拟地址与页号
//!
//! 两级页表下虚拟页号的高 10 位索引页目录，低 10 位索引页表。
use crate::config::{PAGE_SIZE, PAGE_SIZE_BITS, PTE_PER_PAGE, USER_BASE};
use core::fmt::{self, Debug, Formatter};
use core::iter::Map;
use core::ops::Range;

/// 物理地址
#[repr(C)]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub struct PhysAddr(pub usize);

/// 虚拟地址
#[repr(C)]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub struct VirtAddr(pub usize);

/// 物理页号
#[repr(C)]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub struct PhysPageNum(pub usize);

/// 虚拟页号
#[repr(C)]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub struct VirtPageNum(pub usize);

macro_rules! impl_address {
    ($($ty:ident => $tag:literal),+ $(,)?) => {$(
        impl Debug for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_fmt(format_args!(concat!($tag, ":{:#x}"), self.0))
            }
        }
        impl From<usize> for $ty {
            fn from(v: usize) -> Self {
                Self(v)
            }
        }
        impl From<$ty> for usize {
            fn from(v: $ty) -> Self {
                v.0
            }
        }
    )+};
}

impl_address!(PhysAddr => "PA", VirtAddr => "VA", PhysPageNum => "PPN", VirtPageNum => "VPN");

impl VirtAddr {
    /// 所在页（下取整）
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 >> PAGE_SIZE_BITS)
    }
    /// 覆盖该地址之前所有字节所需的页数（上取整）
    pub fn ceil(&self) -> VirtPageNum {
        VirtPageNum((self.0 >> PAGE_SIZE_BITS) + (self.page_offset() != 0) as usize)
    }
    /// 页内偏移
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
    /// 是否页对齐
    pub fn aligned(&self) -> bool {
        self.page_offset() == 0
    }
    /// 是否位于私有（用户）区域
    pub fn is_private(&self) -> bool {
        self.0 >= USER_BASE
    }
}

impl PhysAddr {
    /// 所在页（下取整）
    pub fn floor(&self) -> PhysPageNum {
        PhysPageNum(self.0 >> PAGE_SIZE_BITS)
    }
    /// 上取整到页
    pub fn ceil(&self) -> PhysPageNum {
        PhysPageNum((self.0 >> PAGE_SIZE_BITS) + (self.page_offset() != 0) as usize)
    }
    /// 页内偏移
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl From<VirtPageNum> for VirtAddr {
    fn from(v: VirtPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

impl From<PhysPageNum> for PhysAddr {
    fn from(v: PhysPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

impl VirtPageNum {
    /// 页目录与页表中的下标 `[目录, 页表]`
    pub fn indexes(&self) -> [usize; 2] {
        [(self.0 >> 10) & (PTE_PER_PAGE - 1), self.0 & (PTE_PER_PAGE - 1)]
    }
    /// 由页目录下标和页表下标合成虚拟页号
    pub fn from_indexes(dir: usize, table: usize) -> Self {
        Self(dir << 10 | table)
    }
}

/// 左闭右开的虚拟页号区间
pub type VPNRange = Map<Range<usize>, fn(usize) -> VirtPageNum>;

/// 构造 `[start, end)` 的虚拟页号区间
pub fn vpn_range(start: VirtPageNum, end: VirtPageNum) -> VPNRange {
    assert!(start <= end, "start {:?} > end {:?}!", start, end);
    (start.0..end.0).map(VirtPageNum as fn(usize) -> VirtPageNum)
}

/// 覆盖 `[va, va + len)` 的所有虚拟页
pub fn pages_covering(va: VirtAddr, len: usize) -> VPNRange {
    vpn_range(va.floor(), VirtAddr(va.0 + len).ceil())
}
