//! 内存管理
//!
//! i386 两级页表：物理页帧分配器、页表项、每个任务的地址空间以及访问用户内存的辅助函数。
//! 所有物理内存通过 [`PhysWindow`] 访问。

mod address;
mod address_space;
mod frame_allocator;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod heap_allocator;
mod page_table;

pub use address::{pages_covering, vpn_range, PhysAddr, PhysPageNum, VPNRange, VirtAddr, VirtPageNum};
pub use address_space::{AddressSpace, PRIVATE_DIR_START};
pub use frame_allocator::{FrameAllocator, PhysWindow};
pub use page_table::{PTEFlags, PageTableEntry, UserBuffer, UserBufferIterator};
