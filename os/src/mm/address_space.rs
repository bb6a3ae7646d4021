//! 两级页表地址空间
//!
//! 页目录中低于 [`USER_BASE`] 的表项在所有地址空间中完全相同（共享的内核映射），
//! 之上的部分是每个任务私有的。私有区中每个存在的页都独占一个物理页帧，
//! 因此 [`AddressSpace::destroy`] 可以无条件地回收它们。

use super::{
    pages_covering, vpn_range, FrameAllocator, PTEFlags, PageTableEntry, PhysAddr, PhysPageNum,
    PhysWindow, VirtAddr, VirtPageNum,
};
use crate::arch;
use crate::config::{PAGE_SIZE, PTE_PER_PAGE, USER_BASE};
use crate::error::{KernelError, KernelResult};
use alloc::string::String;
use alloc::vec::Vec;

/// 第一个私有页目录项的下标
pub const PRIVATE_DIR_START: usize = USER_BASE >> 22;

/// 一个页目录及其引用的页表
pub struct AddressSpace {
    root: PhysPageNum,
    window: PhysWindow,
}

impl AddressSpace {
    /// 只有一个空页目录的地址空间（用于构建共享映射模板）
    pub fn new_bare(frames: &mut FrameAllocator) -> KernelResult<Self> {
        let root = frames.alloc_zeroed(1)?;
        Ok(Self {
            root,
            window: frames.window(),
        })
    }

    /// 新地址空间，共享区复制自 `template`，私有区为空
    pub fn new(frames: &mut FrameAllocator, template: &AddressSpace) -> KernelResult<Self> {
        let space = Self::new_bare(frames)?;
        let shared = &template.directory()[..PRIVATE_DIR_START];
        space.directory()[..PRIVATE_DIR_START].copy_from_slice(shared);
        Ok(space)
    }

    /// 页目录所在的物理页
    pub fn root(&self) -> PhysPageNum {
        self.root
    }

    /// 装入 cr3 的值
    pub fn token(&self) -> usize {
        PhysAddr::from(self.root).0
    }

    /// 物理内存窗口
    pub fn window(&self) -> PhysWindow {
        self.window
    }

    fn directory(&self) -> &'static mut [PageTableEntry] {
        self.window.pte_array(self.root)
    }

    /// 切换到该地址空间
    pub fn activate(&self) {
        arch::load_page_directory(self.token());
    }

    fn find_pte(&self, vpn: VirtPageNum) -> Option<&'static mut PageTableEntry> {
        let [dir, table] = vpn.indexes();
        let pde = self.directory()[dir];
        if !pde.is_valid() {
            return None;
        }
        Some(&mut self.window.pte_array(pde.ppn())[table])
    }

    /// 找到 `vpn` 对应的页表项，必要时分配页表；新页表记录在 `created` 中以便回滚
    fn find_pte_create(
        &mut self,
        frames: &mut FrameAllocator,
        vpn: VirtPageNum,
        created: &mut Vec<usize>,
    ) -> KernelResult<&'static mut PageTableEntry> {
        let [dir, table] = vpn.indexes();
        let pde = &mut self.directory()[dir];
        if !pde.is_valid() {
            let frame = frames.alloc_zeroed(1)?;
            // 页目录项放宽权限，实际权限由页表项决定
            let mut flags = PTEFlags::P | PTEFlags::RW;
            if dir >= PRIVATE_DIR_START {
                flags |= PTEFlags::US;
            }
            *pde = PageTableEntry::new(frame, flags);
            created.push(dir);
        }
        Ok(&mut self.window.pte_array(pde.ppn())[table])
    }

    /// 撤销一次未完成的映射：清掉已写入的页表项，释放新建的页表
    fn rollback(&mut self, frames: &mut FrameAllocator, mapped: &[(VirtPageNum, bool)], created: &[usize]) {
        for (vpn, owned) in mapped.iter().rev() {
            if let Some(pte) = self.find_pte(*vpn) {
                if *owned {
                    frames.free(pte.ppn(), 1);
                }
                *pte = PageTableEntry::empty();
            }
        }
        for dir in created.iter().rev() {
            let pde = &mut self.directory()[*dir];
            frames.free(pde.ppn(), 1);
            *pde = PageTableEntry::empty();
        }
    }

    /// 把 `[va, va + count * PAGE_SIZE)` 映射到 `[pa, ...)`
    ///
    /// 需要新页表而物理页帧不足时撤销本次调用所做的全部修改，返回 `OutOfFrames`。
    pub fn map(
        &mut self,
        frames: &mut FrameAllocator,
        va: VirtAddr,
        pa: PhysAddr,
        count: usize,
        flags: PTEFlags,
    ) -> KernelResult<()> {
        assert!(va.aligned() && pa.page_offset() == 0, "unaligned map {:?} -> {:?}", va, pa);
        let mut created = Vec::new();
        let mut mapped = Vec::new();
        for i in 0..count {
            let vpn = VirtPageNum(va.floor().0 + i);
            match self.find_pte_create(frames, vpn, &mut created) {
                Ok(pte) => {
                    assert!(!pte.is_valid(), "vpn {:?} is mapped before mapping", vpn);
                    *pte = PageTableEntry::new(PhysPageNum(pa.floor().0 + i), flags | PTEFlags::P);
                    mapped.push((vpn, false));
                }
                Err(e) => {
                    self.rollback(frames, &mapped, &created);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// 为 `[va, va + count * PAGE_SIZE)` 分配清零的新页帧并映射
    ///
    /// 已经存在的页保留原内容，只补充权限。失败时回滚本次调用新分配的页帧与页表。
    pub fn map_framed(
        &mut self,
        frames: &mut FrameAllocator,
        va: VirtAddr,
        count: usize,
        flags: PTEFlags,
    ) -> KernelResult<()> {
        assert!(va.aligned(), "unaligned map {:?}", va);
        let mut created = Vec::new();
        let mut mapped = Vec::new();
        for i in 0..count {
            let vpn = VirtPageNum(va.floor().0 + i);
            let result = self
                .find_pte_create(frames, vpn, &mut created)
                .and_then(|pte| {
                    if pte.is_valid() {
                        *pte = PageTableEntry::new(pte.ppn(), pte.flags() | flags);
                        Ok(false)
                    } else {
                        let frame = frames.alloc_zeroed(1)?;
                        *pte = PageTableEntry::new(frame, flags | PTEFlags::P);
                        Ok(true)
                    }
                });
            match result {
                Ok(true) => mapped.push((vpn, true)),
                Ok(false) => {}
                Err(e) => {
                    self.rollback(frames, &mapped, &created);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// 取消 `[va, va + count * PAGE_SIZE)` 的映射，`free_frames` 为真时回收页帧
    pub fn unmap(&mut self, frames: &mut FrameAllocator, va: VirtAddr, count: usize, free_frames: bool) {
        for vpn in vpn_range(va.floor(), VirtPageNum(va.floor().0 + count)) {
            if let Some(pte) = self.find_pte(vpn).filter(|pte| pte.is_valid()) {
                if free_frames {
                    frames.free(pte.ppn(), 1);
                }
                *pte = PageTableEntry::empty();
            }
        }
    }

    /// 页表项
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.find_pte(vpn).map(|pte| *pte).filter(|pte| pte.is_valid())
    }

    /// 虚拟地址到物理地址
    pub fn resolve(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.translate(va.floor())
            .map(|pte| PhysAddr(PhysAddr::from(pte.ppn()).0 + va.page_offset()))
    }

    /// 复制出一个新地址空间：共享区相同，私有区逐页做物理拷贝
    pub fn copy(&self, frames: &mut FrameAllocator, template: &AddressSpace) -> KernelResult<AddressSpace> {
        let mut child = AddressSpace::new(frames, template)?;
        for dir in PRIVATE_DIR_START..PTE_PER_PAGE {
            let pde = self.directory()[dir];
            if !pde.is_valid() {
                continue;
            }
            for (table, pte) in self.window.pte_array(pde.ppn()).iter().enumerate() {
                if !pte.is_valid() {
                    continue;
                }
                let vpn = VirtPageNum::from_indexes(dir, table);
                if let Err(e) = child.map_framed(frames, vpn.into(), 1, pte.flags()) {
                    child.destroy(frames);
                    return Err(e);
                }
                let dst = child.translate(vpn).map(|p| p.ppn());
                if let Some(dst) = dst {
                    self.window
                        .page_bytes(dst)
                        .copy_from_slice(self.window.page_bytes(pte.ppn()));
                }
            }
        }
        Ok(child)
    }

    /// 回收私有区所有页帧、页表以及页目录本身，共享区不动
    pub fn destroy(self, frames: &mut FrameAllocator) {
        let directory = self.directory();
        for pde in directory[PRIVATE_DIR_START..].iter_mut() {
            if !pde.is_valid() {
                continue;
            }
            for pte in self.window.pte_array(pde.ppn()).iter().filter(|pte| pte.is_valid()) {
                frames.free(pte.ppn(), 1);
            }
            frames.free(pde.ppn(), 1);
            *pde = PageTableEntry::empty();
        }
        frames.free(self.root, 1);
    }

    /// 私有区中存在的页数
    pub fn private_pages(&self) -> usize {
        self.directory()[PRIVATE_DIR_START..]
            .iter()
            .filter(|pde| pde.is_valid())
            .map(|pde| {
                self.window
                    .pte_array(pde.ppn())
                    .iter()
                    .filter(|pte| pte.is_valid())
                    .count()
            })
            .sum()
    }

    /// 共享区的页目录项
    pub fn shared_entries(&self) -> &[PageTableEntry] {
        &self.directory()[..PRIVATE_DIR_START]
    }

    /// 把用户缓冲区 `[ptr, ptr + len)` 翻译为若干内核可访问的片段
    ///
    /// 每一页都必须存在且用户可访问，`write` 时还要求可写。
    pub fn translated_byte_buffer(&self, ptr: usize, len: usize, write: bool) -> KernelResult<Vec<&'static mut [u8]>> {
        let end = ptr.checked_add(len).ok_or(KernelError::BadAddress(ptr))?;
        if ptr < USER_BASE {
            return Err(KernelError::BadAddress(ptr));
        }
        let mut buffers = Vec::new();
        let mut start = ptr;
        while start < end {
            let vpn = VirtAddr(start).floor();
            let pte = self
                .translate(vpn)
                .filter(|pte| pte.user() && (!write || pte.writable()))
                .ok_or(KernelError::BadAddress(start))?;
            let page_end = VirtAddr::from(VirtPageNum(vpn.0 + 1)).0.min(end);
            let offset = VirtAddr(start).page_offset();
            let bytes = self.window.page_bytes(pte.ppn());
            buffers.push(&mut bytes[offset..offset + (page_end - start)]);
            start = page_end;
        }
        Ok(buffers)
    }

    /// 读取以 `\0` 结尾的用户字符串，最长 `max` 字节
    pub fn read_cstr(&self, ptr: usize, max: usize) -> KernelResult<String> {
        let mut bytes = Vec::new();
        let mut va = ptr;
        loop {
            let chunk = PAGE_SIZE - VirtAddr(va).page_offset();
            let buffers = self.translated_byte_buffer(va, chunk, false)?;
            for &b in buffers.iter().flat_map(|b| b.iter()) {
                if b == 0 {
                    return String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument);
                }
                if bytes.len() == max {
                    return Err(KernelError::InvalidArgument);
                }
                bytes.push(b);
            }
            va += chunk;
        }
    }

    /// 读取用户空间的 32 位字
    pub fn read_u32(&self, va: usize) -> KernelResult<u32> {
        let mut word = [0u8; 4];
        self.copy_from_user(va, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// 写入用户空间的 32 位字
    pub fn write_u32(&self, va: usize, value: u32) -> KernelResult<()> {
        self.copy_to_user(va, &value.to_le_bytes())
    }

    /// 从用户空间复制
    pub fn copy_from_user(&self, va: usize, dst: &mut [u8]) -> KernelResult<()> {
        let mut copied = 0;
        for buffer in self.translated_byte_buffer(va, dst.len(), false)? {
            dst[copied..copied + buffer.len()].copy_from_slice(buffer);
            copied += buffer.len();
        }
        Ok(())
    }

    /// 复制到用户空间
    ///
    /// 只检查页存在且用户可访问，内核装载只读段时也走这里。
    pub fn copy_to_user(&self, va: usize, src: &[u8]) -> KernelResult<()> {
        let mut copied = 0;
        for buffer in self.translated_byte_buffer(va, src.len(), false)? {
            let n = buffer.len();
            buffer.copy_from_slice(&src[copied..copied + n]);
            copied += n;
        }
        Ok(())
    }

    /// 用户区间 `[va, va + len)` 覆盖的页是否全部存在
    pub fn is_mapped(&self, va: usize, len: usize) -> bool {
        pages_covering(VirtAddr(va), len).all(|vpn| self.translate(vpn).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SimulatedRam;

    const USER_RW: PTEFlags = PTEFlags::from_bits_truncate(0b111);

    fn setup(frames: usize) -> (SimulatedRam, FrameAllocator, AddressSpace) {
        let ram = SimulatedRam::new(frames * PAGE_SIZE);
        let mut allocator = FrameAllocator::new(ram.start(), ram.end(), ram.window());
        let mut template = AddressSpace::new_bare(&mut allocator).unwrap();
        template
            .map(&mut allocator, VirtAddr(0x1000), PhysAddr(0x1000), 4, PTEFlags::RW)
            .unwrap();
        (ram, allocator, template)
    }

    #[test]
    fn new_space_shares_kernel_entries() {
        let (_ram, mut frames, template) = setup(16);
        let space = AddressSpace::new(&mut frames, &template).unwrap();
        assert_eq!(space.shared_entries(), template.shared_entries());
        assert_eq!(space.resolve(VirtAddr(0x2345)), Some(PhysAddr(0x2345)));
        assert_eq!(space.private_pages(), 0);
    }

    #[test]
    fn map_resolve_unmap() {
        let (_ram, mut frames, template) = setup(16);
        let mut space = AddressSpace::new(&mut frames, &template).unwrap();
        let free = frames.free_frames();
        space
            .map_framed(&mut frames, VirtAddr(USER_BASE), 2, USER_RW)
            .unwrap();
        // 一张页表 + 两个页帧
        assert_eq!(frames.free_frames(), free - 3);
        assert!(space.resolve(VirtAddr(USER_BASE + 0x10)).is_some());
        assert!(space.resolve(VirtAddr(USER_BASE + 2 * PAGE_SIZE)).is_none());

        space.unmap(&mut frames, VirtAddr(USER_BASE), 2, true);
        assert!(space.resolve(VirtAddr(USER_BASE)).is_none());
        assert_eq!(frames.free_frames(), free - 1);
    }

    #[test]
    fn failed_map_leaves_no_trace() {
        let (_ram, mut frames, template) = setup(8);
        let mut space = AddressSpace::new(&mut frames, &template).unwrap();
        let free = frames.free_frames();
        // 需要的页帧比剩余的多
        let result = space.map_framed(&mut frames, VirtAddr(USER_BASE), free + 1, USER_RW);
        assert_eq!(result, Err(KernelError::OutOfFrames));
        assert_eq!(frames.free_frames(), free);
        assert_eq!(space.private_pages(), 0);
        assert!(space.resolve(VirtAddr(USER_BASE)).is_none());
    }

    #[test]
    fn explicit_map_rolls_back_new_table() {
        let (_ram, mut frames, template) = setup(8);
        let mut space = AddressSpace::new(&mut frames, &template).unwrap();
        while frames.free_frames() > 0 {
            frames.alloc(1).unwrap();
        }
        let result = space.map(&mut frames, VirtAddr(USER_BASE), PhysAddr(0x1000), 1, USER_RW);
        assert_eq!(result, Err(KernelError::OutOfFrames));
        assert!(space.translate(VirtAddr(USER_BASE).floor()).is_none());
    }

    #[test]
    fn copy_is_a_physical_duplicate() {
        let (_ram, mut frames, template) = setup(32);
        let mut parent = AddressSpace::new(&mut frames, &template).unwrap();
        parent
            .map_framed(&mut frames, VirtAddr(USER_BASE), 1, USER_RW)
            .unwrap();
        parent.copy_to_user(USER_BASE, b"parent").unwrap();

        let child = parent.copy(&mut frames, &template).unwrap();
        assert_ne!(parent.resolve(VirtAddr(USER_BASE)), child.resolve(VirtAddr(USER_BASE)));
        let mut buf = [0u8; 6];
        child.copy_from_user(USER_BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");

        child.copy_to_user(USER_BASE, b"child!").unwrap();
        parent.copy_from_user(USER_BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
        assert_eq!(child.shared_entries(), parent.shared_entries());
    }

    #[test]
    fn destroy_returns_every_private_frame() {
        let (_ram, mut frames, template) = setup(32);
        let before = frames.free_frames();
        let mut space = AddressSpace::new(&mut frames, &template).unwrap();
        space
            .map_framed(&mut frames, VirtAddr(USER_BASE), 3, USER_RW)
            .unwrap();
        space
            .map_framed(&mut frames, VirtAddr(0xC000_0000 - PAGE_SIZE), 1, USER_RW)
            .unwrap();
        space.destroy(&mut frames);
        assert_eq!(frames.free_frames(), before);
        // 共享区的页表仍然有效
        assert_eq!(template.resolve(VirtAddr(0x1000)), Some(PhysAddr(0x1000)));
    }

    #[test]
    fn user_access_checks_permissions() {
        let (_ram, mut frames, template) = setup(16);
        let mut space = AddressSpace::new(&mut frames, &template).unwrap();
        space
            .map_framed(&mut frames, VirtAddr(USER_BASE), 1, PTEFlags::US)
            .unwrap();
        assert!(space.translated_byte_buffer(USER_BASE, 4, false).is_ok());
        assert_eq!(
            space.translated_byte_buffer(USER_BASE, 4, true).err(),
            Some(KernelError::BadAddress(USER_BASE))
        );
        assert!(space.translated_byte_buffer(0x1000, 4, false).is_err());
        assert!(space.read_u32(USER_BASE + PAGE_SIZE).is_err());
    }

    #[test]
    fn cstr_across_page_boundary() {
        let (_ram, mut frames, template) = setup(16);
        let mut space = AddressSpace::new(&mut frames, &template).unwrap();
        space
            .map_framed(&mut frames, VirtAddr(USER_BASE), 2, USER_RW)
            .unwrap();
        let at = USER_BASE + PAGE_SIZE - 3;
        space.copy_to_user(at, b"/bin/sh\0").unwrap();
        assert_eq!(space.read_cstr(at, 64).unwrap(), "/bin/sh");
        assert_eq!(space.read_cstr(at, 4), Err(KernelError::InvalidArgument));
        space.write_u32(at, 0xdead_beef).unwrap();
        assert_eq!(space.read_u32(at).unwrap(), 0xdead_beef);
    }
}
