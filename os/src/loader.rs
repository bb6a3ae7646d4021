//! ELF 可执行文件解析
//!
//! 只接受 32 位、x86、`ET_EXEC` 类型的映像。每个 `PT_LOAD` 段都必须完整落在
//! 用户私有区内（`USER_BASE` 到用户栈底之间），且文件中的数据不越界。

use crate::config::{USER_BASE, USER_STACK_BOTTOM};
use crate::error::{KernelError, KernelResult};
use alloc::vec::Vec;
use xmas_elf::header::{Class, Machine, Type};
use xmas_elf::program;
use xmas_elf::ElfFile;

/// 一个需要装载的段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// 起始虚拟地址
    pub vaddr: usize,
    /// 在文件中的偏移
    pub offset: usize,
    /// 文件中的字节数
    pub file_size: usize,
    /// 内存中的字节数（多出的部分清零）
    pub mem_size: usize,
    /// 是否可写
    pub writable: bool,
}

impl Segment {
    /// 段结束的虚拟地址
    pub fn end(&self) -> usize {
        self.vaddr + self.mem_size
    }
}

/// 解析后的可执行映像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfImage {
    /// 入口地址
    pub entry: usize,
    /// 可装载段
    pub segments: Vec<Segment>,
}

impl ElfImage {
    /// 解析并校验 `data`
    pub fn parse(data: &[u8]) -> KernelResult<Self> {
        let elf = ElfFile::new(data).map_err(KernelError::BadExecutable)?;
        let magic = elf.header.pt1.magic;
        if magic != [0x7f, 0x45, 0x4c, 0x46] {
            return Err(KernelError::BadExecutable("invalid elf"));
        }
        if elf.header.pt1.class() != Class::ThirtyTwo {
            return Err(KernelError::BadExecutable("not a 32-bit image"));
        }
        if elf.header.pt2.type_().as_type() != Type::Executable {
            return Err(KernelError::BadExecutable("not an executable"));
        }
        if elf.header.pt2.machine().as_machine() != Machine::X86 {
            return Err(KernelError::BadExecutable("not an x86 image"));
        }
        let entry = elf.header.pt2.entry_point() as usize;

        let mut segments = Vec::new();
        for i in 0..elf.header.pt2.ph_count() {
            let ph = elf.program_header(i).map_err(KernelError::BadExecutable)?;
            if ph.get_type().map_err(KernelError::BadExecutable)? != program::Type::Load {
                continue;
            }
            let segment = Segment {
                vaddr: ph.virtual_addr() as usize,
                offset: ph.offset() as usize,
                file_size: ph.file_size() as usize,
                mem_size: ph.mem_size() as usize,
                writable: ph.flags().is_write(),
            };
            check_segment(&segment, data.len())?;
            segments.push(segment);
        }
        if segments.is_empty() {
            return Err(KernelError::BadExecutable("no loadable segment"));
        }
        if entry < USER_BASE || entry >= USER_STACK_BOTTOM {
            return Err(KernelError::BadExecutable("entry outside user space"));
        }
        Ok(Self { entry, segments })
    }

    /// 所有段结束地址的最大值
    pub fn end(&self) -> usize {
        self.segments.iter().map(Segment::end).max().unwrap_or(USER_BASE)
    }
}

fn check_segment(segment: &Segment, file_len: usize) -> KernelResult<()> {
    let file_end = segment
        .offset
        .checked_add(segment.file_size)
        .ok_or(KernelError::BadExecutable("segment overflows"))?;
    if file_end > file_len {
        return Err(KernelError::BadExecutable("segment beyond end of file"));
    }
    if segment.file_size > segment.mem_size {
        return Err(KernelError::BadExecutable("file size exceeds memory size"));
    }
    if segment.vaddr < USER_BASE {
        return Err(KernelError::BadExecutable("segment in kernel space"));
    }
    match segment.vaddr.checked_add(segment.mem_size) {
        Some(end) if end <= USER_STACK_BOTTOM => Ok(()),
        _ => Err(KernelError::BadExecutable("segment overlaps user stack")),
    }
}
