//! 文件接口
//!
//! 文件系统本身（FAT16、设备文件系统）不在内核核心之内，
//! 核心只通过 [`FileSystem`] 与 [`File`] 两个 trait 使用它们。
//! 标准输入输出是核心自带的两种文件，见 [`stdio`]。

mod stdio;

use crate::error::{KernelError, KernelResult};
use crate::mm::UserBuffer;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub use stdio::{Stdin, Stdout};

/// 为所有文件类型定义的 File trait
///
/// 打开的文件以 `Arc<dyn File>` 的形式放在文件描述符表中，fork/dup 只增加引用计数。
pub trait File: Send + Sync {
    /// 判断文件是否可读
    fn readable(&self) -> bool;

    /// 判断文件是否可写
    fn writable(&self) -> bool;

    /// 从文件中读取数据到缓冲区 buf，返回读取的字节数
    ///
    /// 暂时没有数据的设备文件返回 [`KernelError::WouldBlock`]。
    fn read(&self, buf: UserBuffer<'_>) -> KernelResult<usize>;

    /// 向文件写入缓冲区 buf 中的数据，返回写入的字节数
    fn write(&self, buf: UserBuffer<'_>) -> KernelResult<usize>;

    /// 移动读写位置，返回新位置
    fn seek(&self, _offset: isize, _whence: SeekWhence) -> KernelResult<usize> {
        Err(KernelError::InvalidArgument)
    }

    /// 文件元数据
    fn stat(&self) -> KernelResult<Stat> {
        Ok(Stat::new(0, 0, StatMode::CHAR, 0))
    }

    /// 是否为终端
    fn is_tty(&self) -> bool {
        false
    }

    /// 设备控制
    fn ioctl(&self, _request: usize, _arg: usize) -> KernelResult<usize> {
        Err(KernelError::NotTty)
    }

    /// 读取下一个目录项，读完返回 `None`
    fn read_dir(&self) -> KernelResult<Option<DirEntry>> {
        Err(KernelError::InvalidArgument)
    }

    /// 从当前位置读到文件末尾
    fn read_all(&self) -> KernelResult<Vec<u8>> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let len = self.read(UserBuffer::from_slice(&mut chunk))?;
            if len == 0 {
                return Ok(data);
            }
            data.extend_from_slice(&chunk[..len]);
        }
    }
}

/// 内核使用的文件系统
pub trait FileSystem: Send + Sync {
    /// 打开文件
    fn open(&self, path: &str, flags: OpenFlags) -> KernelResult<Arc<dyn File>>;

    /// 打开目录，得到的文件只支持 [`File::read_dir`]
    fn open_dir(&self, path: &str) -> KernelResult<Arc<dyn File>>;

    /// 删除文件
    fn unlink(&self, path: &str) -> KernelResult<()>;
}

bitflags! {
    /// 打开文件的标志
    pub struct OpenFlags: u32 {
        /// 只读
        const RDONLY = 0;
        /// 只写
        const WRONLY = 1 << 0;
        /// 读写
        const RDWR = 1 << 1;
        /// 不存在时创建
        const CREATE = 1 << 6;
        /// 截断文件大小为 0
        const TRUNC = 1 << 10;
    }
}

impl OpenFlags {
    /// 根据 flags 返回文件的可读和可写权限
    pub fn read_write(&self) -> (bool, bool) {
        if self.contains(Self::RDWR) {
            (true, true)
        } else if self.contains(Self::WRONLY) {
            (false, true)
        } else {
            (true, false)
        }
    }
}

/// seek 的基准位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    /// 文件开头
    Set,
    /// 当前位置
    Current,
    /// 文件末尾
    End,
}

impl TryFrom<usize> for SeekWhence {
    type Error = KernelError;

    fn try_from(value: usize) -> KernelResult<Self> {
        match value {
            0 => Ok(SeekWhence::Set),
            1 => Ok(SeekWhence::Current),
            2 => Ok(SeekWhence::End),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

bitflags! {
    /// 文件类型
    pub struct StatMode: u32 {
        /// 空类型
        const NULL = 0;
        /// 字符设备
        const CHAR = 0o020000;
        /// 目录
        const DIR = 0o040000;
        /// 普通文件
        const FILE = 0o100000;
    }
}

/// 文件元数据，以 5 个 32 位字的形式写回用户态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// 所在设备
    pub dev: u32,
    /// inode 编号
    pub ino: u32,
    /// 文件类型
    pub mode: StatMode,
    /// 硬链接数
    pub nlink: u32,
    /// 文件大小
    pub size: u32,
}

impl Stat {
    /// 用户态看到的大小
    pub const SIZE: usize = 20;

    /// 单链接的元数据
    pub fn new(dev: u32, ino: u32, mode: StatMode, size: u32) -> Self {
        Self {
            dev,
            ino,
            mode,
            nlink: 1,
            size,
        }
    }

    /// 用户态布局（小端）
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let words = [self.dev, self.ino, self.mode.bits(), self.nlink, self.size];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

/// 目录项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 文件名
    pub name: String,
    /// 是否为目录
    pub is_dir: bool,
    /// 文件大小
    pub size: usize,
}

impl DirEntry {
    /// 记录头：大小与类型各 4 字节
    pub const HEADER: usize = 8;

    /// 编码为 `{u32 size, u32 kind, name, '\0'}`，名字按 `capacity` 截断
    ///
    /// `kind` 为 1 表示普通文件，2 表示目录。
    pub fn encode(&self, capacity: usize) -> KernelResult<Vec<u8>> {
        if capacity < Self::HEADER + 1 {
            return Err(KernelError::InvalidArgument);
        }
        let name = self.name.as_bytes();
        let name = &name[..name.len().min(capacity - Self::HEADER - 1)];
        let kind: u32 = if self.is_dir { 2 } else { 1 };
        let mut record = Vec::with_capacity(Self::HEADER + name.len() + 1);
        record.extend_from_slice(&(self.size as u32).to_le_bytes());
        record.extend_from_slice(&kind.to_le_bytes());
        record.extend_from_slice(name);
        record.push(0);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flags_permissions() {
        assert_eq!(OpenFlags::RDONLY.read_write(), (true, false));
        assert_eq!(OpenFlags::WRONLY.read_write(), (false, true));
        assert_eq!((OpenFlags::RDWR | OpenFlags::CREATE).read_write(), (true, true));
    }

    #[test]
    fn stat_layout() {
        let bytes = Stat::new(1, 7, StatMode::FILE, 300).to_bytes();
        assert_eq!(&bytes[4..8], &7u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0o100000u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &1u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &300u32.to_le_bytes());
    }

    #[test]
    fn dir_entry_is_truncated_to_capacity() {
        let entry = DirEntry {
            name: String::from("hello.txt"),
            is_dir: false,
            size: 5,
        };
        let record = entry.encode(12).unwrap();
        assert_eq!(record.len(), 12);
        assert_eq!(&record[8..], b"hel\0");
        assert_eq!(entry.encode(8), Err(KernelError::InvalidArgument));
        let dir = DirEntry {
            name: String::from("bin"),
            is_dir: true,
            size: 0,
        };
        assert_eq!(&dir.encode(64).unwrap()[4..8], &2u32.to_le_bytes());
    }

    #[test]
    fn whence_from_user() {
        assert_eq!(SeekWhence::try_from(2), Ok(SeekWhence::End));
        assert_eq!(SeekWhence::try_from(3), Err(KernelError::InvalidArgument));
    }
}
