//! 宿主机测试用的模拟硬件与辅助函数
//!
//! [`SimulatedRam`] 提供一段页对齐的"物理内存"，[`MemFs`] 是内存中的文件系统，
//! [`elf_image`] 生成最小的 ELF32 可执行文件。[`boot`] 把它们组装成一个
//! 已经进入 init 的内核，其余函数模拟陷入。

use crate::arch::{IRQ_TIMER, SYSCALL_INSN_LEN, SYSCALL_VECTOR};
use crate::config::{MAX_TASKS, MEMORY_START, PAGE_SIZE, USER_BASE, USER_STACK_TOP};
use crate::drivers::{ConsoleDevice, DeviceId, DeviceTable, Keyboard};
use crate::error::{KernelError, KernelResult};
use crate::fs::{DirEntry, File, FileSystem, OpenFlags, SeekWhence, Stat, StatMode};
use crate::kernel::{kernel_init_with_capacity, BootInfo, Kernel, MemoryRegion};
use crate::mm::{PhysAddr, PhysWindow, UserBuffer};
use crate::task::{Privilege, TaskId, TrapContext};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use spin::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// 以 [`MEMORY_START`] 为起点的模拟物理内存
pub struct SimulatedRam {
    base: *mut u8,
    layout: Layout,
}

impl SimulatedRam {
    /// 分配 `bytes` 字节（向上取整到页）
    pub fn new(bytes: usize) -> Self {
        let size = (bytes + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE;
        let layout = Layout::from_size_align(size, PAGE_SIZE).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "cannot allocate simulated ram");
        Self { base, layout }
    }

    /// 起始物理地址
    pub fn start(&self) -> PhysAddr {
        PhysAddr(MEMORY_START)
    }

    /// 结束物理地址
    pub fn end(&self) -> PhysAddr {
        PhysAddr(MEMORY_START + self.layout.size())
    }

    /// 把 `[start, end)` 映到这块内存上的窗口
    pub fn window(&self) -> PhysWindow {
        PhysWindow::new((self.base as usize).wrapping_sub(MEMORY_START))
    }
}

impl Drop for SimulatedRam {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) }
    }
}

std::thread_local! {
    // 内核活到测试结束，它的内存随测试线程一起释放
    static BOOTED_RAM: RefCell<Vec<SimulatedRam>> = RefCell::new(Vec::new());
}

struct MemNode {
    ino: u32,
    data: Mutex<Vec<u8>>,
}

/// 内存文件系统：扁平的 `路径 -> 内容` 表，目录由路径前缀隐含
pub struct MemFs {
    files: Mutex<BTreeMap<String, Arc<MemNode>>>,
    next_ino: Mutex<u32>,
}

impl MemFs {
    /// 空文件系统
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            next_ino: Mutex::new(1),
        }
    }

    /// 带有 `/bin/init` 的文件系统
    pub fn with_init() -> Self {
        let fs = Self::new();
        fs.add_file(crate::config::INIT_PROC_PATH, &init_program());
        fs
    }

    /// 放入（或替换）一个文件
    pub fn add_file(&self, path: &str, data: &[u8]) {
        let node = self.create(path);
        *node.data.lock() = data.to_vec();
    }

    fn create(&self, path: &str) -> Arc<MemNode> {
        let mut ino = self.next_ino.lock();
        let node = Arc::new(MemNode {
            ino: *ino,
            data: Mutex::new(Vec::new()),
        });
        *ino += 1;
        self.files.lock().insert(String::from(path), node.clone());
        node
    }
}

impl FileSystem for MemFs {
    fn open(&self, path: &str, flags: OpenFlags) -> KernelResult<Arc<dyn File>> {
        let existing = self.files.lock().get(path).cloned();
        let node = match existing {
            Some(node) => {
                if flags.contains(OpenFlags::TRUNC) {
                    node.data.lock().clear();
                }
                node
            }
            None if flags.contains(OpenFlags::CREATE) => self.create(path),
            None => return Err(KernelError::NotFound),
        };
        let (readable, writable) = flags.read_write();
        Ok(Arc::new(MemFile {
            node,
            offset: Mutex::new(0),
            readable,
            writable,
        }))
    }

    fn open_dir(&self, path: &str) -> KernelResult<Arc<dyn File>> {
        let prefix = if path.ends_with('/') {
            String::from(path)
        } else {
            alloc::format!("{}/", path)
        };
        let files = self.files.lock();
        let mut entries: Vec<DirEntry> = Vec::new();
        for (name, node) in files.iter() {
            let Some(rest) = name.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((dir, _)) => DirEntry {
                    name: String::from(dir),
                    is_dir: true,
                    size: 0,
                },
                None => DirEntry {
                    name: String::from(rest),
                    is_dir: false,
                    size: node.data.lock().len(),
                },
            };
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        if entries.is_empty() && prefix != "/" {
            return Err(KernelError::NotFound);
        }
        Ok(Arc::new(MemDir {
            entries,
            cursor: Mutex::new(0),
        }))
    }

    fn unlink(&self, path: &str) -> KernelResult<()> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or(KernelError::NotFound)
    }
}

struct MemFile {
    node: Arc<MemNode>,
    offset: Mutex<usize>,
    readable: bool,
    writable: bool,
}

impl File for MemFile {
    fn readable(&self) -> bool {
        self.readable
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn read(&self, mut buf: UserBuffer<'_>) -> KernelResult<usize> {
        let data = self.node.data.lock();
        let mut offset = self.offset.lock();
        let start = (*offset).min(data.len());
        let len = buf.copy_from(&data[start..]);
        *offset = start + len;
        Ok(len)
    }

    fn write(&self, buf: UserBuffer<'_>) -> KernelResult<usize> {
        let mut bytes = Vec::new();
        buf.collect_into(&mut bytes);
        let mut data = self.node.data.lock();
        let mut offset = self.offset.lock();
        let end = *offset + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[*offset..end].copy_from_slice(&bytes);
        *offset = end;
        Ok(bytes.len())
    }

    fn seek(&self, offset: isize, whence: SeekWhence) -> KernelResult<usize> {
        let mut pos = self.offset.lock();
        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Current => *pos,
            SeekWhence::End => self.node.data.lock().len(),
        };
        let new = (base as isize)
            .checked_add(offset)
            .filter(|new| *new >= 0)
            .ok_or(KernelError::InvalidArgument)?;
        *pos = new as usize;
        Ok(*pos)
    }

    fn stat(&self) -> KernelResult<Stat> {
        let size = self.node.data.lock().len() as u32;
        Ok(Stat::new(DeviceId::Disk as u32, self.node.ino, StatMode::FILE, size))
    }
}

struct MemDir {
    entries: Vec<DirEntry>,
    cursor: Mutex<usize>,
}

impl File for MemDir {
    fn readable(&self) -> bool {
        true
    }

    fn writable(&self) -> bool {
        false
    }

    fn read(&self, _buf: UserBuffer<'_>) -> KernelResult<usize> {
        Err(KernelError::InvalidArgument)
    }

    fn write(&self, _buf: UserBuffer<'_>) -> KernelResult<usize> {
        Err(KernelError::BadFd)
    }

    fn stat(&self) -> KernelResult<Stat> {
        Ok(Stat::new(DeviceId::Disk as u32, 0, StatMode::DIR, 0))
    }

    fn read_dir(&self) -> KernelResult<Option<DirEntry>> {
        let mut cursor = self.cursor.lock();
        let entry = self.entries.get(*cursor).cloned();
        if entry.is_some() {
            *cursor += 1;
        }
        Ok(entry)
    }
}

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

/// [`elf_image`] 中的一个 `PT_LOAD` 段
pub struct ElfSegment {
    vaddr: u32,
    data: Vec<u8>,
    mem_size: u32,
    flags: u32,
}

impl ElfSegment {
    /// 只读可执行的代码段
    pub fn text(vaddr: u32, code: &[u8]) -> Self {
        Self {
            vaddr,
            data: code.to_vec(),
            mem_size: code.len() as u32,
            flags: PF_R | PF_X,
        }
    }

    /// 可写的数据段，`mem_size` 超出数据的部分为 bss
    pub fn data(vaddr: u32, data: &[u8], mem_size: u32) -> Self {
        Self {
            vaddr,
            data: data.to_vec(),
            mem_size,
            flags: PF_R | PF_W,
        }
    }
}

/// 生成 ELF32 / i386 / `ET_EXEC` 映像：文件头、程序头表，然后依次是各段数据
pub fn elf_image(entry: u32, segments: &[ElfSegment]) -> Vec<u8> {
    const EHSIZE: u32 = 52;
    const PHENTSIZE: u32 = 32;
    let mut image = Vec::new();
    image.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    image.extend_from_slice(&[0; 8]);
    image.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    image.extend_from_slice(&3u16.to_le_bytes()); // e_machine = EM_386
    image.extend_from_slice(&1u32.to_le_bytes());
    image.extend_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(&EHSIZE.to_le_bytes()); // e_phoff
    image.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    image.extend_from_slice(&(EHSIZE as u16).to_le_bytes());
    image.extend_from_slice(&(PHENTSIZE as u16).to_le_bytes());
    image.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    image.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
    image.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    image.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

    let mut offset = EHSIZE + PHENTSIZE * segments.len() as u32;
    for segment in segments {
        let words = [
            1, // PT_LOAD
            offset,
            segment.vaddr,
            segment.vaddr,
            segment.data.len() as u32,
            segment.mem_size,
            segment.flags,
            PAGE_SIZE as u32,
        ];
        for word in words {
            image.extend_from_slice(&word.to_le_bytes());
        }
        offset += segment.data.len() as u32;
    }
    for segment in segments {
        image.extend_from_slice(&segment.data);
    }
    image
}

/// init 的入口地址
pub const INIT_ENTRY: usize = USER_BASE;

/// 测试用的 init：一页代码，外加从 `USER_BASE + 0x1000` 开始的一页可写数据
pub fn init_program() -> Vec<u8> {
    let base = USER_BASE as u32;
    elf_image(
        base,
        &[
            // int 0x80; jmp $
            ElfSegment::text(base, b"\xcd\x80\xeb\xfe"),
            ElfSegment::data(base + 0x1000, b"init", 0x1000),
        ],
    )
}

/// 注册了控制台与键盘的设备表
pub fn console_devices() -> DeviceTable {
    let mut devices = DeviceTable::new();
    devices.register(DeviceId::Console, Arc::new(ConsoleDevice));
    devices.register(DeviceId::Keyboard, Arc::new(Keyboard::new()));
    devices
}

/// 启动一个带 `/bin/init` 的内核，当前任务为 init
pub fn boot() -> Kernel {
    boot_with(MemFs::with_init(), MAX_TASKS)
}

/// 以给定的文件系统和任务表容量启动内核
pub fn boot_with(fs: MemFs, max_tasks: usize) -> Kernel {
    let ram = SimulatedRam::new(0x20_0000);
    let regions = [MemoryRegion {
        start: ram.start().0,
        end: ram.end().0,
    }];
    let boot_info = BootInfo {
        regions: &regions,
        kernel_end: MEMORY_START,
        window: ram.window(),
    };
    BOOTED_RAM.with(|booted| booted.borrow_mut().push(ram));
    let mut kernel = kernel_init_with_capacity(&boot_info, alloc::boxed::Box::new(fs), console_devices(), max_tasks)
        .unwrap_or_else(|e| panic!("boot failed: {}", e));
    kernel.jump_to_first_task();
    kernel
}

/// 创建并启动一个没有用户映射的用户任务
pub fn spawn(kernel: &mut Kernel, name: &str) -> TaskId {
    let task = kernel
        .task_init(name, USER_BASE, USER_STACK_TOP, Privilege::User)
        .unwrap();
    kernel.tasks.start(task);
    task
}

/// 让出处理器直到 `task` 成为当前任务
pub fn switch_to(kernel: &mut Kernel, task: TaskId) {
    for _ in 0..=kernel.tasks.len() {
        if kernel.tasks.current() == task {
            kernel.switch_to(task);
            return;
        }
        kernel.tasks.yield_current();
    }
    panic!("task {:?} never became current", task);
}

/// 以 `frame` 为陷入现场进入 `vector` 号陷入，返回接下来要恢复的现场
pub fn trap(kernel: &mut Kernel, frame: TrapContext, vector: usize) -> TrapContext {
    let mut frame = frame;
    frame.vector = vector;
    if vector == SYSCALL_VECTOR {
        // CPU 压入的 eip 指向 int 0x80 之后
        frame.eip += SYSCALL_INSN_LEN;
    }
    kernel.handle_trap(&mut frame);
    frame
}

/// 当前任务发起系统调用
pub fn run_syscall(kernel: &mut Kernel, id: usize, args: [usize; 4]) -> TrapContext {
    let mut frame = kernel.tasks.task(kernel.tasks.current()).context;
    frame.eax = id;
    frame.ebx = args[0];
    frame.ecx = args[1];
    frame.edx = args[2];
    frame.esi = args[3];
    trap(kernel, frame, SYSCALL_VECTOR)
}

/// 一次时钟中断
pub fn timer_interrupt(kernel: &mut Kernel) -> TrapContext {
    let frame = kernel.tasks.task(kernel.tasks.current()).context;
    trap(kernel, frame, IRQ_TIMER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memfs_directories_follow_paths() {
        let fs = MemFs::with_init();
        fs.add_file("/etc/motd", b"hi");
        let root = fs.open_dir("/").unwrap();
        let mut names = Vec::new();
        while let Some(entry) = root.read_dir().unwrap() {
            assert!(entry.is_dir);
            names.push(entry.name);
        }
        assert_eq!(names, ["bin", "etc"]);
        assert_eq!(fs.open_dir("/usr").err(), Some(KernelError::NotFound));
    }
}
