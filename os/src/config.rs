//! 内核常量配置

/// 页大小 4KiB
pub const PAGE_SIZE: usize = 0x1000;
/// 页内偏移的位宽
pub const PAGE_SIZE_BITS: usize = 12;
/// 每个页目录/页表中的表项数
pub const PTE_PER_PAGE: usize = 1024;

/// 内核物理内存的起点（1MiB 以下留给 BIOS 与引导程序）
pub const MEMORY_START: usize = 0x10_0000;
/// 用户/内核地址空间分界线
///
/// 低于此地址的页目录项在所有地址空间中完全相同（内核共享映射，包括对物理内存的 1:1 映射），
/// 高于此地址的部分归各个任务私有。
pub const USER_BASE: usize = 0x4000_0000;
/// 用户栈顶
pub const USER_STACK_TOP: usize = 0xC000_0000;
/// 用户栈页数
pub const USER_STACK_PAGES: usize = 4;
/// 用户栈底（也是堆可以增长到的上限）
pub const USER_STACK_BOTTOM: usize = USER_STACK_TOP - USER_STACK_PAGES * PAGE_SIZE;

/// 每个任务的内核栈大小
pub const KERNEL_STACK_SIZE: usize = PAGE_SIZE;
/// 内核堆大小
pub const KERNEL_HEAP_SIZE: usize = 0x30_0000;

/// 任务槽数量
pub const MAX_TASKS: usize = 64;
/// 可分配的任务描述符槽数量
pub const MAX_DESCRIPTORS: usize = 64;
/// 每个任务的文件描述符表大小
pub const MAX_FD: usize = 16;
/// 系统调用表大小
pub const MAX_SYSCALL: usize = 32;
/// 用户可创建的互斥锁/信号量数量
pub const MAX_SYNC_OBJECTS: usize = 32;
/// exec 参数个数上限
pub const MAX_ARGS: usize = 16;
/// 用户传入路径/参数字符串的最大长度
pub const MAX_PATH_LEN: usize = 256;

/// 时钟中断周期（毫秒）
pub const TICK_MS: usize = 10;
/// 时间片长度（以时钟中断计）
pub const TIME_SLICE_TICKS: usize = 5;
/// PIT 输入时钟频率
pub const PIT_FREQUENCY: usize = 1_193_182;

/// 初始化进程的路径
pub const INIT_PROC_PATH: &str = "/bin/init";
