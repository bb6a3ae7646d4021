//! 体系结构相关的操作
//!
//! 在 `x86` 裸机目标上由 [`x86`] 模块用内联汇编实现；
//! 其余目标（包括宿主机上的测试）使用 `hosted` 模块中的模拟 CPU。
//! 两边导出同一组函数，内核其余部分只通过这里访问硬件。

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86::*;

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod hosted;
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use hosted::*;

/// 内核代码段选择子
pub const KERNEL_CS: usize = 0x08;
/// 内核数据段选择子
pub const KERNEL_DS: usize = 0x10;
/// 用户代码段选择子（RPL = 3）
pub const USER_CS: usize = 0x1B;
/// 用户数据段选择子（RPL = 3）
pub const USER_DS: usize = 0x23;
/// TSS 选择子
pub const TSS_SELECTOR: usize = 0x28;

/// 时钟中断向量（主片 IRQ0）
pub const IRQ_TIMER: usize = 32;
/// 键盘中断向量（主片 IRQ1）
pub const IRQ_KEYBOARD: usize = 33;
/// 主 IDE 磁盘中断向量（从片 IRQ14）
pub const IRQ_DISK: usize = 46;
/// 系统调用门
pub const SYSCALL_VECTOR: usize = 0x80;
/// `int 0x80` 指令长度，重新执行系统调用时 eip 回退的字节数
pub const SYSCALL_INSN_LEN: usize = 2;

/// EFLAGS.IF
pub const EFLAGS_IF: usize = 1 << 9;
/// EFLAGS 中恒为 1 的保留位
pub const EFLAGS_RESERVED: usize = 1 << 1;

/// 处理器异常名称，用于诊断输出
pub fn exception_name(vector: usize) -> &'static str {
    match vector {
        0 => "divide error",
        1 => "debug",
        2 => "non-maskable interrupt",
        3 => "breakpoint",
        4 => "overflow",
        5 => "bound range exceeded",
        6 => "invalid opcode",
        7 => "device not available",
        8 => "double fault",
        10 => "invalid tss",
        11 => "segment not present",
        12 => "stack-segment fault",
        13 => "general protection fault",
        14 => "page fault",
        16 => "x87 floating-point exception",
        17 => "alignment check",
        18 => "machine check",
        19 => "simd floating-point exception",
        _ => "reserved",
    }
}
