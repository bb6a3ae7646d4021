//! 陷入帧 [`TrapContext`]
//!
//! 布局与陷入入口的压栈顺序一致：段寄存器、`pushad`、向量号、错误码，
//! 然后是 CPU 自动压入的 eip/cs/eflags，以及特权级变化时的 esp/ss。
//! 任务切换就是把另一个任务保存的 [`TrapContext`] 换进来再 `iret`。

use crate::arch::{
    EFLAGS_IF, EFLAGS_RESERVED, KERNEL_CS, KERNEL_DS, SYSCALL_INSN_LEN, USER_CS, USER_DS,
};

/// 任务运行的特权级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// 0 环
    Kernel,
    /// 3 环
    User,
}

/// 陷入时保存的寄存器
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct TrapContext {
    pub gs: usize,
    pub fs: usize,
    pub es: usize,
    pub ds: usize,
    pub edi: usize,
    pub esi: usize,
    pub ebp: usize,
    pub esp_dummy: usize, // pushad 压入的 esp，恢复时被忽略
    pub ebx: usize,
    pub edx: usize,
    pub ecx: usize,
    pub eax: usize,
    pub vector: usize,
    pub error_code: usize,
    pub eip: usize,
    pub cs: usize,
    pub eflags: usize,
    pub user_esp: usize,
    pub user_ss: usize,
}

impl TrapContext {
    /// 用户任务的初始上下文：从 `entry` 开始执行，栈顶为 `sp`，开中断
    pub fn app_init_context(entry: usize, sp: usize) -> Self {
        Self {
            gs: USER_DS,
            fs: USER_DS,
            es: USER_DS,
            ds: USER_DS,
            eip: entry,
            cs: USER_CS,
            eflags: EFLAGS_IF | EFLAGS_RESERVED,
            user_esp: sp,
            user_ss: USER_DS,
            ..Default::default()
        }
    }

    /// 内核任务（空闲任务）的初始上下文
    pub fn kernel_init_context(entry: usize, sp: usize) -> Self {
        Self {
            gs: KERNEL_DS,
            fs: KERNEL_DS,
            es: KERNEL_DS,
            ds: KERNEL_DS,
            eip: entry,
            cs: KERNEL_CS,
            eflags: EFLAGS_IF | EFLAGS_RESERVED,
            user_esp: sp,
            user_ss: KERNEL_DS,
            ..Default::default()
        }
    }

    /// 按特权级构造初始上下文
    pub fn init_context(privilege: Privilege, entry: usize, sp: usize) -> Self {
        match privilege {
            Privilege::Kernel => Self::kernel_init_context(entry, sp),
            Privilege::User => Self::app_init_context(entry, sp),
        }
    }

    /// 陷入前是否处于用户态
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    /// 系统调用号
    pub fn syscall_id(&self) -> usize {
        self.eax
    }

    /// 系统调用参数：ebx, ecx, edx, esi
    pub fn syscall_args(&self) -> [usize; 4] {
        [self.ebx, self.ecx, self.edx, self.esi]
    }

    /// 写入系统调用返回值
    pub fn set_return(&mut self, value: isize) {
        self.eax = value as usize;
    }

    /// 回到 `int 0x80` 指令，任务恢复运行时重新发起同一个系统调用
    pub fn rewind_syscall(&mut self) {
        self.eip -= SYSCALL_INSN_LEN;
    }

    /// 清空通用寄存器
    pub fn clear_general(&mut self) {
        self.edi = 0;
        self.esi = 0;
        self.ebp = 0;
        self.esp_dummy = 0;
        self.ebx = 0;
        self.edx = 0;
        self.ecx = 0;
        self.eax = 0;
    }
}
