//! 一个面向 32 位 x86 的单处理器教学内核核心
//!
//! 本 crate 实现进程、调度、虚拟内存、同步原语以及陷入/系统调用分发。
//! 与 CPU 直接打交道的部分全部位于 [`arch`] 之后：在 `x86-*-none` 目标上是内联汇编，
//! 在其他目标上是一个软件模拟，从而整个内核核心可以在宿主机上用 `cargo test` 驱动。
//!
//! 内核状态集中在 [`kernel::Kernel`] 中，陷入入口拿到 `&mut Kernel` 后依次完成：
//! 保存现场、处理陷入、调度、恢复（可能已经换成另一个任务的）现场。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate log;

#[macro_use]
extern crate bitflags;

#[macro_use]
pub mod console;
pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod kernel;
pub mod loader;
pub mod logging;
pub mod mm;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod trap;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod boot;

#[cfg(test)]
mod test_support;

pub use error::{KernelError, KernelResult};
pub use kernel::{BootInfo, Kernel, MemoryRegion};
