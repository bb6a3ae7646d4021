//! 裸机启动与陷入入口
//!
//! 引导代码建好临时栈、拿到物理内存布局之后调用 [`start`]；
//! 汇编陷入桩保存现场后调用 [`trap_entry`]，按它返回的指针恢复现场并 `iret`。

use crate::arch;
use crate::drivers::DeviceTable;
use crate::fs::FileSystem;
use crate::kernel::{kernel_init, BootInfo, Kernel};
use crate::logging;
use crate::mm::heap_allocator;
use crate::sync::UPIntrFreeCell;
use crate::task::TrapContext;
use alloc::boxed::Box;
use core::mem::size_of;
use core::panic::PanicInfo;
use lazy_static::*;

lazy_static! {
    /// 唯一的内核实例，只在关中断的陷入路径上访问
    static ref KERNEL: UPIntrFreeCell<Option<Kernel>> = unsafe { UPIntrFreeCell::new(None) };
}

/// 内核入口
///
/// `probe` 在堆可用之后调用，返回文件系统与已注册的设备。
pub fn start<F>(boot_info: &BootInfo<'_>, probe: F) -> !
where
    F: FnOnce() -> (Box<dyn FileSystem>, DeviceTable),
{
    heap_allocator::init_heap();
    logging::init();
    arch::init();
    info!("[kernel] Hello, world!");

    let (fs, devices) = probe();
    let mut kernel = match kernel_init(boot_info, fs, devices) {
        Ok(kernel) => kernel,
        Err(e) => panic!("kernel init failed: {}", e),
    };
    let first = kernel.jump_to_first_task();
    arch::enable_paging();
    let frame = place_frame(&kernel, first);
    *KERNEL.exclusive_access() = Some(kernel);
    unsafe { arch::enter_context(frame) }
}

/// 把要恢复的现场放到当前任务内核栈的顶部
fn place_frame(kernel: &Kernel, cx: TrapContext) -> *mut TrapContext {
    let frame = (kernel.current_kernel_stack_top() - size_of::<TrapContext>()) as *mut TrapContext;
    unsafe { frame.write(cx) };
    frame
}

/// 汇编陷入桩调用的入口，返回值是接下来要恢复的陷入帧
#[no_mangle]
pub extern "C" fn trap_entry(frame: *mut TrapContext) -> *mut TrapContext {
    let mut cell = KERNEL.exclusive_access();
    let Some(kernel) = cell.as_mut() else {
        panic!("trap {:#x?} before kernel init", unsafe { *frame });
    };
    let mut cx = unsafe { *frame };
    kernel.handle_trap(&mut cx);
    place_frame(kernel, cx)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    arch::disable_interrupts();
    if let Some(location) = info.location() {
        println!(
            "[kernel] Panicked at {}:{} {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        println!("[kernel] Panicked: {}", info.message());
    }
    arch::halt()
}
