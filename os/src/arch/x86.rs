//! i386 裸机实现：端口 I/O、控制寄存器、GDT/TSS/IDT、8259A、8253 以及陷入入口

use super::{KERNEL_CS, KERNEL_DS, SYSCALL_VECTOR, TSS_SELECTOR, USER_CS, USER_DS};
use crate::config::{PIT_FREQUENCY, TICK_MS};
use core::arch::{asm, global_asm};
use core::mem::size_of;

global_asm!(
    r#"
.intel_syntax noprefix
.section .text

.macro TRAP_NOERR num
.global trap_stub_\num
trap_stub_\num:
    push 0
    push \num
    jmp trap_common
.endm

.macro TRAP_ERR num
.global trap_stub_\num
trap_stub_\num:
    push \num
    jmp trap_common
.endm

.irp n, 0,1,2,3,4,5,6,7,9,15,16,18,19,20,22,23,24,25,26,27,28,31
    TRAP_NOERR \n
.endr
.irp n, 8,10,11,12,13,14,17,21,29,30
    TRAP_ERR \n
.endr
.irp n, 32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,128
    TRAP_NOERR \n
.endr

trap_common:
    pushad
    push ds
    push es
    push fs
    push gs
    mov ax, {kernel_ds}
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call {trap_entry}
.global trap_restore
trap_restore:
    mov esp, eax
    pop gs
    pop fs
    pop es
    pop ds
    popad
    add esp, 8
    iretd

.global idle_loop
idle_loop:
    sti
    hlt
    jmp idle_loop

.section .rodata
.align 4
.global trap_stub_table
trap_stub_table:
.irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31,32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47
    .long trap_stub_\n
.endr
.att_syntax
"#,
    kernel_ds = const KERNEL_DS,
    trap_entry = sym crate::boot::trap_entry,
);

extern "C" {
    static trap_stub_table: [u32; 48];
    fn trap_stub_128();
    fn idle_loop();
}

/// 向 I/O 端口写一个字节
pub fn outb(port: u16, value: u8) {
    unsafe { asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack)) }
}

/// 向 I/O 端口写一个字
pub fn outw(port: u16, value: u16) {
    unsafe { asm!("out dx, ax", in("dx") port, in("ax") value, options(nomem, nostack)) }
}

/// 从 I/O 端口读一个字节
pub fn inb(port: u16) -> u8 {
    let value: u8;
    unsafe { asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack)) }
    value
}

fn read_eflags() -> usize {
    let eflags: usize;
    unsafe { asm!("pushfd", "pop {}", out(reg) eflags) }
    eflags
}

/// 中断是否开启
pub fn interrupts_enabled() -> bool {
    read_eflags() & super::EFLAGS_IF != 0
}

/// 关中断
pub fn disable_interrupts() {
    unsafe { asm!("cli", options(nomem, nostack)) }
}

/// 开中断
pub fn enable_interrupts() {
    unsafe { asm!("sti", options(nomem, nostack)) }
}

/// 切换页目录（写 cr3 同时刷新 TLB）
pub fn load_page_directory(pa: usize) {
    unsafe { asm!("mov cr3, {}", in(reg) pa, options(nostack)) }
}

/// 开启分页
pub fn enable_paging() {
    unsafe {
        asm!(
            "mov {tmp}, cr0",
            "or {tmp}, 0x80010000", // PG | WP
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nostack)
        )
    }
}

#[repr(C, packed)]
struct TaskStateSegment {
    link: u32,
    esp0: u32,
    ss0: u32,
    unused: [u32; 22],
    trap: u16,
    iomap_base: u16,
}

static mut TSS: TaskStateSegment = TaskStateSegment {
    link: 0,
    esp0: 0,
    ss0: KERNEL_DS as u32,
    unused: [0; 22],
    trap: 0,
    iomap_base: size_of::<TaskStateSegment>() as u16,
};

/// 设置从用户态陷入时使用的内核栈
pub fn set_kernel_stack(top: usize) {
    unsafe {
        let tss = core::ptr::addr_of_mut!(TSS);
        core::ptr::addr_of_mut!((*tss).esp0).write_unaligned(top as u32);
    }
}

const GDT_ENTRIES: usize = 6;

static mut GDT: [u64; GDT_ENTRIES] = [0; GDT_ENTRIES];

const fn segment(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    (limit as u64 & 0xffff)
        | ((base as u64 & 0xff_ffff) << 16)
        | ((access as u64) << 40)
        | (((limit as u64 >> 16) & 0xf) << 48)
        | (((flags as u64) & 0xf) << 52)
        | (((base as u64 >> 24) & 0xff) << 56)
}

#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    zero: u8,
    attributes: u8,
    offset_high: u16,
}

impl GateDescriptor {
    const EMPTY: Self = Self {
        offset_low: 0,
        selector: 0,
        zero: 0,
        attributes: 0,
        offset_high: 0,
    };

    fn interrupt(handler: u32, dpl: u8) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CS as u16,
            zero: 0,
            attributes: 0x8e | (dpl << 5), // 32 位中断门，进入时自动关中断
            offset_high: (handler >> 16) as u16,
        }
    }
}

static mut IDT: [GateDescriptor; 256] = [GateDescriptor::EMPTY; 256];

fn init_gdt() {
    unsafe {
        let tss_base = core::ptr::addr_of!(TSS) as u32;
        let gdt = &mut *core::ptr::addr_of_mut!(GDT);
        gdt[0] = 0;
        gdt[KERNEL_CS >> 3] = segment(0, 0xfffff, 0x9a, 0xc);
        gdt[KERNEL_DS >> 3] = segment(0, 0xfffff, 0x92, 0xc);
        gdt[USER_CS >> 3] = segment(0, 0xfffff, 0xfa, 0xc);
        gdt[USER_DS >> 3] = segment(0, 0xfffff, 0xf2, 0xc);
        gdt[TSS_SELECTOR >> 3] =
            segment(tss_base, size_of::<TaskStateSegment>() as u32 - 1, 0x89, 0x0);
        let pointer = DescriptorPointer {
            limit: (size_of::<[u64; GDT_ENTRIES]>() - 1) as u16,
            base: gdt.as_ptr() as u32,
        };
        asm!(
            "lgdt [{ptr}]",
            "mov ds, {ds:x}",
            "mov es, {ds:x}",
            "mov fs, {ds:x}",
            "mov gs, {ds:x}",
            "mov ss, {ds:x}",
            "push {cs}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            "ltr {tss:x}",
            ptr = in(reg) &pointer,
            ds = in(reg) KERNEL_DS,
            cs = const KERNEL_CS,
            tss = in(reg) TSS_SELECTOR,
            tmp = out(reg) _,
        );
    }
}

fn init_idt() {
    unsafe {
        let idt = &mut *core::ptr::addr_of_mut!(IDT);
        let stubs = &*core::ptr::addr_of!(trap_stub_table);
        for (vector, stub) in stubs.iter().enumerate() {
            idt[vector] = GateDescriptor::interrupt(*stub, 0);
        }
        idt[SYSCALL_VECTOR] = GateDescriptor::interrupt(trap_stub_128 as usize as u32, 3);
        let pointer = DescriptorPointer {
            limit: (size_of::<[GateDescriptor; 256]>() - 1) as u16,
            base: idt.as_ptr() as u32,
        };
        asm!("lidt [{}]", in(reg) &pointer, options(nostack));
    }
}

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xa0;
const PIC2_DATA: u16 = 0xa1;
const PIC_EOI: u8 = 0x20;

fn init_pic() {
    outb(PIC1_COMMAND, 0x11); // ICW1: 级联、需要 ICW4
    outb(PIC2_COMMAND, 0x11);
    outb(PIC1_DATA, super::IRQ_TIMER as u8); // ICW2: 向量基址
    outb(PIC2_DATA, super::IRQ_TIMER as u8 + 8);
    outb(PIC1_DATA, 0x04); // ICW3: 从片接在 IRQ2
    outb(PIC2_DATA, 0x02);
    outb(PIC1_DATA, 0x01); // ICW4: 8086 模式
    outb(PIC2_DATA, 0x01);
    outb(PIC1_DATA, 0b1111_1000); // 只开放时钟、键盘与级联
    outb(PIC2_DATA, 0b1011_1111); // 只开放主 IDE
}

fn init_pit() {
    let divisor = PIT_FREQUENCY / (1000 / TICK_MS);
    outb(0x43, 0x36); // 通道 0，方式 3
    outb(0x40, divisor as u8);
    outb(0x40, (divisor >> 8) as u8);
}

/// 初始化段描述符、中断描述符、中断控制器与时钟
pub fn init() {
    init_gdt();
    init_idt();
    init_pic();
    init_pit();
}

/// 向中断控制器确认中断
pub fn end_of_interrupt(vector: usize) {
    if vector >= super::IRQ_TIMER + 8 {
        outb(PIC2_COMMAND, PIC_EOI);
    }
    outb(PIC1_COMMAND, PIC_EOI);
}

/// 读取键盘扫描码
pub fn read_scancode() -> Option<u8> {
    if inb(0x64) & 1 == 0 {
        None
    } else {
        Some(inb(0x60))
    }
}

const COM1: u16 = 0x3f8;

/// 输出一个字符到串口
pub fn console_putchar(c: u8) {
    while inb(COM1 + 5) & 0x20 == 0 {}
    outb(COM1, c);
}

/// 停机
pub fn halt() -> ! {
    loop {
        unsafe { asm!("cli", "hlt", options(nomem, nostack)) }
    }
}

/// 关机（QEMU/Bochs 的 ACPI 端口）
pub fn poweroff() {
    outw(0x604, 0x2000);
    outw(0xb004, 0x2000);
    halt()
}

/// 通过键盘控制器复位
pub fn reboot() {
    while inb(0x64) & 0x02 != 0 {}
    outb(0x64, 0xfe);
    halt()
}

/// 空闲任务的入口地址
pub fn idle_entry() -> usize {
    idle_loop as usize
}

/// 从给定的陷入帧恢复执行，不再返回
///
/// # Safety
///
/// `frame` 必须位于目标任务内核栈顶部，且内容是一个合法的陷入帧。
pub unsafe fn enter_context(frame: *const crate::task::TrapContext) -> ! {
    asm!("mov eax, {}", "jmp trap_restore", in(reg) frame, options(noreturn))
}
