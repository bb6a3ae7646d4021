//! 宿主机上的模拟 CPU
//!
//! 记录中断使能位、当前页目录、内核栈顶、电源请求以及控制台输出，供测试断言。
//! 测试时每个线程拥有独立的一份状态，互不干扰。

use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// 电源操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    /// 关机
    PowerOff,
    /// 重启
    Reboot,
}

/// 模拟 CPU 的可观察状态
#[derive(Debug, Clone, Default)]
pub struct SimulatedCpu {
    /// EFLAGS.IF
    pub interrupts: bool,
    /// 最近一次装入 cr3 的页目录物理地址
    pub page_directory: usize,
    /// 最近一次写入 TSS.esp0 的值
    pub kernel_stack: usize,
    /// 已请求的电源操作
    pub power: Option<PowerAction>,
    /// 控制台输出
    pub console: Vec<u8>,
    /// 键盘端口中待读取的扫描码
    pub scancodes: VecDeque<u8>,
}

#[cfg(test)]
std::thread_local! {
    static CPU: core::cell::RefCell<SimulatedCpu> = core::cell::RefCell::new(SimulatedCpu::default());
}

#[cfg(not(test))]
static CPU: spin::Mutex<Option<SimulatedCpu>> = spin::Mutex::new(None);

fn with_cpu<R>(f: impl FnOnce(&mut SimulatedCpu) -> R) -> R {
    #[cfg(test)]
    {
        CPU.with(|cpu| f(&mut cpu.borrow_mut()))
    }
    #[cfg(not(test))]
    {
        f(CPU.lock().get_or_insert_with(SimulatedCpu::default))
    }
}

/// 当前模拟 CPU 状态的快照
pub fn snapshot() -> SimulatedCpu {
    with_cpu(|cpu| cpu.clone())
}

/// 向模拟键盘端口注入扫描码
pub fn push_scancode(code: u8) {
    with_cpu(|cpu| cpu.scancodes.push_back(code));
}

/// 取走控制台输出
pub fn take_console_output() -> Vec<u8> {
    with_cpu(|cpu| core::mem::take(&mut cpu.console))
}

/// 中断是否开启
pub fn interrupts_enabled() -> bool {
    with_cpu(|cpu| cpu.interrupts)
}

/// 关中断
pub fn disable_interrupts() {
    with_cpu(|cpu| cpu.interrupts = false);
}

/// 开中断
pub fn enable_interrupts() {
    with_cpu(|cpu| cpu.interrupts = true);
}

/// 切换页目录
pub fn load_page_directory(pa: usize) {
    with_cpu(|cpu| cpu.page_directory = pa);
}

/// 设置从用户态陷入时使用的内核栈
pub fn set_kernel_stack(top: usize) {
    with_cpu(|cpu| cpu.kernel_stack = top);
}

/// 输出一个字符
pub fn console_putchar(c: u8) {
    with_cpu(|cpu| cpu.console.push(c));
}

/// 向中断控制器确认中断
pub fn end_of_interrupt(_vector: usize) {}

/// 读取键盘扫描码
pub fn read_scancode() -> Option<u8> {
    with_cpu(|cpu| cpu.scancodes.pop_front())
}

/// 停机
pub fn halt() -> ! {
    panic!("machine halted");
}

/// 关机
pub fn poweroff() {
    with_cpu(|cpu| cpu.power = Some(PowerAction::PowerOff));
}

/// 重启
pub fn reboot() {
    with_cpu(|cpu| cpu.power = Some(PowerAction::Reboot));
}

fn idle_loop() -> ! {
    halt()
}

/// 空闲任务的入口地址
pub fn idle_entry() -> usize {
    idle_loop as usize
}
