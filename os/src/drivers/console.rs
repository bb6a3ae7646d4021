//! 控制台输出与 PS/2 键盘输入

use super::Device;
use crate::arch;
use crate::console;
use crate::error::KernelResult;
use alloc::collections::VecDeque;
use spin::Mutex;

/// 经由 [`crate::console`] 输出的控制台
pub struct ConsoleDevice;

impl Device for ConsoleDevice {
    fn read(&self, _addr: usize, _buf: &mut [u8]) -> KernelResult<usize> {
        Ok(0)
    }

    fn write(&self, _addr: usize, buf: &[u8]) -> KernelResult<usize> {
        console::write_bytes(buf);
        Ok(buf.len())
    }
}

// 扫描码集 1，下标为按下时的扫描码
const SCANCODE_MAP: &[u8; 58] = b"\0\x1b1234567890-=\x08\tqwertyuiop[]\n\0asdfghjkl;'`\0\\zxcvbnm,./\0*\0 ";
const SCANCODE_SHIFT_MAP: &[u8; 58] = b"\0\x1b!@#$%^&*()_+\x08\tQWERTYUIOP{}\n\0ASDFGHJKL:\"~\0|ZXCVBNM<>?\0*\0 ";
const LEFT_SHIFT: u8 = 0x2a;
const RIGHT_SHIFT: u8 = 0x36;
const RELEASE: u8 = 0x80;

struct KeyboardState {
    shift: bool,
    input: VecDeque<u8>,
}

/// 键盘：中断时把扫描码翻译成 ASCII 放入输入缓冲区
pub struct Keyboard {
    state: Mutex<KeyboardState>,
}

impl Keyboard {
    /// 空输入缓冲区
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KeyboardState {
                shift: false,
                input: VecDeque::new(),
            }),
        }
    }

    /// 直接放入已翻译的字符
    pub fn push_input(&self, bytes: &[u8]) {
        self.state.lock().input.extend(bytes.iter().copied());
    }

    /// 处理一个扫描码
    pub fn feed(&self, code: u8) {
        let mut state = self.state.lock();
        match code {
            LEFT_SHIFT | RIGHT_SHIFT => state.shift = true,
            c if c == LEFT_SHIFT | RELEASE || c == RIGHT_SHIFT | RELEASE => state.shift = false,
            c if c & RELEASE != 0 => {}
            c => {
                let map = if state.shift { SCANCODE_SHIFT_MAP } else { SCANCODE_MAP };
                match map.get(c as usize) {
                    Some(&ch) if ch != 0 => state.input.push_back(ch),
                    _ => trace!("[kernel] ignore scancode {:#x}", c),
                }
            }
        }
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Keyboard {
    fn read(&self, _addr: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let mut state = self.state.lock();
        let len = buf.len().min(state.input.len());
        for (dst, src) in buf.iter_mut().zip(state.input.drain(..len)) {
            *dst = src;
        }
        Ok(len)
    }

    fn write(&self, _addr: usize, buf: &[u8]) -> KernelResult<usize> {
        console::write_bytes(buf);
        Ok(buf.len())
    }

    fn handle_irq(&self) {
        while let Some(code) = arch::read_scancode() {
            self.feed(code);
        }
    }
}
