//! 控制台输出：`print!` 与 `println!`

use crate::arch::console_putchar;
use core::fmt::{self, Write};
use spin::Mutex;

struct Stdout;

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.bytes() {
            console_putchar(c);
        }
        Ok(())
    }
}

static STDOUT: Mutex<Stdout> = Mutex::new(Stdout);

/// 输出格式化字符串
pub fn print(args: fmt::Arguments) {
    STDOUT.lock().write_fmt(args).ok();
}

/// 原样输出字节（控制台设备的写路径）
pub fn write_bytes(bytes: &[u8]) {
    let _stdout = STDOUT.lock();
    for &b in bytes {
        console_putchar(b);
    }
}

/// 打印格式化字符串，不换行
#[macro_export]
macro_rules! print {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print(format_args!($fmt $(, $($arg)+)?))
    }
}

/// 打印格式化字符串并换行
#[macro_export]
macro_rules! println {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?))
    }
}
