//! 单处理器上的关中断临界区

use crate::arch;
use core::cell::{RefCell, RefMut};
use core::ops::{Deref, DerefMut};

/// 关中断守卫：创建时记录并关闭中断，析构时恢复原来的状态
pub struct IntrGuard {
    enabled: bool,
}

impl IntrGuard {
    /// 进入临界区
    pub fn new() -> Self {
        let enabled = arch::interrupts_enabled();
        arch::disable_interrupts();
        Self { enabled }
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        if self.enabled {
            arch::enable_interrupts();
        }
    }
}

/// 只在单处理器上使用的内部可变容器
///
/// 访问期间关闭中断，因此中断处理程序不会观察到修改到一半的状态。
pub struct UPIntrFreeCell<T> {
    inner: RefCell<T>,
}

unsafe impl<T> Sync for UPIntrFreeCell<T> {}

/// [`UPIntrFreeCell::exclusive_access`] 返回的引用，析构时恢复中断状态
pub struct UPIntrRefMut<'a, T> {
    // 先释放借用再恢复中断
    inner: RefMut<'a, T>,
    _guard: IntrGuard,
}

impl<T> UPIntrFreeCell<T> {
    /// 用户需要保证只在单处理器上使用
    pub unsafe fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    /// 独占访问内部数据，重复借用时 panic
    pub fn exclusive_access(&self) -> UPIntrRefMut<'_, T> {
        let guard = IntrGuard::new();
        UPIntrRefMut {
            inner: self.inner.borrow_mut(),
            _guard: guard,
        }
    }
}

impl<T> Deref for UPIntrRefMut<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for UPIntrRefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
