//! 有界资源池与 PID 分配
//!
//! [`SlotPool`] 是一个定长的槽位数组加空闲下标表，任务表和描述符表都建立在它上面；
//! [`RecycleAllocator`] 负责分配可回收的 PID。

use alloc::vec::Vec;

/// 有界槽位池：槽位数组 + 空闲下标栈
pub struct SlotPool<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>, // 已释放、可复用的下标
    capacity: usize,
    len: usize,
}

impl<T> SlotPool<T> {
    /// 最多容纳 `capacity` 个元素
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
            len: 0,
        }
    }

    /// 放入一个元素，返回其下标；池满时原样交还
    pub fn insert(&mut self, value: T) -> Result<usize, T> {
        let idx = if let Some(idx) = self.free.pop() {
            idx
        } else if self.slots.len() < self.capacity {
            self.slots.push(None);
            self.slots.len() - 1
        } else {
            return Err(value);
        };
        debug_assert!(self.slots[idx].is_none());
        self.slots[idx] = Some(value);
        self.len += 1;
        Ok(idx)
    }

    /// 取出下标处的元素并释放槽位
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        let value = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        self.len -= 1;
        Some(value)
    }

    /// 不可变访问
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx)?.as_ref()
    }

    /// 可变访问
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx)?.as_mut()
    }

    /// 按下标顺序遍历占用的槽位
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|v| (idx, v)))
    }

    /// 按下标顺序可变遍历占用的槽位
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_mut().map(|v| (idx, v)))
    }

    /// 已占用的槽位数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 回收分配器，用于分配和回收 PID
pub struct RecycleAllocator {
    current: usize,       // 下一个从未分配过的值
    recycled: Vec<usize>, // 已回收的值
}

impl RecycleAllocator {
    /// 从 `start` 开始分配
    pub fn new(start: usize) -> Self {
        RecycleAllocator {
            current: start,
            recycled: Vec::new(),
        }
    }
    /// 分配一个值，优先复用回收的值
    pub fn alloc(&mut self) -> usize {
        if let Some(id) = self.recycled.pop() {
            id
        } else {
            self.current += 1;
            self.current - 1
        }
    }
    /// 回收一个值
    pub fn dealloc(&mut self, id: usize) {
        assert!(id < self.current);
        assert!(
            !self.recycled.iter().any(|i| *i == id),
            "id {} has been deallocated!",
            id
        );
        self.recycled.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_bounded_and_reuses_slots() {
        let mut pool = SlotPool::new(2);
        let a = pool.insert("a").unwrap();
        let b = pool.insert("b").unwrap();
        assert_eq!(pool.insert("c"), Err("c"));
        assert_eq!(pool.remove(a), Some("a"));
        assert_eq!(pool.remove(a), None);
        assert_eq!(pool.insert("d"), Ok(a));
        assert_eq!(pool.get(b), Some(&"b"));
        assert_eq!(pool.len(), 2);
        let items: Vec<_> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(items, ["d", "b"]);
    }

    #[test]
    fn pids_are_recycled() {
        let mut pids = RecycleAllocator::new(0);
        assert_eq!(pids.alloc(), 0);
        assert_eq!(pids.alloc(), 1);
        pids.dealloc(0);
        assert_eq!(pids.alloc(), 0);
        assert_eq!(pids.alloc(), 2);
    }

    #[test]
    #[should_panic(expected = "has been deallocated")]
    fn double_dealloc_panics() {
        let mut pids = RecycleAllocator::new(0);
        let id = pids.alloc();
        pids.dealloc(id);
        pids.dealloc(id);
    }
}
