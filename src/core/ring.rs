use std::collections::VecDeque;

/// 有界先进先出环形缓冲，存放解码后的帧
///
/// 满时 push 拒收并把元素还给调用方，由调用方决定淘汰策略
/// （编排器会先关闭队头再重试）。只在渲染循环与解码回调之间使用，
/// 无跨线程共享。
pub struct FrameRing<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> FrameRing<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 尝试入队；满时返回 Err 并交还元素
    pub fn push(&mut self, item: T) -> std::result::Result<(), T> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// 取出队头
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// 非破坏性查看队头
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 清空并逐个交还所有元素（teardown 时显式关闭用）
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Drop 计数器，模拟帧的关闭语义
    struct Counted(usize, Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_order_preserved_under_capacity() {
        let mut ring = FrameRing::new(4);
        for i in 0..4 {
            assert!(ring.push(i).is_ok());
        }
        assert!(ring.is_full());
        let out: Vec<i32> = std::iter::from_fn(|| ring.pop_front()).collect();
        assert_eq!(out, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_push_full_hands_item_back() {
        let mut ring = FrameRing::new(2);
        assert!(ring.push(1).is_ok());
        assert!(ring.push(2).is_ok());
        assert_eq!(ring.push(3), Err(3));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.peek(), Some(&1));
    }

    #[test]
    fn test_drop_oldest_over_capacity() {
        // 编排器的淘汰策略：满则弹出并关闭队头，再入队新帧
        let closed = Arc::new(AtomicUsize::new(0));
        let mut ring = FrameRing::new(3);

        for i in 0..10usize {
            match ring.push(Counted(i, closed.clone())) {
                Ok(()) => {}
                Err(rejected) => {
                    let evicted = ring.pop_front().unwrap();
                    drop(evicted);
                    assert!(ring.push(rejected).is_ok());
                }
            }
        }

        assert_eq!(ring.len(), 3);
        // 进入 10 个，剩 3 个在环里，被淘汰关闭的是 7 个
        assert_eq!(closed.load(Ordering::SeqCst), 7);
        // 留下的是最新的 3 帧（严格 drop-oldest）
        let kept: Vec<usize> = ring.drain().into_iter().map(|c| c.0).collect();
        assert_eq!(kept, vec![7, 8, 9]);
        assert_eq!(closed.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_peek_is_non_destructive() {
        let mut ring = FrameRing::new(2);
        ring.push(42).ok();
        assert_eq!(ring.peek(), Some(&42));
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.pop_front(), Some(42));
    }
}
