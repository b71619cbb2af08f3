//! 有界数据队列
//!
//! 单生产者角色 / 单消费者角色的 FIFO。容量上限由生产者侧的
//! [`BackpressurePolicy`](crate::BackpressurePolicy) 执行，队列本身不拒绝入队。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

pub struct DataQueue<T = String> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> DataQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 追加到队尾并唤醒一个等待中的消费者。
    pub fn enqueue(&self, item: T) {
        self.items().push_back(item);
        self.notify.notify_one();
    }

    /// 队列为空时挂起等待，不忙等。
    ///
    /// 在 `select!` 中被丢弃不会丢失元素。
    pub async fn dequeue(&self) -> T {
        loop {
            if let Some(item) = self.try_dequeue() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.items().pop_front()
    }

    /// 取出当前全部元素。
    pub fn drain(&self) -> Vec<T> {
        self.items().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DataQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
