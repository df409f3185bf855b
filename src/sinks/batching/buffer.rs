//! 批量缓冲区
//!
//! 生产者在短暂持锁下追加行，刷新任务一次性取走全部行。缓冲区有软容量：
//! 超过容量时仍接受行，但通过诊断通道报告一次，直到下一次清空后重新布防。

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::sinks::database::models::{Batch, Row};

#[derive(Debug, Default)]
struct BufferState {
    rows: Vec<Row>,
    overflow_reported: bool,
}

/// 并发安全的行缓冲区
#[derive(Debug)]
pub struct BatchBuffer {
    state: Mutex<BufferState>,
    batch_posting_limit: usize,
    capacity: usize,
    threshold: Notify,
    diagnostics: Arc<Diagnostics>,
}

impl BatchBuffer {
    /// 创建新的缓冲区
    ///
    /// `batch_posting_limit` 达到时唤醒刷新任务；`capacity` 是软容量。
    pub fn new(batch_posting_limit: usize, capacity: usize, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            batch_posting_limit: batch_posting_limit.max(1),
            capacity: capacity.max(1),
            threshold: Notify::new(),
            diagnostics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 追加一行，返回追加后的行数
    ///
    /// 从不阻塞在 I/O 上，也从不拒绝行。
    pub fn enqueue(&self, row: Row) -> usize {
        let (len, overflowed) = {
            let mut state = self.lock();
            state.rows.push(row);
            let len = state.rows.len();
            let overflowed = len > self.capacity && !state.overflow_reported;
            if overflowed {
                state.overflow_reported = true;
            }
            (len, overflowed)
        };

        if overflowed {
            self.diagnostics.report(DiagnosticEvent::BufferOverflow {
                buffered: len,
                capacity: self.capacity,
            });
        }
        if len >= self.batch_posting_limit {
            self.threshold.notify_one();
        }
        len
    }

    /// 原子地取走所有行
    pub fn drain(&self) -> Batch {
        let rows = {
            let mut state = self.lock();
            state.overflow_reported = false;
            std::mem::take(&mut state.rows)
        };
        Batch::new(rows)
    }

    /// 等待行数达到批量阈值
    ///
    /// 阈值在无人等待时到达也会被记住，下一次调用立即返回。
    pub async fn threshold_reached(&self) {
        self.threshold.notified().await
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_posting_limit(&self) -> usize {
        self.batch_posting_limit
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
