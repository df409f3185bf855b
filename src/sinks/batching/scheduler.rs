//! 刷新调度器
//!
//! 一个专用的 tokio 任务，在周期到期、缓冲区达到批量阈值、收到显式刷新请求或
//! 停止请求时执行一次"取空缓冲区并写入"的刷新周期。所有刷新都在这一个任务里
//! 顺序执行，因此不会出现两个重叠的刷新周期。

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::buffer::BatchBuffer;
use super::writer::BulkWriter;
use crate::error::{DbSinkError, Result};

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// 等待下一次触发
    Idle,
    /// 正在执行刷新周期
    Flushing,
    /// 已收到停止请求，正在执行最后一次刷新
    ShuttingDown,
    /// 任务已退出
    Stopped,
}

/// 触发刷新的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Period,
    Threshold,
    Requested,
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushTrigger::Period => "period",
            FlushTrigger::Threshold => "threshold",
            FlushTrigger::Requested => "requested",
            FlushTrigger::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// 刷新任务
struct FlushLoop {
    buffer: Arc<BatchBuffer>,
    writer: BulkWriter,
    period: Duration,
    state: watch::Sender<SchedulerState>,
    stop: watch::Receiver<bool>,
    requests: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
}

impl FlushLoop {
    async fn run(mut self) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger = tokio::select! {
                biased;
                _ = self.stop.changed() => break,
                Some(reply) = self.requests.recv() => {
                    self.cycle(FlushTrigger::Requested).await;
                    let _ = reply.send(());
                    continue;
                }
                _ = self.buffer.threshold_reached() => {
                    // 通知可能早于上一次取空，此时缓冲区已不足一批
                    if self.buffer.len() < self.buffer.batch_posting_limit() {
                        continue;
                    }
                    FlushTrigger::Threshold
                }
                _ = ticker.tick() => FlushTrigger::Period,
            };

            self.cycle(trigger).await;
            if trigger == FlushTrigger::Threshold {
                ticker.reset();
            }
        }

        self.state.send_replace(SchedulerState::ShuttingDown);
        self.cycle(FlushTrigger::Shutdown).await;

        // 停止后到达的刷新请求直接应答
        self.requests.close();
        while let Ok(reply) = self.requests.try_recv() {
            let _ = reply.send(());
        }

        self.state.send_replace(SchedulerState::Stopped);
        info!("刷新调度器已停止");
    }

    /// 取空缓冲区并按批量上限分块写入
    async fn cycle(&self, trigger: FlushTrigger) {
        if trigger != FlushTrigger::Shutdown {
            self.state.send_replace(SchedulerState::Flushing);
        }

        let batch = self.buffer.drain();
        if !batch.is_empty() {
            debug!(rows = batch.len(), trigger = %trigger, "开始刷新");
            for chunk in batch.split(self.buffer.batch_posting_limit()) {
                // 失败已由写入器报告，批次被丢弃
                let _ = self.writer.write(chunk).await;
            }
        }

        if trigger != FlushTrigger::Shutdown {
            self.state.send_replace(SchedulerState::Idle);
        }
    }
}

/// 刷新调度器句柄
pub struct FlushScheduler {
    state: watch::Receiver<SchedulerState>,
    stop: watch::Sender<bool>,
    requests: mpsc::UnboundedSender<oneshot::Sender<()>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("state", &self.state())
            .finish()
    }
}

impl FlushScheduler {
    /// 在当前 tokio 运行时中启动刷新任务
    pub fn spawn(buffer: Arc<BatchBuffer>, writer: BulkWriter, period: Duration) -> Self {
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        let flush_loop = FlushLoop {
            buffer,
            writer,
            period,
            state: state_tx,
            stop: stop_rx,
            requests: request_rx,
        };
        let handle = tokio::spawn(flush_loop.run());

        Self {
            state: state_rx,
            stop: stop_tx,
            requests: request_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// 请求立即刷新并等待该周期完成
    pub async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.requests.send(reply_tx).is_err() {
            return Err(DbSinkError::SinkClosed);
        }
        reply_rx.await.map_err(|_| DbSinkError::SinkClosed)
    }

    /// 请求停止，等待最后一次刷新完成
    ///
    /// 重复调用是安全的；只有第一次调用会等待任务。
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let _ = self.stop.send(true);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DbSinkError::background_task(format!("flush task failed: {}", e))),
            Err(_) => Err(DbSinkError::ShutdownTimeout),
        }
    }
}
