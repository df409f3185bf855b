//! 批量写入器
//!
//! 把一个批次以多值 `INSERT` 写入存储，行数受后端参数上限约束。可重试错误按指数退避重试同一批次，
//! 结构性错误立即放弃。放弃的批次通过诊断通道报告后丢弃，不会回到缓冲区。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::RetryConfig;
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::error::{DbSinkError, Result, StoreError};
use crate::sinks::database::models::Batch;
use crate::sinks::database::schema::SchemaDescriptor;
use crate::sinks::database::store::LogStore;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数，包含第一次
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次（从 1 开始）失败后的等待时间
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// 批量写入器
#[derive(Debug, Clone)]
pub struct BulkWriter {
    store: Arc<dyn LogStore>,
    descriptor: Arc<SchemaDescriptor>,
    policy: RetryPolicy,
    diagnostics: Arc<Diagnostics>,
}

impl BulkWriter {
    pub fn new(
        store: Arc<dyn LogStore>,
        descriptor: Arc<SchemaDescriptor>,
        policy: RetryPolicy,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            store,
            descriptor,
            policy,
            diagnostics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 写入一个批次
    ///
    /// 行数超过后端单条语句的参数上限时，按上限拆成多条 `INSERT` 依次写入，
    /// 每条独立重试。返回成功写入的行数；任一部分失败时返回第一个错误。
    pub async fn write(&self, batch: Batch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let max_rows = self.descriptor.max_rows_per_insert(self.store.dialect());
        let mut written = 0;
        let mut first_error = None;
        for part in batch.split(max_rows) {
            match self.write_part(part).await {
                Ok(rows) => written += rows,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    async fn write_part(&self, batch: Batch) -> Result<usize> {
        let rows = batch.len();
        let batch = Arc::new(batch);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let store = self.store.clone();
            let descriptor = self.descriptor.clone();
            let shared = batch.clone();
            let result =
                tokio::task::spawn_blocking(move || store.insert_rows(&descriptor, shared.rows())).await;

            let error = match result {
                Ok(Ok(written)) => {
                    self.diagnostics.record_batch_written(written);
                    debug!(
                        table = %self.descriptor.table(),
                        rows = written,
                        attempt,
                        "批次已写入"
                    );
                    return Ok(written);
                }
                Ok(Err(e)) => e,
                Err(e) => StoreError::structural(format!("insert task failed: {}", e)),
            };

            if error.is_transient() && attempt < self.policy.max_attempts {
                let delay = self.policy.delay_after(attempt);
                self.diagnostics.report(DiagnosticEvent::RetryScheduled {
                    attempt,
                    delay,
                    error: error.message.clone(),
                });
                tokio::time::sleep(delay).await;
                continue;
            }

            self.diagnostics.report(DiagnosticEvent::BatchFailed {
                rows,
                attempts: attempt,
                error: error.to_string(),
            });
            return Err(DbSinkError::from(error));
        }
    }
}
