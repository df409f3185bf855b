//! Sink 构建器
//!
//! 把配置、外部列定义和连接注册表组装成可用的 sink：校验配置，合并列映射，
//! 解析连接字符串，打开存储，在启动时确认目标表，然后创建批量或审计 sink。

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{validate_config, DbSinkConfig};
use crate::connection::ConnectionRegistry;
use crate::diagnostics::Diagnostics;
use crate::error::{DbSinkError, Result};
use crate::sinks::audit::AuditSink;
use crate::sinks::batching::{BatchingOptions, BatchingSink, BulkWriter, RetryPolicy};
use crate::sinks::database::column_options::ColumnOptions;
use crate::sinks::database::columns::{merge_additional_columns, ColumnMapping};
use crate::sinks::database::projector::RowProjector;
use crate::sinks::database::schema::{ProvisionOutcome, SchemaDescriptor, SchemaProvisioner};
use crate::sinks::database::store::LogStore;

/// 默认的停机等待时间
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 数据库 sink 构建器
#[derive(Debug)]
pub struct DbSinkBuilder {
    config: DbSinkConfig,
    registry: Option<Arc<dyn ConnectionRegistry>>,
    column_options: Option<ColumnOptions>,
    store: Option<Arc<dyn LogStore>>,
    diagnostics: Option<Arc<Diagnostics>>,
    shutdown_timeout: Duration,
}

/// 构建两种 sink 共用的部分
struct Prepared {
    mapping: ColumnMapping,
    descriptor: Arc<SchemaDescriptor>,
    store: Arc<dyn LogStore>,
    diagnostics: Arc<Diagnostics>,
    outcome: ProvisionOutcome,
}

impl DbSinkBuilder {
    pub fn new(config: DbSinkConfig) -> Self {
        Self {
            config,
            registry: None,
            column_options: None,
            store: None,
            diagnostics: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// 用于解析连接名的注册表
    pub fn connection_registry(mut self, registry: Arc<dyn ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 合并进映射的外部附加列
    pub fn column_options(mut self, options: ColumnOptions) -> Self {
        self.column_options = Some(options);
        self
    }

    /// 使用给定的存储，而不是根据连接字符串打开连接池
    pub fn store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn config(&self) -> &DbSinkConfig {
        &self.config
    }

    /// 构建批量 sink
    ///
    /// 必须在 tokio 运行时中调用；刷新任务随 sink 一起启动。
    pub async fn build_batching(self) -> Result<BatchingSink> {
        let prepared = self.prepare().await?;
        let config = &self.config;

        let options = BatchingOptions {
            batch_posting_limit: config.batch_posting_limit,
            period: config.period(),
            queue_limit: config.queue_limit,
            min_level: config.min_level()?,
            after_shutdown: config.after_shutdown,
            shutdown_timeout: self.shutdown_timeout,
        };
        let writer = BulkWriter::new(
            prepared.store,
            prepared.descriptor.clone(),
            RetryPolicy::from(&config.retry),
            prepared.diagnostics.clone(),
        );
        let projector = RowProjector::new(prepared.mapping, config.formatting.clone());

        info!(
            table = %prepared.descriptor.table(),
            outcome = ?prepared.outcome,
            "批量数据库 sink 构建完成"
        );
        Ok(BatchingSink::new(
            projector,
            writer,
            options,
            prepared.diagnostics,
        ))
    }

    /// 构建审计 sink
    pub async fn build_audit(self) -> Result<AuditSink> {
        let prepared = self.prepare().await?;
        let config = &self.config;

        let projector = RowProjector::new(prepared.mapping, config.formatting.clone());
        info!(
            table = %prepared.descriptor.table(),
            outcome = ?prepared.outcome,
            "审计数据库 sink 构建完成"
        );
        Ok(AuditSink::new(
            projector,
            prepared.store,
            prepared.descriptor,
            prepared.diagnostics,
            config.min_level()?,
        ))
    }

    async fn prepare(&self) -> Result<Prepared> {
        validate_config(&self.config)?;

        let mut mapping = self.config.columns.to_mapping()?;
        if let Some(options) = &self.column_options {
            mapping = merge_additional_columns(&mapping, &options.definitions())?;
        }
        debug!(columns = %mapping, "列映射已确定");

        let descriptor = Arc::new(SchemaDescriptor::new(self.config.table(), &mapping)?);
        let diagnostics = self
            .diagnostics
            .clone()
            .unwrap_or_else(|| Arc::new(Diagnostics::new()));

        let store = match &self.store {
            Some(store) => store.clone(),
            None => self.open_store(&diagnostics).await?,
        };

        let provisioner =
            SchemaProvisioner::new(store.clone(), self.config.auto_create_table, diagnostics.clone());
        let provision_descriptor = descriptor.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            provisioner.ensure_table(&provision_descriptor)
        })
        .await
        .map_err(|e| DbSinkError::background_task(format!("schema provisioning task failed: {}", e)))??;

        Ok(Prepared {
            mapping,
            descriptor,
            store,
            diagnostics,
            outcome,
        })
    }

    #[cfg(feature = "database")]
    async fn open_store(&self, diagnostics: &Diagnostics) -> Result<Arc<dyn LogStore>> {
        use crate::connection::resolve_connection_string;
        use crate::sinks::database::pool::DieselStore;

        let connection_string = resolve_connection_string(
            &self.config.connection_string,
            self.registry.as_deref(),
            diagnostics,
        );
        let db_type = self.config.db_type;
        let pool_size = self.config.connection_pool_size;
        let timeout = Duration::from_millis(self.config.connection_timeout_ms);

        let store = tokio::task::spawn_blocking(move || {
            DieselStore::connect(db_type, &connection_string, pool_size, timeout)
        })
        .await
        .map_err(|e| DbSinkError::background_task(format!("connection task failed: {}", e)))??;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "database"))]
    async fn open_store(&self, _diagnostics: &Diagnostics) -> Result<Arc<dyn LogStore>> {
        Err(DbSinkError::FeatureNotEnabled("database".to_string()))
    }
}
