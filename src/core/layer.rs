//! tracing 集成层
//!
//! [`DbSinkLayer`] 把 `tracing` 事件转换成 [`LogEvent`] 并交给一个 [`DbSink`]。
//! 事件字段中的 `message` 成为消息文本，`error` / `exception` 成为异常文本，
//! 其余字段按原始类型成为属性。当前 span 的名称和 ID 被记录到 `span_id`。
//!
//! 本 crate 自身的诊断日志不会被转发，以免写入失败时形成反馈回路。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{error, Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::core::event::{LogEvent, LogLevel};
use crate::diagnostics::{DiagnosticEvent, Diagnostics, SELF_LOG_TARGET};
use crate::sinks::traits::DbSink;

const CRATE_TARGET_PREFIX: &str = "quantum_log_db";

/// 把 tracing 事件写入数据库 sink 的层
pub struct DbSinkLayer<S: DbSink> {
    sink: Arc<S>,
    diagnostics: Option<Arc<Diagnostics>>,
}

impl<S: DbSink> fmt::Debug for DbSinkLayer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSinkLayer")
            .field("sink", &self.sink.name())
            .finish()
    }
}

impl<S: DbSink> DbSinkLayer<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self {
            sink,
            diagnostics: None,
        }
    }

    /// sink 拒绝事件时向此诊断实例报告
    ///
    /// 未设置时使用 sink 自己的诊断实例；两者都没有时写一条自诊断错误日志。
    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }
}

/// 事件字段提取器
#[derive(Default)]
struct FieldExtractor {
    message: Option<String>,
    exception: Option<String>,
    properties: BTreeMap<String, Value>,
}

impl FieldExtractor {
    fn record_value(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            "error" | "exception" => {
                self.exception = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            name => {
                self.properties.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldExtractor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, Value::from(format!("{:?}", value)));
    }
}

fn is_self_log(target: &str) -> bool {
    target == SELF_LOG_TARGET || target.starts_with(CRATE_TARGET_PREFIX)
}

impl<S, Sub> Layer<Sub> for DbSinkLayer<S>
where
    S: DbSink + 'static,
    Sub: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, Sub>) {
        let metadata = event.metadata();
        if is_self_log(metadata.target()) {
            return;
        }

        let level = LogLevel::from(*metadata.level());
        if level < self.sink.min_level() {
            return;
        }

        let mut fields = FieldExtractor::default();
        event.record(&mut fields);

        let message = fields.message.unwrap_or_default();
        let mut log_event = LogEvent::new(level, message.clone())
            .with_template(message)
            .with_target(metadata.target());
        log_event.properties = fields.properties;
        if let Some(exception) = fields.exception {
            log_event = log_event.with_exception(exception);
        }
        if let Some(span) = ctx.event_span(event) {
            log_event.span_id = Some(format!("{}:{}", span.name(), span.id().into_u64()));
        }

        if let Err(e) = self.sink.emit(&log_event) {
            let diagnostics = self.diagnostics.as_ref().or_else(|| self.sink.diagnostics());
            match diagnostics {
                Some(diagnostics) => diagnostics.report(DiagnosticEvent::EventDropped {
                    reason: e.to_string(),
                }),
                None => error!(
                    target: SELF_LOG_TARGET,
                    sink = self.sink.name(),
                    "sink rejected event: {}",
                    e
                ),
            }
        }
    }
}
