//! 核心模块
//!
//! 包含日志事件模型和 tracing 集成层。

pub mod event;
pub mod layer;
