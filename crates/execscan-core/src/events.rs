//! 扫描事件（单向发往展示层，发送即忘）
use serde::Serialize;
use std::sync::Arc;

use crate::types::{LogLevel, Phase, ScanStatus};

/// 扫描过程中发出的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanStarted { signatures: usize },
    PhaseStarted { phase: Phase, items_total: usize },
    /// 每批条目处理完后的增量进度
    Progress {
        phase: Phase,
        items_checked: usize,
        items_total: usize,
    },
    Log { level: LogLevel, message: String },
    PhaseFinished {
        phase: Phase,
        found: usize,
        timed_out: bool,
    },
    ScanFinished { status: ScanStatus, total_found: usize },
}

/// 事件接收端；实现必须立即返回，核心不会等待消费者
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ScanEvent) {}
}

impl EventSink for crossbeam_channel::Sender<ScanEvent> {
    fn emit(&self, event: ScanEvent) {
        // 通道满或接收端已关闭时直接丢弃
        let _ = self.try_send(event);
    }
}

/// 同时写 tracing 日志与事件通道的小工具
#[derive(Clone)]
pub(crate) struct Emitter {
    sink: Arc<dyn EventSink>,
}

impl Emitter {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, event: ScanEvent) {
        self.sink.emit(event);
    }

    pub(crate) fn progress(&self, phase: Phase, items_checked: usize, items_total: usize) {
        self.emit(ScanEvent::Progress { phase, items_checked, items_total });
    }

    pub(crate) fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
        self.emit(ScanEvent::Log { level, message });
    }

    pub(crate) fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into());
    }

    pub(crate) fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into());
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into());
    }
}
