//! 公共类型（对外暴露）
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 检测阶段；声明顺序即执行与结果排序顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    File,
    Process,
    Registry,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::File, Phase::Process, Phase::Registry];

    /// 阶段序号（0 起）
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::File => "file",
            Phase::Process => "process",
            Phase::Registry => "registry",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 注册表根键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hive {
    CurrentUser,
    LocalMachine,
}

impl Hive {
    /// 查询顺序：先当前用户，再本机
    pub const ALL: [Hive; 2] = [Hive::CurrentUser, Hive::LocalMachine];
}

impl fmt::Display for Hive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hive::CurrentUser => f.write_str("HKCU"),
            Hive::LocalMachine => f.write_str("HKLM"),
        }
    }
}

/// 单次命中
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub tool_name: String,
    pub phase: Phase,
    /// 可读证据：命中的路径 / 进程名 / 注册表值
    pub evidence: String,
    pub timestamp: DateTime<Utc>,
}

impl Detection {
    pub fn new(tool_name: impl Into<String>, phase: Phase, evidence: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            phase,
            evidence: evidence.into(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.phase, self.tool_name, self.evidence)
    }
}

/// 扫描会话状态机：Idle -> Running -> {CompletedFull, CompletedPartial, Aborted}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    Running,
    CompletedFull,
    CompletedPartial,
    Aborted,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::CompletedFull | ScanStatus::CompletedPartial | ScanStatus::Aborted
        )
    }
}

/// 日志事件等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
