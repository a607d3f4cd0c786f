//! 错误类型：数据源单次调用结果 + 初始化期致命错误
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 单次数据源调用的失败原因
///
/// 引擎只在最小范围内消化这些错误（单个条目/单次调用），不会让它们上升为阶段失败。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// 预期内的缺失（注册表键不存在等），静默跳过
    #[error("not found")]
    NotFound,

    #[error("access denied: {0}")]
    AccessDenied(String),

    /// 调用在限定时间内未返回，后台任务已被放弃
    #[error("call did not return within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// 将 io 错误映射到数据源错误分类
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound,
            io::ErrorKind::PermissionDenied => SourceError::AccessDenied(err.to_string()),
            _ => SourceError::Other(err.to_string()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound)
    }
}

impl From<io::Error> for SourceError {
    fn from(err: io::Error) -> Self {
        SourceError::from_io(&err)
    }
}

/// 初始化期致命错误（签名库、配置、数据源构建）
///
/// 出现此类错误时扫描会话直接进入 Aborted，不运行任何阶段。
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to parse signature database: {0}")]
    Signatures(#[from] toml::de::Error),

    #[error("signature entry #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("duplicate signature name {name:?} (entries #{first} and #{second})")]
    DuplicateSignature {
        name: String,
        first: usize,
        second: usize,
    },

    #[error("invalid name pattern {pattern:?} for {name:?}: {source}")]
    InvalidPattern {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("invalid config value for {field}: {reason}")]
    ConfigInvalid { field: &'static str, reason: String },

    #[error("failed to initialise data source: {0}")]
    Adapter(String),
}
