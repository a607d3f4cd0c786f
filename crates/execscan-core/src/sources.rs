//! 数据源接口：文件探测 / 进程列表 / 注册表读取
//!
//! 核心只对这些接口施加策略（限时、隔离、重试与否），不包含任何 I/O 逻辑。
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ScanError, SourceError};
use crate::options::ScanConfig;
use crate::types::Hive;

/// 文件探测查询
#[derive(Debug, Clone)]
pub enum FileQuery {
    /// 候选目录下的相对文件路径
    Name(String),
    /// 候选根目录下的文件夹
    Folder(String),
    /// 候选目录直接包含的文件名匹配
    Pattern(Regex),
    /// 内容 SHA-256（小写十六进制）
    Digest(String),
}

/// 文件探测：只在固定的候选目录集合内查找，绝不递归遍历整个磁盘
pub trait FileProbe: Send + Sync {
    /// 命中时返回匹配到的路径（用作证据）
    fn exists(&self, query: &FileQuery) -> Result<Option<PathBuf>, SourceError>;
}

/// 当前运行的进程名列表
pub trait ProcessLister: Send + Sync {
    fn list_running(&self) -> Result<Vec<String>, SourceError>;
}

/// 注册表读取
pub trait RegistryReader: Send + Sync {
    /// 打开键并枚举至多 `limit` 个 (名称, 值)；键不存在时返回 `SourceError::NotFound`
    fn open_and_enumerate(
        &self,
        hive: Hive,
        path: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>, SourceError>;

    /// 键是否存在
    fn key_exists(&self, hive: Hive, path: &str) -> Result<bool, SourceError> {
        match self.open_and_enumerate(hive, path, 0) {
            Ok(_) => Ok(true),
            Err(SourceError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// 三个数据源的集合（可廉价克隆并跨线程共享）
#[derive(Clone)]
pub struct DataSources {
    pub files: Arc<dyn FileProbe>,
    pub processes: Arc<dyn ProcessLister>,
    pub registry: Arc<dyn RegistryReader>,
}

impl DataSources {
    pub fn new(
        files: Arc<dyn FileProbe>,
        processes: Arc<dyn ProcessLister>,
        registry: Arc<dyn RegistryReader>,
    ) -> Self {
        Self { files, processes, registry }
    }

    /// 构建本机数据源
    pub fn native(config: &ScanConfig) -> Result<Self, ScanError> {
        let files = crate::native::CandidateDirProbe::from_environment(&config.search_dirs)?;
        Ok(Self {
            files: Arc::new(files),
            processes: Arc::new(crate::native::SysinfoProcessLister::default()),
            registry: crate::native::system_registry(),
        })
    }
}
