//! 签名库加载（TOML，内置打包）
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ScanError;

/// 内置签名库原文
const BUNDLED_SIGNATURES: &str = include_str!("../signatures/executors.toml");

/// 签名文件中的单个条目（所有标识字段均可省略）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureSpec {
    pub name: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub hashes: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub registry: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub processes: Vec<String>,
}

/// 顶层签名文件结构
#[derive(Debug, Deserialize)]
struct SignatureFile {
    #[serde(default)]
    executor: Vec<SignatureSpec>,
}

/// 归一化后的签名条目；加载后不可变
#[derive(Debug, Clone)]
pub struct SignatureEntry {
    pub name: String,
    pub file_names: Vec<String>,
    /// 小写 SHA-256 十六进制
    pub content_hashes: Vec<String>,
    pub name_patterns: Vec<Regex>,
    pub registry_paths: Vec<String>,
    pub folder_names: Vec<String>,
    pub process_names: Vec<String>,
}

impl SignatureEntry {
    fn from_spec(spec: SignatureSpec) -> Result<Self, ScanError> {
        let mut name_patterns = Vec::with_capacity(spec.patterns.len());
        for pat in &spec.patterns {
            // 文件系统大小写不敏感，模式统一按不区分大小写编译
            let rx = RegexBuilder::new(pat)
                .case_insensitive(true)
                .build()
                .map_err(|source| ScanError::InvalidPattern {
                    name: spec.name.clone(),
                    pattern: pat.clone(),
                    source,
                })?;
            name_patterns.push(rx);
        }
        Ok(Self {
            name: spec.name.trim().to_string(),
            file_names: spec.files,
            content_hashes: spec.hashes.iter().map(|h| h.trim().to_ascii_lowercase()).collect(),
            name_patterns,
            registry_paths: spec.registry,
            folder_names: spec.folders,
            process_names: spec.processes,
        })
    }

    /// 文件阶段是否有可测试的标识
    pub fn has_file_identifiers(&self) -> bool {
        !(self.file_names.is_empty()
            && self.folder_names.is_empty()
            && self.name_patterns.is_empty()
            && self.content_hashes.is_empty())
    }
}

/// 只读签名库；可被多个阶段无锁并发读取
#[derive(Debug, Clone, Default)]
pub struct SignatureDatabase {
    entries: Vec<Arc<SignatureEntry>>,
}

impl SignatureDatabase {
    /// 加载内置签名库
    pub fn load() -> Result<Self, ScanError> {
        Self::from_toml_str(BUNDLED_SIGNATURES)
    }

    /// 从 TOML 文本加载
    pub fn from_toml_str(text: &str) -> Result<Self, ScanError> {
        let parsed: SignatureFile = toml::from_str(text)?;
        Self::from_entries(parsed.executor)
    }

    /// 从条目列表构建并校验：名称非空、（不区分大小写）唯一、模式可编译
    pub fn from_entries(specs: Vec<SignatureSpec>) -> Result<Self, ScanError> {
        let mut seen: HashMap<String, usize> = HashMap::with_capacity(specs.len());
        let mut entries = Vec::with_capacity(specs.len());

        for (index, spec) in specs.into_iter().enumerate() {
            let key = spec.name.trim().to_lowercase();
            if key.is_empty() {
                return Err(ScanError::EmptyName { index });
            }
            // 重名不做静默覆盖
            if let Some(&first) = seen.get(&key) {
                return Err(ScanError::DuplicateSignature {
                    name: spec.name.trim().to_string(),
                    first,
                    second: index,
                });
            }
            seen.insert(key, index);
            entries.push(Arc::new(SignatureEntry::from_spec(spec)?));
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[Arc<SignatureEntry>] {
        &self.entries
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按名称查找（不区分大小写）
    pub fn get(&self, name: &str) -> Option<&Arc<SignatureEntry>> {
        self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name.trim()))
    }

    /// 签名库顺序的前 `limit` 个条目
    pub fn common(&self, limit: usize) -> &[Arc<SignatureEntry>] {
        &self.entries[..limit.min(self.entries.len())]
    }
}
