//! 本机数据源实现
//!
//! - 文件：固定候选目录（及其直接子目录），构建时一次性枚举，之后不再扩展
//! - 进程：sysinfo
//! - 注册表：Windows 上使用 winreg，其余平台视为所有键都不存在
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use sysinfo::{ProcessesToUpdate, System};
use walkdir::WalkDir;

use crate::error::{ScanError, SourceError};
use crate::sources::{FileProbe, FileQuery, ProcessLister, RegistryReader};
use crate::types::Hive;

/// 候选目录数量上限（根目录 + 直接子目录）
pub const MAX_CANDIDATE_DIRS: usize = 512;
/// 参与摘要比对的单文件大小上限
pub const MAX_DIGEST_BYTES: u64 = 64 * 1024 * 1024;

/// 基于固定候选目录的文件探测
#[derive(Debug)]
pub struct CandidateDirProbe {
    roots: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    /// 路径 -> SHA-256（None 表示无法读取或超过大小上限）
    digests: Mutex<HashMap<PathBuf, Option<String>>>,
}

impl CandidateDirProbe {
    /// 以给定根目录构建；不存在的根目录被忽略
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut seen = HashSet::new();
        let roots: Vec<PathBuf> = roots
            .into_iter()
            .filter(|r| r.is_dir())
            .filter(|r| seen.insert(r.clone()))
            .collect();

        let mut dirs: Vec<PathBuf> = roots.clone();
        'outer: for root in &roots {
            // 只看根目录的直接子目录（深度 1）
            for entry in WalkDir::new(root).min_depth(1).max_depth(1).follow_links(false) {
                let entry = match entry { Ok(e) => e, Err(_) => continue };
                if !entry.file_type().is_dir() { continue; }
                if dirs.len() >= MAX_CANDIDATE_DIRS {
                    tracing::debug!(limit = MAX_CANDIDATE_DIRS, "candidate directory limit reached");
                    break 'outer;
                }
                let path = entry.into_path();
                if seen.insert(path.clone()) {
                    dirs.push(path);
                }
            }
        }
        tracing::debug!(roots = roots.len(), dirs = dirs.len(), "candidate directories enumerated");

        Self { roots, dirs, digests: Mutex::new(HashMap::new()) }
    }

    /// 常见安装/下载位置 + 用户额外指定的目录
    ///
    /// 用户显式指定的目录不存在时视为初始化失败。
    pub fn from_environment(extra: &[PathBuf]) -> Result<Self, ScanError> {
        for dir in extra {
            if !dir.is_dir() {
                return Err(ScanError::Adapter(format!(
                    "search directory {} is not a directory",
                    dir.display()
                )));
            }
        }
        let mut roots = default_roots();
        roots.extend(extra.iter().cloned());
        Ok(Self::new(roots))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn candidate_dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn find_name(&self, name: &str) -> Option<PathBuf> {
        self.dirs.iter().map(|d| d.join(name)).find(|p| p.is_file())
    }

    fn find_folder(&self, folder: &str) -> Option<PathBuf> {
        self.roots.iter().map(|r| r.join(folder)).find(|p| p.is_dir())
    }

    fn find_pattern(&self, re: &regex::Regex) -> Option<PathBuf> {
        self.dirs.iter().find_map(|d| {
            direct_files(d).find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| re.is_match(n))
                    .unwrap_or(false)
            })
        })
    }

    fn find_digest(&self, wanted: &str) -> Option<PathBuf> {
        self.dirs.iter().find_map(|d| {
            direct_files(d)
                .filter(|p| is_binary_candidate(p))
                .find(|p| self.digest_of(p).as_deref() == Some(wanted))
        })
    }

    fn digest_of(&self, path: &Path) -> Option<String> {
        let mut cache = self.digests.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache.get(path) {
            return hit.clone();
        }
        let digest = sha256_file(path);
        cache.insert(path.to_path_buf(), digest.clone());
        digest
    }
}

impl FileProbe for CandidateDirProbe {
    fn exists(&self, query: &FileQuery) -> Result<Option<PathBuf>, SourceError> {
        Ok(match query {
            FileQuery::Name(name) => self.find_name(name),
            FileQuery::Folder(folder) => self.find_folder(folder),
            FileQuery::Pattern(re) => self.find_pattern(re),
            FileQuery::Digest(hash) => self.find_digest(hash),
        })
    }
}

/// 目录中直接包含的文件
fn direct_files(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

fn is_binary_candidate(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("exe") || e.eq_ignore_ascii_case("dll"))
        .unwrap_or(false)
}

fn sha256_file(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    if file.metadata().ok()?.len() > MAX_DIGEST_BYTES {
        return None;
    }
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).ok()?;
    Some(hex::encode(hasher.finalize()))
}

#[cfg(windows)]
fn default_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for var in ["LOCALAPPDATA", "APPDATA", "ProgramFiles", "ProgramFiles(x86)", "TEMP"] {
        if let Some(v) = std::env::var_os(var) {
            roots.push(PathBuf::from(v));
        }
    }
    if let Some(home) = std::env::var_os("USERPROFILE") {
        let home = PathBuf::from(home);
        roots.push(home.join("Desktop"));
        roots.push(home.join("Downloads"));
    }
    roots
}

#[cfg(not(windows))]
fn default_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        roots.push(home.join("Desktop"));
        roots.push(home.join("Downloads"));
        roots.push(home.join(".local").join("share"));
        // Wine 前缀下的常见安装位置
        roots.push(home.join(".wine").join("drive_c").join("Program Files"));
    }
    roots.push(std::env::temp_dir());
    roots
}

/// 基于 sysinfo 的进程列表
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessLister;

impl ProcessLister for SysinfoProcessLister {
    fn list_running(&self) -> Result<Vec<String>, SourceError> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, false);
        let mut names: Vec<String> = system
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// 所有键都不存在的注册表（非 Windows 平台）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRegistry;

impl RegistryReader for NoRegistry {
    fn open_and_enumerate(
        &self,
        _hive: Hive,
        _path: &str,
        _limit: usize,
    ) -> Result<Vec<(String, String)>, SourceError> {
        Err(SourceError::NotFound)
    }
}

/// Windows 注册表
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WinRegistryReader;

#[cfg(windows)]
impl RegistryReader for WinRegistryReader {
    fn open_and_enumerate(
        &self,
        hive: Hive,
        path: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>, SourceError> {
        use winreg::enums::{RegType, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_READ};
        use winreg::types::FromRegValue;
        use winreg::RegKey;

        let root = match hive {
            Hive::CurrentUser => RegKey::predef(HKEY_CURRENT_USER),
            Hive::LocalMachine => RegKey::predef(HKEY_LOCAL_MACHINE),
        };
        let key = root.open_subkey_with_flags(path, KEY_READ)?;

        let mut values = Vec::new();
        for item in key.enum_values().take(limit) {
            // 枚举出错即结束
            let Ok((name, value)) = item else { break };
            let text = match value.vtype {
                RegType::REG_SZ | RegType::REG_EXPAND_SZ => {
                    String::from_reg_value(&value).unwrap_or_default()
                }
                _ => String::new(),
            };
            values.push((name, text));
        }
        Ok(values)
    }
}

/// 当前平台的注册表实现
pub fn system_registry() -> Arc<dyn RegistryReader> {
    #[cfg(windows)]
    {
        Arc::new(WinRegistryReader)
    }
    #[cfg(not(windows))]
    {
        Arc::new(NoRegistry)
    }
}
