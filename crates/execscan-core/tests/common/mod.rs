//! 集成测试共用的内存数据源与挂起数据源
#![allow(dead_code)]

use execscan_core::{
    DataSources, FileProbe, FileQuery, Hive, ProcessLister, RegistryReader, SignatureDatabase,
    SignatureSpec, SourceError,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 模拟永不返回的调用
const HANG: Duration = Duration::from_secs(600);

/// 按文件名命中的文件探测，可选每次查询延迟；`denied` 中的名称返回拒绝访问
#[derive(Default)]
pub struct StaticFiles {
    pub names: Vec<String>,
    pub denied: Vec<String>,
    pub delay: Option<Duration>,
}

impl StaticFiles {
    pub fn with(names: &[&str]) -> Self {
        Self { names: names.iter().map(|s| s.to_string()).collect(), ..Self::default() }
    }

    pub fn slow(names: &[&str], delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::with(names) }
    }

    pub fn denying(mut self, name: &str) -> Self {
        self.denied.push(name.to_string());
        self
    }
}

impl FileProbe for StaticFiles {
    fn exists(&self, query: &FileQuery) -> Result<Option<PathBuf>, SourceError> {
        if let Some(d) = self.delay {
            thread::sleep(d);
        }
        if let FileQuery::Name(n) = query {
            if self.denied.iter().any(|x| x.eq_ignore_ascii_case(n)) {
                return Err(SourceError::AccessDenied(n.clone()));
            }
        }
        Ok(match query {
            FileQuery::Name(n) if self.names.iter().any(|x| x.eq_ignore_ascii_case(n)) => {
                Some(PathBuf::from(r"C:\Users\demo\AppData\Local").join(n))
            }
            _ => None,
        })
    }
}

pub struct StaticProcesses {
    pub names: Vec<String>,
    pub delay: Option<Duration>,
}

impl StaticProcesses {
    pub fn with(names: &[&str]) -> Self {
        Self { names: names.iter().map(|s| s.to_string()).collect(), delay: None }
    }

    pub fn slow(names: &[&str], delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::with(names) }
    }
}

impl ProcessLister for StaticProcesses {
    fn list_running(&self) -> Result<Vec<String>, SourceError> {
        if let Some(d) = self.delay {
            thread::sleep(d);
        }
        Ok(self.names.clone())
    }
}

/// 内存注册表：(根键, 路径) -> 值列表；`denied` 中的键拒绝访问，其余键不存在
#[derive(Default)]
pub struct MapRegistry {
    pub keys: HashMap<(Hive, String), Vec<(String, String)>>,
    pub denied: HashSet<(Hive, String)>,
}

impl MapRegistry {
    pub fn key(mut self, hive: Hive, path: &str, values: &[(&str, &str)]) -> Self {
        self.keys.insert(
            (hive, path.to_string()),
            values.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect(),
        );
        self
    }

    pub fn deny(mut self, hive: Hive, path: &str) -> Self {
        self.denied.insert((hive, path.to_string()));
        self
    }
}

impl RegistryReader for MapRegistry {
    fn open_and_enumerate(
        &self,
        hive: Hive,
        path: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>, SourceError> {
        let key = (hive, path.to_string());
        if self.denied.contains(&key) {
            return Err(SourceError::AccessDenied(format!("{hive}\\{path}")));
        }
        match self.keys.get(&key) {
            Some(values) => Ok(values.iter().take(limit).cloned().collect()),
            None => Err(SourceError::NotFound),
        }
    }
}

/// 所有调用都挂起
pub struct Hanging;

impl FileProbe for Hanging {
    fn exists(&self, _query: &FileQuery) -> Result<Option<PathBuf>, SourceError> {
        thread::sleep(HANG);
        Ok(None)
    }
}

impl ProcessLister for Hanging {
    fn list_running(&self) -> Result<Vec<String>, SourceError> {
        thread::sleep(HANG);
        Ok(Vec::new())
    }
}

impl RegistryReader for Hanging {
    fn open_and_enumerate(
        &self,
        _hive: Hive,
        _path: &str,
        _limit: usize,
    ) -> Result<Vec<(String, String)>, SourceError> {
        thread::sleep(HANG);
        Err(SourceError::NotFound)
    }
}

pub fn sources(
    files: impl FileProbe + 'static,
    processes: impl ProcessLister + 'static,
    registry: impl RegistryReader + 'static,
) -> DataSources {
    DataSources::new(Arc::new(files), Arc::new(processes), Arc::new(registry))
}

pub fn hanging_sources() -> DataSources {
    sources(Hanging, Hanging, Hanging)
}

pub fn spec(name: &str) -> SignatureSpec {
    SignatureSpec { name: name.to_string(), ..Default::default() }
}

pub fn database(specs: Vec<SignatureSpec>) -> Arc<SignatureDatabase> {
    Arc::new(SignatureDatabase::from_entries(specs).expect("valid test database"))
}

/// 三个阶段都能命中的小型签名库
pub fn three_tool_database() -> Arc<SignatureDatabase> {
    database(vec![
        SignatureSpec {
            name: "Synapse X".into(),
            files: vec!["Synapse.exe".into()],
            registry: vec![r"SOFTWARE\Synapse".into()],
            processes: vec!["Synapse.exe".into()],
            ..Default::default()
        },
        SignatureSpec {
            name: "KRNL".into(),
            files: vec!["krnl.exe".into()],
            processes: vec!["krnl.exe".into()],
            ..Default::default()
        },
        SignatureSpec {
            name: "Fluxus".into(),
            processes: vec!["Fluxus.exe".into()],
            ..Default::default()
        },
    ])
}
