//! 单条目检测：针对每个阶段测试条目的相关标识
//!
//! 每个条目每个阶段最多产生一个命中：首个命中的标识即返回。
//! 单个标识出错不影响该条目其余标识的测试；若最终无命中，则返回遇到的第一个错误。
use crate::error::SourceError;
use crate::rules::SignatureEntry;
use crate::sources::{FileProbe, FileQuery, RegistryReader};
use crate::types::Hive;

/// 收集首个非 NotFound 错误
#[derive(Default)]
struct FirstError(Option<SourceError>);

impl FirstError {
    fn note(&mut self, err: SourceError) {
        if !err.is_not_found() && self.0.is_none() {
            self.0 = Some(err);
        }
    }

    fn finish(self) -> Result<Option<String>, SourceError> {
        match self.0 {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

/// 文件阶段：文件名 → 文件夹 → 名称模式 → 内容摘要
pub(crate) fn probe_files(
    probe: &dyn FileProbe,
    entry: &SignatureEntry,
) -> Result<Option<String>, SourceError> {
    let queries = entry
        .file_names
        .iter()
        .map(|n| FileQuery::Name(n.clone()))
        .chain(entry.folder_names.iter().map(|f| FileQuery::Folder(f.clone())))
        .chain(entry.name_patterns.iter().map(|p| FileQuery::Pattern(p.clone())))
        .chain(entry.content_hashes.iter().map(|h| FileQuery::Digest(h.clone())));

    let mut first_err = FirstError::default();
    for query in queries {
        match probe.exists(&query) {
            Ok(Some(path)) => {
                return Ok(Some(describe_file_hit(&query, &path.display().to_string())));
            }
            Ok(None) => {}
            Err(e) => first_err.note(e),
        }
    }
    first_err.finish()
}

fn describe_file_hit(query: &FileQuery, path: &str) -> String {
    match query {
        FileQuery::Name(_) => format!("file {path}"),
        FileQuery::Folder(_) => format!("folder {path}"),
        FileQuery::Pattern(re) => format!("file {path} matches pattern {}", re.as_str()),
        FileQuery::Digest(hash) => format!("file {path} has sha256 {hash}"),
    }
}

/// 进程列表预处理：(小写, 原名)
pub(crate) fn lowercase_processes(running: Vec<String>) -> Vec<(String, String)> {
    running.into_iter().map(|p| (p.to_lowercase(), p)).collect()
}

/// 进程阶段：签名进程名（不区分大小写）是运行中进程名的子串即命中
pub(crate) fn match_processes(entry: &SignatureEntry, running: &[(String, String)]) -> Option<String> {
    for wanted in &entry.process_names {
        let needle = wanted.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        if let Some((_, original)) = running.iter().find(|(lower, _)| lower.contains(&needle)) {
            return Some(format!("process {original} is running (signature {wanted})"));
        }
    }
    None
}

/// 注册表阶段：签名键在任一根键下存在即命中（先 HKCU 后 HKLM）
pub(crate) fn probe_registry_keys(
    reader: &dyn RegistryReader,
    entry: &SignatureEntry,
) -> Result<Option<String>, SourceError> {
    let mut first_err = FirstError::default();
    for path in &entry.registry_paths {
        for hive in Hive::ALL {
            match reader.key_exists(hive, path) {
                Ok(true) => return Ok(Some(format!("registry key {hive}\\{path}"))),
                Ok(false) => {}
                Err(e) => first_err.note(e),
            }
        }
    }
    first_err.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{SignatureDatabase, SignatureSpec};
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn entry(spec: SignatureSpec) -> SignatureEntry {
        let db = SignatureDatabase::from_entries(vec![spec]).unwrap();
        (*db.entries()[0]).clone()
    }

    /// 记录查询顺序；指定文件名命中，指定文件夹报拒绝访问
    struct ScriptedProbe {
        hit_name: &'static str,
        denied_folder: &'static str,
        seen: Mutex<Vec<String>>,
    }

    impl FileProbe for ScriptedProbe {
        fn exists(&self, query: &FileQuery) -> Result<Option<PathBuf>, SourceError> {
            let label = match query {
                FileQuery::Name(n) => format!("name:{n}"),
                FileQuery::Folder(f) => format!("folder:{f}"),
                FileQuery::Pattern(p) => format!("pattern:{}", p.as_str()),
                FileQuery::Digest(h) => format!("digest:{h}"),
            };
            self.seen.lock().unwrap().push(label);
            match query {
                FileQuery::Name(n) if n == self.hit_name => Ok(Some(PathBuf::from("C:/x").join(n))),
                FileQuery::Folder(f) if f == self.denied_folder => {
                    Err(SourceError::AccessDenied(f.clone()))
                }
                _ => Ok(None),
            }
        }
    }

    #[test]
    fn file_probe_stops_at_first_hit() {
        let e = entry(SignatureSpec {
            name: "KRNL".into(),
            files: vec!["krnl.exe".into(), "krnlss.exe".into()],
            folders: vec!["krnl".into()],
            ..Default::default()
        });
        let probe = ScriptedProbe { hit_name: "krnl.exe", denied_folder: "", seen: Mutex::new(vec![]) };
        let hit = probe_files(&probe, &e).unwrap().unwrap();
        assert!(hit.contains("krnl.exe"));
        assert_eq!(*probe.seen.lock().unwrap(), vec!["name:krnl.exe".to_string()]);
    }

    #[test]
    fn file_probe_continues_past_errors_then_reports_them() {
        let e = entry(SignatureSpec {
            name: "Fluxus".into(),
            files: vec!["Fluxus.exe".into()],
            folders: vec!["Fluxus".into()],
            hashes: vec!["AB".into()],
            ..Default::default()
        });
        let probe = ScriptedProbe { hit_name: "", denied_folder: "Fluxus", seen: Mutex::new(vec![]) };
        let res = probe_files(&probe, &e);
        assert!(matches!(res, Err(SourceError::AccessDenied(_))));
        // 出错后仍然测试了后续标识
        assert_eq!(
            *probe.seen.lock().unwrap(),
            vec!["name:Fluxus.exe", "folder:Fluxus", "digest:ab"]
        );
    }

    #[test]
    fn process_match_is_case_insensitive_substring() {
        let e = entry(SignatureSpec {
            name: "Alpha".into(),
            processes: vec!["alpha.exe".into(), "alpha".into()],
            ..Default::default()
        });
        let running = lowercase_processes(vec!["explorer.exe".into(), "Alpha.EXE".into()]);
        let hit = match_processes(&e, &running).unwrap();
        assert!(hit.contains("Alpha.EXE"));

        let none = lowercase_processes(vec!["beta.exe".into()]);
        assert_eq!(match_processes(&e, &none), None);
    }

    struct Keys(&'static [(Hive, &'static str)]);

    impl RegistryReader for Keys {
        fn open_and_enumerate(
            &self,
            hive: Hive,
            path: &str,
            _limit: usize,
        ) -> Result<Vec<(String, String)>, SourceError> {
            if self.0.iter().any(|(h, p)| *h == hive && *p == path) {
                Ok(Vec::new())
            } else {
                Err(SourceError::NotFound)
            }
        }
    }

    #[test]
    fn registry_key_found_under_local_machine() {
        let e = entry(SignatureSpec {
            name: "Synapse X".into(),
            registry: vec![r"SOFTWARE\Synapse".into()],
            ..Default::default()
        });
        let reader = Keys(&[(Hive::LocalMachine, r"SOFTWARE\Synapse")]);
        let hit = probe_registry_keys(&reader, &e).unwrap().unwrap();
        assert_eq!(hit, r"registry key HKLM\SOFTWARE\Synapse");

        let empty = Keys(&[]);
        assert_eq!(probe_registry_keys(&empty, &e), Ok(None));
    }
}
