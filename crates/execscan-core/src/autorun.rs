//! 注册表自启动子扫描（Aho-Corasick 子串匹配）
//!
//! 设计目标：
//! - 只检查固定的几个自启动键，每个键最多枚举 `max_registry_enum_values` 个值。
//! - 只与签名库前 `common_entry_limit` 个条目的名称做子串匹配，限制最坏开销。
//! - 每个值只归属于签名库顺序中最靠前的命中条目。
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::sync::Arc;

use crate::bounded::call_with_timeout;
use crate::deadline::Deadline;
use crate::error::SourceError;
use crate::events::Emitter;
use crate::findings::PhaseResult;
use crate::options::ScanConfig;
use crate::rules::SignatureEntry;
use crate::sources::RegistryReader;
use crate::types::{Detection, Hive, Phase};

/// 检查的自启动键（每个根键下各一次）
pub const AUTORUN_KEYS: [&str; 2] = [
    r"SOFTWARE\Microsoft\Windows\CurrentVersion\Run",
    r"SOFTWARE\Microsoft\Windows\CurrentVersion\RunOnce",
];

/// 条目名称（小写）自动机；模式序号即条目在签名库中的序号
pub(crate) struct AutorunMatcher {
    ac: AhoCorasick,
    names: Vec<String>,
}

impl AutorunMatcher {
    pub(crate) fn build(entries: &[Arc<SignatureEntry>]) -> Result<Self, aho_corasick::BuildError> {
        let lowered: Vec<String> = entries.iter().map(|e| e.name.to_lowercase()).collect();
        // Standard 语义才能做重叠查找，进而取签名库顺序最靠前的条目
        let ac = AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(&lowered)?;
        let names = entries.iter().map(|e| e.name.clone()).collect();
        Ok(Self { ac, names })
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    /// 名称或值中包含的、签名库顺序最靠前的条目名
    pub(crate) fn first_match(&self, name: &str, value: &str) -> Option<&str> {
        let name = name.to_lowercase();
        let value = value.to_lowercase();
        self.ac
            .find_overlapping_iter(&name)
            .chain(self.ac.find_overlapping_iter(&value))
            .map(|m| m.pattern().as_usize())
            .min()
            .map(|idx| self.names[idx].as_str())
    }
}

/// 子扫描统计（便于测试与日志）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AutorunStats {
    pub(crate) skipped: bool,
    pub(crate) keys_opened: usize,
    pub(crate) values_examined: usize,
    pub(crate) entries_considered: usize,
}

/// 执行自启动子扫描，命中追加到注册表阶段结果
///
/// 预算为注册表阶段截止时间的剩余部分，不足 `autorun_min_remaining_secs` 时整体跳过。
/// 已在本阶段命中的条目不会重复上报。
pub(crate) fn run_autorun_pass(
    reader: &Arc<dyn RegistryReader>,
    common: &[Arc<SignatureEntry>],
    config: &ScanConfig,
    deadline: Deadline,
    emitter: &Emitter,
    result: &mut PhaseResult,
) -> AutorunStats {
    let mut stats = AutorunStats::default();

    let remaining = deadline.remaining();
    if remaining < config.autorun_min_remaining_secs {
        emitter.info(format!(
            "skipping autorun check: {:.1}s left in registry budget",
            remaining.as_secs_f64()
        ));
        stats.skipped = true;
        return stats;
    }

    let matcher = match AutorunMatcher::build(common) {
        Ok(m) => m,
        Err(e) => {
            emitter.error(format!("failed to build autorun matcher: {e}"));
            stats.skipped = true;
            return stats;
        }
    };
    stats.entries_considered = matcher.len();
    emitter.info("checking autorun registry keys");

    let limit = config.max_registry_enum_values;
    'hives: for hive in Hive::ALL {
        for key in AUTORUN_KEYS {
            if deadline.expired() {
                emitter.warn("registry budget exhausted during autorun check");
                result.timed_out = true;
                break 'hives;
            }

            let worker = Arc::clone(reader);
            let res = call_with_timeout("autorun", deadline.remaining(), move || {
                worker.open_and_enumerate(hive, key, limit)
            });
            let values = match res {
                Ok(values) => values,
                Err(SourceError::NotFound) => continue,
                Err(SourceError::Timeout(wait)) => {
                    emitter.warn(format!("enumerating {hive}\\{key} timed out after {wait:?}"));
                    if deadline.expired() {
                        result.timed_out = true;
                        break 'hives;
                    }
                    continue;
                }
                Err(e) => {
                    emitter.warn(format!("cannot read {hive}\\{key}: {e}"));
                    continue;
                }
            };
            stats.keys_opened += 1;

            // 数据源可能不遵守上限，这里再截断一次
            for (name, value) in values.into_iter().take(limit) {
                stats.values_examined += 1;
                let Some(tool) = matcher.first_match(&name, &value) else { continue };
                if result.has_detection_for(tool) {
                    continue;
                }
                let evidence = format!("autorun value {hive}\\{key}\\{name} = {value}");
                emitter.warn(format!("detected {tool}: {evidence}"));
                result.detections.push(Detection::new(tool, Phase::Registry, evidence));
            }
        }
    }

    tracing::debug!(
        keys = stats.keys_opened,
        values = stats.values_examined,
        entries = stats.entries_considered,
        "autorun check finished"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use crate::rules::{SignatureDatabase, SignatureSpec};
    use std::sync::Mutex;
    use std::time::Duration;

    fn db(names: &[&str]) -> SignatureDatabase {
        SignatureDatabase::from_entries(
            names
                .iter()
                .map(|n| SignatureSpec { name: n.to_string(), ..Default::default() })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn earliest_entry_wins_for_each_value() {
        let db = db(&["Synapse X", "Synapse", "KRNL"]);
        let m = AutorunMatcher::build(db.entries()).unwrap();
        // 同时包含 "synapse" 与 "synapse x"，签名库顺序中 "Synapse X" 在前
        assert_eq!(m.first_match("Loader", r"C:\Synapse X\Synapse.exe"), Some("Synapse X"));
        assert_eq!(m.first_match("SynapseUpdater", ""), Some("Synapse"));
        assert_eq!(m.first_match("krnl", ""), Some("KRNL"));
        assert_eq!(m.first_match("OneDrive", r"C:\OneDrive.exe"), None);
    }

    /// 每个自启动键返回 `per_key` 个值，并记录收到的上限参数
    struct FloodedRun {
        per_key: usize,
        limits: Mutex<Vec<usize>>,
    }

    impl RegistryReader for FloodedRun {
        fn open_and_enumerate(
            &self,
            hive: Hive,
            path: &str,
            limit: usize,
        ) -> Result<Vec<(String, String)>, SourceError> {
            self.limits.lock().unwrap().push(limit);
            if !path.ends_with("Run") {
                return Err(SourceError::NotFound);
            }
            // 故意忽略上限
            Ok((0..self.per_key)
                .map(|i| (format!("{hive}-value{i}"), format!(r"C:\Tools\tool{i}.exe")))
                .collect())
        }
    }

    #[test]
    fn enumeration_is_capped_per_key() {
        let db = db(&["Alpha", "Beta"]);
        let concrete = Arc::new(FloodedRun { per_key: 500, limits: Mutex::new(vec![]) });
        let reader: Arc<dyn RegistryReader> = concrete.clone();
        let config = ScanConfig { max_registry_enum_values: 7, ..ScanConfig::default() };
        let emitter = Emitter::new(Arc::new(NullSink));
        let mut result = PhaseResult::new(Phase::Registry, db.count());

        let stats = run_autorun_pass(
            &reader,
            db.common(config.common_entry_limit),
            &config,
            Deadline::after(Duration::from_secs(30)),
            &emitter,
            &mut result,
        );

        assert!(!stats.skipped);
        assert_eq!(stats.keys_opened, 2);
        assert_eq!(stats.values_examined, 14);
        assert!(concrete.limits.lock().unwrap().iter().all(|&l| l == 7));
        assert!(result.detections.is_empty());
    }

    #[test]
    fn skipped_when_budget_is_short() {
        let db = db(&["Alpha"]);
        let reader: Arc<dyn RegistryReader> =
            Arc::new(FloodedRun { per_key: 1, limits: Mutex::new(vec![]) });
        let config = ScanConfig::default();
        let mut result = PhaseResult::new(Phase::Registry, 1);
        let stats = run_autorun_pass(
            &reader,
            db.common(15),
            &config,
            Deadline::after(Duration::from_secs(2)),
            &Emitter::new(Arc::new(NullSink)),
            &mut result,
        );
        assert!(stats.skipped);
        assert_eq!(stats.keys_opened, 0);
        assert!(!result.timed_out);
    }
}
