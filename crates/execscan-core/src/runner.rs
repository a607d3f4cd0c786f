//! 阶段执行器
//!
//! 三个阶段共用同一套批处理循环：按签名库顺序逐条目测试，每处理 `batch_size` 个条目
//! 上报一次进度并检查阶段截止时间；超时即停止并返回已累积的部分结果。
use std::sync::Arc;

use crate::autorun::run_autorun_pass;
use crate::bounded::call_with_timeout;
use crate::deadline::Deadline;
use crate::detectors::{lowercase_processes, match_processes, probe_files, probe_registry_keys};
use crate::error::SourceError;
use crate::events::{Emitter, ScanEvent};
use crate::findings::PhaseResult;
use crate::options::ScanConfig;
use crate::rules::{SignatureDatabase, SignatureEntry};
use crate::sources::DataSources;
use crate::types::{Detection, Phase};

/// 单条目检测结果
enum EntryOutcome {
    Matched(String),
    NoMatch,
    /// 本阶段预算已耗尽，立即停止
    OutOfTime,
}

/// 阶段执行器（可克隆，便于在并发模式下移入工作线程）
#[derive(Clone)]
pub(crate) struct PhaseRunner {
    db: Arc<SignatureDatabase>,
    sources: DataSources,
    config: Arc<ScanConfig>,
    emitter: Emitter,
}

impl PhaseRunner {
    pub(crate) fn new(
        db: Arc<SignatureDatabase>,
        sources: DataSources,
        config: Arc<ScanConfig>,
        emitter: Emitter,
    ) -> Self {
        Self { db, sources, config, emitter }
    }

    /// 执行一个阶段；永远返回结果（可能是部分结果）
    pub(crate) fn execute(&self, phase: Phase, deadline: Deadline) -> PhaseResult {
        let total = self.db.count();
        self.emitter.emit(ScanEvent::PhaseStarted { phase, items_total: total });
        tracing::info!(%phase, budget_ms = deadline.remaining().as_millis() as u64, "phase started");

        let result = match phase {
            Phase::File => self.run_files(deadline),
            Phase::Process => self.run_processes(deadline),
            Phase::Registry => self.run_registry(deadline),
        };

        self.emitter.emit(ScanEvent::PhaseFinished {
            phase,
            found: result.detections.len(),
            timed_out: result.timed_out,
        });
        self.emitter.info(format!(
            "{phase} scan finished: {} found, {}/{} checked{}",
            result.detections.len(),
            result.items_checked,
            result.items_total,
            if result.timed_out { " (timed out)" } else { "" }
        ));
        result
    }

    fn run_files(&self, deadline: Deadline) -> PhaseResult {
        let probe = Arc::clone(&self.sources.files);
        self.sweep(Phase::File, deadline, |entry| {
            if !entry.has_file_identifiers() {
                return Ok(None);
            }
            let probe = Arc::clone(&probe);
            let entry = Arc::clone(entry);
            call_with_timeout("file-probe", deadline.remaining(), move || {
                probe_files(probe.as_ref(), &entry)
            })
        })
    }

    fn run_processes(&self, deadline: Deadline) -> PhaseResult {
        let lister = Arc::clone(&self.sources.processes);
        let wait = self.config.process_list_wait_secs.min(deadline.remaining());
        let listed = call_with_timeout("process-list", wait, move || lister.list_running());

        let running = match listed {
            Ok(names) => {
                tracing::debug!(count = names.len(), "process list received");
                lowercase_processes(names)
            }
            Err(err) => {
                // 没有进程数据：阶段无法完成，结果标记为部分
                let mut result = PhaseResult::new(Phase::Process, self.db.count());
                result.timed_out = matches!(err, SourceError::Timeout(_));
                let message = match &err {
                    SourceError::Timeout(w) => format!("process listing did not return within {w:?}"),
                    other => format!("process listing failed: {other}"),
                };
                self.emitter.warn(message.clone());
                result.error = Some(message);
                return result;
            }
        };

        self.sweep(Phase::Process, deadline, |entry| Ok(match_processes(entry, &running)))
    }

    fn run_registry(&self, deadline: Deadline) -> PhaseResult {
        let reader = Arc::clone(&self.sources.registry);
        let mut result = self.sweep(Phase::Registry, deadline, |entry| {
            if entry.registry_paths.is_empty() {
                return Ok(None);
            }
            let reader = Arc::clone(&reader);
            let entry = Arc::clone(entry);
            call_with_timeout("registry-key", deadline.remaining(), move || {
                probe_registry_keys(reader.as_ref(), &entry)
            })
        });

        if result.timed_out {
            result.autorun_skipped = true;
        } else {
            let stats = run_autorun_pass(
                &self.sources.registry,
                self.db.common(self.config.common_entry_limit),
                &self.config,
                deadline,
                &self.emitter,
                &mut result,
            );
            result.autorun_skipped = stats.skipped;
        }
        result
    }

    /// 通用批处理循环
    fn sweep<F>(&self, phase: Phase, deadline: Deadline, mut check: F) -> PhaseResult
    where
        F: FnMut(&Arc<SignatureEntry>) -> Result<Option<String>, SourceError>,
    {
        let total = self.db.count();
        let batch = self.config.batch_size.max(1);
        let mut result = PhaseResult::new(phase, total);

        for (idx, entry) in self.db.entries().iter().enumerate() {
            // 批边界：检查截止时间
            if idx % batch == 0 && deadline.expired() {
                self.emitter.warn(format!(
                    "{phase} scan timed out after {}/{total} entries",
                    result.items_checked
                ));
                result.timed_out = true;
                break;
            }

            let outcome = match check(entry) {
                Ok(Some(evidence)) => EntryOutcome::Matched(evidence),
                Ok(None) | Err(SourceError::NotFound) => EntryOutcome::NoMatch,
                Err(SourceError::Timeout(wait)) if deadline.expired() => {
                    tracing::debug!(%phase, tool = %entry.name, ?wait, "entry check cut off by phase deadline");
                    EntryOutcome::OutOfTime
                }
                Err(SourceError::Timeout(wait)) => {
                    self.emitter.warn(format!("{phase} check for {} timed out after {wait:?}", entry.name));
                    EntryOutcome::NoMatch
                }
                Err(err) => {
                    self.emitter.warn(format!("{phase} check for {} failed: {err}", entry.name));
                    EntryOutcome::NoMatch
                }
            };

            match outcome {
                EntryOutcome::Matched(evidence) => {
                    self.emitter.warn(format!("detected {}: {evidence}", entry.name));
                    result.detections.push(Detection::new(entry.name.clone(), phase, evidence));
                }
                EntryOutcome::NoMatch => {}
                EntryOutcome::OutOfTime => {
                    self.emitter.warn(format!(
                        "{phase} scan timed out after {}/{total} entries",
                        result.items_checked
                    ));
                    result.timed_out = true;
                    break;
                }
            }
            result.items_checked += 1;

            if result.items_checked % batch == 0 {
                self.emitter.progress(phase, result.items_checked, total);
            }
        }

        if result.items_checked % batch != 0 || result.items_checked == 0 {
            self.emitter.progress(phase, result.items_checked, total);
        }
        result
    }
}
