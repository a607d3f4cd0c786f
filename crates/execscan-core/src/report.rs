//! 扫描会话与最终报告
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::deadline::Deadline;
use crate::findings::{concat_in_phase_order, PhaseResult};
use crate::types::{Detection, Phase, ScanStatus};

/// 单次扫描的可变状态，只由编排器修改，产出报告后即丢弃
#[derive(Debug)]
pub struct ScanSession {
    pub started_at: DateTime<Utc>,
    pub start: Instant,
    pub global_deadline: Deadline,
    pub phase_results: Vec<PhaseResult>,
    pub status: ScanStatus,
    /// 致命初始化错误
    pub error: Option<String>,
}

impl ScanSession {
    pub fn new(global_deadline: Deadline) -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
            global_deadline,
            phase_results: Vec::new(),
            status: ScanStatus::Idle,
            error: None,
        }
    }

    pub(crate) fn begin(&mut self) {
        debug_assert_eq!(self.status, ScanStatus::Idle);
        self.status = ScanStatus::Running;
    }

    /// 依据阶段结果决定终态：任何超时/阶段错误或全局超时 → 部分完成
    pub(crate) fn settle(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let all_ran = Phase::ALL
            .iter()
            .all(|p| self.phase_results.iter().any(|r| r.phase == *p && r.is_complete()));
        self.status = if all_ran && !self.global_deadline.expired() {
            ScanStatus::CompletedFull
        } else {
            ScanStatus::CompletedPartial
        };
    }

    pub(crate) fn abort(&mut self, error: String) {
        self.status = ScanStatus::Aborted;
        self.error = Some(error);
    }
}

/// 单阶段摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub found: usize,
    pub items_checked: usize,
    pub items_total: usize,
    pub timed_out: bool,
    pub autorun_skipped: bool,
    pub error: Option<String>,
}

impl From<&PhaseResult> for PhaseSummary {
    fn from(r: &PhaseResult) -> Self {
        Self {
            phase: r.phase,
            found: r.detections.len(),
            items_checked: r.items_checked,
            items_total: r.items_total,
            timed_out: r.timed_out,
            autorun_skipped: r.autorun_skipped,
            error: r.error.clone(),
        }
    }
}

/// 最终报告
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    /// File → Process → Registry，阶段内保持发现顺序
    pub detections: Vec<Detection>,
    pub total_found: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "millis")]
    pub elapsed: Duration,
    pub status: ScanStatus,
    pub phases: Vec<PhaseSummary>,
    pub error: Option<String>,
}

impl ScanReport {
    /// 部分结果（超时 / 中止）必须明确标注
    pub fn is_partial(&self) -> bool {
        !matches!(self.status, ScanStatus::CompletedFull)
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

fn millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// 合并会话中的阶段结果为最终报告
pub fn aggregate(mut session: ScanSession) -> ScanReport {
    session.settle();
    session.phase_results.sort_by_key(|r| r.phase);
    let detections = concat_in_phase_order(&session.phase_results);
    ScanReport {
        started_at: session.started_at,
        total_found: detections.len(),
        detections,
        elapsed: session.start.elapsed(),
        status: session.status,
        phases: session.phase_results.iter().map(PhaseSummary::from).collect(),
        error: session.error,
    }
}

/// 以 JSON 写出报告
pub fn write_report_json(report: &ScanReport, out: &mut dyn Write) -> serde_json::Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)?;
    writeln!(out).map_err(serde_json::Error::io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(phase: Phase, tools: &[&str]) -> PhaseResult {
        let mut r = PhaseResult::new(phase, 3);
        r.items_checked = 3;
        for t in tools {
            r.detections.push(Detection::new(*t, phase, "x"));
        }
        r
    }

    fn session() -> ScanSession {
        let mut s = ScanSession::new(Deadline::after(Duration::from_secs(60)));
        s.begin();
        s
    }

    #[test]
    fn all_phases_complete_is_full() {
        let mut s = session();
        s.phase_results = vec![done(Phase::File, &["A"]), done(Phase::Process, &[]), done(Phase::Registry, &["B"])];
        let report = aggregate(s);
        assert_eq!(report.status, ScanStatus::CompletedFull);
        assert!(!report.is_partial());
        assert_eq!(report.total_found, 2);
        assert_eq!(report.phase(Phase::Registry).unwrap().found, 1);
    }

    #[test]
    fn timed_out_or_missing_phase_is_partial() {
        let mut s = session();
        let mut p = done(Phase::Process, &[]);
        p.timed_out = true;
        s.phase_results = vec![done(Phase::File, &[]), p, done(Phase::Registry, &[])];
        assert_eq!(aggregate(s).status, ScanStatus::CompletedPartial);

        let mut s = session();
        s.phase_results = vec![done(Phase::File, &[])];
        assert_eq!(aggregate(s).status, ScanStatus::CompletedPartial);
    }

    #[test]
    fn aborted_keeps_existing_results() {
        let mut s = session();
        s.phase_results = vec![done(Phase::File, &["A"])];
        s.abort("boom".into());
        let report = aggregate(s);
        assert_eq!(report.status, ScanStatus::Aborted);
        assert_eq!(report.total_found, 1);
        assert_eq!(report.error.as_deref(), Some("boom"));
        assert!(report.is_partial());
    }

    #[test]
    fn json_uses_elapsed_ms() {
        let mut s = session();
        s.phase_results = vec![done(Phase::File, &["A"])];
        let report = aggregate(s);
        let mut buf = Vec::new();
        write_report_json(&report, &mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert!(v["elapsed_ms"].is_u64());
        assert_eq!(v["status"], "completed_partial");
        assert_eq!(v["detections"][0]["tool_name"], "A");
        assert_eq!(v["detections"][0]["phase"], "file");
    }
}
