//! 阶段结果与跨阶段排序
use serde::Serialize;

use crate::types::{Detection, Phase};

/// 单个阶段的执行结果；由一次阶段执行创建并封存，之后只读
#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub phase: Phase,
    /// 阶段内发现顺序
    pub detections: Vec<Detection>,
    pub items_checked: usize,
    pub items_total: usize,
    pub timed_out: bool,
    /// 阶段级错误（如进程列表获取失败）；单条目错误不会出现在这里
    pub error: Option<String>,
    /// 注册表阶段的自启动子扫描因预算不足被跳过
    pub autorun_skipped: bool,
}

impl PhaseResult {
    pub(crate) fn new(phase: Phase, items_total: usize) -> Self {
        Self {
            phase,
            detections: Vec::new(),
            items_checked: 0,
            items_total,
            timed_out: false,
            error: None,
            autorun_skipped: false,
        }
    }

    /// 全局时间耗尽而未执行的阶段
    pub(crate) fn skipped(phase: Phase, items_total: usize) -> Self {
        Self { timed_out: true, ..Self::new(phase, items_total) }
    }

    /// 在预算内完整执行（含子扫描）且无阶段级错误
    pub fn is_complete(&self) -> bool {
        !self.timed_out && !self.autorun_skipped && self.error.is_none()
    }

    pub fn has_detection_for(&self, tool_name: &str) -> bool {
        self.detections.iter().any(|d| d.tool_name == tool_name)
    }
}

/// 按阶段顺序（File → Process → Registry）拼接命中，阶段内保持发现顺序
pub(crate) fn concat_in_phase_order(results: &[PhaseResult]) -> Vec<Detection> {
    let mut ordered: Vec<&PhaseResult> = results.iter().collect();
    // 稳定排序，同一阶段的多个结果保持原有先后
    ordered.sort_by_key(|r| r.phase);
    ordered
        .into_iter()
        .flat_map(|r| r.detections.iter().cloned())
        .collect()
}
