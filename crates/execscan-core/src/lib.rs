//! 执行器检测核心库
//!
//! 设计要点：
//! - 三个阶段（文件 / 进程 / 注册表）在同一个全局截止时间下执行，各阶段另有独立预算。
//! - 所有数据源调用都经由限时调用包装，数据源挂起不会阻塞截止时间检查。
//! - 单条目/单次调用的错误就地消化；只有初始化失败会中止整个扫描。
//! - 超时后返回已累积的部分结果，并在报告状态中明确标注。
//! - 进度与日志以事件形式单向发往展示层，核心从不等待消费者。

mod autorun;
mod bounded;
mod deadline;
mod detectors;
mod error;
mod events;
mod findings;
mod native;
mod options;
mod report;
mod rules;
mod runner;
mod scan;
mod sources;
mod types;

pub use autorun::AUTORUN_KEYS;
pub use deadline::Deadline;
pub use error::{ScanError, SourceError};
pub use events::{EventSink, NullSink, ScanEvent};
pub use findings::PhaseResult;
pub use native::{system_registry, CandidateDirProbe, NoRegistry, SysinfoProcessLister};
#[cfg(windows)]
pub use native::WinRegistryReader;
pub use options::ScanConfig;
pub use report::{aggregate, write_report_json, PhaseSummary, ScanReport, ScanSession};
pub use rules::{SignatureDatabase, SignatureEntry, SignatureSpec};
pub use scan::{aborted_report, scan, Scanner};
pub use sources::{DataSources, FileProbe, FileQuery, ProcessLister, RegistryReader};
pub use types::{Detection, Hive, LogLevel, Phase, ScanStatus};
