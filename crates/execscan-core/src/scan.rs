//! 扫描编排：全局截止时间下依次（或并发）执行三个阶段
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::deadline::Deadline;
use crate::error::ScanError;
use crate::events::{Emitter, EventSink, NullSink, ScanEvent};
use crate::findings::PhaseResult;
use crate::options::ScanConfig;
use crate::report::{aggregate, ScanReport, ScanSession};
use crate::rules::SignatureDatabase;
use crate::runner::PhaseRunner;
use crate::sources::DataSources;
use crate::types::Phase;

/// 并发模式下，超过全局截止时间仍未上报的阶段最多再等这么久
const LATE_PHASE_GRACE: Duration = Duration::from_millis(500);

/// 扫描编排器
pub struct Scanner {
    db: Arc<SignatureDatabase>,
    sources: DataSources,
    config: Arc<ScanConfig>,
    sink: Arc<dyn EventSink>,
}

impl Scanner {
    pub fn new(db: Arc<SignatureDatabase>, sources: DataSources, config: ScanConfig) -> Self {
        Self { db, sources, config: Arc::new(config), sink: Arc::new(NullSink) }
    }

    /// 设置事件接收端
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// 以配置中的全局超时运行
    pub fn run_default(&self) -> ScanReport {
        self.run(Deadline::after(self.config.global_timeout_secs))
    }

    /// 在给定全局截止时间内运行一次完整扫描；总会返回报告
    pub fn run(&self, global: Deadline) -> ScanReport {
        let emitter = Emitter::new(Arc::clone(&self.sink));
        let mut session = ScanSession::new(global);
        session.begin();

        emitter.emit(ScanEvent::ScanStarted { signatures: self.db.count() });
        emitter.info(format!(
            "starting scan: {} signatures, {:.1}s budget",
            self.db.count(),
            global.remaining().as_secs_f64()
        ));

        let runner = PhaseRunner::new(
            Arc::clone(&self.db),
            self.sources.clone(),
            Arc::clone(&self.config),
            emitter.clone(),
        );
        if self.config.concurrent {
            self.run_concurrent(&runner, &mut session, &emitter);
        } else {
            self.run_sequential(&runner, &mut session, &emitter);
        }

        finish(session, &emitter)
    }

    fn phase_budget(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::File => self.config.file_timeout_secs,
            Phase::Process => Some(self.config.process_timeout_secs),
            Phase::Registry => Some(self.config.registry_timeout_secs),
        }
    }

    fn run_sequential(&self, runner: &PhaseRunner, session: &mut ScanSession, emitter: &Emitter) {
        let global = session.global_deadline;
        for phase in Phase::ALL {
            if global.expired() {
                emitter.warn(format!("skipping {phase} scan: global deadline reached"));
                session.phase_results.push(PhaseResult::skipped(phase, self.db.count()));
                continue;
            }
            let deadline = global.capped(self.phase_budget(phase));
            session.phase_results.push(runner.execute(phase, deadline));
            if global.expired() {
                emitter.warn(format!("global deadline reached after {phase} scan"));
            }
        }
    }

    /// 并发调度：
    /// - 三个阶段在独立线程池中同时执行
    /// - 结果经通道回传，按阶段顺序重排；超过截止时间仍未回传的阶段记为超时
    fn run_concurrent(&self, runner: &PhaseRunner, session: &mut ScanSession, emitter: &Emitter) {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(Phase::ALL.len())
            .thread_name(|i| format!("execscan-phase-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                emitter.warn(format!("cannot start phase pool ({e}), running phases sequentially"));
                return self.run_sequential(runner, session, emitter);
            }
        };

        let global = session.global_deadline;
        let (tx, rx) = crossbeam_channel::bounded::<PhaseResult>(Phase::ALL.len());
        let mut pending: Vec<Phase> = Vec::new();
        let mut collected: BTreeMap<Phase, PhaseResult> = BTreeMap::new();

        for phase in Phase::ALL {
            if global.expired() {
                emitter.warn(format!("skipping {phase} scan: global deadline reached"));
                collected.insert(phase, PhaseResult::skipped(phase, self.db.count()));
                continue;
            }
            let deadline = global.capped(self.phase_budget(phase));
            let runner = runner.clone();
            let tx = tx.clone();
            pool.spawn(move || {
                let _ = tx.send(runner.execute(phase, deadline));
            });
            pending.push(phase);
        }
        drop(tx);

        let cutoff = global.instant() + LATE_PHASE_GRACE;
        let mut received = 0;
        while received < pending.len() {
            match rx.recv_deadline(cutoff) {
                Ok(result) => {
                    received += 1;
                    collected.insert(result.phase, result);
                }
                Err(_) => break,
            }
        }

        for phase in pending {
            if collected.contains_key(&phase) { continue; }
            emitter.warn(format!("{phase} scan did not report before the global deadline"));
            let mut late = PhaseResult::skipped(phase, self.db.count());
            late.error = Some("phase did not finish before the global deadline".into());
            collected.insert(phase, late);
        }
        // BTreeMap 按阶段顺序迭代
        session.phase_results.extend(collected.into_values());
    }
}

fn finish(session: ScanSession, emitter: &Emitter) -> ScanReport {
    let report = aggregate(session);
    emitter.emit(ScanEvent::ScanFinished { status: report.status, total_found: report.total_found });
    tracing::info!(
        status = ?report.status,
        total_found = report.total_found,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "scan finished"
    );
    report
}

/// 初始化失败时的报告：不运行任何阶段
pub fn aborted_report(err: &ScanError, sink: Arc<dyn EventSink>) -> ScanReport {
    let emitter = Emitter::new(sink);
    let mut session = ScanSession::new(Deadline::after(Duration::ZERO));
    session.begin();
    emitter.error(format!("scan aborted: {err}"));
    session.abort(err.to_string());
    finish(session, &emitter)
}

/// 使用内置签名库与本机数据源执行扫描
pub fn scan(config: &ScanConfig, sink: Arc<dyn EventSink>) -> ScanReport {
    let global = Deadline::after(config.global_timeout_secs);
    let init = config.validate().and_then(|()| {
        let db = SignatureDatabase::load()?;
        let sources = DataSources::native(config)?;
        Ok((db, sources))
    });
    match init {
        Ok((db, sources)) => Scanner::new(Arc::new(db), sources, config.clone())
            .with_sink(sink)
            .run(global),
        Err(err) => aborted_report(&err, sink),
    }
}
