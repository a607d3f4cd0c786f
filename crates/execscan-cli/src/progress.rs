//! 终端进度条：消费核心发来的扫描事件
use crossbeam_channel::Receiver;
use execscan_core::{LogLevel, ScanEvent};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::thread::{self, JoinHandle};

const TEMPLATE: &str = "{prefix:>8} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}";

/// 在独立线程中驱动进度条，直到事件通道关闭
pub fn spawn(events: Receiver<ScanEvent>, visible: bool) -> JoinHandle<()> {
    thread::spawn(move || {
        let bar = ProgressBar::new(0);
        if !visible {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        bar.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        for event in events {
            match event {
                ScanEvent::ScanStarted { signatures } => {
                    bar.set_message(format!("{signatures} signatures"));
                }
                ScanEvent::PhaseStarted { phase, items_total } => {
                    bar.reset();
                    bar.set_prefix(phase.label());
                    bar.set_length(items_total as u64);
                    bar.set_message("");
                }
                ScanEvent::Progress { items_checked, items_total, .. } => {
                    bar.set_length(items_total as u64);
                    bar.set_position(items_checked as u64);
                }
                // 日志本身已经经由 tracing 输出，这里只把告警放进进度条尾部
                ScanEvent::Log { level: LogLevel::Warn | LogLevel::Error, message } => {
                    bar.set_message(message);
                }
                ScanEvent::Log { .. } => {}
                ScanEvent::PhaseFinished { phase, found, timed_out } => {
                    let suffix = if timed_out { ", timed out" } else { "" };
                    bar.println(format!("{phase}: {found} found{suffix}"));
                }
                ScanEvent::ScanFinished { .. } => break,
            }
        }
        bar.finish_and_clear();
    })
}
