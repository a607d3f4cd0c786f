//! 限时调用：数据源调用在辅助线程上执行，调用方最多等待给定时长
//!
//! 超时后辅助线程被放弃（分离），其迟到的结果随通道关闭一并丢弃。
use crossbeam_channel::RecvTimeoutError;
use std::thread;
use std::time::Duration;

use crate::error::SourceError;

/// 在辅助线程上执行 `f`，最多等待 `wait`
pub(crate) fn call_with_timeout<T, F>(name: &str, wait: Duration, f: F) -> Result<T, SourceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SourceError> + Send + 'static,
{
    if wait.is_zero() {
        return Err(SourceError::Timeout(wait));
    }

    let (tx, rx) = crossbeam_channel::bounded::<Result<T, SourceError>>(1);
    thread::Builder::new()
        .name(format!("execscan-{name}"))
        .spawn(move || {
            // 接收端可能已因超时被丢弃，此时发送失败即忽略
            let _ = tx.send(f());
        })
        .map_err(|e| SourceError::Other(format!("failed to spawn {name} worker: {e}")))?;

    match rx.recv_timeout(wait) {
        Ok(res) => res,
        Err(RecvTimeoutError::Timeout) => Err(SourceError::Timeout(wait)),
        // 发送端在未发送结果前被释放：辅助线程 panic
        Err(RecvTimeoutError::Disconnected) => {
            Err(SourceError::Other(format!("{name} worker exited without a result")))
        }
    }
}
