//! 绝对截止时间
use std::time::{Duration, Instant};

/// 绝对截止时刻；在所有阶段/子阶段调用之间显式传递
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// 从当前时刻起 `budget` 之后
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        // 超大预算（如 Duration::MAX）可能溢出，退化为一个足够远的时刻
        let at = now
            .checked_add(budget)
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365));
        Self(at)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// 剩余时间，已过期时为零
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// 取两者中更早的一个
    pub fn min(self, other: Deadline) -> Deadline {
        std::cmp::min(self, other)
    }

    /// 从当前时刻起最多 `budget`，且不晚于自身
    pub fn capped(self, budget: Option<Duration>) -> Deadline {
        match budget {
            Some(b) => self.min(Deadline::after(b)),
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_saturates_at_zero() {
        let d = Deadline::at(Instant::now() - Duration::from_millis(5));
        assert!(d.expired());
        assert_eq!(d.remaining(), Duration::ZERO);
    }

    #[test]
    fn capped_picks_the_earlier_deadline() {
        let global = Deadline::after(Duration::from_secs(100));
        let phase = global.capped(Some(Duration::from_secs(1)));
        assert!(phase < global);
        assert!(phase.remaining() <= Duration::from_secs(1));

        let unconstrained = global.capped(None);
        assert_eq!(unconstrained, global);

        let short = Deadline::after(Duration::from_millis(10));
        assert_eq!(short.capped(Some(Duration::from_secs(60))), short);
    }

    #[test]
    fn huge_budget_does_not_overflow() {
        let d = Deadline::after(Duration::MAX);
        assert!(!d.expired());
    }
}
