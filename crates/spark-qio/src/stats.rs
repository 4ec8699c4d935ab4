use std::sync::atomic::{AtomicU64, Ordering};

/// 队列的累计计数快照。
///
/// 计数在锁外以 `Relaxed` 更新，快照之间不保证相互一致，只用于观测与压测。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// 入队的有效字节（含合并写入）。
    pub produced_bytes: u64,
    /// 出队交付给调用方的字节。
    pub consumed_bytes: u64,
    /// `peek_copy` 复制的字节。
    pub copied_bytes: u64,
    /// 因非阻塞满队列、打印上限或消息截断而丢弃的字节。
    pub dropped_bytes: u64,
    /// 进入流控的次数。
    pub flow_events: u64,
    /// 流控解除的次数。
    pub flow_releases: u64,
    /// 生产者唤醒饥饿读者的次数。
    pub starve_wakeups: u64,
}

#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    produced: AtomicU64,
    consumed: AtomicU64,
    copied: AtomicU64,
    dropped: AtomicU64,
    flow_events: AtomicU64,
    flow_releases: AtomicU64,
    starve_wakeups: AtomicU64,
}

fn bump(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

impl QueueCounters {
    pub(crate) fn produced(&self, n: usize) {
        bump(&self.produced, n);
    }

    pub(crate) fn consumed(&self, n: usize) {
        bump(&self.consumed, n);
    }

    pub(crate) fn copied(&self, n: usize) {
        bump(&self.copied, n);
    }

    pub(crate) fn dropped(&self, n: usize) {
        bump(&self.dropped, n);
    }

    pub(crate) fn flow_event(&self) {
        bump(&self.flow_events, 1);
    }

    pub(crate) fn flow_release(&self) {
        bump(&self.flow_releases, 1);
    }

    pub(crate) fn starve_wakeup(&self) {
        bump(&self.starve_wakeups, 1);
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        QueueStats {
            produced_bytes: self.produced.load(Ordering::Relaxed),
            consumed_bytes: self.consumed.load(Ordering::Relaxed),
            copied_bytes: self.copied.load(Ordering::Relaxed),
            dropped_bytes: self.dropped.load(Ordering::Relaxed),
            flow_events: self.flow_events.load(Ordering::Relaxed),
            flow_releases: self.flow_releases.load(Ordering::Relaxed),
            starve_wakeups: self.starve_wakeups.load(Ordering::Relaxed),
        }
    }
}
