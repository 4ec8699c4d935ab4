use bitflags::bitflags;

bitflags! {
    /// 队列状态位。
    ///
    /// `MSG` 与 `COALESCE` 在创建时固定，重新打开后保留；其余位随运行时事件变化。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueState: u32 {
        /// 消息模式：读取不跨越写入边界，超出请求长度的部分被丢弃。
        const MSG = 1 << 0;
        /// 合并模式：字节流生产者追加到尾块的剩余空间。
        const COALESCE = 1 << 1;
        /// 流控中：分配字节数达到上限，阻塞写者需等待排空到一半以下。
        const FLOW = 1 << 2;
        /// 有读者因队列为空而等待。
        const STARVE = 1 << 3;
        /// 已关闭（含 hangup）。
        const CLOSED = 1 << 4;
        /// 每次入队后都调用 kick 回调。
        const KICK = 1 << 5;
        /// 满队列上的阻塞写入不等待，直接丢弃数据并报告成功。
        const NOBLOCK = 1 << 6;
    }
}

impl QueueState {
    /// 写者可以离开流控等待：未处于流控、已关闭或切换为非阻塞。
    pub fn writable(self) -> bool {
        !self.contains(QueueState::FLOW)
            || self.intersects(QueueState::CLOSED | QueueState::NOBLOCK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_only_blocks_under_flow() {
        assert!(QueueState::empty().writable());
        assert!(!QueueState::FLOW.writable());
        assert!((QueueState::FLOW | QueueState::CLOSED).writable());
        assert!((QueueState::FLOW | QueueState::NOBLOCK).writable());
    }
}
