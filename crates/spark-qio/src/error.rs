//! 队列错误域与非阻塞调用的哨兵返回值。
//!
//! # 教案式说明
//! - **意图（Why）**：阻塞纪律以 `Result` 传播失败；中断安全纪律不能“抛出”，
//!   只返回哨兵或截断后的计数。两者分开建模，调用方无法把“队列空”误当作“队列已挂断”。
//! - **契约（What）**：[`QueueError::code`] 返回 `<领域>.<语义>` 形式的稳定错误码，
//!   可直接作为日志字段或指标标签。

use spark_block::BlockError;

use crate::DEFAULT_HUNGUP;

/// 稳定错误码。
pub mod codes {
    pub const QUEUE_HUNGUP: &str = "qio.hungup";
    pub const QUEUE_HUNGUP_WITH_REASON: &str = "qio.hungup_with_reason";
    pub const QUEUE_OUT_OF_MEMORY: &str = "qio.out_of_memory";
}

/// 阻塞纪律可观察到的失败。
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum QueueError {
    /// 队列已关闭，错误信息为默认的 "hung up"。
    #[error("hung up")]
    HungUp,
    /// 队列经 `hangup` 以自定义原因关闭。
    #[error("{0}")]
    HungUpWithReason(String),
    /// 阻塞式分配失败，整次分块写入随之中止。
    #[error("queue allocation of {requested} bytes failed: out of memory")]
    OutOfMemory { requested: usize },
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::HungUp => codes::QUEUE_HUNGUP,
            QueueError::HungUpWithReason(_) => codes::QUEUE_HUNGUP_WITH_REASON,
            QueueError::OutOfMemory { .. } => codes::QUEUE_OUT_OF_MEMORY,
        }
    }

    /// 由队列保存的关闭原因构造错误；默认原因映射为 [`QueueError::HungUp`]。
    pub(crate) fn closed(reason: &str) -> Self {
        if reason == DEFAULT_HUNGUP {
            QueueError::HungUp
        } else {
            QueueError::HungUpWithReason(reason.to_owned())
        }
    }
}

impl From<BlockError> for QueueError {
    fn from(err: BlockError) -> Self {
        QueueError::OutOfMemory {
            requested: err.requested(),
        }
    }
}

/// 受限入队（`produce`/`pass`）在队列已达上限时返回的哨兵。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, thiserror::Error)]
#[error("queue is over its limit")]
pub struct QueueFull;

/// 非阻塞出队（`consume`）在队列为空时返回的哨兵。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, thiserror::Error)]
#[error("queue is empty")]
pub struct QueueEmpty;
