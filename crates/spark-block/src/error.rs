//! 块分配与块链操作的错误域。

use crate::codes;

/// 块层错误。
///
/// # 教案式说明
/// - **意图 (Why)**：阻塞式分配可能因预算或内存耗尽失败，需要以 `Result` 向上传播，
///   让队列把失败转换为自身的 `OutOfMemory` 并中止整次分块写入；
/// - **契约 (What)**：所有变体 `Send + Sync + 'static`，[`code`](Self::code) 返回稳定错误码；
/// - **取舍 (Trade-offs)**：中断安全路径从不构造该错误，只返回 `None`。
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum BlockError {
    /// 分配器无法提供 `requested` 字节。
    #[error("block allocation of {requested} bytes failed: out of memory")]
    OutOfMemory { requested: usize },
}

impl BlockError {
    /// 返回稳定错误码，便于日志与指标聚合。
    pub fn code(&self) -> &'static str {
        match self {
            BlockError::OutOfMemory { .. } => codes::BLOCK_OUT_OF_MEMORY,
        }
    }

    /// 失败请求的字节数。
    pub fn requested(&self) -> usize {
        match self {
            BlockError::OutOfMemory { requested } => *requested,
        }
    }
}
