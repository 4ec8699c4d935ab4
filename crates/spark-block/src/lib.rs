#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

//! `spark-block` 提供带读写游标的变长块缓冲，以及在块链上工作的纯函数式操作。
//!
//! # 模块定位（Why）
//! - 网络栈、9P 传输、管道与控制台驱动的数据通路都以块为单位搬运字节，
//!   本 crate 负责块本身与块链整形（补头、合并、上拉、裁剪、复制、调整），不持有任何共享状态；
//! - 队列引擎（`spark-qio`）在其上实现流控与阻塞语义。
//!
//! # 设计概要（How）
//! - `block` 模块实现 [`Block`]：以 `bytes::BytesMut` 为存储，`rp`/`wp` 游标界定有效区间；
//! - `chain` 模块实现 [`BlockChain`] 及全部块链操作，所有权随移动转移，杜绝悬垂与共享；
//! - `allocator` 模块定义 [`BlockAllocator`] 契约，提供全局堆实现与带自由链表的池化实现。
//!
//! # 线程模型（What）
//! - 块与块链本身不加锁：调用方不得在多个线程间共享同一条正在修改的块链；
//! - 分配器实现必须 `Send + Sync`，其中 `alloc_atomic` 不得睡眠，可在中断上下文调用。

extern crate alloc;

mod allocator;
mod block;
pub mod chain;
mod error;

pub use allocator::{AllocatorStats, BlockAllocator, HeapAllocator, SlabBlockAllocator};
pub use block::{Block, BlockRecycler, ReclaimedBlock};
pub use chain::{BlockChain, ChainCounters};
pub use error::BlockError;

/// 单次原子写入的上限：超过该长度的写入会被切分为多个块。
pub const MAX_ATOMIC: usize = 64 * 1024;

/// 块层稳定错误码，遵循 `<领域>.<语义>` 命名约定。
pub mod codes {
    /// 分配器内存或预算耗尽。
    pub const BLOCK_OUT_OF_MEMORY: &str = "block.out_of_memory";
}
