#![deny(unsafe_code)]

//! `spark-qio` 是块队列引擎：网络栈、9P 传输、管道与控制台驱动的数据通路都建立在它之上。
//!
//! # 模块定位（Why）
//! - 同一队列同时服务两种互斥的调用纪律：不可睡眠的中断安全纪律与可睡眠的阻塞纪律；
//! - 在两者之上统一执行字节记账、流控（排空到一半才恢复写者）与饥饿唤醒；
//! - 块与块链操作来自 `spark-block`，本 crate 只负责排队语义，不解析所承载的字节。
//!
//! # 结构概览（How）
//! - `queue`：[`Queue`] 及全部生产者、消费者、生命周期入口；
//! - `sync`：元数据锁 [`IrqLock`]、方向互斥锁 [`QLock`]、等待通道 [`Rendez`]；
//! - `config`：[`QueueConfig`]、[`QueueMode`] 与装配器 [`QueueBuilder`]；
//! - `state`：状态位 [`QueueState`]；`stats`：计数快照 [`QueueStats`]；`error`：错误域与哨兵。
//!
//! # 使用契约（What）
//! - 阻塞入口可能睡眠，不提供超时与取消；需要时由调用方在外层叠加；
//! - 中断安全入口从不睡眠，只以哨兵或截断计数报告失败；
//! - 非阻塞模式下写满队列会“成功”返回但丢弃数据：成功不代表数据被保留。

mod config;
mod error;
mod queue;
mod state;
mod stats;
pub mod sync;

pub use config::{DEFAULT_LIMIT, QueueBuilder, QueueConfig, QueueMode};
pub use error::{QueueEmpty, QueueError, QueueFull, codes};
pub use queue::{Bypass, Kick, Queue};
pub use spark_block::{Block, BlockAllocator, BlockChain, MAX_ATOMIC};
pub use state::QueueState;
pub use stats::QueueStats;
pub use sync::{IrqLock, QLock, Rendez};

/// `iwrite` 默认的有效字节上限，超过后新数据被丢弃。
pub const DEFAULT_PRINT_CEILING: usize = 16 * 1024;

/// 合并模式下 `produce` 新分配块的最小容量。
pub const COALESCE_BLOCK: usize = 128;

/// 关闭且为空的队列在默认关闭原因下允许返回 EOF 的次数，此后读取返回错误。
pub const EOF_READ_LIMIT: u32 = 3;

/// 默认关闭原因。
pub const DEFAULT_HUNGUP: &str = "hung up";
