//! 队列配置与装配。
//!
//! # 教案式说明
//! - **意图（Why）**：模式（消息/流）与合并开关在队列生命周期内固定，上限与非阻塞开关可在运行时修改；
//!   把创建期参数收敛到 [`QueueConfig`]，既能在代码里链式构造，也能在启用 `serde` 特性后从配置文件读取。
//! - **逻辑（How）**：[`QueueBuilder`] 在配置之外再挂接 kick 回调与分配器，最后 [`open`](QueueBuilder::open)。
//! - **契约（What）**：`print_ceiling` 只约束 `iwrite`；`limit` 为 0 的队列每次入队都会进入流控。

use std::sync::Arc;

use spark_block::{BlockAllocator, HeapAllocator, MAX_ATOMIC};

use crate::{DEFAULT_PRINT_CEILING, Kick, Queue, QueueState};

/// 默认字节上限。
pub const DEFAULT_LIMIT: usize = MAX_ATOMIC;

/// 读取是否保留写入边界。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum QueueMode {
    /// 所有缓冲字节视为一条字节流，读取可拆分块。
    #[default]
    Stream,
    /// 每次写入是一条消息，读取至多返回一条消息，超出部分丢弃。
    Message,
}

/// 创建队列所需的参数。
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "snake_case")
)]
pub struct QueueConfig {
    /// 分配字节数达到该值即进入流控，运行时可经 `Queue::set_limit` 修改；`reopen` 恢复此初值。
    pub limit: usize,
    pub mode: QueueMode,
    /// 字节流生产者是否追加到尾块剩余空间。
    pub coalesce: bool,
    /// 每次入队后都调用 kick，而不仅在唤醒饥饿读者时。
    pub kick_always: bool,
    /// 满队列上的阻塞写入是否直接丢弃。
    pub noblock: bool,
    /// `iwrite` 在有效字节达到该值后丢弃后续数据。
    pub print_ceiling: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            mode: QueueMode::Stream,
            coalesce: false,
            kick_always: false,
            noblock: false,
            print_ceiling: DEFAULT_PRINT_CEILING,
        }
    }
}

impl QueueConfig {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: QueueMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn with_kick_always(mut self, kick_always: bool) -> Self {
        self.kick_always = kick_always;
        self
    }

    pub fn with_noblock(mut self, noblock: bool) -> Self {
        self.noblock = noblock;
        self
    }

    pub fn with_print_ceiling(mut self, print_ceiling: usize) -> Self {
        self.print_ceiling = print_ceiling;
        self
    }

    /// 新建队列的初始状态位；队列以饥饿状态启动，首个生产者会触发一次唤醒。
    pub(crate) fn initial_state(&self) -> QueueState {
        let mut state = QueueState::STARVE;
        state.set(QueueState::MSG, self.mode == QueueMode::Message);
        state.set(QueueState::COALESCE, self.coalesce);
        state.set(QueueState::KICK, self.kick_always);
        state.set(QueueState::NOBLOCK, self.noblock);
        state
    }
}

/// 队列装配器。
pub struct QueueBuilder {
    config: QueueConfig,
    kick: Option<Kick>,
    alloc: Arc<dyn BlockAllocator>,
}

impl QueueBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            kick: None,
            alloc: Arc::new(HeapAllocator),
        }
    }

    /// 挂接 kick 回调：流控解除或饥饿读者被服务时调用，调用时不持有元数据锁。
    pub fn kick<F>(mut self, kick: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.kick = Some(Arc::new(kick));
        self
    }

    /// 替换块分配器，默认使用全局堆。
    pub fn allocator(mut self, alloc: Arc<dyn BlockAllocator>) -> Self {
        self.alloc = alloc;
        self
    }

    pub fn open(self) -> Queue {
        Queue::from_parts(self.config, self.kick, self.alloc)
    }
}
