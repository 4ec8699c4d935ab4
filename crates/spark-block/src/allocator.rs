use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use spin::Mutex;

use crate::{
    BlockError,
    block::{Block, BlockRecycler, Lease, ReclaimedBlock},
};

/// `BlockAllocator` 是块的来源，对应队列的两种调用纪律。
///
/// # 契约说明（What）
/// - `alloc`：阻塞纪律（进程上下文）使用，失败时返回 [`BlockError::OutOfMemory`]；
/// - `alloc_atomic`：中断安全纪律使用，绝不睡眠，资源耗尽时返回 `None`；
/// - 两者返回的块容量恰为 `size`，游标位于起点（分配长度即 `size`，队列据此记账）。
pub trait BlockAllocator: Send + Sync {
    fn alloc(&self, size: usize) -> Result<Block, BlockError>;

    fn alloc_atomic(&self, size: usize) -> Option<Block>;
}

/// 直接使用全局堆的分配器；两种纪律都不会失败（堆耗尽时按 Rust 运行时约定中止）。
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl BlockAllocator for HeapAllocator {
    fn alloc(&self, size: usize) -> Result<Block, BlockError> {
        Ok(Block::with_capacity(size))
    }

    fn alloc_atomic(&self, size: usize) -> Option<Block> {
        Some(Block::with_capacity(size))
    }
}

/// 池化分配器的统计快照。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// 累计向堆申请的字节数。
    pub allocated_bytes: usize,
    /// 当前驻留（在用 + 自由链表）的字节数。
    pub resident_bytes: usize,
    /// 自由链表中可复用的字节数。
    pub available_bytes: usize,
    /// 在用租约登记的字节数，预算以此为准。
    pub leased_bytes: usize,
    pub active_blocks: usize,
    pub failed_allocations: usize,
    pub pool_hits: usize,
    pub pool_misses: usize,
    pub free_slots: usize,
}

/// `SlabBlockAllocator` 基于自由链表复用块存储，并可选地施加字节预算。
///
/// # 模块角色（Why）
/// - 驱动常需要自己的缓冲池（例如非一致性 DMA 的专用内存），块销毁时必须回到池而不是全局堆；
/// - 预算让“分配失败”成为可测试、可观测的常规路径：阻塞纪律得到 `OutOfMemory`，
///   中断纪律得到 `None` 并静默截断。
///
/// # 核心机制（How）
/// - `spin::Mutex<Vec<BytesMut>>` 作为自由链表，租借时优先复用容量足够的存储；
/// - 每次租借生成一个共享 `Lease`，块（及其拆分段）全部销毁后经由 [`BlockRecycler`] 归还；
/// - 预算通过对 `leased_bytes` 的原子 `fetch_update` 预占，避免检查与记账之间的竞态。
///
/// # 契约说明（What）
/// - **线程安全**：共享状态只由自旋锁与原子计数保护，`alloc_atomic` 不会睡眠；
/// - **后置条件**：返回块的分配长度恰为请求值，内容清零。
///
/// # 设计权衡（Trade-offs）
/// - 块被冻结为 `Bytes` 后存储无法收回，只能更新统计，下次租借重新分配；
/// - `shrink_to_fit` 采用“清空自由链表”的简单策略，便于压测后归还峰值内存。
#[derive(Clone)]
pub struct SlabBlockAllocator {
    inner: Arc<SlabInner>,
}

impl Default for SlabBlockAllocator {
    fn default() -> Self {
        Self {
            inner: Arc::new(SlabInner::new(None)),
        }
    }
}

impl SlabBlockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建在用字节数不得超过 `max_leased_bytes` 的分配器。
    pub fn with_budget(max_leased_bytes: usize) -> Self {
        Self {
            inner: Arc::new(SlabInner::new(Some(max_leased_bytes))),
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        self.inner.snapshot()
    }

    /// 清空自由链表，返回释放的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        self.inner.shrink_free_list()
    }

    fn lease_block(&self, size: usize) -> Option<Block> {
        let buf = self.inner.acquire(size)?;
        let storage = buf.capacity();
        let recycler: Arc<dyn BlockRecycler> = self.inner.clone();
        Some(Block::from_lease(
            buf,
            Arc::new(Lease::new(size, storage, recycler)),
        ))
    }
}

impl BlockAllocator for SlabBlockAllocator {
    fn alloc(&self, size: usize) -> Result<Block, BlockError> {
        self.lease_block(size)
            .ok_or(BlockError::OutOfMemory { requested: size })
    }

    fn alloc_atomic(&self, size: usize) -> Option<Block> {
        self.lease_block(size)
    }
}

struct SlabInner {
    free_list: Mutex<Vec<BytesMut>>,
    budget: Option<usize>,
    metrics: SlabMetrics,
}

impl SlabInner {
    fn new(budget: Option<usize>) -> Self {
        Self {
            free_list: Mutex::new(Vec::new()),
            budget,
            metrics: SlabMetrics::default(),
        }
    }

    /// 预占预算后，从自由链表或堆上取得长度恰为 `size` 的清零存储。
    fn acquire(&self, size: usize) -> Option<BytesMut> {
        if !self.reserve_budget(size) {
            self.metrics.failed_allocations.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let reused = {
            let mut list = self.free_list.lock();
            list.iter()
                .position(|buf| buf.capacity() >= size)
                .map(|index| list.swap_remove(index))
        };

        let mut buf = match reused {
            Some(buf) => {
                saturating_sub(&self.metrics.available_bytes, buf.capacity());
                self.metrics.pool_hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                let buf = BytesMut::with_capacity(size);
                self.metrics
                    .allocated_bytes
                    .fetch_add(buf.capacity(), Ordering::Relaxed);
                self.metrics
                    .resident_bytes
                    .fetch_add(buf.capacity(), Ordering::Relaxed);
                self.metrics.pool_misses.fetch_add(1, Ordering::Relaxed);
                buf
            }
        };
        buf.clear();
        buf.resize(size, 0);
        self.metrics.active_blocks.fetch_add(1, Ordering::Relaxed);
        Some(buf)
    }

    fn reserve_budget(&self, size: usize) -> bool {
        let budget = self.budget;
        self.metrics
            .leased_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |leased| {
                let next = leased.checked_add(size)?;
                match budget {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            })
            .is_ok()
    }

    fn shrink_free_list(&self) -> usize {
        let mut list = self.free_list.lock();
        let reclaimed: usize = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        saturating_sub(&self.metrics.available_bytes, reclaimed);
        saturating_sub(&self.metrics.resident_bytes, reclaimed);
        reclaimed
    }

    fn snapshot(&self) -> AllocatorStats {
        let free_slots = self.free_list.lock().len();
        let m = &self.metrics;
        AllocatorStats {
            allocated_bytes: m.allocated_bytes.load(Ordering::Relaxed),
            resident_bytes: m.resident_bytes.load(Ordering::Relaxed),
            available_bytes: m.available_bytes.load(Ordering::Relaxed),
            leased_bytes: m.leased_bytes.load(Ordering::Relaxed),
            active_blocks: m.active_blocks.load(Ordering::Relaxed),
            failed_allocations: m.failed_allocations.load(Ordering::Relaxed),
            pool_hits: m.pool_hits.load(Ordering::Relaxed),
            pool_misses: m.pool_misses.load(Ordering::Relaxed),
            free_slots,
        }
    }
}

impl BlockRecycler for SlabInner {
    fn reclaim(&self, reclaimed: ReclaimedBlock) {
        let (capacity, storage) = (reclaimed.capacity(), reclaimed.storage());
        saturating_sub(&self.metrics.active_blocks, 1);
        saturating_sub(&self.metrics.leased_bytes, capacity);
        match reclaimed.into_buffer() {
            Some(mut buf) => {
                buf.clear();
                let kept = buf.capacity();
                // 冻结带走的片段不再驻留于池中。
                saturating_sub(&self.metrics.resident_bytes, storage.saturating_sub(kept));
                self.metrics
                    .available_bytes
                    .fetch_add(kept, Ordering::Relaxed);
                self.free_list.lock().push(buf);
            }
            None => saturating_sub(&self.metrics.resident_bytes, storage),
        }
    }
}

#[derive(Default)]
struct SlabMetrics {
    allocated_bytes: AtomicUsize,
    resident_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
    leased_bytes: AtomicUsize,
    active_blocks: AtomicUsize,
    failed_allocations: AtomicUsize,
    pool_hits: AtomicUsize,
    pool_misses: AtomicUsize,
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}
