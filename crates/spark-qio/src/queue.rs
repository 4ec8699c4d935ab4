//! 队列引擎：块的有界 FIFO，带字节记账、流控/饥饿状态机与两套入口。
//!
//! # 教案式说明
//! - **意图（Why）**：网络栈、9P 传输、管道与控制台驱动共享同一个缓冲抽象。生产者可能是中断处理程序，
//!   也可能是可睡眠线程；消费者同理。队列必须在两种纪律下同时保持 FIFO、记账与背压正确。
//! - **逻辑（How）**：
//!   - 全部元数据（块序列、`len`/`dlen`、状态位、关闭原因、EOF 计数）位于 [`IrqLock`] 之内；
//!   - 阻塞入口先获取方向互斥锁，再在 [`Rendez`] 上等待“有数据/已关闭”或“流控解除”；
//!   - 每个改动元数据的临界区都产出一份 [`Wakeups`]，解锁后再统一执行唤醒、kick 与日志。
//! - **契约（What）**：
//!   - `len` 恒等于队列中所有块分配长度之和，`dlen` 为有效字节之和，`dlen <= len`；
//!   - 入队使 `len >= limit` 时置 `FLOW`；出队使 `len < limit / 2`（或队列变空）时清除 `FLOW`，
//!     唤醒被流控的写者并调用 kick；
//!   - 元数据锁从不跨越对调用方内存的复制，也从不在持有时睡眠或调用 kick。

use std::{collections::VecDeque, fmt, mem, sync::Arc};

use spark_block::{Block, BlockAllocator, BlockChain, HeapAllocator, MAX_ATOMIC};
use tracing::{debug, trace, warn};

use crate::{
    COALESCE_BLOCK, DEFAULT_HUNGUP, EOF_READ_LIMIT, QueueBuilder, QueueConfig, QueueEmpty,
    QueueError, QueueFull, QueueMode, QueueState, QueueStats,
    stats::QueueCounters,
    sync::{IrqGuard, IrqLock, QLock, Rendez},
};

/// 生产者侧通知回调。
pub type Kick = Arc<dyn Fn() + Send + Sync>;

/// 旁路队列的转发回调：每次入队都同步交给它，不经缓冲。
pub type Bypass = Arc<dyn Fn(BlockChain) + Send + Sync>;

/// 一次临界区结束后需要在锁外执行的动作。
#[derive(Clone, Copy, Debug, Default)]
struct Wakeups {
    /// 唤醒饥饿的读者。
    reader: bool,
    /// 唤醒被流控的写者。
    writer: bool,
    kick: bool,
    /// 本次临界区使队列进入流控。
    flow_set: bool,
}

struct QueueCore {
    blocks: VecDeque<Block>,
    len: usize,
    dlen: usize,
    limit: usize,
    initial_limit: usize,
    state: QueueState,
    err: String,
    eof: u32,
}

impl QueueCore {
    fn new(limit: usize, state: QueueState) -> Self {
        Self {
            blocks: VecDeque::new(),
            len: 0,
            dlen: 0,
            limit,
            initial_limit: limit,
            state,
            err: String::new(),
            eof: 0,
        }
    }

    fn push_back(&mut self, block: Block) {
        self.len += block.alloc_len();
        self.dlen += block.len();
        self.blocks.push_back(block);
    }

    fn push_front(&mut self, block: Block) {
        self.len += block.alloc_len();
        self.dlen += block.len();
        self.blocks.push_front(block);
    }

    fn pop_front(&mut self) -> Option<Block> {
        let block = self.blocks.pop_front()?;
        self.len -= block.alloc_len();
        self.dlen -= block.len();
        Some(block)
    }

    /// 读者未取完的剩余部分按原顺序放回队首。
    fn put_back(&mut self, rest: BlockChain) -> Wakeups {
        for block in rest.into_iter().rev() {
            self.push_front(block);
        }
        Wakeups {
            flow_set: self.mark_flow(),
            ..Wakeups::default()
        }
    }

    fn mark_flow(&mut self) -> bool {
        if self.len >= self.limit && !self.state.contains(QueueState::FLOW) {
            self.state.insert(QueueState::FLOW);
            true
        } else {
            false
        }
    }

    /// 排空到上限一半以下（或队列为空）时解除流控。
    fn release_flow(&mut self) -> bool {
        let drained = self.len < self.limit / 2 || self.blocks.is_empty();
        if self.state.contains(QueueState::FLOW) && drained {
            self.state.remove(QueueState::FLOW);
            true
        } else {
            false
        }
    }

    fn take_starve(&mut self) -> bool {
        let starved = self.state.contains(QueueState::STARVE);
        self.state.remove(QueueState::STARVE);
        starved
    }

    /// 生产者入队之后的状态推进。
    fn produced(&mut self) -> Wakeups {
        let flow_set = self.mark_flow();
        let reader = self.take_starve();
        Wakeups {
            reader,
            writer: false,
            kick: reader || self.state.contains(QueueState::KICK),
            flow_set,
        }
    }

    fn enqueue(&mut self, block: Block) -> Wakeups {
        self.push_back(block);
        self.produced()
    }

    fn enqueue_chain(&mut self, chain: BlockChain) -> Wakeups {
        for block in chain {
            self.push_back(block);
        }
        self.produced()
    }

    /// 消费者出队之后的状态推进。
    fn consumed(&mut self) -> Wakeups {
        let released = self.release_flow();
        Wakeups {
            writer: released,
            kick: released,
            ..Wakeups::default()
        }
    }

    /// 上限变化后重新判定流控。
    fn rebalance_flow(&mut self) -> Wakeups {
        let flow_set = self.mark_flow();
        let released = !flow_set && self.release_flow();
        Wakeups {
            reader: false,
            writer: released,
            kick: released,
            flow_set,
        }
    }

    fn drain(&mut self) -> VecDeque<Block> {
        self.len = 0;
        self.dlen = 0;
        mem::take(&mut self.blocks)
    }

    fn is_closed(&self) -> bool {
        self.state.contains(QueueState::CLOSED)
    }

    fn closed_error(&self) -> QueueError {
        QueueError::closed(&self.err)
    }
}

struct QueueInner {
    core: IrqLock<QueueCore>,
    rlock: QLock,
    wlock: QLock,
    rr: Rendez,
    wr: Rendez,
    kick: Option<Kick>,
    bypass: Option<Bypass>,
    alloc: Arc<dyn BlockAllocator>,
    mode: QueueMode,
    print_ceiling: usize,
    counters: QueueCounters,
}

/// 块队列句柄，克隆后共享同一队列。
///
/// # 调用纪律（What）
/// - **阻塞纪律**：[`write_block`](Self::write_block)、[`write`](Self::write)、
///   [`read_block`](Self::read_block)、[`read`](Self::read)、[`peek_copy`](Self::peek_copy)
///   可能睡眠，只能在可阻塞线程调用；
/// - **中断安全纪律**：[`iwrite`](Self::iwrite)、[`produce`](Self::produce)、[`pass`](Self::pass)、
///   [`pass_unlimited`](Self::pass_unlimited)、[`consume`](Self::consume)、[`get`](Self::get)、
///   [`discard`](Self::discard) 只获取元数据锁，从不睡眠，以哨兵或截断计数报告失败；
/// - 两种纪律的生产者按各自获取元数据锁的顺序排入同一 FIFO。
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// 以默认分配器、无 kick 回调打开缓冲队列。
    pub fn open(config: QueueConfig) -> Self {
        QueueBuilder::new(config).open()
    }

    pub fn builder(config: QueueConfig) -> QueueBuilder {
        QueueBuilder::new(config)
    }

    /// 打开旁路队列：所有生产者入口直接把数据交给 `bypass`，不加锁、不记账、不流控。
    pub fn bypass<F>(bypass: F) -> Self
    where
        F: Fn(BlockChain) + Send + Sync + 'static,
    {
        Self::with_parts(
            QueueCore::new(0, QueueState::empty()),
            QueueMode::Stream,
            0,
            None,
            Some(Arc::new(bypass)),
            Arc::new(HeapAllocator),
        )
    }

    pub(crate) fn from_parts(
        config: QueueConfig,
        kick: Option<Kick>,
        alloc: Arc<dyn BlockAllocator>,
    ) -> Self {
        Self::with_parts(
            QueueCore::new(config.limit, config.initial_state()),
            config.mode,
            config.print_ceiling,
            kick,
            None,
            alloc,
        )
    }

    fn with_parts(
        core: QueueCore,
        mode: QueueMode,
        print_ceiling: usize,
        kick: Option<Kick>,
        bypass: Option<Bypass>,
        alloc: Arc<dyn BlockAllocator>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                core: IrqLock::new(core),
                rlock: QLock::new(),
                wlock: QLock::new(),
                rr: Rendez::new(),
                wr: Rendez::new(),
                kick,
                bypass,
                alloc,
                mode,
                print_ceiling,
                counters: QueueCounters::default(),
            }),
        }
    }

    // ---- 生产者 ----

    /// 阻塞入队一个块，返回其有效字节数。
    ///
    /// # 逻辑解析（How）
    /// 1. 持写者互斥锁进入；队列已关闭则立即返回关闭错误；
    /// 2. 已达上限且处于非阻塞模式时丢弃数据并报告成功（成功不代表数据被保留）；
    /// 3. 否则无条件入队（队列可因此暂时超出上限一个块），唤醒饥饿读者并按需调用 kick；
    /// 4. 若队列处于流控，睡眠直到流控解除、队列关闭或切换为非阻塞。
    ///
    /// # 契约说明（What）
    /// - kick 在元数据锁释放后调用，但此时仍持有写者互斥锁：回调不得再阻塞写入同一队列；
    /// - 数据先入队再等待，等待期间的唤醒只推迟返回，不影响数据是否已被接受。
    pub fn write_block(&self, block: Block) -> Result<usize, QueueError> {
        let n = block.len();
        if let Some(bypass) = &self.inner.bypass {
            bypass(BlockChain::from(block));
            return Ok(n);
        }

        let _writer = self.inner.wlock.lock();
        let wake = {
            let mut core = self.inner.core.lock();
            if core.is_closed() {
                return Err(core.closed_error());
            }
            if core.len >= core.limit && core.state.contains(QueueState::NOBLOCK) {
                drop(core);
                drop(block);
                self.inner.counters.dropped(n);
                warn!(bytes = n, "非阻塞队列已满，写入数据被丢弃");
                return Ok(n);
            }
            core.enqueue(block)
        };
        self.inner.counters.produced(n);
        self.deliver(wake);

        let inner = &*self.inner;
        inner.wr.sleep(|| inner.core.lock().state.writable());
        Ok(n)
    }

    /// 分块阻塞写入任意长度的数据，每块至多 [`MAX_ATOMIC`] 字节。
    ///
    /// - 每一块的入队是原子的，整次调用不是；
    /// - 消息模式只写第一块，调用方一次写入不得超过 [`MAX_ATOMIC`]；
    /// - 空输入仍入队一个零长度块（消息模式下即零长度消息）；
    /// - 任一块分配失败或队列关闭都中止整次写入，返回错误。
    ///
    /// 返回实际入队的字节数。
    pub fn write(&self, data: &[u8]) -> Result<usize, QueueError> {
        let mut written = 0;
        loop {
            let n = (data.len() - written).min(MAX_ATOMIC);
            let mut block = self.inner.alloc.alloc(n)?;
            block.put_slice(&data[written..written + n]);
            self.write_block(block)?;
            written += n;
            if written >= data.len() || self.inner.mode == QueueMode::Message {
                return Ok(written);
            }
        }
    }

    /// 中断安全的分块写入，用于内核打印一类不能睡眠的生产者。
    ///
    /// # 契约说明（What）
    /// - 只获取元数据锁，不获取写者互斥锁，也不等待流控；
    /// - 分配失败时静默截断；有效字节达到 `print_ceiling` 后丢弃其余数据；
    /// - 队列已关闭时丢弃数据，但仍按全部长度报告（与 `pass` 一致）；
    /// - 返回被接受的字节数。
    pub fn iwrite(&self, data: &[u8]) -> usize {
        let mut written = 0;
        loop {
            let n = (data.len() - written).min(MAX_ATOMIC);
            let Some(mut block) = self.inner.alloc.alloc_atomic(n) else {
                warn!(bytes = data.len() - written, "中断安全分配失败，写入被截断");
                break;
            };
            block.put_slice(&data[written..written + n]);

            if let Some(bypass) = &self.inner.bypass {
                bypass(BlockChain::from(block));
            } else {
                let wake = {
                    let mut core = self.inner.core.lock();
                    if core.is_closed() {
                        drop(core);
                        self.inner.counters.dropped(data.len() - written);
                        return data.len();
                    }
                    if core.dlen >= self.inner.print_ceiling {
                        drop(core);
                        self.inner.counters.dropped(data.len() - written);
                        warn!(
                            bytes = data.len() - written,
                            ceiling = self.inner.print_ceiling,
                            "打印缓冲已达上限，丢弃后续数据"
                        );
                        break;
                    }
                    core.enqueue(block)
                };
                self.inner.counters.produced(n);
                self.deliver(wake);
            }

            written += n;
            if written >= data.len() || self.inner.mode == QueueMode::Message {
                break;
            }
        }
        written
    }

    /// 中断安全的字节串生产，供键盘中断一类逐字节的生产者使用。
    ///
    /// # 逻辑解析（How）
    /// - 已达上限时置 `FLOW` 并返回 [`QueueFull`]，不阻塞；
    /// - 合并模式下若尾块剩余空间足够，直接追加到尾块；
    /// - 否则释放元数据锁，以中断纪律分配并填充新块（合并模式下至少 [`COALESCE_BLOCK`] 字节，
    ///   为后续追加留出空间），再重新加锁入队。
    ///
    /// # 契约说明（What）
    /// - 分配失败返回 `Ok(0)`；队列已关闭时丢弃数据并返回 `Ok(data.len())`；
    /// - 成功时返回 `data.len()`。
    pub fn produce(&self, data: &[u8]) -> Result<usize, QueueFull> {
        let n = data.len();
        if let Some(bypass) = &self.inner.bypass {
            let Some(mut block) = self.inner.alloc.alloc_atomic(n) else {
                warn!(bytes = n, "中断安全分配失败，生产数据被丢弃");
                return Ok(0);
            };
            block.put_slice(data);
            bypass(BlockChain::from(block));
            return Ok(n);
        }

        let coalesce;
        let wake = {
            let mut guard = self.inner.core.lock();
            let core = &mut *guard;
            if core.is_closed() {
                drop(guard);
                self.inner.counters.dropped(n);
                return Ok(n);
            }
            if core.len >= core.limit {
                let flow_set = core.mark_flow();
                drop(guard);
                if flow_set {
                    self.inner.counters.flow_event();
                }
                return Err(QueueFull);
            }

            coalesce = core.state.contains(QueueState::COALESCE);
            let appended = coalesce
                && core.blocks.back_mut().is_some_and(|tail| {
                    tail.tailroom() >= n && {
                        tail.put_slice(data);
                        true
                    }
                });
            appended.then(|| {
                core.dlen += n;
                core.produced()
            })
        };

        let wake = match wake {
            Some(wake) => wake,
            None => {
                // 分配与复制在锁外进行，元数据锁只覆盖入队本身。
                let size = if coalesce { n.max(COALESCE_BLOCK) } else { n };
                let Some(mut block) = self.inner.alloc.alloc_atomic(size) else {
                    warn!(bytes = n, "中断安全分配失败，生产数据被丢弃");
                    return Ok(0);
                };
                block.put_slice(data);

                let mut core = self.inner.core.lock();
                if core.is_closed() {
                    drop(core);
                    drop(block);
                    self.inner.counters.dropped(n);
                    return Ok(n);
                }
                core.enqueue(block)
            }
        };
        self.inner.counters.produced(n);
        self.deliver(wake);
        Ok(n)
    }

    /// 把预先构造好的块链整体入队，遵守上限。
    ///
    /// - 已达上限时丢弃块链并返回 [`QueueFull`]；
    /// - 队列已关闭时丢弃块链，仍返回其分配长度；
    /// - 成功返回入队的分配字节数。
    pub fn pass(&self, chain: BlockChain) -> Result<usize, QueueFull> {
        self.pass_inner(chain, true)
    }

    /// 不受上限约束的整链入队，供绝不能丢数据的协议层使用。
    pub fn pass_unlimited(&self, chain: BlockChain) -> usize {
        // 不检查上限时不会返回 `QueueFull`。
        self.pass_inner(chain, false).unwrap_or_default()
    }

    fn pass_inner(&self, chain: BlockChain, enforce_limit: bool) -> Result<usize, QueueFull> {
        let len = chain.alloc_len();
        let data = chain.len();
        if let Some(bypass) = &self.inner.bypass {
            bypass(chain);
            return Ok(len);
        }

        let wake = {
            let mut core = self.inner.core.lock();
            if enforce_limit && core.len >= core.limit {
                drop(core);
                drop(chain);
                self.inner.counters.dropped(data);
                return Err(QueueFull);
            }
            if core.is_closed() {
                drop(core);
                drop(chain);
                self.inner.counters.dropped(data);
                return Ok(len);
            }
            core.enqueue_chain(chain)
        };
        self.inner.counters.produced(data);
        self.deliver(wake);
        Ok(len)
    }

    // ---- 消费者 ----

    /// 等待队列非空或关闭，调用方须已持有读者互斥锁。
    ///
    /// - 有数据：返回持锁的元数据守卫；
    /// - 已关闭且为空：默认关闭原因下前 [`EOF_READ_LIMIT`] 次返回 `Ok(None)`（EOF），之后返回错误；
    ///   自定义原因在数据排空后立即返回错误。
    fn wait_readable(&self) -> Result<Option<IrqGuard<'_, QueueCore>>, QueueError> {
        let inner = &*self.inner;
        loop {
            let mut core = inner.core.lock();
            if !core.blocks.is_empty() {
                return Ok(Some(core));
            }
            if core.is_closed() {
                core.eof = core.eof.saturating_add(1);
                if core.eof > EOF_READ_LIMIT || core.err != DEFAULT_HUNGUP {
                    return Err(core.closed_error());
                }
                return Ok(None);
            }
            core.state.insert(QueueState::STARVE);
            drop(core);

            inner.rr.sleep(|| {
                let core = inner.core.lock();
                !core.blocks.is_empty() || core.is_closed()
            });
        }
    }

    /// 阻塞读取一个块，至多 `max_len` 个有效字节；`Ok(None)` 表示 EOF。
    ///
    /// - 流模式：块超出 `max_len` 时零拷贝拆分，剩余部分放回队首；
    /// - 消息模式：截断写游标，超出部分永久丢弃，从不跨消息拆分。
    pub fn read_block(&self, max_len: usize) -> Result<Option<Block>, QueueError> {
        let reader = self.inner.rlock.lock();
        let Some(mut core) = self.wait_readable()? else {
            return Ok(None);
        };
        let Some(mut block) = core.pop_front() else {
            return Ok(None);
        };

        let mut discarded = 0;
        let mut wake = Wakeups::default();
        if block.len() > max_len {
            if core.state.contains(QueueState::MSG) {
                discarded = block.len() - max_len;
                block.truncate(max_len);
            } else {
                let head = block.split_to(max_len);
                core.push_front(block);
                wake.flow_set = core.mark_flow();
                block = head;
            }
        }
        let released = core.consumed();
        drop(core);
        drop(reader);

        self.inner.counters.consumed(block.len());
        self.inner.counters.dropped(discarded);
        self.deliver(Wakeups {
            writer: released.writer,
            kick: released.kick,
            ..wake
        });
        Ok(Some(block))
    }

    /// 阻塞读取到 `buf`，返回复制的字节数；EOF 时返回 0。
    ///
    /// # 逻辑解析（How）
    /// 1. 等待数据；合并模式下先丢弃零长度块，再取出首块及其后能完整放入 `buf` 的块；
    /// 2. 释放元数据锁后复制到 `buf`；
    /// 3. 重新加锁处理剩余部分：流模式放回队首，消息模式丢弃；随后判定流控解除。
    ///
    /// 剩余部分以零拷贝拆分得到，只按自身的分配长度重新记账。
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, QueueError> {
        let reader = self.inner.rlock.lock();
        let mut chain = loop {
            let Some(mut guard) = self.wait_readable()? else {
                return Ok(0);
            };
            let core = &mut *guard;
            if !core.state.contains(QueueState::COALESCE) {
                break core.pop_front().map(BlockChain::from).unwrap_or_default();
            }
            if core.blocks.front().is_some_and(Block::is_empty) {
                let empty = core.pop_front();
                let released = core.consumed();
                drop(guard);
                drop(empty);
                self.deliver(released);
                continue;
            }

            let mut chain = BlockChain::new();
            let mut taken = 0;
            while let Some(front) = core.blocks.front() {
                let next = front.len();
                if !chain.is_empty() && taken + next > buf.len() {
                    break;
                }
                taken += next;
                if let Some(block) = core.pop_front() {
                    chain.push_back(block);
                }
            }
            break chain;
        };

        // 零拷贝拆出要交付的部分，剩余块的分配长度随之缩小，流控据此判定。
        let head = chain.split_to(chain.len().min(buf.len()));
        let (copied, _) = head.drain_into(buf);
        let rest = (chain.len() > 0).then_some(chain);

        let mut garbage = None;
        let mut discarded = 0;
        let mut wake = Wakeups::default();
        let mut core = self.inner.core.lock();
        if let Some(rest) = rest {
            if core.state.contains(QueueState::MSG) {
                discarded = rest.len();
                garbage = Some(rest);
            } else {
                wake = core.put_back(rest);
            }
        }
        let released = core.consumed();
        drop(core);
        drop(reader);
        drop(garbage);

        self.inner.counters.consumed(copied);
        self.inner.counters.dropped(discarded);
        self.deliver(Wakeups {
            writer: released.writer,
            kick: released.kick,
            ..wake
        });
        Ok(copied)
    }

    /// 中断安全的复制出队，从不阻塞；队列为空时置 `STARVE` 并返回 [`QueueEmpty`]。
    ///
    /// 截断规则与 [`read_block`](Self::read_block) 相同；零长度块被跳过并释放。
    pub fn consume(&self, buf: &mut [u8]) -> Result<usize, QueueEmpty> {
        let mut empties = Vec::new();
        let mut block = {
            let mut core = self.inner.core.lock();
            loop {
                let Some(block) = core.pop_front() else {
                    core.state.insert(QueueState::STARVE);
                    let released = core.consumed();
                    drop(core);
                    drop(empties);
                    self.deliver(released);
                    return Err(QueueEmpty);
                };
                if !block.is_empty() {
                    break block;
                }
                empties.push(block);
            }
        };

        let n = block.len().min(buf.len());
        let head = block.split_to(n);
        buf[..n].copy_from_slice(head.data());
        drop(head);

        let mut garbage = None;
        let mut discarded = 0;
        let mut wake = Wakeups::default();
        let mut core = self.inner.core.lock();
        if block.is_empty() {
            garbage = Some(block);
        } else if core.state.contains(QueueState::MSG) {
            discarded = block.len();
            garbage = Some(block);
        } else {
            wake = core.put_back(BlockChain::from(block));
        }
        let released = core.consumed();
        drop(core);
        drop(garbage);
        drop(empties);

        self.inner.counters.consumed(n);
        self.inner.counters.dropped(discarded);
        self.deliver(Wakeups {
            writer: released.writer,
            kick: released.kick,
            ..wake
        });
        Ok(n)
    }

    /// 无条件取出一个块；队列为空时置 `STARVE` 并返回 `None`。
    pub fn get(&self) -> Option<Block> {
        let mut core = self.inner.core.lock();
        let Some(block) = core.pop_front() else {
            core.state.insert(QueueState::STARVE);
            return None;
        };
        let wake = core.consumed();
        drop(core);

        self.inner.counters.consumed(block.len());
        self.deliver(wake);
        Some(block)
    }

    /// 从队首丢弃至多 `n` 个有效字节，返回实际丢弃量；用于错误恢复。
    pub fn discard(&self, n: usize) -> usize {
        let mut garbage = Vec::new();
        let mut discarded = 0;
        let wake = {
            let mut guard = self.inner.core.lock();
            let core = &mut *guard;
            while discarded < n {
                let Some(front) = core.blocks.front_mut() else {
                    break;
                };
                let available = front.len();
                if available <= n - discarded {
                    discarded += available;
                    if let Some(block) = core.pop_front() {
                        garbage.push(block);
                    }
                } else {
                    let partial = front.consume(n - discarded);
                    core.dlen -= partial;
                    discarded += partial;
                }
            }
            core.consumed()
        };
        drop(garbage);

        self.inner.counters.dropped(discarded);
        self.deliver(wake);
        discarded
    }

    /// 复制缓冲数据中从 `offset` 起至多 `len` 字节到一个新块，不移除任何数据。
    ///
    /// 新块以阻塞纪律在加锁前分配，容量为 `len`；缓冲数据不足时新块的有效长度小于 `len`。
    pub fn peek_copy(&self, len: usize, offset: usize) -> Result<Block, QueueError> {
        let mut copy = self.inner.alloc.alloc(len)?;
        {
            let core = self.inner.core.lock();
            let mut skip = offset;
            for block in &core.blocks {
                if copy.tailroom() == 0 {
                    break;
                }
                let data = block.data();
                if skip >= data.len() {
                    skip -= data.len();
                    continue;
                }
                let take = (data.len() - skip).min(copy.tailroom());
                copy.put_slice(&data[skip..skip + take]);
                skip = 0;
            }
        }
        self.inner.counters.copied(copy.len());
        Ok(copy)
    }

    // ---- 生命周期 ----

    /// 关闭队列：立即丢弃全部缓冲数据，之后的读写都以 "hung up" 失败（读者先观察到 EOF）。
    pub fn close(&self) {
        let drained = {
            let mut core = self.inner.core.lock();
            core.state.insert(QueueState::CLOSED);
            core.state
                .remove(QueueState::FLOW | QueueState::STARVE | QueueState::NOBLOCK);
            core.err = DEFAULT_HUNGUP.to_owned();
            core.drain()
        };
        let discarded: usize = drained.iter().map(Block::len).sum();
        drop(drained);

        self.inner.counters.dropped(discarded);
        self.inner.rr.wakeup();
        self.inner.wr.wakeup();
        debug!(discarded, "队列已关闭");
    }

    /// 挂断队列：标记关闭并记录原因，但保留已缓冲的数据供读者排空。
    ///
    /// `reason` 为空或缺省时使用 "hung up"。
    pub fn hangup(&self, reason: Option<&str>) {
        let reason = reason.filter(|msg| !msg.is_empty()).unwrap_or(DEFAULT_HUNGUP);
        let buffered = {
            let mut core = self.inner.core.lock();
            core.state.insert(QueueState::CLOSED);
            core.err = reason.to_owned();
            core.dlen
        };
        self.inner.rr.wakeup();
        self.inner.wr.wakeup();
        debug!(reason, buffered, "队列已挂断");
    }

    /// 重新打开：清除关闭标记与 EOF 计数，恢复初始上限并置 `STARVE`；模式位保持不变。
    pub fn reopen(&self) {
        let (limit, wake) = {
            let mut core = self.inner.core.lock();
            core.state.remove(QueueState::CLOSED);
            core.state.insert(QueueState::STARVE);
            core.eof = 0;
            core.limit = core.initial_limit;
            (core.limit, core.rebalance_flow())
        };
        self.deliver(wake);
        debug!(limit, "队列已重新打开");
    }

    /// 丢弃全部缓冲数据并解除流控，队列保持打开。
    pub fn flush(&self) {
        let (drained, wake) = {
            let mut core = self.inner.core.lock();
            let drained = core.drain();
            (drained, core.consumed())
        };
        let discarded: usize = drained.iter().map(Block::len).sum();
        drop(drained);

        self.inner.counters.dropped(discarded);
        self.deliver(wake);
        debug!(discarded, "队列已清空");
    }

    // ---- 访问器 ----

    /// 缓冲的有效字节数。
    pub fn len(&self) -> usize {
        self.inner.core.lock().dlen
    }

    pub fn is_empty(&self) -> bool {
        self.inner.core.lock().blocks.is_empty()
    }

    /// 缓冲块的分配字节数，流控以此为准。
    pub fn alloc_len(&self) -> usize {
        self.inner.core.lock().len
    }

    /// 进入流控前还能接受的分配字节数。
    pub fn window(&self) -> usize {
        let core = self.inner.core.lock();
        core.limit.saturating_sub(core.len)
    }

    /// 读取是否无需等待。
    pub fn can_read(&self) -> bool {
        !self.is_empty()
    }

    /// 是否处于流控。
    pub fn is_full(&self) -> bool {
        self.state().contains(QueueState::FLOW)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.core.lock().is_closed()
    }

    pub fn state(&self) -> QueueState {
        self.inner.core.lock().state
    }

    pub fn limit(&self) -> usize {
        self.inner.core.lock().limit
    }

    pub fn mode(&self) -> QueueMode {
        self.inner.mode
    }

    pub fn is_bypass(&self) -> bool {
        self.inner.bypass.is_some()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.counters.snapshot()
    }

    /// 修改字节上限并立即重新判定流控；`reopen` 会恢复创建时的上限。
    pub fn set_limit(&self, limit: usize) {
        let wake = {
            let mut core = self.inner.core.lock();
            core.limit = limit;
            core.rebalance_flow()
        };
        self.deliver(wake);
        debug!(limit, "队列上限已调整");
    }

    /// 切换满队列上阻塞写入的行为；开启时释放正在流控等待的写者。
    pub fn set_noblock(&self, noblock: bool) {
        self.inner
            .core
            .lock()
            .state
            .set(QueueState::NOBLOCK, noblock);
        if noblock {
            self.inner.wr.wakeup();
        }
    }

    /// 在锁外执行临界区产出的唤醒与回调。
    fn deliver(&self, wake: Wakeups) {
        let inner = &*self.inner;
        if wake.flow_set {
            inner.counters.flow_event();
            trace!("队列进入流控");
        }
        if wake.reader {
            inner.counters.starve_wakeup();
            trace!("唤醒饥饿读者");
            inner.rr.wakeup();
        }
        if wake.writer {
            inner.counters.flow_release();
            trace!("流控解除，唤醒写者");
            inner.wr.wakeup();
        }
        if wake.kick {
            if let Some(kick) = &inner.kick {
                kick();
            }
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Queue")
            .field("len", &core.dlen)
            .field("alloc_len", &core.len)
            .field("limit", &core.limit)
            .field("blocks", &core.blocks.len())
            .field("state", &core.state)
            .field("bypass", &self.inner.bypass.is_some())
            .finish()
    }
}
