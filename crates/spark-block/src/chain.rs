//! 块链：一段逻辑上连续、物理上可能分散的缓冲。
//!
//! # 教案式说明
//! - **意图（Why）**：协议层收到的数据往往是多个块拼接而成，需要在不关心分片的前提下
//!   补头、合并、上拉协议头、裁剪与复制；这些操作都是纯函数，不涉及任何共享状态。
//! - **逻辑（How）**：[`BlockChain`] 以 `VecDeque<Block>` 独占持有所有块，
//!   每个操作都按值消费输入、返回新的块链，调用方不再需要记住“链归谁所有”。
//! - **契约（What）**：所有操作同步、不阻塞、不加锁；调用方不得跨线程共享正在修改的块链。
//!   需要分配的操作接收一个 [`BlockAllocator`]，分配失败以 [`BlockError`] 返回。

use alloc::{collections::VecDeque, vec::Vec};
use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use bytes::Buf;

use crate::{Block, BlockAllocator, BlockError, MAX_ATOMIC};

static PAD_REALLOCS: AtomicUsize = AtomicUsize::new(0);
static CONCAT_BYTES: AtomicUsize = AtomicUsize::new(0);
static PULLUP_COPIES: AtomicUsize = AtomicUsize::new(0);
static COPY_BLOCKS: AtomicUsize = AtomicUsize::new(0);

/// 块链操作的全局计数快照，用于排查“热路径上频繁重新分配”一类的性能问题。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainCounters {
    /// 补头/补尾时因空间不足而重新分配的次数。
    pub pad: usize,
    /// `concat` 累计复制的字节数。
    pub concat: usize,
    /// `pullup` 执行的跨块搬移次数。
    pub pullup: usize,
    /// `copy` 生成的新块数。
    pub copy: usize,
}

/// 读取全局计数快照。
pub fn counters() -> ChainCounters {
    ChainCounters {
        pad: PAD_REALLOCS.load(Ordering::Relaxed),
        concat: CONCAT_BYTES.load(Ordering::Relaxed),
        pullup: PULLUP_COPIES.load(Ordering::Relaxed),
        copy: COPY_BLOCKS.load(Ordering::Relaxed),
    }
}

/// 有序的块序列，代表一个逻辑缓冲。
///
/// # 契约说明（What）
/// - 块按顺序独占持有，不存在共享与环；
/// - [`len`](Self::len) / [`alloc_len`](Self::alloc_len) 分别是有效字节与分配字节之和，复杂度 O(块数)；
/// - 空块链（没有任何块）与“含一个空块”的块链是两种不同状态，前者代表“无结果”。
#[derive(Default)]
pub struct BlockChain {
    blocks: VecDeque<Block>,
}

impl BlockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把内存复制进新的块链，每块至多 [`MAX_ATOMIC`] 字节；空输入仍产生一个空块。
    pub fn from_slice<A>(alloc: &A, data: &[u8]) -> Result<Self, BlockError>
    where
        A: BlockAllocator + ?Sized,
    {
        let mut chain = Self::new();
        if data.is_empty() {
            chain.push_back(alloc.alloc(0)?);
            return Ok(chain);
        }
        for chunk in data.chunks(MAX_ATOMIC) {
            let mut block = alloc.alloc(chunk.len())?;
            block.put_slice(chunk);
            chain.push_back(block);
        }
        Ok(chain)
    }

    /// 块链中是否没有任何块。
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// 有效数据字节之和。
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    /// 分配字节之和。
    pub fn alloc_len(&self) -> usize {
        self.blocks.iter().map(Block::alloc_len).sum()
    }

    pub fn push_back(&mut self, block: Block) {
        self.blocks.push_back(block);
    }

    pub fn push_front(&mut self, block: Block) {
        self.blocks.push_front(block);
    }

    pub fn pop_front(&mut self) -> Option<Block> {
        self.blocks.pop_front()
    }

    pub fn front(&self) -> Option<&Block> {
        self.blocks.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut Block> {
        self.blocks.front_mut()
    }

    pub fn back_mut(&mut self) -> Option<&mut Block> {
        self.blocks.back_mut()
    }

    /// 把 `other` 的全部块接到尾部。
    pub fn append(&mut self, mut other: BlockChain) {
        self.blocks.append(&mut other.blocks);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// 把有效数据扁平化为 `Vec<u8>`，不消费块链。
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for block in &self.blocks {
            out.extend_from_slice(block.data());
        }
        out
    }

    /// 逐块校验游标不变量。
    pub fn check(&self, context: &str) {
        for block in &self.blocks {
            block.check(context);
        }
    }

    /// 按符号补空间：`size >= 0` 时补头（见 [`pad_front`](Self::pad_front)），
    /// 否则补尾（见 [`pad_back`](Self::pad_back)）。
    pub fn pad<A>(self, alloc: &A, size: isize) -> Result<Self, BlockError>
    where
        A: BlockAllocator + ?Sized,
    {
        if size >= 0 {
            self.pad_front(alloc, size.unsigned_abs())
        } else {
            self.pad_back(alloc, size.unsigned_abs())
        }
    }

    /// 在首块前部腾出 `size` 字节并纳入有效区间，供调用方写入协议头。
    ///
    /// # 逻辑解析（How）
    /// 1. 首块前部空间足够时只回退读游标，不复制；
    /// 2. 否则分配 `size + len` 字节的新块，把数据复制到偏移 `size` 处，原块随之释放。
    ///
    /// # Panics
    /// 需要重新分配而块链包含多个块时 panic：调用方应先 [`concat`](Self::concat)。
    pub fn pad_front<A>(mut self, alloc: &A, size: usize) -> Result<Self, BlockError>
    where
        A: BlockAllocator + ?Sized,
    {
        if let Some(first) = self.blocks.front_mut() {
            if first.headroom() >= size {
                first.push_front(size);
                return Ok(self);
            }
        }
        assert!(
            self.blocks.len() <= 1,
            "BlockChain::pad_front 不能为多块链重新分配，请先 concat"
        );
        let n = self.len();
        let mut block = alloc.alloc(size + n)?;
        block.reserve_headroom(size);
        if let Some(old) = self.blocks.front() {
            block.put_slice(old.data());
        }
        block.push_front(size);
        note_pad_realloc(size, n);
        Ok(Self::from(block))
    }

    /// 确保单块拥有至少 `size` 字节尾部空间，不足时重新分配并复制。
    ///
    /// # Panics
    /// 块链包含多个块时 panic。
    pub fn pad_back<A>(self, alloc: &A, size: usize) -> Result<Self, BlockError>
    where
        A: BlockAllocator + ?Sized,
    {
        assert!(
            self.blocks.len() <= 1,
            "BlockChain::pad_back 只能作用于单块，请先 concat"
        );
        if self.blocks.front().is_some_and(|b| b.tailroom() >= size) {
            return Ok(self);
        }
        let n = self.len();
        let mut block = alloc.alloc(size + n)?;
        if let Some(old) = self.blocks.front() {
            block.put_slice(old.data());
        }
        note_pad_realloc(size, n);
        Ok(Self::from(block))
    }

    /// 把整条块链复制进一个恰好容纳全部数据的新块；单块链原样返回。
    pub fn concat<A>(mut self, alloc: &A) -> Result<Block, BlockError>
    where
        A: BlockAllocator + ?Sized,
    {
        if self.blocks.len() <= 1 {
            return match self.blocks.pop_front() {
                Some(block) => Ok(block),
                None => alloc.alloc(0),
            };
        }
        let total = self.len();
        let mut block = alloc.alloc(total)?;
        for part in &self.blocks {
            block.put_slice(part.data());
        }
        CONCAT_BYTES.fetch_add(total, Ordering::Relaxed);
        Ok(block)
    }

    /// 保证首块至少含 `n` 个有效字节，常用于一次性读取完整协议头。
    ///
    /// # 逻辑解析（How）
    /// 1. 首块已满足时直接返回；
    /// 2. 首块从读游标起的容量不足 `n` 时，在链首插入一个 `n` 字节的新块；
    /// 3. 从后续块搬移字节进首块，被搬空的块随即释放。
    ///
    /// # 契约说明（What）
    /// - 块链总长度不足 `n` 时返回 `Ok(None)`，输入被释放；
    /// - 数据顺序与总长度保持不变。
    pub fn pullup<A>(mut self, alloc: &A, n: usize) -> Result<Option<Self>, BlockError>
    where
        A: BlockAllocator + ?Sized,
    {
        if self.len() < n {
            return Ok(None);
        }
        let Some(mut first) = self.blocks.pop_front() else {
            return Ok(Some(self));
        };
        if first.len() >= n {
            self.blocks.push_front(first);
            return Ok(Some(self));
        }
        if first.alloc_len() - first.read_offset() < n {
            self.blocks.push_front(first);
            first = alloc.alloc(n)?;
        }

        let mut need = n - first.len();
        while need > 0 {
            let Some(next) = self.blocks.front_mut() else {
                break;
            };
            let available = next.len();
            PULLUP_COPIES.fetch_add(1, Ordering::Relaxed);
            if available > need {
                first.put_slice(&next.data()[..need]);
                next.consume(need);
                need = 0;
            } else {
                first.put_slice(next.data());
                need -= available;
                self.blocks.pop_front();
            }
        }
        self.blocks.push_front(first);
        Ok(Some(self))
    }

    /// 只保留 `[offset, offset + len)` 区间，释放变空的块。
    ///
    /// - 块链短于 `offset + len` 时返回 `None`；
    /// - 窗口首尾不留空块：`offset` 恰落在块边界时，前面的块整块释放；`len == 0` 时返回空链。
    pub fn trim(mut self, offset: usize, len: usize) -> Option<Self> {
        let end = offset.checked_add(len)?;
        if self.len() < end {
            return None;
        }

        let mut offset = offset;
        while let Some(front) = self.blocks.front() {
            if front.len() > offset {
                break;
            }
            offset -= front.len();
            self.blocks.pop_front();
        }
        if let Some(first) = self.blocks.front_mut() {
            first.consume(offset);
        }

        let mut remaining = len;
        let mut keep = 0;
        for block in self.blocks.iter_mut() {
            if remaining == 0 {
                break;
            }
            keep += 1;
            if block.len() >= remaining {
                block.truncate(remaining);
                break;
            }
            remaining -= block.len();
        }
        self.blocks.truncate(keep);
        Some(self)
    }

    /// 复制前 `count` 个字节到新块，数据不足时以零补齐；输入不被消费。
    pub fn copy<A>(&self, alloc: &A, count: usize) -> Result<Block, BlockError>
    where
        A: BlockAllocator + ?Sized,
    {
        let mut block = alloc.alloc(count)?;
        for part in &self.blocks {
            if block.tailroom() == 0 {
                break;
            }
            block.put_slice(part.data());
        }
        let shortfall = block.tailroom();
        block.put_zeros(shortfall);
        COPY_BLOCKS.fetch_add(1, Ordering::Relaxed);
        Ok(block)
    }

    /// 把首块的有效长度调整为 `len`。
    ///
    /// - 首块从读游标起容量不足时，改为 [`copy`](Self::copy) 出一个新块（输入释放）；
    /// - 否则就地增长（零填充）或回退写游标。
    pub fn adjust<A>(mut self, alloc: &A, len: usize) -> Result<Self, BlockError>
    where
        A: BlockAllocator + ?Sized,
    {
        match self.blocks.front_mut() {
            Some(first) if first.read_offset() + len <= first.alloc_len() => {
                first.set_len(len);
                Ok(self)
            }
            _ => Ok(Self::from(self.copy(alloc, len)?)),
        }
    }

    /// 从前部丢弃至多 `count` 字节并释放变空的块，返回实际丢弃量。
    pub fn discard_front(&mut self, count: usize) -> usize {
        let mut left = count;
        let mut dropped = 0;
        while left > 0 {
            let Some(front) = self.blocks.front_mut() else {
                break;
            };
            let n = front.consume(left);
            dropped += n;
            left -= n;
            if front.is_empty() {
                self.blocks.pop_front();
            }
        }
        dropped
    }

    /// 重新分配利用率低于四分之一的块，回收闲置容量。
    pub fn pack<A>(self, alloc: &A) -> Result<Self, BlockError>
    where
        A: BlockAllocator + ?Sized,
    {
        let mut packed = VecDeque::with_capacity(self.blocks.len());
        for block in self.blocks {
            if block.len().saturating_mul(4) < block.alloc_len() {
                let mut compact = alloc.alloc(block.len())?;
                compact.put_slice(block.data());
                packed.push_back(compact);
            } else {
                packed.push_back(block);
            }
        }
        Ok(Self { blocks: packed })
    }

    /// 把数据复制到 `dst`，完全读空的块被释放。
    ///
    /// 返回复制的字节数与尚未读完的剩余块链（没有剩余时为 `None`）。
    pub fn drain_into(mut self, dst: &mut [u8]) -> (usize, Option<Self>) {
        let mut copied = 0;
        while let Some(front) = self.blocks.front_mut() {
            let room = dst.len() - copied;
            let available = front.len();
            if available > room {
                dst[copied..].copy_from_slice(&front.data()[..room]);
                front.consume(room);
                copied += room;
                return (copied, Some(self));
            }
            dst[copied..copied + available].copy_from_slice(front.data());
            copied += available;
            self.blocks.pop_front();
        }
        (copied, None)
    }

    /// 零拷贝地拆出前 `at` 个有效字节，自身保留剩余部分。
    ///
    /// # Panics
    /// `at` 超过 [`len`](Self::len) 时 panic。
    pub fn split_to(&mut self, at: usize) -> Self {
        assert!(
            at <= self.len(),
            "BlockChain::split_to 超出有效数据：请求 {at}，实际 {}",
            self.len()
        );
        let mut head = Self::new();
        let mut need = at;
        while need > 0 {
            let Some(front) = self.blocks.front_mut() else {
                break;
            };
            if front.len() <= need {
                need -= front.len();
                if let Some(block) = self.blocks.pop_front() {
                    head.blocks.push_back(block);
                }
            } else {
                head.blocks.push_back(front.split_to(need));
                need = 0;
            }
        }
        head
    }

    /// 把有效数据截短到至多 `len` 字节，丢弃其后的字节与块。
    pub fn truncate(&mut self, len: usize) {
        let mut remaining = len;
        let mut keep = self.blocks.len();
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if block.len() >= remaining {
                block.truncate(remaining);
                keep = index + 1;
                break;
            }
            remaining -= block.len();
        }
        self.blocks.truncate(keep);
    }
}

fn note_pad_realloc(size: usize, len: usize) {
    PAD_REALLOCS.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(size, len, "pad 空间不足，重新分配块");
}

impl From<Block> for BlockChain {
    fn from(block: Block) -> Self {
        let mut blocks = VecDeque::with_capacity(1);
        blocks.push_back(block);
        Self { blocks }
    }
}

impl FromIterator<Block> for BlockChain {
    fn from_iter<I: IntoIterator<Item = Block>>(iter: I) -> Self {
        Self {
            blocks: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for BlockChain {
    type Item = Block;
    type IntoIter = alloc::collections::vec_deque::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

impl Buf for BlockChain {
    fn remaining(&self) -> usize {
        self.len()
    }

    fn chunk(&self) -> &[u8] {
        self.blocks
            .iter()
            .find(|block| !block.is_empty())
            .map(Block::data)
            .unwrap_or(&[])
    }

    fn advance(&mut self, cnt: usize) {
        let remaining = self.len();
        assert!(
            cnt <= remaining,
            "BlockChain::advance 超出有效数据：请求 {cnt}，实际 {remaining}"
        );
        self.discard_front(cnt);
    }
}

impl fmt::Debug for BlockChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.blocks.iter()).finish()
    }
}
