use alloc::{sync::Arc, vec::Vec};
use core::{fmt, mem};

use bytes::{Buf, Bytes, BytesMut};
use spin::Mutex;

/// `BlockRecycler` 描述块存储在生命周期结束时的归还入口。
///
/// # 设计初衷（Why）
/// - 分配器契约只约束“如何拿到块”，不约束块销毁时如何归还内存；
///   驱动或内存池需要自己的释放例程时，通过该接口在 `Drop` 阶段收到通知。
/// - 让归还逻辑集中在一处，避免队列、块链操作在各自路径上手动释放。
///
/// # 契约定义（What）
/// - 同一次租借只会收到一次 `reclaim` 调用，即使块曾被 [`Block::split_to`] 拆成多段；
/// - 实现必须线程安全且不得 panic：回收发生在 `Drop` 路径上，可能处于中断上下文。
pub trait BlockRecycler: Send + Sync + 'static {
    /// 归还一次租借的容量，并在可能时交回底层存储。
    fn reclaim(&self, reclaimed: ReclaimedBlock);
}

/// 一次回收动作携带的上下文。
///
/// - `capacity`：租借时登记的字节数，预算统计以它为准；
/// - `storage`：租借时底层存储的真实容量，驻留统计以它为准；
/// - `buffer`：拼回的底层 `BytesMut`；块被冻结为 `Bytes` 后无法拿回时为 `None`。
#[derive(Debug)]
pub struct ReclaimedBlock {
    capacity: usize,
    storage: usize,
    buffer: Option<BytesMut>,
}

impl ReclaimedBlock {
    pub fn new(capacity: usize, storage: usize, buffer: Option<BytesMut>) -> Self {
        Self {
            capacity,
            storage,
            buffer,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn storage(&self) -> usize {
        self.storage
    }

    pub fn into_buffer(self) -> Option<BytesMut> {
        self.buffer
    }
}

/// 追踪一次池化租借，最后一个持有者销毁时触发回收。
///
/// 拆分出的块与原块共享同一租约，因此回收以“租约”而非“块”为粒度。
/// 各段销毁时把自己的存储片段交回租约，租约结束时按地址顺序拼回原存储。
pub(crate) struct Lease {
    recycler: Arc<dyn BlockRecycler>,
    capacity: usize,
    storage: usize,
    fragments: Mutex<Vec<BytesMut>>,
}

impl Lease {
    pub(crate) fn new(capacity: usize, storage: usize, recycler: Arc<dyn BlockRecycler>) -> Self {
        Self {
            recycler,
            capacity,
            storage,
            fragments: Mutex::new(Vec::new()),
        }
    }

    /// 暂存一段存储片段；片段保持原长度，拼接依赖 `len == capacity` 的相邻关系。
    fn store_fragment(&self, fragment: BytesMut) {
        if fragment.capacity() == 0 {
            return;
        }
        self.fragments.lock().push(fragment);
    }
}

/// 把同一次分配拆出的片段按地址拼回。
///
/// 只有首尾相接的片段才经 `unsplit` 合并（此时为 O(1)，不复制）；
/// 某段被冻结带走时存储出现缺口，返回最长的连续区段。
fn rejoin(mut fragments: Vec<BytesMut>) -> Option<BytesMut> {
    fragments.sort_by_key(|fragment| fragment.as_ptr() as usize);
    let mut best: Option<BytesMut> = None;
    let mut run: Option<BytesMut> = None;
    for fragment in fragments {
        run = match run {
            Some(mut joined)
                if !joined.is_empty()
                    && joined.as_ptr().wrapping_add(joined.len()) == fragment.as_ptr() =>
            {
                joined.unsplit(fragment);
                Some(joined)
            }
            Some(finished) => {
                best = longer(best, finished);
                Some(fragment)
            }
            None => Some(fragment),
        };
    }
    match run {
        Some(last) => longer(best, last),
        None => best,
    }
}

fn longer(current: Option<BytesMut>, candidate: BytesMut) -> Option<BytesMut> {
    match current {
        Some(kept) if kept.capacity() >= candidate.capacity() => Some(kept),
        _ => Some(candidate),
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let fragments = mem::take(&mut *self.fragments.lock());
        self.recycler.reclaim(ReclaimedBlock::new(
            self.capacity,
            self.storage,
            rejoin(fragments),
        ));
    }
}

/// `Block` 是传输单元：一段连续分配的字节区域加上独立的读写游标。
///
/// # 设计动机（Why）
/// - 协议栈、9P 传输、管道与控制台驱动都以“块”为单位搬运数据，
///   需要在块前预留协议头空间、在块尾追加数据，并且在不复制的情况下裁剪有效区间；
/// - 以 `BytesMut` 作为底层存储，可以复用 `bytes` 的零拷贝拆分能力（见 [`Block::split_to`]）。
///
/// # 结构说明（How）
/// - 容量区间 `[base, lim)` 即 `buf` 的全部长度，`base` 恒为 0，`lim == buf.len()`；
/// - `rp`/`wp` 为读写游标，有效数据区间为 `[rp, wp)`；
/// - `lease` 仅在块来自池化分配器时存在，`Drop` 时把存储交还给池。
///
/// # 契约说明（What）
/// - **不变量**：任意时刻 `0 <= rp <= wp <= lim`，所有公开方法都维持这一点，违例会 panic；
/// - **所有权**：块只被一个容器独占持有（调用方、队列或块链），移动即转移所有权，不存在别名；
/// - **分配长度**：[`alloc_len`](Self::alloc_len) 为 `lim - base`，队列的 `len` 统计以此为准。
pub struct Block {
    buf: BytesMut,
    rp: usize,
    wp: usize,
    lease: Option<Arc<Lease>>,
}

impl Block {
    /// 在全局堆上分配 `capacity` 字节、游标均位于起点的空块。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(capacity),
            rp: 0,
            wp: 0,
            lease: None,
        }
    }

    /// 分配 `size + headroom` 字节，并把游标推进到 `headroom`，为协议头预留前部空间。
    pub fn with_headroom(size: usize, headroom: usize) -> Self {
        let mut block = Self::with_capacity(size + headroom);
        block.reserve_headroom(headroom);
        block
    }

    /// 分配恰好容纳 `data` 的块并写入内容。
    pub fn from_slice(data: &[u8]) -> Self {
        let mut block = Self::with_capacity(data.len());
        block.put_slice(data);
        block
    }

    /// 以池化存储构造空块；`buf.len()` 即容量。
    pub(crate) fn from_lease(buf: BytesMut, lease: Arc<Lease>) -> Self {
        Self {
            buf,
            rp: 0,
            wp: 0,
            lease: Some(lease),
        }
    }

    /// 有效数据字节数（`wp - rp`）。
    pub fn len(&self) -> usize {
        self.wp - self.rp
    }

    pub fn is_empty(&self) -> bool {
        self.rp == self.wp
    }

    /// 分配字节数（`lim - base`）。
    pub fn alloc_len(&self) -> usize {
        self.buf.len()
    }

    /// 读游标之前可用于协议头的空间。
    pub fn headroom(&self) -> usize {
        self.rp
    }

    /// 写游标之后尚可追加的空间。
    pub fn tailroom(&self) -> usize {
        self.buf.len() - self.wp
    }

    pub fn read_offset(&self) -> usize {
        self.rp
    }

    pub fn write_offset(&self) -> usize {
        self.wp
    }

    /// 块是否来自池化分配器。
    pub fn is_pooled(&self) -> bool {
        self.lease.is_some()
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.rp..self.wp]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.rp..self.wp]
    }

    /// 写游标之后的未写区域；写入后需调用 [`commit`](Self::commit) 推进游标。
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.wp..]
    }

    /// 把写游标前移 `n` 字节。
    ///
    /// # Panics
    /// `n` 超过 [`tailroom`](Self::tailroom) 时 panic。
    pub fn commit(&mut self, n: usize) {
        assert!(
            n <= self.tailroom(),
            "Block::commit 超出尾部空间：请求 {n}，剩余 {}",
            self.tailroom()
        );
        self.wp += n;
    }

    /// 尽量追加 `src`，返回实际写入的字节数（受尾部空间限制）。
    pub fn put_slice(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.tailroom());
        self.buf[self.wp..self.wp + n].copy_from_slice(&src[..n]);
        self.wp += n;
        n
    }

    /// 追加 `n` 个零字节，返回实际写入量。
    pub fn put_zeros(&mut self, n: usize) -> usize {
        let n = n.min(self.tailroom());
        self.buf[self.wp..self.wp + n].fill(0);
        self.wp += n;
        n
    }

    /// 从前部丢弃至多 `n` 字节，返回实际丢弃量。
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.len());
        self.rp += n;
        n
    }

    /// 读游标后退 `n` 字节，把前部空间纳入有效区间（协议头写入位置）。
    ///
    /// # Panics
    /// `n` 超过 [`headroom`](Self::headroom) 时 panic。
    pub fn push_front(&mut self, n: usize) {
        assert!(
            n <= self.rp,
            "Block::push_front 超出前部空间：请求 {n}，剩余 {}",
            self.rp
        );
        self.rp -= n;
    }

    /// 在空块上预留 `headroom` 字节前部空间。
    ///
    /// # Panics
    /// 块非空或 `headroom` 超过容量时 panic。
    pub fn reserve_headroom(&mut self, headroom: usize) {
        assert!(self.is_empty(), "Block::reserve_headroom 只能用于空块");
        assert!(
            headroom <= self.buf.len(),
            "Block::reserve_headroom 超出容量：请求 {headroom}，容量 {}",
            self.buf.len()
        );
        self.rp = headroom;
        self.wp = headroom;
    }

    /// 把有效长度截短到至多 `len` 字节，丢弃尾部。
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.wp = self.rp + len;
        }
    }

    /// 把有效长度设置为 `len`：增长部分以零填充，缩短时回退写游标。
    ///
    /// # Panics
    /// `rp + len` 超过容量时 panic；调用方需先确认容量（参见 `BlockChain::adjust`）。
    pub fn set_len(&mut self, len: usize) {
        let end = self.rp + len;
        assert!(
            end <= self.buf.len(),
            "Block::set_len 超出容量：请求 {len}，可用 {}",
            self.buf.len() - self.rp
        );
        if end > self.wp {
            self.buf[self.wp..end].fill(0);
        }
        self.wp = end;
    }

    /// 零拷贝地拆出前 `at` 个有效字节。
    ///
    /// # 逻辑解析（How）
    /// - 借助 `BytesMut::split_to` 在 `rp + at` 处切开存储：前半段承载 `[base, rp + at)`，
    ///   自身保留 `[rp + at, lim)` 并重新以 0 为基址；
    /// - 两段分配长度之和等于原块，队列记账因此保持守恒；
    /// - 两段共享同一租约，最后一段销毁时才归还池。
    ///
    /// # Panics
    /// `at` 超过 [`len`](Self::len) 时 panic。
    pub fn split_to(&mut self, at: usize) -> Block {
        assert!(
            at <= self.len(),
            "Block::split_to 超出有效数据：请求 {at}，实际 {}",
            self.len()
        );
        let cut = self.rp + at;
        let head = self.buf.split_to(cut);
        let front = Block {
            buf: head,
            rp: self.rp,
            wp: cut,
            lease: self.lease.clone(),
        };
        self.wp -= cut;
        self.rp = 0;
        front
    }

    /// 冻结有效区间为只读的 `Bytes`；池化块此时只能归还统计，无法复用存储。
    pub fn into_bytes(mut self) -> Bytes {
        let (rp, wp) = (self.rp, self.wp);
        let buf = mem::take(&mut self.buf);
        self.rp = 0;
        self.wp = 0;
        buf.freeze().slice(rp..wp)
    }

    /// 校验游标不变量，违例时以 `context` 为线索 panic。
    pub fn check(&self, context: &str) {
        let lim = self.buf.len();
        if self.rp > self.wp || self.wp > lim {
            panic!(
                "block 不变量被破坏（{context}）：rp={} wp={} lim={lim}",
                self.rp, self.wp
            );
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.store_fragment(mem::take(&mut self.buf));
        }
    }
}

impl Buf for Block {
    fn remaining(&self) -> usize {
        self.len()
    }

    fn chunk(&self) -> &[u8] {
        self.data()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.len(),
            "Block::advance 超出有效数据：请求 {cnt}，实际 {}",
            self.len()
        );
        self.rp += cnt;
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len())
            .field("alloc_len", &self.alloc_len())
            .field("rp", &self.rp)
            .field("wp", &self.wp)
            .field("pooled", &self.is_pooled())
            .finish()
    }
}
