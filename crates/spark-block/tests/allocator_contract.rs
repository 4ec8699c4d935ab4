//! `allocator_contract` 集成测试：从公开 API 视角验证两种分配纪律与池化回收。
//!
//! # 测试目标（Why）
//! - 队列按分配长度记账，分配器必须返回容量恰为请求值的块；
//! - 池化块被拆分后仍只归还一次，否则统计会被重复扣减；
//! - 预算耗尽时阻塞纪律报错、中断纪律返回 `None`，两者互不混淆。
//!
//! # 结构安排（How）
//! - `both_disciplines_return_exact_capacity`：堆与池两种实现的后置条件；
//! - `split_blocks_share_one_lease`：拆分后的两段全部销毁才回收；
//! - `split_storage_is_rejoined_for_reuse`：拆分过的存储整段回到自由链表，后续租借命中池；
//! - `frozen_blocks_release_budget`：冻结为 `Bytes` 的块无法复用存储，但预算必须归还；
//! - `chain_operations_draw_from_pool`：块链操作经由传入的分配器取得新块。

use spark_block::{
    BlockAllocator, BlockChain, BlockError, HeapAllocator, SlabBlockAllocator, codes,
};

#[test]
fn both_disciplines_return_exact_capacity() {
    let pool = SlabBlockAllocator::new();
    let allocators: [&dyn BlockAllocator; 2] = [&HeapAllocator, &pool];
    for alloc in allocators {
        let block = alloc.alloc(37).expect("阻塞纪律分配");
        assert_eq!(block.alloc_len(), 37);
        assert_eq!(block.len(), 0);
        assert_eq!(block.tailroom(), 37);

        let atomic = alloc.alloc_atomic(5).expect("中断纪律分配");
        assert_eq!(atomic.alloc_len(), 5);
    }
}

#[test]
fn split_blocks_share_one_lease() {
    let pool = SlabBlockAllocator::new();
    let mut block = pool.alloc(32).expect("租借");
    block.put_slice(&[7u8; 32]);
    let head = block.split_to(10);
    assert!(head.is_pooled());
    assert_eq!(pool.stats().active_blocks, 1, "拆分不产生新租约");

    drop(head);
    assert_eq!(pool.stats().active_blocks, 1, "仍有一段存活时不得回收");

    drop(block);
    let stats = pool.stats();
    assert_eq!(stats.active_blocks, 0);
    assert_eq!(stats.leased_bytes, 0);
}

#[test]
fn split_storage_is_rejoined_for_reuse() {
    let pool = SlabBlockAllocator::new();
    for _ in 0..100 {
        let mut block = pool.alloc(64).expect("租借");
        block.put_slice(&[3u8; 64]);
        let head = block.split_to(10);
        drop(block);
        drop(head);
    }

    let stats = pool.stats();
    assert_eq!(stats.pool_misses, 1, "只有第一次租借需要新分配");
    assert_eq!(stats.pool_hits, 99);
    assert_eq!(stats.free_slots, 1, "片段必须拼回一整段存储");
    assert!(stats.available_bytes >= 64);

    pool.shrink_to_fit();
    assert_eq!(pool.stats().resident_bytes, 0, "无人持有时不得残留驻留字节");
}

#[test]
fn partially_frozen_split_keeps_resident_bytes_exact() {
    let pool = SlabBlockAllocator::new();
    let mut block = pool.alloc(64).expect("租借");
    block.put_slice(&[9u8; 64]);
    let head = block.split_to(16).into_bytes();
    drop(block);

    assert_eq!(pool.stats().free_slots, 1);
    pool.shrink_to_fit();
    assert_eq!(pool.stats().resident_bytes, 0);
    drop(head);
}

#[test]
fn frozen_blocks_release_budget() {
    let pool = SlabBlockAllocator::with_budget(64);
    let mut block = pool.alloc(64).expect("预算内租借");
    block.put_slice(b"frozen");
    let bytes = block.into_bytes();
    assert_eq!(&bytes[..], b"frozen");
    assert_eq!(pool.stats().leased_bytes, 0, "冻结后租约即结束");
    assert!(pool.alloc(64).is_ok(), "预算应已归还");
}

#[test]
fn exhausted_budget_maps_to_stable_code() {
    let pool = SlabBlockAllocator::with_budget(8);
    let err = pool.alloc(9).expect_err("超出预算");
    assert_eq!(err, BlockError::OutOfMemory { requested: 9 });
    assert_eq!(err.code(), codes::BLOCK_OUT_OF_MEMORY);
    assert!(pool.alloc_atomic(9).is_none());
}

#[test]
fn chain_operations_draw_from_pool() {
    let pool = SlabBlockAllocator::new();
    let chain = BlockChain::from_slice(&pool, b"hello, world").expect("复制进块链");
    let block = chain.concat(&pool).expect("单块链原样返回");
    assert_eq!(block.data(), b"hello, world");
    assert!(block.is_pooled());
    drop(block);

    assert!(pool.shrink_to_fit() >= 12);
    assert_eq!(pool.stats().free_slots, 0);
}
