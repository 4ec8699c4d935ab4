//! 块链操作性质验证：以扁平字节切片为影子模型，随机分片后比较各操作的结果。
//!
//! # 教案级注释概览
//! - **核心目标 (Why)**：块链操作的正确性只取决于“逻辑字节序列”，与分片方式无关；
//!   因此任何分片下，`trim`/`pullup`/`copy`/`split_to`/`concat` 都必须与切片上的同名运算一致。
//! - **设计手法 (How)**：`fragmented()` 生成数据与切分点，构造多块链；每条性质同时在模型与块链上求值。
//! - **合同与边界 (What)**：主要断言数据与长度；块数只断言释放性质（`trim` 结果首尾无空块，`pullup` 释放搬空的块）。

use bytes::Buf;
use proptest::prelude::*;
use spark_block::{Block, BlockChain, HeapAllocator};

fn fragmented() -> impl Strategy<Value = (Vec<u8>, Vec<usize>)> {
    proptest::collection::vec(any::<u8>(), 0..256).prop_flat_map(|data| {
        let len = data.len();
        (
            Just(data),
            proptest::collection::vec(0..=len, 0..6).prop_map(|mut cuts| {
                cuts.sort_unstable();
                cuts
            }),
        )
    })
}

fn build(data: &[u8], cuts: &[usize]) -> BlockChain {
    let mut chain = BlockChain::new();
    let mut start = 0;
    for &cut in cuts {
        chain.push_back(Block::from_slice(&data[start..cut]));
        start = cut;
    }
    chain.push_back(Block::from_slice(&data[start..]));
    chain
}

proptest! {
    #[test]
    fn concat_matches_model((data, cuts) in fragmented()) {
        let block = build(&data, &cuts).concat(&HeapAllocator).expect("堆分配不会失败");
        prop_assert_eq!(block.data(), &data[..]);
    }

    #[test]
    fn trim_matches_model((data, cuts) in fragmented(), offset in 0usize..300, len in 0usize..300) {
        let trimmed = build(&data, &cuts).trim(offset, len);
        if offset + len <= data.len() {
            let chain = trimmed.expect("窗口在范围内");
            prop_assert_eq!(chain.to_vec(), data[offset..offset + len].to_vec());
            prop_assert_eq!(chain.block_count() == 0, len == 0);
            prop_assert!(chain.front().is_none_or(|b| !b.is_empty()), "窗口前的空块必须释放");
            prop_assert!(chain.iter().last().is_none_or(|b| !b.is_empty()), "窗口后的空块必须释放");
        } else {
            prop_assert!(trimmed.is_none());
        }
    }

    #[test]
    fn pullup_matches_model((data, cuts) in fragmented(), n in 0usize..300) {
        let pulled = build(&data, &cuts).pullup(&HeapAllocator, n).expect("堆分配不会失败");
        if n <= data.len() {
            let chain = pulled.expect("长度足够");
            prop_assert!(chain.front().map_or(0, Block::len) >= n);
            prop_assert_eq!(chain.to_vec(), data.clone());
        } else {
            prop_assert!(pulled.is_none());
        }
    }

    #[test]
    fn copy_zero_pads_model((data, cuts) in fragmented(), count in 0usize..300) {
        let chain = build(&data, &cuts);
        let block = chain.copy(&HeapAllocator, count).expect("堆分配不会失败");
        let mut expected = data.clone();
        expected.resize(count, 0);
        prop_assert_eq!(block.data(), &expected[..]);
        prop_assert_eq!(chain.to_vec(), data, "copy 不得消费输入");
    }

    #[test]
    fn split_to_partitions_model((data, cuts) in fragmented(), at in 0usize..300) {
        let at = at.min(data.len());
        let mut rest = build(&data, &cuts);
        let head = rest.split_to(at);
        prop_assert_eq!(head.to_vec(), data[..at].to_vec());
        prop_assert_eq!(rest.to_vec(), data[at..].to_vec());
        prop_assert_eq!(head.alloc_len() + rest.alloc_len(), data.len());
    }

    #[test]
    fn buf_reads_back_model((data, cuts) in fragmented()) {
        let mut chain = build(&data, &cuts);
        let bytes = chain.copy_to_bytes(data.len());
        prop_assert_eq!(&bytes[..], &data[..]);
        prop_assert_eq!(chain.remaining(), 0);
    }

    #[test]
    fn drain_into_matches_model((data, cuts) in fragmented(), room in 0usize..300) {
        let mut dst = vec![0u8; room];
        let (copied, rest) = build(&data, &cuts).drain_into(&mut dst);
        let expected = room.min(data.len());
        prop_assert_eq!(copied, expected);
        prop_assert_eq!(&dst[..copied], &data[..copied]);
        let leftover = rest.map(|chain| chain.to_vec()).unwrap_or_default();
        prop_assert_eq!(leftover, data[copied..].to_vec());
    }
}
