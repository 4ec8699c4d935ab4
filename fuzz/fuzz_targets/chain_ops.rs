#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spark_block::{Block, BlockChain, HeapAllocator};

/// Fuzz 输入：一条初始块链与作用其上的变换序列。
///
/// - **Why**：块链变换组合繁多（补头、上拉、裁剪、拆分），任何一步弄丢或重复字节都会在协议层表现为难以复现的数据损坏；
/// - **How**：以 `Vec<u8>` 作影子模型，每步变换后比较块链内容与模型；
/// - **What**：内容、长度始终一致，且每个块通过 `check` 的游标自检。
#[derive(Debug, Arbitrary)]
struct ChainCase {
    fragments: Vec<Vec<u8>>,
    ops: Vec<ChainOp>,
}

#[derive(Debug, Arbitrary)]
enum ChainOp {
    /// 补头并写入固定字节。
    PadFront { size: u8 },
    Pullup { n: u16 },
    Trim { offset: u16, len: u16 },
    SplitTo { at: u16 },
    DiscardFront { count: u16 },
    Truncate { len: u16 },
    Pack,
    Concat,
}

fuzz_target!(|case: ChainCase| {
    let alloc = HeapAllocator;
    let mut chain: BlockChain = case
        .fragments
        .iter()
        .map(|fragment| Block::from_slice(fragment))
        .collect();
    let mut model: Vec<u8> = case.fragments.concat();

    for op in case.ops {
        match op {
            ChainOp::PadFront { size } => {
                let size = usize::from(size);
                chain = BlockChain::from(chain.concat(&alloc).expect("堆分配"));
                chain = chain.pad_front(&alloc, size).expect("堆分配");
                if let Some(first) = chain.front_mut() {
                    first.data_mut()[..size].fill(0xEE);
                }
                model.splice(0..0, std::iter::repeat_n(0xEE, size));
            }
            ChainOp::Pullup { n } => {
                let n = usize::from(n);
                match chain.pullup(&alloc, n).expect("堆分配") {
                    Some(pulled) => {
                        assert!(pulled.front().is_none_or(|b| b.len() >= n));
                        chain = pulled;
                    }
                    None => {
                        assert!(model.len() < n);
                        return;
                    }
                }
            }
            ChainOp::Trim { offset, len } => {
                let (offset, len) = (usize::from(offset), usize::from(len));
                match chain.trim(offset, len) {
                    Some(trimmed) => {
                        chain = trimmed;
                        model = model[offset..offset + len].to_vec();
                    }
                    None => {
                        assert!(model.len() < offset + len);
                        return;
                    }
                }
            }
            ChainOp::SplitTo { at } => {
                let at = usize::from(at).min(model.len());
                let head = chain.split_to(at);
                assert_eq!(head.to_vec(), model[..at]);
                model.drain(..at);
            }
            ChainOp::DiscardFront { count } => {
                let dropped = chain.discard_front(usize::from(count));
                assert_eq!(dropped, usize::from(count).min(model.len()));
                model.drain(..dropped);
            }
            ChainOp::Truncate { len } => {
                chain.truncate(usize::from(len));
                model.truncate(usize::from(len));
            }
            ChainOp::Pack => chain = chain.pack(&alloc).expect("堆分配"),
            ChainOp::Concat => {
                chain = BlockChain::from(chain.concat(&alloc).expect("堆分配"));
            }
        }
        chain.check("chain_ops");
        assert_eq!(chain.len(), model.len());
        assert_eq!(chain.to_vec(), model);
    }
});
