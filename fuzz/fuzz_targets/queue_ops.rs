#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spark_qio::{Block, BlockChain, Queue, QueueConfig};

/// Fuzz 输入：队列上限与一串不会睡眠的队列操作。
///
/// - **Why**：中断安全入口与拷出入口交错时最容易破坏记账，例如部分读取后剩余块的分配长度被重复计入；
/// - **How**：只使用从不睡眠的入口，以字节向量为影子模型；
/// - **What**：有效字节与模型一致，`len <= alloc_len`，流控位与上限关系始终成立。
#[derive(Debug, Arbitrary)]
struct QueueCase {
    limit: u16,
    coalesce: bool,
    ops: Vec<QueueOp>,
}

#[derive(Debug, Arbitrary)]
enum QueueOp {
    Produce(Vec<u8>),
    Pass(Vec<u8>),
    IWrite(Vec<u8>),
    Consume(u8),
    Get,
    Discard(u16),
    Flush,
}

fuzz_target!(|case: QueueCase| {
    let limit = usize::from(case.limit).max(2);
    let q = Queue::open(QueueConfig::new(limit).with_coalesce(case.coalesce));
    let mut model: Vec<u8> = Vec::new();

    for op in case.ops {
        match op {
            QueueOp::Produce(data) => {
                if let Ok(n) = q.produce(&data) {
                    model.extend_from_slice(&data[..n]);
                }
            }
            QueueOp::Pass(data) => {
                if q.pass(BlockChain::from(Block::from_slice(&data))).is_ok() {
                    model.extend_from_slice(&data);
                }
            }
            QueueOp::IWrite(data) => {
                let n = q.iwrite(&data);
                model.extend_from_slice(&data[..n]);
            }
            QueueOp::Consume(room) => {
                let mut buf = vec![0u8; usize::from(room)];
                if let Ok(n) = q.consume(&mut buf) {
                    assert_eq!(buf[..n], model[..n]);
                    model.drain(..n);
                }
            }
            QueueOp::Get => {
                if let Some(block) = q.get() {
                    let n = block.len();
                    assert_eq!(block.data(), &model[..n]);
                    model.drain(..n);
                }
            }
            QueueOp::Discard(n) => {
                let dropped = q.discard(usize::from(n));
                model.drain(..dropped);
            }
            QueueOp::Flush => {
                q.flush();
                model.clear();
            }
        }
        assert_eq!(q.len(), model.len());
        assert!(q.len() <= q.alloc_len());
        if q.alloc_len() >= limit {
            assert!(q.is_full());
        }
        if q.alloc_len() < limit / 2 {
            assert!(!q.is_full());
        }
    }
});
