//! `queue_contract` 集成测试：从公开 API 视角验证队列的模式、关闭与非阻塞语义。
//!
//! # 测试目标（Why）
//! - 消息模式截断后丢弃剩余字节，流模式保留剩余字节；两者的差异是上层协议选择队列的依据；
//! - `close` 丢弃数据、`hangup` 保留数据，EOF 次数有界，避免读者在已关闭队列上无限空转；
//! - 中断安全入口只以哨兵报告失败，旁路队列不缓冲任何数据。
//!
//! # 结构安排（How）
//! - 每个测试构造独立队列，只经由公开入口观察结果，不依赖内部字段。

#![cfg(not(any(loom, spark_loom)))]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use spark_block::{Block, BlockChain, SlabBlockAllocator};
use spark_qio::{
    DEFAULT_HUNGUP, EOF_READ_LIMIT, Queue, QueueConfig, QueueEmpty, QueueError, QueueFull,
    QueueMode, QueueState, codes,
};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn message_mode_discards_unread_tail() {
    let q = Queue::open(QueueConfig::new(4096).with_mode(QueueMode::Message));
    let data = payload(100);
    q.write(&data).expect("写入");
    q.write(b"next").expect("写入第二条消息");

    let mut buf = [0u8; 10];
    assert_eq!(q.read(&mut buf), Ok(10));
    assert_eq!(&buf[..], &data[..10]);

    let mut rest = [0u8; 128];
    assert_eq!(q.read(&mut rest), Ok(4), "剩余 90 字节不得再次出现");
    assert_eq!(&rest[..4], b"next");
    assert_eq!(q.stats().dropped_bytes, 90);
}

#[test]
fn stream_mode_keeps_unread_tail() {
    let q = Queue::open(QueueConfig::new(4096));
    let data = payload(100);
    q.write(&data).expect("写入");

    let mut buf = [0u8; 10];
    assert_eq!(q.read(&mut buf), Ok(10));
    assert_eq!(&buf[..], &data[..10]);

    let mut rest = [0u8; 128];
    assert_eq!(q.read(&mut rest), Ok(90));
    assert_eq!(&rest[..90], &data[10..]);
}

#[test]
fn message_mode_block_read_truncates() {
    let q = Queue::open(QueueConfig::new(4096).with_mode(QueueMode::Message));
    q.write(&payload(100)).expect("写入");
    let block = q.read_block(10).expect("读取").expect("非 EOF");
    assert_eq!(block.len(), 10);
    assert!(q.is_empty());
}

#[test]
fn coalescing_read_gathers_whole_blocks() {
    let q = Queue::open(QueueConfig::new(4096).with_coalesce(true));
    q.write(b"ab").expect("写入");
    q.write(b"").expect("零长度写入");
    q.write(b"cd").expect("写入");
    q.write(b"efgh").expect("写入");

    let mut buf = [0u8; 5];
    assert_eq!(q.read(&mut buf), Ok(4), "只取能完整放入的块");
    assert_eq!(&buf[..4], b"abcd");
    assert_eq!(q.len(), 4);

    assert_eq!(q.read(&mut buf), Ok(4));
    assert_eq!(&buf[..4], b"efgh");
}

#[test]
fn close_discards_buffered_data() {
    let q = Queue::open(QueueConfig::new(4096));
    q.write(b"buffered").expect("写入");
    q.close();
    assert!(q.is_closed());
    assert_eq!(q.len(), 0);

    let mut buf = [0u8; 16];
    for _ in 0..EOF_READ_LIMIT {
        assert_eq!(q.read(&mut buf), Ok(0), "关闭后先观察到 EOF");
    }
    assert_eq!(q.read(&mut buf), Err(QueueError::HungUp));
    assert_eq!(q.write(b"late"), Err(QueueError::HungUp));
}

#[test]
fn hangup_keeps_data_readable_then_errors() {
    let q = Queue::open(QueueConfig::new(4096));
    q.write(b"last words").expect("写入");
    q.hangup(None);

    let mut buf = [0u8; 32];
    assert_eq!(q.read(&mut buf), Ok(10));
    assert_eq!(&buf[..10], b"last words");
    for _ in 0..EOF_READ_LIMIT {
        assert_eq!(q.read(&mut buf), Ok(0));
    }
    let err = q.read(&mut buf).expect_err("超过 EOF 次数后报错");
    assert_eq!(err.code(), codes::QUEUE_HUNGUP);
    assert_eq!(err.to_string(), DEFAULT_HUNGUP);
}

#[test]
fn hangup_with_reason_errors_once_drained() {
    let q = Queue::open(QueueConfig::new(4096));
    q.write(b"x").expect("写入");
    q.hangup(Some("connection reset"));

    assert_eq!(q.read_block(16).expect("先读出数据").expect("非 EOF").data(), b"x");
    assert_eq!(
        q.read_block(16).expect_err("自定义原因立即报错"),
        QueueError::HungUpWithReason("connection reset".to_owned())
    );
}

#[test]
fn reopen_restores_limit_and_mode() {
    let q = Queue::open(
        QueueConfig::new(256)
            .with_mode(QueueMode::Message)
            .with_coalesce(true),
    );
    q.set_limit(16);
    q.close();
    q.reopen();

    assert!(!q.is_closed());
    assert_eq!(q.limit(), 256);
    let state = q.state();
    assert!(state.contains(QueueState::MSG | QueueState::COALESCE | QueueState::STARVE));

    q.write(b"again").expect("重新打开后可写");
    let mut buf = [0u8; 8];
    assert_eq!(q.read(&mut buf), Ok(5));
}

#[test]
fn noblock_write_on_full_queue_reports_success_but_drops() {
    let q = Queue::open(QueueConfig::new(8).with_noblock(true));
    assert_eq!(q.write(&payload(8)), Ok(8));
    assert!(q.is_full());
    assert_eq!(q.write(b"lost"), Ok(4), "成功不代表数据被保留");
    assert_eq!(q.len(), 8);
    assert_eq!(q.stats().dropped_bytes, 4);
}

#[test]
fn consume_and_get_report_empty_and_starve() {
    let q = Queue::open(QueueConfig::new(64));
    q.write(b"seed").expect("写入");
    assert!(q.get().is_some());

    let mut buf = [0u8; 4];
    assert_eq!(q.consume(&mut buf), Err(QueueEmpty));
    assert!(q.state().contains(QueueState::STARVE));
    assert!(q.get().is_none());
}

#[test]
fn consume_splits_in_stream_mode() {
    let q = Queue::open(QueueConfig::new(64));
    assert_eq!(q.produce(b"abcdef"), Ok(6));
    let mut buf = [0u8; 4];
    assert_eq!(q.consume(&mut buf), Ok(4));
    assert_eq!(&buf, b"abcd");
    assert_eq!(q.consume(&mut buf), Ok(2));
    assert_eq!(&buf[..2], b"ef");
}

#[test]
fn pass_respects_limit_but_pass_unlimited_does_not() {
    let q = Queue::open(QueueConfig::new(8));
    let chain = |len: usize| BlockChain::from(Block::from_slice(&payload(len)));

    assert_eq!(q.pass(chain(8)), Ok(8));
    assert_eq!(q.pass(chain(4)), Err(QueueFull));
    assert_eq!(q.pass_unlimited(chain(4)), 4);
    assert_eq!(q.alloc_len(), 12);
    assert_eq!(q.window(), 0);
}

#[test]
fn peek_copy_is_non_consuming() {
    let q = Queue::open(QueueConfig::new(4096));
    q.write(b"hello ").expect("写入");
    q.write(b"world").expect("写入");

    let first = q.peek_copy(5, 3).expect("复制");
    let second = q.peek_copy(5, 3).expect("复制");
    assert_eq!(first.data(), b"lo wo");
    assert_eq!(first.data(), second.data());
    assert_eq!(q.len(), 11);

    let short = q.peek_copy(64, 8).expect("数据不足时返回较短结果");
    assert_eq!(short.data(), b"rld");
}

#[test]
fn flush_drops_data_and_clears_flow() {
    let q = Queue::open(QueueConfig::new(4));
    assert_eq!(q.produce(b"full"), Ok(4));
    assert!(q.is_full());
    q.flush();
    assert!(!q.is_full());
    assert!(q.is_empty());
    assert!(!q.is_closed());
}

#[test]
fn iwrite_stops_at_print_ceiling() {
    let q = Queue::open(QueueConfig::new(1 << 20).with_print_ceiling(32));
    assert_eq!(q.iwrite(&payload(40)), 40, "上限在入队前检查");
    assert_eq!(q.iwrite(b"dropped"), 0);
    assert_eq!(q.len(), 40);
}

#[test]
fn exhausted_allocator_aborts_blocking_write() {
    let pool = SlabBlockAllocator::with_budget(16);
    let q = Queue::builder(QueueConfig::new(4096))
        .allocator(Arc::new(pool))
        .open();
    assert_eq!(q.write(&payload(16)), Ok(16));
    let err = q.write(b"more").expect_err("预算耗尽");
    assert_eq!(err, QueueError::OutOfMemory { requested: 4 });
    assert_eq!(err.code(), codes::QUEUE_OUT_OF_MEMORY);
    assert_eq!(q.produce(b"irq"), Ok(0), "中断纪律静默截断");
}

#[test]
fn bypass_queue_forwards_every_producer() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let q = {
        let seen = Arc::clone(&seen);
        Queue::bypass(move |chain: BlockChain| seen.lock().extend(chain.to_vec()))
    };
    assert!(q.is_bypass());

    q.write(b"ab").expect("旁路写入");
    assert_eq!(q.iwrite(b"cd"), 2);
    assert_eq!(q.produce(b"ef"), Ok(2));
    assert_eq!(q.pass(BlockChain::from(Block::from_slice(b"gh"))), Ok(2));

    assert_eq!(seen.lock().as_slice(), b"abcdefgh");
    assert_eq!(q.len(), 0, "旁路队列不缓冲");
}

#[test]
fn kick_always_fires_on_every_enqueue() {
    let kicks = Arc::new(AtomicUsize::new(0));
    let q = {
        let kicks = Arc::clone(&kicks);
        Queue::builder(QueueConfig::new(4096).with_kick_always(true))
            .kick(move || {
                kicks.fetch_add(1, Ordering::SeqCst);
            })
            .open()
    };
    for _ in 0..3 {
        q.write(b"tick").expect("写入");
    }
    assert_eq!(kicks.load(Ordering::SeqCst), 3);
}
