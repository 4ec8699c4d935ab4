use criterion::{Criterion, black_box};
use spark_qio::{Block, BlockChain, Queue, QueueConfig, QueueMode};
use std::{env, time::Duration};

/// 队列热路径基准：阻塞写读往返、合并生产、整链传递三种典型负载。
///
/// # 设计背景（Why）
/// - 网络栈的接收路径走 `produce`/`pass`，用户态读写走 `write`/`read`；
///   任一路径的元数据锁临界区膨胀都会直接体现为吞吐回退。
///
/// # 逻辑解析（How）
/// - `write_read_1k`：流模式下写入 1 KiB 并读出，覆盖块分配、入队与拷出；
/// - `produce_coalesced`：合并模式下逐字节生产 64 次后一次读出，衡量尾块追加的收益；
/// - `pass_get_chain`：传递 4 块链表并逐块取出，只涉及所有权移动。
///
/// 队列上限设置得足够大，任何一次迭代都不会进入流控而睡眠。
fn bench_queue_paths(c: &mut Criterion) {
    let payload = [0x5Au8; 1024];

    let stream = Queue::open(QueueConfig::new(1 << 20));
    c.bench_function("write_read_1k", |b| {
        let mut sink = [0u8; 1024];
        b.iter(|| {
            stream.write(black_box(&payload)).expect("写入");
            black_box(stream.read(&mut sink).expect("读取"))
        });
    });

    let coalesced = Queue::open(QueueConfig::new(1 << 20).with_coalesce(true));
    c.bench_function("produce_coalesced", |b| {
        let mut sink = [0u8; 64];
        b.iter(|| {
            for byte in 0..64u8 {
                let _ = coalesced.produce(black_box(&[byte]));
            }
            black_box(coalesced.read(&mut sink).expect("读取"))
        });
    });

    let message = Queue::open(QueueConfig::new(1 << 20).with_mode(QueueMode::Message));
    c.bench_function("pass_get_chain", |b| {
        b.iter(|| {
            let chain: BlockChain = (0..4).map(|_| Block::from_slice(&payload[..256])).collect();
            let _ = message.pass(chain);
            while let Some(block) = message.get() {
                black_box(block);
            }
        });
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_queue_paths(&mut criterion);
    criterion.final_summary();
}
