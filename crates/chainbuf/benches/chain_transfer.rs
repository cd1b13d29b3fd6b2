use chainbuf::{BufferStrategy, FragmentBuffer, HeapBuffer};
use criterion::{Criterion, black_box};
use std::{env, time::Duration};

const PAYLOAD: usize = 64 * 1024;

/// 零拷贝转移与复制写入的成本对比。
///
/// # 设计背景（Why）
/// - 分片链的核心卖点是“转移只共享存储”，基准需要持续证明转移成本与负载长度基本无关；
/// - 复制写入作为对照组，便于发现页分配或尾页填充路径上的回归。
///
/// # 逻辑解析（How）
/// - `copy_write`：每轮写入 64 KiB 并整体消费；
/// - `zero_copy_transfer`：源缓冲预先写好 64 KiB，每轮转移到新缓冲后读取首尾字节；
/// - `mid_insert`：在 64 KiB 缓冲中部插入 16 字节，验证拆分为 O(1)。
fn bench_chain(c: &mut Criterion) {
    let payload = vec![0x5Au8; PAYLOAD];

    c.bench_function("copy_write", |b| {
        b.iter(|| {
            let mut buffer = HeapBuffer::new(BufferStrategy::heap());
            buffer.write(black_box(&payload)).unwrap();
            black_box(buffer.seek(PAYLOAD))
        });
    });

    let mut source = HeapBuffer::new(BufferStrategy::heap());
    source.write(&payload).unwrap();
    c.bench_function("zero_copy_transfer", |b| {
        b.iter(|| {
            let mut target = HeapBuffer::new(BufferStrategy::heap());
            target.write_from(black_box(&source), PAYLOAD).unwrap();
            let first = target.byte_begin().unwrap();
            let last = target.byte_last().unwrap();
            black_box((target.byte_at(&first).unwrap(), target.byte_at(&last).unwrap()))
        });
    });

    c.bench_function("mid_insert", |b| {
        b.iter(|| {
            let mut target = HeapBuffer::new(BufferStrategy::heap());
            target.write_from(&source, PAYLOAD).unwrap();
            target.insert_at(black_box(PAYLOAD / 2), b"0123456789abcdef").unwrap();
            black_box(target.data_size())
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

    bench_chain(&mut criterion);
    criterion.final_summary();
}
