//! 共享主题：零拷贝转移、写时复制隔离与引用式写入。
//!
//! 源缓冲总是堆分页缓冲，沿用工厂策略的 `clone_on_write`/`fragment_as_target`，
//! 这样同一用例既能覆盖“共享存储”的堆后端，也能覆盖“退化为复制”的映射后端。

use chainbuf::{BufferStrategy, Bytes, FragmentBuffer, HeapBuffer};

use crate::case::{TckCase, TckSuite};
use crate::factory::BufferFactory;
use crate::support::{ALPHABET, pattern, write_in_pieces};

pub(crate) fn suite<F: BufferFactory>() -> TckSuite<F> {
    TckSuite {
        name: "sharing",
        cases: vec![
            TckCase {
                name: "transfer_shares_or_copies",
                test: transfer_shares_or_copies::<F>,
            },
            TckCase {
                name: "overwrite_after_transfer",
                test: overwrite_after_transfer::<F>,
            },
            TckCase {
                name: "source_is_not_consumed",
                test: source_is_not_consumed::<F>,
            },
            TckCase {
                name: "insert_from_splices_source",
                test: insert_from_splices_source::<F>,
            },
            TckCase {
                name: "write_ref_privatized_on_overwrite",
                test: write_ref_privatized_on_overwrite::<F>,
            },
        ],
    }
}

/// 与工厂策略同构的堆分页源缓冲。
pub(crate) fn heap_source(strategy: &BufferStrategy) -> HeapBuffer {
    HeapBuffer::new(
        BufferStrategy::builder()
            .page_size(strategy.page_size())
            .clone_on_write(strategy.clone_on_write())
            .fragment_as_target(strategy.fragment_as_target())
            .build()
            .expect("源策略合法"),
    )
}

fn transfer_shares_or_copies<F: BufferFactory>(factory: &F) {
    let mut src = heap_source(factory.strategy());
    let data = pattern(3000, 17);
    write_in_pieces(&mut src, &data, 250);

    let mut dst = factory.make();
    let before = dst.page_stats().allocated_pages;
    assert_eq!(dst.write_from(&src, 2000).expect("转移"), 2000);
    assert_eq!(dst.to_vec(), &data[..2000]);
    assert_eq!(src.data_size(), 3000);

    let after = dst.page_stats().allocated_pages;
    if F::ZERO_COPY_TRANSFER {
        assert_eq!(after, before, "零拷贝转移不分配新页");
    } else {
        assert!(after > before, "不能引用外部存储的后端必须复制");
    }

    assert_eq!(dst.write_from(&src, usize::MAX).expect("转移"), 3000);
    assert_eq!(dst.data_size(), 5000);
}

fn overwrite_after_transfer<F: BufferFactory>(factory: &F) {
    let mut src = heap_source(factory.strategy());
    src.write(b"hello world").expect("写入");
    let mut dst = factory.make();
    dst.write_from(&src, 11).expect("转移");

    let n = dst.overwrite(b"HELLO").expect("覆盖");
    if factory.strategy().rejects_overwrite() {
        assert_eq!(n, 0);
        return;
    }
    assert_eq!(dst.to_vec(), b"HELLO world");

    let aliased = F::ZERO_COPY_TRANSFER && !factory.strategy().clone_on_write();
    if aliased {
        assert_eq!(src.to_vec(), b"HELLO world", "未开启写时复制时共享分片互为别名");
    } else {
        assert_eq!(src.to_vec(), b"hello world", "写时复制隔离源缓冲");
        src.overwrite(b"J").expect("覆盖源");
        assert_eq!(dst.to_vec(), b"HELLO world", "源侧修改同样不可见");
    }
}

fn source_is_not_consumed<F: BufferFactory>(factory: &F) {
    let mut src = heap_source(factory.strategy());
    src.write(b"abcdefgh").expect("写入");
    let mut dst = factory.make();
    assert_eq!(dst.write_from(&src, 5).expect("转移"), 5);

    src.seek(5);
    src.write(b"ijkl").expect("写入");
    assert_eq!(src.to_vec(), b"fghijkl");
    assert_eq!(dst.to_vec(), b"abcde", "源缓冲后续的消费与追加不影响已转移内容");

    dst.write(b"XYZ").expect("追加");
    assert_eq!(dst.to_vec(), b"abcdeXYZ");
    assert_eq!(src.to_vec(), b"fghijkl", "目标追加不会写进源缓冲可见范围");
}

fn insert_from_splices_source<F: BufferFactory>(factory: &F) {
    let mut src = heap_source(factory.strategy());
    src.write(b"defghijklmnopqrstuvw").expect("写入");
    let mut dst = factory.make();
    dst.write(b"abcxyz").expect("写入");

    let cursor = dst.begin().expect("非空缓冲存在首分片");
    let n = dst.insert_from(&cursor, 3, &src, 20).expect("插入");
    if factory.strategy().rejects_insert() {
        assert_eq!(n, 0);
        assert_eq!(dst.to_vec(), b"abcxyz");
        return;
    }
    assert_eq!(n, 20);
    assert_eq!(dst.to_vec(), ALPHABET);
    assert_eq!(src.data_size(), 20);
}

fn write_ref_privatized_on_overwrite<F: BufferFactory>(factory: &F) {
    let payload = Bytes::from(b"static payload".to_vec());
    let mut dst = factory.make();
    let n = dst.write_ref(payload.clone()).expect("引用写入");
    if factory.strategy().rejects_reference() {
        assert_eq!(n, 0);
        assert_eq!(dst.data_size(), 0);
        return;
    }
    assert_eq!(n, payload.len());
    if dst.overwrite(b"STATIC").expect("覆盖") > 0 {
        assert_eq!(dst.to_vec(), b"STATIC payload");
    }
    assert_eq!(&payload[..], b"static payload", "外部内存从不被原地修改");
}
