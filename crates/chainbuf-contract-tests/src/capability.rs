//! 能力标志主题：被拒绝的操作必须是确定性的空操作，部分完成不是错误。

use chainbuf::{Bytes, ChainBuffer, FragmentBuffer};

use crate::case::{TckCase, TckSuite};
use crate::factory::BufferFactory;
use crate::sharing::heap_source;

pub(crate) fn suite<F: BufferFactory>() -> TckSuite<F> {
    TckSuite {
        name: "capability",
        cases: vec![
            TckCase {
                name: "rejected_operations_change_nothing",
                test: rejected_operations_change_nothing::<F>,
            },
            TckCase {
                name: "partial_counts_are_not_errors",
                test: partial_counts_are_not_errors::<F>,
            },
            TckCase {
                name: "empty_inputs_are_noops",
                test: empty_inputs_are_noops::<F>,
            },
        ],
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    content: Vec<u8>,
    fragments: usize,
    rewindable: usize,
}

fn snapshot<B: chainbuf::Backing>(buffer: &ChainBuffer<B>) -> Snapshot {
    Snapshot {
        content: buffer.to_vec(),
        fragments: buffer.fragment_count(),
        rewindable: buffer.rewindable(),
    }
}

fn rejected_operations_change_nothing<F: BufferFactory>(factory: &F) {
    let strategy = factory.strategy().clone();
    let mut buffer = factory.make();
    buffer.write(b"0123456789abcdef").expect("写入");
    buffer.seek(2);
    let mut src = heap_source(&strategy);
    src.write(b"source").expect("写入源");
    let before = snapshot(&buffer);
    let cursor = buffer.begin().expect("首分片");

    if strategy.rejects_insert() {
        assert_eq!(buffer.insert(&cursor, 1, b"x").expect("插入"), 0);
        assert_eq!(buffer.insert_at(3, b"x").expect("插入"), 0);
        assert_eq!(buffer.insert_from(&cursor, 0, &src, 6).expect("插入"), 0);
        assert_eq!(buffer.insert_ref(&cursor, 0, Bytes::from_static(b"r")).expect("插入"), 0);
        assert_eq!(snapshot(&buffer), before);
    }
    if strategy.rejects_reference() {
        assert_eq!(buffer.write_ref(Bytes::from_static(b"ref")).expect("引用写入"), 0);
        assert_eq!(snapshot(&buffer), before);
    }
    if strategy.rejects_trim() {
        assert_eq!(buffer.trim(4), 0);
        assert_eq!(snapshot(&buffer), before);
    }
    if strategy.rejects_rewind() {
        assert_eq!(buffer.rewind(2), 0);
        assert_eq!(buffer.rewindable(), 0);
        assert_eq!(snapshot(&buffer), before);
    }
    if strategy.rejects_overwrite() {
        assert_eq!(buffer.overwrite(b"zz").expect("覆盖"), 0);
        assert_eq!(buffer.overwrite_from(&src, 6).expect("覆盖"), 0);
        assert_eq!(snapshot(&buffer), before);
    }
    assert_eq!(
        buffer.fragment_len(&cursor).expect("被拒绝的编辑不使游标失效"),
        buffer.fragment_len(&buffer.begin().expect("首分片")).expect("首分片长度")
    );
}

fn partial_counts_are_not_errors<F: BufferFactory>(factory: &F) {
    let strategy = factory.strategy().clone();
    let mut buffer = factory.make();
    buffer.write(b"abcdef").expect("写入");

    let mut small = [0u8; 4];
    assert_eq!(buffer.read(&mut small), 4);
    assert_eq!(&small, b"abcd");
    assert_eq!(buffer.seek(2), 2);

    let expected_rewind = if strategy.rejects_rewind() {
        0
    } else {
        strategy.rewind_window().min(2)
    };
    assert_eq!(buffer.rewind(10), expected_rewind, "回退量受限于已消费历史");
    let size = buffer.data_size();

    let mut src = heap_source(&strategy);
    src.write(b"xyz").expect("写入源");
    let overwritten = buffer.overwrite_from(&src, 100).expect("覆盖");
    if !strategy.rejects_overwrite() {
        assert_eq!(overwritten, 3, "覆盖量受限于源数据");
        assert_eq!(buffer.data_size(), size);
    }
    if !strategy.rejects_trim() {
        assert_eq!(buffer.trim(100), size);
    }
    let remaining = buffer.data_size();
    assert_eq!(buffer.seek(100), remaining);
    assert_eq!(buffer.data_size(), 0);
    assert_eq!(buffer.seek(1), 0);
}

fn empty_inputs_are_noops<F: BufferFactory>(factory: &F) {
    let mut buffer = factory.make();
    assert_eq!(buffer.write(&[]).expect("空写入"), 0);
    assert_eq!(buffer.write_ref(Bytes::new()).expect("空引用写入"), 0);
    assert_eq!(buffer.seek(5), 0);
    assert_eq!(buffer.trim(5), 0);
    assert_eq!(buffer.rewind(5), 0);
    assert_eq!(buffer.overwrite(b"abc").expect("空缓冲覆盖"), 0);
    assert_eq!(buffer.fragment_count(), 0);
    assert!(buffer.begin().is_none());
    assert!(buffer.byte_last().is_none());

    let empty_src = heap_source(factory.strategy());
    assert_eq!(buffer.write_from(&empty_src, 10).expect("空源转移"), 0);
    assert_eq!(buffer.data_size(), 0);
}
