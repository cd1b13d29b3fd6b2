//! 遍历主题：分片游标、双向字节遍历与游标失效检查。

use chainbuf::{BufferError, FragmentBuffer};

use crate::case::{TckCase, TckSuite};
use crate::factory::BufferFactory;
use crate::sharing::heap_source;
use crate::support::{pattern, write_in_pieces};

pub(crate) fn suite<F: BufferFactory>() -> TckSuite<F> {
    TckSuite {
        name: "traversal",
        cases: vec![
            TckCase {
                name: "bytes_forward_and_reverse",
                test: bytes_forward_and_reverse::<F>,
            },
            TckCase {
                name: "byte_cursor_crosses_fragments",
                test: byte_cursor_crosses_fragments::<F>,
            },
            TckCase {
                name: "fragment_walk_covers_content",
                test: fragment_walk_covers_content::<F>,
            },
            TckCase {
                name: "structural_edits_invalidate_cursors",
                test: structural_edits_invalidate_cursors::<F>,
            },
            TckCase {
                name: "append_keeps_cursors",
                test: append_keeps_cursors::<F>,
            },
            TckCase {
                name: "foreign_cursor_is_rejected",
                test: foreign_cursor_is_rejected::<F>,
            },
        ],
    }
}

/// 构造一个多分片缓冲：本地写入与转移交错。
fn multi_fragment<F: BufferFactory>(factory: &F, data: &[u8]) -> chainbuf::ChainBuffer<F::Backing> {
    let mut buffer = factory.make();
    let mut src = heap_source(factory.strategy());
    for (i, chunk) in data.chunks(13).enumerate() {
        if i % 2 == 0 {
            buffer.write(chunk).expect("写入");
        } else {
            src.write(chunk).expect("写入源");
            buffer.write_from(&src, chunk.len()).expect("转移");
            src.seek(chunk.len());
        }
    }
    buffer
}

fn bytes_forward_and_reverse<F: BufferFactory>(factory: &F) {
    let data = pattern(200, 9);
    let buffer = multi_fragment(factory, &data);
    assert_eq!(buffer.bytes().len(), data.len());
    assert_eq!(buffer.bytes().collect::<Vec<_>>(), data);

    let mut reversed = data.clone();
    reversed.reverse();
    assert_eq!(buffer.bytes().rev().collect::<Vec<_>>(), reversed);

    let empty = factory.make();
    assert_eq!(empty.bytes().next(), None);
    assert_eq!(empty.bytes().next_back(), None);
}

fn byte_cursor_crosses_fragments<F: BufferFactory>(factory: &F) {
    let data = pattern(100, 4);
    let buffer = multi_fragment(factory, &data);

    let mut cursor = buffer.byte_begin().expect("非空缓冲");
    let mut forward = vec![buffer.byte_at(&cursor).expect("读取字节")];
    while buffer.step_forward(&mut cursor).expect("前进") {
        forward.push(buffer.byte_at(&cursor).expect("读取字节"));
    }
    assert_eq!(forward, data);
    assert_eq!(buffer.byte_at(&cursor).expect("停在末字节"), data[99]);

    let mut cursor = buffer.byte_last().expect("非空缓冲");
    let mut backward = vec![buffer.byte_at(&cursor).expect("读取字节")];
    while buffer.step_backward(&mut cursor).expect("后退") {
        backward.push(buffer.byte_at(&cursor).expect("读取字节"));
    }
    backward.reverse();
    assert_eq!(backward, data);

    let middle = buffer.byte_cursor(57).expect("定位");
    assert_eq!(buffer.byte_at(&middle).expect("读取字节"), data[57]);
    assert!(matches!(
        buffer.byte_cursor(100),
        Err(BufferError::OffsetOutOfRange { offset: 100, limit: 100 })
    ));
}

fn fragment_walk_covers_content<F: BufferFactory>(factory: &F) {
    let data = pattern(150, 21);
    let buffer = multi_fragment(factory, &data);

    let mut collected = Vec::new();
    let mut count = 0;
    let mut cursor = buffer.begin();
    while let Some(current) = cursor {
        let len = buffer.fragment_len(&current).expect("分片长度");
        assert!(len > 0, "链上不存在零长分片");
        collected.extend_from_slice(&buffer.fragment_chunk(&current).expect("分片内容"));
        count += 1;
        cursor = buffer.next_fragment(&current).expect("后继");
    }
    assert_eq!(collected, data);
    assert_eq!(count, buffer.fragment_count());

    let mut reversed = Vec::new();
    let mut cursor = buffer.end();
    while let Some(current) = cursor {
        reversed.push(buffer.fragment_chunk(&current).expect("分片内容").to_vec());
        cursor = buffer.prev_fragment(&current).expect("前驱");
    }
    reversed.reverse();
    assert_eq!(reversed.concat(), data);

    let joined: Vec<u8> = buffer.fragments().flat_map(|chunk| chunk.to_vec()).collect();
    assert_eq!(joined, data);
}

fn structural_edits_invalidate_cursors<F: BufferFactory>(factory: &F) {
    let mut buffer = factory.make();
    buffer.write(b"0123456789").expect("写入");
    let head = buffer.begin().expect("首分片");
    assert_eq!(buffer.seek(3), 3);
    assert!(matches!(
        buffer.fragment_len(&head),
        Err(BufferError::StaleCursor)
    ));

    let head = buffer.begin().expect("首分片");
    if buffer.insert(&head, 2, b"--").expect("插入") > 0 {
        assert!(matches!(
            buffer.fragment_chunk(&head),
            Err(BufferError::StaleCursor)
        ));
        assert!(buffer.insert(&head, 0, b"x").is_err(), "失效游标不能作为插入锚点");
        assert_eq!(buffer.to_vec(), b"34--56789");
    }

    let any = buffer.begin().expect("首分片");
    buffer.clear();
    assert!(matches!(
        buffer.next_fragment(&any),
        Err(BufferError::StaleCursor)
    ));
}

fn append_keeps_cursors<F: BufferFactory>(factory: &F) {
    let mut buffer = factory.make();
    buffer.write(b"abc").expect("写入");
    let tail = buffer.end().expect("尾分片");
    let byte = buffer.byte_cursor(1).expect("字节游标");
    buffer.write(b"def").expect("追加");
    write_in_pieces(&mut buffer, &pattern(40, 1), 9);

    assert!(buffer.fragment_len(&tail).expect("追加不使游标失效") >= 3);
    assert_eq!(buffer.byte_at(&byte).expect("追加不使字节游标失效"), b'b');
}

fn foreign_cursor_is_rejected<F: BufferFactory>(factory: &F) {
    let mut left = factory.make();
    left.write(b"left").expect("写入");
    let mut right = factory.make();
    right.write(b"right").expect("写入");

    let cursor = left.begin().expect("首分片");
    assert!(matches!(
        right.fragment_len(&cursor),
        Err(BufferError::ForeignCursor { .. })
    ));
    let n = right.insert(&cursor, 0, b"x");
    if right.strategy().rejects_insert() {
        assert_eq!(n.expect("被拒绝的插入不检查游标"), 0);
    } else {
        assert!(matches!(n, Err(BufferError::ForeignCursor { .. })));
    }
    assert_eq!(right.to_vec(), b"right");
}
