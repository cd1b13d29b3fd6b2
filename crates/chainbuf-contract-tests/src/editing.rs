//! 编辑主题：写读往返、插入、截尾、覆盖、回退与清空。
//!
//! 每个用例先读取工厂策略的能力标志；被拒绝的操作只断言“返回 0 且内容不变”。

use chainbuf::FragmentBuffer;

use crate::case::{TckCase, TckSuite};
use crate::factory::BufferFactory;
use crate::support::{ALPHABET, pattern, write_in_pieces};

pub(crate) fn suite<F: BufferFactory>() -> TckSuite<F> {
    TckSuite {
        name: "editing",
        cases: vec![
            TckCase {
                name: "write_read_roundtrip",
                test: write_read_roundtrip::<F>,
            },
            TckCase {
                name: "insert_restores_alphabet",
                test: insert_restores_alphabet::<F>,
            },
            TckCase {
                name: "trim_drops_tail",
                test: trim_drops_tail::<F>,
            },
            TckCase {
                name: "seek_rewind_overwrite",
                test: seek_rewind_overwrite::<F>,
            },
            TckCase {
                name: "overwrite_keeps_size",
                test: overwrite_keeps_size::<F>,
            },
            TckCase {
                name: "insert_spanning_pages",
                test: insert_spanning_pages::<F>,
            },
            TckCase {
                name: "trim_across_fragments",
                test: trim_across_fragments::<F>,
            },
            TckCase {
                name: "rewind_bounded_by_window",
                test: rewind_bounded_by_window::<F>,
            },
            TckCase {
                name: "clear_releases_pages",
                test: clear_releases_pages::<F>,
            },
        ],
    }
}

fn write_read_roundtrip<F: BufferFactory>(factory: &F) {
    let mut buffer = factory.make();
    let data = pattern(1000, 3);
    write_in_pieces(&mut buffer, &data, 37);
    assert_eq!(buffer.data_size(), data.len());
    assert_eq!(buffer.to_vec(), data);

    let mut window = [0u8; 10];
    assert_eq!(buffer.read_at(500, &mut window), 10);
    assert_eq!(&window, &data[500..510]);
    assert_eq!(buffer.read_at(995, &mut window), 5, "越过末尾只返回可读部分");
    assert_eq!(buffer.read_at(1000, &mut window), 0);

    let mut all = vec![0u8; 2000];
    assert_eq!(buffer.read(&mut all), 1000);
    assert_eq!(buffer.data_size(), 1000, "read 不消费");
}

fn insert_restores_alphabet<F: BufferFactory>(factory: &F) {
    let mut buffer = factory.make();
    buffer.write(b"abcdejklmnopqrstuvwxyz").expect("写入");
    let n = buffer.insert_at(5, b"fghi").expect("插入");
    if factory.strategy().rejects_insert() {
        assert_eq!(n, 0);
        assert_eq!(buffer.to_vec(), b"abcdejklmnopqrstuvwxyz");
        return;
    }
    assert_eq!(n, 4);
    assert_eq!(buffer.to_vec(), ALPHABET);
    assert_eq!(buffer.data_size(), 26);
}

fn trim_drops_tail<F: BufferFactory>(factory: &F) {
    let mut buffer = factory.make();
    buffer.write(ALPHABET).expect("写入");
    let n = buffer.trim(10);
    if factory.strategy().rejects_trim() {
        assert_eq!(n, 0);
        assert_eq!(buffer.to_vec(), ALPHABET);
        return;
    }
    assert_eq!(n, 10);
    assert_eq!(buffer.to_vec(), b"abcdefghijklmnop");
}

fn seek_rewind_overwrite<F: BufferFactory>(factory: &F) {
    let strategy = factory.strategy();
    let mut buffer = factory.make();
    buffer.write(b"----efghijklmnopqrstuvwxyz").expect("写入");
    assert_eq!(buffer.seek(4), 4);
    assert_eq!(buffer.data_size(), 22);

    let can_rewind = !strategy.rejects_rewind() && strategy.rewind_window() >= 4;
    let rewound = buffer.rewind(4);
    assert_eq!(rewound, if can_rewind { 4 } else { 0 });

    let n = buffer.overwrite(b"abcd").expect("覆盖");
    if strategy.rejects_overwrite() {
        assert_eq!(n, 0);
        return;
    }
    assert_eq!(n, 4);
    if can_rewind {
        assert_eq!(buffer.to_vec(), ALPHABET);
    } else {
        assert_eq!(buffer.to_vec(), b"abcdijklmnopqrstuvwxyz");
    }
}

fn overwrite_keeps_size<F: BufferFactory>(factory: &F) {
    let mut buffer = factory.make();
    write_in_pieces(&mut buffer, &pattern(100, 1), 7);
    let replacement = pattern(150, 99);
    let n = buffer.overwrite(&replacement).expect("覆盖");
    assert_eq!(buffer.data_size(), 100);
    if factory.strategy().rejects_overwrite() {
        assert_eq!(n, 0);
        assert_eq!(buffer.to_vec(), pattern(100, 1));
    } else {
        assert_eq!(n, 100);
        assert_eq!(buffer.to_vec(), &replacement[..100]);
    }
}

fn insert_spanning_pages<F: BufferFactory>(factory: &F) {
    let page = factory.strategy().page_size();
    let mut buffer = factory.make();
    let base = pattern(3 * page + 5, 7);
    write_in_pieces(&mut buffer, &base, page / 2 + 1);
    let extra = pattern(2 * page + 3, 42);
    let at = base.len() / 2;

    let n = buffer.insert_at(at, &extra).expect("插入");
    if factory.strategy().rejects_insert() {
        assert_eq!(n, 0);
        assert_eq!(buffer.to_vec(), base);
        return;
    }
    let mut expected = base[..at].to_vec();
    expected.extend_from_slice(&extra);
    expected.extend_from_slice(&base[at..]);
    assert_eq!(n, extra.len());
    assert_eq!(buffer.to_vec(), expected);

    let appended = buffer.insert_at(buffer.data_size(), b"!").expect("末尾插入");
    assert_eq!(appended, 1);
    assert_eq!(buffer.bytes().next_back(), Some(b'!'));
}

fn trim_across_fragments<F: BufferFactory>(factory: &F) {
    let mut buffer = factory.make();
    let data = pattern(30, 5);
    write_in_pieces(&mut buffer, &data, 5);
    if factory.strategy().rejects_trim() {
        assert_eq!(buffer.trim(12), 0);
        assert_eq!(buffer.to_vec(), data);
        return;
    }
    assert_eq!(buffer.trim(12), 12);
    assert_eq!(buffer.to_vec(), &data[..18]);
    buffer.write(b"tail").expect("截尾后继续写入");
    assert_eq!(&buffer.to_vec()[18..], b"tail");
    assert_eq!(buffer.trim(100), 22, "请求超过数据量时只截掉现有字节");
    assert_eq!(buffer.data_size(), 0);
    assert_eq!(buffer.fragment_count(), 0);
}

fn rewind_bounded_by_window<F: BufferFactory>(factory: &F) {
    let strategy = factory.strategy();
    let window = if strategy.rejects_rewind() {
        0
    } else {
        strategy.rewind_window()
    };
    let mut buffer = factory.make();
    let data = pattern(window + 300, 11);
    write_in_pieces(&mut buffer, &data, 64);
    assert_eq!(buffer.seek(data.len()), data.len());
    assert_eq!(buffer.rewindable(), window.min(data.len()));

    let restored = buffer.rewind(usize::MAX);
    assert_eq!(restored, window.min(data.len()));
    assert_eq!(buffer.to_vec(), &data[data.len() - restored..]);
    assert_eq!(buffer.rewindable(), 0);
}

fn clear_releases_pages<F: BufferFactory>(factory: &F) {
    let mut buffer = factory.make();
    write_in_pieces(&mut buffer, &pattern(4 * factory.strategy().page_size(), 2), 100);
    buffer.seek(10);
    assert!(buffer.page_stats().live_pages > 0);

    buffer.clear();
    assert_eq!(buffer.data_size(), 0);
    assert_eq!(buffer.fragment_count(), 0);
    assert_eq!(buffer.rewindable(), 0);
    assert_eq!(buffer.page_stats().live_pages, 0, "清空后不再持有任何页");

    buffer.write(b"again").expect("清空后继续写入");
    assert_eq!(buffer.to_vec(), b"again");
}
