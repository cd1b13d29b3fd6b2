//! 行读取器在映射文件缓冲与零拷贝转移上的集成验证。

use chainbuf::{BufferStrategy, CloseAction, FragmentBuffer, HeapBuffer, MmapBuffer, OpenAction};
use chainbuf_line::LineReader;

#[test]
fn reads_lines_from_mapped_buffer() {
    let dir = tempfile::tempdir().expect("临时目录");
    let mut buffer = MmapBuffer::open(
        dir.path().join("lines.log"),
        OpenAction::Create,
        CloseAction::Remove,
        BufferStrategy::mmap(),
    )
    .expect("打开映射文件");
    buffer.write(b"GET /index\r\nHost: example\r\n\r\n").expect("写入");

    let mut reader = LineReader::new(&mut buffer);
    let mut lines = Vec::new();
    while reader.has_line().expect("扫描") {
        lines.push(reader.line_string().expect("存在当前行"));
        reader.seek_line();
    }
    assert_eq!(lines, ["GET /index", "Host: example", ""]);
    assert_eq!(reader.buffer().data_size(), 0);
}

#[test]
fn reads_lines_spliced_from_other_buffers() {
    let mut first = HeapBuffer::default();
    first.write(b"hello ").expect("写入");
    let mut second = HeapBuffer::default();
    second.write(b"world\nbye\n").expect("写入");

    let mut joined = HeapBuffer::default();
    joined.write_from(&first, first.data_size()).expect("转移");
    joined.write_from(&second, second.data_size()).expect("转移");
    assert!(joined.fragment_count() >= 2);

    let mut reader = LineReader::new(&mut joined);
    assert!(reader.has_line().expect("扫描"));
    assert_eq!(reader.line_string().as_deref(), Some("hello world"));
    assert_eq!(reader.seek_line(), 12);
    assert!(reader.has_line().expect("扫描"));
    assert_eq!(reader.line_string().as_deref(), Some("bye"));
    assert_eq!(first.data_size(), 6, "转移不消费源缓冲");
}
