#![warn(missing_docs)]

//! `chainbuf-line` 在分片链缓冲之上提供按行分帧的非消费式扫描器。
//!
//! # 教案背景（Why）
//! - 行分隔协议（日志流、文本命令）是分片缓冲最常见的上层消费者；
//! - 扫描器只借助缓冲公开的游标原语遍历分片，不把分片拼成连续内存，
//!   因此跨越分片边界的行与 `\r\n` 都能被正确识别。
//!
//! # 使用概览（How）
//! - 以 `&mut` 借用一个实现了 [`FragmentBuffer`](chainbuf::FragmentBuffer) 的缓冲构造 [`LineReader`]；
//! - 反复调用 [`LineReader::has_line`]，命中后读取行内容并用 [`LineReader::seek_line`] 消费；
//! - 扫描位置在调用之间保留，新数据到达后只扫描增量部分。
//!
//! # 合约说明（What）
//! - 行终止符为 `\n` 或 `\r\n`，行内容不含终止符；
//! - 可选的行长预算在终止符迟迟不出现时返回 [`LineError::TooLong`]，避免无界扫描。
//!
//! ```rust
//! use chainbuf::{FragmentBuffer, HeapBuffer};
//! use chainbuf_line::LineReader;
//!
//! let mut buffer = HeapBuffer::default();
//! buffer.write(b"PING\r\npartial").expect("write");
//! let mut reader = LineReader::new(&mut buffer);
//! assert!(reader.has_line().expect("scan"));
//! assert_eq!(reader.line_string().as_deref(), Some("PING"));
//! assert!(reader.is_crlf());
//! assert_eq!(reader.seek_line(), 6);
//! assert!(!reader.has_line().expect("scan"));
//! ```

mod reader;

pub use crate::reader::{LineError, LineReader, codes};
