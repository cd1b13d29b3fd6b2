//! `chainbuf` 提供分段、引用计数的分片链字节缓冲引擎。
//!
//! # 模块定位（Why）
//! - 在协议栈与 I/O 流水线的各层之间搬运数据时避免复制负载：写入可以引用外部内存，
//!   缓冲之间的转移只共享存储、不复制字节；
//! - 中间插入、尾部截断、头部消费与回退都是链上的 O(1) 结构编辑；
//! - 同一操作面既可落在堆分页上，也可落在映射文件上。
//!
//! # 设计概要（How）
//! - `block`/`fragment`：存储块与 `(存储, 偏移, 长度)` 分片，写时复制在分片粒度上进行；
//! - `chain`：带代际标签的槽位链表，使游标成为可检查的句柄；
//! - `buffer`：[`FragmentBuffer`] 操作面与 [`ChainBuffer`] 引擎；
//! - `backing`/`mmap`：决定新字节落点的 [`Backing`] 后端（堆分页或映射文件）。
//!
//! # 契约说明（What）
//! - 缓冲本身单一所有者，操作经 `&mut self` 串行化；被共享的存储使用原子引用计数与
//!   自旋读写锁，跨线程共享分片是安全的；
//! - 能力不匹配（`rejects_*`）与容量不足以返回值表达，分配、I/O 与游标失效以
//!   [`BufferError`] 上报，引擎不会因调用方输入而 panic。
//!
//! ```rust
//! use chainbuf::{BufferStrategy, FragmentBuffer, HeapBuffer};
//!
//! let mut buffer = HeapBuffer::new(BufferStrategy::heap());
//! buffer.write(b"abcdejklmnopqrstuvwxyz").expect("write");
//! buffer.insert_at(5, b"fghi").expect("insert");
//! assert_eq!(buffer.to_vec(), b"abcdefghijklmnopqrstuvwxyz");
//! ```

mod backing;
mod block;
mod buffer;
mod chain;
mod cursor;
pub mod error;
mod fragment;
#[cfg(feature = "mmap")]
mod mmap;
mod strategy;

pub use backing::{Backing, HeapBacking, Region};
pub use block::{Block, PageAllocator, PageStats};
pub use buffer::{ChainBuffer, FragmentBuffer, HeapBuffer};
pub use cursor::{ByteCursor, ByteIter, FragmentCursor, Fragments};
pub use error::{BufferError, Result, codes};
pub use fragment::{Chunk, Fragment};
#[cfg(feature = "mmap")]
pub use mmap::{CloseAction, MappedBacking, MmapBuffer, OpenAction};
pub use strategy::{BufferStrategy, BufferStrategyBuilder};

pub use bytes::Bytes;
