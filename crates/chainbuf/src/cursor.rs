//! 游标与借用迭代器。
//!
//! # 教案式说明
//! - **意图 (Why)**：结构编辑需要一个“锚点”指明插入位置，而锚点在编辑后可能失效；
//!   裸指针式的句柄会在失效后静默读写错误位置，这里改为可检查的句柄；
//! - **逻辑 (How)**：[`FragmentCursor`] 记录 `(缓冲编号, 槽位, 代际)`，[`ByteCursor`]
//!   额外记录分片内偏移；每次使用都由缓冲校验，失配时返回
//!   [`BufferError::StaleCursor`](crate::BufferError::StaleCursor) 或
//!   [`BufferError::ForeignCursor`](crate::BufferError::ForeignCursor)；
//! - **契约 (What)**：只追加的写入不会使任何游标失效；拆分、部分消费、部分截尾、
//!   释放与清空会使涉及分片的游标失效。
//!
//! 借用迭代器 [`Fragments`] 与 [`ByteIter`] 在缓冲被借用期间有效，无需校验。

use crate::backing::Backing;
use crate::buffer::ChainBuffer;
use crate::chain::NodeId;
use crate::fragment::Chunk;

/// 分片粒度的游标。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FragmentCursor {
    pub(crate) buffer: u64,
    pub(crate) node: NodeId,
}

/// 字节粒度的游标：分片游标 + 分片内偏移。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteCursor {
    fragment: FragmentCursor,
    offset: usize,
}

impl ByteCursor {
    pub(crate) fn new(fragment: FragmentCursor, offset: usize) -> Self {
        Self { fragment, offset }
    }

    /// 所在分片的游标。
    pub fn fragment(&self) -> FragmentCursor {
        self.fragment
    }

    /// 分片内偏移。
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn set(&mut self, fragment: FragmentCursor, offset: usize) {
        self.fragment = fragment;
        self.offset = offset;
    }
}

impl<B: Backing> ChainBuffer<B> {
    /// 自头向尾遍历分片内容。
    pub fn fragments(&self) -> Fragments<'_, B> {
        Fragments {
            buffer: self,
            cursor: self.chain.head(),
        }
    }

    /// 逐字节遍历逻辑内容；支持 `.rev()` 反向遍历。
    pub fn bytes(&self) -> ByteIter<'_, B> {
        let back = self
            .chain
            .tail()
            .map(|tail| (tail, self.chain.get(tail).len()));
        ByteIter {
            buffer: self,
            front: self.chain.head().map(|head| (head, 0)),
            back,
            remaining: self.data_size,
        }
    }
}

/// 分片内容迭代器，见 [`ChainBuffer::fragments`]。
pub struct Fragments<'a, B: Backing> {
    buffer: &'a ChainBuffer<B>,
    cursor: Option<u32>,
}

impl<'a, B: Backing> Iterator for Fragments<'a, B> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        let index = self.cursor?;
        self.cursor = self.buffer.chain.next(index);
        Some(self.buffer.chain.get(index).chunk())
    }
}

/// 双向字节迭代器，见 [`ChainBuffer::bytes`]。
///
/// 每次只读取一个字节，不长期持有块的读锁。
pub struct ByteIter<'a, B: Backing> {
    buffer: &'a ChainBuffer<B>,
    /// 下一个待产出字节的位置。
    front: Option<(u32, usize)>,
    /// 上一个已产出（反向）字节之后的位置。
    back: Option<(u32, usize)>,
    remaining: usize,
}

impl<B: Backing> Iterator for ByteIter<'_, B> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        let chain = &self.buffer.chain;
        let (mut index, mut offset) = self.front?;
        if offset == chain.get(index).len() {
            index = chain.next(index)?;
            offset = 0;
        }
        let byte = chain.get(index).byte(offset);
        self.front = Some((index, offset + 1));
        self.remaining -= 1;
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<B: Backing> DoubleEndedIterator for ByteIter<'_, B> {
    fn next_back(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        let chain = &self.buffer.chain;
        let (mut index, mut end) = self.back?;
        if end == 0 {
            index = chain.prev(index)?;
            end = chain.get(index).len();
        }
        let byte = chain.get(index).byte(end - 1);
        self.back = Some((index, end - 1));
        self.remaining -= 1;
        Some(byte)
    }
}

impl<B: Backing> ExactSizeIterator for ByteIter<'_, B> {}
