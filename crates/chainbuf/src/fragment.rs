//! 分片：链上的最小单元。
//!
//! 分片由 `(存储, 偏移, 长度)` 组成。拆分、切片、转移都只克隆存储句柄并调整区间，
//! 不复制任何载荷字节；只有写时复制（[`Fragment::privatize`]）才真正拷贝。

use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use crate::block::{Block, PageAllocator};
use crate::error::Result;

/// 分片背后的存储句柄。
#[derive(Clone)]
pub(crate) enum Storage {
    /// 堆页或映射窗口，可原地修改。
    Block(Arc<Block>),
    /// 调用方以引用方式交付的字节，只读。
    External(Bytes),
}

/// 缓冲链中的一段连续字节。
///
/// # 契约说明（What）
/// - `[offset, offset + len)` 始终落在存储的已写入范围内；
/// - 克隆分片等价于共享存储（引用计数 +1），不会复制字节；
/// - 链上不会出现长度为 0 的分片。
#[derive(Clone)]
pub struct Fragment {
    storage: Storage,
    offset: usize,
    len: usize,
}

impl Fragment {
    pub(crate) fn from_block(block: Arc<Block>, offset: usize, len: usize) -> Self {
        Self {
            storage: Storage::Block(block),
            offset,
            len,
        }
    }

    pub(crate) fn external(bytes: Bytes) -> Self {
        let len = bytes.len();
        Self {
            storage: Storage::External(bytes),
            offset: 0,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 存储是否同时被其它分片（可能属于其它缓冲）引用。
    ///
    /// 引用式字节无法判断外部是否仍持有，一律视为共享。
    pub fn is_shared(&self) -> bool {
        match &self.storage {
            Storage::Block(block) => Arc::strong_count(block) > 1,
            Storage::External(_) => true,
        }
    }

    /// 是否为引用式写入的外部字节。
    pub fn is_external(&self) -> bool {
        matches!(self.storage, Storage::External(_))
    }

    /// 是否位于映射文件窗口上。
    pub fn is_mapped(&self) -> bool {
        self.block().is_some_and(|block| block.is_mapped())
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn end(&self) -> usize {
        self.offset + self.len
    }

    pub(crate) fn block(&self) -> Option<&Arc<Block>> {
        match &self.storage {
            Storage::Block(block) => Some(block),
            Storage::External(_) => None,
        }
    }

    /// 两个分片是否引用同一份存储。
    pub(crate) fn same_storage(&self, other: &Fragment) -> bool {
        match (&self.storage, &other.storage) {
            (Storage::Block(a), Storage::Block(b)) => Arc::ptr_eq(a, b),
            (Storage::External(a), Storage::External(b)) => {
                a.as_ptr() == b.as_ptr() && a.len() == b.len()
            }
            _ => false,
        }
    }

    /// `other` 是否紧跟在 `self` 之后且共享存储，可直接合并。
    pub(crate) fn is_followed_by(&self, other: &Fragment) -> bool {
        self.same_storage(other) && self.end() == other.offset
    }

    /// 截取 `[start, start + len)` 的共享视图。
    pub(crate) fn slice(&self, start: usize, len: usize) -> Fragment {
        debug_assert!(start + len <= self.len);
        Fragment {
            storage: self.storage.clone(),
            offset: self.offset + start,
            len,
        }
    }

    /// 在 `at` 处一分为二：`self` 保留前半段，返回后半段。O(1)，不复制字节。
    pub(crate) fn split_off(&mut self, at: usize) -> Fragment {
        debug_assert!(at <= self.len);
        let tail = self.slice(at, self.len - at);
        self.len = at;
        tail
    }

    /// 丢弃前 `n` 字节。
    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.offset += n;
        self.len -= n;
    }

    /// 仅保留前 `n` 字节。
    pub(crate) fn truncate(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.len = n;
    }

    /// 把 `other` 并入当前分片末尾；调用方保证 [`is_followed_by`](Self::is_followed_by)。
    pub(crate) fn absorb(&mut self, other: &Fragment) {
        debug_assert!(self.is_followed_by(other));
        self.len += other.len;
    }

    /// 向前扩展，吸收紧邻在前的 `other`。
    pub(crate) fn absorb_front(&mut self, other: &Fragment) {
        debug_assert!(other.is_followed_by(self));
        self.offset = other.offset;
        self.len += other.len;
    }

    pub(crate) fn grow(&mut self, n: usize) {
        self.len += n;
    }

    pub(crate) fn copy_to(&self, start: usize, dst: &mut [u8]) {
        debug_assert!(start + dst.len() <= self.len);
        match &self.storage {
            Storage::Block(block) => block.copy_out(self.offset + start, dst),
            Storage::External(bytes) => {
                let begin = self.offset + start;
                dst.copy_from_slice(&bytes[begin..begin + dst.len()]);
            }
        }
    }

    pub(crate) fn byte(&self, at: usize) -> u8 {
        match &self.storage {
            Storage::Block(block) => block.byte(self.offset + at),
            Storage::External(bytes) => bytes[self.offset + at],
        }
    }

    /// 分片内容的只读视图。
    ///
    /// 块存储在读锁内拷出快照后立即释放锁：块可能被其它缓冲共享，
    /// 调用方持有视图期间它们仍要能追加或原地覆盖同一块。
    pub(crate) fn chunk(&self) -> Chunk<'_> {
        match &self.storage {
            Storage::Block(block) => {
                let snapshot = block.read().filled_bytes()[self.offset..self.end()].to_vec();
                Chunk {
                    inner: ChunkInner::Snapshot(snapshot),
                }
            }
            Storage::External(bytes) => Chunk {
                inner: ChunkInner::Borrowed(&bytes[self.offset..self.end()]),
            },
        }
    }

    /// 原地修改前是否必须先私有复制。
    ///
    /// - 引用式字节只读，必须复制；
    /// - 块被共享，且本缓冲或任一共享方启用了写时复制时，必须复制；
    /// - 映射窗口只看共享标记：同一缓冲内多个分片引用同一映射段属于常态，
    ///   复制出去会让文件内容与逻辑流分叉。
    pub(crate) fn needs_private_copy(&self, clone_on_write: bool) -> bool {
        match &self.storage {
            Storage::External(_) => true,
            Storage::Block(block) => {
                Arc::strong_count(block) > 1
                    && (block.is_cow_pinned() || (clone_on_write && !block.is_mapped()))
            }
        }
    }

    /// 把本分片覆盖的字节复制到一个私有堆页，其余共享方不受影响。
    pub(crate) fn privatize(&mut self, pages: &PageAllocator) -> Result<()> {
        let mut copy = vec![0u8; self.len];
        self.copy_to(0, &mut copy);
        let block = pages.heap_copy(&copy)?;
        tracing::trace!(target: "chainbuf::fragment", len = self.len, "privatized shared fragment");
        self.storage = Storage::Block(block);
        self.offset = 0;
        Ok(())
    }

    /// 原地覆盖 `[start, start + data.len())`；调用方需先完成私有化判断。
    pub(crate) fn overwrite(&self, start: usize, data: &[u8]) {
        debug_assert!(start + data.len() <= self.len);
        match &self.storage {
            Storage::Block(block) => block.overwrite_at(self.offset + start, data),
            Storage::External(_) => unreachable!("external fragments are privatized before writes"),
        }
    }

    /// 在写时复制语义下共享时，给底层块打上标记。
    pub(crate) fn pin_cow(&self) {
        if let Storage::Block(block) = &self.storage {
            block.pin_cow();
        }
    }
}

impl std::fmt::Debug for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fragment")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("external", &self.is_external())
            .field("shared", &self.is_shared())
            .finish()
    }
}

/// 分片内容的只读视图。
///
/// - 引用式字节只读，视图直接借用；
/// - 堆页与映射窗口给出取出时刻的快照，视图不持有任何锁，之后对该块的写入不会反映到视图中。
pub struct Chunk<'a> {
    inner: ChunkInner<'a>,
}

enum ChunkInner<'a> {
    Snapshot(Vec<u8>),
    Borrowed(&'a [u8]),
}

impl Deref for Chunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.inner {
            ChunkInner::Snapshot(bytes) => bytes,
            ChunkInner::Borrowed(slice) => slice,
        }
    }
}

impl AsRef<[u8]> for Chunk<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for Chunk<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Chunk").field(&self.len()).finish()
    }
}
