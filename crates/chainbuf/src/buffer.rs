//! 分片链缓冲：操作面与引擎实现。
//!
//! # 模块定位（Why）
//! - [`FragmentBuffer`] 是唯一的操作面，堆分页缓冲与映射文件缓冲都通过
//!   [`ChainBuffer<B>`] 实现它，差异由 [`Backing`] 与 [`BufferStrategy`] 表达；
//! - 结构性编辑（拆分、拼接、释放）全部是链上的 O(1) 操作，负载字节只在
//!   `write`、写时复制与退化为复制的转移中被搬运。
//!
//! # 核心约束（What）
//! - `data_size` 恒等于链上分片长度之和，链上不存在零长分片；
//! - 已消费字节只保留在有界的回退历史中（`rewind_window`）；
//! - 能力不匹配与容量不足都以 `Ok(n)`/`n` 表达，只有分配、I/O 与游标失效才是错误。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::backing::{Backing, HeapBacking};
use crate::block::{PageAllocator, PageStats};
use crate::chain::Chain;
use crate::cursor::{ByteCursor, FragmentCursor};
use crate::error::{BufferError, Result};
use crate::fragment::{Chunk, Fragment};
use crate::strategy::BufferStrategy;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// 分片缓冲的统一操作面。
///
/// # 教案式说明
/// - **意图 (Why)**：调用方（行读取器、转移、测试驱动）只面向该 trait 编程，
///   不关心字节究竟落在堆页还是映射文件里；
/// - **逻辑 (How)**：所有实现者都是 [`ChainBuffer<B>`]，静态分派；`write_from` 等
///   方法对源缓冲泛型化，因此 trait 不追求对象安全；
/// - **契约 (What)**：
///   - 返回 `usize` 的方法给出实际处理字节数，可能小于请求值（包括 0），这本身不是错误；
///   - 被策略拒绝的编辑返回 `Ok(0)`/`0` 且不改变任何状态；
///   - 分配失败返回 [`BufferError::Allocation`]，其中 `written` 为失败前已生效的字节数。
pub trait FragmentBuffer {
    /// 构造时绑定的不可变策略。
    fn strategy(&self) -> &BufferStrategy;

    /// 当前逻辑数据长度，O(1)。
    fn data_size(&self) -> usize;

    /// 链上分片数量。
    fn fragment_count(&self) -> usize;

    /// 释放全部分片与回退历史；所有游标随之失效。
    fn clear(&mut self);

    /// 复制追加 `data`。
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// 以引用方式追加 `data`，不复制字节；策略拒绝引用式写入时返回 `Ok(0)`。
    fn write_ref(&mut self, data: Bytes) -> Result<usize>;

    /// 从 `src` 头部转移至多 `len` 字节到尾部；`src` 不被消费。
    ///
    /// 能直接引用外部存储的后端共享 `src` 的分片（零拷贝），否则复制。
    fn write_from<S>(&mut self, src: &S, len: usize) -> Result<usize>
    where
        S: FragmentBuffer + ?Sized;

    /// 从逻辑起点复制至多 `dst.len()` 字节，不消费。
    fn read(&self, dst: &mut [u8]) -> usize {
        self.read_at(0, dst)
    }

    /// 从逻辑偏移 `offset` 处复制，不消费；越界时返回 0。
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> usize;

    /// 消费至多 `len` 字节。
    fn seek(&mut self, len: usize) -> usize;

    /// 从回退历史中恢复至多 `len` 字节。
    fn rewind(&mut self, len: usize) -> usize;

    /// 从尾部丢弃至多 `len` 字节。
    fn trim(&mut self, len: usize) -> usize;

    /// 在 `cursor` 指向分片的 `offset` 处插入 `data` 的副本。
    fn insert(&mut self, cursor: &FragmentCursor, offset: usize, data: &[u8]) -> Result<usize>;

    /// 与 [`insert`](Self::insert) 相同，但以引用方式插入。
    fn insert_ref(&mut self, cursor: &FragmentCursor, offset: usize, data: Bytes) -> Result<usize>;

    /// 与 [`insert`](Self::insert) 相同，插入内容取自 `src` 头部的至多 `len` 字节。
    fn insert_from<S>(
        &mut self,
        cursor: &FragmentCursor,
        offset: usize,
        src: &S,
        len: usize,
    ) -> Result<usize>
    where
        S: FragmentBuffer + ?Sized;

    /// 在逻辑偏移 `offset` 处插入；`offset == data_size` 时等价于追加。
    fn insert_at(&mut self, offset: usize, data: &[u8]) -> Result<usize>;

    /// 从逻辑起点原地覆盖，不改变 `data_size`。
    fn overwrite(&mut self, data: &[u8]) -> Result<usize>;

    /// 以 `src` 头部字节的副本覆盖（从不共享 `src` 的存储）。
    fn overwrite_from<S>(&mut self, src: &S, len: usize) -> Result<usize>
    where
        S: FragmentBuffer + ?Sized,
    {
        let mut staged = vec![0u8; len.min(src.data_size())];
        let n = src.read(&mut staged);
        self.overwrite(&staged[..n])
    }

    /// 返回覆盖头部至多 `len` 字节的共享分片，不改变自身状态。
    fn share_front(&self, len: usize) -> Vec<Fragment>;

    /// 拷贝出全部逻辑字节。
    fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.data_size()];
        let n = self.read(&mut out);
        out.truncate(n);
        out
    }

    /// 首个分片的游标。
    fn begin(&self) -> Option<FragmentCursor>;

    /// 最后一个分片的游标。
    fn end(&self) -> Option<FragmentCursor>;

    /// 后继分片；已到链尾时返回 `Ok(None)`。
    fn next_fragment(&self, cursor: &FragmentCursor) -> Result<Option<FragmentCursor>>;

    /// 前驱分片；已到链头时返回 `Ok(None)`。
    fn prev_fragment(&self, cursor: &FragmentCursor) -> Result<Option<FragmentCursor>>;

    fn fragment_len(&self, cursor: &FragmentCursor) -> Result<usize>;

    /// 游标所指分片的只读视图。
    fn fragment_chunk(&self, cursor: &FragmentCursor) -> Result<Chunk<'_>>;

    /// 逻辑偏移 `offset` 处的字节游标。
    fn byte_cursor(&self, offset: usize) -> Result<ByteCursor>;

    fn byte_begin(&self) -> Option<ByteCursor>;

    fn byte_last(&self) -> Option<ByteCursor>;

    /// 读取字节游标处的字节。
    fn byte_at(&self, cursor: &ByteCursor) -> Result<u8>;

    /// 前进一个字节，必要时跨越分片边界；已在最后一个字节时返回 `Ok(false)` 且游标不变。
    fn step_forward(&self, cursor: &mut ByteCursor) -> Result<bool>;

    /// 后退一个字节，必要时跨越分片边界；已在第一个字节时返回 `Ok(false)` 且游标不变。
    fn step_backward(&self, cursor: &mut ByteCursor) -> Result<bool>;
}

/// 分片链缓冲引擎。
///
/// `B` 决定新字节的落点，见 [`HeapBacking`] 与 `MappedBacking`。
pub struct ChainBuffer<B: Backing> {
    pub(crate) id: u64,
    pub(crate) strategy: BufferStrategy,
    pub(crate) chain: Chain,
    history: VecDeque<Fragment>,
    history_size: usize,
    pub(crate) data_size: usize,
    pub(crate) pages: PageAllocator,
    // 最后析构：映射后端在析构时截断或删除文件。
    pub(crate) backing: B,
}

/// 堆分页缓冲。
pub type HeapBuffer = ChainBuffer<HeapBacking>;

impl ChainBuffer<HeapBacking> {
    /// 以给定策略创建堆分页缓冲。
    pub fn new(strategy: BufferStrategy) -> Self {
        Self::with_backing(strategy, HeapBacking)
    }
}

impl Default for ChainBuffer<HeapBacking> {
    fn default() -> Self {
        Self::new(BufferStrategy::heap())
    }
}

impl<B: Backing> ChainBuffer<B> {
    pub(crate) fn with_backing(strategy: BufferStrategy, backing: B) -> Self {
        let pages = PageAllocator::new(strategy.page_limit());
        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            strategy,
            chain: Chain::default(),
            history: VecDeque::new(),
            history_size: 0,
            data_size: 0,
            pages,
            backing,
        }
    }

    /// 本缓冲分配的页（或映射段）的统计快照。
    pub fn page_stats(&self) -> PageStats {
        self.pages.stats()
    }

    /// 当前可供 `rewind` 恢复的字节数。
    pub fn rewindable(&self) -> usize {
        self.history_size
    }

    fn rejected(&self, op: &'static str) {
        tracing::debug!(target: "chainbuf::buffer", buffer = self.id, op, "operation rejected by strategy");
    }

    /// 链入尾部；开启尾页填充时与相邻同存储分片合并，不改变尾节点代际。
    fn link_tail(&mut self, fragment: Fragment) {
        let len = fragment.len();
        if self.strategy.fragment_as_target() {
            if let Some(tail) = self.chain.tail() {
                if self.chain.get(tail).is_followed_by(&fragment) {
                    self.chain.get_mut(tail).absorb(&fragment);
                    self.data_size += len;
                    return;
                }
            }
        }
        self.chain.push_back(fragment);
        self.data_size += len;
    }

    /// 把数据先填进尾分片所在块的剩余容量。
    ///
    /// 只有尾分片恰好停在块高水位时才可追加；高水位之后的字节对任何分片都不可见，
    /// 因此即使块被共享也无需写时复制。
    fn fill_tail(&mut self, data: &[u8]) -> usize {
        let Some(tail) = self.chain.tail() else {
            return 0;
        };
        let n = {
            let fragment = self.chain.get(tail);
            match fragment.block() {
                Some(block) if self.backing.can_extend(block) => {
                    block.append_at(fragment.end(), data)
                }
                _ => 0,
            }
        };
        if n > 0 {
            self.chain.get_mut(tail).grow(n);
            self.data_size += n;
            self.backing.committed(n);
        }
        n
    }

    fn append_copy(&mut self, data: &[u8]) -> Result<usize> {
        let mut written = 0;
        if self.strategy.fragment_as_target() {
            written += self.fill_tail(data);
        }
        while written < data.len() {
            let region = self
                .backing
                .reserve(&self.pages, self.strategy.page_size())
                .map_err(|err| err.with_written(written))?;
            let n = region.block.append_at(region.offset, &data[written..]);
            if n == 0 {
                tracing::warn!(target: "chainbuf::buffer", buffer = self.id, "reserved region has no room");
                return Err(BufferError::allocation(data.len() - written).with_written(written));
            }
            self.link_tail(Fragment::from_block(region.block, region.offset, n));
            self.backing.committed(n);
            written += n;
        }
        Ok(written)
    }

    /// 按页切分，产出持有 `data` 副本的新分片（尚未链入）。
    fn fresh_fragments(&self, data: &[u8]) -> Result<Vec<Fragment>> {
        let page_size = self.strategy.page_size();
        data.chunks(page_size)
            .map(|chunk| {
                let block = self.pages.heap_block(page_size)?;
                block.append_at(0, chunk);
                Ok(Fragment::from_block(block, 0, chunk.len()))
            })
            .collect()
    }

    /// 把 `src` 的共享分片转换成可链入本缓冲的分片。
    ///
    /// 写时复制语义下，映射窗口不打共享标记而是复制到私有堆页：映射段一旦被标记，
    /// 映射方的覆盖就会私有化到堆上，文件随之与逻辑流分叉。
    fn adopt(&self, src_cow: bool, shared: Vec<Fragment>) -> Result<Vec<Fragment>> {
        if !self.backing.links_foreign() {
            let mut staged = Vec::with_capacity(shared.iter().map(Fragment::len).sum());
            for fragment in &shared {
                staged.extend_from_slice(&fragment.chunk());
            }
            return self.fresh_fragments(&staged);
        }
        let cow = src_cow || self.strategy.clone_on_write();
        let mut adopted = Vec::with_capacity(shared.len());
        for fragment in shared {
            if cow && fragment.is_mapped() {
                let staged = fragment.chunk().to_vec();
                adopted.extend(self.fresh_fragments(&staged)?);
            } else {
                if cow {
                    fragment.pin_cow();
                }
                adopted.push(fragment);
            }
        }
        Ok(adopted)
    }

    /// 在 `index` 节点的 `offset` 处拼入 `fragments`。
    fn splice(&mut self, index: u32, offset: usize, fragments: Vec<Fragment>) -> usize {
        let total: usize = fragments.iter().map(Fragment::len).sum();
        let len = self.chain.get(index).len();
        if offset == len {
            let mut at = index;
            for fragment in fragments {
                at = self.chain.insert_after(at, fragment);
            }
        } else {
            let before = if offset == 0 {
                index
            } else {
                let back = self.chain.get_mut(index).split_off(offset);
                self.chain.touch(index);
                tracing::trace!(target: "chainbuf::buffer", buffer = self.id, offset, "split fragment");
                self.chain.insert_after(index, back)
            };
            for fragment in fragments {
                self.chain.insert_before(before, fragment);
            }
        }
        self.data_size += total;
        total
    }

    pub(crate) fn resolve(&self, cursor: &FragmentCursor) -> Result<u32> {
        if cursor.buffer != self.id {
            return Err(BufferError::ForeignCursor {
                buffer: self.id,
                cursor_buffer: cursor.buffer,
            });
        }
        self.chain
            .resolve(cursor.node)
            .ok_or(BufferError::StaleCursor)
    }

    pub(crate) fn cursor_for(&self, index: u32) -> FragmentCursor {
        FragmentCursor {
            buffer: self.id,
            node: self.chain.id(index),
        }
    }

    /// 逻辑偏移 `offset` 所在的节点及其内部偏移；`offset` 必须小于 `data_size`。
    pub(crate) fn locate(&self, offset: usize) -> Option<(u32, usize)> {
        let mut remaining = offset;
        for index in self.chain.indices() {
            let len = self.chain.get(index).len();
            if remaining < len {
                return Some((index, remaining));
            }
            remaining -= len;
        }
        None
    }

    fn remember(&mut self, piece: Fragment) {
        if !self.strategy.keeps_history() {
            return;
        }
        self.history_size += piece.len();
        match self.history.back_mut() {
            Some(last) if last.is_followed_by(&piece) => last.absorb(&piece),
            _ => self.history.push_back(piece),
        }
        let mut excess = self.history_size.saturating_sub(self.strategy.rewind_window());
        while excess > 0 {
            let Some(oldest) = self.history.front_mut() else {
                break;
            };
            if oldest.len() <= excess {
                excess -= oldest.len();
                self.history_size -= oldest.len();
                self.history.pop_front();
            } else {
                oldest.advance(excess);
                self.history_size -= excess;
                excess = 0;
            }
        }
    }

    /// 回退恢复的分片链回头部；与头分片相邻时合并并使其旧游标失效。
    fn restore_front(&mut self, piece: Fragment) {
        let len = piece.len();
        match self.chain.head() {
            Some(head) if piece.is_followed_by(self.chain.get(head)) => {
                self.chain.get_mut(head).absorb_front(&piece);
                self.chain.touch(head);
            }
            _ => {
                self.chain.push_front(piece);
            }
        }
        self.data_size += len;
    }

    /// 截掉整个分片或其尾部后，若块只剩本分片引用则把高水位退回 `new_end`。
    fn retract(fragment: &Fragment, new_end: usize, old_end: usize) {
        if let Some(block) = fragment.block() {
            if !block.is_mapped() && Arc::strong_count(block) == 1 {
                block.retract_fill(old_end, new_end);
            }
        }
    }
}

impl<B: Backing> FragmentBuffer for ChainBuffer<B> {
    fn strategy(&self) -> &BufferStrategy {
        &self.strategy
    }

    fn data_size(&self) -> usize {
        self.data_size
    }

    fn fragment_count(&self) -> usize {
        self.chain.len()
    }

    fn clear(&mut self) {
        self.chain.clear();
        self.history.clear();
        self.history_size = 0;
        self.data_size = 0;
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.append_copy(data)
    }

    fn write_ref(&mut self, data: Bytes) -> Result<usize> {
        if self.strategy.rejects_reference() {
            self.rejected("write_ref");
            return Ok(0);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let len = data.len();
        self.chain.push_back(Fragment::external(data));
        self.data_size += len;
        Ok(len)
    }

    fn write_from<S>(&mut self, src: &S, len: usize) -> Result<usize>
    where
        S: FragmentBuffer + ?Sized,
    {
        let shared = src.share_front(len);
        if !self.backing.links_foreign() {
            let mut written = 0;
            for fragment in &shared {
                let staged = fragment.chunk().to_vec();
                written += self
                    .append_copy(&staged)
                    .map_err(|err| err.with_written(written))?;
            }
            tracing::trace!(target: "chainbuf::buffer", buffer = self.id, written, "copied transfer");
            return Ok(written);
        }
        let fragments = self.adopt(src.strategy().clone_on_write(), shared)?;
        let mut written = 0;
        for fragment in fragments {
            written += fragment.len();
            self.link_tail(fragment);
        }
        tracing::trace!(target: "chainbuf::buffer", buffer = self.id, written, "shared transfer");
        Ok(written)
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> usize {
        if offset >= self.data_size || dst.is_empty() {
            return 0;
        }
        let total = dst.len().min(self.data_size - offset);
        let Some((mut index, mut start)) = self.locate(offset) else {
            return 0;
        };
        let mut copied = 0;
        loop {
            let fragment = self.chain.get(index);
            let n = (fragment.len() - start).min(total - copied);
            fragment.copy_to(start, &mut dst[copied..copied + n]);
            copied += n;
            start = 0;
            match self.chain.next(index) {
                Some(next) if copied < total => index = next,
                _ => break,
            }
        }
        copied
    }

    fn seek(&mut self, len: usize) -> usize {
        let consumed = len.min(self.data_size);
        let mut remaining = consumed;
        while remaining > 0 {
            let Some(head) = self.chain.head() else {
                break;
            };
            let head_len = self.chain.get(head).len();
            if head_len <= remaining {
                let piece = self.chain.remove(head);
                remaining -= head_len;
                self.remember(piece);
            } else {
                let piece = self.chain.get(head).slice(0, remaining);
                self.chain.get_mut(head).advance(remaining);
                self.chain.touch(head);
                remaining = 0;
                self.remember(piece);
            }
        }
        self.data_size -= consumed;
        consumed
    }

    fn rewind(&mut self, len: usize) -> usize {
        if self.strategy.rejects_rewind() {
            self.rejected("rewind");
            return 0;
        }
        let restored = len.min(self.history_size);
        let mut remaining = restored;
        while remaining > 0 {
            let Some(mut latest) = self.history.pop_back() else {
                break;
            };
            let piece = if latest.len() > remaining {
                let piece = latest.split_off(latest.len() - remaining);
                self.history.push_back(latest);
                piece
            } else {
                latest
            };
            remaining -= piece.len();
            self.history_size -= piece.len();
            self.restore_front(piece);
        }
        restored
    }

    fn trim(&mut self, len: usize) -> usize {
        if self.strategy.rejects_trim() {
            self.rejected("trim");
            return 0;
        }
        let trimmed = len.min(self.data_size);
        let mut remaining = trimmed;
        while remaining > 0 {
            let Some(tail) = self.chain.tail() else {
                break;
            };
            let tail_len = self.chain.get(tail).len();
            if tail_len <= remaining {
                let released = self.chain.remove(tail);
                remaining -= tail_len;
                Self::retract(&released, released.offset(), released.end());
            } else {
                let old_end = self.chain.get(tail).end();
                self.chain.get_mut(tail).truncate(tail_len - remaining);
                self.chain.touch(tail);
                remaining = 0;
                let fragment = self.chain.get(tail);
                Self::retract(fragment, fragment.end(), old_end);
            }
        }
        self.data_size -= trimmed;
        trimmed
    }

    fn insert(&mut self, cursor: &FragmentCursor, offset: usize, data: &[u8]) -> Result<usize> {
        if self.strategy.rejects_insert() {
            self.rejected("insert");
            return Ok(0);
        }
        let index = self.resolve(cursor)?;
        let limit = self.chain.get(index).len();
        if offset > limit {
            return Err(BufferError::OffsetOutOfRange { offset, limit });
        }
        if data.is_empty() {
            return Ok(0);
        }
        let fragments = self.fresh_fragments(data)?;
        Ok(self.splice(index, offset, fragments))
    }

    fn insert_ref(
        &mut self,
        cursor: &FragmentCursor,
        offset: usize,
        data: Bytes,
    ) -> Result<usize> {
        if self.strategy.rejects_insert() || self.strategy.rejects_reference() {
            self.rejected("insert_ref");
            return Ok(0);
        }
        let index = self.resolve(cursor)?;
        let limit = self.chain.get(index).len();
        if offset > limit {
            return Err(BufferError::OffsetOutOfRange { offset, limit });
        }
        if data.is_empty() {
            return Ok(0);
        }
        Ok(self.splice(index, offset, vec![Fragment::external(data)]))
    }

    fn insert_from<S>(
        &mut self,
        cursor: &FragmentCursor,
        offset: usize,
        src: &S,
        len: usize,
    ) -> Result<usize>
    where
        S: FragmentBuffer + ?Sized,
    {
        if self.strategy.rejects_insert() {
            self.rejected("insert_from");
            return Ok(0);
        }
        let index = self.resolve(cursor)?;
        let limit = self.chain.get(index).len();
        if offset > limit {
            return Err(BufferError::OffsetOutOfRange { offset, limit });
        }
        let shared = src.share_front(len);
        if shared.is_empty() {
            return Ok(0);
        }
        let fragments = self.adopt(src.strategy().clone_on_write(), shared)?;
        Ok(self.splice(index, offset, fragments))
    }

    fn insert_at(&mut self, offset: usize, data: &[u8]) -> Result<usize> {
        if self.strategy.rejects_insert() {
            self.rejected("insert_at");
            return Ok(0);
        }
        if offset > self.data_size {
            return Err(BufferError::OffsetOutOfRange {
                offset,
                limit: self.data_size,
            });
        }
        let (index, local) = match self.locate(offset) {
            Some(found) => found,
            None => match self.chain.tail() {
                Some(tail) => (tail, self.chain.get(tail).len()),
                None => return self.write(data),
            },
        };
        let cursor = self.cursor_for(index);
        self.insert(&cursor, local, data)
    }

    fn overwrite(&mut self, data: &[u8]) -> Result<usize> {
        if self.strategy.rejects_overwrite() {
            self.rejected("overwrite");
            return Ok(0);
        }
        let total = data.len().min(self.data_size);
        let cow = self.strategy.clone_on_write();
        let mut done = 0;
        let mut cursor = self.chain.head();
        while let Some(index) = cursor {
            if done == total {
                break;
            }
            let n = self.chain.get(index).len().min(total - done);
            if self.chain.get(index).needs_private_copy(cow) {
                self.chain
                    .get_mut(index)
                    .privatize(&self.pages)
                    .map_err(|err| err.with_written(done))?;
            }
            self.chain.get(index).overwrite(0, &data[done..done + n]);
            done += n;
            cursor = self.chain.next(index);
        }
        Ok(done)
    }

    fn share_front(&self, len: usize) -> Vec<Fragment> {
        let mut remaining = len.min(self.data_size);
        let mut shared = Vec::new();
        for index in self.chain.indices() {
            if remaining == 0 {
                break;
            }
            let fragment = self.chain.get(index);
            let n = fragment.len().min(remaining);
            shared.push(fragment.slice(0, n));
            remaining -= n;
        }
        shared
    }

    fn begin(&self) -> Option<FragmentCursor> {
        self.chain.head().map(|index| self.cursor_for(index))
    }

    fn end(&self) -> Option<FragmentCursor> {
        self.chain.tail().map(|index| self.cursor_for(index))
    }

    fn next_fragment(&self, cursor: &FragmentCursor) -> Result<Option<FragmentCursor>> {
        let index = self.resolve(cursor)?;
        Ok(self.chain.next(index).map(|next| self.cursor_for(next)))
    }

    fn prev_fragment(&self, cursor: &FragmentCursor) -> Result<Option<FragmentCursor>> {
        let index = self.resolve(cursor)?;
        Ok(self.chain.prev(index).map(|prev| self.cursor_for(prev)))
    }

    fn fragment_len(&self, cursor: &FragmentCursor) -> Result<usize> {
        let index = self.resolve(cursor)?;
        Ok(self.chain.get(index).len())
    }

    fn fragment_chunk(&self, cursor: &FragmentCursor) -> Result<Chunk<'_>> {
        let index = self.resolve(cursor)?;
        Ok(self.chain.get(index).chunk())
    }

    fn byte_cursor(&self, offset: usize) -> Result<ByteCursor> {
        let (index, local) = self.locate(offset).ok_or(BufferError::OffsetOutOfRange {
            offset,
            limit: self.data_size,
        })?;
        Ok(ByteCursor::new(self.cursor_for(index), local))
    }

    fn byte_begin(&self) -> Option<ByteCursor> {
        self.begin().map(|cursor| ByteCursor::new(cursor, 0))
    }

    fn byte_last(&self) -> Option<ByteCursor> {
        let tail = self.chain.tail()?;
        let len = self.chain.get(tail).len();
        Some(ByteCursor::new(self.cursor_for(tail), len - 1))
    }

    fn byte_at(&self, cursor: &ByteCursor) -> Result<u8> {
        let index = self.resolve(&cursor.fragment())?;
        let fragment = self.chain.get(index);
        if cursor.offset() >= fragment.len() {
            return Err(BufferError::StaleCursor);
        }
        Ok(fragment.byte(cursor.offset()))
    }

    fn step_forward(&self, cursor: &mut ByteCursor) -> Result<bool> {
        let index = self.resolve(&cursor.fragment())?;
        if cursor.offset() + 1 < self.chain.get(index).len() {
            cursor.set(cursor.fragment(), cursor.offset() + 1);
            return Ok(true);
        }
        match self.chain.next(index) {
            Some(next) => {
                cursor.set(self.cursor_for(next), 0);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn step_backward(&self, cursor: &mut ByteCursor) -> Result<bool> {
        let index = self.resolve(&cursor.fragment())?;
        if cursor.offset() > 0 {
            cursor.set(cursor.fragment(), cursor.offset() - 1);
            return Ok(true);
        }
        match self.chain.prev(index) {
            Some(prev) => {
                let last = self.chain.get(prev).len() - 1;
                cursor.set(self.cursor_for(prev), last);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<B: Backing> std::fmt::Debug for ChainBuffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainBuffer")
            .field("id", &self.id)
            .field("data_size", &self.data_size)
            .field("fragments", &self.chain.len())
            .field("rewindable", &self.history_size)
            .field("strategy", &self.strategy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BufferStrategyBuilder;
    use tracing_test::traced_test;

    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

    fn heap_with(
        configure: impl FnOnce(BufferStrategyBuilder) -> BufferStrategyBuilder,
    ) -> HeapBuffer {
        HeapBuffer::new(configure(BufferStrategy::builder()).build().expect("策略合法"))
    }

    #[test]
    fn scenario_insert_restores_alphabet() {
        let mut buffer = HeapBuffer::default();
        assert_eq!(buffer.write(b"abcdejklmnopqrstuvwxyz").expect("写入"), 22);
        assert_eq!(buffer.insert_at(5, b"fghi").expect("插入"), 4);
        assert_eq!(buffer.data_size(), 26);
        assert_eq!(buffer.to_vec(), ALPHABET);
        assert_eq!(buffer.fragment_count(), 3, "拆分出前后两半并链入新分片");
    }

    #[test]
    fn scenario_trim_drops_tail() {
        let mut buffer = HeapBuffer::default();
        buffer.write(ALPHABET).expect("写入");
        assert_eq!(buffer.trim(10), 10);
        assert_eq!(buffer.data_size(), 16);
        assert_eq!(buffer.to_vec(), b"abcdefghijklmnop");
    }

    #[test]
    fn scenario_seek_rewind_overwrite() {
        let mut buffer = HeapBuffer::default();
        buffer.write(b"----efghijklmnopqrstuvwxyz").expect("写入");
        assert_eq!(buffer.seek(4), 4);
        assert_eq!(buffer.rewind(4), 4);
        assert_eq!(buffer.overwrite(b"abcd").expect("覆盖"), 4);
        assert_eq!(buffer.data_size(), 26);
        assert_eq!(buffer.to_vec(), ALPHABET);
        assert_eq!(buffer.fragment_count(), 1, "回退的片段应并回头分片");
    }

    #[test]
    fn partial_counts_are_not_errors() {
        let mut buffer = HeapBuffer::default();
        buffer.write(b"abc").expect("写入");
        let mut dst = [0u8; 8];
        assert_eq!(buffer.read(&mut dst), 3);
        assert_eq!(&dst[..3], b"abc");
        assert_eq!(buffer.read_at(1, &mut dst), 2);
        assert_eq!(buffer.read_at(3, &mut dst), 0);
        assert_eq!(buffer.seek(10), 3);
        assert_eq!(buffer.trim(10), 0);
        assert_eq!(buffer.write(b"").expect("空写入"), 0);
    }

    #[test]
    fn transfer_shares_storage_and_cow_isolates_both_sides() {
        let mut a = HeapBuffer::default();
        a.write(b"hello world").expect("写入");
        let mut b = HeapBuffer::default();
        assert_eq!(b.write_from(&a, 11).expect("转移"), 11);
        assert_eq!(b.page_stats().allocated_pages, 0, "零拷贝转移不分配页");
        assert_eq!(a.data_size(), 11, "源缓冲不被消费");

        a.overwrite(b"HELLO").expect("覆盖");
        assert_eq!(a.to_vec(), b"HELLO world");
        assert_eq!(b.to_vec(), b"hello world");

        b.overwrite(b"J").expect("覆盖");
        assert_eq!(b.to_vec(), b"Jello world");
        assert_eq!(a.to_vec(), b"HELLO world");
    }

    #[test]
    fn without_cow_shared_fragments_alias() {
        let mut a = heap_with(|b| b.clone_on_write(false));
        a.write(b"abc").expect("写入");
        let mut b = heap_with(|b| b.clone_on_write(false));
        b.write_from(&a, 3).expect("转移");
        a.overwrite(b"X").expect("覆盖");
        assert_eq!(b.to_vec(), b"Xbc", "未启用写时复制时双方别名同一存储");
    }

    #[test]
    fn cow_on_either_side_isolates() {
        let mut a = heap_with(|b| b.clone_on_write(false));
        a.write(b"abc").expect("写入");
        let mut b = HeapBuffer::default();
        b.write_from(&a, 3).expect("转移");
        a.overwrite(b"X").expect("覆盖");
        assert_eq!(a.to_vec(), b"Xbc");
        assert_eq!(b.to_vec(), b"abc", "接收方启用写时复制，源方修改也需私有复制");
    }

    #[test]
    fn transfer_is_independent_of_source_seek() {
        let mut src = HeapBuffer::default();
        src.write(b"abcdef").expect("写入");
        let mut dst = HeapBuffer::default();
        assert_eq!(dst.write_from(&src, 4).expect("转移"), 4);
        assert_eq!(src.seek(4), 4);
        assert_eq!(src.to_vec(), b"ef");
        assert_eq!(dst.to_vec(), b"abcd");
    }

    #[test]
    fn append_into_spare_capacity_of_shared_tail() {
        let mut a = heap_with(|b| b.page_size(16));
        a.write(b"abc").expect("写入");
        let mut b = heap_with(|b| b.page_size(16));
        b.write_from(&a, 3).expect("转移");
        b.write(b"de").expect("追加到共享页的剩余容量");
        assert_eq!(b.page_stats().allocated_pages, 0);
        a.write(b"xy").expect("高水位已前移，源方另起新页");
        assert_eq!(a.to_vec(), b"abcxy");
        assert_eq!(b.to_vec(), b"abcde");
        assert_eq!(a.page_stats().allocated_pages, 2);
    }

    #[test]
    fn held_chunk_does_not_block_sharer_append() {
        let mut a = heap_with(|b| b.page_size(16));
        a.write(b"abc").expect("写入");
        let mut b = heap_with(|b| b.page_size(16));
        b.write_from(&a, 3).expect("转移");

        let head = a.begin().expect("非空");
        let chunk = a.fragment_chunk(&head).expect("分片视图");
        assert_eq!(b.write(b"de").expect("视图存活期间追加到共享页"), 2);
        assert_eq!(b.page_stats().allocated_pages, 0, "仍然填充共享页的剩余容量");
        assert_eq!(&*chunk, b"abc");
        assert_eq!(b.to_vec(), b"abcde");
    }

    #[test]
    fn held_chunk_does_not_block_aliased_overwrite() {
        let mut a = heap_with(|b| b.page_size(16).clone_on_write(false));
        a.write(b"abc").expect("写入");
        let mut b = heap_with(|b| b.page_size(16).clone_on_write(false));
        b.write_from(&a, 3).expect("转移");

        let chunks: Vec<_> = a.fragments().collect();
        assert_eq!(b.overwrite(b"X").expect("视图存活期间原地覆盖别名分片"), 1);
        assert_eq!(&*chunks[0], b"abc", "视图是取出时刻的快照");
        assert_eq!(a.to_vec(), b"Xbc");
    }

    #[test]
    fn without_fragment_as_target_every_write_gets_fresh_page() {
        let mut buffer = heap_with(|b| b.page_size(16).fragment_as_target(false));
        buffer.write(b"ab").expect("写入");
        buffer.write(b"cd").expect("写入");
        assert_eq!(buffer.fragment_count(), 2);
        assert_eq!(buffer.page_stats().allocated_pages, 2);
        assert_eq!(buffer.to_vec(), b"abcd");
    }

    #[test]
    fn insert_from_splices_shared_fragments() {
        let mut src = HeapBuffer::default();
        src.write(b"XYZ").expect("写入");
        let mut dst = HeapBuffer::default();
        dst.write(b"ab").expect("写入");
        let head = dst.begin().expect("非空");
        assert_eq!(dst.insert_from(&head, 1, &src, 10).expect("插入"), 3);
        assert_eq!(dst.to_vec(), b"aXYZb");
        assert_eq!(src.to_vec(), b"XYZ");
        assert_eq!(dst.page_stats().allocated_pages, 1);
    }

    #[test]
    fn insert_at_fragment_boundaries() {
        let mut buffer = HeapBuffer::default();
        buffer.write(b"cd").expect("写入");
        let head = buffer.begin().expect("非空");
        buffer.insert(&head, 0, b"ab").expect("头部插入");
        buffer.insert(&head, 2, b"ef").expect("尾部插入，未拆分则游标仍有效");
        assert_eq!(buffer.to_vec(), b"abcdef");
        buffer.insert_at(6, b"g").expect("逻辑末尾插入");
        buffer.insert_at(0, b"_").expect("逻辑起点插入");
        assert_eq!(buffer.to_vec(), b"_abcdefg");
    }

    #[test]
    fn split_invalidates_cursor_but_append_does_not() {
        let mut buffer = HeapBuffer::default();
        buffer.write(b"abcdef").expect("写入");
        let head = buffer.begin().expect("非空");
        buffer.insert(&head, 3, b"XY").expect("插入");
        let err = buffer.insert(&head, 0, b"!").expect_err("拆分后旧游标失效");
        assert_eq!(err.code(), crate::codes::BUFFER_STALE_CURSOR);

        let fresh = buffer.begin().expect("非空");
        let tail = buffer.end().expect("非空");
        buffer.write(b"gh").expect("追加");
        assert_eq!(buffer.fragment_len(&fresh).expect("追加不使游标失效"), 3);
        assert_eq!(buffer.fragment_len(&tail).expect("尾分片仅变长"), 5);
        assert_eq!(buffer.to_vec(), b"abcXYdefgh");
    }

    #[test]
    fn seek_and_clear_invalidate_cursors() {
        let mut buffer = HeapBuffer::default();
        buffer.write(b"abcdef").expect("写入");
        let head = buffer.begin().expect("非空");
        buffer.seek(1);
        assert!(matches!(buffer.fragment_len(&head), Err(BufferError::StaleCursor)));
        let head = buffer.begin().expect("非空");
        buffer.clear();
        assert!(matches!(buffer.next_fragment(&head), Err(BufferError::StaleCursor)));
        assert!(buffer.begin().is_none());
        assert_eq!(buffer.page_stats().live_pages, 0);
    }

    #[test]
    fn foreign_cursor_is_rejected() {
        let mut a = HeapBuffer::default();
        let mut b = HeapBuffer::default();
        a.write(b"a").expect("写入");
        b.write(b"b").expect("写入");
        let cursor = a.begin().expect("非空");
        let err = b.insert(&cursor, 0, b"x").expect_err("跨缓冲游标");
        assert!(matches!(err, BufferError::ForeignCursor { .. }));
        assert_eq!(b.to_vec(), b"b");
    }

    #[test]
    fn insert_offset_beyond_fragment_is_rejected() {
        let mut buffer = HeapBuffer::default();
        buffer.write(b"abc").expect("写入");
        let head = buffer.begin().expect("非空");
        let err = buffer.insert(&head, 4, b"x").expect_err("越界");
        assert!(matches!(err, BufferError::OffsetOutOfRange { offset: 4, limit: 3 }));
        let err = buffer.insert_at(4, b"x").expect_err("越界");
        assert_eq!(err.code(), crate::codes::BUFFER_OFFSET_OUT_OF_RANGE);
    }

    #[test]
    fn referenced_bytes_are_privatized_before_overwrite() {
        let mut buffer = heap_with(|b| b.clone_on_write(false));
        assert_eq!(buffer.write_ref(Bytes::from_static(b"static")).expect("引用写入"), 6);
        assert!(buffer.share_front(6)[0].is_external());
        buffer.overwrite(b"ST").expect("覆盖");
        assert_eq!(buffer.to_vec(), b"STatic");
        assert!(!buffer.share_front(6)[0].is_external());
    }

    #[test]
    fn insert_ref_links_without_copy() {
        let mut buffer = HeapBuffer::default();
        buffer.write(b"ad").expect("写入");
        let head = buffer.begin().expect("非空");
        let pages_before = buffer.page_stats().allocated_pages;
        buffer.insert_ref(&head, 1, Bytes::from_static(b"bc")).expect("引用插入");
        assert_eq!(buffer.to_vec(), b"abcd");
        assert_eq!(buffer.page_stats().allocated_pages, pages_before);
    }

    #[test]
    fn overwrite_from_copies_source_bytes() {
        let mut src = HeapBuffer::default();
        src.write(b"AB").expect("写入");
        let mut dst = HeapBuffer::default();
        dst.write(b"abcd").expect("写入");
        assert_eq!(dst.overwrite_from(&src, 10).expect("覆盖"), 2);
        assert_eq!(dst.to_vec(), b"ABcd");
        assert_eq!(src.to_vec(), b"AB");
    }

    #[test]
    fn rewind_is_bounded_by_window() {
        let mut buffer = heap_with(|b| b.page_size(16).rewind_window(4));
        buffer.write(b"0123456789").expect("写入");
        assert_eq!(buffer.seek(10), 10);
        assert_eq!(buffer.rewindable(), 4);
        assert_eq!(buffer.rewind(10), 4);
        assert_eq!(buffer.to_vec(), b"6789");
    }

    #[test]
    fn rejected_rewind_changes_nothing() {
        let mut buffer = heap_with(|b| b.rejects_rewind(true));
        buffer.write(b"abcdef").expect("写入");
        buffer.seek(3);
        assert_eq!(buffer.rewind(3), 0);
        assert_eq!(buffer.to_vec(), b"def");
    }

    #[test]
    fn trim_returns_spare_capacity_to_the_page() {
        let mut buffer = heap_with(|b| b.page_size(8));
        buffer.write(b"abcdef").expect("写入");
        buffer.trim(2);
        buffer.write(b"XY").expect("写入");
        assert_eq!(buffer.to_vec(), b"abcdXY");
        assert_eq!(buffer.fragment_count(), 1);
        assert_eq!(buffer.page_stats().allocated_pages, 1);
    }

    #[test]
    #[traced_test]
    fn page_limit_surfaces_as_allocation_error() {
        let mut buffer = heap_with(|b| b.page_size(4).page_limit(Some(2)));
        let err = buffer.write(b"0123456789").expect_err("超出页上限");
        match err {
            BufferError::Allocation { requested, written } => {
                assert_eq!(requested, 4);
                assert_eq!(written, 8);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(buffer.data_size(), 8, "已写入部分保持可见");
        assert!(logs_contain("page limit reached"));
    }
}
