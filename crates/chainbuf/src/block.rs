//! 存储块：分片背后可被共享的连续内存。
//!
//! # 模块定位（Why）
//! - 分片（[`Fragment`](crate::Fragment)）只是 `(存储, 偏移, 长度)` 三元组，真正的字节由 [`Block`]
//!   持有；零拷贝转移与拆分都只是多克隆一份 `Arc<Block>`；
//! - 块既可以是堆页，也可以是映射文件的一个窗口，二者对上层完全同构。
//!
//! # 核心机制（How）
//! - `filled` 记录块内已写入的高水位，只有恰好停在高水位处的分片才能原地追加，
//!   因此高水位之后的字节对任何其它分片都不可见，追加无需写时复制；
//! - 字节区由 `spin::RwLock` 保护：关闭写时复制时多个缓冲确实会别名同一块，
//!   锁保证跨线程共享时的内存安全；
//! - [`PageAllocator`] 以原子计数跟踪存活页，每个块持有一份 `PageLease`，
//!   最后一个 `Arc<Block>` 释放时自动归还计数。

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use spin::{RwLock, RwLockReadGuard};

use crate::error::{BufferError, Result};

pub(crate) enum BlockBytes {
    Heap(Box<[u8]>),
    #[cfg(feature = "mmap")]
    Mapped(memmap2::MmapMut),
}

impl Deref for BlockBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            BlockBytes::Heap(bytes) => bytes,
            #[cfg(feature = "mmap")]
            BlockBytes::Mapped(map) => map,
        }
    }
}

impl DerefMut for BlockBytes {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            BlockBytes::Heap(bytes) => bytes,
            #[cfg(feature = "mmap")]
            BlockBytes::Mapped(map) => map,
        }
    }
}

pub(crate) struct BlockState {
    bytes: BlockBytes,
    filled: usize,
}

impl BlockState {
    pub(crate) fn filled_bytes(&self) -> &[u8] {
        &self.bytes[..self.filled]
    }
}

/// 一段可被多个分片共享的连续存储。
///
/// 对外只暴露容量与是否为映射窗口，读写均经由分片完成。
pub struct Block {
    state: RwLock<BlockState>,
    capacity: usize,
    mapped: bool,
    cow_pinned: AtomicBool,
    _lease: PageLease,
}

impl Block {
    fn new(bytes: BlockBytes, filled: usize, lease: PageLease) -> Self {
        let capacity = bytes.len();
        debug_assert!(filled <= capacity);
        #[cfg(feature = "mmap")]
        let mapped = matches!(bytes, BlockBytes::Mapped(_));
        #[cfg(not(feature = "mmap"))]
        let mapped = false;
        Self {
            state: RwLock::new(BlockState { bytes, filled }),
            capacity,
            mapped,
            cow_pinned: AtomicBool::new(false),
            _lease: lease,
        }
    }

    #[cfg(feature = "mmap")]
    pub(crate) fn mapped(map: memmap2::MmapMut, filled: usize, lease: PageLease) -> Self {
        Self::new(BlockBytes::Mapped(map), filled, lease)
    }

    /// 块的总容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 是否为映射文件窗口。
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub(crate) fn filled(&self) -> usize {
        self.state.read().filled
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, BlockState> {
        self.state.read()
    }

    /// 仅当高水位恰好等于 `at` 时追加，返回实际写入的字节数。
    pub(crate) fn append_at(&self, at: usize, data: &[u8]) -> usize {
        let mut state = self.state.write();
        if state.filled != at {
            return 0;
        }
        let n = data.len().min(self.capacity - at);
        state.bytes[at..at + n].copy_from_slice(&data[..n]);
        state.filled += n;
        n
    }

    /// 覆盖已写入区间内的字节。
    pub(crate) fn overwrite_at(&self, at: usize, data: &[u8]) {
        let mut state = self.state.write();
        debug_assert!(at + data.len() <= state.filled);
        state.bytes[at..at + data.len()].copy_from_slice(data);
    }

    pub(crate) fn copy_out(&self, at: usize, dst: &mut [u8]) {
        let state = self.state.read();
        dst.copy_from_slice(&state.bytes[at..at + dst.len()]);
    }

    pub(crate) fn byte(&self, at: usize) -> u8 {
        self.state.read().bytes[at]
    }

    /// 截尾后回收高水位，只在高水位仍停在 `from` 时生效。
    pub(crate) fn retract_fill(&self, from: usize, to: usize) -> bool {
        let mut state = self.state.write();
        if state.filled == from && to <= from {
            state.filled = to;
            true
        } else {
            false
        }
    }

    /// 标记该块曾在写时复制语义下被共享，此后任一共享方修改前都需私有复制。
    pub(crate) fn pin_cow(&self) {
        self.cow_pinned.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_cow_pinned(&self) -> bool {
        self.cow_pinned.load(Ordering::Relaxed)
    }

    #[cfg(feature = "mmap")]
    pub(crate) fn flush(&self) -> std::io::Result<()> {
        match &self.state.read().bytes {
            BlockBytes::Mapped(map) => map.flush(),
            BlockBytes::Heap(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("capacity", &self.capacity)
            .field("filled", &self.filled())
            .field("cow_pinned", &self.is_cow_pinned())
            .finish()
    }
}

/// 页分配统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageStats {
    /// 自创建以来累计分配的页数。
    pub allocated_pages: u64,
    /// 当前仍被某个分片引用的页数。
    pub live_pages: usize,
    /// 当前存活页的总容量。
    pub live_bytes: usize,
}

#[derive(Default)]
struct PageMetrics {
    allocated_pages: AtomicU64,
    live_pages: AtomicUsize,
    live_bytes: AtomicUsize,
}

/// `PageLease` 在块释放时归还存活计数。
pub(crate) struct PageLease {
    metrics: Arc<PageMetrics>,
    bytes: usize,
}

impl Drop for PageLease {
    fn drop(&mut self) {
        self.metrics.live_pages.fetch_sub(1, Ordering::Relaxed);
        self.metrics
            .live_bytes
            .fetch_sub(self.bytes, Ordering::Relaxed);
    }
}

/// 页分配器：负责堆页分配、`page_limit` 约束与存活统计。
///
/// # 教案式说明
/// - **意图 (Why)**：分配失败必须是可观测的错误而不是“写入 0 字节”；
///   同时测试需要观察“整页消费后引用被释放”这一生命周期事实；
/// - **逻辑 (How)**：租约计数用 `fetch_update` 原子地比较上限，分配使用
///   `Vec::try_reserve_exact` 捕获堆耗尽；
/// - **契约 (What)**：克隆得到的分配器共享同一份计数。
#[derive(Clone)]
pub struct PageAllocator {
    limit: Option<usize>,
    metrics: Arc<PageMetrics>,
}

impl PageAllocator {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            metrics: Arc::new(PageMetrics::default()),
        }
    }

    pub(crate) fn lease(&self, bytes: usize) -> Result<PageLease> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.metrics
            .live_pages
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| {
                (live < limit).then_some(live + 1)
            })
            .map_err(|live| {
                tracing::warn!(
                    target: "chainbuf::block",
                    live_pages = live,
                    limit,
                    requested = bytes,
                    "page limit reached"
                );
                BufferError::allocation(bytes)
            })?;
        self.metrics.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.metrics.allocated_pages.fetch_add(1, Ordering::Relaxed);
        Ok(PageLease {
            metrics: Arc::clone(&self.metrics),
            bytes,
        })
    }

    /// 分配一个容量为 `capacity`、高水位为 0 的堆页。
    pub(crate) fn heap_block(&self, capacity: usize) -> Result<Arc<Block>> {
        let lease = self.lease(capacity)?;
        let mut raw = Vec::new();
        if let Err(err) = raw.try_reserve_exact(capacity) {
            tracing::warn!(target: "chainbuf::block", capacity, %err, "heap page allocation failed");
            return Err(BufferError::allocation(capacity));
        }
        raw.resize(capacity, 0);
        tracing::debug!(target: "chainbuf::block", capacity, "allocated heap page");
        Ok(Arc::new(Block::new(
            BlockBytes::Heap(raw.into_boxed_slice()),
            0,
            lease,
        )))
    }

    /// 以 `data` 为内容分配一个恰好填满的堆页，供写时复制使用。
    pub(crate) fn heap_copy(&self, data: &[u8]) -> Result<Arc<Block>> {
        let block = self.heap_block(data.len())?;
        block.append_at(0, data);
        Ok(block)
    }

    pub fn stats(&self) -> PageStats {
        PageStats {
            allocated_pages: self.metrics.allocated_pages.load(Ordering::Relaxed),
            live_pages: self.metrics.live_pages.load(Ordering::Relaxed),
            live_bytes: self.metrics.live_bytes.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for PageAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageAllocator")
            .field("limit", &self.limit)
            .field("stats", &self.stats())
            .finish()
    }
}
