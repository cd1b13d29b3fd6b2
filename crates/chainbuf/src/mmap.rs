//! 映射文件后端。
//!
//! # 模块定位（Why）
//! - 让分片直接引用映射文件的窗口，写入即落盘（由内核回写），读出、转移都不经过额外缓冲；
//! - 文件内容就是追加字节流本身，无文件头、无元数据。
//!
//! # 核心机制（How）
//! - 文件按固定长度的段映射：段长为 `page_size` 向上取整到 64 KiB，保证映射偏移
//!   满足各平台的分配粒度；
//! - 写入游标 `cursor` 记录已追加的总字节数；当前段写满或被全部释放后，
//!   下一次 `reserve` 通过 `File::set_len` 扩展文件并映射新的段；
//! - 后端只以 `Weak` 观察当前段，因此“缓冲内多个分片引用同一段”不会被误判为共享。
//!
//! # 契约说明（What）
//! - 映射文件无法在中间挪动字节，策略上强制拒绝插入、回退、截尾与引用式写入；
//! - 从其它缓冲转移进来的字节会被复制进文件；关闭写时复制时，转移出去的分片共享映射段；
//! - 析构时按 [`CloseAction`] 删除文件，或刷盘并截断到实际追加长度。
//!
//! # 风险提示（Trade-offs）
//! - 写时复制语义下转出的映射字节会被复制到接收方的私有堆页，放弃零拷贝以换取
//!   “映射方的覆盖始终写回文件”；
//! - 映射期间文件被外部进程截断会导致访问越界信号，这超出本模块的约束范围。

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use memmap2::MmapOptions;

use crate::backing::{Backing, Region};
use crate::block::{Block, PageAllocator};
use crate::buffer::ChainBuffer;
use crate::error::{BufferError, Result};
use crate::strategy::BufferStrategy;

/// 映射段长度的对齐粒度。
const SEGMENT_ALIGN: usize = 64 * 1024;

/// 打开映射文件的方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenAction {
    /// 创建新文件；文件已存在时失败。
    Create,
    /// 创建文件，已存在时清空。
    Truncate,
}

/// 缓冲析构时对文件的处理方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseAction {
    /// 删除文件。
    Remove,
    /// 保留文件，并截断到实际追加的长度。
    Retain,
}

/// 映射文件缓冲。
pub type MmapBuffer = ChainBuffer<MappedBacking>;

/// 映射文件后端，见模块文档。
pub struct MappedBacking {
    file: File,
    path: PathBuf,
    close: CloseAction,
    segment_len: usize,
    cursor: u64,
    current: Weak<Block>,
}

impl MappedBacking {
    fn open(path: &Path, open: OpenAction, close: CloseAction, page_size: usize) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        match open {
            OpenAction::Create => options.create_new(true),
            OpenAction::Truncate => options.create(true).truncate(true),
        };
        let file = options.open(path).map_err(|err| {
            tracing::warn!(target: "chainbuf::mmap", path = %path.display(), %err, "failed to open backing file");
            BufferError::io("open", err)
        })?;
        let segment_len = page_size.div_ceil(SEGMENT_ALIGN) * SEGMENT_ALIGN;
        tracing::debug!(
            target: "chainbuf::mmap",
            path = %path.display(),
            segment_len,
            "opened backing file"
        );
        Ok(Self {
            file,
            path: path.to_path_buf(),
            close,
            segment_len,
            cursor: 0,
            current: Weak::new(),
        })
    }

    /// 已追加进文件的字节数。
    pub fn appended(&self) -> u64 {
        self.cursor
    }

    fn map_segment(&mut self, pages: &PageAllocator, base: u64, filled: usize) -> Result<Arc<Block>> {
        let lease = pages.lease(self.segment_len)?;
        let needed = base + self.segment_len as u64;
        let file_len = self
            .file
            .metadata()
            .map_err(|err| BufferError::io("metadata", err))?
            .len();
        if file_len < needed {
            self.file.set_len(needed).map_err(|err| {
                tracing::warn!(target: "chainbuf::mmap", path = %self.path.display(), needed, %err, "failed to extend backing file");
                BufferError::io("extend", err)
            })?;
        }
        // SAFETY: 文件由本后端独占打开，映射区间 [base, base + segment_len) 已在上方通过
        // set_len 纳入文件长度；外部进程并发截断文件不在本类型的使用约束之内。
        let map = unsafe {
            MmapOptions::new()
                .offset(base)
                .len(self.segment_len)
                .map_mut(&self.file)
        }
        .map_err(|err| {
            tracing::warn!(target: "chainbuf::mmap", path = %self.path.display(), base, %err, "failed to map segment");
            BufferError::io("map", err)
        })?;
        tracing::debug!(
            target: "chainbuf::mmap",
            path = %self.path.display(),
            base,
            len = self.segment_len,
            "mapped segment"
        );
        let block = Arc::new(Block::mapped(map, filled, lease));
        self.current = Arc::downgrade(&block);
        Ok(block)
    }
}

impl Backing for MappedBacking {
    fn reserve(&mut self, pages: &PageAllocator, _page_size: usize) -> Result<Region> {
        let segment = self.segment_len as u64;
        let within = (self.cursor % segment) as usize;
        if within != 0 {
            if let Some(block) = self.current.upgrade() {
                return Ok(Region {
                    block,
                    offset: within,
                });
            }
        }
        // 当前段已写满，或其分片全部被释放：重新映射写入游标所在的段。
        let base = self.cursor - within as u64;
        let block = self.map_segment(pages, base, within)?;
        Ok(Region {
            block,
            offset: within,
        })
    }

    fn links_foreign(&self) -> bool {
        false
    }

    fn can_extend(&self, block: &Arc<Block>) -> bool {
        std::ptr::eq(self.current.as_ptr(), Arc::as_ptr(block))
    }

    fn committed(&mut self, len: usize) {
        self.cursor += len as u64;
    }
}

impl Drop for MappedBacking {
    fn drop(&mut self) {
        match self.close {
            CloseAction::Remove => {
                if let Err(err) = std::fs::remove_file(&self.path) {
                    tracing::warn!(target: "chainbuf::mmap", path = %self.path.display(), %err, "failed to remove backing file");
                }
            }
            CloseAction::Retain => {
                if let Some(block) = self.current.upgrade() {
                    if let Err(err) = block.flush() {
                        tracing::warn!(target: "chainbuf::mmap", path = %self.path.display(), %err, "failed to flush segment");
                    }
                }
                if let Err(err) = self.file.set_len(self.cursor) {
                    tracing::warn!(target: "chainbuf::mmap", path = %self.path.display(), %err, "failed to truncate backing file");
                }
            }
        }
    }
}

impl std::fmt::Debug for MappedBacking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBacking")
            .field("path", &self.path)
            .field("close", &self.close)
            .field("segment_len", &self.segment_len)
            .field("appended", &self.cursor)
            .finish()
    }
}

impl ChainBuffer<MappedBacking> {
    /// 打开映射文件缓冲。
    ///
    /// # 契约说明（What）
    /// - `strategy` 会被叠加映射限制：拒绝插入、回退、截尾与引用式写入；
    /// - 打开失败返回 [`BufferError::Io`]，此时不会留下半初始化的缓冲。
    ///
    /// ```rust,no_run
    /// use chainbuf::{BufferStrategy, CloseAction, FragmentBuffer, MmapBuffer, OpenAction};
    ///
    /// let mut buffer = MmapBuffer::open(
    ///     "/tmp/chainbuf.bin",
    ///     OpenAction::Truncate,
    ///     CloseAction::Retain,
    ///     BufferStrategy::mmap(),
    /// )
    /// .expect("open backing file");
    /// buffer.write(b"persisted").expect("append");
    /// ```
    pub fn open(
        path: impl AsRef<Path>,
        open: OpenAction,
        close: CloseAction,
        strategy: BufferStrategy,
    ) -> Result<Self> {
        let strategy = strategy.restricted_for_mapping();
        let backing = MappedBacking::open(path.as_ref(), open, close, strategy.page_size())?;
        Ok(Self::with_backing(strategy, backing))
    }

    /// 映射文件路径。
    pub fn path(&self) -> &Path {
        &self.backing.path
    }

    /// 已追加进文件的字节数（不随 `seek` 减少）。
    pub fn appended(&self) -> u64 {
        self.backing.appended()
    }

    /// 把链上仍存活的映射段刷回文件。
    pub fn flush(&self) -> Result<()> {
        let mut last: *const Block = std::ptr::null();
        for index in self.chain.indices() {
            let Some(block) = self.chain.get(index).block() else {
                continue;
            };
            if !block.is_mapped() || std::ptr::eq(last, Arc::as_ptr(block)) {
                continue;
            }
            last = Arc::as_ptr(block);
            block.flush().map_err(|err| BufferError::io("flush", err))?;
        }
        if let Some(block) = self.backing.current.upgrade() {
            if !std::ptr::eq(last, Arc::as_ptr(&block)) {
                block.flush().map_err(|err| BufferError::io("flush", err))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FragmentBuffer;

    #[test]
    fn file_holds_exactly_the_appended_stream() {
        let dir = tempfile::tempdir().expect("临时目录");
        let path = dir.path().join("stream.bin");
        {
            let mut buffer = MmapBuffer::open(
                &path,
                OpenAction::Create,
                CloseAction::Retain,
                BufferStrategy::mmap(),
            )
            .expect("打开映射文件");
            assert_eq!(buffer.write(b"hello ").expect("追加"), 6);
            assert_eq!(buffer.write(b"mapped world").expect("追加"), 12);
            assert_eq!(buffer.seek(6), 6);
            assert_eq!(buffer.to_vec(), b"mapped world");
            buffer.flush().expect("刷盘");
            assert_eq!(buffer.appended(), 18);
        }
        let persisted = std::fs::read(&path).expect("读回文件");
        assert_eq!(persisted, b"hello mapped world");
    }

    #[test]
    fn remove_on_close_deletes_file() {
        let dir = tempfile::tempdir().expect("临时目录");
        let path = dir.path().join("scratch.bin");
        let mut buffer = MmapBuffer::open(
            &path,
            OpenAction::Truncate,
            CloseAction::Remove,
            BufferStrategy::mmap(),
        )
        .expect("打开映射文件");
        buffer.write(b"transient").expect("追加");
        assert!(path.exists());
        drop(buffer);
        assert!(!path.exists());
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempfile::tempdir().expect("临时目录");
        let path = dir.path().join("taken.bin");
        std::fs::write(&path, b"occupied").expect("预置文件");
        let err = MmapBuffer::open(
            &path,
            OpenAction::Create,
            CloseAction::Retain,
            BufferStrategy::mmap(),
        )
        .expect_err("文件已存在");
        assert_eq!(err.code(), crate::codes::BUFFER_IO);
    }

    #[test]
    fn grows_across_segments() {
        let dir = tempfile::tempdir().expect("临时目录");
        let path = dir.path().join("large.bin");
        let mut buffer = MmapBuffer::open(
            &path,
            OpenAction::Create,
            CloseAction::Retain,
            BufferStrategy::mmap(),
        )
        .expect("打开映射文件");
        let payload: Vec<u8> = (0..(SEGMENT_ALIGN * 2 + 100)).map(|i| (i % 251) as u8).collect();
        assert_eq!(buffer.write(&payload).expect("跨段追加"), payload.len());
        assert_eq!(buffer.page_stats().live_pages, 3);
        assert_eq!(buffer.to_vec(), payload);
        drop(buffer);
        assert_eq!(std::fs::read(&path).expect("读回文件"), payload);
    }

    #[test]
    fn remaps_partially_filled_segment_after_release() {
        let dir = tempfile::tempdir().expect("临时目录");
        let path = dir.path().join("remap.bin");
        let mut buffer = MmapBuffer::open(
            &path,
            OpenAction::Create,
            CloseAction::Retain,
            BufferStrategy::mmap(),
        )
        .expect("打开映射文件");
        buffer.write(b"first").expect("追加");
        buffer.seek(5);
        assert_eq!(buffer.page_stats().live_pages, 0, "消费后段被释放");
        buffer.write(b"second").expect("重新映射后追加");
        assert_eq!(buffer.to_vec(), b"second");
        drop(buffer);
        assert_eq!(std::fs::read(&path).expect("读回文件"), b"firstsecond");
    }

    #[test]
    fn cow_transfer_out_keeps_file_in_sync() {
        let dir = tempfile::tempdir().expect("临时目录");
        let path = dir.path().join("cow.bin");
        let mut mapped = MmapBuffer::open(
            &path,
            OpenAction::Create,
            CloseAction::Retain,
            BufferStrategy::mmap(),
        )
        .expect("打开映射文件");
        mapped.write(b"hello world").expect("追加");

        let mut heap = crate::HeapBuffer::default();
        assert_eq!(heap.write_from(&mapped, 5).expect("转出"), 5);
        assert!(!heap.share_front(5)[0].is_mapped(), "写时复制下转出的映射字节落在私有页");

        assert_eq!(mapped.overwrite(b"HELLO").expect("覆盖"), 5);
        assert_eq!(mapped.to_vec(), b"HELLO world");
        assert_eq!(heap.to_vec(), b"hello");
        assert!(mapped.share_front(11)[0].is_mapped(), "覆盖直接写回映射段");

        drop(mapped);
        assert_eq!(std::fs::read(&path).expect("读回文件"), b"HELLO world");
        assert_eq!(heap.to_vec(), b"hello");
    }

    #[test]
    fn aliased_transfer_out_writes_through() {
        let dir = tempfile::tempdir().expect("临时目录");
        let path = dir.path().join("alias.bin");
        let aliasing = BufferStrategy::mmap()
            .to_builder()
            .clone_on_write(false)
            .build()
            .expect("合法策略");
        let mut mapped = MmapBuffer::open(&path, OpenAction::Create, CloseAction::Retain, aliasing)
            .expect("打开映射文件");
        mapped.write(b"hello world").expect("追加");

        let mut heap = crate::HeapBuffer::new(
            BufferStrategy::builder()
                .clone_on_write(false)
                .build()
                .expect("合法策略"),
        );
        heap.write_from(&mapped, 5).expect("转出");
        assert!(heap.share_front(5)[0].is_mapped(), "关闭写时复制时共享映射段");

        mapped.overwrite(b"HELLO").expect("覆盖");
        assert_eq!(heap.to_vec(), b"HELLO", "别名共享方看到覆盖");
        drop(mapped);
        drop(heap);
        assert_eq!(std::fs::read(&path).expect("读回文件"), b"HELLO world");
    }

    #[test]
    fn layout_breaking_edits_are_rejected() {
        let dir = tempfile::tempdir().expect("临时目录");
        let mut buffer = MmapBuffer::open(
            dir.path().join("caps.bin"),
            OpenAction::Create,
            CloseAction::Remove,
            BufferStrategy::heap(),
        )
        .expect("打开映射文件");
        buffer.write(b"abcdef").expect("追加");
        let cursor = buffer.begin().expect("非空");
        assert_eq!(buffer.insert(&cursor, 1, b"zz").expect("拒绝不是错误"), 0);
        assert_eq!(buffer.write_ref(bytes::Bytes::from_static(b"ref")).expect("拒绝"), 0);
        assert_eq!(buffer.trim(2), 0);
        buffer.seek(2);
        assert_eq!(buffer.rewind(2), 0);
        assert_eq!(buffer.overwrite(b"CD").expect("覆盖"), 2);
        assert_eq!(buffer.to_vec(), b"CDef");
    }
}
