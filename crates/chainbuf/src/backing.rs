//! 存储后端：决定“新字节落在哪里”。
//!
//! # 教案式说明
//! - **意图 (Why)**：堆分页缓冲与映射文件缓冲共享同一套链操作，差异只在
//!   “下一段可写空间从哪里来”以及“能否直接引用别的缓冲的存储”；
//! - **逻辑 (How)**：[`Backing`] 以 sealed trait 的形式收敛这两个问题，
//!   `ChainBuffer<B: Backing>` 在编译期静态分派；
//! - **契约 (What)**：`reserve` 返回的区域必须满足“块高水位 == 区域偏移”，
//!   否则追加会被块拒绝并上报为分配失败。

use std::sync::Arc;

use crate::block::{Block, PageAllocator};
use crate::error::Result;

mod sealed {
    pub trait Sealed {}
}

/// 一段可追加的存储：`block` 的 `offset` 处即为高水位。
#[derive(Debug)]
pub struct Region {
    pub(crate) block: Arc<Block>,
    pub(crate) offset: usize,
}

/// 缓冲后端的封闭集合：[`HeapBacking`] 与 `MappedBacking`。
///
/// 外部 crate 无法实现该 trait，从而保证所有后端都遵守高水位追加约定。
pub trait Backing: sealed::Sealed {
    /// 为追加写入准备下一段空间。
    fn reserve(&mut self, pages: &PageAllocator, page_size: usize) -> Result<Region>;

    /// 是否允许把其它缓冲的分片直接链入（零拷贝转移）；否则转移退化为复制。
    fn links_foreign(&self) -> bool;

    /// 尾分片所在块能否由本缓冲继续追加。
    fn can_extend(&self, block: &Arc<Block>) -> bool;

    /// 通知后端有 `len` 字节已经落入 `reserve`/尾页填充得到的空间。
    fn committed(&mut self, _len: usize) {}
}

/// 堆分页后端：每次 `reserve` 都分配一个 `page_size` 大小的新页。
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapBacking;

impl sealed::Sealed for HeapBacking {}

impl Backing for HeapBacking {
    fn reserve(&mut self, pages: &PageAllocator, page_size: usize) -> Result<Region> {
        Ok(Region {
            block: pages.heap_block(page_size)?,
            offset: 0,
        })
    }

    fn links_foreign(&self) -> bool {
        true
    }

    /// 映射段的高水位属于所属文件的追加流，堆缓冲只能读取、不能续写。
    fn can_extend(&self, block: &Arc<Block>) -> bool {
        !block.is_mapped()
    }
}

#[cfg(feature = "mmap")]
impl sealed::Sealed for crate::mmap::MappedBacking {}
