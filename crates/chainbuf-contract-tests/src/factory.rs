use std::sync::atomic::{AtomicUsize, Ordering};

use chainbuf::{
    Backing, BufferStrategy, ChainBuffer, CloseAction, HeapBacking, HeapBuffer, MappedBacking,
    MmapBuffer, OpenAction,
};
use tempfile::TempDir;

/// 为契约用例提供新缓冲的工厂。
///
/// # 教案式说明
/// - **意图 (Why)**：用例只描述契约，不关心缓冲落在堆上还是文件里；
/// - **逻辑 (How)**：关联类型 `Backing` 固定后端，`make` 每次返回一个全新的、空的缓冲；
/// - **契约 (What)**：同一工厂产出的缓冲共享同一份策略；`ZERO_COPY_TRANSFER` 声明转移是否共享存储。
pub trait BufferFactory {
    /// 缓冲后端。
    type Backing: Backing;

    /// 转移进该后端时是否共享源存储（否则复制）。
    const ZERO_COPY_TRANSFER: bool;

    /// 人类可读标签，出现在失败信息中。
    fn label(&self) -> String;

    /// 产出缓冲的实际策略（映射后端会叠加限制）。
    fn strategy(&self) -> &BufferStrategy;

    /// 创建一个空缓冲。
    fn make(&self) -> ChainBuffer<Self::Backing>;
}

/// 堆分页缓冲工厂。
#[derive(Clone, Debug)]
pub struct HeapFactory {
    strategy: BufferStrategy,
}

impl HeapFactory {
    pub fn new(strategy: BufferStrategy) -> Self {
        Self { strategy }
    }
}

impl BufferFactory for HeapFactory {
    type Backing = HeapBacking;

    const ZERO_COPY_TRANSFER: bool = true;

    fn label(&self) -> String {
        format!(
            "heap(page={},cow={},fat={})",
            self.strategy.page_size(),
            self.strategy.clone_on_write(),
            self.strategy.fragment_as_target()
        )
    }

    fn strategy(&self) -> &BufferStrategy {
        &self.strategy
    }

    fn make(&self) -> HeapBuffer {
        HeapBuffer::new(self.strategy.clone())
    }
}

/// 映射文件缓冲工厂：每个缓冲在临时目录下拥有独立文件，析构时删除。
#[derive(Debug)]
pub struct MmapFactory {
    dir: TempDir,
    strategy: BufferStrategy,
    counter: AtomicUsize,
}

impl MmapFactory {
    /// 以 `strategy` 为基础创建工厂；映射限制会在打开时叠加。
    pub fn new(strategy: BufferStrategy) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("chainbuf-tck").tempdir()?;
        let strategy = BufferStrategy::mmap()
            .to_builder()
            .page_size(strategy.page_size())
            .clone_on_write(strategy.clone_on_write())
            .fragment_as_target(strategy.fragment_as_target())
            .rejects_overwrite(strategy.rejects_overwrite())
            .page_limit(strategy.page_limit())
            .build()
            .map_err(std::io::Error::other)?;
        Ok(Self {
            dir,
            strategy,
            counter: AtomicUsize::new(0),
        })
    }
}

impl BufferFactory for MmapFactory {
    type Backing = MappedBacking;

    const ZERO_COPY_TRANSFER: bool = false;

    fn label(&self) -> String {
        format!(
            "mmap(cow={},fat={})",
            self.strategy.clone_on_write(),
            self.strategy.fragment_as_target()
        )
    }

    fn strategy(&self) -> &BufferStrategy {
        &self.strategy
    }

    fn make(&self) -> MmapBuffer {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.path().join(format!("tck-{n}.bin"));
        MmapBuffer::open(path, OpenAction::Create, CloseAction::Remove, self.strategy.clone())
            .expect("临时目录中的映射文件应可创建")
    }
}

/// `fragment_as_target` × `clone_on_write` 的全部组合。
pub fn strategy_matrix(page_size: usize) -> Vec<BufferStrategy> {
    let mut matrix = Vec::with_capacity(4);
    for fragment_as_target in [false, true] {
        for clone_on_write in [false, true] {
            matrix.push(
                BufferStrategy::builder()
                    .page_size(page_size)
                    .fragment_as_target(fragment_as_target)
                    .clone_on_write(clone_on_write)
                    .build()
                    .expect("矩阵策略合法"),
            );
        }
    }
    matrix
}
