//! 缓冲策略：分页大小与能力标志。
//!
//! # 模块定位（Why）
//! - 堆分页缓冲与映射文件缓冲共享同一套操作面，差异全部收敛到一份不可变的 [`BufferStrategy`]；
//! - 能力标志（`rejects_*`）让后端声明“做不到”的结构编辑，调用方得到确定性的 `Ok(0)`，
//!   而不是运行期故障。
//!
//! # 配置来源（How）
//! - 代码内通过 [`BufferStrategy::builder`] 构造并校验；
//! - 部署侧可以用 TOML 表描述，经 [`BufferStrategy::from_toml_str`] 解析，缺省字段回落到
//!   [`BufferStrategy::heap`] 预设。

use serde::Deserialize;

use crate::error::{BufferError, Result};

/// 每个缓冲在构造时绑定的不可变策略。
///
/// # 契约说明（What）
/// - `page_size`：新分配页（或映射段的基准）容量，必须大于 0；
/// - `clone_on_write`：原地修改共享分片前先私有复制；
/// - `fragment_as_target`：追加写入可以先填满尾分片所在页的剩余容量；
/// - `rejects_*`：声明不支持的编辑操作，对应操作恒返回 `Ok(0)` 且不改变状态；
/// - `rewind_window`：为 `rewind` 保留的已消费历史字节上限，0 表示不保留；
/// - `page_limit`：单个后端同时存活的页（或映射段）上限，超出即视为分配失败。
///
/// 策略在缓冲生命周期内不会被修改，字段只提供只读访问。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferStrategy {
    page_size: usize,
    clone_on_write: bool,
    fragment_as_target: bool,
    rejects_insert: bool,
    rejects_overwrite: bool,
    rejects_rewind: bool,
    rejects_trim: bool,
    rejects_reference: bool,
    rewind_window: usize,
    page_limit: Option<usize>,
}

impl BufferStrategy {
    /// 默认页大小。
    pub const DEFAULT_PAGE_SIZE: usize = 4096;

    /// 堆分页预设：全部能力可用，开启写时复制与尾页填充，回退窗口等于一页。
    pub fn heap() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            clone_on_write: true,
            fragment_as_target: true,
            rejects_insert: false,
            rejects_overwrite: false,
            rejects_rewind: false,
            rejects_trim: false,
            rejects_reference: false,
            rewind_window: Self::DEFAULT_PAGE_SIZE,
            page_limit: None,
        }
    }

    /// 映射文件预设。
    ///
    /// 映射文件必须保持“文件内容即追加字节流”的布局，因此拒绝插入、回退、截尾与引用式写入。
    pub fn mmap() -> Self {
        Self::heap().restricted_for_mapping()
    }

    /// 以堆分页预设为起点的构造器。
    pub fn builder() -> BufferStrategyBuilder {
        BufferStrategyBuilder {
            inner: Self::heap(),
        }
    }

    /// 以当前策略为起点派生新的构造器。
    pub fn to_builder(&self) -> BufferStrategyBuilder {
        BufferStrategyBuilder {
            inner: self.clone(),
        }
    }

    /// 从 TOML 表解析策略。
    ///
    /// # 契约说明（What）
    /// - 未出现的字段取 [`heap`](Self::heap) 预设值；未知字段视为错误；
    /// - 解析失败或 `page_size = 0` 时返回 [`BufferError::Config`]。
    ///
    /// ```rust
    /// use chainbuf::BufferStrategy;
    ///
    /// let strategy = BufferStrategy::from_toml_str("page_size = 64\nclone_on_write = false")
    ///     .expect("valid strategy");
    /// assert_eq!(strategy.page_size(), 64);
    /// assert!(!strategy.clone_on_write());
    /// assert!(strategy.fragment_as_target());
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed: BufferStrategy =
            toml::from_str(raw).map_err(|err| BufferError::Config(err.to_string()))?;
        parsed.validate()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn clone_on_write(&self) -> bool {
        self.clone_on_write
    }

    pub fn fragment_as_target(&self) -> bool {
        self.fragment_as_target
    }

    pub fn rejects_insert(&self) -> bool {
        self.rejects_insert
    }

    pub fn rejects_overwrite(&self) -> bool {
        self.rejects_overwrite
    }

    pub fn rejects_rewind(&self) -> bool {
        self.rejects_rewind
    }

    pub fn rejects_trim(&self) -> bool {
        self.rejects_trim
    }

    pub fn rejects_reference(&self) -> bool {
        self.rejects_reference
    }

    pub fn rewind_window(&self) -> usize {
        self.rewind_window
    }

    pub fn page_limit(&self) -> Option<usize> {
        self.page_limit
    }

    /// 是否需要保留已消费历史供 `rewind` 使用。
    pub(crate) fn keeps_history(&self) -> bool {
        !self.rejects_rewind && self.rewind_window > 0
    }

    /// 叠加映射文件无法兑现的能力标志。
    pub(crate) fn restricted_for_mapping(mut self) -> Self {
        self.rejects_insert = true;
        self.rejects_rewind = true;
        self.rejects_trim = true;
        self.rejects_reference = true;
        self.rewind_window = 0;
        self
    }

    fn validate(self) -> Result<Self> {
        if self.page_size == 0 {
            return Err(BufferError::Config("page_size must be greater than 0".into()));
        }
        if self.page_limit == Some(0) {
            return Err(BufferError::Config("page_limit must be greater than 0".into()));
        }
        Ok(self)
    }
}

impl Default for BufferStrategy {
    fn default() -> Self {
        Self::heap()
    }
}

/// [`BufferStrategy`] 构造器，`build` 时统一校验。
#[derive(Clone, Debug)]
pub struct BufferStrategyBuilder {
    inner: BufferStrategy,
}

impl BufferStrategyBuilder {
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.inner.page_size = page_size;
        self
    }

    pub fn clone_on_write(mut self, enabled: bool) -> Self {
        self.inner.clone_on_write = enabled;
        self
    }

    pub fn fragment_as_target(mut self, enabled: bool) -> Self {
        self.inner.fragment_as_target = enabled;
        self
    }

    pub fn rejects_insert(mut self, rejects: bool) -> Self {
        self.inner.rejects_insert = rejects;
        self
    }

    pub fn rejects_overwrite(mut self, rejects: bool) -> Self {
        self.inner.rejects_overwrite = rejects;
        self
    }

    pub fn rejects_rewind(mut self, rejects: bool) -> Self {
        self.inner.rejects_rewind = rejects;
        self
    }

    pub fn rejects_trim(mut self, rejects: bool) -> Self {
        self.inner.rejects_trim = rejects;
        self
    }

    pub fn rejects_reference(mut self, rejects: bool) -> Self {
        self.inner.rejects_reference = rejects;
        self
    }

    pub fn rewind_window(mut self, bytes: usize) -> Self {
        self.inner.rewind_window = bytes;
        self
    }

    pub fn page_limit(mut self, limit: Option<usize>) -> Self {
        self.inner.page_limit = limit;
        self
    }

    /// 校验并产出策略。
    pub fn build(self) -> Result<BufferStrategy> {
        self.inner.validate()
    }
}
