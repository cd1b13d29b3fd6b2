//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 分片缓冲的大多数“未完成”都不是错误：能力不匹配（`rejects_*`）与容量不足均以
//!   `Ok(n)` 返回实际处理字节数；
//! - 真正需要上报给调用方的只有四类：存储分配失败、映射文件 I/O 失败、游标失效、配置非法。
//!
//! ## 设计要求（What）
//! - 所有错误派生 `thiserror::Error`，与 `std::error::Error` 生态兼容；
//! - 每个变体都映射到 [`codes`] 中的稳定错误码，便于日志、指标按 `<领域>.<语义>` 聚合；
//! - 分配失败携带“失败前已写入字节数”，使调用方能够区分“部分写入后失败”与“未请求任何字节”。

use std::io;

use thiserror::Error;

/// 稳定错误码集合。
///
/// 命名遵循 `<领域>.<语义>` 约定，与 [`BufferError::code`] 一一对应。
pub mod codes {
    /// 无法获得新的页或映射段。
    pub const BUFFER_ALLOCATION: &str = "buffer.allocation";
    /// 映射文件打开、扩展、映射或刷盘失败。
    pub const BUFFER_IO: &str = "buffer.io";
    /// 游标引用的分片已被拆分、释放或清空。
    pub const BUFFER_STALE_CURSOR: &str = "buffer.stale_cursor";
    /// 游标来自另一个缓冲实例。
    pub const BUFFER_FOREIGN_CURSOR: &str = "buffer.foreign_cursor";
    /// 偏移超出分片或逻辑流的可寻址范围。
    pub const BUFFER_OFFSET_OUT_OF_RANGE: &str = "buffer.offset_out_of_range";
    /// 策略配置非法。
    pub const BUFFER_CONFIG: &str = "buffer.config";
}

/// 分片缓冲错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：原始设计中游标失效属于未定义行为、分配失败与“0 字节”混淆；
///   这里将二者显式化为可检查的错误，其余“部分完成”仍以返回值表达。
/// - **契约 (What)**：
///   - 所有变体满足 `Send + Sync + 'static`，可跨线程传播；
///   - [`code`](Self::code) 返回稳定错误码，不随消息文案变化；
/// - **设计权衡 (Trade-offs)**：`Io` 保存静态上下文字符串而非路径，避免在热路径上分配。
#[derive(Debug, Error)]
pub enum BufferError {
    /// 页分配失败或超出 `page_limit`。
    ///
    /// `written` 为失败前已经追加进缓冲的字节数，调用方可据此决定是否重试剩余部分。
    #[error("failed to allocate {requested} bytes of backing storage (already written: {written})")]
    Allocation { requested: usize, written: usize },

    /// 映射文件相关 I/O 失败。
    #[error("backing file i/o failed during `{context}`: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// 游标引用的分片在此之后被结构性编辑触碰过。
    #[error("cursor refers to a fragment that was split, released or cleared")]
    StaleCursor,

    /// 游标不属于当前缓冲。
    #[error("cursor belongs to buffer #{cursor_buffer}, not buffer #{buffer}")]
    ForeignCursor { buffer: u64, cursor_buffer: u64 },

    /// 偏移越界。
    #[error("offset {offset} is outside the addressable range 0..={limit}")]
    OffsetOutOfRange { offset: usize, limit: usize },

    /// 策略配置非法，例如 `page_size = 0` 或 TOML 无法解析。
    #[error("invalid buffer strategy: {0}")]
    Config(String),
}

impl BufferError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            BufferError::Allocation { .. } => codes::BUFFER_ALLOCATION,
            BufferError::Io { .. } => codes::BUFFER_IO,
            BufferError::StaleCursor => codes::BUFFER_STALE_CURSOR,
            BufferError::ForeignCursor { .. } => codes::BUFFER_FOREIGN_CURSOR,
            BufferError::OffsetOutOfRange { .. } => codes::BUFFER_OFFSET_OUT_OF_RANGE,
            BufferError::Config(_) => codes::BUFFER_CONFIG,
        }
    }

    pub(crate) fn allocation(requested: usize) -> Self {
        BufferError::Allocation {
            requested,
            written: 0,
        }
    }

    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        BufferError::Io { context, source }
    }

    /// 在分配失败上补记已写入的字节数；其它变体原样返回。
    pub(crate) fn with_written(self, already: usize) -> Self {
        match self {
            BufferError::Allocation { requested, written } => BufferError::Allocation {
                requested,
                written: written + already,
            },
            other => other,
        }
    }
}

/// crate 内统一的结果别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_written_only_touches_allocation() {
        let err = BufferError::allocation(4096).with_written(10).with_written(5);
        match err {
            BufferError::Allocation { requested, written } => {
                assert_eq!(requested, 4096);
                assert_eq!(written, 15);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        let stale = BufferError::StaleCursor.with_written(3);
        assert_eq!(stale.code(), codes::BUFFER_STALE_CURSOR);
    }

    #[test]
    fn io_error_keeps_source() {
        let err = BufferError::io("map", io::Error::other("boom"));
        assert_eq!(err.code(), codes::BUFFER_IO);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("map"));
    }
}
