use chainbuf::{BufferError, FragmentBuffer};
use thiserror::Error;

const NEWLINE: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// 行读取器错误码，遵循 `<领域>.<语义>` 约定。
pub mod codes {
    /// 终止符未在行长预算内出现。
    pub const LINE_TOO_LONG: &str = "line.too_long";
}

/// 行扫描失败的原因。
#[derive(Debug, Error)]
pub enum LineError {
    /// 在 `limit` 字节内没有找到终止符，或找到的行超过预算。
    #[error("line exceeds budget of {limit} bytes (seen {seen})")]
    TooLong {
        /// 配置的行长上限。
        limit: usize,
        /// 触发错误时已扫描到的行长。
        seen: usize,
    },
    /// 底层缓冲报告的错误。
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl LineError {
    /// 稳定错误码；缓冲错误沿用缓冲自身的错误码。
    pub fn code(&self) -> &'static str {
        match self {
            LineError::TooLong { .. } => codes::LINE_TOO_LONG,
            LineError::Buffer(err) => err.code(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LineSpan {
    len: usize,
    crlf: bool,
}

impl LineSpan {
    fn terminated_len(&self) -> usize {
        self.len + if self.crlf { 2 } else { 1 }
    }
}

/// 绑定到单个缓冲的非消费式行扫描器。
///
/// # 设计动机（Why）
/// - 分帧逻辑不应要求缓冲先“拍平”成连续内存；借助分片游标逐块查找换行符即可；
/// - 扫描结果缓存在读取器内，`has_line` 反复调用不会重复扫描已看过的字节。
///
/// # 行为概览（How）
/// - `scanned` 记录已确认不含换行符的逻辑前缀长度；命中换行后缓存当前行的长度与终止符形态；
/// - `seek_line` 通过缓冲的 `seek` 消费“行 + 终止符”，并把扫描位置同步前移；
/// - 已终止但超出预算的行记为待丢弃记录：`has_line` 持续报告同一错误，`seek_line` 丢弃它；
/// - `append` 只追加数据，不会使扫描结果失效；`buffer_mut` 交出任意修改权，因此会清空扫描状态。
///
/// # 契约说明（What）
/// - 读取器在生命周期内独占借用缓冲，外部无法在扫描期间修改缓冲；
/// - 未命中行时 `line_len` 返回 `None`，`line_data` 返回 0；既无当前行也无待丢弃记录时 `seek_line` 返回 0。
pub struct LineReader<'a, B: FragmentBuffer> {
    buffer: &'a mut B,
    scanned: usize,
    line: Option<LineSpan>,
    rejected: Option<LineSpan>,
    max_line_len: Option<usize>,
}

impl<'a, B: FragmentBuffer> LineReader<'a, B> {
    /// 创建不限行长的读取器。
    pub fn new(buffer: &'a mut B) -> Self {
        Self {
            buffer,
            scanned: 0,
            line: None,
            rejected: None,
            max_line_len: None,
        }
    }

    /// 创建带行长预算的读取器，预算不含终止符。
    pub fn with_max_line_len(buffer: &'a mut B, limit: usize) -> Self {
        Self {
            max_line_len: Some(limit),
            ..Self::new(buffer)
        }
    }

    /// 当前缓冲中是否存在一条完整的行；必要时增量扫描新到达的字节。
    ///
    /// 头部的行已终止但超出预算时返回 [`LineError::TooLong`]，直到 [`seek_line`](Self::seek_line)
    /// 丢弃该行为止。
    pub fn has_line(&mut self) -> Result<bool, LineError> {
        if self.line.is_some() {
            return Ok(true);
        }
        if let (Some(span), Some(limit)) = (self.rejected, self.max_line_len) {
            return Err(LineError::TooLong {
                limit,
                seen: span.len,
            });
        }
        if self.scanned >= self.buffer.data_size() {
            return Ok(false);
        }
        let start = self.buffer.byte_cursor(self.scanned)?;
        let mut fragment = Some(start.fragment());
        let mut skip = start.offset();
        let mut position = self.scanned;
        while let Some(cursor) = fragment {
            let found = {
                let chunk = self.buffer.fragment_chunk(&cursor)?;
                let window = &chunk[skip..];
                match window.iter().position(|byte| *byte == NEWLINE) {
                    Some(at) => Some(position + at),
                    None => {
                        position += window.len();
                        None
                    }
                }
            };
            if let Some(newline_at) = found {
                return self.accept(newline_at).map(|()| true);
            }
            skip = 0;
            fragment = self.buffer.next_fragment(&cursor)?;
        }
        self.scanned = position;
        if let Some(limit) = self.max_line_len
            && position > limit.saturating_add(1)
        {
            return Err(self.too_long(limit, position));
        }
        Ok(false)
    }

    /// 当前行长度（不含终止符）。
    pub fn line_len(&self) -> Option<usize> {
        self.line.map(|line| line.len)
    }

    /// 当前行是否以 `\r\n` 结束；没有当前行时返回 `false`。
    pub fn is_crlf(&self) -> bool {
        self.line.is_some_and(|line| line.crlf)
    }

    /// 复制当前行内容（不含终止符）到 `dst`，不消费；返回复制的字节数。
    pub fn line_data(&self, dst: &mut [u8]) -> usize {
        let Some(line) = self.line else {
            return 0;
        };
        let n = dst.len().min(line.len);
        self.buffer.read(&mut dst[..n])
    }

    /// 当前行内容的副本。
    pub fn line_bytes(&self) -> Option<Vec<u8>> {
        let line = self.line?;
        let mut out = vec![0u8; line.len];
        let n = self.buffer.read(&mut out);
        out.truncate(n);
        Some(out)
    }

    /// 当前行内容按 UTF-8 宽松解码后的副本。
    pub fn line_string(&self) -> Option<String> {
        self.line_bytes()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// 消费当前行及其终止符，返回消费的字节数。
    ///
    /// 没有当前行但头部有超出预算的已终止行时，丢弃该行；两者都没有时返回 0。
    pub fn seek_line(&mut self) -> usize {
        let Some(line) = self.line.take().or_else(|| self.rejected.take()) else {
            return 0;
        };
        let consumed = self.buffer.seek(line.terminated_len());
        self.scanned = self.scanned.saturating_sub(consumed);
        tracing::trace!(target: "chainbuf::line", consumed, crlf = line.crlf, "consumed line");
        consumed
    }

    /// 经由读取器追加数据，保留扫描进度。
    pub fn append(&mut self, data: &[u8]) -> Result<usize, LineError> {
        Ok(self.buffer.write(data)?)
    }

    /// 只读访问底层缓冲。
    pub fn buffer(&self) -> &B {
        self.buffer
    }

    /// 可变访问底层缓冲；任意修改都可能使扫描结果失效，因此扫描状态被重置。
    pub fn buffer_mut(&mut self) -> &mut B {
        self.scanned = 0;
        self.line = None;
        self.rejected = None;
        self.buffer
    }

    /// 归还底层缓冲的借用。
    pub fn into_inner(self) -> &'a mut B {
        self.buffer
    }

    fn accept(&mut self, newline_at: usize) -> Result<(), LineError> {
        let crlf = newline_at > 0 && {
            let mut previous = [0u8; 1];
            self.buffer.read_at(newline_at - 1, &mut previous) == 1
                && previous[0] == CARRIAGE_RETURN
        };
        let len = newline_at - usize::from(crlf);
        let span = LineSpan { len, crlf };
        if let Some(limit) = self.max_line_len
            && len > limit
        {
            self.rejected = Some(span);
            return Err(self.too_long(limit, len));
        }
        self.scanned = newline_at + 1;
        self.line = Some(span);
        Ok(())
    }

    fn too_long(&self, limit: usize, seen: usize) -> LineError {
        tracing::warn!(target: "chainbuf::line", limit, seen, "line exceeds budget");
        LineError::TooLong { limit, seen }
    }
}

impl<B: FragmentBuffer> std::fmt::Debug for LineReader<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("scanned", &self.scanned)
            .field("line", &self.line)
            .field("rejected", &self.rejected)
            .field("max_line_len", &self.max_line_len)
            .finish()
    }
}
