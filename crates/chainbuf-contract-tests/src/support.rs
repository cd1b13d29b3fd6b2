use std::fmt::Write;
use std::panic;

use chainbuf::{Backing, ChainBuffer, FragmentBuffer};

/// 在附加上下文的情况下重新抛出 panic。
///
/// # 教案式说明
/// - **意图 (Why)**：`case::run_suite` 捕获 panic 后，需要在原始 payload 之上追加“工厂/套件/用例”描述，
///   帮助调试者快速定位是哪一种策略组合失败；
/// - **逻辑 (How)**：尝试将 payload 解析为 `&str` / `String`，格式化后通过 [`panic::resume_unwind`] 重新抛出；
/// - **契约 (What)**：必须在 `catch_unwind` 的错误分支中调用，函数不会正常返回。
pub fn panic_with_context(
    factory: &str,
    suite: &str,
    case: &str,
    payload: Box<dyn std::any::Any + Send>,
) -> ! {
    let mut message = String::new();
    let _ = write!(&mut message, "[chainbuf-tck::{factory}::{suite}::{case}] 测试失败：");

    if let Some(text) = payload.downcast_ref::<&str>() {
        let _ = write!(&mut message, "{text}");
    } else if let Some(text) = payload.downcast_ref::<String>() {
        let _ = write!(&mut message, "{text}");
    } else {
        let _ = write!(&mut message, "<未知 panic 类型>");
    }

    panic::resume_unwind(Box::new(message));
}

/// 小写字母表，场景用例的基准内容。
pub const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// 生成长度为 `len` 的可辨识字节序列。
pub fn pattern(len: usize, salt: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(salt))
        .collect()
}

/// 以多次写入构造内容，使缓冲尽量呈现多分片形态。
pub fn write_in_pieces<B: Backing>(buffer: &mut ChainBuffer<B>, data: &[u8], piece: usize) {
    for chunk in data.chunks(piece.max(1)) {
        let written = buffer.write(chunk).expect("写入不应失败");
        assert_eq!(written, chunk.len());
    }
}
