//! chainbuf 契约测试套件（TCK）入口。
//!
//! # 教案式综述（Why / How / What）
//! - **为什么存在**：堆分页缓冲、映射文件缓冲以及每一种策略组合都必须满足同一份操作契约；
//!   把断言集中在本 crate，任何后端或策略只需提供一个 [`BufferFactory`] 即可一键回归。
//! - **如何集成**：在 `tests/` 目录中构造工厂并调用 [`run_all`] 或单个 `run_*_suite`；
//!   随机轨迹驱动 [`trace::trace_digest`] 输出内容摘要，用于跨策略、跨后端比对。
//! - **测试对象**：编辑（写入/插入/截尾/覆盖/回退）、共享（零拷贝转移与写时复制）、
//!   遍历（游标与双向字节迭代）、能力标志（被拒绝的操作为确定性空操作）。
//!
//! # 契约说明（What）
//! - 每个用例都会读取工厂策略的能力标志：被拒绝的操作断言“返回 0 且状态不变”，
//!   其余操作断言完整语义，因此同一套用例可以覆盖所有后端；
//! - 随机数据生成与摘要计算只存在于本 crate，引擎本身不依赖它们。
//!
//! # 模块结构
//! - `case`：用例与套件的元信息及统一执行入口；
//! - `factory`：工厂抽象与堆分页、映射文件两种实现；
//! - `editing`/`sharing`/`traversal`/`capability`：四个主题的断言逻辑；
//! - `trace`：随机操作轨迹与 SHA-256 摘要。

mod capability;
mod editing;
mod factory;
mod sharing;
mod support;
pub mod trace;
mod traversal;

pub use case::{TckCase, TckSuite, run_suite};
pub use factory::{BufferFactory, HeapFactory, MmapFactory, strategy_matrix};

mod case {
    use super::support;
    use std::panic;

    /// 表示单个 TCK 用例的元信息。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：以结构体封装测试函数与名称，便于统一遍历并在失败时打印上下文；
    /// - **逻辑 (How)**：`test` 以工厂为参数，同一用例可被不同后端实例化；
    /// - **契约 (What)**：`test` 必须在失败时 `panic`；名称会用于错误提示。
    pub struct TckCase<F> {
        /// 用例的人类可读名称。
        pub name: &'static str,
        /// 实际执行的断言逻辑。
        pub test: fn(&F),
    }

    /// 同一主题的一组用例。
    pub struct TckSuite<F> {
        /// 套件名称，供日志使用。
        pub name: &'static str,
        /// 归属该套件的用例集合。
        pub cases: Vec<TckCase<F>>,
    }

    /// 在捕获 panic 的前提下执行整个套件。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：一旦用例失败即附加“工厂/套件/用例”上下文后重新 panic；
    /// - **逻辑 (How)**：遍历 `cases`，借助 [`panic::catch_unwind`] 捕获 panic，交给
    ///   `support::panic_with_context` 二次抛出；
    /// - **契约 (What)**：`suite.cases` 不可为空；全部成功时正常返回。
    pub fn run_suite<F: super::BufferFactory>(factory: &F, suite: &TckSuite<F>) {
        assert!(!suite.cases.is_empty(), "TCK 套件不应为空");
        for case in &suite.cases {
            let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| (case.test)(factory)));
            if let Err(payload) = outcome {
                support::panic_with_context(&factory.label(), suite.name, case.name, payload);
            }
        }
    }
}

/// 返回给定工厂可运行的全部套件。
pub fn all_suites<F: BufferFactory>() -> Vec<TckSuite<F>> {
    vec![
        editing::suite(),
        sharing::suite(),
        traversal::suite(),
        capability::suite(),
    ]
}

/// 依次运行全部套件。
pub fn run_all<F: BufferFactory>(factory: &F) {
    for suite in all_suites::<F>() {
        run_suite(factory, &suite);
    }
}

/// 运行“编辑”主题：写读往返、插入、截尾、覆盖、回退与清空。
pub fn run_editing_suite<F: BufferFactory>(factory: &F) {
    run_suite(factory, &editing::suite());
}

/// 运行“共享”主题：零拷贝转移、写时复制隔离与引用式写入。
pub fn run_sharing_suite<F: BufferFactory>(factory: &F) {
    run_suite(factory, &sharing::suite());
}

/// 运行“遍历”主题：分片游标、双向字节遍历与游标失效检查。
pub fn run_traversal_suite<F: BufferFactory>(factory: &F) {
    run_suite(factory, &traversal::suite());
}

/// 运行“能力标志”主题：被拒绝的操作必须是确定性的空操作。
pub fn run_capability_suite<F: BufferFactory>(factory: &F) {
    run_suite(factory, &capability::suite());
}
