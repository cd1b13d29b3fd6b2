//! 分片链缓冲的模型性质验证
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：以 `Vec<u8>` 作为影子模型，验证任意操作序列下缓冲的逻辑内容、`data_size`
//!   与回退窗口都与模型一致；结构编辑（拆分、拼接、回收高水位）不得改变可观测字节。
//! - **设计手法 (How)**：Proptest 同时随机化策略（页大小、写时复制、尾页填充、回退窗口）与操作序列，
//!   每一步之后比对全部内容，一旦失配即可定位到具体步骤。
//!
//! # 合同与边界 (What)
//!
//! - 模型的 `seek` 把字节移入“已消费”队列并只保留最近 `rewind_window` 字节；`rewind` 从队尾恢复；
//! - `trim`、`insert`、`overwrite` 不影响已消费队列；
//! - 引用式写入在模型中等价于复制写入。

use chainbuf::{Bytes, BufferStrategy, FragmentBuffer, HeapBuffer};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Write(Vec<u8>),
    WriteRef(Vec<u8>),
    Insert(usize, Vec<u8>),
    Overwrite(Vec<u8>),
    Seek(usize),
    Rewind(usize),
    Trim(usize),
}

#[derive(Default)]
struct Model {
    data: Vec<u8>,
    consumed: Vec<u8>,
    window: usize,
}

impl Model {
    fn apply(&mut self, op: &Op) {
        match op {
            Op::Write(bytes) | Op::WriteRef(bytes) => self.data.extend_from_slice(bytes),
            Op::Insert(at, bytes) => {
                let at = at % (self.data.len() + 1);
                self.data.splice(at..at, bytes.iter().copied());
            }
            Op::Overwrite(bytes) => {
                let n = bytes.len().min(self.data.len());
                self.data[..n].copy_from_slice(&bytes[..n]);
            }
            Op::Seek(len) => {
                let n = (*len).min(self.data.len());
                self.consumed.extend(self.data.drain(..n));
                let excess = self.consumed.len().saturating_sub(self.window);
                self.consumed.drain(..excess);
            }
            Op::Rewind(len) => {
                let n = (*len).min(self.consumed.len());
                let restored = self.consumed.split_off(self.consumed.len() - n);
                self.data.splice(0..0, restored);
            }
            Op::Trim(len) => {
                let n = (*len).min(self.data.len());
                self.data.truncate(self.data.len() - n);
            }
        }
    }
}

fn payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..40)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        payload().prop_map(Op::Write),
        payload().prop_map(Op::WriteRef),
        (any::<usize>(), payload()).prop_map(|(at, bytes)| Op::Insert(at, bytes)),
        payload().prop_map(Op::Overwrite),
        (0usize..48).prop_map(Op::Seek),
        (0usize..48).prop_map(Op::Rewind),
        (0usize..48).prop_map(Op::Trim),
    ]
}

fn strategy() -> impl Strategy<Value = BufferStrategy> {
    (1usize..17, any::<bool>(), any::<bool>(), 0usize..33).prop_map(
        |(page_size, clone_on_write, fragment_as_target, window)| {
            BufferStrategy::builder()
                .page_size(page_size)
                .clone_on_write(clone_on_write)
                .fragment_as_target(fragment_as_target)
                .rewind_window(window)
                .build()
                .expect("生成的策略必然合法")
        },
    )
}

fn apply(buffer: &mut HeapBuffer, op: &Op) {
    match op {
        Op::Write(bytes) => {
            buffer.write(bytes).expect("无页上限时写入不会失败");
        }
        Op::WriteRef(bytes) => {
            buffer
                .write_ref(Bytes::copy_from_slice(bytes))
                .expect("引用写入不分配页");
        }
        Op::Insert(at, bytes) => {
            let at = at % (buffer.data_size() + 1);
            buffer.insert_at(at, bytes).expect("偏移已取模");
        }
        Op::Overwrite(bytes) => {
            buffer.overwrite(bytes).expect("覆盖");
        }
        Op::Seek(len) => {
            buffer.seek(*len);
        }
        Op::Rewind(len) => {
            buffer.rewind(*len);
        }
        Op::Trim(len) => {
            buffer.trim(*len);
        }
    }
}

proptest! {
    #[test]
    fn prop_random_edits_match_vec_model(
        strategy in strategy(),
        ops in proptest::collection::vec(op(), 1..48),
    ) {
        let mut model = Model { window: strategy.rewind_window(), ..Model::default() };
        let mut buffer = HeapBuffer::new(strategy);
        for (step, op) in ops.iter().enumerate() {
            apply(&mut buffer, op);
            model.apply(op);
            prop_assert_eq!(buffer.data_size(), model.data.len(), "step {} {:?}", step, op);
            prop_assert_eq!(buffer.to_vec(), model.data.clone(), "step {} {:?}", step, op);
            prop_assert_eq!(buffer.rewindable(), model.consumed.len(), "step {} {:?}", step, op);
        }
        let reversed: Vec<u8> = buffer.bytes().rev().collect();
        let mut expected = model.data.clone();
        expected.reverse();
        prop_assert_eq!(reversed, expected);
    }

    #[test]
    fn prop_insert_keeps_prefix_and_suffix(
        base in proptest::collection::vec(any::<u8>(), 0..64),
        insert in proptest::collection::vec(any::<u8>(), 1..24),
        at in any::<usize>(),
        page_size in 1usize..9,
    ) {
        let mut buffer = HeapBuffer::new(
            BufferStrategy::builder().page_size(page_size).build().expect("策略合法"),
        );
        buffer.write(&base).expect("写入");
        let at = at % (base.len() + 1);
        prop_assert_eq!(buffer.insert_at(at, &insert).expect("插入"), insert.len());
        let content = buffer.to_vec();
        prop_assert_eq!(content.len(), base.len() + insert.len());
        prop_assert_eq!(&content[..at], &base[..at]);
        prop_assert_eq!(&content[at..at + insert.len()], &insert[..]);
        prop_assert_eq!(&content[at + insert.len()..], &base[at..]);
    }

    #[test]
    fn prop_cow_transfer_isolates_sharers(
        base in proptest::collection::vec(any::<u8>(), 1..64),
        patch in proptest::collection::vec(any::<u8>(), 1..64),
        share in 1usize..64,
        page_size in 1usize..9,
    ) {
        let strategy = BufferStrategy::builder().page_size(page_size).build().expect("策略合法");
        let mut source = HeapBuffer::new(strategy.clone());
        source.write(&base).expect("写入");
        let mut target = HeapBuffer::new(strategy);
        let moved = target.write_from(&source, share).expect("转移");
        prop_assert_eq!(moved, share.min(base.len()));

        source.overwrite(&patch).expect("覆盖源");
        prop_assert_eq!(target.to_vec(), base[..moved].to_vec());

        target.overwrite(&patch).expect("覆盖目标");
        let mut expected_source = base.clone();
        let n = patch.len().min(base.len());
        expected_source[..n].copy_from_slice(&patch[..n]);
        prop_assert_eq!(source.to_vec(), expected_source);
    }
}
