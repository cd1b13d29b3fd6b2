#![no_main]

use arbitrary::Arbitrary;
use chainbuf::{BufferStrategy, Bytes, FragmentBuffer, HeapBuffer};
use libfuzzer_sys::fuzz_target;

/// Fuzz 指令：两个共享存储的缓冲上的任意编辑序列。
///
/// - **Why**：拆分、合并、写时复制与回退历史的组合路径远多于手写用例，需要让 Fuzzer 穷举；
/// - **How**：每个缓冲配一份 `Vec<u8>` 模型，每步之后比对内容与反向遍历；
/// - **What**：写时复制始终开启，因此缓冲之间的共享不应在模型之外产生任何可见效果。
#[derive(Debug, Arbitrary)]
struct ChainCase {
    page_size: u8,
    fragment_as_target: bool,
    rewind_window: u8,
    ops: Vec<ChainOp>,
}

#[derive(Debug, Arbitrary)]
enum ChainOp {
    Write { id: u8, data: Vec<u8> },
    WriteRef { id: u8, data: Vec<u8> },
    Transfer { from: u8, len: u8 },
    InsertFrom { from: u8, at: u16, len: u8 },
    Insert { id: u8, at: u16, data: Vec<u8> },
    Seek { id: u8, len: u16 },
    Rewind { id: u8, len: u16 },
    Trim { id: u8, len: u16 },
    Overwrite { id: u8, data: Vec<u8> },
}

struct Modeled {
    buffer: HeapBuffer,
    content: Vec<u8>,
    history: Vec<u8>,
}

impl Modeled {
    fn consume(&mut self, n: usize, window: usize) {
        self.history.extend(self.content.drain(..n));
        let excess = self.history.len().saturating_sub(window);
        self.history.drain(..excess);
    }
}

fuzz_target!(|case: ChainCase| {
    let window = usize::from(case.rewind_window);
    let strategy = BufferStrategy::builder()
        .page_size(usize::from(case.page_size).max(1))
        .fragment_as_target(case.fragment_as_target)
        .clone_on_write(true)
        .rewind_window(window)
        .build()
        .expect("page_size >= 1");
    let mut slots: Vec<Modeled> = (0..2)
        .map(|_| Modeled {
            buffer: HeapBuffer::new(strategy.clone()),
            content: Vec::new(),
            history: Vec::new(),
        })
        .collect();

    for op in case.ops {
        match op {
            ChainOp::Write { id, data } => {
                let slot = &mut slots[usize::from(id) % 2];
                let n = slot.buffer.write(&data).expect("heap write");
                assert_eq!(n, data.len());
                slot.content.extend_from_slice(&data);
            }
            ChainOp::WriteRef { id, data } => {
                let slot = &mut slots[usize::from(id) % 2];
                let n = slot.buffer.write_ref(Bytes::from(data.clone())).expect("write_ref");
                assert_eq!(n, data.len());
                slot.content.extend_from_slice(&data);
            }
            ChainOp::Transfer { from, len } => {
                let (src, dst) = pair(&mut slots, from);
                let n = dst.buffer.write_from(&src.buffer, usize::from(len)).expect("transfer");
                assert_eq!(n, usize::from(len).min(src.content.len()));
                dst.content.extend_from_slice(&src.content[..n]);
            }
            ChainOp::InsertFrom { from, at, len } => {
                let (src, dst) = pair(&mut slots, from);
                let at = usize::from(at);
                if at >= dst.content.len() {
                    continue;
                }
                let cursor = dst.buffer.byte_cursor(at).expect("offset in range");
                let n = dst
                    .buffer
                    .insert_from(&cursor.fragment(), cursor.offset(), &src.buffer, usize::from(len))
                    .expect("insert_from");
                assert_eq!(n, usize::from(len).min(src.content.len()));
                let spliced: Vec<u8> = src.content[..n].to_vec();
                dst.content.splice(at..at, spliced);
            }
            ChainOp::Insert { id, at, data } => {
                let slot = &mut slots[usize::from(id) % 2];
                let at = usize::from(at) % (slot.content.len() + 1);
                let n = slot.buffer.insert_at(at, &data).expect("insert_at");
                assert_eq!(n, data.len());
                slot.content.splice(at..at, data);
            }
            ChainOp::Seek { id, len } => {
                let slot = &mut slots[usize::from(id) % 2];
                let n = slot.buffer.seek(usize::from(len));
                assert_eq!(n, usize::from(len).min(slot.content.len()));
                slot.consume(n, window);
            }
            ChainOp::Rewind { id, len } => {
                let slot = &mut slots[usize::from(id) % 2];
                let n = slot.buffer.rewind(usize::from(len));
                assert_eq!(n, usize::from(len).min(slot.history.len()));
                let restored = slot.history.split_off(slot.history.len() - n);
                slot.content.splice(0..0, restored);
            }
            ChainOp::Trim { id, len } => {
                let slot = &mut slots[usize::from(id) % 2];
                let n = slot.buffer.trim(usize::from(len));
                assert_eq!(n, usize::from(len).min(slot.content.len()));
                slot.content.truncate(slot.content.len() - n);
            }
            ChainOp::Overwrite { id, data } => {
                let slot = &mut slots[usize::from(id) % 2];
                let n = slot.buffer.overwrite(&data).expect("overwrite");
                assert_eq!(n, data.len().min(slot.content.len()));
                slot.content[..n].copy_from_slice(&data[..n]);
            }
        }

        for slot in &slots {
            assert_eq!(slot.buffer.data_size(), slot.content.len());
            assert_eq!(slot.buffer.to_vec(), slot.content);
            assert_eq!(slot.buffer.rewindable(), slot.history.len());
            assert!(slot.buffer.bytes().rev().eq(slot.content.iter().rev().copied()));
        }
    }
});

/// 以 `from` 选中的缓冲为源，另一个为目标。
fn pair(slots: &mut [Modeled], from: u8) -> (&Modeled, &mut Modeled) {
    let (left, right) = slots.split_at_mut(1);
    if from % 2 == 0 {
        (&left[0], &mut right[0])
    } else {
        (&right[0], &mut left[0])
    }
}
