//! 随机操作轨迹与内容摘要。
//!
//! # 教案式说明
//! - **意图 (Why)**：写时复制、尾页填充与零拷贝转移只改变“字节放在哪里”，不应改变
//!   “逻辑上读到什么”；同一条随机轨迹在任意策略组合和后端上必须产出相同摘要；
//! - **逻辑 (How)**：以种子驱动 [`StdRng`] 生成写入、引用写入、转移、读取消费与覆盖；
//!   读取消费的字节与最终剩余内容依次送入 SHA-256；
//! - **契约 (What)**：随机数的消耗顺序与缓冲状态无关；被策略拒绝的引用写入退化为普通写入，
//!   因此映射后端与堆后端走过的是同一条逻辑轨迹。

use chainbuf::{Bytes, FragmentBuffer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::factory::BufferFactory;
use crate::sharing::heap_source;

/// 单步写入的最大长度。
pub const MAX_CHUNK: usize = 1500;

/// 单步读取消费的最大长度。
pub const MAX_CONSUME: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Write,
    WriteRef,
    Transfer,
    Consume,
    Overwrite,
}

impl Step {
    fn pick(rng: &mut StdRng) -> Self {
        match rng.random_range(0..5u8) {
            0 => Self::Write,
            1 => Self::WriteRef,
            2 => Self::Transfer,
            3 => Self::Consume,
            _ => Self::Overwrite,
        }
    }
}

fn payload(rng: &mut StdRng) -> Vec<u8> {
    let mut data = vec![0u8; rng.random_range(1..=MAX_CHUNK)];
    rng.fill(&mut data[..]);
    data
}

/// 在 `factory` 产出的缓冲上运行 `steps` 步随机轨迹，返回十六进制 SHA-256 摘要。
///
/// 摘要覆盖每次读取消费的字节以及轨迹结束时缓冲中剩余的全部字节。
pub fn trace_digest<F: BufferFactory>(factory: &F, seed: u64, steps: usize) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut hasher = Sha256::new();
    let mut buffer = factory.make();
    let mut source = heap_source(factory.strategy());
    let mut scratch = vec![0u8; MAX_CONSUME];

    for _ in 0..steps {
        match Step::pick(&mut rng) {
            Step::Write => {
                let data = payload(&mut rng);
                let n = buffer.write(&data).expect("轨迹写入");
                assert_eq!(n, data.len());
            }
            Step::WriteRef => {
                let data = payload(&mut rng);
                let n = buffer
                    .write_ref(Bytes::from(data.clone()))
                    .expect("轨迹引用写入");
                if n == 0 {
                    buffer.write(&data).expect("引用写入退化为复制");
                }
            }
            Step::Transfer => {
                let data = payload(&mut rng);
                source.write(&data).expect("写入源");
                let n = buffer.write_from(&source, data.len()).expect("轨迹转移");
                assert_eq!(n, data.len());
                source.seek(n);
            }
            Step::Consume => {
                let want = rng.random_range(0..=MAX_CONSUME);
                let n = buffer.read(&mut scratch[..want]);
                hasher.update(&scratch[..n]);
                assert_eq!(buffer.seek(n), n);
            }
            Step::Overwrite => {
                let data = payload(&mut rng);
                let size = buffer.data_size();
                buffer.overwrite(&data).expect("轨迹覆盖");
                assert_eq!(buffer.data_size(), size);
            }
        }
    }

    hasher.update(buffer.to_vec());
    hasher.update((buffer.data_size() as u64).to_le_bytes());
    hex::encode(hasher.finalize())
}
