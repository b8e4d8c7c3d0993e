use anyhow::Result;

use crate::runtime::Block;
use crate::runtime::BlockMetaBuilder;
use crate::runtime::DataType;
use crate::runtime::Kernel;
use crate::runtime::SampleVec;
use crate::runtime::SignatureBuilder;

/// Pass through the first `n` samples, then end the stream.
pub struct Head {
    remaining: u64,
}

impl Head {
    pub fn new(dtype: DataType, n: u64) -> Block {
        Block::new(
            BlockMetaBuilder::new("Head").build(),
            SignatureBuilder::new()
                .add(&[("in", dtype)], &[("out", dtype)])
                .build(),
            Head { remaining: n },
        )
    }
}

impl Kernel for Head {
    fn process(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let v = &inputs[0];
        let n = (self.remaining as usize).min(v.len());
        self.remaining -= n as u64;
        let stride = v.data_type().size();
        let out = SampleVec::from_bytes(v.data_type(), v.bytes()[..n * stride].to_vec());
        Ok(Some(vec![out]))
    }
}
