use anyhow::Result;

use crate::runtime::Block;
use crate::runtime::BlockMetaBuilder;
use crate::runtime::Kernel;
use crate::runtime::SampleVec;
use crate::runtime::SignatureBuilder;

// bounded per-tick production keeps the cooperative driver from filling a
// pipe inside a single tick
const CHUNK: usize = 2048;

/// Finite source: emits a fixed vector of samples, then EOF.
pub struct VectorSource {
    data: SampleVec,
    pos: usize,
    rate: f64,
}

impl VectorSource {
    pub fn new(data: SampleVec, rate: f64) -> Block {
        let dtype = data.data_type();
        Block::new(
            BlockMetaBuilder::new("VectorSource").build(),
            SignatureBuilder::new().add(&[], &[("out", dtype)]).build(),
            VectorSource { data, pos: 0, rate },
        )
    }
}

impl Kernel for VectorSource {
    fn process(&mut self, _inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let n = CHUNK.min(self.data.len() - self.pos);
        let stride = self.data.data_type().size();
        let bytes = self.data.bytes()[self.pos * stride..(self.pos + n) * stride].to_vec();
        self.pos += n;
        Ok(Some(vec![SampleVec::from_bytes(
            self.data.data_type(),
            bytes,
        )]))
    }

    fn rate(&self, _input_rate: Option<f64>) -> Option<f64> {
        Some(self.rate)
    }
}
