use anyhow::Result;

use crate::runtime::Block;
use crate::runtime::BlockMetaBuilder;
use crate::runtime::DataType;
use crate::runtime::Kernel;
use crate::runtime::SampleVec;
use crate::runtime::SignatureBuilder;

/// Drop all received samples, counting them.
pub struct NullSink {
    n_received: usize,
}

impl NullSink {
    pub fn new(dtype: DataType) -> Block {
        Block::new(
            BlockMetaBuilder::new("NullSink").build(),
            SignatureBuilder::new().add(&[("in", dtype)], &[]).build(),
            NullSink { n_received: 0 },
        )
    }

    pub fn n_received(&self) -> usize {
        self.n_received
    }
}

impl Kernel for NullSink {
    fn process(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        self.n_received += inputs[0].len();
        Ok(Some(vec![]))
    }
}
