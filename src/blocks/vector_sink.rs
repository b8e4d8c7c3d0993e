use anyhow::Result;

use crate::runtime::Block;
use crate::runtime::BlockMetaBuilder;
use crate::runtime::DataType;
use crate::runtime::Kernel;
use crate::runtime::SampleVec;
use crate::runtime::SignatureBuilder;

/// Store received samples for inspection after the run.
pub struct VectorSink {
    items: SampleVec,
}

impl VectorSink {
    pub fn new(dtype: DataType) -> Block {
        Block::new(
            BlockMetaBuilder::new("VectorSink").build(),
            SignatureBuilder::new().add(&[("in", dtype)], &[]).build(),
            VectorSink {
                items: SampleVec::new(dtype),
            },
        )
    }

    /// Get received items
    pub fn samples(&self) -> &SampleVec {
        &self.items
    }
}

impl Kernel for VectorSink {
    fn process(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        self.items.extend(&inputs[0]);
        Ok(Some(vec![]))
    }
}
