use anyhow::Result;

use crate::runtime::Block;
use crate::runtime::BlockMetaBuilder;
use crate::runtime::Kernel;
use crate::runtime::SampleVec;
use crate::runtime::SignatureBuilder;
use crate::runtime::FLOAT32;

/// Apply a function on every sample.
pub struct Apply<F>
where
    F: FnMut(f32) -> f32 + Send + 'static,
{
    f: F,
}

impl<F> Apply<F>
where
    F: FnMut(f32) -> f32 + Send + 'static,
{
    pub fn new(f: F) -> Block {
        Block::new(
            BlockMetaBuilder::new("Apply").build(),
            SignatureBuilder::new()
                .add(&[("in", FLOAT32)], &[("out", FLOAT32)])
                .build(),
            Apply { f },
        )
    }
}

impl<F> Kernel for Apply<F>
where
    F: FnMut(f32) -> f32 + Send + 'static,
{
    fn process(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        let v: Vec<f32> = inputs[0].slice::<f32>().iter().map(|x| (self.f)(*x)).collect();
        Ok(Some(vec![SampleVec::from_slice(FLOAT32, &v)]))
    }
}
