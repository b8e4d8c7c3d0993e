use anyhow::bail;
use anyhow::Result;
use num_complex::Complex32;

use crate::runtime::Block;
use crate::runtime::BlockMetaBuilder;
use crate::runtime::Kernel;
use crate::runtime::SampleVec;
use crate::runtime::SignatureBuilder;
use crate::runtime::COMPLEX_FLOAT32;
use crate::runtime::FLOAT32;

/// Elementwise product of two streams, complex or real.
pub struct Multiply;

impl Multiply {
    pub fn new() -> Block {
        Block::new(
            BlockMetaBuilder::new("Multiply").build(),
            SignatureBuilder::new()
                .add(
                    &[("in1", COMPLEX_FLOAT32), ("in2", COMPLEX_FLOAT32)],
                    &[("out", COMPLEX_FLOAT32)],
                )
                .add(&[("in1", FLOAT32), ("in2", FLOAT32)], &[("out", FLOAT32)])
                .build(),
            Multiply,
        )
    }
}

impl Kernel for Multiply {
    fn process(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        debug_assert_eq!(inputs[0].len(), inputs[1].len());
        let dtype = inputs[0].data_type();
        let out = if dtype == COMPLEX_FLOAT32 {
            let a = inputs[0].slice::<Complex32>();
            let b = inputs[1].slice::<Complex32>();
            let v: Vec<Complex32> = a.iter().zip(b.iter()).map(|(x, y)| x * y).collect();
            SampleVec::from_slice(dtype, &v)
        } else if dtype == FLOAT32 {
            let a = inputs[0].slice::<f32>();
            let b = inputs[1].slice::<f32>();
            let v: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| x * y).collect();
            SampleVec::from_slice(dtype, &v)
        } else {
            bail!("unsupported data type {:?}", dtype);
        };
        Ok(Some(vec![out]))
    }
}
