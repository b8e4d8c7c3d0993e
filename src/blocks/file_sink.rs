use anyhow::Context;
use anyhow::Result;
use std::fs::File;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use crate::runtime::Block;
use crate::runtime::BlockMetaBuilder;
use crate::runtime::DataType;
use crate::runtime::Kernel;
use crate::runtime::SampleVec;
use crate::runtime::SignatureBuilder;

/// Write raw sample bytes to a file.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, dtype: DataType) -> Block {
        Block::new(
            BlockMetaBuilder::new("FileSink").build(),
            SignatureBuilder::new().add(&[("in", dtype)], &[]).build(),
            FileSink {
                path: path.into(),
                file: None,
            },
        )
    }
}

impl Kernel for FileSink {
    fn init(&mut self) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("creating {}", self.path.display()))?;
        self.file = Some(file);
        Ok(())
    }

    fn process(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        let file = self.file.as_mut().context("file not opened")?;
        file.write_all(inputs[0].bytes())?;
        Ok(Some(vec![]))
    }

    fn files(&self) -> Vec<RawFd> {
        self.file.iter().map(|f| f.as_raw_fd()).collect()
    }

    fn deinit(&mut self) -> Result<()> {
        if let Some(mut f) = self.file.take() {
            f.flush()?;
        }
        Ok(())
    }
}
