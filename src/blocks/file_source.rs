use anyhow::Context;
use anyhow::Result;
use std::fs::File;
use std::io::Read;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use crate::runtime::Block;
use crate::runtime::BlockMetaBuilder;
use crate::runtime::DataType;
use crate::runtime::Kernel;
use crate::runtime::SampleVec;
use crate::runtime::SignatureBuilder;

const CHUNK: usize = 8192;

/// Read raw samples from a file, then EOF.
///
/// The file is opened during initialization, before the multiprocess driver
/// forks; the descriptor is declared through [Kernel::files] so the child's
/// fd sweep preserves it.
pub struct FileSource {
    path: PathBuf,
    dtype: DataType,
    rate: f64,
    file: Option<File>,
    pending: Vec<u8>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, dtype: DataType, rate: f64) -> Block {
        Block::new(
            BlockMetaBuilder::new("FileSource").build(),
            SignatureBuilder::new().add(&[], &[("out", dtype)]).build(),
            FileSource {
                path: path.into(),
                dtype,
                rate,
                file: None,
                pending: Vec::new(),
            },
        )
    }
}

impl Kernel for FileSource {
    fn init(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        self.file = Some(file);
        Ok(())
    }

    fn process(&mut self, _inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        let file = self.file.as_mut().context("file not opened")?;
        let mut buf = [0u8; CHUNK];
        let n = file.read(&mut buf)?;
        self.pending.extend_from_slice(&buf[..n]);

        let stride = self.dtype.size();
        let complete = self.pending.len() / stride * stride;
        if n == 0 {
            if !self.pending.is_empty() {
                warn!("{} trailing bytes do not form a sample", self.pending.len());
            }
            return Ok(None);
        }
        let bytes: Vec<u8> = self.pending.drain(..complete).collect();
        Ok(Some(vec![SampleVec::from_bytes(self.dtype, bytes)]))
    }

    fn rate(&self, _input_rate: Option<f64>) -> Option<f64> {
        Some(self.rate)
    }

    fn files(&self) -> Vec<RawFd> {
        self.file.iter().map(|f| f.as_raw_fd()).collect()
    }

    fn deinit(&mut self) -> Result<()> {
        self.file.take();
        Ok(())
    }
}
