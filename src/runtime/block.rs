use anyhow::Result;
use std::any::Any;
use std::os::unix::io::RawFd;

use crate::runtime::BlockMeta;
use crate::runtime::DataType;
use crate::runtime::Error;
use crate::runtime::SampleVec;
use crate::runtime::StreamInput;
use crate::runtime::StreamIo;
use crate::runtime::StreamOutput;
use crate::runtime::TypeSignature;
use crate::runtime::WorkResult;

/// The per-kernel capability set the engine consumes.
///
/// A kernel never touches ports or pipes. The framework reads an equal
/// number of samples from every input, hands them to [process](Kernel::process)
/// and duplicates the returned vectors across each output's fan-out.
pub trait Kernel: Send + Any {
    /// One-shot setup after differentiation.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Process one batch of aligned input vectors.
    ///
    /// Sources are called with an empty slice. Returning `None` ends the
    /// stream: the framework closes the output pipes and the EOF cascades
    /// downstream. Returning vectors with zero samples is an idle tick.
    fn process(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>>;

    /// Output sample rate, derived from the input rate.
    ///
    /// The default is rate-preserving. Interpolators and decimators scale;
    /// sources ignore the argument (`None`) and return their intrinsic rate.
    fn rate(&self, input_rate: Option<f64>) -> Option<f64> {
        input_rate
    }

    /// Auxiliary descriptors that must survive the multiprocess fd sweep,
    /// e.g. a file opened before start.
    fn files(&self) -> Vec<RawFd> {
        Vec::new()
    }

    /// Release resources. Called exactly once after the graph stops.
    fn deinit(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A processing unit of the flowgraph: metadata, declared type signatures,
/// stream ports and the kernel doing the work.
pub struct Block {
    meta: BlockMeta,
    signatures: Vec<TypeSignature>,
    chosen: Option<usize>,
    sio: StreamIo,
    kernel: Box<dyn Kernel>,
}

impl Block {
    /// Wrap a kernel. Port shells are derived from the signature set; every
    /// signature of one block must declare the same port names.
    pub fn new(
        meta: BlockMeta,
        signatures: Vec<TypeSignature>,
        kernel: impl Kernel + 'static,
    ) -> Block {
        assert!(!signatures.is_empty(), "block declares no signatures");
        let first = &signatures[0];
        for sig in signatures.iter().skip(1) {
            let same_inputs = sig.inputs().len() == first.inputs().len()
                && sig
                    .inputs()
                    .iter()
                    .zip(first.inputs())
                    .all(|(a, b)| a.name() == b.name());
            let same_outputs = sig.outputs().len() == first.outputs().len()
                && sig
                    .outputs()
                    .iter()
                    .zip(first.outputs())
                    .all(|(a, b)| a.name() == b.name());
            assert!(
                same_inputs && same_outputs,
                "signatures of {} disagree on port names",
                meta.type_name()
            );
        }

        let inputs = first
            .inputs()
            .iter()
            .map(|p| StreamInput::new(p.name()))
            .collect();
        let outputs = first
            .outputs()
            .iter()
            .map(|p| StreamOutput::new(p.name()))
            .collect();

        Block {
            meta,
            signatures,
            chosen: None,
            sio: StreamIo::new(inputs, outputs),
            kernel: Box::new(kernel),
        }
    }

    /// Get instance name (see [`BlockMeta::instance_name`])
    pub fn instance_name(&self) -> Option<&str> {
        self.meta.instance_name()
    }

    /// Set instance name (see [`BlockMeta::set_instance_name`])
    pub fn set_instance_name(&mut self, name: impl Into<String>) {
        self.meta.set_instance_name(name)
    }

    /// Get type name (see [`BlockMeta::type_name`])
    pub fn type_name(&self) -> &str {
        self.meta.type_name()
    }

    /// Instance name if set, type name otherwise. Used in diagnostics.
    pub fn name(&self) -> &str {
        self.meta.instance_name().unwrap_or_else(|| self.type_name())
    }

    /// Try to cast to a given kernel type
    pub fn kernel<K: Kernel>(&self) -> Option<&K> {
        (self.kernel.as_ref() as &dyn Any).downcast_ref::<K>()
    }

    /// Declared signature set.
    pub fn type_signatures(&self) -> &[TypeSignature] {
        &self.signatures
    }

    /// The signature picked at graph start.
    pub fn chosen_signature(&self) -> Option<&TypeSignature> {
        self.chosen.map(|i| &self.signatures[i])
    }

    pub fn sio(&self) -> &StreamIo {
        &self.sio
    }

    pub(crate) fn sio_mut(&mut self) -> &mut StreamIo {
        &mut self.sio
    }

    /// A block without inputs is a source.
    pub fn is_source(&self) -> bool {
        self.sio.inputs().is_empty()
    }

    /// Pick the first declared signature whose input types equal
    /// `input_types` pointwise and propagate its output types to the ports.
    pub fn differentiate(&mut self, input_types: &[DataType]) -> Result<(), Error> {
        let Some(idx) = self
            .signatures
            .iter()
            .position(|s| s.matches_inputs(input_types))
        else {
            return Err(Error::TypeMismatch {
                block: self.name().to_string(),
                msg: format!("no signature accepts input types {:?}", input_types),
            });
        };

        self.chosen = Some(idx);
        let out_types: Vec<DataType> = self.signatures[idx]
            .outputs()
            .iter()
            .map(|p| p.data_type())
            .collect();
        for (port, dtype) in self.sio.outputs_mut().iter_mut().zip(out_types) {
            port.set_data_type(dtype);
        }
        debug!(
            "{}: differentiated to signature {} ({:?} -> {:?})",
            self.name(),
            idx,
            input_types,
            self.signatures[idx]
                .outputs()
                .iter()
                .map(|p| p.data_type())
                .collect::<Vec<_>>()
        );
        Ok(())
    }

    /// Resolved data type of output port `id`.
    pub fn output_type(&self, id: usize) -> Option<DataType> {
        self.chosen_signature().map(|s| s.outputs()[id].data_type())
    }

    pub(crate) fn derive_rate(&self, input_rate: Option<f64>) -> Option<f64> {
        self.kernel.rate(input_rate)
    }

    pub(crate) fn set_output_rate(&mut self, rate: f64) {
        for port in self.sio.outputs_mut().iter_mut() {
            port.set_rate(rate);
        }
    }

    /// Every descriptor a forked child must preserve: bound pipe ends plus
    /// the kernel's auxiliary files.
    pub fn files(&self) -> Vec<RawFd> {
        let mut fds = self.sio.filenos();
        fds.extend(self.kernel.files());
        fds
    }

    pub(crate) fn init(&mut self) -> Result<(), Error> {
        debug!("{}: initialize", self.name());
        self.kernel.init().map_err(|e| Error::BlockRuntime {
            block: self.name().to_string(),
            msg: format!("init failed: {e}"),
        })
    }

    pub(crate) fn deinit(&mut self) -> Result<(), Error> {
        debug!("{}: cleanup", self.name());
        self.kernel.deinit().map_err(|e| Error::BlockRuntime {
            block: self.name().to_string(),
            msg: format!("cleanup failed: {e}"),
        })
    }

    /// One cooperative tick.
    ///
    /// With `blocking` set, pipe reads suspend until the upstream writer
    /// produces or closes; the cooperative driver passes `false` and treats
    /// an empty tick as [WorkResult::Idle].
    pub(crate) fn run_once(&mut self, blocking: bool) -> Result<WorkResult, Error> {
        if self.is_source() {
            return match self.call_kernel(&[])? {
                None => {
                    self.close_outputs();
                    Ok(WorkResult::Eof)
                }
                Some(vs) => self.write_outputs(vs),
            };
        }

        // make samples visible on every input
        for input in self.sio.inputs_mut().iter_mut() {
            let reader = input.reader_mut().expect("input not connected");
            if blocking {
                while reader.available() == 0 && !reader.at_eof() {
                    reader.fill()?;
                }
            } else {
                reader.fill_available()?;
            }
        }

        // an exhausted input means this block can never produce again
        if self
            .sio
            .inputs()
            .iter()
            .any(|i| i.reader().expect("input not connected").at_eof())
        {
            self.close_outputs();
            return Ok(WorkResult::Eof);
        }

        let n = self
            .sio
            .inputs()
            .iter()
            .map(|i| i.reader().expect("input not connected").available())
            .min()
            .unwrap_or(0);
        if n == 0 {
            return Ok(WorkResult::Idle);
        }

        let vecs: Vec<SampleVec> = self
            .sio
            .inputs_mut()
            .iter_mut()
            .map(|i| i.reader_mut().expect("input not connected").read(n))
            .collect();

        match self.call_kernel(&vecs)? {
            None => {
                self.close_outputs();
                Ok(WorkResult::Eof)
            }
            Some(vs) => self.write_outputs(vs),
        }
    }

    /// Process-mode driver entry: tick with blocking reads until EOF.
    pub(crate) fn run(&mut self) -> Result<(), Error> {
        loop {
            if let WorkResult::Eof = self.run_once(true)? {
                return Ok(());
            }
        }
    }

    fn call_kernel(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>, Error> {
        let name = self.name().to_string();
        self.kernel
            .process(inputs)
            .map_err(|e| Error::BlockRuntime {
                block: name,
                msg: e.to_string(),
            })
    }

    fn write_outputs(&mut self, vs: Vec<SampleVec>) -> Result<WorkResult, Error> {
        debug_assert_eq!(vs.len(), self.sio.outputs().len());
        let produced = self.sio.outputs().is_empty() || vs.iter().any(|v| !v.is_empty());
        for (id, v) in vs.iter().enumerate() {
            if v.is_empty() {
                continue;
            }
            match self.sio.output_mut(id).write(v) {
                Ok(()) => {}
                // every reader is gone; our output can never be observed
                Err(Error::Transport(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    self.close_outputs();
                    return Ok(WorkResult::Eof);
                }
                Err(e) => return Err(e),
            }
        }
        if produced {
            Ok(WorkResult::Produced)
        } else {
            Ok(WorkResult::Idle)
        }
    }

    fn close_outputs(&mut self) {
        for port in self.sio.outputs_mut().iter_mut() {
            port.close();
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("type_name", &self.type_name())
            .field("instance_name", &self.instance_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::BlockMetaBuilder;
    use crate::runtime::SignatureBuilder;
    use crate::runtime::COMPLEX_FLOAT32;
    use crate::runtime::FLOAT32;

    struct NopKernel;

    impl Kernel for NopKernel {
        fn process(&mut self, _inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
            Ok(Some(vec![]))
        }
    }

    fn dual_signature_block() -> Block {
        Block::new(
            BlockMetaBuilder::new("Dual").build(),
            SignatureBuilder::new()
                .add(
                    &[("in1", COMPLEX_FLOAT32), ("in2", COMPLEX_FLOAT32)],
                    &[("out", COMPLEX_FLOAT32)],
                )
                .add(&[("in1", FLOAT32), ("in2", FLOAT32)], &[("out", FLOAT32)])
                .build(),
            NopKernel,
        )
    }

    #[test]
    fn differentiate_selects_matching_signature() {
        let mut b = dual_signature_block();
        b.differentiate(&[FLOAT32, FLOAT32]).unwrap();
        assert_eq!(b.output_type(0), Some(FLOAT32));
        assert_eq!(b.sio().output(0).data_type(), Some(FLOAT32));

        let mut b = dual_signature_block();
        b.differentiate(&[COMPLEX_FLOAT32, COMPLEX_FLOAT32]).unwrap();
        assert_eq!(b.output_type(0), Some(COMPLEX_FLOAT32));
    }

    #[test]
    fn differentiate_rejects_unknown_types() {
        let mut b = dual_signature_block();
        let err = b.differentiate(&[COMPLEX_FLOAT32, FLOAT32]).unwrap_err();
        match err {
            Error::TypeMismatch { block, .. } => assert_eq!(block, "Dual"),
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn port_shells_follow_signature_names() {
        let b = dual_signature_block();
        assert_eq!(b.sio().input_name_to_id("in2"), Some(1));
        assert_eq!(b.sio().output_name_to_id("out"), Some(0));
        assert!(b.sio().output_name_to_id("nope").is_none());
        assert!(!b.is_source());
    }
}
