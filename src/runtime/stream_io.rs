use std::os::unix::io::RawFd;

use crate::runtime::DataType;
use crate::runtime::Error;
use crate::runtime::PipeReader;
use crate::runtime::PipeWriter;
use crate::runtime::SampleVec;

/// One named, typed port slot of a type signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    name: String,
    dtype: DataType,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, dtype: DataType) -> PortSpec {
        PortSpec {
            name: name.into(),
            dtype,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.dtype
    }
}

/// One allowed assignment of input and output port types for a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSignature {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl TypeSignature {
    pub fn new(inputs: Vec<PortSpec>, outputs: Vec<PortSpec>) -> TypeSignature {
        TypeSignature { inputs, outputs }
    }

    pub fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    /// Do the declared input types equal `types` pointwise?
    pub fn matches_inputs(&self, types: &[DataType]) -> bool {
        self.inputs.len() == types.len()
            && self
                .inputs
                .iter()
                .zip(types.iter())
                .all(|(spec, t)| spec.data_type() == *t)
    }
}

/// Builder for a block's signature set.
pub struct SignatureBuilder {
    signatures: Vec<TypeSignature>,
}

impl SignatureBuilder {
    pub fn new() -> SignatureBuilder {
        SignatureBuilder {
            signatures: Vec::new(),
        }
    }

    #[must_use]
    pub fn add(mut self, inputs: &[(&str, DataType)], outputs: &[(&str, DataType)]) -> Self {
        self.signatures.push(TypeSignature::new(
            inputs.iter().map(|(n, t)| PortSpec::new(*n, *t)).collect(),
            outputs.iter().map(|(n, t)| PortSpec::new(*n, *t)).collect(),
        ));
        self
    }

    pub fn build(self) -> Vec<TypeSignature> {
        assert!(!self.signatures.is_empty(), "block declares no signatures");
        self.signatures
    }
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream input port: a name and, once the graph is prepared, the single
/// incoming pipe.
#[derive(Debug)]
pub struct StreamInput {
    name: String,
    reader: Option<PipeReader>,
}

impl StreamInput {
    pub fn new(name: &str) -> StreamInput {
        StreamInput {
            name: name.to_string(),
            reader: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_reader(&mut self, reader: PipeReader) {
        debug_assert!(self.reader.is_none());
        self.reader = Some(reader);
    }

    pub fn reader_mut(&mut self) -> Option<&mut PipeReader> {
        self.reader.as_mut()
    }

    pub fn reader(&self) -> Option<&PipeReader> {
        self.reader.as_ref()
    }

    pub(crate) fn close(&mut self) {
        if let Some(r) = self.reader.as_mut() {
            r.close();
        }
    }
}

/// Stream output port: a name, the fan-out list of pipes, and the type and
/// rate resolved at graph start.
#[derive(Debug)]
pub struct StreamOutput {
    name: String,
    writers: Vec<PipeWriter>,
    dtype: Option<DataType>,
    rate: Option<f64>,
}

impl StreamOutput {
    pub fn new(name: &str) -> StreamOutput {
        StreamOutput {
            name: name.to_string(),
            writers: Vec::new(),
            dtype: None,
            rate: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.dtype
    }

    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    pub(crate) fn set_data_type(&mut self, dtype: DataType) {
        self.dtype = Some(dtype);
    }

    pub(crate) fn set_rate(&mut self, rate: f64) {
        self.rate = Some(rate);
    }

    pub(crate) fn add_writer(&mut self, writer: PipeWriter) {
        self.writers.push(writer);
    }

    pub fn writers(&self) -> &[PipeWriter] {
        &self.writers
    }

    /// Duplicate one produced vector onto every outgoing pipe.
    pub fn write(&mut self, v: &SampleVec) -> Result<(), Error> {
        for w in self.writers.iter_mut() {
            w.write(v)?;
        }
        Ok(())
    }

    /// Close every outgoing pipe, surfacing EOF to all readers.
    pub(crate) fn close(&mut self) {
        for w in self.writers.iter_mut() {
            w.close();
        }
    }
}

/// The stream ports of one block.
#[derive(Debug, Default)]
pub struct StreamIo {
    inputs: Vec<StreamInput>,
    outputs: Vec<StreamOutput>,
}

impl StreamIo {
    pub(crate) fn new(inputs: Vec<StreamInput>, outputs: Vec<StreamOutput>) -> StreamIo {
        StreamIo { inputs, outputs }
    }

    pub fn inputs(&self) -> &Vec<StreamInput> {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut Vec<StreamInput> {
        &mut self.inputs
    }

    pub fn input(&self, id: usize) -> &StreamInput {
        &self.inputs[id]
    }

    pub fn input_mut(&mut self, id: usize) -> &mut StreamInput {
        &mut self.inputs[id]
    }

    pub fn input_name_to_id(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name() == name)
    }

    pub fn outputs(&self) -> &Vec<StreamOutput> {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut Vec<StreamOutput> {
        &mut self.outputs
    }

    pub fn output(&self, id: usize) -> &StreamOutput {
        &self.outputs[id]
    }

    pub fn output_mut(&mut self, id: usize) -> &mut StreamOutput {
        &mut self.outputs[id]
    }

    pub fn output_name_to_id(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name() == name)
    }

    /// Descriptors of every bound pipe end, for fork preservation.
    pub(crate) fn filenos(&self) -> Vec<RawFd> {
        let mut fds = Vec::new();
        for i in self.inputs.iter() {
            if let Some(r) = i.reader() {
                fds.push(r.fileno());
            }
        }
        for o in self.outputs.iter() {
            for w in o.writers() {
                fds.push(w.fileno());
            }
        }
        fds
    }

    /// Drop every pipe end this side holds. Used by the multiprocess parent
    /// so it is never an accidental reader or writer.
    pub(crate) fn close_all(&mut self) {
        for i in self.inputs.iter_mut() {
            i.close();
        }
        for o in self.outputs.iter_mut() {
            o.close();
        }
    }
}
