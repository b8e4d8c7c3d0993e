use std::fmt;
use std::mem;
use std::slice;

/// Identity and per-element size of a sample type flowing through a pipe.
///
/// The runtime never interprets sample contents; it only needs the element
/// stride and an equality predicate for signature matching.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    name: &'static str,
    size: usize,
}

impl DataType {
    pub const fn new(name: &'static str, size: usize) -> DataType {
        DataType { name, size }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Element stride in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub const COMPLEX_FLOAT32: DataType = DataType::new("ComplexFloat32", 8);
pub const FLOAT32: DataType = DataType::new("Float32", 4);
pub const BYTE: DataType = DataType::new("Byte", 1);
pub const BIT: DataType = DataType::new("Bit", 1);

/// A contiguous vector of homogeneous samples.
///
/// This is the unit of data exchanged between blocks. The payload is a plain
/// byte buffer with a fixed element stride given by the [DataType]; typed
/// views are unchecked reinterpretations, so the caller must pass the type
/// the vector was built with.
#[derive(Clone, PartialEq)]
pub struct SampleVec {
    dtype: DataType,
    bytes: Vec<u8>,
}

impl SampleVec {
    pub fn new(dtype: DataType) -> SampleVec {
        SampleVec {
            dtype,
            bytes: Vec::new(),
        }
    }

    pub fn from_bytes(dtype: DataType, bytes: Vec<u8>) -> SampleVec {
        debug_assert_eq!(bytes.len() % dtype.size(), 0);
        SampleVec { dtype, bytes }
    }

    pub fn from_slice<T: Copy>(dtype: DataType, data: &[T]) -> SampleVec {
        debug_assert_eq!(mem::size_of::<T>(), dtype.size());
        let bytes = unsafe {
            slice::from_raw_parts(data.as_ptr().cast::<u8>(), std::mem::size_of_val(data))
        };
        SampleVec {
            dtype,
            bytes: bytes.to_vec(),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.dtype
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.dtype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn extend(&mut self, other: &SampleVec) {
        debug_assert_eq!(self.dtype, other.dtype);
        self.bytes.extend_from_slice(&other.bytes);
    }

    /// View the payload as a slice of `T`.
    pub fn slice<T>(&self) -> &[T] {
        debug_assert_eq!(mem::size_of::<T>(), self.dtype.size());
        debug_assert_eq!(self.bytes.as_ptr() as usize % mem::align_of::<T>(), 0);
        unsafe { slice::from_raw_parts(self.bytes.as_ptr().cast::<T>(), self.len()) }
    }
}

impl fmt::Debug for SampleVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleVec")
            .field("dtype", &self.dtype)
            .field("len", &self.len())
            .finish()
    }
}
