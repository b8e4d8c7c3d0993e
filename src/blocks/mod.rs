//! Block library
mod apply;
mod file_sink;
mod file_source;
mod head;
mod multiply;
mod null_sink;
mod vector_sink;
mod vector_source;

pub use apply::Apply;
pub use file_sink::FileSink;
pub use file_source::FileSource;
pub use head::Head;
pub use multiply::Multiply;
pub use null_sink::NullSink;
pub use vector_sink::VectorSink;
pub use vector_source::VectorSource;
