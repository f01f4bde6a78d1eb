pub mod avi;
pub mod mux;
pub mod naming;
pub mod recorder;

pub use recorder::{AviWriterFactory, FrameWriter, Geometry, Recorder, WriterFactory};
