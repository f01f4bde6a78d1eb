pub mod pixels;
pub mod sink;
pub mod texture;

pub use pixels::DisplayImage;
pub use sink::DisplaySink;
