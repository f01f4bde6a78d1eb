pub mod fps;
pub mod model;
pub mod queue;
pub mod status;
pub mod worker;

pub use fps::FpsTracker;
pub use model::Pipeline;
pub use queue::BoundedQueue;
pub use status::{DisplayItem, StatusMessage};
pub use worker::{Worker, WorkerState};
