mod controller;
mod fingerprint;
mod loop_worker;
mod session;

pub use controller::SamplingController;
pub use session::CaptureSession;

pub(crate) use loop_worker::LoopContext;
