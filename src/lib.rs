//! Watches live application windows and runs each captured frame through an
//! analysis stage.
//!
//! A [`SessionOrchestrator`] owns one [`CaptureSession`] per watched window.
//! Each session has its own sampling loop feeding a [`SessionAnalyzer`], which
//! records findings and carries a conversation about the window. Where frames
//! come from and who analyses them are pluggable through [`CaptureProvider`]
//! and [`InferenceProvider`].

mod analysis;
mod capture;
mod errors;
mod events;
mod metrics;
mod models;
mod orchestrator;
mod settings;
mod utils;

pub mod providers;

pub use analysis::{ObserveOutcome, SessionAnalyzer};
pub use capture::CaptureSession;
pub use errors::{LookoutError, ProviderError};
pub use events::OrchestratorEvent;
pub use metrics::{CaptureMetrics, CaptureOutcome, MetricsSnapshot, SystemMetrics};
pub use models::{
    AnalysisLog, CapturedImage, ChatMessage, ChatRole, SessionId, SessionSummary, SourceId,
    WindowSource,
};
pub use orchestrator::SessionOrchestrator;
pub use providers::{CaptureProvider, InferenceProvider};
pub use settings::Settings;

/// Initialise logging (reads `RUST_LOG`, defaults to `info`).
pub fn init_logging() {
    utils::logging::init();
}
