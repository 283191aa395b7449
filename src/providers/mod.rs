//! Seams to the outside world: where frames come from and who looks at them.
//!
//! Both providers are request/response, may be slow, and may fail. They are
//! shared across every session's loop, so implementations must be safe to call
//! concurrently for different sources.

pub mod simulated;

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::models::{CapturedImage, SourceId, WindowSource};

pub use simulated::{SimulatedCaptureProvider, SimulatedInferenceProvider};

#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Enumerates capturable windows. Either the full list or an error, never partial.
    async fn list_sources(&self) -> Result<Vec<WindowSource>, ProviderError>;

    /// Grabs one still frame of `source_id`.
    ///
    /// A window that has gone away yields [`ProviderError::NotFound`], a backend
    /// hiccup [`ProviderError::Unavailable`].
    async fn capture(&self, source_id: SourceId) -> Result<CapturedImage, ProviderError>;
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Produces a textual finding for a frame.
    async fn analyze_image(&self, image: &CapturedImage) -> Result<String, ProviderError>;

    /// Answers one conversational turn, optionally grounded in the latest frame.
    async fn reply(
        &self,
        text: &str,
        context: Option<&CapturedImage>,
    ) -> Result<String, ProviderError>;
}
