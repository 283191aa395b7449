use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use rand::seq::SliceRandom;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::models::{CapturedImage, SourceId, WindowSource};

use super::{CaptureProvider, InferenceProvider};

const FRAME_WIDTH: u32 = 160;
const FRAME_HEIGHT: u32 = 100;

const CANNED_FINDINGS: &[&str] = &[
    "No notable change in the window contents.",
    "A dialog appears to be open and waiting for input.",
    "Text content was updated since the previous frame.",
    "The window shows an error or warning indicator.",
    "Layout is stable; the user seems to be reading.",
];

const CANNED_REPLIES: &[&str] = &[
    "Based on what I can see, everything looks normal.",
    "I am not sure yet. Let me keep watching this window.",
    "It looks like the window is waiting for you to act.",
    "Nothing in the current frame stands out to me.",
];

/// Capture backend that renders synthetic frames for a fixed set of windows.
///
/// Windows can be closed at runtime to exercise the `NotFound` path.
pub struct SimulatedCaptureProvider {
    windows: Mutex<Vec<WindowSource>>,
    frames_rendered: AtomicU64,
    latency: Duration,
}

impl SimulatedCaptureProvider {
    pub fn new(windows: Vec<WindowSource>) -> Self {
        Self {
            windows: Mutex::new(windows),
            frames_rendered: AtomicU64::new(0),
            latency: Duration::ZERO,
        }
    }

    pub fn with_default_windows() -> Self {
        Self::new(vec![
            WindowSource::new(1, "Editor", "IDE"),
            WindowSource::new(2, "Build Output", "Terminal"),
            WindowSource::new(3, "Documentation", "Browser"),
        ])
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Removes a window; later captures of it fail with `NotFound`.
    pub fn close_window(&self, id: SourceId) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let before = windows.len();
        windows.retain(|window| window.id != id);
        windows.len() != before
    }

    pub fn open_window(&self, window: WindowSource) {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        windows.retain(|existing| existing.id != window.id);
        windows.push(window);
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::SeqCst)
    }

    fn knows(&self, id: SourceId) -> bool {
        self.windows
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .any(|window| window.id == id)
    }
}

#[async_trait]
impl CaptureProvider for SimulatedCaptureProvider {
    async fn list_sources(&self) -> Result<Vec<WindowSource>, ProviderError> {
        Ok(self
            .windows
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    async fn capture(&self, source_id: SourceId) -> Result<CapturedImage, ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if !self.knows(source_id) {
            return Err(ProviderError::NotFound(source_id));
        }

        let frame_no = self.frames_rendered.fetch_add(1, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || render_frame(source_id, frame_no))
            .await
            .map_err(|err| ProviderError::unavailable(format!("render worker join failed: {err}")))?
            .map_err(|err| ProviderError::unavailable(format!("render failed: {err:#}")))
    }
}

fn render_frame(source_id: SourceId, frame_no: u64) -> anyhow::Result<CapturedImage> {
    let tint = (source_id.wrapping_mul(67) % 256) as u8;
    let shift = (frame_no % 256) as u8;
    let pixels = RgbaImage::from_fn(FRAME_WIDTH, FRAME_HEIGHT, |x, y| {
        Rgba([
            tint,
            ((x * 255) / FRAME_WIDTH) as u8 ^ shift,
            ((y * 255) / FRAME_HEIGHT) as u8,
            255,
        ])
    });
    CapturedImage::from_rgba(&pixels)
}

/// Inference backend returning canned text after a fixed delay.
pub struct SimulatedInferenceProvider {
    delay: Duration,
}

impl SimulatedInferenceProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedInferenceProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

#[async_trait]
impl InferenceProvider for SimulatedInferenceProvider {
    async fn analyze_image(&self, image: &CapturedImage) -> Result<String, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!(
            "{} ({}x{} frame)",
            pick(CANNED_FINDINGS),
            image.width(),
            image.height()
        ))
    }

    async fn reply(
        &self,
        _text: &str,
        context: Option<&CapturedImage>,
    ) -> Result<String, ProviderError> {
        tokio::time::sleep(self.delay).await;
        let reply = pick(CANNED_REPLIES);
        Ok(match context {
            Some(frame) => format!(
                "{reply} (looking at the frame from {})",
                frame.captured_at().format("%H:%M:%S")
            ),
            None => format!("{reply} (no frame captured yet)"),
        })
    }
}

fn pick(options: &'static [&'static str]) -> &'static str {
    options
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_default()
}
