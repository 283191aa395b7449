use chrono::Utc;
use image_hasher::ImageHash;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::events::{EventBus, OrchestratorEvent};
use crate::metrics::{CaptureMetrics, CaptureOutcome, MetricsCollector};
use crate::analysis::ObserveOutcome;
use crate::models::CapturedImage;
use crate::providers::CaptureProvider;

use super::fingerprint::{frame_fingerprint, is_unchanged};
use super::session::CaptureSession;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Everything one session's sampling loop needs.
pub(crate) struct LoopContext {
    pub session: Arc<CaptureSession>,
    pub capture: Arc<dyn CaptureProvider>,
    pub events: EventBus,
    pub metrics: MetricsCollector,
    pub interval: Duration,
    pub capture_timeout: Duration,
    pub change_threshold: Option<u32>,
}

#[derive(Default)]
struct LoopState {
    in_flight: Option<JoinHandle<()>>,
    /// Fingerprint of the last frame that produced a finding. Written by the
    /// detached observe task, so a failed or skipped analysis leaves it alone.
    last_analyzed: Arc<Mutex<Option<ImageHash>>>,
}

/// Samples the session's window every `interval` until cancelled.
///
/// The first sample is taken one interval after start. Capture failures are
/// reported and the loop keeps going; only cancellation ends it. Once the
/// token fires no further capture is started, and a capture in progress is
/// abandoned.
pub(crate) async fn sampling_loop(ctx: LoopContext, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ctx.interval, ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let session_id = ctx.session.id();
    let mut state = LoopState::default();
    log_info!(
        "sampling loop started for session {} ({})",
        session_id,
        ctx.session.source().display_title()
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = sample_once(&ctx, &mut state) => {}
        }
    }

    log_info!("sampling loop shutting down for session {}", session_id);
}

async fn sample_once(ctx: &LoopContext, state: &mut LoopState) {
    let session = &ctx.session;
    let source_id = session.source().id;
    let timestamp = Utc::now();
    let capture_start = Instant::now();

    let result = match tokio::time::timeout(ctx.capture_timeout, ctx.capture.capture(source_id)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::unavailable(format!(
            "capture timed out after {}ms",
            ctx.capture_timeout.as_millis()
        ))),
    };
    let capture_ms = capture_start.elapsed().as_millis() as u64;

    let record = |screenshot_bytes: Option<usize>, outcome: CaptureOutcome| CaptureMetrics {
        session_id: session.id(),
        source_id,
        timestamp,
        capture_ms,
        screenshot_bytes,
        outcome,
    };

    let image = match result {
        Ok(image) => image,
        Err(err) => {
            match &err {
                ProviderError::NotFound(_) => {
                    log_warn!("source {} for session {} is gone: {err}", source_id, session.id())
                }
                ProviderError::Unavailable(_) => {
                    log_error!("capture failed for session {}: {err}", session.id())
                }
            }
            ctx.metrics
                .record_capture(record(None, CaptureOutcome::Failed { error: err.to_string() }))
                .await;
            if !session.is_removed() {
                ctx.events.emit(OrchestratorEvent::CaptureFailed {
                    session_id: session.id(),
                    source_id,
                    error: err,
                });
            }
            return;
        }
    };

    if session.is_removed() {
        return;
    }

    let screenshot_bytes = image.png_bytes().len();
    session.set_last_image(image.clone());
    ctx.events.emit(OrchestratorEvent::ImageCaptured {
        session_id: session.id(),
        width: image.width(),
        height: image.height(),
    });

    let outcome = dispatch_observe(ctx, state, image).await;
    log_debug!(
        "session {} sampled in {}ms ({} bytes): {:?}",
        session.id(),
        capture_ms,
        screenshot_bytes,
        outcome
    );
    ctx.metrics
        .record_capture(record(Some(screenshot_bytes), outcome))
        .await;
}

/// Hands the frame to the analyzer unless analysis is still running or the
/// frame has not visibly changed. Analysis runs detached from the loop's cadence.
async fn dispatch_observe(
    ctx: &LoopContext,
    state: &mut LoopState,
    image: CapturedImage,
) -> CaptureOutcome {
    let observe_pending = state
        .in_flight
        .as_ref()
        .is_some_and(|handle| !handle.is_finished());
    if observe_pending || ctx.session.analyzer().is_busy() {
        return CaptureOutcome::AnalyzerBusy;
    }

    let mut fingerprint_to_commit = None;
    if let Some(threshold) = ctx.change_threshold {
        let fingerprint = tokio::task::spawn_blocking({
            let image = image.clone();
            move || frame_fingerprint(&image)
        })
        .await;

        match fingerprint {
            Ok(Ok(hash)) => {
                if is_unchanged(&hash, state.last_analyzed.lock().await.as_ref(), threshold) {
                    return CaptureOutcome::Unchanged;
                }
                fingerprint_to_commit = Some(hash);
            }
            Ok(Err(err)) => log_warn!("fingerprint failed, analysing anyway: {err:#}"),
            Err(err) => log_warn!("fingerprint worker join failed, analysing anyway: {err}"),
        }
    }

    let session = Arc::clone(&ctx.session);
    let last_analyzed = Arc::clone(&state.last_analyzed);
    state.in_flight = Some(tokio::spawn(async move {
        // Failures are reported by the analyzer itself
        if let Ok(ObserveOutcome::Recorded(_)) = session.analyzer().observe(image).await {
            if let Some(hash) = fingerprint_to_commit {
                *last_analyzed.lock().await = Some(hash);
            }
        }
    }));
    CaptureOutcome::Observed
}
