use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::analysis::SessionAnalyzer;
use crate::events::EventBus;
use crate::models::{CapturedImage, SessionId, SessionSummary, WindowSource};
use crate::providers::InferenceProvider;

/// One watched window: its analyzer and the most recent frame.
///
/// Only the session's own sampling loop writes `last_image`; everything else
/// reads or subscribes.
pub struct CaptureSession {
    id: SessionId,
    source: WindowSource,
    started_at: DateTime<Utc>,
    analyzer: SessionAnalyzer,
    last_image: watch::Sender<Option<CapturedImage>>,
    cancel_token: CancellationToken,
}

impl CaptureSession {
    pub fn new(source: WindowSource, inference: Arc<dyn InferenceProvider>, events: EventBus) -> Self {
        let id = SessionId::new();
        let cancel_token = CancellationToken::new();
        let (last_image, _) = watch::channel(None);

        Self {
            id,
            analyzer: SessionAnalyzer::new(id, inference, events, cancel_token.clone()),
            source,
            started_at: Utc::now(),
            last_image,
            cancel_token,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &WindowSource {
        &self.source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn analyzer(&self) -> &SessionAnalyzer {
        &self.analyzer
    }

    pub fn last_image(&self) -> Option<CapturedImage> {
        self.last_image.borrow().clone()
    }

    pub fn subscribe_image(&self) -> watch::Receiver<Option<CapturedImage>> {
        self.last_image.subscribe()
    }

    /// Cancelled once the session has been removed.
    pub fn is_removed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub(crate) fn set_last_image(&self, image: CapturedImage) {
        self.last_image.send_replace(Some(image));
    }

    pub async fn summary(&self) -> SessionSummary {
        let (finding_count, message_count) = self.analyzer.counts().await;
        SessionSummary {
            id: self.id,
            source: self.source.clone(),
            started_at: self.started_at,
            busy: self.analyzer.is_busy(),
            finding_count,
            message_count,
            last_captured_at: self.last_image.borrow().as_ref().map(CapturedImage::captured_at),
        }
    }
}
