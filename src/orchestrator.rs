use std::sync::Arc;

use indexmap::IndexMap;
use log::{error, info, warn};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::capture::{CaptureSession, LoopContext, SamplingController};
use crate::errors::{LookoutError, ProviderError};
use crate::events::{EventBus, OrchestratorEvent};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::models::{ChatMessage, SessionId, SessionSummary, WindowSource};
use crate::providers::{CaptureProvider, InferenceProvider};
use crate::settings::Settings;

struct SessionEntry {
    session: Arc<CaptureSession>,
    sampler: SamplingController,
}

/// Owns the active capture sessions and drives one sampling loop per session.
///
/// Cheap to clone; clones share the same registry. Sessions never share
/// mutable state, so the registry lock is only held for structural changes
/// and lookups, never across a provider call.
#[derive(Clone)]
pub struct SessionOrchestrator {
    sessions: Arc<Mutex<IndexMap<SessionId, SessionEntry>>>,
    available_sources: Arc<RwLock<Vec<WindowSource>>>,
    capture: Arc<dyn CaptureProvider>,
    inference: Arc<dyn InferenceProvider>,
    events: EventBus,
    metrics: MetricsCollector,
    settings: Settings,
}

impl SessionOrchestrator {
    pub fn new(
        capture: Arc<dyn CaptureProvider>,
        inference: Arc<dyn InferenceProvider>,
        settings: Settings,
    ) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(IndexMap::new())),
            available_sources: Arc::new(RwLock::new(Vec::new())),
            events: EventBus::new(settings.event_buffer),
            metrics: MetricsCollector::new(),
            capture,
            inference,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Re-enumerates windows and replaces the known list wholesale.
    ///
    /// On failure the previous list is kept and the error returned.
    pub async fn refresh_sources(&self) -> Result<Vec<WindowSource>, ProviderError> {
        let sources = self.capture.list_sources().await.map_err(|err| {
            warn!("source refresh failed, keeping previous list: {err}");
            err
        })?;

        *self.available_sources.write().await = sources.clone();
        info!("refreshed sources: {} available", sources.len());
        self.events.emit(OrchestratorEvent::SourcesRefreshed {
            sources: sources.clone(),
        });
        Ok(sources)
    }

    pub async fn available_sources(&self) -> Vec<WindowSource> {
        self.available_sources.read().await.clone()
    }

    /// Starts watching `source`. Adding a window that is already watched
    /// returns the existing session's id and starts nothing new.
    pub async fn add_session(&self, source: WindowSource) -> SessionId {
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions
            .values()
            .find(|entry| entry.session.source().id == source.id)
        {
            return existing.session.id();
        }

        let session = Arc::new(CaptureSession::new(
            source.clone(),
            Arc::clone(&self.inference),
            self.events.clone(),
        ));
        let session_id = session.id();

        let sampler = SamplingController::start(LoopContext {
            session: Arc::clone(&session),
            capture: Arc::clone(&self.capture),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
            interval: self.settings.capture_interval(),
            capture_timeout: self.settings.capture_timeout(),
            change_threshold: self.settings.change_threshold,
        });

        sessions.insert(session_id, SessionEntry { session, sampler });
        drop(sessions);

        info!(
            "session {} added for window {} ({})",
            session_id,
            source.id,
            source.display_title()
        );
        self.events.emit(OrchestratorEvent::SessionAdded { session_id, source });
        session_id
    }

    /// Stops the session's loop, waits for it to exit, then drops the session.
    /// Unknown ids are ignored.
    pub async fn remove_session(&self, session_id: SessionId) {
        let Some(entry) = self.sessions.lock().await.shift_remove(&session_id) else {
            return;
        };

        if let Err(err) = entry.sampler.stop().await {
            error!("{err:#}");
        }

        info!("session {} removed", session_id);
        self.events.emit(OrchestratorEvent::SessionRemoved { session_id });
    }

    /// Removes every session, waiting for each loop to exit.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.lock().await.keys().copied().collect();
        for session_id in ids {
            self.remove_session(session_id).await;
        }
    }

    pub async fn session(&self, session_id: SessionId) -> Option<Arc<CaptureSession>> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Active sessions in the order they were added.
    pub async fn active_sessions(&self) -> Vec<Arc<CaptureSession>> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.session))
            .collect()
    }

    pub async fn session_summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.active_sessions().await;
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            summaries.push(session.summary().await);
        }
        summaries
    }

    pub async fn is_sampling(&self, session_id: SessionId) -> bool {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .is_some_and(|entry| entry.sampler.is_running())
    }

    /// Sends one conversational turn to a session, using its latest frame as context.
    ///
    /// Waits behind any analysis already running on that session.
    pub async fn converse(
        &self,
        session_id: SessionId,
        text: &str,
    ) -> Result<ChatMessage, LookoutError> {
        if text.trim().is_empty() {
            return Err(LookoutError::InvalidInput("message text is empty".into()));
        }

        let session = self
            .session(session_id)
            .await
            .ok_or(LookoutError::SessionNotFound(session_id))?;

        session
            .analyzer()
            .converse(text, session.last_image())
            .await
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.get_snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{SimulatedCaptureProvider, SimulatedInferenceProvider};
    use std::time::Duration;

    fn orchestrator(capture: Arc<SimulatedCaptureProvider>) -> SessionOrchestrator {
        SessionOrchestrator::new(
            capture,
            Arc::new(SimulatedInferenceProvider::new(Duration::from_millis(100))),
            Settings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_replaces_sources_wholesale() {
        let capture = Arc::new(SimulatedCaptureProvider::with_default_windows());
        let orchestrator = orchestrator(capture.clone());
        assert_eq!(orchestrator.settings().capture_interval(), Duration::from_secs(2));
        assert!(orchestrator.available_sources().await.is_empty());

        assert_eq!(orchestrator.refresh_sources().await.unwrap().len(), 3);
        capture.close_window(2);
        orchestrator.refresh_sources().await.unwrap();

        let ids: Vec<_> = orchestrator
            .available_sources()
            .await
            .iter()
            .map(|source| source.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_keep_insertion_order_and_dedupe_by_source() {
        let orchestrator = orchestrator(Arc::new(SimulatedCaptureProvider::with_default_windows()));
        let editor = WindowSource::new(1, "Editor", "IDE");
        let terminal = WindowSource::new(2, "Build Output", "Terminal");

        let a = orchestrator.add_session(terminal.clone()).await;
        let b = orchestrator.add_session(editor.clone()).await;
        assert_eq!(orchestrator.add_session(terminal).await, a);

        let order: Vec<_> = orchestrator
            .active_sessions()
            .await
            .iter()
            .map(|session| session.id())
            .collect();
        assert_eq!(order, vec![a, b]);
        assert!(orchestrator.is_sampling(a).await);

        orchestrator.shutdown().await;
        assert!(orchestrator.active_sessions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn converse_uses_latest_frame_as_context() {
        let orchestrator = orchestrator(Arc::new(SimulatedCaptureProvider::with_default_windows()));
        let id = orchestrator
            .add_session(WindowSource::new(3, "Documentation", "Browser"))
            .await;

        tokio::time::sleep(Duration::from_millis(2_050)).await;
        let session = orchestrator.session(id).await.unwrap();
        assert!(session.last_image().is_some());

        let reply = orchestrator.converse(id, "what is on screen?").await.unwrap();
        assert!(reply.text.contains("looking at the frame"));

        let summary = &orchestrator.session_summaries().await[0];
        assert_eq!(summary.message_count, 2);
        assert!(summary.last_captured_at.is_some());
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn converse_on_unknown_session_is_an_error() {
        let orchestrator = orchestrator(Arc::new(SimulatedCaptureProvider::with_default_windows()));
        let missing = SessionId::new();
        assert_eq!(
            orchestrator.converse(missing, "hi").await.unwrap_err(),
            LookoutError::SessionNotFound(missing)
        );
    }
}
