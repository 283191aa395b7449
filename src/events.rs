//! Change notifications pushed to whoever renders the pipeline's state.
//!
//! Payloads serialize the same way for every consumer, so a host can forward
//! them verbatim onto its own event bus.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::errors::ProviderError;
use crate::models::{AnalysisLog, ChatMessage, SessionId, SourceId, WindowSource};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OrchestratorEvent {
    #[serde(rename_all = "camelCase")]
    SourcesRefreshed { sources: Vec<WindowSource> },
    #[serde(rename_all = "camelCase")]
    SessionAdded {
        session_id: SessionId,
        source: WindowSource,
    },
    #[serde(rename_all = "camelCase")]
    SessionRemoved { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    ImageCaptured {
        session_id: SessionId,
        width: u32,
        height: u32,
    },
    #[serde(rename_all = "camelCase")]
    CaptureFailed {
        session_id: SessionId,
        source_id: SourceId,
        error: ProviderError,
    },
    #[serde(rename_all = "camelCase")]
    FindingRecorded {
        session_id: SessionId,
        finding: AnalysisLog,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessageAppended {
        session_id: SessionId,
        message: ChatMessage,
    },
    #[serde(rename_all = "camelCase")]
    BusyChanged { session_id: SessionId, busy: bool },
    #[serde(rename_all = "camelCase")]
    AnalysisFailed {
        session_id: SessionId,
        error: ProviderError,
    },
}

impl OrchestratorEvent {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            OrchestratorEvent::SourcesRefreshed { .. } => None,
            OrchestratorEvent::SessionAdded { session_id, .. }
            | OrchestratorEvent::SessionRemoved { session_id }
            | OrchestratorEvent::ImageCaptured { session_id, .. }
            | OrchestratorEvent::CaptureFailed { session_id, .. }
            | OrchestratorEvent::FindingRecorded { session_id, .. }
            | OrchestratorEvent::ChatMessageAppended { session_id, .. }
            | OrchestratorEvent::BusyChanged { session_id, .. }
            | OrchestratorEvent::AnalysisFailed { session_id, .. } => Some(*session_id),
        }
    }
}

/// Cloneable sending half shared by the orchestrator, loops and analyzers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing with nobody subscribed is not an error.
    pub fn emit(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }
}
