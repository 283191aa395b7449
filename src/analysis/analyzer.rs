use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::errors::{LookoutError, ProviderError};
use crate::events::{EventBus, OrchestratorEvent};
use crate::models::{AnalysisLog, CapturedImage, ChatMessage, SessionId};
use crate::providers::InferenceProvider;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ObserveOutcome {
    Recorded(AnalysisLog),
    /// Another inference call held the gate; periodic frames are not queued.
    Skipped,
    /// The session was removed while inference was running.
    Discarded,
}

#[derive(Default)]
struct AnalyzerState {
    /// Newest first.
    logs: VecDeque<AnalysisLog>,
    chat_history: Vec<ChatMessage>,
}

/// Owns one session's findings and conversation.
///
/// At most one inference call runs per analyzer. `observe` gives up when the
/// gate is held, since the next tick brings a fresher frame anyway. `converse`
/// waits its turn because a user's message must never be dropped. Waiters are
/// served in arrival order.
pub struct SessionAnalyzer {
    session_id: SessionId,
    inference: Arc<dyn InferenceProvider>,
    state: Mutex<AnalyzerState>,
    gate: Mutex<()>,
    busy_tx: watch::Sender<bool>,
    events: EventBus,
    retired: CancellationToken,
}

/// Holds the gate; clears the busy flag on every exit path.
struct BusyGuard<'a> {
    analyzer: &'a SessionAnalyzer,
    _gate: MutexGuard<'a, ()>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.analyzer.set_busy(false);
    }
}

impl SessionAnalyzer {
    pub fn new(
        session_id: SessionId,
        inference: Arc<dyn InferenceProvider>,
        events: EventBus,
        retired: CancellationToken,
    ) -> Self {
        let (busy_tx, _) = watch::channel(false);
        Self {
            session_id,
            inference,
            state: Mutex::new(AnalyzerState::default()),
            gate: Mutex::new(()),
            busy_tx,
            events,
            retired,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn is_busy(&self) -> bool {
        *self.busy_tx.borrow()
    }

    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.busy_tx.subscribe()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.is_cancelled()
    }

    /// Findings, newest first.
    pub async fn logs(&self) -> Vec<AnalysisLog> {
        self.state.lock().await.logs.iter().cloned().collect()
    }

    pub async fn chat_history(&self) -> Vec<ChatMessage> {
        self.state.lock().await.chat_history.clone()
    }

    pub(crate) async fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.logs.len(), state.chat_history.len())
    }

    /// Runs one frame through inference and records the finding.
    pub async fn observe(&self, image: CapturedImage) -> Result<ObserveOutcome, ProviderError> {
        let Some(_busy) = self.try_enter() else {
            log_debug!("analyzer {} busy; skipping frame", self.session_id);
            return Ok(ObserveOutcome::Skipped);
        };

        let result = self.inference.analyze_image(&image).await;
        if self.is_retired() {
            return Ok(ObserveOutcome::Discarded);
        }

        match result {
            Ok(content) => {
                let finding = AnalysisLog::new(content);
                self.state.lock().await.logs.push_front(finding.clone());
                self.emit(OrchestratorEvent::FindingRecorded {
                    session_id: self.session_id,
                    finding: finding.clone(),
                });
                Ok(ObserveOutcome::Recorded(finding))
            }
            Err(err) => {
                log_warn!("analysis failed for session {}: {err}", self.session_id);
                self.emit(OrchestratorEvent::AnalysisFailed {
                    session_id: self.session_id,
                    error: err.clone(),
                });
                Err(err)
            }
        }
    }

    /// Appends the user's turn, asks for a reply and appends it.
    ///
    /// On provider failure the user's message stays in the history unanswered.
    pub async fn converse(
        &self,
        text: &str,
        context: Option<CapturedImage>,
    ) -> Result<ChatMessage, LookoutError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LookoutError::InvalidInput("message text is empty".into()));
        }

        let _busy = self.enter().await;
        if self.is_retired() {
            return Err(LookoutError::SessionNotFound(self.session_id));
        }

        let user_message = ChatMessage::user(text);
        self.append_chat(user_message).await;

        let result = self.inference.reply(text, context.as_ref()).await;
        if self.is_retired() {
            return Err(LookoutError::SessionNotFound(self.session_id));
        }

        match result {
            Ok(reply) => {
                let reply = ChatMessage::system(reply);
                self.append_chat(reply.clone()).await;
                Ok(reply)
            }
            Err(err) => {
                log_warn!("reply failed for session {}: {err}", self.session_id);
                self.emit(OrchestratorEvent::AnalysisFailed {
                    session_id: self.session_id,
                    error: err.clone(),
                });
                Err(err.into())
            }
        }
    }

    fn try_enter(&self) -> Option<BusyGuard<'_>> {
        let gate = self.gate.try_lock().ok()?;
        self.set_busy(true);
        Some(BusyGuard {
            analyzer: self,
            _gate: gate,
        })
    }

    async fn enter(&self) -> BusyGuard<'_> {
        let gate = self.gate.lock().await;
        self.set_busy(true);
        BusyGuard {
            analyzer: self,
            _gate: gate,
        }
    }

    async fn append_chat(&self, message: ChatMessage) {
        self.state.lock().await.chat_history.push(message.clone());
        self.emit(OrchestratorEvent::ChatMessageAppended {
            session_id: self.session_id,
            message,
        });
    }

    fn set_busy(&self, busy: bool) {
        let previous = self.busy_tx.send_replace(busy);
        if previous != busy {
            self.emit(OrchestratorEvent::BusyChanged {
                session_id: self.session_id,
                busy,
            });
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        if self.is_retired() {
            return;
        }
        self.events.emit(event);
    }
}

impl Drop for SessionAnalyzer {
    fn drop(&mut self) {
        log_info!("analyzer for session {} released", self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatRole;
    use async_trait::async_trait;
    use image::RgbaImage;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Inference fake that can be held open and counts overlapping calls.
    #[derive(Default)]
    struct GatedInference {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        fail: AtomicBool,
        hold: Option<Semaphore>,
    }

    impl GatedInference {
        fn held() -> Self {
            Self {
                hold: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn release_one(&self) {
            if let Some(hold) = &self.hold {
                hold.add_permits(1);
            }
        }

        async fn call(&self) -> Result<usize, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(hold) = &self.hold {
                hold.acquire().await.unwrap().forget();
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(ProviderError::unavailable("model offline"))
            } else {
                Ok(n)
            }
        }

        async fn wait_in_flight(&self) {
            while self.in_flight.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl InferenceProvider for GatedInference {
        async fn analyze_image(&self, _image: &CapturedImage) -> Result<String, ProviderError> {
            self.call().await.map(|n| format!("finding {n}"))
        }

        async fn reply(
            &self,
            text: &str,
            _context: Option<&CapturedImage>,
        ) -> Result<String, ProviderError> {
            self.call().await.map(|n| format!("reply {n} to {text}"))
        }
    }

    fn analyzer(inference: Arc<GatedInference>) -> Arc<SessionAnalyzer> {
        Arc::new(SessionAnalyzer::new(
            SessionId::new(),
            inference,
            EventBus::new(64),
            CancellationToken::new(),
        ))
    }

    fn frame() -> CapturedImage {
        CapturedImage::from_rgba(&RgbaImage::new(4, 4)).unwrap()
    }

    #[tokio::test]
    async fn observe_records_findings_newest_first() {
        let analyzer = analyzer(Arc::new(GatedInference::default()));

        analyzer.observe(frame()).await.unwrap();
        let outcome = analyzer.observe(frame()).await.unwrap();

        let logs = analyzer.logs().await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].content, "finding 2");
        assert_eq!(outcome, ObserveOutcome::Recorded(logs[0].clone()));
        assert!(!analyzer.is_busy());
    }

    #[tokio::test]
    async fn observe_while_busy_is_skipped() {
        let inference = Arc::new(GatedInference::held());
        let analyzer = analyzer(inference.clone());

        let first = tokio::spawn({
            let analyzer = analyzer.clone();
            async move { analyzer.observe(frame()).await }
        });
        inference.wait_in_flight().await;
        assert!(analyzer.is_busy());

        assert_eq!(analyzer.observe(frame()).await.unwrap(), ObserveOutcome::Skipped);

        inference.release_one();
        assert!(matches!(first.await.unwrap().unwrap(), ObserveOutcome::Recorded(_)));
        assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
        assert!(!analyzer.is_busy());
    }

    #[tokio::test]
    async fn observe_arriving_during_converse_is_skipped() {
        let inference = Arc::new(GatedInference::held());
        let analyzer = analyzer(inference.clone());

        let turn = tokio::spawn({
            let analyzer = analyzer.clone();
            async move { analyzer.converse("what is this?", Some(frame())).await }
        });
        inference.wait_in_flight().await;

        assert_eq!(analyzer.observe(frame()).await.unwrap(), ObserveOutcome::Skipped);

        inference.release_one();
        turn.await.unwrap().unwrap();
        assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
        assert_eq!(inference.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(analyzer.logs().await.is_empty());
        assert_eq!(analyzer.chat_history().await.len(), 2);
    }

    #[tokio::test]
    async fn busy_subscribers_see_each_observe_start_and_finish() {
        let inference = Arc::new(GatedInference::held());
        let analyzer = analyzer(inference.clone());
        let mut busy = analyzer.subscribe_busy();
        assert!(!*busy.borrow_and_update());

        for failing in [false, true] {
            inference.fail.store(failing, Ordering::SeqCst);
            let observe = tokio::spawn({
                let analyzer = analyzer.clone();
                async move { analyzer.observe(frame()).await }
            });

            busy.changed().await.unwrap();
            assert!(*busy.borrow_and_update());

            inference.release_one();
            busy.changed().await.unwrap();
            assert!(!*busy.borrow_and_update());
            assert_eq!(observe.await.unwrap().is_err(), failing);
        }
        assert_eq!(analyzer.logs().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_observe_records_nothing_and_clears_busy() {
        let inference = Arc::new(GatedInference::default());
        inference.fail.store(true, Ordering::SeqCst);
        let analyzer = analyzer(inference);
        let mut events = analyzer.events.subscribe();

        let err = analyzer.observe(frame()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(analyzer.logs().await.is_empty());
        assert!(!analyzer.is_busy());

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            saw_failure |= matches!(event, OrchestratorEvent::AnalysisFailed { .. });
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_touching_history() {
        let inference = Arc::new(GatedInference::default());
        let analyzer = analyzer(inference.clone());

        for text in ["", "   "] {
            let err = analyzer.converse(text, None).await.unwrap_err();
            assert!(matches!(err, LookoutError::InvalidInput(_)));
        }
        assert!(analyzer.chat_history().await.is_empty());
        assert_eq!(inference.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn converse_appends_user_then_system() {
        let analyzer = analyzer(Arc::new(GatedInference::default()));

        let reply = analyzer.converse("  what changed?  ", Some(frame())).await.unwrap();

        let history = analyzer.chat_history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[0].text, "what changed?");
        assert_eq!(history[1], reply);
        assert_eq!(reply.text, "reply 1 to what changed?");
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[tokio::test]
    async fn user_message_is_visible_while_reply_is_pending() {
        let inference = Arc::new(GatedInference::held());
        let analyzer = analyzer(inference.clone());

        let turn = tokio::spawn({
            let analyzer = analyzer.clone();
            async move { analyzer.converse("hello", None).await }
        });
        inference.wait_in_flight().await;

        let history = analyzer.chat_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, ChatRole::User);
        assert!(analyzer.is_busy());

        inference.release_one();
        turn.await.unwrap().unwrap();
        assert_eq!(analyzer.chat_history().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_reply_keeps_user_message_and_clears_busy() {
        let inference = Arc::new(GatedInference::default());
        inference.fail.store(true, Ordering::SeqCst);
        let analyzer = analyzer(inference);

        let err = analyzer.converse("anyone there?", None).await.unwrap_err();
        assert!(matches!(err, LookoutError::Provider(ProviderError::Unavailable(_))));

        let history = analyzer.chat_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, ChatRole::User);
        assert!(!analyzer.is_busy());
    }

    #[tokio::test]
    async fn converse_waits_for_running_observe() {
        let inference = Arc::new(GatedInference::held());
        let analyzer = analyzer(inference.clone());

        let observe = tokio::spawn({
            let analyzer = analyzer.clone();
            async move { analyzer.observe(frame()).await }
        });
        inference.wait_in_flight().await;

        let turn = tokio::spawn({
            let analyzer = analyzer.clone();
            async move { analyzer.converse("still there?", None).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(analyzer.chat_history().await.is_empty());

        inference.release_one();
        inference.release_one();
        observe.await.unwrap().unwrap();
        turn.await.unwrap().unwrap();

        assert_eq!(inference.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(analyzer.logs().await.len(), 1);
        assert_eq!(analyzer.chat_history().await.len(), 2);
        assert!(!analyzer.is_busy());
    }

    #[tokio::test]
    async fn results_after_retirement_are_dropped() {
        let inference = Arc::new(GatedInference::held());
        let retired = CancellationToken::new();
        let analyzer = Arc::new(SessionAnalyzer::new(
            SessionId::new(),
            inference.clone(),
            EventBus::new(8),
            retired.clone(),
        ));

        let observe = tokio::spawn({
            let analyzer = analyzer.clone();
            async move { analyzer.observe(frame()).await }
        });
        inference.wait_in_flight().await;

        retired.cancel();
        inference.release_one();

        assert_eq!(observe.await.unwrap().unwrap(), ObserveOutcome::Discarded);
        assert!(analyzer.logs().await.is_empty());
        assert!(!analyzer.is_busy());
    }
}
