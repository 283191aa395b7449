use anyhow::{Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::SessionId;

use super::loop_worker::{sampling_loop, LoopContext};

/// Handle to one session's running sampling loop.
///
/// Dropping the controller cancels the loop without waiting for it.
pub struct SamplingController {
    session_id: SessionId,
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl SamplingController {
    /// Spawns the loop. The session's cancellation token is shared with the
    /// loop, so stopping the loop also retires the session's analyzer.
    pub(crate) fn start(ctx: LoopContext) -> Self {
        let session_id = ctx.session.id();
        let cancel_token = ctx.session.cancel_token();
        let handle = tokio::spawn(sampling_loop(ctx, cancel_token.clone()));

        Self {
            session_id,
            handle: Some(handle),
            cancel_token,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels the loop and waits for it to exit. No capture starts after this returns.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel_token.cancel();

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .with_context(|| format!("sampling loop for session {} failed to join", self.session_id))?;
            info!("sampling stopped for session {}", self.session_id);
        }
        Ok(())
    }
}

impl Drop for SamplingController {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
