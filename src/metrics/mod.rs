mod types;

pub use types::{CaptureMetrics, CaptureOutcome, MetricsSnapshot, SystemMetrics};

use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_CAPTURES: usize = 20;

/// Rolling capture statistics shared by every sampling loop.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_captures: VecDeque<CaptureMetrics>,
    capture_count: u64,
    failure_count: u64,
    skip_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta, so take a baseline now
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_captures: VecDeque::with_capacity(MAX_RECENT_CAPTURES + 1),
                capture_count: 0,
                failure_count: 0,
                skip_count: 0,
                system,
                pid,
            })),
        }
    }

    pub async fn record_capture(&self, metrics: CaptureMetrics) {
        let mut state = self.inner.lock().await;

        state.capture_count += 1;
        match metrics.outcome {
            CaptureOutcome::Observed => {}
            CaptureOutcome::Unchanged | CaptureOutcome::AnalyzerBusy => state.skip_count += 1,
            CaptureOutcome::Failed { .. } => state.failure_count += 1,
        }

        state.recent_captures.push_back(metrics);
        if state.recent_captures.len() > MAX_RECENT_CAPTURES {
            state.recent_captures.pop_front();
        }
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let system = match state.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
        };

        MetricsSnapshot {
            system,
            recent_captures: state.recent_captures.iter().cloned().collect(),
            capture_count: state.capture_count,
            failure_count: state.failure_count,
            skip_count: state.skip_count,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
