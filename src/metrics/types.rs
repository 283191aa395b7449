use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{SessionId, SourceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CaptureOutcome {
    /// Frame handed to the analyzer.
    Observed,
    /// Frame too similar to the last analysed one.
    Unchanged,
    /// Previous analysis still running.
    AnalyzerBusy,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetrics {
    pub session_id: SessionId,
    pub source_id: SourceId,
    pub timestamp: DateTime<Utc>,
    pub capture_ms: u64,
    pub screenshot_bytes: Option<usize>,
    pub outcome: CaptureOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_captures: Vec<CaptureMetrics>,
    pub capture_count: u64,
    pub failure_count: u64,
    pub skip_count: u64,
}
