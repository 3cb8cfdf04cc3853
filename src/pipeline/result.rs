use serde::Serialize;
use std::fmt;

/// How a pipeline item ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResultKind {
    /// Processed successfully
    Processed,
    /// The processor returned an error or panicked
    Failed,
    /// Hit the per-item timeout
    TimedOut,
    /// Not attempted because the domain's circuit was open
    CircuitRejected,
    /// Not attempted because a policy (e.g. robots.txt) disallowed it
    Skipped,
    /// Still queued when the pipeline was cancelled
    Cancelled,
}

impl ResultKind {
    /// Counts against the pipeline's failed items
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
            Self::CircuitRejected => "circuit rejected",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What a processor reports for an item it handled without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemOutcome {
    pub kind: ResultKind,
    pub status_code: Option<u16>,
}

impl ItemOutcome {
    pub fn processed(status_code: Option<u16>) -> Self {
        Self {
            kind: ResultKind::Processed,
            status_code,
        }
    }

    pub fn circuit_rejected() -> Self {
        Self {
            kind: ResultKind::CircuitRejected,
            status_code: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            kind: ResultKind::Skipped,
            status_code: None,
        }
    }
}

/// One result per pipeline item, emitted once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub url: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub kind: ResultKind,
    /// HTTP status of the final attempt, when there was one
    pub status_code: Option<u16>,
}

impl ProcessingResult {
    pub fn from_outcome(url: &str, outcome: ItemOutcome, duration_ms: u64) -> Self {
        Self {
            url: url.to_string(),
            success: matches!(outcome.kind, ResultKind::Processed | ResultKind::Skipped),
            error: None,
            duration_ms,
            kind: outcome.kind,
            status_code: outcome.status_code,
        }
    }

    pub fn failed(
        url: &str,
        error: impl Into<String>,
        status_code: Option<u16>,
        duration_ms: u64,
    ) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            error: Some(error.into()),
            duration_ms,
            kind: ResultKind::Failed,
            status_code,
        }
    }

    pub fn timed_out(url: &str, duration_ms: u64) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            error: Some(format!("timed out after {}ms", duration_ms)),
            duration_ms,
            kind: ResultKind::TimedOut,
            status_code: None,
        }
    }

    pub fn cancelled(url: &str) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            error: Some("cancelled before processing".to_string()),
            duration_ms: 0,
            kind: ResultKind::Cancelled,
            status_code: None,
        }
    }
}

/// Point-in-time view of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub queued_items: usize,
    pub processing_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queued={} processing={} completed={} failed={}",
            self.queued_items, self.processing_items, self.completed_items, self.failed_items
        )
    }
}
