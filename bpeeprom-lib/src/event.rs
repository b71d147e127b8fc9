//! Typed job events and the sinks that receive them.

use crossbeam_channel::Sender;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub message: String,
}

impl JobOutcome {
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Cancelled,
            message: message.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Percentage in 0..=100, never decreasing within a job.
    Progress(u8),
    Log(String),
    /// Image read from the device; only emitted by successful reads.
    DataReady(Vec<u8>),
    /// Always the last event of a job.
    Complete(JobOutcome),
}

/// Observer for job events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

impl EventSink for Sender<JobEvent> {
    fn emit(&self, event: JobEvent) {
        // 接收端已经关闭时丢弃事件
        let _ = self.send(event);
    }
}
