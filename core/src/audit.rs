//! Append-only record of results and escalations, plus a live event feed.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::profile::ProfileKey;
use crate::task::{EscalationReason, EscalationRecord, EscalationResponse, TaskResult};

const DEFAULT_EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    TaskRouted {
        task_id: String,
        profile: ProfileKey,
        session_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: String,
        profile: ProfileKey,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },
    TaskEscalated {
        task_id: String,
        reason: EscalationReason,
        response: EscalationResponse,
        timestamp: DateTime<Utc>,
    },
    ProfileStored {
        profile: ProfileKey,
        became_latest: bool,
        timestamp: DateTime<Utc>,
    },
    ContextWiped {
        session_id: String,
        task_id: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    Result(TaskResult),
    Escalation(EscalationRecord),
}

struct AuditInner {
    entries: Mutex<Vec<AuditEntry>>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

/// Shared audit handle; clones see the same log.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<AuditInner>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("entries", &self.len()).finish()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(AuditInner {
                entries: Mutex::new(Vec::new()),
                event_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        // no subscribers is fine
        let _ = self.inner.event_tx.send(event);
    }

    pub fn record_result(&self, result: &TaskResult) {
        if result.is_completed() {
            self.emit(PipelineEvent::TaskCompleted {
                task_id: result.task_id.clone(),
                profile: result.rep_used.clone(),
                confidence: result.confidence,
                timestamp: Utc::now(),
            });
        }
        self.lock().push(AuditEntry::Result(result.clone()));
    }

    pub fn record_escalation(&self, record: &EscalationRecord) {
        self.lock().push(AuditEntry::Escalation(record.clone()));
        self.emit(PipelineEvent::TaskEscalated {
            task_id: record.task_id.clone(),
            reason: record.reason,
            response: record.response.clone(),
            timestamp: record.timestamp,
        });
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    pub fn results(&self) -> Vec<TaskResult> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                AuditEntry::Result(r) => Some(r.clone()),
                AuditEntry::Escalation(_) => None,
            })
            .collect()
    }

    pub fn escalations(&self) -> Vec<EscalationRecord> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                AuditEntry::Escalation(r) => Some(r.clone()),
                AuditEntry::Result(_) => None,
            })
            .collect()
    }

    pub fn results_for(&self, task_id: &str) -> Vec<TaskResult> {
        self.results()
            .into_iter()
            .filter(|r| r.task_id == task_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEntry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
