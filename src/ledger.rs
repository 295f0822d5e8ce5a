//! Last-known error per subject.
//!
//! One slot per subject, overwritten on every failure and emptied on the
//! next success. There is no history. Each write swaps a whole
//! `Arc<ErrorRecord>` under the lock, so a snapshot never sees a record
//! half-written.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::pods::PodRole;

/// What an error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSubject {
    Generation,
    Orchestration,
    /// Sequencer-level failures not attributable to one pod.
    Pipeline,
}

impl From<PodRole> for ErrorSubject {
    fn from(role: PodRole) -> Self {
        match role {
            PodRole::Generation => Self::Generation,
            PodRole::Orchestration => Self::Orchestration,
        }
    }
}

impl std::fmt::Display for ErrorSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Generation => "generation",
            Self::Orchestration => "orchestration",
            Self::Pipeline => "pipeline",
        };
        write!(f, "{}", s)
    }
}

/// Most recent failure for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub detail: serde_json::Value,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Same instant, RFC 3339.
    pub recorded_at: String,
}

impl ErrorRecord {
    fn new(message: String, detail: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            message,
            detail,
            timestamp: now.timestamp(),
            recorded_at: now.to_rfc3339(),
        }
    }
}

/// Point-in-time copy of every slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSnapshot {
    pub generation: Option<ErrorRecord>,
    pub orchestration: Option<ErrorRecord>,
    pub pipeline: Option<ErrorRecord>,
}

impl ErrorSnapshot {
    pub fn get(&self, subject: impl Into<ErrorSubject>) -> Option<&ErrorRecord> {
        match subject.into() {
            ErrorSubject::Generation => self.generation.as_ref(),
            ErrorSubject::Orchestration => self.orchestration.as_ref(),
            ErrorSubject::Pipeline => self.pipeline.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.generation.is_none() && self.orchestration.is_none() && self.pipeline.is_none()
    }
}

#[derive(Debug, Default)]
pub struct ErrorLedger {
    slots: RwLock<HashMap<ErrorSubject, Arc<ErrorRecord>>>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the subject's slot.
    pub async fn record(
        &self,
        subject: impl Into<ErrorSubject>,
        message: impl Into<String>,
        detail: serde_json::Value,
    ) {
        let subject = subject.into();
        let record = Arc::new(ErrorRecord::new(message.into(), detail, Utc::now()));
        tracing::debug!("Recorded {} error: {}", subject, record.message);
        self.slots.write().await.insert(subject, record);
    }

    pub async fn clear(&self, subject: impl Into<ErrorSubject>) {
        let subject = subject.into();
        if self.slots.write().await.remove(&subject).is_some() {
            tracing::debug!("Cleared {} error", subject);
        }
    }

    pub async fn get(&self, subject: impl Into<ErrorSubject>) -> Option<ErrorRecord> {
        self.slots
            .read()
            .await
            .get(&subject.into())
            .map(|r| r.as_ref().clone())
    }

    pub async fn snapshot(&self) -> ErrorSnapshot {
        let slots = self.slots.read().await;
        let take = |s: ErrorSubject| slots.get(&s).map(|r| r.as_ref().clone());
        ErrorSnapshot {
            generation: take(ErrorSubject::Generation),
            orchestration: take(ErrorSubject::Orchestration),
            pipeline: take(ErrorSubject::Pipeline),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn record_overwrites_and_clear_empties() {
        let ledger = ErrorLedger::new();
        ledger
            .record(PodRole::Generation, "first", json!({"attempt": 1}))
            .await;
        ledger
            .record(PodRole::Generation, "second", json!({"attempt": 2}))
            .await;

        let record = ledger.get(PodRole::Generation).await.unwrap();
        assert_eq!(record.message, "second");
        assert_eq!(record.detail["attempt"], 2);
        assert!(record.recorded_at.contains('T'));

        ledger.clear(PodRole::Generation).await;
        assert!(ledger.get(PodRole::Generation).await.is_none());
    }

    #[tokio::test]
    async fn subjects_are_independent() {
        let ledger = ErrorLedger::new();
        ledger
            .record(ErrorSubject::Pipeline, "health timeout", json!(null))
            .await;
        ledger
            .record(PodRole::Orchestration, "no gpu", json!(null))
            .await;
        ledger.clear(PodRole::Orchestration).await;

        let snap = ledger.snapshot().await;
        assert!(snap.generation.is_none());
        assert!(snap.orchestration.is_none());
        assert_eq!(snap.get(ErrorSubject::Pipeline).unwrap().message, "health timeout");
        assert!(!snap.is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let ledger = ErrorLedger::new();
        ledger.record(PodRole::Generation, "boom", json!(null)).await;
        let snap = ledger.snapshot().await;
        ledger.clear(PodRole::Generation).await;
        assert_eq!(snap.get(PodRole::Generation).unwrap().message, "boom");
    }
}
