//! Process-wide fault log.
//!
//! Every failure raised by feature code (load, unload, click, intercept
//! callback) lands here tagged with the owning feature. The log is
//! append-only and lives as long as the engine; diagnostics read it, the
//! engine itself never consumes it.
//!
//! Appends publish a new immutable snapshot. Readers only clone the current
//! snapshot pointer, so a slow append never holds them up.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::Result;

/// Where a fault was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// `init_once` or `entry` failed
    Load,
    /// `unload` failed
    Unload,
    /// An intercept callback failed during a host invocation
    Callback,
    /// A click action failed
    Click,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Unload => write!(f, "unload"),
            Self::Callback => write!(f, "callback"),
            Self::Click => write!(f, "click"),
        }
    }
}

/// What was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum FaultCause {
    /// Returned error, rendered with its full context chain
    Error(String),
    /// Caught panic payload
    Panic(String),
}

impl FaultCause {
    /// Human-readable message.
    pub fn message(&self) -> &str {
        match self {
            Self::Error(msg) | Self::Panic(msg) => msg,
        }
    }
}

impl From<anyhow::Error> for FaultCause {
    fn from(err: anyhow::Error) -> Self {
        Self::Error(format!("{err:#}"))
    }
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(msg) => write!(f, "{msg}"),
            Self::Panic(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRecord {
    /// Path of the owning feature
    pub feature: String,

    /// Simple type name of the owning feature
    pub feature_type: String,

    /// Where the failure happened
    pub kind: FaultKind,

    /// What was raised
    pub cause: FaultCause,

    /// When it was recorded
    pub timestamp: DateTime<Utc>,
}

type Snapshot = Arc<Vec<Arc<FaultRecord>>>;

/// Append-only fault log.
#[derive(Debug, Default)]
pub struct FaultRegistry {
    records: RwLock<Snapshot>,
    // Serializes appends so none is lost between copy and swap
    append: Mutex<()>,
}

impl FaultRegistry {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fault.
    pub fn record(
        &self,
        feature: &str,
        feature_type: &str,
        kind: FaultKind,
        cause: FaultCause,
    ) -> Arc<FaultRecord> {
        tracing::warn!("Feature {} {} fault: {}", feature, kind, cause);

        let record = Arc::new(FaultRecord {
            feature: feature.to_string(),
            feature_type: feature_type.to_string(),
            kind,
            cause,
            timestamp: Utc::now(),
        });

        let _append = self.append.lock();
        let current = self.snapshot();
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(record.clone());
        *self.records.write() = Arc::new(next);

        record
    }

    fn snapshot(&self) -> Snapshot {
        self.records.read().clone()
    }

    /// Snapshot of every fault, oldest first.
    pub fn entries(&self) -> Vec<Arc<FaultRecord>> {
        self.snapshot().to_vec()
    }

    /// Faults recorded for one feature path.
    pub fn for_feature(&self, path: &str) -> Vec<Arc<FaultRecord>> {
        self.snapshot()
            .iter()
            .filter(|r| r.feature == path)
            .cloned()
            .collect()
    }

    /// Number of faults recorded for one feature path.
    pub fn count_for(&self, path: &str) -> usize {
        self.snapshot()
            .iter()
            .filter(|r| r.feature == path)
            .count()
    }

    /// Total number of faults.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Serialize the log for the diagnostics view.
    pub fn export_json(&self) -> Result<String> {
        let records: Vec<FaultRecord> = self.entries().iter().map(|r| (**r).clone()).collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }
}

/// Run feature code, turning both returned errors and panics into a
/// [`FaultCause`].
pub(crate) fn guard<T>(f: impl FnOnce() -> anyhow::Result<T>) -> std::result::Result<T, FaultCause> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.into()),
        Err(payload) => Err(FaultCause::Panic(panic_payload_to_string(&payload))),
    }
}

fn panic_payload_to_string(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
