use chrono::{DateTime, Utc};

/// Summary of a successful merge.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistReport {
    pub blob_key: String,
    pub nodes: usize,
    pub edges: usize,
    /// Nodes removed by the prune policy.
    pub pruned: usize,
    pub raw_kb: f64,
    pub compressed_kb: f64,
    pub updated: DateTime<Utc>,
}

/// What happened to a delta once the lock was taken.
///
/// Failing to take the lock at all is an error
/// ([`SyncError::LockNotAcquired`](crate::SyncError::LockNotAcquired));
/// failing after taking it is reported here so callers can count merge
/// failures without the delta failure becoming fatal.
#[derive(Clone, Debug, PartialEq)]
pub enum PersistOutcome {
    Merged {
        report: PersistReport,
        attempts: u32,
        /// `false` if the lease had already passed to another holder.
        released: bool,
    },
    MergeFailed {
        reason: String,
        attempts: u32,
        released: bool,
    },
}

impl PersistOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, PersistOutcome::Merged { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PersistOutcome::Merged { attempts, .. } | PersistOutcome::MergeFailed { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn released(&self) -> bool {
        match self {
            PersistOutcome::Merged { released, .. } | PersistOutcome::MergeFailed { released, .. } => {
                *released
            }
        }
    }

    pub fn report(&self) -> Option<&PersistReport> {
        match self {
            PersistOutcome::Merged { report, .. } => Some(report),
            PersistOutcome::MergeFailed { .. } => None,
        }
    }
}
