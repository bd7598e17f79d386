//! Conflict resolution on top of HLC ordering.
//!
//! Two strategies are provided:
//! - record-level last-write-wins, and
//! - field-level merge, where every field is attributed to its own most
//!   recent writer. Two clients editing disjoint fields of the same entity
//!   offline both keep their edits.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::hlc::HlcTimestamp;
use crate::queue::QueuedOperation;

/// Per-field write timestamps for a record.
pub type FieldClocks = HashMap<String, HlcTimestamp>;

/// Which side a resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// Result of a last-write-wins resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub winner: ConflictWinner,
    pub value: T,
}

/// Result of a field-level merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub record: Map<String, Value>,
    /// Write timestamps of the merged record's fields.
    pub clocks: FieldClocks,
    /// Fields whose value came from the remote side.
    pub remote_fields: Vec<String>,
}

/// Stateless resolver; every decision is a pure function of the HLCs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Keeps the value with the greater HLC. On exact equality (same node,
    /// time and counter) the local value wins.
    pub fn last_write_wins<T>(
        &self,
        local: T,
        remote: T,
        local_hlc: &HlcTimestamp,
        remote_hlc: &HlcTimestamp,
    ) -> Resolved<T> {
        if remote_hlc > local_hlc {
            Resolved {
                winner: ConflictWinner::Remote,
                value: remote,
            }
        } else {
            Resolved {
                winner: ConflictWinner::Local,
                value: local,
            }
        }
    }

    /// Merges two versions of a record field by field.
    ///
    /// A remote field replaces the local one only when its HLC is strictly
    /// greater than the local field's HLC, or the local field has no HLC.
    /// Fields absent from the remote record are left untouched.
    pub fn field_level_merge(
        &self,
        local: &Map<String, Value>,
        remote: &Map<String, Value>,
        local_clocks: &FieldClocks,
        remote_clocks: &FieldClocks,
    ) -> MergedRecord {
        let mut record = local.clone();
        let mut clocks = local_clocks.clone();
        let mut remote_fields = Vec::new();

        for (field, remote_value) in remote {
            let remote_clock = remote_clocks.get(field);
            let take_remote = match local_clocks.get(field) {
                None => true,
                Some(local_clock) => remote_clock.is_some_and(|r| r > local_clock),
            };

            if take_remote {
                record.insert(field.clone(), remote_value.clone());
                match remote_clock {
                    Some(clock) => {
                        clocks.insert(field.clone(), clock.clone());
                    }
                    None => {
                        clocks.remove(field);
                    }
                }
                remote_fields.push(field.clone());
            }
        }

        remote_fields.sort();

        MergedRecord {
            record,
            clocks,
            remote_fields,
        }
    }
}

/// Domain hook for operations the server rejected with a conflict.
///
/// The coordinator calls this after marking the operation `conflict`. A
/// typical implementation fetches the server record and its field clocks,
/// merges with [`ConflictResolver::field_level_merge`], and enqueues a
/// follow-up operation.
#[async_trait]
pub trait ConflictHandler: Send + Sync {
    async fn handle_conflict(&self, operation: &QueuedOperation, message: &str);
}
