//! Structural comparison of two executions
//!
//! `DiffCalculator` reads both event streams from the ledger and compares
//! them step by step: which steps ran in one execution but not the other,
//! and where the outputs of shared steps disagree, field by field. The
//! comparison itself is pure; only the event loads touch storage.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::event::{EventType, ExecutionEvent};
use crate::ledger::{EventLedger, LedgerError};
use crate::materialize::step_name;

// =========================================================================
// Diff types
// =========================================================================

/// How one step compares between two executions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDiffStatus {
    /// Present in both executions with identical outputs
    Same,
    /// Present in both executions with differing outputs
    Different,
    /// Present only in execution B
    Added,
    /// Present only in execution A
    Removed,
}

impl std::fmt::Display for StepDiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Same => write!(f, "same"),
            Self::Different => write!(f, "different"),
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// One field that differs between two payloads
///
/// `path` is the dotted path to the field; an absent side is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_a: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_b: Option<Value>,
}

/// Comparison of one step across two executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDiff {
    pub step_name: String,
    pub status: StepDiffStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_a: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_b: Option<Value>,
    /// Wall-clock step duration in each execution; 0 when either endpoint
    /// is unknown, not "instant"
    pub duration_a_ms: i64,
    pub duration_b_ms: i64,
    /// Field-level output changes; only populated for steps present in both
    pub changes: Vec<FieldChange>,
}

/// Step counts aggregated over a comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub total_steps: usize,
    pub same_steps: usize,
    pub diff_steps: usize,
    pub added_steps: usize,
    pub removed_steps: usize,
}

/// Full structural comparison of two executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDiff {
    pub execution_a: Uuid,
    pub execution_b: Uuid,
    pub summary: DiffSummary,
    /// One entry per step name seen in either execution, in lexicographic
    /// order
    pub step_diffs: Vec<StepDiff>,
}

// =========================================================================
// DiffCalculator
// =========================================================================

/// Compares two executions' event streams structurally
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use pipewright_ledger::{DiffCalculator, InMemoryEventLedger};
///
/// let ledger = Arc::new(InMemoryEventLedger::new());
/// let calc = DiffCalculator::new(Arc::clone(&ledger));
/// let diff = calc.compare(execution_a, execution_b).await?;
/// ```
pub struct DiffCalculator<L> {
    ledger: Arc<L>,
}

impl<L: EventLedger> DiffCalculator<L> {
    /// Create a calculator reading from the given ledger
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    /// Compare two executions step by step
    ///
    /// Fails with [`LedgerError::ExecutionNotFound`] naming the offending
    /// ID if either execution has no events.
    pub async fn compare(
        &self,
        execution_a: Uuid,
        execution_b: Uuid,
    ) -> Result<ExecutionDiff, LedgerError> {
        let events_a = self.ledger.get_events(execution_a).await?;
        if events_a.is_empty() {
            return Err(LedgerError::ExecutionNotFound(execution_a));
        }
        let events_b = self.ledger.get_events(execution_b).await?;
        if events_b.is_empty() {
            return Err(LedgerError::ExecutionNotFound(execution_b));
        }

        Ok(compare_events(execution_a, &events_a, execution_b, &events_b))
    }
}

/// Per-step facts collected from one event stream
#[derive(Default)]
struct StepScan {
    output: Option<Value>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl StepScan {
    /// Elapsed time between first start and last completion, or 0 when
    /// either is unknown
    fn duration_ms(&self) -> i64 {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds(),
            _ => 0,
        }
    }
}

/// Collect per-step facts: last output, first start, last completion or
/// failure. Events without a usable `step_name` are ignored.
fn scan_steps(events: &[ExecutionEvent]) -> BTreeMap<String, StepScan> {
    let mut steps: BTreeMap<String, StepScan> = BTreeMap::new();

    for ev in events {
        match ev.event_type {
            EventType::StepStarted => {
                if let Some(name) = step_name(&ev.data) {
                    let entry = steps.entry(name.to_string()).or_default();
                    if entry.started_at.is_none() {
                        entry.started_at = Some(ev.created_at);
                    }
                }
            }
            EventType::StepOutputRecorded => {
                if let Some(name) = step_name(&ev.data) {
                    let entry = steps.entry(name.to_string()).or_default();
                    if let Some(output) = ev.data.get("output") {
                        entry.output = Some(output.clone());
                    }
                }
            }
            EventType::StepCompleted | EventType::StepFailed => {
                if let Some(name) = step_name(&ev.data) {
                    let entry = steps.entry(name.to_string()).or_default();
                    entry.completed_at = Some(ev.created_at);
                }
            }
            _ => {}
        }
    }

    steps
}

/// Pure comparison of two already-loaded event streams
fn compare_events(
    execution_a: Uuid,
    events_a: &[ExecutionEvent],
    execution_b: Uuid,
    events_b: &[ExecutionEvent],
) -> ExecutionDiff {
    let steps_a = scan_steps(events_a);
    let steps_b = scan_steps(events_b);

    let names: BTreeSet<&String> = steps_a.keys().chain(steps_b.keys()).collect();

    let mut summary = DiffSummary {
        total_steps: names.len(),
        ..Default::default()
    };
    let mut step_diffs = Vec::with_capacity(names.len());

    for name in names {
        let a = steps_a.get(name);
        let b = steps_b.get(name);

        let (status, changes) = match (a, b) {
            (Some(a), Some(b)) => {
                let changes = diff_maps(a.output.as_ref(), b.output.as_ref());
                if changes.is_empty() {
                    summary.same_steps += 1;
                    (StepDiffStatus::Same, changes)
                } else {
                    summary.diff_steps += 1;
                    (StepDiffStatus::Different, changes)
                }
            }
            (Some(_), None) => {
                summary.removed_steps += 1;
                (StepDiffStatus::Removed, Vec::new())
            }
            (None, Some(_)) => {
                summary.added_steps += 1;
                (StepDiffStatus::Added, Vec::new())
            }
            // Unreachable: the name came from one of the two maps
            (None, None) => continue,
        };

        step_diffs.push(StepDiff {
            step_name: name.clone(),
            status,
            output_a: a.and_then(|s| s.output.clone()),
            output_b: b.and_then(|s| s.output.clone()),
            duration_a_ms: a.map_or(0, StepScan::duration_ms),
            duration_b_ms: b.map_or(0, StepScan::duration_ms),
            changes,
        });
    }

    ExecutionDiff {
        execution_a,
        execution_b,
        summary,
        step_diffs,
    }
}

// =========================================================================
// Structural field diff
// =========================================================================

/// Field-by-field comparison of two JSON payloads
///
/// Walks both documents recursively, recording a [`FieldChange`] for every
/// field that was added, removed, or changed, with dotted paths into nested
/// objects. Values that are not both objects are compared by equality as a
/// whole. A `None` or non-object side contributes no fields, so two absent
/// payloads diff to zero changes. The result is sorted by path.
pub fn diff_maps(a: Option<&Value>, b: Option<&Value>) -> Vec<FieldChange> {
    let empty = serde_json::Map::new();
    let a = a.and_then(Value::as_object).unwrap_or(&empty);
    let b = b.and_then(Value::as_object).unwrap_or(&empty);

    let mut changes = Vec::new();
    diff_objects("", a, b, &mut changes);
    changes.sort_by(|x, y| x.path.cmp(&y.path));
    changes
}

fn diff_objects(
    prefix: &str,
    a: &serde_json::Map<String, Value>,
    b: &serde_json::Map<String, Value>,
    changes: &mut Vec<FieldChange>,
) {
    for (key, value_a) in a {
        let path = join_path(prefix, key);
        match b.get(key) {
            None => changes.push(FieldChange {
                path,
                value_a: Some(value_a.clone()),
                value_b: None,
            }),
            Some(value_b) => match (value_a, value_b) {
                (Value::Object(nested_a), Value::Object(nested_b)) => {
                    diff_objects(&path, nested_a, nested_b, changes);
                }
                _ if value_a != value_b => changes.push(FieldChange {
                    path,
                    value_a: Some(value_a.clone()),
                    value_b: Some(value_b.clone()),
                }),
                _ => {}
            },
        }
    }

    for (key, value_b) in b {
        if !a.contains_key(key) {
            changes.push(FieldChange {
                path: join_path(prefix, key),
                value_a: None,
                value_b: Some(value_b.clone()),
            });
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
