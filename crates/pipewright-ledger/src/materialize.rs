//! Deterministic replay of event streams into execution timelines
//!
//! Materialization is a pure function: the same ordered event sequence always
//! produces the same view, with no I/O and no clock reads. Timestamps come
//! from the events themselves. Unknown event types and malformed payload
//! fields are tolerated; they never fail a replay.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::event::{EventType, ExecutionEvent};

/// Execution status derived from the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// No lifecycle event seen yet
    Unknown,

    /// Execution has started
    Running,

    /// Execution completed successfully
    Completed,

    /// Execution failed
    Failed,

    /// Execution was cancelled
    Cancelled,

    /// Saga rollback is in progress
    Compensating,

    /// Saga rollback finished
    Compensated,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Compensating => write!(f, "compensating"),
            Self::Compensated => write!(f, "compensated"),
        }
    }
}

/// Step status derived from the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has started (or restarted after a retry)
    Running,

    /// Step completed successfully
    Completed,

    /// Step failed
    Failed,

    /// Step was skipped without running
    Skipped,

    /// Step's effects were rolled back
    Compensated,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Compensated => write!(f, "compensated"),
        }
    }
}

/// Read-optimized view of a single step within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedStep {
    pub step_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,

    pub status: StepStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,

    pub retries: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MaterializedStep {
    /// Create a step record with the given name and status; all other fields
    /// start empty
    pub fn new(step_name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step_name: step_name.into(),
            step_type: None,
            status,
            input_data: None,
            output_data: None,
            error: None,
            route: None,
            retries: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Read-optimized view of a complete execution, rebuilt from its event stream
///
/// Derived state only: views are recomputed on demand and never persisted as
/// a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedExecution {
    pub execution_id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    pub status: ExecutionStatus,

    /// Steps in order of first appearance in the event stream
    pub steps: Vec<MaterializedStep>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Total events replayed, including no-ops
    pub event_count: usize,
}

/// Replay an ordered event sequence into a [`MaterializedExecution`]
///
/// Events must be in ascending `sequence_num` order, as returned by the
/// ledger. An empty slice yields the `Unknown`-status shell with
/// `event_count == 0`; callers that need "no such execution" semantics check
/// for emptiness before materializing.
pub fn materialize(execution_id: Uuid, events: &[ExecutionEvent]) -> MaterializedExecution {
    let mut m = MaterializedExecution {
        execution_id,
        pipeline: None,
        tenant_id: None,
        status: ExecutionStatus::Unknown,
        steps: Vec::new(),
        error: None,
        started_at: None,
        completed_at: None,
        event_count: events.len(),
    };

    // step name -> index in m.steps; first appearance fixes the position
    let mut step_index: HashMap<String, usize> = HashMap::new();

    for ev in events {
        match &ev.event_type {
            EventType::ExecutionStarted => {
                m.status = ExecutionStatus::Running;
                m.started_at = Some(ev.created_at);
                if let Some(p) = str_field(&ev.data, "pipeline") {
                    m.pipeline = Some(p.to_string());
                }
                if let Some(t) = str_field(&ev.data, "tenant_id") {
                    m.tenant_id = Some(t.to_string());
                }
            }

            EventType::StepStarted => {
                let Some(name) = step_name(&ev.data) else {
                    continue;
                };
                let mut step = MaterializedStep::new(name, StepStatus::Running);
                step.started_at = Some(ev.created_at);
                step.step_type = str_field(&ev.data, "step_type").map(str::to_string);
                upsert_step(&mut m.steps, &mut step_index, step);
            }

            EventType::StepInputRecorded => {
                if let Some(step) = find_step(&mut m.steps, &step_index, &ev.data) {
                    if let Some(input) = ev.data.get("input") {
                        step.input_data = Some(input.clone());
                    }
                }
            }

            EventType::StepOutputRecorded => {
                if let Some(step) = find_step(&mut m.steps, &step_index, &ev.data) {
                    if let Some(output) = ev.data.get("output") {
                        step.output_data = Some(output.clone());
                    }
                }
            }

            EventType::StepCompleted => {
                if let Some(step) = find_step(&mut m.steps, &step_index, &ev.data) {
                    step.status = StepStatus::Completed;
                    step.completed_at = Some(ev.created_at);
                }
            }

            EventType::StepFailed => {
                if let Some(step) = find_step(&mut m.steps, &step_index, &ev.data) {
                    step.status = StepStatus::Failed;
                    step.completed_at = Some(ev.created_at);
                    if let Some(e) = str_field(&ev.data, "error") {
                        step.error = Some(e.to_string());
                    }
                }
            }

            EventType::StepSkipped => {
                let Some(name) = step_name(&ev.data) else {
                    continue;
                };
                let mut step = MaterializedStep::new(name, StepStatus::Skipped);
                step.error = str_field(&ev.data, "reason").map(str::to_string);
                upsert_step(&mut m.steps, &mut step_index, step);
            }

            EventType::StepCompensated => {
                if let Some(step) = find_step(&mut m.steps, &step_index, &ev.data) {
                    step.status = StepStatus::Compensated;
                }
            }

            EventType::ConditionalRouted => {
                if let Some(step) = find_step(&mut m.steps, &step_index, &ev.data) {
                    if let Some(route) = str_field(&ev.data, "route") {
                        step.route = Some(route.to_string());
                    }
                }
            }

            EventType::RetryAttempted => {
                if let Some(step) = find_step(&mut m.steps, &step_index, &ev.data) {
                    step.retries += 1;
                    step.status = StepStatus::Running;
                }
            }

            EventType::ExecutionCompleted => {
                m.status = ExecutionStatus::Completed;
                m.completed_at = Some(ev.created_at);
            }

            EventType::ExecutionFailed => {
                m.status = ExecutionStatus::Failed;
                m.completed_at = Some(ev.created_at);
                if let Some(e) = str_field(&ev.data, "error") {
                    m.error = Some(e.to_string());
                }
            }

            EventType::ExecutionCancelled => {
                m.status = ExecutionStatus::Cancelled;
                m.completed_at = Some(ev.created_at);
            }

            EventType::SagaCompensating => {
                m.status = ExecutionStatus::Compensating;
            }

            EventType::SagaCompensated => {
                m.status = ExecutionStatus::Compensated;
                m.completed_at = Some(ev.created_at);
            }

            // Lineage metadata and unknown types carry no timeline state
            EventType::ExecutionReplay | EventType::Other(_) => {}
        }
    }

    m
}

/// Extract a string field from a payload; anything else counts as absent
fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

/// Extract a non-empty `step_name` from a payload
pub(crate) fn step_name(data: &Value) -> Option<&str> {
    str_field(data, "step_name").filter(|n| !n.is_empty())
}

/// Look up the step a payload's `step_name` refers to, if it exists
fn find_step<'a>(
    steps: &'a mut [MaterializedStep],
    step_index: &HashMap<String, usize>,
    data: &Value,
) -> Option<&'a mut MaterializedStep> {
    let name = str_field(data, "step_name")?;
    let idx = *step_index.get(name)?;
    steps.get_mut(idx)
}

/// Insert a step record, or replace the existing record for the same name
/// in place so the step keeps its original list position
fn upsert_step(
    steps: &mut Vec<MaterializedStep>,
    step_index: &mut HashMap<String, usize>,
    step: MaterializedStep,
) {
    match step_index.get(&step.step_name) {
        Some(&idx) => steps[idx] = step,
        None => {
            step_index.insert(step.step_name.clone(), steps.len());
            steps.push(step);
        }
    }
}
