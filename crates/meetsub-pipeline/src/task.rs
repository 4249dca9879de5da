//! Task registry and run control.
//!
//! Each transcription run gets a `TaskHandle`: the worker publishes snapshots through it and
//! checks the shared `TaskControl` at chunk boundaries. Other threads observe the run through
//! `TaskRegistry::snapshot` and steer it with `pause`/`resume`/`cancel`, which only flip flags.

use crate::segment::Segment;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Processing,
    Paused,
    Completed,
    Cancelled,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Processing => "processing",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Error
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TaskStatus::Idle),
            "processing" => Ok(TaskStatus::Processing),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "error" => Ok(TaskStatus::Error),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Wall-clock cost of one processed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTiming {
    pub chunk_id: usize,
    pub time_range: String,
    /// Seconds spent extracting, transcribing and correcting the chunk.
    pub processing_time: f64,
}

/// Point-in-time view of a run, as published by its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// 0 to 100.
    pub progress: u8,
    /// 1-based position of the chunk being (or last) processed; 0 before the first.
    pub current_chunk: usize,
    pub total_chunks: usize,
    pub message: String,
    pub partial_segments: Vec<Segment>,
    pub chunk_times: Vec<ChunkTiming>,
    pub eta_seconds: Option<f64>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn new(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Idle,
            progress: 0,
            current_chunk: 0,
            total_chunks: 0,
            message: String::new(),
            partial_segments: Vec::new(),
            chunk_times: Vec::new(),
            eta_seconds: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id} is not active (status: {status})")]
    NotActive { id: TaskId, status: TaskStatus },
}

#[derive(Debug, Default)]
struct ControlFlags {
    paused: bool,
    cancelled: bool,
    finished: Option<TaskStatus>,
}

/// Pause/cancel flags shared between a worker and its controllers. A paused worker blocks on
/// the condvar; `resume`, `cancel` and `finish` all wake it.
#[derive(Debug, Default)]
pub struct TaskControl {
    flags: Mutex<ControlFlags>,
    wake: Condvar,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, ControlFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self, id: &str) -> Result<MutexGuard<'_, ControlFlags>, ControlError> {
        let flags = self.flags();
        match flags.finished {
            Some(status) => Err(ControlError::NotActive {
                id: id.to_string(),
                status,
            }),
            None => Ok(flags),
        }
    }

    pub fn pause(&self, id: &str) -> Result<(), ControlError> {
        self.active(id)?.paused = true;
        Ok(())
    }

    pub fn resume(&self, id: &str) -> Result<(), ControlError> {
        self.active(id)?.paused = false;
        self.wake.notify_all();
        Ok(())
    }

    pub fn cancel(&self, id: &str) -> Result<(), ControlError> {
        self.active(id)?.cancelled = true;
        self.wake.notify_all();
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.flags().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags().cancelled
    }

    /// Block while paused. Returns `true` if the task was cancelled (before or during the wait).
    pub fn wait_while_paused(&self) -> bool {
        let mut flags = self.flags();
        while flags.paused && !flags.cancelled && flags.finished.is_none() {
            flags = self
                .wake
                .wait(flags)
                .unwrap_or_else(PoisonError::into_inner);
        }
        flags.cancelled
    }

    /// Mark the run terminal; later control requests are rejected.
    pub fn finish(&self, status: TaskStatus) {
        let mut flags = self.flags();
        flags.finished = Some(status);
        flags.paused = false;
        self.wake.notify_all();
    }
}

#[derive(Debug)]
struct TaskEntry {
    control: Arc<TaskControl>,
    snapshot: TaskSnapshot,
}

/// Worker-side view of one registered task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    control: Arc<TaskControl>,
    entries: Arc<DashMap<TaskId, TaskEntry>>,
    listener: Option<UnboundedSender<TaskSnapshot>>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control(&self) -> &Arc<TaskControl> {
        &self.control
    }

    /// Store `snapshot` as the task's current state and push it to the listener, if any.
    pub fn publish(&self, snapshot: &TaskSnapshot) {
        let mut snapshot = snapshot.clone();
        snapshot.updated_at = Utc::now();
        if let Some(mut entry) = self.entries.get_mut(&self.id) {
            entry.snapshot = snapshot.clone();
        }
        if let Some(ref tx) = self.listener {
            let _ = tx.send(snapshot);
        }
    }
}

/// All known tasks, keyed by id. Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    entries: Arc<DashMap<TaskId, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new idle task with a fresh id.
    pub fn register(&self, listener: Option<UnboundedSender<TaskSnapshot>>) -> TaskHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let control = Arc::new(TaskControl::new());
        self.entries.insert(
            id.clone(),
            TaskEntry {
                control: Arc::clone(&control),
                snapshot: TaskSnapshot::new(id.clone()),
            },
        );
        debug!("Pipeline: registered task {}", id);
        TaskHandle {
            id,
            control,
            entries: Arc::clone(&self.entries),
            listener,
        }
    }

    /// Register a task and open a progress channel for it.
    pub fn register_with_channel(&self) -> (TaskHandle, UnboundedReceiver<TaskSnapshot>) {
        let (tx, rx) = unbounded_channel();
        (self.register(Some(tx)), rx)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self, id: &str) -> Option<TaskSnapshot> {
        self.entries.get(id).map(|e| e.snapshot.clone())
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.entries.iter().map(|e| e.snapshot.clone()).collect()
    }

    pub fn remove(&self, id: &str) -> Option<TaskSnapshot> {
        self.entries.remove(id).map(|(_, e)| e.snapshot)
    }

    fn control(&self, id: &str) -> Result<Arc<TaskControl>, ControlError> {
        self.entries
            .get(id)
            .map(|e| Arc::clone(&e.control))
            .ok_or_else(|| ControlError::NotFound(id.to_string()))
    }

    /// Request a pause; the worker stops at the next chunk boundary.
    pub fn pause(&self, id: &str) -> Result<(), ControlError> {
        self.control(id)?.pause(id)?;
        info!("Pipeline: pause requested for task {}", id);
        Ok(())
    }

    pub fn resume(&self, id: &str) -> Result<(), ControlError> {
        self.control(id)?.resume(id)?;
        info!("Pipeline: resume requested for task {}", id);
        Ok(())
    }

    /// Request cancellation; the worker stops at the next chunk boundary.
    pub fn cancel(&self, id: &str) -> Result<(), ControlError> {
        self.control(id)?.cancel(id)?;
        info!("Pipeline: cancel requested for task {}", id);
        Ok(())
    }
}
