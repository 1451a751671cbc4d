//! Status types reported by the connector runtime.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a connector or one of its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Running,
    Paused,
    Failed,
    Unassigned,
    Restarting,
    Destroyed,
    /// States introduced by newer runtimes we don't know about yet
    #[serde(other)]
    Unknown,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "RUNNING",
            RunState::Paused => "PAUSED",
            RunState::Failed => "FAILED",
            RunState::Unassigned => "UNASSIGNED",
            RunState::Restarting => "RESTARTING",
            RunState::Destroyed => "DESTROYED",
            RunState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connector-level state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorState {
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

/// State of one connector task, with the failure trace when it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub id: u32,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Aggregated status of one connector, as returned by
/// `GET /connectors/{name}/status`. Computed by the runtime on demand,
/// never persisted by pipesync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorStatus {
    pub name: String,
    pub connector: ConnectorState,
    #[serde(default)]
    pub tasks: Vec<TaskState>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub connector_type: Option<String>,
}

impl ConnectorStatus {
    /// First task in FAILED state, if any.
    pub fn first_failed_task(&self) -> Option<&TaskState> {
        self.tasks.iter().find(|t| t.state == RunState::Failed)
    }

    /// True when the connector and every task report RUNNING.
    ///
    /// An empty task list is not "running": the runtime reports no tasks
    /// while it is still assigning them, so callers keep polling.
    pub fn is_running(&self) -> bool {
        self.connector.state == RunState::Running
            && !self.tasks.is_empty()
            && self.tasks.iter().all(|t| t.state == RunState::Running)
    }
}
