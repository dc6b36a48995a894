//! The persistence contract consumed by the core (`spec.md` §6).
//!
//! The core never depends on a concrete storage engine — only on this trait.
//! Two implementations ship with this crate: [`memory::InMemoryStore`] (a
//! dashmap-backed store used by tests and as a zero-dependency quickstart) and
//! [`postgres::PostgresStore`] (the reference backend, via `sqlx`).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::device::{Device, DeviceListFilter, DeviceParameter, DeviceStatus};
use crate::model::task::{Task, TaskType};
use crate::Result;

/// `Store::create_task`'s `kind`/`input` pair, grouped so callers can't forget one.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub device_id: Uuid,
    pub kind: TaskType,
    pub input: serde_json::Value,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- Devices ---------------------------------------------------------
    async fn find_device_by_id(&self, id: Uuid) -> Result<Option<Device>>;
    async fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>>;
    async fn find_device_by_template(&self, template: &str) -> Result<Option<Device>>;
    /// Fallback lookup used by the dispatcher when a session has been lost:
    /// match a response-bearing message against the most recently contacted
    /// device at this remote address (`spec.md` §3 "Session" lifecycle note).
    async fn find_device_by_remote_address(&self, remote_address: &str) -> Result<Option<Device>>;
    async fn create_device(&self, device: Device) -> Result<Device>;
    async fn update_device(&self, device: Device) -> Result<Device>;
    /// Update `status` and append a row to the device's status-change log.
    async fn update_device_status(&self, device_id: Uuid, status: DeviceStatus) -> Result<()>;
    async fn list_devices(&self, filter: DeviceListFilter) -> Result<Vec<Device>>;

    // -- Parameters --------------------------------------------------------
    async fn upsert_parameter(&self, param: DeviceParameter) -> Result<()>;
    async fn list_parameters_by_device(
        &self,
        device_id: Uuid,
        path_prefix: Option<&str>,
    ) -> Result<Vec<DeviceParameter>>;

    // -- Tasks ---------------------------------------------------------
    async fn create_task(&self, task: NewTask) -> Result<Task>;
    /// Oldest pending task for one device, or every device's oldest pending
    /// task when `device_id` is `None` (used by a background supervisor;
    /// `spec.md` §9 resolves the source's `device_id = 0` ambiguity this way).
    async fn pending_tasks(&self, device_id: Option<Uuid>) -> Result<Vec<Task>>;
    /// Atomically move the oldest pending task for `device_id` to `Running`
    /// and return it. Must not race with a concurrent call for the same
    /// device (`spec.md` §5).
    async fn mark_next_task_running(&self, device_id: Uuid) -> Result<Option<Task>>;
    async fn mark_task_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<()>;
    async fn mark_task_failed(&self, task_id: Uuid, error: String) -> Result<()>;
    /// Look up a task by its `cwmp:ID` correlation token. Returns `Ok(None)`
    /// unless the task exists and is currently `Running`, so late duplicate
    /// responses are silently ignored (`spec.md` §4.3).
    async fn find_running_task_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Task>>;
    async fn find_task_by_id(&self, task_id: Uuid) -> Result<Option<Task>>;

    // -- Status log --------------------------------------------------------
    async fn append_status_log(&self, device_id: Uuid, status: DeviceStatus) -> Result<()>;

    // -- Settings ------------------------------------------------------
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
