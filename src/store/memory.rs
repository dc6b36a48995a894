//! In-memory `Store` implementation backed by `dashmap`, used by tests and as
//! a zero-dependency quickstart backend (grounded on the teacher's extensive
//! `DashMap` usage in `services::cdr` and `services::sip_router`).

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::model::device::{Device, DeviceListFilter, DeviceParameter, DeviceStatus, DeviceStatusLogEntry};
use crate::model::task::{Task, TaskStatus};
use crate::store::{NewTask, Store};
use crate::{Error, Result};

#[derive(Default)]
pub struct InMemoryStore {
    devices: DashMap<Uuid, Device>,
    parameters: DashMap<(Uuid, String), DeviceParameter>,
    tasks: DashMap<Uuid, Task>,
    /// Insertion order of each task, since `created_at` alone can tie within
    /// the same millisecond and dashmap iteration order is unspecified.
    task_seq: DashMap<Uuid, i64>,
    status_log: DashMap<Uuid, Vec<DeviceStatusLogEntry>>,
    settings: DashMap<String, String>,
    /// Serializes `mark_next_task_running` per device so two concurrent
    /// dispatchers never pick the same pending task.
    device_locks: DashMap<Uuid, std::sync::Arc<tokio::sync::Mutex<()>>>,
    insertion_seq: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> i64 {
        self.insertion_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn lock_for(&self, device_id: Uuid) -> std::sync::Arc<tokio::sync::Mutex<()>> {
        self.device_locks
            .entry(device_id)
            .or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_device_by_id(&self, id: Uuid) -> Result<Option<Device>> {
        Ok(self.devices.get(&id).map(|d| d.clone()))
    }

    async fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>> {
        Ok(self.devices.iter().find(|d| d.serial_number == serial).map(|d| d.clone()))
    }

    async fn find_device_by_template(&self, template: &str) -> Result<Option<Device>> {
        Ok(self
            .devices
            .iter()
            .find(|d| d.template.as_deref() == Some(template))
            .map(|d| d.clone()))
    }

    async fn find_device_by_remote_address(&self, remote_address: &str) -> Result<Option<Device>> {
        Ok(self
            .devices
            .iter()
            .filter(|d| d.remote_address.as_deref() == Some(remote_address))
            .max_by_key(|d| d.last_contact)
            .map(|d| d.clone()))
    }

    async fn create_device(&self, device: Device) -> Result<Device> {
        self.devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn update_device(&self, mut device: Device) -> Result<Device> {
        device.updated_at = Utc::now();
        self.devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn update_device_status(&self, device_id: Uuid, status: DeviceStatus) -> Result<()> {
        if let Some(mut device) = self.devices.get_mut(&device_id) {
            device.status = status;
            device.updated_at = Utc::now();
        }
        self.append_status_log(device_id, status).await
    }

    async fn list_devices(&self, filter: DeviceListFilter) -> Result<Vec<Device>> {
        let mut matched: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| filter.status.map(|s| s == d.status).unwrap_or(true))
            .filter(|d| {
                filter
                    .search
                    .as_deref()
                    .map(|needle| {
                        d.serial_number.contains(needle)
                            || d.template.as_deref().unwrap_or_default().contains(needle)
                    })
                    .unwrap_or(true)
            })
            .map(|d| d.clone())
            .collect();
        matched.sort_by_key(|d| d.created_at);
        let offset = filter.offset.max(0) as usize;
        let limit = if filter.limit > 0 { filter.limit as usize } else { matched.len() };
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn upsert_parameter(&self, param: DeviceParameter) -> Result<()> {
        self.parameters.insert((param.device_id, param.path.clone()), param);
        Ok(())
    }

    async fn list_parameters_by_device(
        &self,
        device_id: Uuid,
        path_prefix: Option<&str>,
    ) -> Result<Vec<DeviceParameter>> {
        Ok(self
            .parameters
            .iter()
            .filter(|entry| entry.key().0 == device_id)
            .filter(|entry| path_prefix.map(|p| entry.value().path.starts_with(p)).unwrap_or(true))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let task = Task::new_pending(new_task.device_id, new_task.kind, new_task.input);
        self.task_seq.insert(task.id, self.next_seq());
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn pending_tasks(&self, device_id: Option<Uuid>) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| device_id.map(|id| id == t.device_id).unwrap_or(true))
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| self.task_seq.get(&t.id).map(|s| *s).unwrap_or(i64::MAX));
        Ok(tasks)
    }

    async fn mark_next_task_running(&self, device_id: Uuid) -> Result<Option<Task>> {
        let lock = self.lock_for(device_id);
        let _guard = lock.lock().await;

        let mut candidates: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.device_id == device_id && t.status == TaskStatus::Pending)
            .map(|t| t.clone())
            .collect();
        candidates.sort_by_key(|t| self.task_seq.get(&t.id).map(|s| *s).unwrap_or(i64::MAX));
        let Some(mut head) = candidates.into_iter().next() else {
            return Ok(None);
        };
        head.status = TaskStatus::Running;
        head.started_at = Some(Utc::now());
        self.tasks.insert(head.id, head.clone());
        Ok(Some(head))
    }

    async fn mark_task_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| Error::not_found(format!("task {task_id}")))?;
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: Uuid, error: String) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| Error::not_found(format!("task {task_id}")))?;
        task.status = TaskStatus::Failed;
        task.error = Some(error);
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn find_running_task_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Task>> {
        let Some(task_id) = Task::parse_correlation_id(correlation_id) else {
            return Ok(None);
        };
        Ok(self
            .tasks
            .get(&task_id)
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.clone()))
    }

    async fn find_task_by_id(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.get(&task_id).map(|t| t.clone()))
    }

    async fn append_status_log(&self, device_id: Uuid, status: DeviceStatus) -> Result<()> {
        self.status_log.entry(device_id).or_default().push(DeviceStatusLogEntry {
            device_id,
            status,
            changed_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.settings.get(key).map(|v| v.clone()))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::device::Device;
    use crate::model::task::TaskType;

    #[tokio::test]
    async fn task_queue_is_fifo_per_device() {
        let store = InMemoryStore::new();
        let device_id = Uuid::new_v4();
        let t1 = store
            .create_task(NewTask { device_id, kind: TaskType::GetParameterValues, input: serde_json::json!({}) })
            .await
            .unwrap();
        let t2 = store
            .create_task(NewTask { device_id, kind: TaskType::Reboot, input: serde_json::json!({}) })
            .await
            .unwrap();

        let running1 = store.mark_next_task_running(device_id).await.unwrap().unwrap();
        assert_eq!(running1.id, t1.id);
        assert_eq!(running1.status, TaskStatus::Running);

        // t1 still running; the next pending task is t2 once t1 completes.
        store.mark_task_completed(t1.id, serde_json::json!({"ok": true})).await.unwrap();
        let running2 = store.mark_next_task_running(device_id).await.unwrap().unwrap();
        assert_eq!(running2.id, t2.id);
    }

    #[tokio::test]
    async fn late_response_to_completed_task_is_ignored() {
        let store = InMemoryStore::new();
        let device_id = Uuid::new_v4();
        let task = store
            .create_task(NewTask { device_id, kind: TaskType::Reboot, input: serde_json::json!({}) })
            .await
            .unwrap();
        store.mark_next_task_running(device_id).await.unwrap();
        store.mark_task_completed(task.id, serde_json::json!({})).await.unwrap();

        let correlation = task.correlation_id();
        let found = store.find_running_task_by_correlation_id(&correlation).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn device_lookup_by_serial() {
        let store = InMemoryStore::new();
        let device = Device::new("ABC123456789".to_string(), "Generic".to_string(), None);
        store.create_device(device.clone()).await.unwrap();
        let found = store.find_device_by_serial("ABC123456789").await.unwrap().unwrap();
        assert_eq!(found.id, device.id);
    }
}
