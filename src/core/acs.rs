//! The ACS core: Inform ingestion, provisioning, and task-queue translation
//! (`spec.md` §4.2–§4.5). `core::dispatcher` is the thin HTTP layer in front
//! of this; everything here is transport-agnostic and exercised directly by
//! tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::session_manager::{Session, SessionManager};
use crate::model::device::{Device, DeviceParameter, DeviceStatus};
use crate::model::task::{Task, TaskType};
use crate::normalizer;
use crate::protocols::cwmp::outbound;
use crate::protocols::cwmp::{DeviceIdStruct, Fault, ParamTriple};
use crate::provisioning::{self, Provision};
use crate::store::Store;
use crate::vendor::{Vendor, VendorProfile};
use crate::{Error, Result};

/// Fire-and-forget notifications for the (external) broadcast hub
/// (`spec.md` §5: "back-pressure on the hub must not block the dispatcher").
#[derive(Debug, Clone)]
pub enum AcsEvent {
    DeviceStatusChanged { device_id: Uuid, status: DeviceStatus },
    TaskCompleted { device_id: Uuid, task_id: Uuid },
    TaskFailed { device_id: Uuid, task_id: Uuid, error: String },
}

/// What the dispatcher should write back to the CPE after one request leg.
pub enum DispatchOutcome {
    /// End the session: HTTP 204, no body.
    NoContent,
    /// Emit this full outbound SOAP envelope with HTTP 200.
    Rpc(String),
}

/// Shared ACS state: persistence, session table, provisioning catalogue, and
/// the event sink, constructed once in `main` and handed to every request.
pub struct Acs {
    store: Arc<dyn Store>,
    pub sessions: SessionManager,
    provisions: Vec<Provision>,
    events: mpsc::Sender<AcsEvent>,
    http_client: reqwest::Client,
    connection_request_timeout: Duration,
}

impl Acs {
    pub fn new(
        store: Arc<dyn Store>,
        session_idle_timeout: Duration,
        connection_request_timeout: Duration,
        events: mpsc::Sender<AcsEvent>,
    ) -> Self {
        Self {
            store,
            sessions: SessionManager::new(session_idle_timeout),
            provisions: provisioning::default_provisions(),
            events,
            http_client: reqwest::Client::new(),
            connection_request_timeout,
        }
    }

    fn emit(&self, event: AcsEvent) {
        // Never `.await` here: a full/closed channel must not block ingestion.
        if self.events.try_send(event).is_err() {
            debug!("event channel full or closed, dropping notification");
        }
    }

    /// S0 (`spec.md` §4.5): ingest an `Inform`, run provisioning, and open a
    /// session. The InformResponse envelope is the caller's job to build
    /// (the correlation id is the inbound envelope's, which this function
    /// never sees).
    pub async fn handle_inform(
        &self,
        remote_addr: SocketAddr,
        device_id: DeviceIdStruct,
        event_codes: Vec<String>,
        _max_envelopes: u32,
        _current_time: Option<DateTime<Utc>>,
        _retry_count: u32,
        parameters: Vec<ParamTriple>,
    ) -> Result<()> {
        let now = Utc::now();
        let serial = normalizer::decode_serial(&device_id.serial_number);
        let remote_address_str = remote_addr.to_string();

        let existing = self.store.find_device_by_serial(&serial).await?;
        let is_first_contact = existing.is_none();
        let mut device = existing.unwrap_or_else(|| {
            Device::new(serial.clone(), device_id.manufacturer.clone(), Some(remote_address_str.clone()))
        });

        device.manufacturer = device_id.manufacturer.clone();
        if !device_id.oui.is_empty() {
            device.oui = Some(device_id.oui.clone());
        }
        if !device_id.product_class.is_empty() {
            device.product_class = Some(device_id.product_class.clone());
        }
        device.remote_address = Some(remote_address_str);
        device.last_inform = Some(now);
        device.last_contact = Some(now);
        device.status = DeviceStatus::Online;

        let vendor = Vendor::identify(&device.manufacturer);
        normalizer::apply_inform(&mut device, vendor, &parameters);

        if is_first_contact {
            self.store.create_device(device.clone()).await?;
        } else {
            self.store.update_device(device.clone()).await?;
        }
        self.store.update_device_status(device.id, DeviceStatus::Online).await?;
        self.emit(AcsEvent::DeviceStatusChanged { device_id: device.id, status: DeviceStatus::Online });

        for (path, value, param_type) in &parameters {
            self.store
                .upsert_parameter(DeviceParameter {
                    device_id: device.id,
                    path: path.clone(),
                    value: value.clone(),
                    param_type: param_type.clone(),
                    writable: false,
                    updated_at: now,
                })
                .await?;
        }

        debug!(device_id = %device.id, serial = %device.serial_number, event_codes = ?event_codes, "Inform ingested");

        if let Err(e) = provisioning::run_provisions(self.store.as_ref(), &device, vendor, &self.provisions).await {
            error!(device_id = %device.id, error = %e, "provisioning pass failed");
        }

        if is_first_contact {
            if let Err(e) =
                provisioning::bootstrap_on_first_inform(self.store.as_ref(), &device, vendor, device.uptime_seconds)
                    .await
            {
                error!(device_id = %device.id, error = %e, "bootstrap hardening failed");
            }
        }

        self.sessions.insert(remote_addr, Session::new(device.id, device.serial_number.clone()));
        Ok(())
    }

    /// S1 draining step (`spec.md` §4.5): an empty body asks for the next
    /// pending task. Resolves the device via the session, falling back to a
    /// remote-address lookup if the session was lost (`spec.md` §3, §9).
    pub async fn handle_empty_body(&self, remote_addr: SocketAddr) -> Result<DispatchOutcome> {
        let device_id = match self.sessions.get(&remote_addr) {
            Some(session) => Some(session.device_id),
            None => {
                let addr_str = remote_addr.to_string();
                self.store.find_device_by_remote_address(&addr_str).await?.map(|d| d.id)
            }
        };
        let Some(device_id) = device_id else {
            return Ok(DispatchOutcome::NoContent);
        };
        self.drain_next(device_id, remote_addr).await
    }

    /// A `<X>Response>` body: identify the task by correlation id, persist the
    /// result, mark it completed, then drain the next task as if an
    /// empty-body request had arrived (`spec.md` §4.5).
    pub async fn handle_response(
        &self,
        remote_addr: SocketAddr,
        correlation_id: Option<&str>,
        result: serde_json::Value,
        parameters: Option<&[ParamTriple]>,
    ) -> Result<DispatchOutcome> {
        let Some(correlation_id) = correlation_id else {
            warn!("response body carried no correlation id; dropping");
            return Ok(DispatchOutcome::NoContent);
        };
        let Some(task) = self.store.find_running_task_by_correlation_id(correlation_id).await? else {
            warn!(correlation_id, "response matched no running task; dropping");
            return Ok(DispatchOutcome::NoContent);
        };

        if let Some(parameters) = parameters {
            let now = Utc::now();
            for (path, value, param_type) in parameters {
                self.store
                    .upsert_parameter(DeviceParameter {
                        device_id: task.device_id,
                        path: path.clone(),
                        value: value.clone(),
                        param_type: param_type.clone(),
                        writable: false,
                        updated_at: now,
                    })
                    .await?;
            }
        }

        self.store.mark_task_completed(task.id, result).await?;
        self.emit(AcsEvent::TaskCompleted { device_id: task.device_id, task_id: task.id });
        self.sessions.touch(&remote_addr);

        self.drain_next(task.device_id, remote_addr).await
    }

    /// A `<Fault>` body: mark the running task failed and end the session
    /// (`spec.md` §4.5 scenario 4).
    pub async fn handle_fault(
        &self,
        remote_addr: SocketAddr,
        correlation_id: Option<&str>,
        fault: Fault,
    ) -> Result<DispatchOutcome> {
        if let Some(correlation_id) = correlation_id {
            if let Some(task) = self.store.find_running_task_by_correlation_id(correlation_id).await? {
                let error = format!("CWMP Fault: {}", fault.raw_inner_xml);
                self.store.mark_task_failed(task.id, error.clone()).await?;
                self.emit(AcsEvent::TaskFailed { device_id: task.device_id, task_id: task.id, error });
            } else {
                warn!(correlation_id, "fault matched no running task");
            }
        }
        self.sessions.remove(&remote_addr);
        Ok(DispatchOutcome::NoContent)
    }

    /// Log an unrecognized RPC and end the session gracefully (`spec.md`
    /// §4.1 failure modes).
    pub fn handle_unknown_rpc(&self, name: &str) {
        warn!(rpc = name, "unrecognized CWMP RPC; ending session");
    }

    async fn drain_next(&self, device_id: Uuid, remote_addr: SocketAddr) -> Result<DispatchOutcome> {
        let Some(task) = self.store.mark_next_task_running(device_id).await? else {
            self.sessions.remove(&remote_addr);
            return Ok(DispatchOutcome::NoContent);
        };

        match build_request_envelope(&task) {
            Ok(envelope) => {
                self.sessions.touch(&remote_addr);
                Ok(DispatchOutcome::Rpc(envelope))
            }
            Err(e) => {
                // Translation error: the task was already claimed atomically
                // (`spec.md` §5's overlapping-reconnect guarantee), so it can't
                // be handed back to pending; mark it failed instead of leaving
                // it stuck `running` forever (`spec.md` §7 "Task translation
                // error").
                error!(task_id = %task.id, error = %e, "task translation error");
                self.store.mark_task_failed(task.id, e.to_string()).await?;
                self.emit(AcsEvent::TaskFailed { device_id, task_id: task.id, error: e.to_string() });
                self.sessions.remove(&remote_addr);
                Ok(DispatchOutcome::NoContent)
            }
        }
    }

    /// Out-of-session operation: poke a sleeping CPE to open a session
    /// (`spec.md` §4.5 "Connection-request").
    pub async fn connection_request(&self, device_id: Uuid) -> Result<()> {
        let device = self
            .store
            .find_device_by_id(device_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("device {device_id}")))?;
        let url = device
            .connection_request_url
            .ok_or_else(|| Error::network("device has no connection-request URL"))?;

        let response = self
            .http_client
            .get(&url)
            .timeout(self.connection_request_timeout)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 200 || status.as_u16() == 204 {
            Ok(())
        } else {
            Err(Error::network(format!("connection-request returned unexpected status {status}")))
        }
    }
}

/// Translate a queued `Task` into its outbound SOAP envelope (`spec.md` §4.3
/// dispatch contract). Errors here indicate a task whose `input` doesn't
/// match the shape its `kind` requires.
fn build_request_envelope(task: &Task) -> Result<String> {
    let correlation_id = task.correlation_id();

    match task.kind {
        TaskType::GetParameterValues | TaskType::Refresh => {
            let names = task
                .input
                .get("names")
                .and_then(|v| v.as_array())
                .ok_or_else(|| Error::task("GetParameterValues task missing `names`"))?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or_else(|| Error::task("GetParameterValues task `names` is not all strings"))?;
            Ok(outbound::get_parameter_values(&correlation_id, &names))
        }
        TaskType::SetParameterValues => {
            let pairs_obj = task
                .input
                .get("pairs")
                .and_then(|v| v.as_object())
                .ok_or_else(|| Error::task("SetParameterValues task missing `pairs`"))?;
            let pairs: Vec<(String, String)> = pairs_obj
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect();
            let parameter_key = task.input.get("parameter_key").and_then(|v| v.as_str()).unwrap_or("");
            Ok(outbound::set_parameter_values(&correlation_id, &pairs, parameter_key))
        }
        TaskType::Reboot => {
            let command_key = task.input.get("command_key").and_then(|v| v.as_str()).unwrap_or("");
            Ok(outbound::reboot(&correlation_id, command_key))
        }
        TaskType::FactoryReset => Ok(outbound::factory_reset(&correlation_id)),
        TaskType::Download => {
            let url = task
                .input
                .get("url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::task("Download task missing `url`"))?;
            let file_size = task.input.get("file_size").and_then(|v| v.as_u64()).unwrap_or(0);
            let file_type = task.input.get("file_type").and_then(|v| v.as_str());
            let username = task.input.get("username").and_then(|v| v.as_str());
            let password = task.input.get("password").and_then(|v| v.as_str());
            let credentials = match (username, password) {
                (Some(u), Some(p)) => Some((u, p)),
                _ => None,
            };
            Ok(outbound::download(&correlation_id, file_type, url, file_size, credentials))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::NewTask;

    fn make_acs() -> (Acs, mpsc::Receiver<AcsEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let acs = Acs::new(store, Duration::from_secs(120), Duration::from_secs(10), tx);
        (acs, rx)
    }

    fn addr() -> SocketAddr {
        "10.0.0.5:33445".parse().unwrap()
    }

    #[tokio::test]
    async fn first_contact_zte_creates_device_and_enqueues_tasks() {
        let (acs, mut rx) = make_acs();
        let device_id = DeviceIdStruct {
            manufacturer: "ZTE".to_string(),
            oui: "ABCDEF".to_string(),
            product_class: "ONU".to_string(),
            serial_number: "5A5445474243313233".to_string(),
        };
        let parameters = vec![
            (
                "InternetGatewayDevice.WANDevice.1.X_ZTE-COM_WANPONInterfaceConfig.RXPower".to_string(),
                "1585".to_string(),
                "xsd:int".to_string(),
            ),
            ("InternetGatewayDevice.DeviceInfo.UpTime".to_string(), "42".to_string(), "xsd:unsignedInt".to_string()),
        ];

        acs.handle_inform(addr(), device_id, vec!["0 BOOTSTRAP".to_string()], 1, None, 0, parameters)
            .await
            .unwrap();

        let session = acs.sessions.get(&addr()).unwrap();
        assert_eq!(session.serial_number, "ZTEGBC123");
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn draining_without_pending_tasks_ends_session() {
        let (acs, _rx) = make_acs();
        let device_id = DeviceIdStruct {
            manufacturer: "Generic".to_string(),
            oui: String::new(),
            product_class: String::new(),
            serial_number: "GENERICSERIAL01".to_string(),
        };
        acs.handle_inform(addr(), device_id, vec![], 1, None, 0, vec![]).await.unwrap();

        // Drain until no pending tasks remain (provisioning enqueues at least one).
        loop {
            match acs.handle_empty_body(addr()).await.unwrap() {
                DispatchOutcome::Rpc(_) => continue,
                DispatchOutcome::NoContent => break,
            }
        }
        assert!(acs.sessions.get(&addr()).is_none());
    }

    #[tokio::test]
    async fn unknown_correlation_id_is_dropped() {
        let (acs, _rx) = make_acs();
        let outcome = acs
            .handle_response(addr(), Some("task-does-not-exist"), serde_json::json!({}), None)
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::NoContent));
    }

    #[tokio::test]
    async fn translation_error_fails_the_claimed_task() {
        let (acs, _rx) = make_acs();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let acs = Acs::new(store.clone(), Duration::from_secs(120), Duration::from_secs(10), acs.events.clone());
        let device = Device::new("BADTASKDEVICE01".to_string(), "Generic".to_string(), None);
        store.create_device(device.clone()).await.unwrap();
        let task = store
            .create_task(NewTask {
                device_id: device.id,
                kind: TaskType::Download,
                input: serde_json::json!({ "no_url_here": true }),
            })
            .await
            .unwrap();

        let outcome = acs.drain_next(device.id, addr()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::NoContent));
        let pending = store.pending_tasks(Some(device.id)).await.unwrap();
        assert!(pending.is_empty(), "task must not remain pending once claimed atomically");
        let refetched = store.find_running_task_by_correlation_id(&task.correlation_id()).await.unwrap();
        assert!(refetched.is_none(), "task must no longer be running after a translation error");
    }
}
