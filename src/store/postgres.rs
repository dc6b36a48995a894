//! Reference `Store` implementation backed by PostgreSQL via `sqlx`.
//!
//! Queries are built with `sqlx::query` (runtime-checked) rather than the
//! `query!`/`query_as!` macros, since this crate ships without a live
//! database to verify against at compile time (grounded on
//! `adamtc007-ob-poc`'s `agent::telemetry::store` module, which uses the same
//! runtime-bound style for the same reason).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::model::device::{Device, DeviceListFilter, DeviceParameter, DeviceStatus};
use crate::model::task::{Task, TaskStatus, TaskType};
use crate::store::{NewTask, Store};
use crate::{Error, Result};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an already-established pool (tests, or a caller managing its own lifecycle).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn device_status_to_str(status: DeviceStatus) -> &'static str {
    status.as_str()
}

fn device_status_from_str(s: &str) -> DeviceStatus {
    DeviceStatus::parse(s).unwrap_or(DeviceStatus::Unknown)
}

fn task_type_to_str(kind: TaskType) -> &'static str {
    match kind {
        TaskType::GetParameterValues => "get_parameter_values",
        TaskType::SetParameterValues => "set_parameter_values",
        TaskType::Reboot => "reboot",
        TaskType::FactoryReset => "factory_reset",
        TaskType::Download => "download",
        TaskType::Refresh => "refresh",
    }
}

fn task_type_from_str(s: &str) -> Result<TaskType> {
    Ok(match s {
        "get_parameter_values" => TaskType::GetParameterValues,
        "set_parameter_values" => TaskType::SetParameterValues,
        "reboot" => TaskType::Reboot,
        "factory_reset" => TaskType::FactoryReset,
        "download" => TaskType::Download,
        "refresh" => TaskType::Refresh,
        other => return Err(Error::internal(format!("unknown task kind in store: {other}"))),
    })
}

fn task_status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

fn task_status_from_str(s: &str) -> Result<TaskStatus> {
    Ok(match s {
        "pending" => TaskStatus::Pending,
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        other => return Err(Error::internal(format!("unknown task status in store: {other}"))),
    })
}

fn device_from_row(row: &sqlx::postgres::PgRow) -> Result<Device> {
    Ok(Device {
        id: row.try_get("id")?,
        serial_number: row.try_get("serial_number")?,
        manufacturer: row.try_get("manufacturer")?,
        oui: row.try_get("oui")?,
        product_class: row.try_get("product_class")?,
        model_name: row.try_get("model_name")?,
        hardware_version: row.try_get("hardware_version")?,
        software_version: row.try_get("software_version")?,
        description: row.try_get("description")?,
        status: device_status_from_str(row.try_get::<String, _>("status")?.as_str()),
        last_inform: row.try_get("last_inform")?,
        last_contact: row.try_get("last_contact")?,
        uptime_seconds: row.try_get("uptime_seconds")?,
        remote_address: row.try_get("remote_address")?,
        mac_address: row.try_get("mac_address")?,
        rx_power_dbm: row.try_get("rx_power_dbm")?,
        tx_power_dbm: row.try_get("tx_power_dbm")?,
        temperature_c: row.try_get("temperature_c")?,
        voltage: row.try_get("voltage")?,
        bias_current_ma: row.try_get("bias_current_ma")?,
        external_ip: row.try_get("external_ip")?,
        connection_type: row.try_get("connection_type")?,
        pppoe_username: row.try_get("pppoe_username")?,
        pppoe_ip: row.try_get("pppoe_ip")?,
        connection_request_url: row.try_get("connection_request_url")?,
        client_count: row.try_get("client_count")?,
        template: row.try_get("template")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        customer_id: row.try_get("customer_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parameter_from_row(row: &sqlx::postgres::PgRow) -> Result<DeviceParameter> {
    Ok(DeviceParameter {
        device_id: row.try_get("device_id")?,
        path: row.try_get("path")?,
        value: row.try_get("value")?,
        param_type: row.try_get("param_type")?,
        writable: row.try_get("writable")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<Task> {
    Ok(Task {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        kind: task_type_from_str(&row.try_get::<String, _>("kind")?)?,
        status: task_status_from_str(&row.try_get::<String, _>("status")?)?,
        input: row.try_get("input")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn find_device_by_id(&self, id: Uuid) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE serial_number = $1")
            .bind(serial)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn find_device_by_template(&self, template: &str) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE template = $1")
            .bind(template)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn find_device_by_remote_address(&self, remote_address: &str) -> Result<Option<Device>> {
        let row = sqlx::query(
            "SELECT * FROM devices WHERE remote_address = $1 ORDER BY last_contact DESC NULLS LAST LIMIT 1",
        )
        .bind(remote_address)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn create_device(&self, device: Device) -> Result<Device> {
        sqlx::query(
            r#"
            INSERT INTO devices (
                id, serial_number, manufacturer, oui, product_class, model_name,
                hardware_version, software_version, description, status,
                last_inform, last_contact, uptime_seconds, remote_address, mac_address,
                rx_power_dbm, tx_power_dbm, temperature_c, voltage, bias_current_ma,
                external_ip, connection_type, pppoe_username, pppoe_ip, connection_request_url,
                client_count, template, latitude, longitude, customer_id,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10,
                $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20,
                $21, $22, $23, $24, $25,
                $26, $27, $28, $29, $30,
                $31, $32
            )
            "#,
        )
        .bind(device.id)
        .bind(&device.serial_number)
        .bind(&device.manufacturer)
        .bind(&device.oui)
        .bind(&device.product_class)
        .bind(&device.model_name)
        .bind(&device.hardware_version)
        .bind(&device.software_version)
        .bind(&device.description)
        .bind(device_status_to_str(device.status))
        .bind(device.last_inform)
        .bind(device.last_contact)
        .bind(device.uptime_seconds)
        .bind(&device.remote_address)
        .bind(&device.mac_address)
        .bind(device.rx_power_dbm)
        .bind(device.tx_power_dbm)
        .bind(device.temperature_c)
        .bind(device.voltage)
        .bind(device.bias_current_ma)
        .bind(&device.external_ip)
        .bind(&device.connection_type)
        .bind(&device.pppoe_username)
        .bind(&device.pppoe_ip)
        .bind(&device.connection_request_url)
        .bind(device.client_count)
        .bind(&device.template)
        .bind(device.latitude)
        .bind(device.longitude)
        .bind(device.customer_id)
        .bind(device.created_at)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(device)
    }

    async fn update_device(&self, mut device: Device) -> Result<Device> {
        device.updated_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE devices SET
                manufacturer = $2, oui = $3, product_class = $4, model_name = $5,
                hardware_version = $6, software_version = $7, description = $8, status = $9,
                last_inform = $10, last_contact = $11, uptime_seconds = $12, remote_address = $13,
                mac_address = $14, rx_power_dbm = $15, tx_power_dbm = $16, temperature_c = $17,
                voltage = $18, bias_current_ma = $19, external_ip = $20, connection_type = $21,
                pppoe_username = $22, pppoe_ip = $23, connection_request_url = $24, client_count = $25,
                template = $26, latitude = $27, longitude = $28, customer_id = $29, updated_at = $30
            WHERE id = $1
            "#,
        )
        .bind(device.id)
        .bind(&device.manufacturer)
        .bind(&device.oui)
        .bind(&device.product_class)
        .bind(&device.model_name)
        .bind(&device.hardware_version)
        .bind(&device.software_version)
        .bind(&device.description)
        .bind(device_status_to_str(device.status))
        .bind(device.last_inform)
        .bind(device.last_contact)
        .bind(device.uptime_seconds)
        .bind(&device.remote_address)
        .bind(&device.mac_address)
        .bind(device.rx_power_dbm)
        .bind(device.tx_power_dbm)
        .bind(device.temperature_c)
        .bind(device.voltage)
        .bind(device.bias_current_ma)
        .bind(&device.external_ip)
        .bind(&device.connection_type)
        .bind(&device.pppoe_username)
        .bind(&device.pppoe_ip)
        .bind(&device.connection_request_url)
        .bind(device.client_count)
        .bind(&device.template)
        .bind(device.latitude)
        .bind(device.longitude)
        .bind(device.customer_id)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(device)
    }

    async fn update_device_status(&self, device_id: Uuid, status: DeviceStatus) -> Result<()> {
        sqlx::query("UPDATE devices SET status = $2, updated_at = now() WHERE id = $1")
            .bind(device_id)
            .bind(device_status_to_str(status))
            .execute(&self.pool)
            .await?;
        self.append_status_log(device_id, status).await
    }

    async fn list_devices(&self, filter: DeviceListFilter) -> Result<Vec<Device>> {
        let limit = if filter.limit > 0 { filter.limit } else { i64::MAX };
        let rows = sqlx::query(
            r#"
            SELECT * FROM devices
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR serial_number ILIKE '%' || $2 || '%' OR template ILIKE '%' || $2 || '%')
            ORDER BY created_at
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(filter.status.map(device_status_to_str))
        .bind(filter.search)
        .bind(filter.offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn upsert_parameter(&self, param: DeviceParameter) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_parameters (device_id, path, value, param_type, writable, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (device_id, path) DO UPDATE SET
                value = EXCLUDED.value,
                param_type = EXCLUDED.param_type,
                writable = EXCLUDED.writable,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(param.device_id)
        .bind(&param.path)
        .bind(&param.value)
        .bind(&param.param_type)
        .bind(param.writable)
        .bind(param.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_parameters_by_device(
        &self,
        device_id: Uuid,
        path_prefix: Option<&str>,
    ) -> Result<Vec<DeviceParameter>> {
        let rows = sqlx::query(
            "SELECT * FROM device_parameters WHERE device_id = $1 AND ($2::text IS NULL OR path LIKE $2 || '%')",
        )
        .bind(device_id)
        .bind(path_prefix)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parameter_from_row).collect()
    }

    async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let task = Task::new_pending(new_task.device_id, new_task.kind, new_task.input);
        sqlx::query(
            r#"
            INSERT INTO tasks (id, device_id, kind, status, input, result, error, created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, NULL, NULL, $6, NULL, NULL)
            "#,
        )
        .bind(task.id)
        .bind(task.device_id)
        .bind(task_type_to_str(task.kind))
        .bind(task_status_to_str(task.status))
        .bind(&task.input)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(task)
    }

    async fn pending_tasks(&self, device_id: Option<Uuid>) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status = 'pending' AND ($1::uuid IS NULL OR device_id = $1) ORDER BY created_at",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn mark_next_task_running(&self, device_id: Uuid) -> Result<Option<Task>> {
        // Atomic pop-the-head: `FOR UPDATE SKIP LOCKED` means two overlapping
        // sessions for the same device never dispatch the same task twice
        // (`spec.md` §5).
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running', started_at = now()
            WHERE id = (
                SELECT id FROM tasks
                WHERE device_id = $1 AND status = 'pending'
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn mark_task_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'completed', result = $2, completed_at = now() WHERE id = $1")
            .bind(task_id)
            .bind(result)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: Uuid, error: String) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'failed', error = $2, completed_at = now() WHERE id = $1")
            .bind(task_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_running_task_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Task>> {
        let Some(task_id) = Task::parse_correlation_id(correlation_id) else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1 AND status = 'running'")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn find_task_by_id(&self, task_id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn append_status_log(&self, device_id: Uuid, status: DeviceStatus) -> Result<()> {
        sqlx::query("INSERT INTO device_status_log (device_id, status, changed_at) VALUES ($1, $2, now())")
            .bind(device_id)
            .bind(device_status_to_str(status))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => Some(r.try_get("value")?),
            None => None,
        })
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
