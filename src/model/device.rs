//! Device and device-parameter rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Live reachability state of a device, per `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unknown,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Unknown
    }
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(DeviceStatus::Online),
            "offline" => Some(DeviceStatus::Offline),
            "unknown" => Some(DeviceStatus::Unknown),
            _ => None,
        }
    }
}

/// A CPE known to the ACS, keyed by its (post-decode) serial number.
///
/// `serial_number` is immutable after creation (invariant i in `spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub serial_number: String,

    // Vendor identity
    pub manufacturer: String,
    pub oui: Option<String>,
    pub product_class: Option<String>,
    pub model_name: Option<String>,
    pub hardware_version: Option<String>,
    pub software_version: Option<String>,
    pub description: Option<String>,

    // Live state
    pub status: DeviceStatus,
    pub last_inform: Option<DateTime<Utc>>,
    pub last_contact: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<i64>,
    pub remote_address: Option<String>,
    pub mac_address: Option<String>,

    // Optical telemetry
    pub rx_power_dbm: Option<f64>,
    pub tx_power_dbm: Option<f64>,
    pub temperature_c: Option<f64>,
    pub voltage: Option<f64>,
    pub bias_current_ma: Option<f64>,

    // WAN projection
    pub external_ip: Option<String>,
    pub connection_type: Option<String>,
    pub pppoe_username: Option<String>,
    pub pppoe_ip: Option<String>,
    pub connection_request_url: Option<String>,

    pub client_count: i32,

    /// Free-form display handle; by convention the PPPoE username when known.
    pub template: Option<String>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub customer_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// A fresh, not-yet-provisioned device record for a serial seen for the first time.
    pub fn new(serial_number: String, manufacturer: String, remote_address: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            serial_number,
            manufacturer,
            oui: None,
            product_class: None,
            model_name: None,
            hardware_version: None,
            software_version: None,
            description: None,
            status: DeviceStatus::Unknown,
            last_inform: None,
            last_contact: None,
            uptime_seconds: None,
            remote_address,
            mac_address: None,
            rx_power_dbm: None,
            tx_power_dbm: None,
            temperature_c: None,
            voltage: None,
            bias_current_ma: None,
            external_ip: None,
            connection_type: None,
            pppoe_username: None,
            pppoe_ip: None,
            connection_request_url: None,
            client_count: 0,
            template: None,
            latitude: None,
            longitude: None,
            customer_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One raw vendor-specific parameter last reported for a device.
///
/// Unique on (device_id, path). `updated_at` is the timestamp of the message
/// that last carried this path (invariant iii in `spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceParameter {
    pub device_id: Uuid,
    pub path: String,
    pub value: String,
    pub param_type: String,
    pub writable: bool,
    pub updated_at: DateTime<Utc>,
}

/// One entry in a device's append-only status-change log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusLogEntry {
    pub device_id: Uuid,
    pub status: DeviceStatus,
    pub changed_at: DateTime<Utc>,
}

/// Filters accepted by `Store::list_devices`.
#[derive(Debug, Clone, Default)]
pub struct DeviceListFilter {
    pub status: Option<DeviceStatus>,
    pub search: Option<String>,
    pub offset: i64,
    pub limit: i64,
}
