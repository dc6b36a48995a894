//! Provisioning engine: runs after every Inform, evaluating a priority-ordered
//! list of *provisions* against the updated device record to enqueue zero or
//! more tasks (`spec.md` §4.4).

use std::collections::BTreeMap;

use chrono::{Duration as ChronoDuration, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::model::device::Device;
use crate::model::task::TaskType;
use crate::store::{NewTask, Store};
use crate::vendor::{Vendor, VendorProfile};
use crate::Result;

/// One action a matching provision contributes to the refresh/set-value pass
/// (`spec.md` §4.4).
#[derive(Debug, Clone)]
pub enum Action {
    /// Refresh `path` via `GetParameterValues` if its stored `updated_at` is
    /// older than `max_age`, or the path is unknown.
    Declare { path: &'static str, max_age: ChronoDuration },
    /// Set `path` to `value` via `SetParameterValues`, unless a
    /// higher-priority provision already claimed that path.
    SetValue { path: &'static str, value: &'static str },
}

/// What a provision requires of a device before its actions apply.
#[derive(Debug, Clone, Default)]
pub struct ProvisionFilter {
    pub required_vendor: Option<Vendor>,
    pub excluded_vendors: Vec<Vendor>,
    pub required_product_class: Option<&'static str>,
    pub serial_pattern: Option<&'static str>,
}

impl ProvisionFilter {
    fn matches(&self, device: &Device, vendor: Vendor) -> bool {
        if let Some(required) = self.required_vendor {
            if required != vendor {
                return false;
            }
        }
        if self.excluded_vendors.contains(&vendor) {
            return false;
        }
        if let Some(pc) = self.required_product_class {
            if device.product_class.as_deref() != Some(pc) {
                return false;
            }
        }
        if let Some(pattern) = self.serial_pattern {
            let Ok(re) = Regex::new(pattern) else { return false };
            if !re.is_match(&device.serial_number) {
                return false;
            }
        }
        true
    }
}

/// A named, weighted rule evaluated on every Inform. Lower weight wins
/// tie-breaks in dispatch order (`spec.md` §4.4).
#[derive(Debug, Clone)]
pub struct Provision {
    pub name: &'static str,
    pub weight: i32,
    pub filter: ProvisionFilter,
    pub actions: Vec<Action>,
}

fn excludes_mikrotik() -> ProvisionFilter {
    ProvisionFilter { excluded_vendors: vec![Vendor::MikroTik], ..Default::default() }
}

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// The default provision catalogue, in ascending weight order (`spec.md` §4.4 excerpt).
pub fn default_provisions() -> Vec<Provision> {
    vec![
        Provision {
            name: "basic-info",
            weight: 0,
            filter: excludes_mikrotik(),
            actions: vec![
                Action::Declare { path: "InternetGatewayDevice.DeviceInfo.Manufacturer", max_age: ChronoDuration::seconds(DAY) },
                Action::Declare { path: "InternetGatewayDevice.DeviceInfo.ProductClass", max_age: ChronoDuration::seconds(DAY) },
                Action::Declare { path: "InternetGatewayDevice.DeviceInfo.HardwareVersion", max_age: ChronoDuration::seconds(DAY) },
                Action::Declare { path: "InternetGatewayDevice.DeviceInfo.SoftwareVersion", max_age: ChronoDuration::seconds(DAY) },
                Action::Declare { path: "InternetGatewayDevice.DeviceInfo.UpTime", max_age: ChronoDuration::seconds(MINUTE) },
            ],
        },
        Provision {
            name: "wifi-config",
            weight: 10,
            filter: excludes_mikrotik(),
            actions: vec![
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.SSID", max_age: ChronoDuration::seconds(HOUR) },
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.PreSharedKey.1.KeyPassphrase", max_age: ChronoDuration::seconds(HOUR) },
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.Channel", max_age: ChronoDuration::seconds(HOUR) },
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.BeaconType", max_age: ChronoDuration::seconds(HOUR) },
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.TransmitPower", max_age: ChronoDuration::seconds(HOUR) },
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.SSIDAdvertisementEnabled", max_age: ChronoDuration::seconds(HOUR) },
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.TotalAssociations", max_age: ChronoDuration::seconds(HOUR) },
            ],
        },
        Provision {
            name: "wifi-clients",
            weight: 15,
            filter: excludes_mikrotik(),
            actions: vec![
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.AssociatedDevice", max_age: ChronoDuration::seconds(MINUTE) },
            ],
        },
        Provision {
            name: "wan-config",
            weight: 20,
            filter: excludes_mikrotik(),
            actions: vec![
                Action::Declare { path: "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.ConnectionStatus", max_age: ChronoDuration::seconds(MINUTE) },
                Action::Declare { path: "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.ExternalIPAddress", max_age: ChronoDuration::seconds(MINUTE) },
                Action::Declare { path: "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANIPConnection.1.ExternalIPAddress", max_age: ChronoDuration::seconds(MINUTE) },
                Action::Declare { path: "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Username", max_age: ChronoDuration::seconds(HOUR) },
                Action::Declare { path: "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.ConnectionType", max_age: ChronoDuration::seconds(HOUR) },
            ],
        },
        Provision {
            name: "lan-hosts",
            weight: 25,
            filter: excludes_mikrotik(),
            actions: vec![
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.Hosts.Host", max_age: ChronoDuration::seconds(MINUTE) },
                Action::Declare { path: "InternetGatewayDevice.LANDevice.1.Hosts.HostNumberOfEntries", max_age: ChronoDuration::seconds(MINUTE) },
            ],
        },
        Provision {
            name: "huawei-specific",
            weight: 100,
            filter: ProvisionFilter { required_vendor: Some(Vendor::Huawei), ..Default::default() },
            actions: vec![
                Action::Declare { path: "InternetGatewayDevice.WANDevice.1.X_GponInterafceConfig.RXPower", max_age: ChronoDuration::seconds(MINUTE) },
                Action::SetValue { path: "InternetGatewayDevice.X_HW_Security.WanWebEnable", value: "1" },
                Action::SetValue { path: "InternetGatewayDevice.X_HW_Security.WanTelnetEnable", value: "1" },
                Action::SetValue { path: "InternetGatewayDevice.X_HW_Security.WanSshEnable", value: "1" },
                Action::SetValue { path: "InternetGatewayDevice.X_HW_Security.FirewallLevel", value: "Custom" },
            ],
        },
        Provision {
            name: "zte-specific",
            weight: 100,
            filter: ProvisionFilter { required_vendor: Some(Vendor::Zte), ..Default::default() },
            actions: vec![
                Action::Declare { path: "InternetGatewayDevice.WANDevice.1.X_ZTE-COM_WANPONInterfaceConfig.RXPower", max_age: ChronoDuration::seconds(MINUTE) },
                Action::SetValue { path: "InternetGatewayDevice.X_ZTE-COM_IPV4ServiceControl.WebEnable", value: "1" },
                Action::SetValue { path: "InternetGatewayDevice.X_ZTE-COM_IPV4ServiceControl.TelnetEnable", value: "1" },
                Action::SetValue { path: "InternetGatewayDevice.X_ZTE-COM_IPV4ServiceControl.SshEnable", value: "1" },
                Action::SetValue { path: "InternetGatewayDevice.X_ZTE-COM_IPV4ServiceControl.FirewallLevel", value: "Custom" },
            ],
        },
        Provision {
            name: "fiberhome-specific",
            weight: 100,
            filter: ProvisionFilter { required_vendor: Some(Vendor::FiberHome), ..Default::default() },
            actions: vec![
                Action::Declare { path: "InternetGatewayDevice.WANDevice.1.X_FH_GponInterfaceConfig.RXPower", max_age: ChronoDuration::seconds(MINUTE) },
                Action::SetValue { path: "InternetGatewayDevice.X_FH_Security.TelnetEnable", value: "1" },
                Action::SetValue { path: "InternetGatewayDevice.X_FH_Security.FirewallLevel", value: "Custom" },
            ],
        },
    ]
}

/// Run every provision matching `device`/`vendor` and enqueue the resulting
/// tasks, per the four execution steps in `spec.md` §4.4.
pub async fn run_provisions(
    store: &dyn Store,
    device: &Device,
    vendor: Vendor,
    provisions: &[Provision],
) -> Result<Vec<Uuid>> {
    let mut matching: Vec<&Provision> = provisions.iter().filter(|p| p.filter.matches(device, vendor)).collect();
    matching.sort_by_key(|p| p.weight);

    let mut refresh_set: Vec<&'static str> = Vec::new();
    let mut seen_refresh = std::collections::HashSet::new();
    let mut set_values: BTreeMap<&'static str, &'static str> = BTreeMap::new();

    for provision in &matching {
        for action in &provision.actions {
            match action {
                Action::Declare { path, max_age } => {
                    let stale = is_stale(store, device.id, path, *max_age).await?;
                    if stale && seen_refresh.insert(*path) {
                        refresh_set.push(path);
                    }
                }
                Action::SetValue { path, value } => {
                    set_values.entry(path).or_insert(value);
                }
            }
        }
    }

    let mut created = Vec::new();
    if !refresh_set.is_empty() {
        let input = serde_json::json!({ "names": refresh_set });
        let task = store
            .create_task(NewTask { device_id: device.id, kind: TaskType::GetParameterValues, input })
            .await?;
        created.push(task.id);
    }
    if !set_values.is_empty() {
        let input = serde_json::json!({
            "pairs": set_values,
            "parameter_key": "",
        });
        let task = store
            .create_task(NewTask { device_id: device.id, kind: TaskType::SetParameterValues, input })
            .await?;
        created.push(task.id);
    }

    Ok(created)
}

async fn is_stale(store: &dyn Store, device_id: Uuid, path: &str, max_age: ChronoDuration) -> Result<bool> {
    let existing = store.list_parameters_by_device(device_id, Some(path)).await?;
    let Some(param) = existing.iter().find(|p| p.path == path) else {
        return Ok(true);
    };
    Ok(Utc::now() - param.updated_at > max_age)
}

/// The bootstrap-on-first-Inform hardening special case (`spec.md` §4.4):
/// for Huawei/Zte/FiberHome, additionally enqueue a hardening
/// `SetParameterValues` task and a `GetParameterValues` task listing the four
/// root sub-trees. Returns `None` for every other vendor.
///
/// Run once per device — by the Inform handler path that just created the
/// device row for a previously-unseen serial, not on every Inform (the
/// natural reading of "first-Inform special case"; see DESIGN.md).
pub async fn bootstrap_on_first_inform(
    store: &dyn Store,
    device: &Device,
    vendor: Vendor,
    uptime_seconds: Option<i64>,
) -> Result<Vec<Uuid>> {
    if !matches!(vendor, Vendor::Huawei | Vendor::Zte | Vendor::FiberHome) {
        return Ok(Vec::new());
    }

    let hardening = vendor.bootstrap_hardening(uptime_seconds);
    let mut created = Vec::new();

    if !hardening.is_empty() {
        let pairs: BTreeMap<&str, String> = hardening.iter().map(|(p, v)| (*p, v.clone())).collect();
        let input = serde_json::json!({ "pairs": pairs, "parameter_key": "" });
        let task = store
            .create_task(NewTask { device_id: device.id, kind: TaskType::SetParameterValues, input })
            .await?;
        created.push(task.id);
    }

    const ROOT_SUBTREES: &[&str] = &[
        "InternetGatewayDevice.LANDevice.1.WLANConfiguration.",
        "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.",
        "InternetGatewayDevice.LANDevice.1.Hosts.",
        "InternetGatewayDevice.DeviceInfo.",
    ];
    let input = serde_json::json!({ "names": ROOT_SUBTREES });
    let task = store
        .create_task(NewTask { device_id: device.id, kind: TaskType::GetParameterValues, input })
        .await?;
    created.push(task.id);

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::device::Device;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn bootstrap_runs_for_zte_not_mikrotik() {
        let store = InMemoryStore::new();
        let device = Device::new("ZTEGBC123".to_string(), "ZTE".to_string(), None);
        store.create_device(device.clone()).await.unwrap();

        let created = bootstrap_on_first_inform(&store, &device, Vendor::Zte, Some(42)).await.unwrap();
        assert_eq!(created.len(), 2);

        let created_mikrotik = bootstrap_on_first_inform(&store, &device, Vendor::MikroTik, Some(42)).await.unwrap();
        assert!(created_mikrotik.is_empty());
    }

    #[tokio::test]
    async fn fiberhome_bootstrap_respects_fresh_boot_grace() {
        let store = InMemoryStore::new();
        let device = Device::new("FHSERIAL000001".to_string(), "FiberHome".to_string(), None);
        store.create_device(device.clone()).await.unwrap();

        bootstrap_on_first_inform(&store, &device, Vendor::FiberHome, Some(120)).await.unwrap();
        let tasks = store.pending_tasks(Some(device.id)).await.unwrap();
        let set_task = tasks.iter().find(|t| t.kind == TaskType::SetParameterValues).unwrap();
        let pairs = set_task.input.get("pairs").unwrap();
        let value = pairs.get("InternetGatewayDevice.X_FH_Remoteweblogin.webloginenable").unwrap().as_str().unwrap();
        assert_eq!(value, "0");
    }

    #[tokio::test]
    async fn basic_info_runs_on_first_inform_and_is_suppressed_once_fresh() {
        let store = InMemoryStore::new();
        let mut device = Device::new("GENERIC000001".to_string(), "Generic Co".to_string(), None);
        store.create_device(device.clone()).await.unwrap();

        let provisions = default_provisions();
        let created = run_provisions(&store, &device, Vendor::Generic, &provisions).await.unwrap();
        assert!(!created.is_empty());

        // Mark every declared path fresh, then re-running should produce no new refresh task.
        for path in [
            "InternetGatewayDevice.DeviceInfo.Manufacturer",
            "InternetGatewayDevice.DeviceInfo.ProductClass",
            "InternetGatewayDevice.DeviceInfo.HardwareVersion",
            "InternetGatewayDevice.DeviceInfo.SoftwareVersion",
            "InternetGatewayDevice.DeviceInfo.UpTime",
        ] {
            store
                .upsert_parameter(crate::model::device::DeviceParameter {
                    device_id: device.id,
                    path: path.to_string(),
                    value: "x".to_string(),
                    param_type: "xsd:string".to_string(),
                    writable: false,
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        device.product_class = Some("ONU".to_string());
        let created2 = run_provisions(&store, &device, Vendor::Generic, &provisions).await.unwrap();
        // wifi/wan/lan declares are still stale, so a new refresh task is created, but it
        // must not re-declare the now-fresh basic-info paths.
        for task_id in created2 {
            let task = store.find_task_by_id(task_id).await.unwrap().unwrap();
            if task.kind != TaskType::GetParameterValues {
                continue;
            }
            let names = task.input.get("names").unwrap().as_array().unwrap();
            assert!(!names.iter().any(|n| n.as_str() == Some("InternetGatewayDevice.DeviceInfo.Manufacturer")));
        }
    }
}
