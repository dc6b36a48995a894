//! Virtual parameters: named projections of the raw flat parameter map onto
//! semantic fields, modeled as data (a table of candidate paths plus an
//! optional formatter) rather than one function per parameter (`spec.md`
//! §4.2, §9 "Virtual parameters as data, not code").
//!
//! `evaluate` is the single function over that table. An empty result for a
//! given name means "not available," per `spec.md` §4.2.

use std::collections::HashMap;

use crate::normalizer::{normalize_rx_power, normalize_temperature};
use crate::vendor::{Vendor, VendorProfile};

/// How a virtual parameter's raw candidate value is turned into its output form.
#[derive(Clone, Copy)]
enum Formatter {
    /// First non-empty candidate value, unchanged.
    Raw,
    /// Optical power candidate, converted to dBm per `spec.md` §4.2.
    Dbm,
    /// Temperature candidate, rescaled per `spec.md` §4.2.
    Temperature,
    /// Seconds formatted as "Nd Nh Nm".
    Uptime,
    /// `"GPON"` if any candidate path contains `GponInterfaceConfig`, `"EPON"`
    /// if any contains `EponInterfaceConfig`, else `"Unknown"`.
    PonMode,
    /// Count of raw paths matching a `Hosts.Host.*.IPAddress`-shaped pattern.
    ActiveDeviceCount,
    /// Host part of a candidate URL value.
    UrlHost,
    /// Raw value, rejected if it equals a given sentinel (e.g. `"ERROR_NONE"`).
    RawRejecting(&'static str),
}

struct VirtualParamDef {
    name: &'static str,
    candidates: &'static [&'static str],
    formatter: Formatter,
}

const REGISTRY: &[VirtualParamDef] = &[
    VirtualParamDef { name: "RXPower", candidates: &[], formatter: Formatter::Dbm },
    VirtualParamDef {
        name: "TXPower",
        candidates: &[
            "InternetGatewayDevice.WANDevice.1.X_GponInterafceConfig.TXPower",
            "InternetGatewayDevice.WANDevice.1.X_ZTE-COM_WANPONInterfaceConfig.TXPower",
            "InternetGatewayDevice.WANDevice.1.X_FH_GponInterfaceConfig.TXPower",
            "Device.Optical.Interface.1.Stats.TxPower",
        ],
        formatter: Formatter::Dbm,
    },
    VirtualParamDef { name: "Temperature", candidates: &[], formatter: Formatter::Temperature },
    VirtualParamDef {
        name: "Voltage",
        candidates: &[
            "InternetGatewayDevice.WANDevice.1.X_GponInterafceConfig.Voltage",
            "InternetGatewayDevice.WANDevice.1.X_ZTE-COM_WANPONInterfaceConfig.Voltage",
            "InternetGatewayDevice.WANDevice.1.X_FH_GponInterfaceConfig.Voltage",
            "Device.Optical.Interface.1.Stats.Voltage",
        ],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "BiasCurrent",
        candidates: &[
            "InternetGatewayDevice.WANDevice.1.X_GponInterafceConfig.BiasCurrent",
            "InternetGatewayDevice.WANDevice.1.X_ZTE-COM_WANPONInterfaceConfig.BiasCurrent",
            "InternetGatewayDevice.WANDevice.1.X_FH_GponInterfaceConfig.BiasCurrent",
            "Device.Optical.Interface.1.Stats.BiasCurrent",
        ],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeUsername",
        candidates: &[],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoePassword",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Password"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeIP",
        candidates: &[
            "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.ExternalIPAddress",
        ],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeMac",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.MACAddress"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "PonMac",
        candidates: &["InternetGatewayDevice.WANDevice.1.X_GponInterafceConfig.MACAddress"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "getSerialNumber",
        candidates: &["InternetGatewayDevice.DeviceInfo.SerialNumber", "Device.DeviceInfo.SerialNumber"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "getdeviceuptime",
        candidates: &["InternetGatewayDevice.DeviceInfo.UpTime", "Device.DeviceInfo.UpTime"],
        formatter: Formatter::Uptime,
    },
    VirtualParamDef {
        name: "getpppuptime",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Uptime"],
        formatter: Formatter::Uptime,
    },
    VirtualParamDef {
        name: "SSID",
        candidates: &["InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.SSID"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "WlanPassword",
        candidates: &["InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.PreSharedKey.1.KeyPassphrase"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef { name: "getponmode", candidates: &[], formatter: Formatter::PonMode },
    VirtualParamDef { name: "activedevices", candidates: &[], formatter: Formatter::ActiveDeviceCount },
    VirtualParamDef {
        name: "IPTR069",
        candidates: &["InternetGatewayDevice.ManagementServer.ConnectionRequestURL"],
        formatter: Formatter::UrlHost,
    },
    VirtualParamDef {
        name: "pppoeStatus",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.ConnectionStatus"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeVlanId",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.X_VLANIDMark"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeGateway",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.DefaultGateway"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeDns",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.DNSServers"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeNatEnabled",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.NATEnabled"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeConnectionType",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.ConnectionType"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeServiceName",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.ServiceName"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeMtu",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.MaxMRUSize"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeEnable",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Enable"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeLanBinding",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.X_LANActiveDevice"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeConnectionName",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Name"],
        formatter: Formatter::Raw,
    },
    VirtualParamDef {
        name: "pppoeLastError",
        candidates: &["InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.LastConnectionError"],
        formatter: Formatter::RawRejecting("ERROR_NONE"),
    },
];

fn first_non_empty<'a>(params: &'a HashMap<String, String>, candidates: &[&str]) -> Option<&'a str> {
    candidates
        .iter()
        .find_map(|c| params.get(*c).filter(|v| !v.is_empty()).map(|v| v.as_str()))
}

fn format_uptime(seconds: i64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    format!("{days}d {hours}h {minutes}m")
}

fn pppoe_username_candidates() -> Vec<&'static str> {
    vec![
        "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Username",
        "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.X_CT-COM_UserInfo.UserName",
        "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.X_CMCC_UserInfo.UserName",
    ]
}

fn pon_mode(params: &HashMap<String, String>) -> &'static str {
    if params.keys().any(|k| k.contains("GponInterfaceConfig")) {
        "GPON"
    } else if params.keys().any(|k| k.contains("EponInterfaceConfig")) {
        "EPON"
    } else {
        "Unknown"
    }
}

fn active_device_count(params: &HashMap<String, String>) -> usize {
    params
        .keys()
        .filter(|k| {
            let Some(rest) = k.strip_prefix("InternetGatewayDevice.LANDevice.1.Hosts.Host.") else {
                return false;
            };
            rest.split_once('.').map(|(_, suffix)| suffix == "IPAddress").unwrap_or(false)
        })
        .count()
}

fn url_host(url: &str) -> Option<String> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    let host = host_port.split(':').next().unwrap_or(host_port);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Evaluate every virtual parameter in the registry against `params` (a flat
/// path→value map) for the given vendor, returning only the names that
/// resolved to a non-empty value.
pub fn evaluate(params: &HashMap<String, String>, vendor: Vendor) -> HashMap<String, String> {
    let mut out = HashMap::new();

    for def in REGISTRY {
        let value = match def.name {
            "RXPower" => {
                let candidates = vendor.rx_power_paths();
                first_non_empty(params, candidates).and_then(normalize_rx_power).map(|v| v.to_string())
            }
            "Temperature" => params
                .iter()
                .find(|(k, _)| k.to_lowercase().contains("temperature"))
                .and_then(|(_, v)| normalize_temperature(v))
                .map(|v| v.to_string()),
            "pppoeUsername" => {
                let candidates = pppoe_username_candidates();
                first_non_empty(params, &candidates)
                    .filter(|v| !matches!(*v, "default" | "null"))
                    .map(|v| v.to_string())
            }
            "getponmode" => Some(pon_mode(params).to_string()),
            "activedevices" => Some(active_device_count(params).to_string()),
            "IPTR069" => first_non_empty(params, def.candidates).and_then(url_host),
            _ => {
                let extra = vendor.extra_virtual_param_paths(def.name);
                let raw = first_non_empty(params, def.candidates).or_else(|| first_non_empty(params, extra));
                match def.formatter {
                    Formatter::Raw => raw.map(|v| v.to_string()),
                    Formatter::RawRejecting(sentinel) => raw.filter(|v| *v != sentinel).map(|v| v.to_string()),
                    Formatter::Uptime => raw.and_then(|v| v.parse::<i64>().ok()).map(format_uptime),
                    Formatter::Dbm => raw.and_then(normalize_rx_power).map(|v| v.to_string()),
                    Formatter::Temperature => raw.and_then(normalize_temperature).map(|v| v.to_string()),
                    Formatter::PonMode => Some(pon_mode(params).to_string()),
                    Formatter::ActiveDeviceCount => Some(active_device_count(params).to_string()),
                    Formatter::UrlHost => raw.and_then(url_host),
                }
            }
        };
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            out.insert(def.name.to_string(), v);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_map_yields_empty_result() {
        let result = evaluate(&HashMap::new(), Vendor::Generic);
        assert!(result.is_empty());
    }

    #[test]
    fn ponmode_detects_gpon() {
        let mut params = HashMap::new();
        params.insert(
            "InternetGatewayDevice.WANDevice.1.X_GponInterafceConfig.RXPower".to_string(),
            "1585".to_string(),
        );
        let result = evaluate(&params, Vendor::Huawei);
        assert_eq!(result.get("getponmode").map(|s| s.as_str()), Some("GPON"));
    }

    #[test]
    fn uptime_formats_days_hours_minutes() {
        let mut params = HashMap::new();
        params.insert("InternetGatewayDevice.DeviceInfo.UpTime".to_string(), "93784".to_string());
        let result = evaluate(&params, Vendor::Generic);
        assert_eq!(result.get("getdeviceuptime").map(|s| s.as_str()), Some("1d 2h 3m"));
    }

    #[test]
    fn last_error_none_is_rejected() {
        let mut params = HashMap::new();
        params.insert(
            "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.LastConnectionError"
                .to_string(),
            "ERROR_NONE".to_string(),
        );
        let result = evaluate(&params, Vendor::Generic);
        assert!(!result.contains_key("pppoeLastError"));
    }

    #[test]
    fn iptr069_extracts_host() {
        let mut params = HashMap::new();
        params.insert(
            "InternetGatewayDevice.ManagementServer.ConnectionRequestURL".to_string(),
            "http://192.168.1.50:7547/tr069cr".to_string(),
        );
        let result = evaluate(&params, Vendor::Generic);
        assert_eq!(result.get("IPTR069").map(|s| s.as_str()), Some("192.168.1.50"));
    }
}
