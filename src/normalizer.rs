//! Parameter normalizer: projects a flat (path, value, type) sequence from an
//! Inform or a `GetParameterValuesResponse` onto `Device`'s semantic fields
//! (`spec.md` §4.2).
//!
//! Every function here is a pure transform over a raw value (or the whole raw
//! parameter sequence); `apply_inform` is the orchestrator the dispatcher calls
//! once per inbound message.

use std::collections::HashMap;

use crate::model::device::Device;
use crate::vendor::{Vendor, VendorProfile};

/// Decode a reported serial number per `spec.md` §4.2.
///
/// Kept verbatim if: shorter than 12 characters, not pure hex, or containing
/// the literal Nokia OUI marker `40ee15`. Otherwise the leading 8 hex
/// characters are decoded as 4 bytes; if they're all printable ASCII, the
/// whole string is hex-decoded to its ASCII form (e.g.
/// `5A5445474243313233` → `ZTEGBC123`); otherwise the raw form is kept.
pub fn decode_serial(raw: &str) -> String {
    if raw.len() < 12 {
        return raw.to_string();
    }
    if !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return raw.to_string();
    }
    if raw.to_lowercase().contains("40ee15") {
        return raw.to_string();
    }

    let prefix_len = raw.len().min(8);
    let prefix_bytes = match hex_bytes(&raw[..prefix_len]) {
        Some(bytes) => bytes,
        None => return raw.to_string(),
    };
    if !prefix_bytes.iter().all(|&b| (32..=126).contains(&b)) {
        return raw.to_string();
    }

    match hex_decode_ascii(raw) {
        Some(decoded) => decoded,
        None => raw.to_string(),
    }
}

fn hex_bytes(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let chars: Vec<char> = s.chars().collect();
    for pair in chars.chunks(2) {
        let byte_str: String = pair.iter().collect();
        out.push(u8::from_str_radix(&byte_str, 16).ok()?);
    }
    Some(out)
}

fn hex_decode_ascii(s: &str) -> Option<String> {
    let bytes = hex_bytes(s)?;
    if bytes.iter().all(|&b| (32..=126).contains(&b)) {
        Some(bytes.iter().map(|&b| b as char).collect())
    } else {
        None
    }
}

/// Normalize a raw optical RX power reading to dBm, per `spec.md` §4.2.
///
/// Returns `None` when the raw value should leave the existing field
/// untouched (zero or non-numeric).
pub fn normalize_rx_power(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    if value < 0.0 {
        Some(round2(value))
    } else if value > 0.0 {
        Some(round2(10.0 * value.log10() - 40.0))
    } else {
        None
    }
}

/// Rescale a raw temperature reading by magnitude, per `spec.md` §4.2.
pub fn normalize_temperature(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    Some(if value > 1000.0 {
        value / 256.0
    } else if value > 100.0 {
        value / 10.0
    } else {
        value
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn path_is_pppoe_username(path: &str) -> bool {
    (path.contains("WANPPPConnection") && path.ends_with(".Username"))
        || path.ends_with("X_CT-COM_UserInfo.UserName")
        || path.ends_with("X_CMCC_UserInfo.UserName")
}

fn is_rejected_username(value: &str) -> bool {
    matches!(value, "" | "default" | "null")
}

/// First accepted PPPoE username across the raw params, per `spec.md` §4.2.
pub fn extract_pppoe_username<'a>(params: &'a [(String, String, String)]) -> Option<&'a str> {
    params
        .iter()
        .find(|(path, value, _)| path_is_pppoe_username(path) && !is_rejected_username(value))
        .map(|(_, value, _)| value.as_str())
}

/// External IP, preferring a WANPPPConnection-sourced value over a
/// WANIPConnection-sourced one when both are present in the same Inform.
pub fn extract_external_ip<'a>(params: &'a [(String, String, String)]) -> Option<&'a str> {
    let is_ip_path =
        |p: &str| p.ends_with(".ExternalIPAddress") || p.ends_with(".IPv4Address.1.IPAddress");
    let is_valid = |v: &str| v != "0.0.0.0" && !v.is_empty();

    let ppp = params
        .iter()
        .find(|(path, value, _)| is_ip_path(path) && path.contains("WANPPPConnection") && is_valid(value));
    if let Some((_, value, _)) = ppp {
        return Some(value.as_str());
    }
    params
        .iter()
        .find(|(path, value, _)| is_ip_path(path) && is_valid(value))
        .map(|(_, value, _)| value.as_str())
}

/// Client count for one Inform. `HostNumberOfEntries` always wins if present
/// and `> 0`; otherwise the per-WLAN association counts are summed (the
/// resolution of the ambiguity noted in `spec.md` §9 — see DESIGN.md).
pub fn compute_client_count(params: &[(String, String, String)]) -> Option<i32> {
    let host_entries = params
        .iter()
        .find(|(path, _, _)| path.ends_with("HostNumberOfEntries"))
        .and_then(|(_, value, _)| value.parse::<i32>().ok())
        .filter(|&n| n > 0);
    if let Some(n) = host_entries {
        return Some(n);
    }

    const WLAN_SUFFIXES: &[&str] = &[
        "TotalAssociations",
        "WLAN_AssociatedDeviceNumberOfEntries",
        "AssociatedDeviceNumberOfEntities",
    ];
    let sum: i32 = params
        .iter()
        .filter(|(path, _, _)| {
            path.contains("WLANConfiguration.") && WLAN_SUFFIXES.iter().any(|s| path.ends_with(s))
        })
        .filter_map(|(_, value, _)| value.parse::<i32>().ok())
        .sum();
    Some(sum)
}

fn get_value<'a>(params: &'a [(String, String, String)], suffix: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(path, _, _)| path.ends_with(suffix))
        .map(|(_, value, _)| value.as_str())
}

fn get_rx_power<'a>(params: &'a [(String, String, String)], vendor: Vendor) -> Option<&'a str> {
    vendor
        .rx_power_paths()
        .iter()
        .chain(["Device.Optical.Interface.1.Stats.RxPower", "Optical.RXPower"].iter())
        .find_map(|candidate| {
            params
                .iter()
                .find(|(path, _, _)| path == candidate)
                .map(|(_, value, _)| value.as_str())
        })
}

/// Result of applying one Inform/response to a device: whether anything about
/// the device's own record actually changed (used to decide whether a
/// status-change log entry is warranted).
#[derive(Debug, Default)]
pub struct NormalizedUpdate {
    pub template_claimed_by_pppoe: bool,
}

/// Apply every rule in `spec.md` §4.2 to `device`, mutating it in place.
/// Does not touch `updated_at` on the device's individual raw parameters —
/// that is the ingestion caller's job (it has the message receive time).
pub fn apply_inform(device: &mut Device, vendor: Vendor, params: &[(String, String, String)]) -> NormalizedUpdate {
    let mut update = NormalizedUpdate::default();

    if let Some(raw) = get_rx_power(params, vendor) {
        if let Some(dbm) = normalize_rx_power(raw) {
            device.rx_power_dbm = Some(dbm);
        }
    }
    if let Some(raw) = params
        .iter()
        .find(|(path, _, _)| path.to_lowercase().contains("temperature"))
        .map(|(_, v, _)| v.as_str())
    {
        if let Some(t) = normalize_temperature(raw) {
            device.temperature_c = Some(t);
        }
    }

    if let Some(username) = extract_pppoe_username(params) {
        device.pppoe_username = Some(username.to_string());
        device.template = Some(username.to_string());
        update.template_claimed_by_pppoe = true;
    }

    if let Some(ip) = extract_external_ip(params) {
        device.external_ip = Some(ip.to_string());
    }

    if let Some(count) = compute_client_count(params) {
        device.client_count = count;
    }

    if let Some(v) = get_value(params, "DeviceInfo.SoftwareVersion") {
        device.software_version = Some(v.to_string());
    }
    if let Some(v) = get_value(params, "DeviceInfo.HardwareVersion") {
        device.hardware_version = Some(v.to_string());
    }
    if let Some(v) = get_value(params, "DeviceInfo.ModelName") {
        device.model_name = Some(v.to_string());
    }
    if let Some(v) = get_value(params, "DeviceInfo.UpTime") {
        device.uptime_seconds = v.parse().ok();
    }
    if let Some(v) = get_value(params, "ManagementServer.ConnectionRequestURL") {
        device.connection_request_url = Some(v.to_string());
    }
    if let Some(desc) = get_value(params, "DeviceInfo.Description") {
        device.description = Some(desc.to_string());
    }

    if !update.template_claimed_by_pppoe {
        if let Some(desc) = get_value(params, "DeviceInfo.Description") {
            if desc.len() < 50 && !desc.contains("[]") {
                device.template = Some(desc.to_string());
            }
        }
    }

    let flat: HashMap<String, String> =
        params.iter().map(|(path, value, _)| (path.clone(), value.clone())).collect();
    for (name, value) in crate::virtual_params::evaluate(&flat, vendor) {
        match name.as_str() {
            "TXPower" => device.tx_power_dbm = value.parse().ok(),
            "pppoeIP" => device.pppoe_ip = Some(value),
            "pppoeConnectionType" => device.connection_type = Some(value),
            "PonMac" | "pppoeMac" if device.mac_address.is_none() => device.mac_address = Some(value),
            "Voltage" => device.voltage = value.parse().ok(),
            "BiasCurrent" => device.bias_current_ma = value.parse().ok(),
            _ => {}
        }
    }

    update
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nokia_guard_keeps_serial_verbatim() {
        assert_eq!(decode_serial("40ee1500112233"), "40ee1500112233");
    }

    #[test]
    fn decodes_zte_serial() {
        assert_eq!(decode_serial("5A5445474243313233"), "ZTEGBC123");
    }

    #[test]
    fn short_serial_kept_verbatim() {
        assert_eq!(decode_serial("ABC123"), "ABC123");
    }

    #[test]
    fn non_hex_serial_kept_verbatim() {
        assert_eq!(decode_serial("ZTEG-SERIAL-001"), "ZTEG-SERIAL-001");
    }

    #[test]
    fn rx_power_negative_kept_as_dbm() {
        assert_eq!(normalize_rx_power("-22.14"), Some(-22.14));
    }

    #[test]
    fn rx_power_positive_converted() {
        let dbm = normalize_rx_power("1585").unwrap();
        assert!((dbm - (-8.00)).abs() < 0.01, "got {dbm}");
    }

    #[test]
    fn rx_power_zero_is_untouched() {
        assert_eq!(normalize_rx_power("0"), None);
    }

    #[test]
    fn rx_power_non_numeric_is_untouched() {
        assert_eq!(normalize_rx_power("not-a-number"), None);
    }

    #[test]
    fn temperature_rescaling() {
        assert_eq!(normalize_temperature("4864"), Some(19.0));
        assert_eq!(normalize_temperature("512"), Some(51.2));
        assert_eq!(normalize_temperature("42"), Some(42.0));
    }

    #[test]
    fn pppoe_username_default_is_ignored() {
        let params = vec![(
            "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Username".to_string(),
            "default".to_string(),
            "xsd:string".to_string(),
        )];
        assert_eq!(extract_pppoe_username(&params), None);
    }

    #[test]
    fn pppoe_username_accepted_value_wins() {
        let params = vec![
            (
                "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Username".to_string(),
                "".to_string(),
                "xsd:string".to_string(),
            ),
            (
                "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.2.WANPPPConnection.1.Username".to_string(),
                "alice".to_string(),
                "xsd:string".to_string(),
            ),
        ];
        assert_eq!(extract_pppoe_username(&params), Some("alice"));
    }

    #[test]
    fn external_ip_rejects_zero_address() {
        let params = vec![(
            "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANIPConnection.1.ExternalIPAddress"
                .to_string(),
            "0.0.0.0".to_string(),
            "xsd:string".to_string(),
        )];
        assert_eq!(extract_external_ip(&params), None);
    }

    #[test]
    fn external_ip_prefers_pppoe_source() {
        let params = vec![
            (
                "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANIPConnection.1.ExternalIPAddress"
                    .to_string(),
                "10.0.0.1".to_string(),
                "xsd:string".to_string(),
            ),
            (
                "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.2.WANPPPConnection.1.ExternalIPAddress"
                    .to_string(),
                "203.0.113.5".to_string(),
                "xsd:string".to_string(),
            ),
        ];
        assert_eq!(extract_external_ip(&params), Some("203.0.113.5"));
    }

    #[test]
    fn client_count_host_number_of_entries_wins() {
        let params = vec![
            (
                "InternetGatewayDevice.LANDevice.1.Hosts.HostNumberOfEntries".to_string(),
                "3".to_string(),
                "xsd:unsignedInt".to_string(),
            ),
            (
                "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.TotalAssociations".to_string(),
                "7".to_string(),
                "xsd:unsignedInt".to_string(),
            ),
        ];
        assert_eq!(compute_client_count(&params), Some(3));
    }

    #[test]
    fn client_count_falls_back_to_wlan_sum() {
        let params = vec![
            (
                "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.TotalAssociations".to_string(),
                "2".to_string(),
                "xsd:unsignedInt".to_string(),
            ),
            (
                "InternetGatewayDevice.LANDevice.1.WLANConfiguration.2.TotalAssociations".to_string(),
                "5".to_string(),
                "xsd:unsignedInt".to_string(),
            ),
        ];
        assert_eq!(compute_client_count(&params), Some(7));
    }

    #[test]
    fn apply_inform_zte_scenario() {
        let mut device = Device::new("ZTEGBC123".to_string(), "ZTE".to_string(), Some("10.0.0.5:12345".to_string()));
        let params = vec![
            (
                "InternetGatewayDevice.WANDevice.1.X_ZTE-COM_WANPONInterfaceConfig.RXPower".to_string(),
                "1585".to_string(),
                "xsd:int".to_string(),
            ),
            (
                "InternetGatewayDevice.DeviceInfo.UpTime".to_string(),
                "42".to_string(),
                "xsd:unsignedInt".to_string(),
            ),
        ];
        apply_inform(&mut device, Vendor::Zte, &params);
        let dbm = device.rx_power_dbm.unwrap();
        assert!((dbm - (-8.00)).abs() < 0.01, "got {dbm}");
        assert_eq!(device.uptime_seconds, Some(42));
    }
}
