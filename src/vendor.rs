//! Closed set of vendor variants replacing the source's scattered
//! case-insensitive manufacturer-string matching (`spec.md` §9,
//! "Polymorphism over vendor behavior").
//!
//! Every vendor difference the normalizer and provisioning engine need —
//! optical-power candidate paths, bootstrap/hardening parameters, and extra
//! virtual-parameter candidate paths — is a method on `VendorProfile`. Adding
//! a vendor is an additive change: one more `Vendor` variant and one more
//! `match` arm per method, never a new scattered `contains("huawei")` check.

/// A device manufacturer, as identified from its reported `Manufacturer` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Huawei,
    Zte,
    FiberHome,
    Nokia,
    ChinaTelecom,
    ChinaMobile,
    ChinaUnicom,
    TpLink,
    Cig,
    MikroTik,
    Generic,
}

impl Vendor {
    /// Identify a vendor from a reported `Manufacturer` string by case-insensitive
    /// substring match — the one remaining place this repo does string matching;
    /// everything downstream of this call is tagged-variant dispatch.
    pub fn identify(manufacturer: &str) -> Self {
        let m = manufacturer.to_lowercase();
        if m.contains("huawei") {
            Vendor::Huawei
        } else if m.contains("zte") {
            Vendor::Zte
        } else if m.contains("fiberhome") || m.contains("fh") {
            Vendor::FiberHome
        } else if m.contains("nokia") || m.contains("alcatel") || m.contains("alu") {
            Vendor::Nokia
        } else if m.contains("china telecom") || m.contains("ct-") {
            Vendor::ChinaTelecom
        } else if m.contains("china mobile") || m.contains("cmcc") {
            Vendor::ChinaMobile
        } else if m.contains("china unicom") || m.contains("cu-") {
            Vendor::ChinaUnicom
        } else if m.contains("tp-link") || m.contains("tplink") {
            Vendor::TpLink
        } else if m.contains("cig") {
            Vendor::Cig
        } else if m.contains("mikrotik") {
            Vendor::MikroTik
        } else {
            Vendor::Generic
        }
    }

    pub fn excluded_from_default_provisions(self) -> bool {
        matches!(self, Vendor::MikroTik)
    }
}

/// Per-vendor capability set consulted by the normalizer and provisioning engine.
pub trait VendorProfile {
    /// Dotted paths that may carry this vendor's raw optical RX power reading,
    /// in priority order.
    fn rx_power_paths(&self) -> &'static [&'static str];

    /// `(path, value)` pairs applied by the bootstrap-on-first-Inform hardening
    /// step (`spec.md` §4.4); empty for vendors with no hardening step.
    fn bootstrap_hardening(&self, uptime_seconds: Option<i64>) -> Vec<(&'static str, String)>;

    /// Extra candidate paths this vendor exposes for virtual parameters beyond
    /// the generic TR-098/TR-181 set (`virtual_params::REGISTRY` already covers
    /// the generic set; this supplements it).
    fn extra_virtual_param_paths(&self, _name: &str) -> &'static [&'static str] {
        &[]
    }
}

impl VendorProfile for Vendor {
    fn rx_power_paths(&self) -> &'static [&'static str] {
        match self {
            Vendor::Huawei => &[
                "InternetGatewayDevice.WANDevice.1.X_GponInterafceConfig.RXPower",
                "InternetGatewayDevice.WANDevice.1.X_GponInterfaceConfig.RXPower",
            ],
            Vendor::Zte => &[
                "InternetGatewayDevice.WANDevice.1.X_ZTE-COM_WANPONInterfaceConfig.RXPower",
            ],
            Vendor::FiberHome => &[
                "InternetGatewayDevice.WANDevice.1.X_FH_GponInterfaceConfig.RXPower",
            ],
            Vendor::Nokia => &[
                "InternetGatewayDevice.WANDevice.1.X_ALU_OntOpticalParam.RXPower",
            ],
            Vendor::ChinaTelecom => &[
                "InternetGatewayDevice.WANDevice.1.X_CT-COM_GponInterfaceConfig.RXPower",
            ],
            Vendor::ChinaMobile => &[
                "InternetGatewayDevice.WANDevice.1.X_CMCC_GponInterfaceConfig.RXPower",
            ],
            Vendor::ChinaUnicom => &[
                "InternetGatewayDevice.WANDevice.1.X_CU_GponInterfaceConfig.RXPower",
            ],
            Vendor::TpLink => &["InternetGatewayDevice.WANDevice.1.Optical.RXPower"],
            Vendor::Cig => &["InternetGatewayDevice.WANDevice.1.Optical.RXPower"],
            Vendor::MikroTik | Vendor::Generic => &[
                "Device.Optical.Interface.1.Stats.RxPower",
            ],
        }
    }

    fn bootstrap_hardening(&self, uptime_seconds: Option<i64>) -> Vec<(&'static str, String)> {
        match self {
            Vendor::Huawei => vec![
                ("InternetGatewayDevice.X_HW_Security.WanWebEnable", "1".to_string()),
                ("InternetGatewayDevice.X_HW_Security.WanTelnetEnable", "1".to_string()),
                ("InternetGatewayDevice.X_HW_Security.WanSshEnable", "1".to_string()),
                ("InternetGatewayDevice.X_HW_Security.FirewallLevel", "Custom".to_string()),
            ],
            Vendor::Zte => vec![
                ("InternetGatewayDevice.X_ZTE-COM_IPV4ServiceControl.WebEnable", "1".to_string()),
                ("InternetGatewayDevice.X_ZTE-COM_IPV4ServiceControl.TelnetEnable", "1".to_string()),
                ("InternetGatewayDevice.X_ZTE-COM_IPV4ServiceControl.SshEnable", "1".to_string()),
                ("InternetGatewayDevice.X_ZTE-COM_IPV4ServiceControl.FirewallLevel", "Custom".to_string()),
            ],
            Vendor::FiberHome => {
                // Fresh-boot grace: uptime < 220s disables remote login, else enables it.
                let enable = match uptime_seconds {
                    Some(u) if u < 220 => "0",
                    _ => "1",
                };
                vec![
                    ("InternetGatewayDevice.X_FH_Remoteweblogin.webloginenable", enable.to_string()),
                    ("InternetGatewayDevice.X_FH_Security.TelnetEnable", "1".to_string()),
                    ("InternetGatewayDevice.X_FH_Security.FirewallLevel", "Custom".to_string()),
                ]
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_known_vendors() {
        assert_eq!(Vendor::identify("ZTE Corporation"), Vendor::Zte);
        assert_eq!(Vendor::identify("Huawei Technologies"), Vendor::Huawei);
        assert_eq!(Vendor::identify("FiberHome"), Vendor::FiberHome);
        assert_eq!(Vendor::identify("Nokia"), Vendor::Nokia);
        assert_eq!(Vendor::identify("MikroTik"), Vendor::MikroTik);
        assert_eq!(Vendor::identify("Some Unknown Co"), Vendor::Generic);
    }

    #[test]
    fn mikrotik_is_excluded_from_default_provisions() {
        assert!(Vendor::MikroTik.excluded_from_default_provisions());
        assert!(!Vendor::Zte.excluded_from_default_provisions());
    }

    #[test]
    fn fiberhome_fresh_boot_grace() {
        let fresh = Vendor::FiberHome.bootstrap_hardening(Some(120));
        assert_eq!(
            fresh.iter().find(|(p, _)| p.contains("webloginenable")).map(|(_, v)| v.as_str()),
            Some("0")
        );
        let settled = Vendor::FiberHome.bootstrap_hardening(Some(3600));
        assert_eq!(
            settled.iter().find(|(p, _)| p.contains("webloginenable")).map(|(_, v)| v.as_str()),
            Some("1")
        );
    }
}
