//! CWMP (TR-069) SOAP codec: lenient inbound parsing and outbound envelope
//! construction (`spec.md` §4.1).
//!
//! Inbound bodies may carry any of the common namespace prefixes
//! (`soap:`, `SOAP-ENV:`, `cwmp:`, `v1:`, `v2:`, or none); this module strips
//! prefixes before structural decode by comparing only the element's local
//! name, tolerating both default-namespace and prefixed forms.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::Writer;
use std::io::Cursor;

use crate::{Error, Result};

/// Identity block a CPE reports in every `Inform`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdStruct {
    pub manufacturer: String,
    pub oui: String,
    pub product_class: String,
    pub serial_number: String,
}

/// A CWMP `Fault`. `raw_inner_xml` is kept verbatim: `Task::error` must store
/// `"CWMP Fault: " + verbatim inner XML` per `spec.md` §3 and §8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub fault_code: i32,
    pub fault_string: String,
    pub raw_inner_xml: String,
}

/// One `(name, value, declared-type)` triple, as carried by `Inform` and
/// `GetParameterValuesResponse`.
pub type ParamTriple = (String, String, String);

/// The decoded inner body of an inbound CWMP message, after prefix-stripping.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundRpc {
    Inform {
        device_id: DeviceIdStruct,
        event_codes: Vec<String>,
        max_envelopes: u32,
        current_time: Option<DateTime<Utc>>,
        retry_count: u32,
        parameters: Vec<ParamTriple>,
    },
    GetParameterValuesResponse(Vec<ParamTriple>),
    SetParameterValuesResponse {
        status: i32,
    },
    RebootResponse,
    FactoryResetResponse,
    GetRpcMethodsResponse(Vec<String>),
    TransferComplete {
        command_key: String,
        fault: Option<Fault>,
    },
    Fault(Fault),
    /// The RPC element's local name, for the "unknown RPC -> 204 + warn" path.
    Unknown(String),
}

/// A fully parsed inbound envelope: the `cwmp:ID` correlation token (absent
/// on, e.g., a bare empty-body poll) and the decoded RPC.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEnvelope {
    pub correlation_id: Option<String>,
    pub rpc: InboundRpc,
}

fn local_name(name: &[u8]) -> String {
    let s = std::str::from_utf8(name).unwrap_or("");
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}

fn attr_local_value(tag: &BytesStart, local: &str) -> Option<String> {
    tag.attributes().flatten().find_map(|a| {
        if local_name(a.key.as_ref()) == local {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// Parse an empty CWMP body (an empty-body poll asking for the next command).
/// An empty or whitespace-only body is not an envelope at all and is not an error.
pub fn is_empty_body(body: &str) -> bool {
    body.trim().is_empty()
}

/// Parse one inbound CWMP SOAP envelope.
///
/// Returns `Err` only for a structurally malformed envelope (`spec.md` §4.1:
/// "Malformed envelope -> HTTP 400"). An envelope whose Body element carries
/// an RPC this codec doesn't recognize parses successfully into
/// [`InboundRpc::Unknown`].
pub fn parse_envelope(body: &str) -> Result<ParsedEnvelope> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut correlation_id: Option<String> = None;

    let mut rpc_name: Option<String> = None;
    let mut device_id = DeviceIdStruct::default();
    let mut event_codes: Vec<String> = Vec::new();
    let mut max_envelopes: u32 = 1;
    let mut current_time: Option<DateTime<Utc>> = None;
    let mut retry_count: u32 = 0;
    let mut parameters: Vec<ParamTriple> = Vec::new();
    let mut rpc_methods: Vec<String> = Vec::new();
    let mut set_status: i32 = 0;
    let mut command_key = String::new();

    let mut fault_code: i32 = 0;
    let mut fault_string = String::new();
    let mut fault_raw = String::new();
    let mut in_fault_detail = false;
    let mut saw_fault = false;

    // ParameterValueStruct accumulation
    let mut pending_name: Option<String> = None;
    let mut pending_value: Option<String> = None;
    let mut pending_type: Option<String> = None;

    let mut text_buf = String::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::soap(format!("malformed CWMP envelope: {e}")))?;

        let is_detail_boundary = matches!(&event,
            Event::Start(e) | Event::End(e) if local_name(e.name().as_ref()) == "detail");
        if in_fault_detail && !is_detail_boundary {
            // Keep the verbatim inner XML of <detail> for Task::error, by
            // reconstructing every element/text seen while inside it.
            match &event {
                Event::Start(e) => fault_raw.push_str(&format!("<{}>", local_name(e.name().as_ref()))),
                Event::Empty(e) => fault_raw.push_str(&format!("<{}/>", local_name(e.name().as_ref()))),
                Event::End(e) => fault_raw.push_str(&format!("</{}>", local_name(e.name().as_ref()))),
                Event::Text(e) => fault_raw.push_str(&e.unescape().unwrap_or_default()),
                _ => {}
            }
        }

        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let name = local_name(e.name().as_ref());
                let is_empty = matches!(event, Event::Empty(_));

                if path.len() == 2 && path[0].ends_with("Envelope") && path[1].ends_with("Body") && rpc_name.is_none() {
                    rpc_name = Some(name.clone());
                }
                if name == "Fault" {
                    saw_fault = true;
                }
                if name == "detail" {
                    in_fault_detail = true;
                    fault_raw.clear();
                }
                if name == "ParameterValueStruct" {
                    pending_name = None;
                    pending_value = None;
                    pending_type = None;
                }
                if name == "Value" {
                    pending_type = attr_local_value(e, "type");
                }

                text_buf.clear();
                path.push(name);
                if is_empty {
                    path.pop();
                }
            }
            Event::Text(e) => {
                text_buf = e.unescape().unwrap_or_default().trim().to_string();
            }
            Event::CData(e) => {
                text_buf = String::from_utf8_lossy(e.as_ref()).trim().to_string();
            }
            Event::End(e) => {
                let name = local_name(e.name().as_ref());

                match name.as_str() {
                    "ID" => correlation_id = Some(text_buf.clone()),
                    "Manufacturer" => device_id.manufacturer = text_buf.clone(),
                    "OUI" => device_id.oui = text_buf.clone(),
                    "ProductClass" => device_id.product_class = text_buf.clone(),
                    "SerialNumber" => device_id.serial_number = text_buf.clone(),
                    "EventCode" => event_codes.push(text_buf.clone()),
                    "MaxEnvelopes" => max_envelopes = text_buf.parse().unwrap_or(1),
                    "CurrentTime" => current_time = DateTime::parse_from_rfc3339(&text_buf).ok().map(|dt| dt.with_timezone(&Utc)),
                    "RetryCount" => retry_count = text_buf.parse().unwrap_or(0),
                    "Name" if pending_name.is_none() => pending_name = Some(text_buf.clone()),
                    "Value" => pending_value = Some(text_buf.clone()),
                    "ParameterValueStruct" => {
                        if let (Some(n), Some(v)) = (pending_name.take(), pending_value.take()) {
                            parameters.push((n, v, pending_type.take().unwrap_or_else(|| "xsd:string".to_string())));
                        }
                    }
                    "MethodList" => {}
                    "string" if path.iter().any(|p| p == "MethodList") => rpc_methods.push(text_buf.clone()),
                    "Status" => set_status = text_buf.parse().unwrap_or(0),
                    "CommandKey" => command_key = text_buf.clone(),
                    "FaultCode" => fault_code = text_buf.parse().unwrap_or(0),
                    "FaultString" => fault_string = text_buf.clone(),
                    "detail" => in_fault_detail = false,
                    _ => {}
                }

                path.pop();
                text_buf.clear();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let rpc_name = rpc_name.unwrap_or_default();
    let fault = if saw_fault {
        Some(Fault { fault_code, fault_string: fault_string.clone(), raw_inner_xml: fault_raw.clone() })
    } else {
        None
    };

    let rpc = match rpc_name.as_str() {
        "Inform" => InboundRpc::Inform {
            device_id,
            event_codes,
            max_envelopes,
            current_time,
            retry_count,
            parameters,
        },
        "GetParameterValuesResponse" => InboundRpc::GetParameterValuesResponse(parameters),
        "SetParameterValuesResponse" => InboundRpc::SetParameterValuesResponse { status: set_status },
        "RebootResponse" => InboundRpc::RebootResponse,
        "FactoryResetResponse" => InboundRpc::FactoryResetResponse,
        "GetRPCMethodsResponse" => InboundRpc::GetRpcMethodsResponse(rpc_methods),
        "TransferComplete" => InboundRpc::TransferComplete { command_key, fault },
        "Fault" => InboundRpc::Fault(fault.unwrap_or(Fault { fault_code, fault_string, raw_inner_xml: fault_raw })),
        "" => return Err(Error::soap("empty or malformed SOAP body")),
        other => InboundRpc::Unknown(other.to_string()),
    };

    Ok(ParsedEnvelope { correlation_id, rpc })
}

/// Outbound CWMP RPC envelope builders. Each returns the full HTTP body,
/// XML declaration plus both standard namespaces (`spec.md` §4.1), with the
/// given correlation id on `cwmp:ID mustUnderstand="1"`.
pub mod outbound {
    use super::*;

    const SOAP_ENV: &str = "http://schemas.xmlsoap.org/soap/envelope/";
    const CWMP_NS: &str = "urn:dslforum-org:cwmp-1-0";

    fn envelope(correlation_id: &str, body_xml: &str) -> String {
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
                "<soap:Envelope xmlns:soap=\"{soap_env}\" xmlns:cwmp=\"{cwmp_ns}\">",
                "<soap:Header><cwmp:ID soap:mustUnderstand=\"1\">{id}</cwmp:ID></soap:Header>",
                "<soap:Body>{body}</soap:Body>",
                "</soap:Envelope>"
            ),
            soap_env = SOAP_ENV,
            cwmp_ns = CWMP_NS,
            id = escape(correlation_id),
            body = body_xml,
        )
    }

    fn escape(s: &str) -> String {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        let _ = writer.write_event(Event::Text(quick_xml::events::BytesText::new(s)));
        String::from_utf8(writer.into_inner().into_inner()).unwrap_or_else(|_| s.to_string())
    }

    /// `GetParameterValues(names)`.
    pub fn get_parameter_values(correlation_id: &str, names: &[String]) -> String {
        let items: String = names
            .iter()
            .map(|n| format!("<string>{}</string>", escape(n)))
            .collect();
        let body = format!(
            "<cwmp:GetParameterValues><ParameterNames soap:arrayType=\"xsd:string[{}]\">{}</ParameterNames></cwmp:GetParameterValues>",
            names.len(),
            items
        );
        envelope(correlation_id, &body)
    }

    /// `SetParameterValues(pairs, parameter_key)`. Each value is serialized as `xsd:string`.
    pub fn set_parameter_values(correlation_id: &str, pairs: &[(String, String)], parameter_key: &str) -> String {
        let items: String = pairs
            .iter()
            .map(|(path, value)| {
                format!(
                    "<ParameterValueStruct><Name>{}</Name><Value xsi:type=\"xsd:string\">{}</Value></ParameterValueStruct>",
                    escape(path),
                    escape(value)
                )
            })
            .collect();
        let body = format!(
            "<cwmp:SetParameterValues><ParameterList soap:arrayType=\"cwmp:ParameterValueStruct[{}]\">{}</ParameterList><ParameterKey>{}</ParameterKey></cwmp:SetParameterValues>",
            pairs.len(),
            items,
            escape(parameter_key)
        );
        envelope(correlation_id, &body)
    }

    pub fn reboot(correlation_id: &str, command_key: &str) -> String {
        let body = format!("<cwmp:Reboot><CommandKey>{}</CommandKey></cwmp:Reboot>", escape(command_key));
        envelope(correlation_id, &body)
    }

    pub fn factory_reset(correlation_id: &str) -> String {
        envelope(correlation_id, "<cwmp:FactoryReset></cwmp:FactoryReset>")
    }

    pub fn get_rpc_methods(correlation_id: &str) -> String {
        envelope(correlation_id, "<cwmp:GetRPCMethods></cwmp:GetRPCMethods>")
    }

    pub fn add_object(correlation_id: &str, object_name: &str, parameter_key: &str) -> String {
        let body = format!(
            "<cwmp:AddObject><ObjectName>{}</ObjectName><ParameterKey>{}</ParameterKey></cwmp:AddObject>",
            escape(object_name),
            escape(parameter_key)
        );
        envelope(correlation_id, &body)
    }

    pub fn delete_object(correlation_id: &str, object_name: &str, parameter_key: &str) -> String {
        let body = format!(
            "<cwmp:DeleteObject><ObjectName>{}</ObjectName><ParameterKey>{}</ParameterKey></cwmp:DeleteObject>",
            escape(object_name),
            escape(parameter_key)
        );
        envelope(correlation_id, &body)
    }

    pub fn get_parameter_names(correlation_id: &str, path: &str, next_level: bool) -> String {
        let body = format!(
            "<cwmp:GetParameterNames><ParameterPath>{}</ParameterPath><NextLevel>{}</NextLevel></cwmp:GetParameterNames>",
            escape(path),
            if next_level { "1" } else { "0" }
        );
        envelope(correlation_id, &body)
    }

    /// Default `file_type` is `"1 Firmware Upgrade Image"` per `spec.md` §4.1.
    pub fn download(
        correlation_id: &str,
        file_type: Option<&str>,
        url: &str,
        file_size: u64,
        credentials: Option<(&str, &str)>,
    ) -> String {
        let (username, password) = credentials.unwrap_or(("", ""));
        let body = format!(
            "<cwmp:Download><CommandKey></CommandKey><FileType>{}</FileType><URL>{}</URL><Username>{}</Username><Password>{}</Password><FileSize>{}</FileSize><TargetFileName></TargetFileName><DelaySeconds>0</DelaySeconds><SuccessURL></SuccessURL><FailureURL></FailureURL></cwmp:Download>",
            escape(file_type.unwrap_or("1 Firmware Upgrade Image")),
            escape(url),
            escape(username),
            escape(password),
            file_size,
        );
        envelope(correlation_id, &body)
    }

    pub fn transfer_complete_response(correlation_id: &str) -> String {
        envelope(correlation_id, "<cwmp:TransferCompleteResponse></cwmp:TransferCompleteResponse>")
    }

    pub fn inform_response(correlation_id: &str) -> String {
        envelope(correlation_id, "<cwmp:InformResponse><MaxEnvelopes>1</MaxEnvelopes></cwmp:InformResponse>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFORM_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-0">
<soap:Header><cwmp:ID soap:mustUnderstand="1">1</cwmp:ID></soap:Header>
<soap:Body>
<cwmp:Inform>
<DeviceId>
<Manufacturer>ZTE</Manufacturer>
<OUI>ABCDEF</OUI>
<ProductClass>ONU</ProductClass>
<SerialNumber>5A5445474243313233</SerialNumber>
</DeviceId>
<Event><EventStruct><EventCode>0 BOOTSTRAP</EventCode><CommandKey></CommandKey></EventStruct></Event>
<MaxEnvelopes>1</MaxEnvelopes>
<CurrentTime>2026-07-28T10:00:00Z</CurrentTime>
<RetryCount>0</RetryCount>
<ParameterList soap:arrayType="cwmp:ParameterValueStruct[2]">
<ParameterValueStruct>
<Name>InternetGatewayDevice.WANDevice.1.X_ZTE-COM_WANPONInterfaceConfig.RXPower</Name>
<Value xsi:type="xsd:int">1585</Value>
</ParameterValueStruct>
<ParameterValueStruct>
<Name>InternetGatewayDevice.DeviceInfo.UpTime</Name>
<Value xsi:type="xsd:unsignedInt">42</Value>
</ParameterValueStruct>
</ParameterList>
</cwmp:Inform>
</soap:Body>
</soap:Envelope>"#;

    #[test]
    fn parses_inform_with_prefixed_namespaces() {
        let parsed = parse_envelope(INFORM_BODY).unwrap();
        assert_eq!(parsed.correlation_id.as_deref(), Some("1"));
        match parsed.rpc {
            InboundRpc::Inform { device_id, parameters, event_codes, .. } => {
                assert_eq!(device_id.manufacturer, "ZTE");
                assert_eq!(device_id.serial_number, "5A5445474243313233");
                assert_eq!(event_codes, vec!["0 BOOTSTRAP".to_string()]);
                assert_eq!(parameters.len(), 2);
                assert_eq!(parameters[0].1, "1585");
            }
            other => panic!("expected Inform, got {other:?}"),
        }
    }

    #[test]
    fn parses_inform_without_any_namespace_prefix() {
        let body = INFORM_BODY.replace("soap:", "").replace("cwmp:", "");
        let parsed = parse_envelope(&body).unwrap();
        assert!(matches!(parsed.rpc, InboundRpc::Inform { .. }));
    }

    #[test]
    fn parses_fault() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-0">
<soap:Header><cwmp:ID soap:mustUnderstand="1">task-1</cwmp:ID></soap:Header>
<soap:Body><soap:Fault><faultcode>Client</faultcode><faultstring>CWMP fault</faultstring>
<detail><cwmp:Fault><FaultCode>9005</FaultCode><FaultString>Invalid parameter name</FaultString></cwmp:Fault></detail>
</soap:Fault></soap:Body></soap:Envelope>"#;
        let parsed = parse_envelope(body).unwrap();
        assert_eq!(parsed.correlation_id.as_deref(), Some("task-1"));
        match parsed.rpc {
            InboundRpc::Fault(fault) => assert_eq!(fault.fault_code, 9005),
            other => panic!("expected Fault, got {other:?}"),
        }
    }

    #[test]
    fn unknown_rpc_parses_to_unknown_variant() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
<soap:Body><cwmp:Kicked xmlns:cwmp="urn:dslforum-org:cwmp-1-0"><Command>x</Command></cwmp:Kicked></soap:Body>
</soap:Envelope>"#;
        let parsed = parse_envelope(body).unwrap();
        assert_eq!(parsed.rpc, InboundRpc::Unknown("Kicked".to_string()));
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(parse_envelope("<not-xml").is_err());
        assert!(parse_envelope("").is_err());
    }

    #[test]
    fn outbound_get_parameter_values_escapes_and_orders_names() {
        let xml = outbound::get_parameter_values("task-1", &["A.B".to_string(), "C.D".to_string()]);
        assert!(xml.contains("cwmp:ID soap:mustUnderstand=\"1\">task-1<"));
        assert!(xml.contains("<string>A.B</string><string>C.D</string>"));
    }

    #[test]
    fn outbound_set_parameter_values_escapes_injected_markup() {
        let xml = outbound::set_parameter_values(
            "task-2",
            &[("Path".to_string(), "<script>".to_string())],
            "pk",
        );
        assert!(!xml.contains("<script>"));
        assert!(xml.contains("&lt;script&gt;"));
    }

    #[test]
    fn outbound_download_defaults_file_type() {
        let xml = outbound::download("task-3", None, "http://fw/x.bin", 1024, None);
        assert!(xml.contains("1 Firmware Upgrade Image"));
    }
}
