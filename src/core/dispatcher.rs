//! The CWMP HTTP endpoint: one `axum::Router` implementing the session state
//! machine in `spec.md` §4.5.
//!
//! Grounded on the teacher's axum wiring for `services::cdr`'s ingest
//! endpoint and on `adamtc007-ob-poc/rust/src/bin/dsl_api.rs`'s
//! `AppState`/`State`/`TcpListener`/`axum::serve` pattern, generalized from a
//! JSON API to a single CWMP POST endpoint that always answers with either a
//! SOAP envelope or an empty body.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::core::acs::{Acs, DispatchOutcome};
use crate::protocols::cwmp::outbound;
use crate::protocols::cwmp::InboundRpc;

const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Build the dispatcher's router. The caller serves it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so
/// [`ConnectInfo`] resolves to the CPE's real address.
pub fn build_router(acs: Arc<Acs>) -> Router {
    Router::new()
        .route("/", any(handle_cwmp))
        .route("/*path", any(handle_cwmp))
        .with_state(acs)
        .layer(TraceLayer::new_for_http())
}

async fn handle_cwmp(
    State(acs): State<Arc<Acs>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    method: axum::http::Method,
    body: String,
) -> Response {
    // Any GET, on any path, ends (or never starts) a session (`spec.md` §4.5
    // "Any state: GET ... -> 204 immediately").
    if method != axum::http::Method::POST {
        return StatusCode::NO_CONTENT.into_response();
    }

    if crate::protocols::cwmp::is_empty_body(&body) {
        return match acs.handle_empty_body(remote_addr).await {
            Ok(outcome) => outcome_response(outcome),
            Err(e) => {
                error!(error = %e, "empty-body poll handling failed");
                StatusCode::NO_CONTENT.into_response()
            }
        };
    }

    let parsed = match crate::protocols::cwmp::parse_envelope(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "malformed CWMP envelope");
            return (StatusCode::BAD_REQUEST, "malformed CWMP envelope").into_response();
        }
    };

    match parsed.rpc {
        InboundRpc::Inform { device_id, event_codes, max_envelopes, current_time, retry_count, parameters } => {
            // A database error mid-ingestion must not block the session: the
            // CPE still needs its InformResponse (`spec.md` §7).
            if let Err(e) = acs
                .handle_inform(remote_addr, device_id, event_codes, max_envelopes, current_time, retry_count, parameters)
                .await
            {
                error!(error = %e, "Inform ingestion failed");
            }
            let correlation_id = parsed.correlation_id.unwrap_or_default();
            xml_response(outbound::inform_response(&correlation_id))
        }
        InboundRpc::GetParameterValuesResponse(parameters) => {
            let result = serde_json::json!({ "parameters": parameters_to_json(&parameters) });
            dispatch_response(&acs, remote_addr, parsed.correlation_id.as_deref(), result, Some(&parameters)).await
        }
        InboundRpc::SetParameterValuesResponse { status } => {
            let result = serde_json::json!({ "status": status });
            dispatch_response(&acs, remote_addr, parsed.correlation_id.as_deref(), result, None).await
        }
        InboundRpc::RebootResponse | InboundRpc::FactoryResetResponse => {
            dispatch_response(&acs, remote_addr, parsed.correlation_id.as_deref(), serde_json::json!({}), None).await
        }
        InboundRpc::GetRpcMethodsResponse(methods) => {
            let result = serde_json::json!({ "methods": methods });
            dispatch_response(&acs, remote_addr, parsed.correlation_id.as_deref(), result, None).await
        }
        InboundRpc::TransferComplete { command_key, fault: Some(fault) } => {
            warn!(command_key, "TransferComplete carried a fault");
            match acs.handle_fault(remote_addr, parsed.correlation_id.as_deref(), fault).await {
                Ok(outcome) => outcome_response(outcome),
                Err(e) => {
                    error!(error = %e, "fault handling failed");
                    StatusCode::NO_CONTENT.into_response()
                }
            }
        }
        InboundRpc::TransferComplete { command_key, fault: None } => {
            let result = serde_json::json!({ "command_key": command_key });
            dispatch_response(&acs, remote_addr, parsed.correlation_id.as_deref(), result, None).await
        }
        InboundRpc::Fault(fault) => match acs.handle_fault(remote_addr, parsed.correlation_id.as_deref(), fault).await {
            Ok(outcome) => outcome_response(outcome),
            Err(e) => {
                error!(error = %e, "fault handling failed");
                StatusCode::NO_CONTENT.into_response()
            }
        },
        InboundRpc::Unknown(name) => {
            acs.handle_unknown_rpc(&name);
            acs.sessions.remove(&remote_addr);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

async fn dispatch_response(
    acs: &Acs,
    remote_addr: SocketAddr,
    correlation_id: Option<&str>,
    result: serde_json::Value,
    parameters: Option<&[crate::protocols::cwmp::ParamTriple]>,
) -> Response {
    match acs.handle_response(remote_addr, correlation_id, result, parameters).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => {
            error!(error = %e, "response handling failed");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

fn outcome_response(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::NoContent => StatusCode::NO_CONTENT.into_response(),
        DispatchOutcome::Rpc(xml) => xml_response(xml),
    }
}

fn xml_response(body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, XML_CONTENT_TYPE)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn parameters_to_json(parameters: &[crate::protocols::cwmp::ParamTriple]) -> serde_json::Value {
    serde_json::Value::Array(
        parameters
            .iter()
            .map(|(name, value, param_type)| {
                serde_json::json!({ "name": name, "value": value, "type": param_type })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::Store;
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_acs() -> Arc<Acs> {
        let (tx, _rx) = mpsc::channel(16);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        Arc::new(Acs::new(store, std::time::Duration::from_secs(120), std::time::Duration::from_secs(10), tx))
    }

    fn post_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .extension(ConnectInfo("10.1.1.1:9000".parse::<SocketAddr>().unwrap()))
            .body(Body::from(body))
            .unwrap()
    }

    const INFORM_BODY: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-0">
<soap:Header><cwmp:ID soap:mustUnderstand="1">1</cwmp:ID></soap:Header>
<soap:Body><cwmp:Inform>
<DeviceId><Manufacturer>ZTE</Manufacturer><OUI>ABCDEF</OUI><ProductClass>ONU</ProductClass><SerialNumber>5A5445474243313233</SerialNumber></DeviceId>
<Event><EventStruct><EventCode>0 BOOTSTRAP</EventCode></EventStruct></Event>
<MaxEnvelopes>1</MaxEnvelopes><CurrentTime>2026-07-28T10:00:00Z</CurrentTime><RetryCount>0</RetryCount>
<ParameterList soap:arrayType="cwmp:ParameterValueStruct[0]"></ParameterList>
</cwmp:Inform></soap:Body></soap:Envelope>"#;

    #[tokio::test]
    async fn get_request_is_always_no_content() {
        let app = build_router(test_acs());
        let req = Request::builder()
            .method("GET")
            .uri("/anything")
            .extension(ConnectInfo("10.1.1.1:9000".parse::<SocketAddr>().unwrap()))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn inform_returns_inform_response_envelope() {
        let app = build_router(test_acs());
        let response = app.oneshot(post_request(INFORM_BODY)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            XML_CONTENT_TYPE,
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("InformResponse"));
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = build_router(test_acs());
        let response = app.oneshot(post_request("<not-xml")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_body_without_session_is_no_content() {
        let app = build_router(test_acs());
        let response = app.oneshot(post_request("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    fn response_envelope(correlation_id: &str) -> String {
        format!(
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-0">
<soap:Header><cwmp:ID soap:mustUnderstand="1">{correlation_id}</cwmp:ID></soap:Header>
<soap:Body><cwmp:SetParameterValuesResponse><Status>0</Status></cwmp:SetParameterValuesResponse></soap:Body></soap:Envelope>"#
        )
    }

    fn fault_envelope(correlation_id: &str) -> String {
        format!(
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-0">
<soap:Header><cwmp:ID soap:mustUnderstand="1">{correlation_id}</cwmp:ID></soap:Header>
<soap:Body><soap:Fault><faultcode>Client</faultcode><faultstring>CWMP fault</faultstring>
<detail><cwmp:Fault><FaultCode>9005</FaultCode><FaultString>Invalid parameter name</FaultString></cwmp:Fault></detail>
</soap:Fault></soap:Body></soap:Envelope>"#
        )
    }

    /// Pull the `cwmp:ID` out of a just-emitted outbound envelope, the same
    /// way a real CPE would echo it back on the matching response.
    async fn correlation_id_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let start = text.find("cwmp:ID").and_then(|i| text[i..].find('>').map(|j| i + j + 1)).unwrap();
        let end = text[start..].find('<').map(|j| start + j).unwrap();
        text[start..end].to_string()
    }

    /// Scenarios 2 and 3 of `spec.md` §8: after an Inform, an empty-body poll
    /// drains the oldest pending task as an outbound RPC carrying
    /// `task-<id>`; the matching response completes that task.
    #[tokio::test]
    async fn draining_and_matching_response_completes_task() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let (tx, _rx) = mpsc::channel(16);
        let acs = Arc::new(Acs::new(
            store.clone() as Arc<dyn Store>,
            std::time::Duration::from_secs(120),
            std::time::Duration::from_secs(10),
            tx,
        ));
        let app = build_router(acs);

        let inform_resp = app.clone().oneshot(post_request(INFORM_BODY)).await.unwrap();
        assert_eq!(inform_resp.status(), StatusCode::OK);

        let drain_resp = app.clone().oneshot(post_request("")).await.unwrap();
        assert_eq!(drain_resp.status(), StatusCode::OK);
        let correlation_id = correlation_id_of(drain_resp).await;
        assert!(correlation_id.starts_with("task-"), "got {correlation_id}");

        let task_id = crate::model::task::Task::parse_correlation_id(&correlation_id).unwrap();
        let running = store.find_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(running.status, crate::model::task::TaskStatus::Running);

        let body: &'static str = Box::leak(response_envelope(&correlation_id).into_boxed_str());
        let complete_resp = app.clone().oneshot(post_request(body)).await.unwrap();
        assert!(matches!(complete_resp.status(), StatusCode::OK | StatusCode::NO_CONTENT));

        let completed = store.find_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(completed.status, crate::model::task::TaskStatus::Completed);
    }

    /// Scenario 4 of `spec.md` §8: a `<Fault>` body matching a running task's
    /// correlation id marks that task failed with the verbatim fault XML and
    /// ends the session at 204.
    #[tokio::test]
    async fn fault_fails_the_running_task_and_ends_session() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let (tx, _rx) = mpsc::channel(16);
        let acs = Arc::new(Acs::new(
            store.clone() as Arc<dyn Store>,
            std::time::Duration::from_secs(120),
            std::time::Duration::from_secs(10),
            tx,
        ));
        let app = build_router(acs);

        app.clone().oneshot(post_request(INFORM_BODY)).await.unwrap();
        let drain_resp = app.clone().oneshot(post_request("")).await.unwrap();
        let correlation_id = correlation_id_of(drain_resp).await;
        let task_id = crate::model::task::Task::parse_correlation_id(&correlation_id).unwrap();

        let body: &'static str = Box::leak(fault_envelope(&correlation_id).into_boxed_str());
        let fault_resp = app.clone().oneshot(post_request(body)).await.unwrap();
        assert_eq!(fault_resp.status(), StatusCode::NO_CONTENT);

        let failed = store.find_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(failed.status, crate::model::task::TaskStatus::Failed);
        assert!(failed.error.unwrap().starts_with("CWMP Fault: "));
    }

    /// Scenario 6 of `spec.md` §8: a response body from a remote address with
    /// no session and no matching device is dropped silently.
    #[tokio::test]
    async fn response_from_unknown_device_is_dropped() {
        let app = build_router(test_acs());
        let body: &'static str =
            Box::leak(response_envelope("task-00000000-0000-0000-0000-000000000000").into_boxed_str());
        let response = app.oneshot(post_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
