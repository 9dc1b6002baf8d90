//! Shared test fixtures: SOAP response bodies and an in-process speaker stub.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Router;
use parking_lot::Mutex;

/// Wraps an action response in a SOAP envelope.
pub fn envelope(action: &str, inner: &str) -> String {
    format!(
        r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:{action}Response xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">{inner}</u:{action}Response></s:Body></s:Envelope>"#
    )
}

/// A SOAP fault body carrying a UPnP error code.
pub fn fault(code: u16) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>{code}</errorCode></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#
    )
}

pub const TRACK_METADATA_ESCAPED: &str = "&lt;DIDL-Lite xmlns:dc=&quot;http://purl.org/dc/elements/1.1/&quot; xmlns:upnp=&quot;urn:schemas-upnp-org:metadata-1-0/upnp/&quot; xmlns=&quot;urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/&quot;&gt;&lt;item id=&quot;-1&quot; parentID=&quot;-1&quot;&gt;&lt;dc:title&gt;Foo&lt;/dc:title&gt;&lt;dc:creator&gt;Bar &amp;amp; Baz&lt;/dc:creator&gt;&lt;upnp:album&gt;Qux&lt;/upnp:album&gt;&lt;/item&gt;&lt;/DIDL-Lite&gt;";

/// One recorded request: the action name and the raw envelope.
#[derive(Debug, Clone)]
pub struct Call {
    pub action: String,
    pub body: String,
}

#[derive(Default)]
struct StubState {
    responses: Mutex<HashMap<String, (StatusCode, String)>>,
    calls: Mutex<Vec<Call>>,
}

/// An HTTP server on 127.0.0.1 answering SOAP actions with canned bodies.
///
/// Unknown actions get an empty 200 envelope.
pub struct SoapStub {
    pub port: u16,
    state: Arc<StubState>,
}

impl SoapStub {
    pub async fn start() -> Self {
        let state = Arc::new(StubState::default());
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { port, state }
    }

    pub fn respond(&self, action: &str, body: String) {
        self.respond_with(action, StatusCode::OK, body);
    }

    pub fn respond_with(&self, action: &str, status: StatusCode, body: String) {
        self.state
            .responses
            .lock()
            .insert(action.to_string(), (status, body));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.action).collect()
    }
}

async fn handle(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let action = headers
        .get("SOAPAction")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim_matches('"').rsplit('#').next())
        .unwrap_or_default()
        .to_string();

    state.calls.lock().push(Call {
        action: action.clone(),
        body,
    });

    state
        .responses
        .lock()
        .get(&action)
        .cloned()
        .unwrap_or_else(|| (StatusCode::OK, envelope(&action, "")))
}
