//! Data operations exposed to the hosted UI.
//!
//! The same JSON envelope travels over both transports, so the UI cannot
//! tell them apart:
//!
//! ```text
//! request : {"op":"list","kind":"asset"}
//! response: {"ok":true,"data":[…]}  |  {"ok":false,"error":"…"}
//! ```
//!
//! In-process calls are `GET http://kiosk-bridge.localhost/invoke?payload=…`
//! answered by the rendering surface's resource interception; HTTP calls are
//! `POST <api>/api/invoke` answered by the local API server.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::storage::Store;

/// Reserved origin answered inside the process, never on the network.
pub const BRIDGE_ORIGIN: &str = "http://kiosk-bridge.localhost";

/// Global name under which the UI finds the bridge.
pub const HOST_OBJECT_NAME: &str = "kioskBridge";

/// DOM event fired once the bridge global is in place.
pub const READY_EVENT: &str = "kiosk-bridge-ready";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeRequest {
    Ping,
    List {
        kind: String,
    },
    Get {
        kind: String,
        id: String,
    },
    Upsert {
        kind: String,
        #[serde(default)]
        id: Option<String>,
        payload: Value,
    },
    Delete {
        kind: String,
        id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"ok":false,"error":"response serialization failed"}"#.into())
    }
}

/// Executes one request against a store. Shared by both transports.
pub fn dispatch(store: &Store, request: BridgeRequest) -> BridgeResponse {
    let result = match request {
        BridgeRequest::Ping => Ok(Value::String("pong".into())),
        BridgeRequest::List { kind } => store
            .list(&kind)
            .and_then(|records| Ok(serde_json::to_value(records)?)),
        BridgeRequest::Get { kind, id } => store
            .get(&kind, &id)
            .and_then(|record| Ok(serde_json::to_value(record)?)),
        BridgeRequest::Upsert { kind, id, payload } => store
            .upsert(&kind, id.as_deref(), &payload)
            .and_then(|record| Ok(serde_json::to_value(record)?)),
        BridgeRequest::Delete { kind, id } => store.delete(&kind, &id).map(Value::Bool),
    };
    match result {
        Ok(data) => BridgeResponse::success(data),
        Err(e) => {
            warn!(error = %e, "Bridge operation failed");
            BridgeResponse::failure(e.to_string())
        }
    }
}

/// Parses and dispatches a raw JSON request.
pub fn dispatch_json(store: &Store, raw: &str) -> BridgeResponse {
    match serde_json::from_str::<BridgeRequest>(raw) {
        Ok(request) => dispatch(store, request),
        Err(e) => BridgeResponse::failure(format!("malformed bridge request: {e}")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-process bridge object
// ─────────────────────────────────────────────────────────────────────────────

/// Bridge bound to the session's storage connection.
///
/// Holds a non-owning reference: once the owner drops the connection, every
/// call answers with an error instead of touching freed state.
#[derive(Debug)]
pub struct Bridge {
    store: Weak<Store>,
    calls: Cell<u64>,
}

impl Bridge {
    pub fn new(store: &Rc<Store>) -> Self {
        Self {
            store: Rc::downgrade(store),
            calls: Cell::new(0),
        }
    }

    pub fn invoke_json(&self, raw: &str) -> BridgeResponse {
        self.calls.set(self.calls.get() + 1);
        match self.store.upgrade() {
            Some(store) => dispatch_json(&store, raw),
            None => BridgeResponse::failure("storage connection disposed"),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.store.strong_count() > 0
    }

    pub fn calls(&self) -> u64 {
        self.calls.get()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reserved-origin routing
// ─────────────────────────────────────────────────────────────────────────────

/// A request aimed at [`BRIDGE_ORIGIN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeRoute {
    Invoke(String),
    Log { kind: String, message: String },
    Unknown(String),
}

/// Classifies a URL. `None` means the URL is not for the bridge origin.
pub fn route(url: &Url) -> Option<BridgeRoute> {
    if url.scheme() != "http" || url.host_str() != Some("kiosk-bridge.localhost") {
        return None;
    }
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    };
    let route = match url.path() {
        "/invoke" => BridgeRoute::Invoke(param("payload")),
        "/__log" => BridgeRoute::Log {
            kind: param("kind"),
            message: param("message"),
        },
        other => BridgeRoute::Unknown(other.to_string()),
    };
    debug!(?route, "Bridge origin request");
    Some(route)
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization script
// ─────────────────────────────────────────────────────────────────────────────

/// Where the UI-side shim sends its calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEndpoint {
    InProcess,
    Http(Url),
    Unavailable,
}

impl BridgeEndpoint {
    fn mode(&self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::Http(_) => "http",
            Self::Unavailable => "unavailable",
        }
    }

    fn url(&self) -> String {
        match self {
            Self::InProcess => format!("{BRIDGE_ORIGIN}/invoke"),
            Self::Http(base) => base
                .join("api/invoke")
                .map(|u| u.to_string())
                .unwrap_or_default(),
            Self::Unavailable => String::new(),
        }
    }
}

/// Script announcing the bridge to the page.
///
/// Defines `window.kioskBridge` (or `null` when no transport works) and fires
/// [`READY_EVENT`]. Pages must check for the global rather than assume it.
pub fn init_script(endpoint: &BridgeEndpoint) -> String {
    let js = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into());
    format!(
        r#"(function () {{
  if (window.{name} !== undefined) return;
  var mode = {mode};
  var endpoint = {endpoint};
  function call(request) {{
    var body = JSON.stringify(request);
    var pending = mode === "http"
      ? fetch(endpoint, {{ method: "POST", headers: {{ "Content-Type": "application/json" }}, body: body }})
      : fetch(endpoint + "?payload=" + encodeURIComponent(body));
    return pending.then(function (r) {{ return r.json(); }}).then(function (envelope) {{
      if (!envelope.ok) throw new Error(envelope.error || "bridge error");
      return envelope.data;
    }});
  }}
  var bridge = mode === "unavailable" ? null : Object.freeze({{
    mode: mode,
    invoke: call,
    ping: function () {{ return call({{ op: "ping" }}); }},
    list: function (kind) {{ return call({{ op: "list", kind: kind }}); }},
    get: function (kind, id) {{ return call({{ op: "get", kind: kind, id: id }}); }},
    upsert: function (kind, payload, id) {{ return call({{ op: "upsert", kind: kind, id: id, payload: payload }}); }},
    remove: function (kind, id) {{ return call({{ op: "delete", kind: kind, id: id }}); }}
  }});
  Object.defineProperty(window, "{name}", {{ value: bridge, writable: false, configurable: false }});
  window.{name}Status = mode;
  document.dispatchEvent(new CustomEvent("{ready}", {{ detail: {{ mode: mode }} }}));
}})();"#,
        name = HOST_OBJECT_NAME,
        ready = READY_EVENT,
        mode = js(endpoint.mode()),
        endpoint = js(&endpoint.url()),
    )
}

/// Inlines `scripts` as the first children of `<head>`, ahead of anything
/// the document declares, so they run before any page script.
///
/// Without a `<head>` the scripts go right after `<html>`, then after the
/// doctype, then at the very start.
pub fn inject_into_head(html: &str, scripts: &[String]) -> String {
    if scripts.is_empty() {
        return html.to_string();
    }
    let lower = html.to_ascii_lowercase();
    let at = open_tag_end(&lower, "head")
        .or_else(|| open_tag_end(&lower, "html"))
        .or_else(|| {
            lower
                .find("<!doctype")
                .and_then(|start| lower[start..].find('>').map(|end| start + end + 1))
        })
        .unwrap_or(0);

    let mut inline = String::new();
    for script in scripts {
        inline.push_str("<script>");
        inline.push_str(&script.replace("</script", "<\\/script"));
        inline.push_str("</script>");
    }
    let mut out = String::with_capacity(html.len() + inline.len());
    out.push_str(&html[..at]);
    out.push_str(&inline);
    out.push_str(&html[at..]);
    out
}

/// Byte offset just past `<name ...>`. `<header>` does not match `head`.
fn open_tag_end(lower: &str, name: &str) -> Option<usize> {
    let needle = format!("<{name}");
    lower.match_indices(&needle).find_map(|(start, _)| {
        let after = start + needle.len();
        match lower[after..].chars().next() {
            Some('>') => Some(after + 1),
            Some(c) if c.is_ascii_whitespace() || c == '/' => {
                lower[after..].find('>').map(|end| after + end + 1)
            }
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> Rc<Store> {
        Rc::new(Store::open_in_memory().unwrap())
    }

    #[test]
    fn test_request_wire_format() {
        let request: BridgeRequest =
            serde_json::from_str(r#"{"op":"upsert","kind":"asset","payload":{"n":1}}"#).unwrap();
        assert_eq!(
            request,
            BridgeRequest::Upsert {
                kind: "asset".into(),
                id: None,
                payload: json!({"n": 1})
            }
        );
    }

    #[test]
    fn test_dispatch_crud() {
        let store = store();
        let created = dispatch(
            &store,
            BridgeRequest::Upsert {
                kind: "asset".into(),
                id: Some("a1".into()),
                payload: json!({"name": "Drill"}),
            },
        );
        assert!(created.ok);

        let listed = dispatch(&store, BridgeRequest::List { kind: "asset".into() });
        assert_eq!(listed.data.unwrap()[0]["payload"]["name"], "Drill");

        let deleted = dispatch(
            &store,
            BridgeRequest::Delete {
                kind: "asset".into(),
                id: "a1".into(),
            },
        );
        assert_eq!(deleted.data, Some(Value::Bool(true)));
    }

    #[test]
    fn test_malformed_request_is_reported() {
        let response = dispatch_json(&store(), r#"{"op":"drop_tables"}"#);
        assert!(!response.ok);
        assert!(response.error.unwrap().contains("malformed"));
    }

    #[test]
    fn test_bridge_fails_softly_after_store_disposed() {
        let store = store();
        let bridge = Bridge::new(&store);
        assert!(bridge.invoke_json(r#"{"op":"ping"}"#).ok);
        assert!(bridge.is_bound());

        drop(store);
        let response = bridge.invoke_json(r#"{"op":"ping"}"#);
        assert!(!bridge.is_bound());
        assert!(!response.ok);
        assert_eq!(bridge.calls(), 2);
    }

    #[test]
    fn test_route_recognizes_bridge_origin() {
        let url = Url::parse("http://kiosk-bridge.localhost/invoke?payload=%7B%22op%22%3A%22ping%22%7D")
            .unwrap();
        assert_eq!(route(&url), Some(BridgeRoute::Invoke(r#"{"op":"ping"}"#.into())));

        let log = Url::parse("http://kiosk-bridge.localhost/__log?kind=error&message=boom").unwrap();
        assert_eq!(
            route(&log),
            Some(BridgeRoute::Log {
                kind: "error".into(),
                message: "boom".into()
            })
        );

        assert!(route(&Url::parse("https://example.com/invoke").unwrap()).is_none());
    }

    #[test]
    fn test_response_envelope_shape() {
        assert_eq!(
            BridgeResponse::success(json!(1)).to_json(),
            r#"{"ok":true,"data":1}"#
        );
        assert_eq!(
            BridgeResponse::failure("nope").to_json(),
            r#"{"ok":false,"error":"nope"}"#
        );
    }

    #[test]
    fn test_init_script_per_endpoint() {
        let in_process = init_script(&BridgeEndpoint::InProcess);
        assert!(in_process.contains("\"in-process\""));
        assert!(in_process.contains("http://kiosk-bridge.localhost/invoke"));
        assert!(in_process.contains(READY_EVENT));

        let http = init_script(&BridgeEndpoint::Http(Url::parse("http://127.0.0.1:5000/").unwrap()));
        assert!(http.contains("http://127.0.0.1:5000/api/invoke"));

        let none = init_script(&BridgeEndpoint::Unavailable);
        assert!(none.contains("\"unavailable\""));
        assert!(none.contains("window.kioskBridge !== undefined"));
    }

    #[test]
    fn test_init_script_leads_head() {
        let page = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
                    <script>window.kioskBridge.ping()</script></head><body></body></html>";
        let script = init_script(&BridgeEndpoint::InProcess);
        let html = inject_into_head(page, std::slice::from_ref(&script));

        let ours = html.find("Object.defineProperty(window").unwrap();
        let theirs = html.find("window.kioskBridge.ping()").unwrap();
        assert!(ours < theirs);
        assert!(html.starts_with("<!DOCTYPE html>\n<html><head><script>"));
        assert_eq!(html.matches("<script>").count(), 2);
    }

    #[test]
    fn test_inject_skips_header_and_handles_attributes() {
        let page = "<html lang=\"fr\"><header>x</header><HEAD data-x=\"1\"><script>app()</script></HEAD></html>";
        let html = inject_into_head(page, &["boot()".to_string()]);
        assert!(html.contains("<HEAD data-x=\"1\"><script>boot()</script><script>app()"));
        assert!(html.contains("<header>x</header>"));
    }

    #[test]
    fn test_inject_without_head() {
        let html = inject_into_head("<!doctype html><p>hi</p>", &["boot()".to_string()]);
        assert_eq!(html, "<!doctype html><script>boot()</script><p>hi</p>");

        let bare = inject_into_head("<p>hi</p>", &["boot()".to_string()]);
        assert!(bare.starts_with("<script>boot()</script>"));
        assert_eq!(inject_into_head("<p>hi</p>", &[]), "<p>hi</p>");
    }

    #[test]
    fn test_inline_script_cannot_close_its_element() {
        let html = inject_into_head("<head></head>", &["x = '</script><b>'".to_string()]);
        assert_eq!(html.matches("</script>").count(), 1);
    }
}
