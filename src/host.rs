//! Browser host controller: the thin layer between the session decisions
//! (content source, transport) and the rendering engine.
//!
//! The engine is reached only through [`RenderingSurface`], implemented for
//! Servo in [`crate::servo_glue`] and by a recording fake in tests.

use tracing::{info, warn};
use url::Url;

use crate::bridge::{self, BRIDGE_ORIGIN};
use crate::config::SurfaceConfig;
use crate::content::{EntryDocument, NavigationTarget, ResolvedContentSource};
use crate::transport::{BridgeTransport, HostObjectRegistrar, TransportSelector};

/// Fixed feature set of the kiosk surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    pub swipe_navigation: bool,
    pub accelerator_keys: bool,
    pub context_menu: bool,
    /// Engine developer tools. See DESIGN.md, kept configurable.
    pub devtools: bool,
    /// Only ever used to attach the bridge.
    pub host_objects: bool,
}

impl From<&SurfaceConfig> for SurfaceCapabilities {
    fn from(config: &SurfaceConfig) -> Self {
        Self {
            swipe_navigation: config.swipe_navigation,
            accelerator_keys: config.accelerator_keys,
            context_menu: config.context_menu,
            devtools: config.devtools,
            host_objects: config.host_objects,
        }
    }
}

impl Default for SurfaceCapabilities {
    fn default() -> Self {
        Self::from(&SurfaceConfig::default())
    }
}

/// What the host needs from an embedded rendering engine.
pub trait RenderingSurface: HostObjectRegistrar {
    fn apply_capabilities(&self, capabilities: &SurfaceCapabilities);

    /// Runs before page scripts of every document.
    fn add_init_script(&self, script: String);

    /// The surface answers `entry.url` itself, with the init scripts inlined
    /// at the top of `<head>`.
    fn serve_entry_document(&self, entry: EntryDocument);

    /// Runs once each document has finished loading.
    fn add_load_script(&self, script: String);

    fn navigate(&self, url: &Url);

    /// Renders an inline HTML document in place of content.
    fn load_document(&self, html: &str);

    /// Drops the engine-side view and every handle it holds.
    fn release(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Created,
    Initialized,
    ShutDown,
}

pub struct BrowserHost<S: RenderingSurface> {
    surface: S,
    state: HostState,
}

impl<S: RenderingSurface> BrowserHost<S> {
    pub fn new(surface: S, capabilities: SurfaceCapabilities) -> Self {
        surface.apply_capabilities(&capabilities);
        info!(?capabilities, "Rendering surface configured");
        if capabilities.devtools {
            warn!("Engine developer tools are enabled on a kiosk surface");
        }
        Self {
            surface,
            state: HostState::Created,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    /// Wires the transport into the page environment and navigates.
    pub fn initialize(&mut self, content: &ResolvedContentSource, transport: &BridgeTransport) {
        if self.state != HostState::Created {
            warn!(state = ?self.state, "Browser host already initialized");
            return;
        }

        self.surface
            .add_init_script(bridge::init_script(&transport.endpoint()));
        self.surface.add_load_script(diagnostics_script());
        if let Some(entry) = content.entry_document() {
            self.surface.serve_entry_document(entry);
        }

        if matches!(transport, BridgeTransport::Unavailable) && !content.is_diagnostic() {
            warn!("No data transport available, UI runs in degraded mode");
        }

        match content.navigation_target() {
            NavigationTarget::Url(url) => {
                info!(%url, transport = transport.name(), "Navigating to UI");
                self.surface.navigate(&url);
            }
            NavigationTarget::Document(html) => {
                warn!("Rendering diagnostic document in place of UI");
                self.surface.load_document(&html);
            }
        }
        self.state = HostState::Initialized;
    }

    /// Releases the surface, then the bridge and the connection it borrows.
    pub fn shutdown(&mut self, selector: &mut TransportSelector) {
        if self.state == HostState::ShutDown {
            return;
        }
        self.surface.release();
        selector.dispose();
        self.state = HostState::ShutDown;
        info!("Browser host shut down");
    }
}

/// Load observer: reports runtime errors and load completion to the host
/// log through the reserved bridge origin.
pub fn diagnostics_script() -> String {
    format!(
        r#"(function () {{
  if (window.__kioskDiagnostics) return;
  window.__kioskDiagnostics = true;
  function report(kind, message) {{
    try {{
      fetch("{origin}/__log?kind=" + encodeURIComponent(kind) +
            "&message=" + encodeURIComponent(String(message).slice(0, 2000)), {{ mode: "no-cors" }});
    }} catch (_) {{}}
  }}
  window.addEventListener("error", function (e) {{
    report("error", (e.message || "resource error") + " @ " + (e.filename || (e.target && e.target.src) || "") + ":" + (e.lineno || 0));
  }}, true);
  window.addEventListener("unhandledrejection", function (e) {{ report("unhandledrejection", e.reason); }});
  report("loaded", document.readyState + " " + location.href);
}})();"#,
        origin = BRIDGE_ORIGIN
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    use super::*;
    use crate::bridge::Bridge;
    use crate::error::{HostError, Result};
    use crate::storage::Store;

    /// Records every call in order.
    #[derive(Default)]
    pub struct RecordingSurface {
        pub log: RefCell<Vec<String>>,
        pub host_objects_allowed: RefCell<bool>,
        pub bridges: RefCell<Vec<Rc<Bridge>>>,
    }

    impl HostObjectRegistrar for RecordingSurface {
        fn register_host_object(&self, name: &str, bridge: Rc<Bridge>) -> Result<()> {
            if !*self.host_objects_allowed.borrow() {
                return Err(HostError::BridgeRegistrationFailed("disabled".into()));
            }
            self.log.borrow_mut().push(format!("register:{name}"));
            self.bridges.borrow_mut().push(bridge);
            Ok(())
        }
    }

    impl RenderingSurface for RecordingSurface {
        fn apply_capabilities(&self, capabilities: &SurfaceCapabilities) {
            *self.host_objects_allowed.borrow_mut() = capabilities.host_objects;
            self.log.borrow_mut().push("capabilities".into());
        }
        fn add_init_script(&self, script: String) {
            let mode = ["in-process", "http", "unavailable"]
                .into_iter()
                .find(|m| script.contains(&format!("var mode = \"{m}\"")))
                .unwrap_or("?");
            self.log.borrow_mut().push(format!("init:{mode}"));
        }
        fn add_load_script(&self, _script: String) {
            self.log.borrow_mut().push("load-script".into());
        }
        fn serve_entry_document(&self, entry: EntryDocument) {
            self.log.borrow_mut().push(format!("entry:{}", entry.path.display()));
        }
        fn navigate(&self, url: &Url) {
            self.log.borrow_mut().push(format!("navigate:{url}"));
        }
        fn load_document(&self, html: &str) {
            assert!(html.contains("<html"));
            self.log.borrow_mut().push("document".into());
        }
        fn release(&self) {
            self.bridges.borrow_mut().clear();
            self.log.borrow_mut().push("release".into());
        }
    }

    fn served() -> ResolvedContentSource {
        ResolvedContentSource::LocalBundle {
            path: PathBuf::from("/kiosk/wwwroot/index.html"),
            served_at: Some(Url::parse("http://127.0.0.1:7000/index.html?v=42").unwrap()),
        }
    }

    #[test]
    fn test_init_script_precedes_navigation() {
        let mut host = BrowserHost::new(RecordingSurface::default(), SurfaceCapabilities::default());
        let transport = BridgeTransport::Http {
            base_url: Url::parse("http://127.0.0.1:7000/").unwrap(),
        };
        host.initialize(&served(), &transport);

        assert_eq!(
            *host.surface().log.borrow(),
            vec![
                "capabilities",
                "init:http",
                "load-script",
                "entry:/kiosk/wwwroot/index.html",
                "navigate:http://127.0.0.1:7000/index.html?v=42",
            ]
        );
        assert_eq!(host.state(), HostState::Initialized);
    }

    #[test]
    fn test_diagnostic_renders_inline_document() {
        let mut host = BrowserHost::new(RecordingSurface::default(), SurfaceCapabilities::default());
        let content = ResolvedContentSource::Diagnostic {
            message: "build the UI".into(),
        };
        host.initialize(&content, &BridgeTransport::Unavailable);
        assert_eq!(host.surface().log.borrow().last().unwrap(), "document");
    }

    #[test]
    fn test_hosted_fallback_has_no_entry_document() {
        let mut host = BrowserHost::new(RecordingSurface::default(), SurfaceCapabilities::default());
        let content = ResolvedContentSource::HostedFallback {
            base_url: Url::parse("http://127.0.0.1:7000/").unwrap(),
        };
        host.initialize(&content, &BridgeTransport::Unavailable);
        let log = host.surface().log.borrow();
        assert!(!log.iter().any(|e| e.starts_with("entry:")));
        assert_eq!(log.last().unwrap(), "navigate:http://127.0.0.1:7000/");
    }

    #[test]
    fn test_initialize_twice_is_ignored() {
        let mut host = BrowserHost::new(RecordingSurface::default(), SurfaceCapabilities::default());
        host.initialize(&served(), &BridgeTransport::Unavailable);
        let len = host.surface().log.borrow().len();
        host.initialize(&served(), &BridgeTransport::Unavailable);
        assert_eq!(host.surface().log.borrow().len(), len);
    }

    #[test]
    fn test_shutdown_releases_surface_before_connection() {
        let mut host = BrowserHost::new(RecordingSurface::default(), SurfaceCapabilities::default());
        let mut selector = TransportSelector::new(None);
        let transport = selector
            .select(Some(Store::open_in_memory().unwrap()), host.surface())
            .clone();
        let BridgeTransport::InProcess { bridge } = &transport else {
            panic!("expected in-process transport");
        };
        let bridge = bridge.clone();
        drop(transport);

        host.initialize(&served(), selector.transport().unwrap());
        assert!(host.surface().log.borrow().contains(&"init:in-process".to_string()));

        host.shutdown(&mut selector);
        assert!(!bridge.is_bound());
        assert!(host.surface().bridges.borrow().is_empty());
        assert_eq!(host.state(), HostState::ShutDown);
        host.shutdown(&mut selector);
        assert_eq!(
            host.surface()
                .log
                .borrow()
                .iter()
                .filter(|e| *e == "release")
                .count(),
            1
        );
    }

    #[test]
    fn test_host_objects_disabled_blocks_registration() {
        let caps = SurfaceCapabilities {
            host_objects: false,
            ..SurfaceCapabilities::default()
        };
        let host = BrowserHost::new(RecordingSurface::default(), caps);
        let mut selector = TransportSelector::new(None);
        let transport = selector.select(Some(Store::open_in_memory().unwrap()), host.surface());
        assert!(matches!(transport, BridgeTransport::Unavailable));
    }

    #[test]
    fn test_diagnostics_script_targets_bridge_origin() {
        let script = diagnostics_script();
        assert!(script.contains("http://kiosk-bridge.localhost/__log"));
        assert!(script.contains("unhandledrejection"));
    }
}
