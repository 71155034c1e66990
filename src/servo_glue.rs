//! Couche d'intégration entre Servo et l'hôte kiosque.
//!
//! Ce module contient trois éléments clés :
//!
//! 1. **[`Waker`] / [`AppEvent`]** : Le pont `Send + Sync` entre les threads
//!    internes de Servo (et le thread du hook clavier) et le thread principal
//!    Winit. C'est le seul canal inter-threads de l'embedder.
//!
//! 2. **[`WebViewDelegate`] pour [`AppState`]** : callbacks Servo. On répond
//!    nous-mêmes au document d'entrée, scripts d'initialisation en tête de
//!    `<head>`, ainsi qu'aux requêtes vers l'origine réservée du bridge, sans
//!    jamais toucher le réseau.
//!
//! 3. **[`ServoSurface`]** : l'implémentation de [`RenderingSurface`] que
//!    pilote le contrôleur d'hôte.

use std::rc::Rc;

use euclid::Scale;
use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use servo::{
    LoadStatus, RenderingContext, WebResourceLoad, WebResourceResponse, WebView, WebViewBuilder,
    WebViewDelegate,
};
use tracing::{debug, error, info, warn};
use url::Url;
use winit::event_loop::{EventLoop, EventLoopProxy};

use crate::bridge::{self, Bridge, BridgeResponse, BridgeRoute};
use crate::browser::AppState;
use crate::content::EntryDocument;
use crate::error::{HostError, Result};
use crate::host::{RenderingSurface, SurfaceCapabilities};
use crate::lockdown::Mechanism;
use crate::transport::HostObjectRegistrar;

// ─────────────────────────────────────────────────────────────────────────────
// Waker : pont threads → Winit
// ─────────────────────────────────────────────────────────────────────────────

/// Événement utilisateur de la boucle Winit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// Un thread Servo a du travail pour le thread principal.
    Wake,
    /// Le raccourci de sortie a été vu par l'un des mécanismes de verrouillage.
    ExitRequested(Mechanism),
}

/// `Clone + Send + Sync` car `EventLoopProxy` l'est ; requis par
/// `EventLoopWaker: 'static + Send + Sync` et par le signal de fermeture.
#[derive(Clone)]
pub struct Waker(EventLoopProxy<AppEvent>);

impl Waker {
    pub fn new(event_loop: &EventLoop<AppEvent>) -> Self {
        Self(event_loop.create_proxy())
    }

    /// Poste la demande de sortie ; appelable depuis n'importe quel thread.
    pub fn request_exit(&self, source: Mechanism) {
        if let Err(error) = self.0.send_event(AppEvent::ExitRequested(source)) {
            warn!(?error, "Exit request could not reach the event loop");
        }
    }
}

impl embedder_traits::EventLoopWaker for Waker {
    fn clone_box(&self) -> Box<dyn embedder_traits::EventLoopWaker> {
        Box::new(Self(self.0.clone()))
    }

    fn wake(&self) {
        if let Err(error) = self.0.send_event(AppEvent::Wake) {
            warn!(?error, "Échec du réveil de la boucle d'événements Winit");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebViewDelegate : callbacks Servo → hôte
// ─────────────────────────────────────────────────────────────────────────────

/// Toutes les méthodes sont protégées par `catch_unwind` : une panique ne
/// doit pas traverser la frontière vers Servo.
impl WebViewDelegate for AppState {
    fn notify_new_frame_ready(&self, _webview: WebView) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.window.request_redraw();
        }));
    }

    /// Scripts de chargement une fois le document complet. Les scripts
    /// d'initialisation sont déjà dans le document d'entrée ; pour tout autre
    /// document, ils sont évalués dès que `<head>` est analysé.
    fn notify_load_status_changed(&self, webview: WebView, status: LoadStatus) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let scripts = match status {
                LoadStatus::HeadParsed if self.entry_inlined.replace(false) => return,
                LoadStatus::HeadParsed => self.init_scripts.borrow().clone(),
                LoadStatus::Complete => self.load_scripts.borrow().clone(),
                _ => return,
            };
            for script in scripts {
                webview.evaluate_javascript(script, |result| {
                    if let Err(error) = result {
                        warn!(?error, "Injected script failed");
                    }
                });
            }
        }));
    }

    fn notify_page_title_changed(&self, _webview: WebView, title: Option<String>) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            debug!(?title, "Page title");
        }));
    }

    /// Répond au document d'entrée et aux requêtes vers l'origine réservée
    /// du bridge. Le reste suit le chemin réseau normal.
    fn load_web_resource(&self, _webview: WebView, load: WebResourceLoad) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let url = load.request().url.clone();
            if let Some(route) = bridge::route(&url) {
                self.answer_bridge(load, url, route);
            } else if let Some(html) = self.entry_html(&url) {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
                let response = WebResourceResponse::new(url)
                    .status_code(StatusCode::OK)
                    .headers(headers);
                let intercepted = load.intercept(response);
                intercepted.send_body_data(html.into_bytes());
                intercepted.finish();
                self.entry_inlined.set(true);
            }
        }));
    }
}

impl AppState {
    /// Balisage du document d'entrée, scripts d'initialisation en tête, si
    /// `url` le désigne. `None` : Servo le charge normalement.
    fn entry_html(&self, url: &Url) -> Option<String> {
        let entry = self.entry.borrow();
        let entry = entry.as_ref().filter(|entry| entry.matches(url))?;
        match entry.render(&self.init_scripts.borrow()) {
            Ok(html) => {
                debug!(%url, "Entry document served with inline init scripts");
                Some(html)
            }
            Err(e) => {
                warn!(path = %entry.path.display(), error = %e, "Entry document unreadable, loading it normally");
                None
            }
        }
    }

    fn answer_bridge(&self, load: WebResourceLoad, url: Url, route: BridgeRoute) {
        let (status, body) = match route {
            BridgeRoute::Invoke(payload) => match self.bridge.borrow().as_ref() {
                Some(bridge) => (StatusCode::OK, bridge.invoke_json(&payload)),
                None => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    BridgeResponse::failure("in-process bridge not registered"),
                ),
            },
            BridgeRoute::Log { kind, message } => {
                match kind.as_str() {
                    "error" | "unhandledrejection" => {
                        warn!(target: "kiosk::content", kind = %kind, "{message}")
                    }
                    _ => info!(target: "kiosk::content", kind = %kind, "{message}"),
                }
                (StatusCode::NO_CONTENT, BridgeResponse::success(serde_json::Value::Null))
            }
            BridgeRoute::Unknown(path) => {
                warn!(path, "Unknown bridge route");
                (StatusCode::NOT_FOUND, BridgeResponse::failure("unknown bridge route"))
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        let response = WebResourceResponse::new(url)
            .status_code(status)
            .headers(headers);

        let intercepted = load.intercept(response);
        if status != StatusCode::NO_CONTENT {
            intercepted.send_body_data(body.to_json().into_bytes());
        }
        intercepted.finish();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ServoSurface : RenderingSurface adossée à Servo
// ─────────────────────────────────────────────────────────────────────────────

/// Poignée vers l'état partagé ; la WebView est créée à la première navigation.
#[derive(Clone)]
pub struct ServoSurface {
    state: Rc<AppState>,
}

impl ServoSurface {
    pub fn new(state: Rc<AppState>) -> Self {
        Self { state }
    }

    fn show(&self, url: Url) {
        let state = &self.state;
        if let Some(webview) = state.webview.borrow().as_ref() {
            webview.load(url);
            return;
        }
        let scale_factor = state.window.scale_factor() as f32;
        let webview = WebViewBuilder::new(
            &state.servo,
            state.rendering_context.clone() as Rc<dyn RenderingContext>,
        )
        .url(url)
        .hidpi_scale_factor(Scale::new(scale_factor))
        .delegate(state.clone())
        .build();
        webview.focus();
        *state.webview.borrow_mut() = Some(webview);
    }
}

impl HostObjectRegistrar for ServoSurface {
    fn register_host_object(&self, name: &str, bridge: Rc<Bridge>) -> Result<()> {
        if !self.state.capabilities.get().host_objects {
            return Err(HostError::BridgeRegistrationFailed(
                "host objects are disabled on this surface".into(),
            ));
        }
        let mut slot = self.state.bridge.borrow_mut();
        if slot.is_some() {
            return Err(HostError::BridgeRegistrationFailed(format!(
                "{name} already registered"
            )));
        }
        *slot = Some(bridge);
        info!(name, origin = bridge::BRIDGE_ORIGIN, "Bridge attached to reserved origin");
        Ok(())
    }
}

impl RenderingSurface for ServoSurface {
    fn apply_capabilities(&self, capabilities: &SurfaceCapabilities) {
        self.state.capabilities.set(*capabilities);
    }

    fn add_init_script(&self, script: String) {
        self.state.init_scripts.borrow_mut().push(script);
    }

    fn add_load_script(&self, script: String) {
        self.state.load_scripts.borrow_mut().push(script);
    }

    fn serve_entry_document(&self, entry: EntryDocument) {
        *self.state.entry.borrow_mut() = Some(entry);
    }

    fn navigate(&self, url: &Url) {
        self.show(url.clone());
    }

    fn load_document(&self, html: &str) {
        let html = bridge::inject_into_head(html, &self.state.init_scripts.borrow());
        match Url::parse(&data_url(&html)) {
            Ok(url) => {
                self.state.entry_inlined.set(true);
                self.show(url);
            }
            Err(e) => error!(error = %e, "Diagnostic document could not be encoded"),
        }
    }

    fn release(&self) {
        if self.state.webview.borrow_mut().take().is_some() {
            debug!("WebView released");
        }
        self.state.bridge.borrow_mut().take();
        self.state.entry.borrow_mut().take();
        self.state.init_scripts.borrow_mut().clear();
        self.state.load_scripts.borrow_mut().clear();
    }
}

/// `data:text/html` avec encodage pourcent (RFC 3986, caractères non réservés).
pub fn data_url(html: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(html.len() * 3 + 32);
    out.push_str("data:text/html;charset=utf-8,");
    for byte in html.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                out.push('%');
                out.push(char::from(HEX[(byte >> 4) as usize]));
                out.push(char::from(HEX[(byte & 0xf) as usize]));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_encodes_markup() {
        let url = data_url("<p class=\"x\">é & ü</p>");
        assert!(url.starts_with("data:text/html;charset=utf-8,"));
        assert!(url.contains("%3Cp%20class%3D%22x%22%3E"));
        assert!(url.contains("%C3%A9"));
        assert!(!url[29..].contains(' '));
        assert!(Url::parse(&url).is_ok());
    }
}
