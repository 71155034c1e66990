//! Session startup sequence.
//!
//! Split in two because the rendering surface only exists once winit has
//! resumed:
//!
//! 1. [`prepare`] runs on the main thread before the event loop: storage
//!    acquisition (may block on the operator), API server, content resolution.
//! 2. [`PreparedSession::attach`] runs when the surface is ready: transport
//!    selection, then host initialization.
//!
//! Every failure along the way degrades instead of aborting; the worst case
//! is a diagnostic page with no data transport.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use url::Url;

use crate::config::KioskConfig;
use crate::content::{ContentResolver, ResolvedContentSource};
use crate::host::{BrowserHost, RenderingSurface, SurfaceCapabilities};
use crate::prompt::OperatorPrompt;
use crate::resilience::{ConnectionAttempt, RetryPolicy, acquire_connection};
use crate::server::LocalApiServer;
use crate::storage::{StorageOpener, Store};
use crate::transport::{BridgeTransport, TransportSelector};

/// Directory that relative content and storage paths resolve against: the
/// working directory, or the executable's directory when it is unknown.
pub fn base_dir(cwd: Option<PathBuf>, exe: Option<PathBuf>) -> PathBuf {
    cwd.or_else(|| exe.and_then(|exe| exe.parent().map(Path::to_path_buf)))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Everything decided before a window exists.
pub struct PreparedSession {
    pub connection: Option<Store>,
    pub attempts: Vec<ConnectionAttempt>,
    pub server: Option<LocalApiServer>,
    pub content: ResolvedContentSource,
    pub capabilities: SurfaceCapabilities,
}

pub fn prepare<O>(
    config: &KioskConfig,
    opener: &O,
    prompt: &dyn OperatorPrompt,
    base_dir: &Path,
) -> PreparedSession
where
    O: StorageOpener<Connection = Store>,
{
    let policy = RetryPolicy::from(&config.storage);
    let acquisition = acquire_connection(opener, &policy, prompt);
    if acquisition.connection.is_none() {
        warn!(
            failed = acquisition.failed_attempts(),
            cancelled = acquisition.cancelled(),
            "Continuing without storage"
        );
    }

    let server = start_server(config, opener, base_dir, acquisition.connection.is_some());
    let api_base_url = server.as_ref().map(|s| s.base_url().clone());

    let resolver = ContentResolver::new(config.content.clone());
    let content = resolver.resolve(base_dir, api_base_url.as_ref());
    info!(?content, "UI content resolved");

    PreparedSession {
        connection: acquisition.connection,
        attempts: acquisition.attempts,
        server,
        content,
        capabilities: SurfaceCapabilities::from(&config.surface),
    }
}

/// The server gets its own connection; it is only attempted once, since the
/// main acquisition already went through the retry loop.
fn start_server<O>(
    config: &KioskConfig,
    opener: &O,
    base_dir: &Path,
    storage_reachable: bool,
) -> Option<LocalApiServer>
where
    O: StorageOpener<Connection = Store>,
{
    if !config.server.enabled {
        info!("Local API server disabled");
        return None;
    }
    let store = if storage_reachable {
        opener
            .open()
            .inspect_err(|e| warn!(error = %e, "API server storage connection failed"))
            .ok()
    } else {
        None
    };
    let bundle_root: PathBuf = base_dir.join(&config.content.bundle_dir);
    match LocalApiServer::start(&config.server, bundle_root, store) {
        Ok(server) => Some(server),
        Err(e) => {
            warn!(error = %e, "Local API server unavailable");
            None
        }
    }
}

impl PreparedSession {
    pub fn api_base_url(&self) -> Option<&Url> {
        self.server.as_ref().map(|s| s.base_url())
    }

    /// Releases what was prepared when no surface will ever be attached.
    pub fn discard(mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
        if self.connection.take().is_some() {
            info!("Storage connection released without a surface");
        }
    }

    /// Selects the transport against `surface` and initializes the host.
    pub fn attach<S: RenderingSurface>(self, surface: S) -> Session<S> {
        let mut selector = TransportSelector::new(self.api_base_url().cloned());
        let host = BrowserHost::new(surface, self.capabilities);
        let transport = selector.select(self.connection, host.surface()).clone();

        let mut session = Session {
            host,
            selector,
            server: self.server,
            content: self.content,
            attempts: self.attempts,
        };
        session.host.initialize(&session.content, &transport);
        session
    }
}

/// A running session. Owns everything that must be released on exit.
pub struct Session<S: RenderingSurface> {
    pub host: BrowserHost<S>,
    pub selector: TransportSelector,
    pub server: Option<LocalApiServer>,
    pub content: ResolvedContentSource,
    pub attempts: Vec<ConnectionAttempt>,
}

impl<S: RenderingSurface> Session<S> {
    pub fn transport(&self) -> Option<&BridgeTransport> {
        self.selector.transport()
    }

    /// Surface, then bridge and connection, then the server.
    pub fn shutdown(&mut self) {
        self.host.shutdown(&mut self.selector);
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
    }
}
