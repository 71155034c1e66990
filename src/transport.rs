//! Choosing how the UI reaches storage, once per session.
//!
//! Preference order: in-process bridge (no network round-trip, survives a
//! server that failed to bind) → local HTTP API → unavailable. The selector
//! owns the storage connection; the bridge only holds a weak reference.

use std::rc::Rc;

use tracing::{info, warn};
use url::Url;

use crate::bridge::{Bridge, BridgeEndpoint, HOST_OBJECT_NAME};
use crate::error::Result;
use crate::storage::Store;

/// The channel data operations flow through for this session.
#[derive(Debug, Clone)]
pub enum BridgeTransport {
    InProcess { bridge: Rc<Bridge> },
    Http { base_url: Url },
    Unavailable,
}

impl BridgeTransport {
    pub fn endpoint(&self) -> BridgeEndpoint {
        match self {
            Self::InProcess { .. } => BridgeEndpoint::InProcess,
            Self::Http { base_url } => BridgeEndpoint::Http(base_url.clone()),
            Self::Unavailable => BridgeEndpoint::Unavailable,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InProcess { .. } => "in-process",
            Self::Http { .. } => "http",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Something that can make a bridge reachable from page scripts.
pub trait HostObjectRegistrar {
    fn register_host_object(&self, name: &str, bridge: Rc<Bridge>) -> Result<()>;
}

pub struct TransportSelector {
    api_base_url: Option<Url>,
    connection: Option<Rc<Store>>,
    transport: Option<BridgeTransport>,
}

impl TransportSelector {
    pub fn new(api_base_url: Option<Url>) -> Self {
        Self {
            api_base_url,
            connection: None,
            transport: None,
        }
    }

    /// Picks the transport. Later calls return the first choice untouched and
    /// never bind a second bridge; a connection passed to them is dropped.
    pub fn select(
        &mut self,
        connection: Option<Store>,
        registrar: &dyn HostObjectRegistrar,
    ) -> &BridgeTransport {
        if self.transport.is_none() {
            let chosen = self.build(connection, registrar);
            info!(transport = chosen.name(), "Bridge transport selected");
            self.transport = Some(chosen);
        } else if connection.is_some() {
            warn!("Transport already selected, extra storage connection discarded");
        }
        self.transport.get_or_insert(BridgeTransport::Unavailable)
    }

    fn build(
        &mut self,
        connection: Option<Store>,
        registrar: &dyn HostObjectRegistrar,
    ) -> BridgeTransport {
        let Some(store) = connection else {
            info!("No storage connection, in-process bridge skipped");
            return self.fallback();
        };

        let store = Rc::new(store);
        let bridge = Rc::new(Bridge::new(&store));
        self.connection = Some(store);

        match registrar.register_host_object(HOST_OBJECT_NAME, bridge.clone()) {
            Ok(()) => BridgeTransport::InProcess { bridge },
            Err(e) => {
                warn!(error = %e, "In-process bridge registration failed, degrading");
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> BridgeTransport {
        match &self.api_base_url {
            Some(base_url) => BridgeTransport::Http {
                base_url: base_url.clone(),
            },
            None => {
                warn!("No API server either, UI runs without data access");
                BridgeTransport::Unavailable
            }
        }
    }

    pub fn transport(&self) -> Option<&BridgeTransport> {
        self.transport.as_ref()
    }

    pub fn owns_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Drops the bridge first, then the connection it points to.
    pub fn dispose(&mut self) {
        match self.transport.take() {
            Some(BridgeTransport::InProcess { bridge }) => {
                info!(transport = "in-process", calls = bridge.calls(), "Bridge transport released");
            }
            Some(transport) => info!(transport = transport.name(), "Bridge transport released"),
            None => {}
        }
        if let Some(store) = self.connection.take() {
            if Rc::strong_count(&store) > 1 {
                warn!("Storage connection still shared at dispose time");
            }
            drop(store);
            info!("Storage connection disposed");
        }
    }
}
