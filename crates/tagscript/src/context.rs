use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    driver::{DRIVER_TICK, IoDriver},
    engine::{Connector, SessionHandler, TcpConnector},
    error::Result,
    field::FieldList,
    ident::IdGenerator,
    inbox::Inbox,
    session::{InboxFeeder, SessionAdapter},
    uri::Endpoint,
};

/// Process-level harness settings.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Tick of the I/O driver's housekeeping loop.
    pub driver_tick: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            driver_tick: DRIVER_TICK,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Process-scoped harness context.
///
/// Owns the I/O driver and the identifier generator. Construct one at
/// startup, share it with whatever runs scripts, and call
/// [`shutdown`](Self::shutdown) when done (dropping it does the same).
pub struct Harness {
    driver: IoDriver,
    ids: IdGenerator,
    config: HarnessConfig,
}

impl Harness {
    /// Start a harness that connects over TCP.
    pub fn start(config: HarnessConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Start a harness using a custom connector.
    pub fn with_connector(config: HarnessConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let driver = IoDriver::start(&config, connector)?;
        Ok(Self {
            driver,
            ids: IdGenerator::new(),
            config,
        })
    }

    /// The configuration this harness was started with.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Open a session to `uri` (`scheme://host:port`).
    ///
    /// `header` fields are written after MsgType and MsgSeqNum on every
    /// outbound message; `protocol` is written as BeginString.
    pub fn open(&self, uri: &str, protocol: &str, header: FieldList) -> Result<SessionAdapter> {
        let endpoint = Endpoint::parse(uri)?;
        self.open_endpoint(&endpoint, protocol, header)
    }

    /// Open a session to an already-parsed endpoint.
    pub fn open_endpoint(
        &self,
        endpoint: &Endpoint,
        protocol: &str,
        header: FieldList,
    ) -> Result<SessionAdapter> {
        info!(%endpoint, protocol, %header, "opening session");
        let inbox = Arc::new(Inbox::new());
        let feeder = inbox.clone();
        let connection = self.driver.open(endpoint, protocol, header, move |id| {
            Arc::new(InboxFeeder::new(id, feeder)) as Arc<dyn SessionHandler>
        })?;
        Ok(SessionAdapter::new(connection, inbox))
    }

    /// Mint a process-unique identifier.
    pub fn new_id(&self) -> String {
        self.ids.next_id()
    }

    /// The I/O driver.
    pub fn driver(&self) -> &IoDriver {
        &self.driver
    }

    /// Stop all connections and join the I/O driver thread.
    pub fn shutdown(&self) {
        self.driver.shutdown();
    }
}
