//! Background I/O driver.
//!
//! One dedicated thread runs a current-thread Tokio runtime for the lifetime
//! of the harness. Every connection task lives on that runtime, so every
//! [`SessionHandler`] callback is invoked from this single thread.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
        mpsc as std_mpsc,
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::{
    runtime::{Builder, Handle},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, error, info, warn};

use crate::{
    codec::TagValueCodec,
    context::HarnessConfig,
    engine::{Connector, EngineSession, SessionHandler},
    error::{Error, Result},
    field::FieldList,
    session::SessionId,
    uri::Endpoint,
};

/// Interval at which the driver reaps finished connections and logs liveness.
pub const DRIVER_TICK: Duration = Duration::from_secs(1);

/// Book-keeping for one live connection.
struct ConnectionEntry {
    /// Where the connection points.
    endpoint: Endpoint,
    /// Cancels the connection task.
    cancel: CancellationToken,
    /// The connection task itself.
    task: JoinHandle<()>,
}

/// A connected session as handed to the session adapter.
pub(crate) struct Connection {
    /// Driver-assigned identifier.
    pub id: SessionId,
    /// Outbound half of the session.
    pub session: EngineSession,
}

/// Everything a connection task needs, moved onto the driver thread.
struct ConnectionTask {
    id: SessionId,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    handler: Arc<dyn SessionHandler>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
    ready: oneshot::Sender<Result<()>>,
}

/// Handle to the background I/O thread.
pub struct IoDriver {
    /// Runtime handle used to schedule work onto the driver thread.
    runtime: Handle,
    /// Transport used for new connections.
    connector: Arc<dyn Connector>,
    /// Live connections keyed by session ID.
    connections: Arc<DashMap<SessionId, ConnectionEntry>>,
    /// Next session ID counter.
    next_id: AtomicU64,
    /// Parent of every connection's cancellation token.
    shutdown: CancellationToken,
    /// Upper bound on a single connect attempt.
    connect_timeout: Duration,
    /// The driver thread, until joined.
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl IoDriver {
    /// Spawn the driver thread and wait until its runtime is up.
    pub fn start(config: &HarnessConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let connections: Arc<DashMap<SessionId, ConnectionEntry>> = Arc::new(DashMap::new());
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let tick = config.driver_tick;
        let shutdown_loop = shutdown.clone();
        let connections_loop = connections.clone();
        let thread = thread::Builder::new()
            .name("tagscript-io".to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::from(e)));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(drive(tick, shutdown_loop, connections_loop));
            })?;

        let runtime = ready_rx.recv().map_err(|_| Error::DriverStopped)??;
        info!("I/O driver started");

        Ok(Self {
            runtime,
            connector,
            connections,
            next_id: AtomicU64::new(1),
            shutdown,
            connect_timeout: config.connect_timeout,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Connect to `endpoint` and start servicing the connection.
    ///
    /// Blocks the caller until the connect attempt has succeeded or failed.
    /// Must not be called from inside an async context.
    pub(crate) fn open(
        &self,
        endpoint: &Endpoint,
        protocol: &str,
        header: FieldList,
        make_handler: impl FnOnce(SessionId) -> Arc<dyn SessionHandler>,
    ) -> Result<Connection> {
        if self.shutdown.is_cancelled() {
            return Err(Error::DriverStopped);
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = self.shutdown.child_token();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        info!(session = %id, %endpoint, "connecting");
        let task = self.runtime.spawn(run_connection(ConnectionTask {
            id,
            endpoint: endpoint.clone(),
            connector: self.connector.clone(),
            connect_timeout: self.connect_timeout,
            handler: make_handler(id),
            outbound: outbound_rx,
            cancel: cancel.clone(),
            ready: ready_tx,
        }));
        self.connections.insert(
            id,
            ConnectionEntry {
                endpoint: endpoint.clone(),
                cancel,
                task,
            },
        );

        match ready_rx.blocking_recv() {
            Ok(Ok(())) => Ok(Connection {
                id,
                session: EngineSession::new(protocol, header, outbound_tx),
            }),
            Ok(Err(e)) => {
                self.connections.remove(&id);
                Err(e)
            }
            Err(_) => {
                self.connections.remove(&id);
                Err(Error::DriverStopped)
            }
        }
    }

    /// Number of connections the driver is still tracking.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Whether the driver thread is still accepting work.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop every connection and join the driver thread. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            warn!("I/O driver shutdown requested from its own thread; not joining");
            return;
        }
        if handle.join().is_err() {
            error!("I/O driver thread panicked");
        }
        info!("I/O driver stopped");
    }
}

impl Drop for IoDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Driver main loop: tick until shutdown, then drain every connection.
async fn drive(
    tick: Duration,
    shutdown: CancellationToken,
    connections: Arc<DashMap<SessionId, ConnectionEntry>>,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                connections.retain(|id, entry| {
                    if entry.task.is_finished() {
                        debug!(session = %id, endpoint = %entry.endpoint, "reaped finished connection");
                        false
                    } else {
                        true
                    }
                });
                debug!(open = connections.len(), "driver tick");
            }
        }
    }

    let ids: Vec<SessionId> = connections.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, entry)) = connections.remove(&id) {
            entry.cancel.cancel();
            if let Err(e) = entry.task.await {
                error!(session = %id, "connection task failed: {e}");
            }
        }
    }
}

/// Connect, then pump frames in both directions until closed or cancelled.
async fn run_connection(task: ConnectionTask) {
    let ConnectionTask {
        id,
        endpoint,
        connector,
        connect_timeout,
        handler,
        mut outbound,
        cancel,
        ready,
    } = task;

    let stream = tokio::select! {
        biased;

        () = cancel.cancelled() => {
            let _ = ready.send(Err(Error::DriverStopped));
            return;
        }

        result = timeout(connect_timeout, connector.connect(&endpoint)) => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(session = %id, %endpoint, "connect failed: {e}");
                let _ = ready.send(Err(e));
                return;
            }
            Err(_elapsed) => {
                warn!(session = %id, %endpoint, "connect timed out");
                let _ = ready.send(Err(Error::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                    timeout_ms: connect_timeout.as_millis() as u64,
                }));
                return;
            }
        },
    };

    info!(session = %id, %endpoint, "connected");
    if ready.send(Ok(())).is_err() {
        debug!(session = %id, "opener went away before connect completed");
        return;
    }

    let (mut sink, mut frames) = Framed::new(stream, TagValueCodec).split();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session = %id, "connection cancelled");
                break;
            }

            frame = frames.next() => match frame {
                Some(Ok(frame)) => handler.on_message(frame.fields, frame.raw),
                Some(Err(e)) => {
                    error!(session = %id, "error reading frame: {e}");
                    break;
                }
                None => {
                    info!(session = %id, "peer closed connection");
                    break;
                }
            },

            bytes = outbound.recv() => match bytes {
                Some(bytes) => {
                    if let Err(e) = sink.send(bytes).await {
                        error!(session = %id, "error writing frame: {e}");
                        break;
                    }
                }
                None => {
                    debug!(session = %id, "session closed locally");
                    break;
                }
            },
        }
    }

    if let Err(e) = sink.close().await {
        debug!(session = %id, "error closing transport: {e}");
    }
    handler.on_disconnect();
    info!(session = %id, "connection finished");
}
