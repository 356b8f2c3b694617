//! Test utilities for `tagscript`.
//!
//! These helpers are public so that downstream crates (the scripting bridge,
//! user test suites) can stand up a counterparty without re-implementing the
//! wire format. They are intentionally small: a blocking TCP peer that
//! answers each inbound frame through a closure, and a connector that never
//! completes for exercising connect timeouts.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::{
    codec::{self, TagValueCodec},
    engine::{BoxedStream, Connector},
    error::Result,
    field::{FieldList, tags},
    uri::Endpoint,
};

/// How often the peer re-checks its stop flag while idle.
const PEER_POLL: Duration = Duration::from_millis(10);

/// A message the peer sends back.
#[derive(Debug, Clone)]
pub struct Reply {
    /// MsgType of the reply.
    pub msg_type: String,
    /// Body fields of the reply.
    pub body: FieldList,
}

impl Reply {
    /// Create a reply.
    pub fn new(msg_type: impl Into<String>, body: FieldList) -> Self {
        Self {
            msg_type: msg_type.into(),
            body,
        }
    }
}

type Responder = Box<dyn FnMut(&FieldList) -> Vec<Reply> + Send>;

/// A blocking TCP counterparty running on its own thread.
///
/// Every decoded inbound frame is recorded and passed to the responder; the
/// replies it returns are encoded with the inbound frame's BeginString and the
/// peer's own sequence numbers. Connections are served one at a time.
pub struct Peer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<FieldList>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Peer {
    /// Start a peer on an ephemeral localhost port.
    pub fn spawn<F>(respond: F) -> io::Result<Self>
    where
        F: FnMut(&FieldList) -> Vec<Reply> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let state = PeerState {
            respond: Box::new(respond),
            received: received.clone(),
            stop: stop.clone(),
            next_seq: 1,
        };
        let thread = thread::Builder::new()
            .name("tagscript-peer".to_string())
            .spawn(move || state.serve(listener))?;

        Ok(Self {
            addr,
            received,
            stop,
            thread: Some(thread),
        })
    }

    /// A peer that acknowledges every logon (`35=A`) with a logon and
    /// ignores everything else.
    pub fn logon_acceptor() -> io::Result<Self> {
        Self::spawn(|msg| {
            if msg.get(tags::MSG_TYPE) == Some("A") {
                let heartbeat = msg.get(108).unwrap_or("30").to_string();
                vec![Reply::new("A", FieldList::new().with(108, heartbeat))]
            } else {
                Vec::new()
            }
        })
    }

    /// A peer that records frames and never answers.
    pub fn silent() -> io::Result<Self> {
        Self::spawn(|_| Vec::new())
    }

    /// Address the peer is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Transport URI for this peer using `scheme`.
    pub fn uri(&self, scheme: &str) -> String {
        format!("{scheme}://{}:{}", self.addr.ip(), self.addr.port())
    }

    /// Frames received so far, in arrival order.
    pub fn received(&self) -> Vec<FieldList> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Wait up to `timeout` until at least `count` frames have arrived.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<FieldList> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let received = self.received();
            if received.len() >= count || std::time::Instant::now() >= deadline {
                return received;
            }
            thread::sleep(PEER_POLL);
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct PeerState {
    respond: Responder,
    received: Arc<Mutex<Vec<FieldList>>>,
    stop: Arc<AtomicBool>,
    next_seq: u64,
}

impl PeerState {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn serve(mut self, listener: TcpListener) {
        while !self.stopped() {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = self.serve_connection(stream) {
                        tracing::debug!("peer connection ended: {e}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(PEER_POLL),
                Err(e) => {
                    tracing::warn!("peer accept failed: {e}");
                    return;
                }
            }
        }
    }

    fn serve_connection(&mut self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(PEER_POLL))?;
        let mut codec = TagValueCodec;
        let mut buf = BytesMut::new();
        let mut chunk = [0u8; 4096];

        while !self.stopped() {
            match stream.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            }

            while let Some(frame) = codec
                .decode(&mut buf)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?
            {
                let protocol = frame
                    .fields
                    .get(tags::BEGIN_STRING)
                    .unwrap_or_default()
                    .to_string();
                let replies = (self.respond)(&frame.fields);
                self.received
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(frame.fields);
                for reply in replies {
                    let bytes = codec::encode(
                        &protocol,
                        &reply.msg_type,
                        self.next_seq,
                        &FieldList::new(),
                        &reply.body,
                    );
                    self.next_seq += 1;
                    stream.write_all(&bytes)?;
                }
            }
        }
        Ok(())
    }
}

/// A connector whose connect attempts never complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct StallingConnector;

#[async_trait]
impl Connector for StallingConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<BoxedStream> {
        std::future::pending().await
    }
}
