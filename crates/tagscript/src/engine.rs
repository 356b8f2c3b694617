use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::mpsc,
};
use tracing::info;

use crate::{
    codec,
    error::{Error, Result},
    field::FieldList,
    uri::Endpoint,
};

/// Byte stream type produced by a [`Connector`].
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed connection stream.
pub type BoxedStream = Box<dyn ByteStream>;

/// Establishes transport connections on the I/O driver.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a byte stream to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream>;
}

/// Plain TCP connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream> {
        let stream = TcpStream::connect(endpoint.authority())
            .await
            .map_err(|e| Error::connect_failed(endpoint, e))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Receive callbacks for one connection.
///
/// Callbacks run on the I/O driver thread and must not block.
pub trait SessionHandler: Send + Sync {
    /// A complete message arrived.
    fn on_message(&self, fields: FieldList, raw: Bytes);

    /// The connection ended, by either side.
    fn on_disconnect(&self) {}
}

/// Outbound half of one protocol session.
///
/// Encodes messages with the session's BeginString, header fields and
/// outbound sequence number, then hands them to the connection task.
#[derive(Debug)]
pub struct EngineSession {
    protocol: String,
    header: FieldList,
    next_seq: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl EngineSession {
    /// Create a session writing to `outbound`.
    pub fn new(
        protocol: impl Into<String>,
        header: FieldList,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            header,
            next_seq: AtomicU64::new(1),
            outbound: Mutex::new(Some(outbound)),
        }
    }

    /// BeginString this session writes.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Header fields added to every outbound message.
    pub fn header(&self) -> &FieldList {
        &self.header
    }

    /// Encode and queue a message, returning the encoded bytes.
    pub fn send(&self, msg_type: &str, body: &FieldList) -> Result<Bytes> {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        let tx = outbound.as_ref().ok_or(Error::ConnectionClosed)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let bytes = codec::encode(&self.protocol, msg_type, seq, &self.header, body);
        tx.send(bytes.clone())
            .map_err(|_| Error::ConnectionClosed)?;
        info!(
            msg_type,
            seq,
            wire = %String::from_utf8_lossy(&bytes).replace('\x01', "|"),
            "sent"
        );
        Ok(bytes)
    }

    /// Stop accepting outbound messages.
    pub fn close(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// Whether outbound messages are still accepted.
    pub fn is_open(&self) -> bool {
        self.outbound
            .lock()
            .map(|tx| tx.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_fields;

    #[test]
    fn send_numbers_messages_and_queues_bytes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = EngineSession::new("X.Y", FieldList::from_pairs([(8, "X.Y"), (49, "CLIENT")]), tx);

        let first = session.send("A", &FieldList::from_pairs([(108, "30")])).unwrap();
        let second = session.send("0", &FieldList::new()).unwrap();

        let first_fields = parse_fields(&first).unwrap();
        assert_eq!(first_fields.get(8), Some("X.Y"));
        assert_eq!(first_fields.get(34), Some("1"));
        assert_eq!(first_fields.get(49), Some("CLIENT"));
        assert_eq!(first_fields.iter().filter(|f| f.tag() == 8).count(), 1);
        assert_eq!(parse_fields(&second).unwrap().get(34), Some("2"));

        assert_eq!(rx.try_recv().unwrap(), first);
        assert_eq!(rx.try_recv().unwrap(), second);
    }

    #[test]
    fn send_after_close_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = EngineSession::new("X.Y", FieldList::new(), tx);
        assert!(session.is_open());
        session.close();
        assert!(!session.is_open());
        assert_eq!(
            session.send("A", &FieldList::new()).unwrap_err(),
            Error::ConnectionClosed
        );
    }

    #[test]
    fn send_fails_once_connection_task_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = EngineSession::new("X.Y", FieldList::new(), tx);
        drop(rx);
        assert!(!session.is_open());
        assert!(session.send("A", &FieldList::new()).is_err());
    }
}
