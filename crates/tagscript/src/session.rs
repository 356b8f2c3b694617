use std::{fmt, sync::Arc};

use bytes::Bytes;
use tracing::{info, warn};

use crate::{
    driver::Connection,
    engine::{EngineSession, SessionHandler},
    error::{Error, Result},
    expect::expect,
    field::{FieldList, Message},
    inbox::Inbox,
    poll::PollWait,
};

/// Identifier the I/O driver assigns to each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Receive entry point: the only producer into a session's inbox.
pub(crate) struct InboxFeeder {
    id: SessionId,
    inbox: Arc<Inbox>,
}

impl InboxFeeder {
    pub(crate) fn new(id: SessionId, inbox: Arc<Inbox>) -> Self {
        Self { id, inbox }
    }
}

impl SessionHandler for InboxFeeder {
    fn on_message(&self, fields: FieldList, raw: Bytes) {
        info!(session = %self.id, %fields, "received");
        self.inbox.push(Message::with_raw(fields, raw));
    }

    fn on_disconnect(&self) {
        warn!(session = %self.id, queued = self.inbox.len(), "disconnected");
    }
}

/// One live protocol session, as seen from the script thread.
///
/// Inbound messages are delivered by the I/O driver into this adapter's
/// [`Inbox`]; the script thread drains them with [`try_drain`](Self::try_drain),
/// [`receive`](Self::receive) or [`expect`](Self::expect). Closing the adapter,
/// explicitly or by dropping it, lets the connection flush and finish.
pub struct SessionAdapter {
    id: SessionId,
    session: EngineSession,
    inbox: Arc<Inbox>,
}

impl SessionAdapter {
    pub(crate) fn new(connection: Connection, inbox: Arc<Inbox>) -> Self {
        Self {
            id: connection.id,
            session: connection.session,
            inbox,
        }
    }

    /// The driver-assigned session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// BeginString used for outbound messages.
    pub fn protocol(&self) -> &str {
        self.session.protocol()
    }

    /// Encode and send a message, returning the bytes handed to the transport.
    pub fn send(&self, msg_type: &str, body: &FieldList) -> Result<Bytes> {
        self.session.send(msg_type, body)
    }

    /// Take the next received message without waiting.
    pub fn try_drain(&self) -> Option<Message> {
        self.inbox.try_pop()
    }

    /// Wait for the next received message, bounded by `wait`.
    pub fn receive(&self, wait: &PollWait) -> Option<Message> {
        self.inbox.pop_wait(wait)
    }

    /// Wait for the next message and check it against `expected`.
    ///
    /// Returns the whole message on success. Fails with
    /// [`Error::ReceiveTimeout`] when nothing arrives in time, or with the
    /// expectation error for the first field that does not match.
    pub fn expect(&self, expected: &FieldList, wait: &PollWait) -> Result<Message> {
        let message = self.receive(wait).ok_or_else(|| Error::ReceiveTimeout {
            waited_ms: wait.max_wait().as_millis() as u64,
        })?;
        expect(expected, &message)?;
        Ok(message)
    }

    /// Number of messages waiting in the inbox.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Whether the session still accepts outbound messages.
    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    /// Stop sending. Queued outbound messages are flushed before the
    /// connection closes. Idempotent.
    pub fn close(&self) {
        if self.session.is_open() {
            info!(session = %self.id, "closing");
        }
        self.session.close();
    }
}

impl fmt::Debug for SessionAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAdapter")
            .field("id", &self.id)
            .field("protocol", &self.session.protocol())
            .field("pending", &self.inbox.len())
            .finish()
    }
}

impl Drop for SessionAdapter {
    fn drop(&mut self) {
        self.session.close();
    }
}
