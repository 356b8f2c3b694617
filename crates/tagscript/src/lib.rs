//! # tagscript
//!
//! Core of a scripting harness for session-oriented tag/value protocols
//! (FIX-style `tag=value` messages over a persistent connection).
//!
//! ## Overview
//!
//! A background I/O driver thread owns every network connection and delivers
//! inbound messages asynchronously. Each connection is wrapped by a
//! [`SessionAdapter`] whose [`Inbox`] buffers those messages until the script
//! thread drains them through bounded, blocking calls built on [`PollWait`].
//! Received messages are validated with the subset-match [`expect`] engine.
//!
//! ```ignore
//! use tagscript::{FieldList, Harness, HarnessConfig, PollWait};
//!
//! let harness = Harness::start(HarnessConfig::default())?;
//! let header = FieldList::from_pairs([(8, "FIX.4.2"), (49, "CLIENT")]);
//! let session = harness.open("tcp://localhost:5001", "FIX.4.2", header)?;
//! session.send("A", &FieldList::from_pairs([(108, "30")]))?;
//! let logon = session.expect(&FieldList::from_pairs([(35, "A")]), &PollWait::RECEIVE)?;
//! harness.shutdown();
//! ```

/// Tag/value wire codec.
pub mod codec;
/// Harness context owning the driver and identifier generator.
mod context;
/// Background I/O driver thread.
mod driver;
/// External engine seams: connectors and receive callbacks.
mod engine;
/// Error types and Result alias.
mod error;
/// Subset-match expectation engine.
mod expect;
/// Field model.
mod field;
/// Process-unique identifiers.
mod ident;
/// Thread-safe FIFO of received messages.
mod inbox;
/// Bounded retry-with-pause primitive.
mod poll;
/// Session adapter.
mod session;
/// Transport endpoint parsing.
mod uri;

pub mod testutils;

pub use context::{Harness, HarnessConfig};
pub use driver::{DRIVER_TICK, IoDriver};
pub use engine::{BoxedStream, Connector, EngineSession, SessionHandler, TcpConnector};
pub use error::{Error, Result};
pub use expect::expect;
pub use field::{Field, FieldList, FieldMap, Message, Tag, tags};
pub use ident::IdGenerator;
pub use inbox::Inbox;
pub use poll::{POLL_INTERVAL, PollWait, RECEIVE_ATTEMPTS};
pub use session::{SessionAdapter, SessionId};
pub use uri::Endpoint;
