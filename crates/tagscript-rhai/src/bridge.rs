//! Harness functions exposed to Rhai scripts.
//!
//! | function                          | returns            |
//! |-----------------------------------|--------------------|
//! | `open(uri, protocol [, header])`  | `Session`          |
//! | `s.send(msg_type [, body])`       | `Message` (echo)   |
//! | `s.recv([attempts])`              | `Message` or `()`  |
//! | `s.try_recv()`                    | `Message` or `()`  |
//! | `s.expect(fields)`                | `Message`          |
//! | `s.pending()`, `s.close()`        |                    |
//! | `new_id()`, `sleep(secs)`         |                    |
//! | `fatal(message)`, `print_fields(fields)` |             |
//!
//! Every failure a harness function reports is a [`Fault`]: it terminates
//! the script regardless of `try`/`catch`.

use std::{sync::Arc, thread, time::Duration};

use rhai::{
    Array, Dynamic, Engine, EvalAltResult, FLOAT, INT, ImmutableString, Map, NativeCallContext,
    Position,
};
use tagscript::{FieldList, Harness, Message, PollWait, SessionAdapter, Tag, codec};
use tracing::{debug, info};

use crate::{
    error::{Fault, FaultKind},
    executor::ScriptApi,
    marshal::{self, ScriptMessage},
};

/// Result of a fallible native function.
pub(crate) type RhaiResultOf<T> = Result<T, Box<EvalAltResult>>;

/// A live session handle as seen by scripts.
///
/// Clones share the session; it closes when the last clone is dropped or on
/// an explicit `close()`.
#[derive(Debug, Clone)]
pub struct ScriptSession(Arc<SessionAdapter>);

impl ScriptSession {
    /// The underlying adapter.
    pub fn adapter(&self) -> &SessionAdapter {
        &self.0
    }
}

/// [`ScriptApi`] that drives protocol sessions through a [`Harness`].
pub struct HarnessApi {
    harness: Arc<Harness>,
}

impl HarnessApi {
    /// Expose `harness` to scripts.
    pub fn new(harness: Arc<Harness>) -> Self {
        Self { harness }
    }

    /// The harness sessions are opened on.
    pub fn harness(&self) -> &Harness {
        &self.harness
    }
}

impl ScriptApi for HarnessApi {
    fn register(&self, engine: &mut Engine) {
        register_session(engine, self.harness.clone());
        register_message(engine);
        register_utilities(engine, self.harness.clone());
    }

    fn on_print(&self, text: &str) {
        info!(target: "script", "{text}");
    }

    fn on_debug(&self, text: &str, source: Option<&str>, pos: Position) {
        debug!(target: "script", source = source.unwrap_or("<inline>"), line = ?pos.line(), "{text}");
    }
}

/// Turn a fault into an uncatchable engine error at the call site.
///
/// Native calls do not see the script's source name; the executor fills in
/// the file when the fault surfaces.
fn raise(ctx: &NativeCallContext, fault: Fault) -> Box<EvalAltResult> {
    let pos = ctx.call_position();
    fault.at(None, pos.line()).into_eval_error(pos)
}

fn harness_fault(ctx: &NativeCallContext, err: &tagscript::Error) -> Box<EvalAltResult> {
    raise(ctx, Fault::from(err))
}

fn fields_arg(ctx: &NativeCallContext, value: &Dynamic) -> RhaiResultOf<FieldList> {
    marshal::fields_from_dynamic(value)
        .map_err(|e| raise(ctx, Fault::new(FaultKind::InvalidFields, e.to_string())))
}

fn message_or_unit(message: Option<Message>) -> Dynamic {
    message.map_or(Dynamic::UNIT, |m| Dynamic::from(ScriptMessage(m)))
}

fn open_session(
    ctx: &NativeCallContext,
    harness: &Harness,
    uri: &str,
    protocol: &str,
    header: FieldList,
) -> RhaiResultOf<ScriptSession> {
    harness
        .open(uri, protocol, header)
        .map(|adapter| ScriptSession(Arc::new(adapter)))
        .map_err(|e| harness_fault(ctx, &e))
}

fn send(
    ctx: &NativeCallContext,
    session: &ScriptSession,
    msg_type: &str,
    body: &FieldList,
) -> RhaiResultOf<ScriptMessage> {
    let raw = session
        .0
        .send(msg_type, body)
        .map_err(|e| harness_fault(ctx, &e))?;
    let fields = codec::parse_fields(&raw).map_err(|e| harness_fault(ctx, &e))?;
    Ok(ScriptMessage(Message::with_raw(fields, raw)))
}

fn register_session(engine: &mut Engine, harness: Arc<Harness>) {
    engine.register_type_with_name::<ScriptSession>("Session");

    let with_header = harness.clone();
    engine.register_fn(
        "open",
        move |ctx: NativeCallContext,
              uri: &str,
              protocol: &str,
              header: Dynamic|
              -> RhaiResultOf<ScriptSession> {
            let header = fields_arg(&ctx, &header)?;
            open_session(&ctx, &with_header, uri, protocol, header)
        },
    );
    engine.register_fn(
        "open",
        move |ctx: NativeCallContext, uri: &str, protocol: &str| -> RhaiResultOf<ScriptSession> {
            open_session(&ctx, &harness, uri, protocol, FieldList::new())
        },
    );

    engine.register_fn("close", |s: &mut ScriptSession| s.0.close());
    engine.register_fn("is_open", |s: &mut ScriptSession| s.0.is_open());
    engine.register_fn("pending", |s: &mut ScriptSession| s.0.pending() as INT);
    engine.register_get("id", |s: &mut ScriptSession| s.0.id().to_string());
    engine.register_get("protocol", |s: &mut ScriptSession| s.0.protocol().to_string());
    engine.register_fn("to_string", |s: &mut ScriptSession| s.0.id().to_string());
    engine.register_fn("to_debug", |s: &mut ScriptSession| format!("{:?}", s.0));

    engine.register_fn(
        "send",
        |ctx: NativeCallContext,
         s: &mut ScriptSession,
         msg_type: &str,
         body: Dynamic|
         -> RhaiResultOf<ScriptMessage> {
            let body = fields_arg(&ctx, &body)?;
            send(&ctx, s, msg_type, &body)
        },
    );
    engine.register_fn(
        "send",
        |ctx: NativeCallContext, s: &mut ScriptSession, msg_type: &str| -> RhaiResultOf<ScriptMessage> {
            send(&ctx, s, msg_type, &FieldList::new())
        },
    );

    engine.register_fn("recv", |s: &mut ScriptSession| {
        message_or_unit(s.0.receive(&PollWait::RECEIVE))
    });
    engine.register_fn(
        "recv",
        |ctx: NativeCallContext, s: &mut ScriptSession, attempts: INT| -> RhaiResultOf<Dynamic> {
            let attempts = u32::try_from(attempts).map_err(|_| {
                raise(
                    &ctx,
                    Fault::new(
                        FaultKind::InvalidArgument,
                        format!("recv attempts must be a non-negative count, got {attempts}"),
                    ),
                )
            })?;
            Ok(message_or_unit(s.0.receive(&PollWait::attempts(attempts))))
        },
    );
    engine.register_fn("try_recv", |s: &mut ScriptSession| {
        message_or_unit(s.0.try_drain())
    });
    engine.register_fn(
        "expect",
        |ctx: NativeCallContext, s: &mut ScriptSession, fields: Dynamic| -> RhaiResultOf<ScriptMessage> {
            let expected = fields_arg(&ctx, &fields)?;
            s.0.expect(&expected, &PollWait::RECEIVE)
                .map(ScriptMessage)
                .map_err(|e| harness_fault(&ctx, &e))
        },
    );
}

fn tag_index(tag: INT) -> Option<Tag> {
    Tag::try_from(tag).ok()
}

fn tag_name(tag: &str) -> Option<Tag> {
    tag.trim().parse().ok()
}

pub(crate) fn register_message(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptMessage>("Message");

    engine.register_indexer_get(|m: &mut ScriptMessage, tag: INT| {
        tag_index(tag).map_or(Dynamic::UNIT, |t| m.get(t))
    });
    engine.register_indexer_get(|m: &mut ScriptMessage, tag: ImmutableString| {
        tag_name(&tag).map_or(Dynamic::UNIT, |t| m.get(t))
    });
    engine.register_fn("get", |m: &mut ScriptMessage, tag: INT| {
        tag_index(tag).map_or(Dynamic::UNIT, |t| m.get(t))
    });
    engine.register_fn("get", |m: &mut ScriptMessage, tag: &str| {
        tag_name(tag).map_or(Dynamic::UNIT, |t| m.get(t))
    });
    engine.register_fn("has", |m: &mut ScriptMessage, tag: INT| {
        tag_index(tag).is_some_and(|t| m.0.fields.get(t).is_some())
    });
    engine.register_fn("has", |m: &mut ScriptMessage, tag: &str| {
        tag_name(tag).is_some_and(|t| m.0.fields.get(t).is_some())
    });

    engine.register_get("msg_type", |m: &mut ScriptMessage| {
        m.0.msg_type()
            .map_or(Dynamic::UNIT, |t| Dynamic::from(t.to_string()))
    });
    engine.register_get("raw", |m: &mut ScriptMessage| {
        m.0.raw_display().map_or(Dynamic::UNIT, Dynamic::from)
    });

    engine.register_fn("fields", |m: &mut ScriptMessage| -> Array { m.to_array() });
    engine.register_fn("to_map", |m: &mut ScriptMessage| -> Map { m.to_map() });
    engine.register_fn("len", |m: &mut ScriptMessage| m.0.fields.len() as INT);
    engine.register_fn("to_string", |m: &mut ScriptMessage| m.0.fields.to_string());
    engine.register_fn("to_debug", |m: &mut ScriptMessage| {
        format!("Message({})", m.0.fields)
    });
}

fn register_utilities(engine: &mut Engine, harness: Arc<Harness>) {
    engine.register_fn("new_id", move || harness.new_id());

    engine.register_fn("sleep", |secs: INT| {
        thread::sleep(Duration::from_secs(secs.max(0) as u64));
    });
    engine.register_fn(
        "sleep",
        |ctx: NativeCallContext, secs: FLOAT| -> RhaiResultOf<()> {
            if secs <= 0.0 {
                return Ok(());
            }
            let duration = Duration::try_from_secs_f64(secs).map_err(|_| {
                raise(
                    &ctx,
                    Fault::new(FaultKind::InvalidArgument, format!("cannot sleep for {secs}s")),
                )
            })?;
            thread::sleep(duration);
            Ok(())
        },
    );

    engine.register_fn(
        "fatal",
        |ctx: NativeCallContext, message: &str| -> RhaiResultOf<()> {
            Err(raise(&ctx, Fault::new(FaultKind::ScriptAbort, message)))
        },
    );

    engine.register_fn(
        "print_fields",
        |ctx: NativeCallContext, fields: Dynamic| -> RhaiResultOf<()> {
            for field in &fields_arg(&ctx, &fields)? {
                info!(target: "script", "{} = {}", field.tag(), field.value());
            }
            Ok(())
        },
    );
}
