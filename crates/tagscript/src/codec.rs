//! Tag/value wire codec.
//!
//! Frames look like `8=<version>␁9=<len>␁35=<type>␁…␁10=<ccc>␁` where `␁` is
//! SOH (0x01), `9` counts the bytes between the end of the `9` field and the
//! start of the `10` field, and `10` is the byte sum of everything before it
//! modulo 256, zero-padded to three digits.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, Result},
    field::{Field, FieldList, Tag, tags},
};

/// Field delimiter.
pub const SOH: u8 = 0x01;

/// Frames larger than this are rejected rather than buffered forever.
const MAX_FRAME_LEN: usize = 1 << 20;

/// Longest `8=..␁9=..␁` prefix buffered before the frame length is known.
const MAX_PREFIX_LEN: usize = 128;

/// Length of the `10=ccc␁` trailer.
const TRAILER_LEN: usize = 7;

/// Tags the encoder writes itself and skips in caller-supplied headers.
const MANAGED_TAGS: [Tag; 5] = [
    tags::BEGIN_STRING,
    tags::BODY_LENGTH,
    tags::CHECKSUM,
    tags::MSG_SEQ_NUM,
    tags::MSG_TYPE,
];

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Fields in wire order, framing fields included.
    pub fields: FieldList,
    /// The complete frame as received.
    pub raw: Bytes,
}

/// Encode one outbound message.
///
/// `header` fields come right after MsgType and MsgSeqNum; any of the tags the
/// encoder manages itself (8, 9, 10, 34, 35) are skipped there.
pub fn encode(
    protocol: &str,
    msg_type: &str,
    seq: u64,
    header: &FieldList,
    body: &FieldList,
) -> Bytes {
    let mut inner = BytesMut::new();
    put_field(&mut inner, tags::MSG_TYPE, msg_type);
    put_field(&mut inner, tags::MSG_SEQ_NUM, &seq.to_string());
    for field in header.iter().filter(|f| !MANAGED_TAGS.contains(&f.tag())) {
        put_field(&mut inner, field.tag(), field.value());
    }
    for field in body {
        put_field(&mut inner, field.tag(), field.value());
    }

    let mut out = BytesMut::with_capacity(inner.len() + 32);
    put_field(&mut out, tags::BEGIN_STRING, protocol);
    put_field(&mut out, tags::BODY_LENGTH, &inner.len().to_string());
    out.extend_from_slice(&inner);
    let sum = checksum(&out);
    put_field(&mut out, tags::CHECKSUM, &format!("{sum:03}"));
    out.freeze()
}

/// Split SOH-delimited `tag=value` bytes into fields.
pub fn parse_fields(bytes: &[u8]) -> Result<FieldList> {
    bytes
        .split(|b| *b == SOH)
        .filter(|chunk| !chunk.is_empty())
        .map(parse_field)
        .collect()
}

/// Byte sum modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn parse_field(chunk: &[u8]) -> Result<Field> {
    let text = std::str::from_utf8(chunk)
        .map_err(|_| Error::Codec("field is not valid UTF-8".to_string()))?;
    let (tag, value) = text
        .split_once('=')
        .ok_or_else(|| Error::Codec(format!("field without '=': {text}")))?;
    let tag: Tag = tag
        .parse()
        .map_err(|_| Error::Codec(format!("invalid tag: {tag}")))?;
    Ok(Field::new(tag, value))
}

fn put_field(buf: &mut BytesMut, tag: Tag, value: &str) {
    buf.extend_from_slice(tag.to_string().as_bytes());
    buf.put_u8(b'=');
    buf.extend_from_slice(value.as_bytes());
    buf.put_u8(SOH);
}

/// Frame codec for a tag/value byte stream.
///
/// Decoding yields complete, checksum-verified [`Frame`]s. Encoding writes
/// pre-encoded bytes verbatim, since the session encodes before queueing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagValueCodec;

impl TagValueCodec {
    /// Locate the end of the field starting at `from`, returning the index past its SOH.
    fn field_end(src: &[u8], from: usize) -> Option<usize> {
        src[from..].iter().position(|b| *b == SOH).map(|i| from + i + 1)
    }

    /// Keep waiting for the BeginString and BodyLength fields, within bounds.
    fn await_prefix(src: &BytesMut) -> Result<Option<Frame>> {
        if src.len() > MAX_PREFIX_LEN {
            return Err(Error::Codec(format!(
                "no BodyLength within the first {MAX_PREFIX_LEN} bytes"
            )));
        }
        Ok(None)
    }
}

impl Decoder for TagValueCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.is_empty() {
            return Ok(None);
        }
        if !src.starts_with(b"8=") && src.len() >= 2 {
            return Err(Error::Codec("frame does not start with BeginString".into()));
        }
        let Some(begin_end) = Self::field_end(src, 0) else {
            return Self::await_prefix(src);
        };
        let Some(length_end) = Self::field_end(src, begin_end) else {
            return Self::await_prefix(src);
        };
        let length_field = parse_field(&src[begin_end..length_end - 1])?;
        if length_field.tag() != tags::BODY_LENGTH {
            return Err(Error::Codec("BodyLength must be the second field".into()));
        }
        let body_len: usize = length_field
            .value()
            .parse()
            .map_err(|_| Error::Codec(format!("invalid BodyLength: {}", length_field.value())))?;
        if body_len > MAX_FRAME_LEN {
            return Err(Error::Codec(format!("BodyLength {body_len} too large")));
        }
        let frame_len = length_end + body_len + TRAILER_LEN;
        if frame_len > MAX_FRAME_LEN {
            return Err(Error::Codec(format!("frame of {frame_len} bytes too large")));
        }
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let trailer_start = length_end + body_len;
        let trailer = parse_field(&src[trailer_start..frame_len - 1])?;
        if trailer.tag() != tags::CHECKSUM || src[frame_len - 1] != SOH {
            return Err(Error::Codec("CheckSum must end the frame".into()));
        }
        let expected = checksum(&src[..trailer_start]);
        if trailer.value() != format!("{expected:03}") {
            return Err(Error::Codec(format!(
                "checksum mismatch: frame says {}, computed {expected:03}",
                trailer.value()
            )));
        }

        let raw = src.split_to(frame_len).freeze();
        let fields = parse_fields(&raw)?;
        Ok(Some(Frame { fields, raw }))
    }
}

impl Encoder<Bytes> for TagValueCodec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logon() -> Bytes {
        encode(
            "FIX.4.2",
            "A",
            1,
            &FieldList::from_pairs([(8, "ignored"), (49, "CLIENT"), (56, "SERVER")]),
            &FieldList::from_pairs([(98, "0"), (108, "30")]),
        )
    }

    #[test]
    fn encodes_length_and_checksum() {
        let bytes = logon();
        let text = String::from_utf8(bytes.to_vec()).unwrap().replace('\x01', "|");
        assert!(text.starts_with("8=FIX.4.2|9=42|35=A|34=1|49=CLIENT|56=SERVER|98=0|108=30|10="));
        assert!(!text.contains("ignored"));

        let body_start = "8=FIX.4.2|9=42|".len();
        let trailer_start = text.rfind("10=").unwrap();
        assert_eq!(trailer_start - body_start, 42);
        let sum = checksum(&bytes[..trailer_start]);
        assert_eq!(&text[trailer_start..], format!("10={sum:03}|"));
    }

    #[test]
    fn decodes_frames_split_across_reads() {
        let frame = logon();
        let mut codec = TagValueCodec;
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&frame[..10]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&frame[10..]);
        buf.extend_from_slice(&frame[..5]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.raw, frame);
        assert_eq!(decoded.fields.get(35), Some("A"));
        assert_eq!(decoded.fields.get(108), Some("30"));
        assert_eq!(buf.len(), 5);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut raw = logon().to_vec();
        let n = raw.len();
        raw[n - 2] = if raw[n - 2] == b'0' { b'1' } else { b'0' };
        let mut buf = BytesMut::from(&raw[..]);
        let err = TagValueCodec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), "codec");
    }

    #[test]
    fn rejects_garbage_prefix() {
        let mut buf = BytesMut::from(&b"xx=1\x01"[..]);
        assert!(TagValueCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn parse_fields_keeps_order() {
        let fields = parse_fields(b"35=D\x0155=IBM\x0155=MSFT\x01").unwrap();
        assert_eq!(fields.to_string(), "35=D|55=IBM|55=MSFT");
        assert!(parse_fields(b"35\x01").is_err());
        assert!(parse_fields(b"x=1\x01").is_err());
    }

    #[tokio::test]
    async fn framed_transport_round_trip() {
        use futures::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (a, b) = tokio::io::duplex(4096);
        let mut client = Framed::new(a, TagValueCodec);
        let mut server = Framed::new(b, TagValueCodec);

        let bytes = logon();
        client.send(bytes.clone()).await.unwrap();
        client.send(bytes.clone()).await.unwrap();

        for _ in 0..2 {
            let frame = server.next().await.unwrap().unwrap();
            assert_eq!(frame.raw, bytes);
            assert_eq!(frame.fields.get(56), Some("SERVER"));
        }
    }

    #[test]
    fn oversized_body_length_is_rejected() {
        let mut buf = BytesMut::from(&b"8=FIX.4.2\x019=18446744073709551615\x0135=A\x01"[..]);
        let err = TagValueCodec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), "codec");

        let mut buf = BytesMut::from(&b"8=FIX.4.2\x019=2000000\x0135=A\x01"[..]);
        assert!(TagValueCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn unterminated_prefix_is_bounded() {
        let mut codec = TagValueCodec;
        let mut buf = BytesMut::from(&b"8=FIX.4.2"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[b'x'; 200]);
        assert!(codec.decode(&mut buf).is_err());

        let mut buf = BytesMut::from(&b"8=FIX.4.2\x019="[..]);
        buf.extend_from_slice(&[b'9'; 200]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
