//! Binary wire codec.
//!
//! Every message is a [`Value`] tree written with `bincode` (varint integers, little
//! endian). The encoding is self-delimiting, so a stream reader finds message
//! boundaries by attempting a decode: running out of input means "wait for more bytes".
//!
//! Timestamps have no native wire type. They travel as the tagged map
//! `{"__datetime__": true, "data": "<ISO-8601>Z"}` and are turned back into
//! `Value::Time` on decode.

use crate::error::CodecError;
use bincode::Options;
use fxnode::model::time::{datetime_str, parse_datetime};
use fxnode::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, ErrorKind};

/// Largest message either side will encode or accept.
pub const MAX_MESSAGE_SIZE: u64 = 16 * 1024 * 1024;

const DATETIME_TAG: &str = "__datetime__";
const TAG_DATA: &str = "data";

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_MESSAGE_SIZE)
}

#[derive(Debug, Serialize, Deserialize)]
enum WireValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    Map(Vec<(String, WireValue)>),
}

impl From<&Value> for WireValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Nil => WireValue::Nil,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Int(i) => WireValue::Int(*i),
            Value::Float(f) => WireValue::Float(*f),
            Value::Str(s) => WireValue::Str(s.clone()),
            Value::Bytes(bytes) => WireValue::Bytes(bytes.clone()),
            Value::List(items) => WireValue::List(items.iter().map(WireValue::from).collect()),
            Value::Map(map) => WireValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), WireValue::from(v)))
                    .collect(),
            ),
            Value::Time(dt) => WireValue::Map(vec![
                (DATETIME_TAG.to_string(), WireValue::Bool(true)),
                (TAG_DATA.to_string(), WireValue::Str(datetime_str(dt))),
            ]),
        }
    }
}

impl TryFrom<WireValue> for Value {
    type Error = CodecError;

    fn try_from(wire: WireValue) -> Result<Self, Self::Error> {
        Ok(match wire {
            WireValue::Nil => Value::Nil,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(i) => Value::Int(i),
            WireValue::Float(f) => Value::Float(f),
            WireValue::Str(s) => Value::Str(s),
            WireValue::Bytes(bytes) => Value::Bytes(bytes),
            WireValue::List(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            WireValue::Map(entries) => match tag_of(&entries) {
                Some(tag) => decode_tagged(tag, entries)?,
                None => Value::Map(
                    entries
                        .into_iter()
                        .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                        .collect::<Result<ValueMap, CodecError>>()?,
                ),
            },
        })
    }
}

/// Returns the tag name when `entries` has the tagged shape
/// `{"__<tag>__": true, "data": ..}`.
fn tag_of(entries: &[(String, WireValue)]) -> Option<String> {
    if entries.len() != 2 || !entries.iter().any(|(k, _)| k == TAG_DATA) {
        return None;
    }
    entries.iter().find_map(|(k, v)| match v {
        WireValue::Bool(true) if k.len() > 4 && k.starts_with("__") && k.ends_with("__") => {
            Some(k.clone())
        }
        _ => None,
    })
}

fn decode_tagged(tag: String, entries: Vec<(String, WireValue)>) -> Result<Value, CodecError> {
    if tag != DATETIME_TAG {
        return Err(CodecError::UnknownTag(tag));
    }
    let data = entries
        .into_iter()
        .find_map(|(k, v)| (k == TAG_DATA).then_some(v));
    match data {
        Some(WireValue::Str(text)) => parse_datetime(&text)
            .map(Value::Time)
            .map_err(|_| CodecError::InvalidDatetime(text)),
        other => Err(CodecError::InvalidDatetime(format!("{:?}", other))),
    }
}

/// Encodes a value into one self-delimiting message.
pub fn pack(value: &Value) -> Result<Vec<u8>, CodecError> {
    Ok(options().serialize(&WireValue::from(value))?)
}

/// Decodes exactly one message. Trailing bytes are an error.
pub fn unpack(bytes: &[u8]) -> Result<Value, CodecError> {
    let wire: WireValue = options().deserialize(bytes)?;
    Value::try_from(wire)
}

/// Incremental decoder for stream transports.
///
/// Bytes are appended with [`feed`](Unpacker::feed); each call to
/// [`next_value`](Unpacker::next_value) yields at most one complete message and never
/// waits for input. After an error the buffered bytes are discarded, since the
/// stream position can no longer be trusted.
///
/// Message boundaries are found by a resumable scan, so a message that arrives over
/// many reads is walked once and deserialized once.
#[derive(Debug, Default)]
pub struct Unpacker {
    buffer: Vec<u8>,
    scan: FrameScan,
}

impl Unpacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes received but not yet consumed by a decoded message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_value(&mut self) -> Result<Option<Value>, CodecError> {
        if self.buffer.is_empty() || !self.scan.advance(&self.buffer) {
            return Ok(None);
        }
        let mut cursor = Cursor::new(self.buffer.as_slice());
        match options().deserialize_from::<_, WireValue>(&mut cursor) {
            Ok(wire) => {
                let consumed = cursor.position() as usize;
                self.buffer.drain(..consumed);
                self.scan = FrameScan::default();
                Value::try_from(wire).map(Some)
            }
            Err(err) => match *err {
                bincode::ErrorKind::Io(ref io) if io.kind() == ErrorKind::UnexpectedEof => Ok(None),
                _ => {
                    self.buffer.clear();
                    self.scan = FrameScan::default();
                    Err(CodecError::Malformed(err))
                }
            },
        }
    }
}

/// Items still owed by an open list or map.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Values(u64),
    Entries(u64),
}

enum Scanned<T> {
    Partial,
    Invalid,
    Done(T, usize),
}

impl<T> Scanned<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Scanned<U> {
        match self {
            Scanned::Partial => Scanned::Partial,
            Scanned::Invalid => Scanned::Invalid,
            Scanned::Done(value, len) => Scanned::Done(f(value), len),
        }
    }

    fn after(self, head: usize) -> Self {
        match self {
            Scanned::Done(value, len) => Scanned::Done(value, head + len),
            other => other,
        }
    }
}

/// Walks the encoding of the first buffered message without decoding it.
///
/// Only whole tokens are consumed, so the walk resumes where the last call
/// stopped. Anything the walk cannot make sense of is left for `bincode` to reject.
#[derive(Debug, Default)]
struct FrameScan {
    pos: usize,
    started: bool,
    pending: Vec<Pending>,
}

impl FrameScan {
    /// Returns `true` once `buffer` holds a full message, or bytes `bincode`
    /// must judge.
    fn advance(&mut self, buffer: &[u8]) -> bool {
        if !self.started {
            self.pending.push(Pending::Values(1));
            self.started = true;
        }
        loop {
            if self.pos as u64 > MAX_MESSAGE_SIZE {
                return true;
            }
            let (entry, remaining) = match self.pending.last() {
                None => return true,
                Some(Pending::Values(n)) => (false, *n),
                Some(Pending::Entries(n)) => (true, *n),
            };
            if remaining == 0 {
                self.pending.pop();
                continue;
            }
            let rest = &buffer[self.pos..];
            let step = if entry { scan_sized(rest) } else { scan_value(rest) };
            let (nested, len) = match step {
                Scanned::Partial => return false,
                Scanned::Invalid => return true,
                Scanned::Done(nested, len) => (nested, len),
            };
            if let Some(Pending::Values(n) | Pending::Entries(n)) = self.pending.last_mut() {
                *n -= 1;
            }
            self.pos += len;
            if entry {
                self.pending.push(Pending::Values(1));
            }
            if let Some(nested) = nested {
                self.pending.push(nested);
            }
        }
    }
}

/// One `WireValue`: variant index, then its payload. Lists and maps only
/// consume their length here and report what they still owe.
fn scan_value(buf: &[u8]) -> Scanned<Option<Pending>> {
    let (variant, head) = match scan_varint(buf) {
        Scanned::Done(variant, head) => (variant, head),
        Scanned::Partial => return Scanned::Partial,
        Scanned::Invalid => return Scanned::Invalid,
    };
    let rest = &buf[head..];
    let body = match variant {
        0 => Scanned::Done(None, 0),
        1 => scan_fixed(rest, 1),
        2 => scan_varint(rest).map(|_| None),
        3 => scan_fixed(rest, 8),
        4 | 5 => scan_sized(rest),
        6 => scan_count(rest).map(|n| Some(Pending::Values(n))),
        7 => scan_count(rest).map(|n| Some(Pending::Entries(n))),
        _ => Scanned::Invalid,
    };
    body.after(head)
}

fn scan_fixed(buf: &[u8], len: usize) -> Scanned<Option<Pending>> {
    if buf.len() >= len {
        Scanned::Done(None, len)
    } else {
        Scanned::Partial
    }
}

/// Length-prefixed bytes: strings, byte strings and map keys.
fn scan_sized(buf: &[u8]) -> Scanned<Option<Pending>> {
    let (len, head) = match scan_count(buf) {
        Scanned::Done(len, head) => (len, head),
        Scanned::Partial => return Scanned::Partial,
        Scanned::Invalid => return Scanned::Invalid,
    };
    if ((buf.len() - head) as u64) < len {
        return Scanned::Partial;
    }
    Scanned::Done(None, head + len as usize)
}

/// A length prefix. Every element takes at least one byte, so a count past the
/// size limit can never complete.
fn scan_count(buf: &[u8]) -> Scanned<u64> {
    match scan_varint(buf) {
        Scanned::Done(n, _) if n > MAX_MESSAGE_SIZE => Scanned::Invalid,
        other => other,
    }
}

/// `bincode` varint: one byte below 251, else a marker and 2, 4 or 8 LE bytes.
fn scan_varint(buf: &[u8]) -> Scanned<u64> {
    let Some(&marker) = buf.first() else {
        return Scanned::Partial;
    };
    let width = match marker {
        0..=250 => return Scanned::Done(u64::from(marker), 1),
        251 => 2,
        252 => 4,
        253 => 8,
        _ => return Scanned::Invalid,
    };
    match buf.get(1..=width) {
        Some(bytes) => {
            let mut raw = [0u8; 8];
            raw[..width].copy_from_slice(bytes);
            Scanned::Done(u64::from_le_bytes(raw), 1 + width)
        }
        None => Scanned::Partial,
    }
}

impl Iterator for Unpacker {
    type Item = Result<Value, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_value().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxnode::utc_now;

    fn sample() -> Value {
        let mut map = ValueMap::new();
        map.insert("int".into(), Value::from(-42));
        map.insert("float".into(), Value::from(1.25));
        map.insert("str".into(), Value::from("USD/JPY"));
        map.insert("bytes".into(), Value::from(vec![0u8, 1, 255]));
        map.insert("nil".into(), Value::Nil);
        map.insert("flag".into(), Value::from(true));
        map.insert("time".into(), Value::from(utc_now()));
        map.insert(
            "list".into(),
            Value::List(vec![Value::from("a"), Value::List(vec![Value::from(1)])]),
        );
        Value::Map(map)
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let value = sample();
        assert_eq!(unpack(&pack(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_datetime_is_a_tagged_map_on_the_wire() {
        let dt = parse_datetime("2018-01-02T03:04:05.123456Z").unwrap();
        let bytes = pack(&Value::from(dt)).unwrap();
        let wire: WireValue = options().deserialize(&bytes).unwrap();
        match wire {
            WireValue::Map(entries) => {
                assert_eq!(entries.len(), 2);
                assert!(matches!(&entries[0], (k, WireValue::Bool(true)) if k == DATETIME_TAG));
                assert!(
                    matches!(&entries[1], (k, WireValue::Str(s)) if k == TAG_DATA && s == "2018-01-02T03:04:05.123456Z")
                );
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let wire = WireValue::Map(vec![
            ("__decimal__".into(), WireValue::Bool(true)),
            ("data".into(), WireValue::Str("1.5".into())),
        ]);
        let bytes = options().serialize(&wire).unwrap();
        assert!(matches!(unpack(&bytes), Err(CodecError::UnknownTag(tag)) if tag == "__decimal__"));
    }

    #[test]
    fn test_bad_datetime_payload_is_rejected() {
        let wire = WireValue::Map(vec![
            (DATETIME_TAG.into(), WireValue::Bool(true)),
            ("data".into(), WireValue::Str("not a date".into())),
        ]);
        let bytes = options().serialize(&wire).unwrap();
        assert!(matches!(unpack(&bytes), Err(CodecError::InvalidDatetime(_))));
    }

    #[test]
    fn test_plain_two_key_map_is_not_a_tag() {
        let mut map = ValueMap::new();
        map.insert("data".into(), Value::from(1));
        map.insert("flag".into(), Value::from(true));
        let value = Value::Map(map);
        assert_eq!(unpack(&pack(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut bytes = pack(&Value::from(1)).unwrap();
        bytes.push(0);
        assert!(unpack(&bytes).is_err());
    }

    #[test]
    fn test_unpacker_handles_split_and_batched_input() {
        let first = sample();
        let second = Value::List(vec![Value::from(1), Value::from("two")]);
        let mut bytes = pack(&first).unwrap();
        bytes.extend(pack(&second).unwrap());

        let mut unpacker = Unpacker::new();
        let (head, tail) = bytes.split_at(7);
        unpacker.feed(head);
        assert!(unpacker.next_value().unwrap().is_none());
        unpacker.feed(tail);

        let decoded: Vec<Value> = unpacker.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded, vec![first, second]);
        assert_eq!(unpacker.buffered(), 0);
    }

    #[test]
    fn test_unpacker_resumes_byte_by_byte() {
        let value = sample();
        let bytes = pack(&value).unwrap();
        let mut unpacker = Unpacker::new();
        for (i, byte) in bytes.iter().enumerate() {
            unpacker.feed(std::slice::from_ref(byte));
            let decoded = unpacker.next_value().unwrap();
            if i + 1 < bytes.len() {
                assert!(decoded.is_none(), "decoded early at byte {}", i);
            } else {
                assert_eq!(decoded, Some(value.clone()));
            }
        }
        assert_eq!(unpacker.buffered(), 0);
    }

    #[test]
    fn test_unpacker_large_message_in_chunks() {
        let mut rows = Vec::new();
        for i in 0..200_000 {
            let mut row = ValueMap::new();
            row.insert("seq".into(), Value::from(i as i64));
            row.insert("tag".into(), Value::from(format!("{:016}", i)));
            rows.push(Value::Map(row));
        }
        let value = Value::List(rows);
        let bytes = pack(&value).unwrap();
        assert!(bytes.len() > 4 * 1024 * 1024);

        let mut unpacker = Unpacker::new();
        let mut decoded = Vec::new();
        for chunk in bytes.chunks(64 * 1024) {
            unpacker.feed(chunk);
            if let Some(value) = unpacker.next_value().unwrap() {
                decoded.push(value);
            }
        }
        assert_eq!(decoded, vec![value]);
        assert_eq!(unpacker.buffered(), 0);
        // The scan restarts cleanly for the next message.
        unpacker.feed(&pack(&Value::from("next")).unwrap());
        assert_eq!(unpacker.next_value().unwrap(), Some(Value::from("next")));
    }

    #[test]
    fn test_unpacker_rejects_oversized_length() {
        let mut unpacker = Unpacker::new();
        // A string claiming u64::MAX bytes.
        unpacker.feed(&[0x04, 253, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert!(unpacker.next_value().is_err());
        assert_eq!(unpacker.buffered(), 0);
    }

    #[test]
    fn test_unpacker_reports_garbage() {
        let mut unpacker = Unpacker::new();
        // Variant index 32 does not exist.
        unpacker.feed(&[0x20, 0x00]);
        assert!(unpacker.next_value().is_err());
        assert_eq!(unpacker.buffered(), 0);
    }
}
