//! `blob` and `blobmsg` attribute encoding.
//!
//! A blob attribute is a big-endian `u32` header followed by its payload,
//! padded to four bytes. The header holds an extended flag (bit 31), a
//! seven bit id and a 24 bit length that counts the header but not the
//! padding. `blobmsg` attributes set the extended flag, use the id as the
//! value type and start the payload with a padded, NUL-terminated name.

use serde_json::{Map, Number, Value};
use thiserror::Error;

const ALIGN: usize = 4;
const EXTENDED: u32 = 0x8000_0000;
const ID_SHIFT: u32 = 24;
const ID_MASK: u32 = 0x7f;
const LEN_MASK: u32 = 0x00ff_ffff;

/// Size of an attribute header.
pub(crate) const ATTR_HEADER_LEN: usize = 4;

const TYPE_UNSPEC: u8 = 0;
const TYPE_ARRAY: u8 = 1;
const TYPE_TABLE: u8 = 2;
const TYPE_STRING: u8 = 3;
const TYPE_INT64: u8 = 4;
const TYPE_INT32: u8 = 5;
const TYPE_INT16: u8 = 6;
const TYPE_INT8: u8 = 7;
const TYPE_DOUBLE: u8 = 8;

/// Errors raised while decoding blob attributes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlobError {
    /// An attribute runs past the end of its container.
    #[error("attribute at offset {offset} is truncated")]
    Truncated {
        /// Offset of the attribute within its container.
        offset: usize,
    },
    /// A `blobmsg` value is missing its extended flag.
    #[error("attribute at offset {offset} is not a blobmsg value")]
    NotBlobmsg {
        /// Offset of the attribute within its container.
        offset: usize,
    },
    /// The value type is not one `blobmsg` defines.
    #[error("unknown blobmsg type {0}")]
    UnknownType(u8),
    /// A fixed-width value has the wrong size.
    #[error("blobmsg value of type {kind} has {len} bytes")]
    BadWidth {
        /// Value type.
        kind: u8,
        /// Payload size found.
        len: usize,
    },
    /// A name or string value is not UTF-8.
    #[error("blobmsg text is not UTF-8")]
    NotUtf8,
    /// An attribute is longer than the length field can express.
    #[error("attribute of {0} bytes exceeds the blob length field")]
    TooLong(usize),
}

/// One attribute borrowed from an encoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attr<'a> {
    pub(crate) offset: usize,
    pub(crate) id: u8,
    pub(crate) extended: bool,
    pub(crate) payload: &'a [u8],
}

pub(crate) const fn padded(len: usize) -> usize {
    len.next_multiple_of(ALIGN)
}

fn pad(out: &mut Vec<u8>) {
    out.resize(padded(out.len()), 0);
}

/// Reserves an attribute header at the end of `out`, returning its offset.
fn open(out: &mut Vec<u8>) -> usize {
    let start = out.len();
    out.extend_from_slice(&[0; ATTR_HEADER_LEN]);
    start
}

/// Writes the header of the attribute opened at `start` and pads `out`.
fn close(out: &mut Vec<u8>, start: usize, id: u8, extended: bool) -> Result<(), BlobError> {
    let len = out.len() - start;
    let encoded_len = u32::try_from(len)
        .ok()
        .filter(|value| *value <= LEN_MASK)
        .ok_or(BlobError::TooLong(len))?;
    let flag = if extended { EXTENDED } else { 0 };
    let header = flag | ((u32::from(id) & ID_MASK) << ID_SHIFT) | encoded_len;
    if let Some(slot) = out.get_mut(start..start + ATTR_HEADER_LEN) {
        slot.copy_from_slice(&header.to_be_bytes());
    }
    pad(out);
    Ok(())
}

/// Appends a plain attribute.
pub(crate) fn put_attr(out: &mut Vec<u8>, id: u8, payload: &[u8]) -> Result<(), BlobError> {
    let start = open(out);
    out.extend_from_slice(payload);
    close(out, start, id, false)
}

/// Appends a plain attribute holding a NUL-terminated string.
pub(crate) fn put_string(out: &mut Vec<u8>, id: u8, value: &str) -> Result<(), BlobError> {
    let start = open(out);
    out.extend_from_slice(value.as_bytes());
    out.push(0);
    close(out, start, id, false)
}

/// Appends a plain attribute holding a big-endian `u32`.
pub(crate) fn put_u32(out: &mut Vec<u8>, id: u8, value: u32) -> Result<(), BlobError> {
    put_attr(out, id, &value.to_be_bytes())
}

/// Encodes the members of `table` as consecutive `blobmsg` attributes.
pub(crate) fn encode_table(table: &Map<String, Value>) -> Result<Vec<u8>, BlobError> {
    let mut out = Vec::new();
    for (name, value) in table {
        put_blobmsg(&mut out, name, value)?;
    }
    Ok(out)
}

fn put_blobmsg(out: &mut Vec<u8>, name: &str, value: &Value) -> Result<(), BlobError> {
    let start = open(out);
    let name_len = u16::try_from(name.len()).map_err(|_| BlobError::TooLong(name.len()))?;
    out.extend_from_slice(&name_len.to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad(out);
    let kind = match value {
        Value::Null => TYPE_UNSPEC,
        Value::Bool(flag) => {
            out.push(u8::from(*flag));
            TYPE_INT8
        }
        Value::Number(number) => put_number(out, number),
        Value::String(text) => {
            out.extend_from_slice(text.as_bytes());
            out.push(0);
            TYPE_STRING
        }
        Value::Array(items) => {
            for item in items {
                put_blobmsg(out, "", item)?;
            }
            TYPE_ARRAY
        }
        Value::Object(members) => {
            for (member, item) in members {
                put_blobmsg(out, member, item)?;
            }
            TYPE_TABLE
        }
    };
    close(out, start, kind, true)
}

fn put_number(out: &mut Vec<u8>, number: &Number) -> u8 {
    if let Some(integer) = number.as_i64() {
        if let Ok(small) = i32::try_from(integer) {
            out.extend_from_slice(&small.to_be_bytes());
            return TYPE_INT32;
        }
        out.extend_from_slice(&integer.to_be_bytes());
        return TYPE_INT64;
    }
    let float = number.as_f64().unwrap_or_default();
    out.extend_from_slice(&float.to_bits().to_be_bytes());
    TYPE_DOUBLE
}

/// Splits `bytes` into its consecutive attributes.
pub(crate) fn attrs(bytes: &[u8]) -> Result<Vec<Attr<'_>>, BlobError> {
    let mut found = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let header = bytes
            .get(offset..offset + ATTR_HEADER_LEN)
            .and_then(|raw| raw.try_into().ok())
            .map(u32::from_be_bytes)
            .ok_or(BlobError::Truncated { offset })?;
        let len = usize::try_from(header & LEN_MASK).map_err(|_| BlobError::Truncated { offset })?;
        let payload = bytes
            .get(offset + ATTR_HEADER_LEN..offset + len)
            .filter(|_| len >= ATTR_HEADER_LEN)
            .ok_or(BlobError::Truncated { offset })?;
        let id = u8::try_from((header >> ID_SHIFT) & ID_MASK).unwrap_or_default();
        found.push(Attr {
            offset,
            id,
            extended: header & EXTENDED != 0,
            payload,
        });
        offset += padded(len);
    }
    Ok(found)
}

/// Decodes consecutive `blobmsg` attributes into a JSON object.
pub(crate) fn decode_table(bytes: &[u8]) -> Result<Map<String, Value>, BlobError> {
    let mut table = Map::new();
    for attr in attrs(bytes)? {
        let (name, value) = decode_blobmsg(attr)?;
        table.insert(name, value);
    }
    Ok(table)
}

fn decode_array(bytes: &[u8]) -> Result<Vec<Value>, BlobError> {
    attrs(bytes)?
        .into_iter()
        .map(|attr| decode_blobmsg(attr).map(|(_, value)| value))
        .collect()
}

fn decode_blobmsg(attr: Attr<'_>) -> Result<(String, Value), BlobError> {
    let offset = attr.offset;
    if !attr.extended {
        return Err(BlobError::NotBlobmsg { offset });
    }
    let name_len = attr
        .payload
        .get(..2)
        .and_then(|raw| raw.try_into().ok())
        .map(u16::from_be_bytes)
        .map(usize::from)
        .ok_or(BlobError::Truncated { offset })?;
    let raw_name = attr
        .payload
        .get(2..2 + name_len)
        .ok_or(BlobError::Truncated { offset })?;
    let name = std::str::from_utf8(raw_name).map_err(|_| BlobError::NotUtf8)?;
    let data = attr
        .payload
        .get(padded(2 + name_len + 1)..)
        .unwrap_or_default();
    Ok((name.to_owned(), decode_value(attr.id, data)?))
}

fn decode_value(kind: u8, data: &[u8]) -> Result<Value, BlobError> {
    let width = |expected: usize| {
        (data.len() == expected)
            .then_some(data)
            .ok_or(BlobError::BadWidth { kind, len: data.len() })
    };
    Ok(match kind {
        TYPE_UNSPEC => Value::Null,
        TYPE_ARRAY => Value::Array(decode_array(data)?),
        TYPE_TABLE => Value::Object(decode_table(data)?),
        TYPE_STRING => {
            let text = data.strip_suffix(&[0]).unwrap_or(data);
            Value::String(std::str::from_utf8(text).map_err(|_| BlobError::NotUtf8)?.to_owned())
        }
        TYPE_INT64 => Value::from(i64::from_be_bytes(fixed(width(8)?))),
        TYPE_INT32 => Value::from(i32::from_be_bytes(fixed(width(4)?))),
        TYPE_INT16 => Value::from(i16::from_be_bytes(fixed(width(2)?))),
        TYPE_INT8 => Value::Bool(width(1)?.iter().any(|byte| *byte != 0)),
        TYPE_DOUBLE => Number::from_f64(f64::from_bits(u64::from_be_bytes(fixed(width(8)?))))
            .map_or(Value::Null, Value::Number),
        other => return Err(BlobError::UnknownType(other)),
    })
}

fn fixed<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut raw = [0; N];
    if let Some(source) = data.get(..N) {
        raw.copy_from_slice(source);
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn table(value: &Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[rstest]
    #[case(json!({"a": "b"}), vec![0x83, 0, 0, 10, 0, 1, b'a', 0, b'b', 0, 0, 0])]
    #[case(json!({"n": 5}), vec![0x85, 0, 0, 12, 0, 1, b'n', 0, 0, 0, 0, 5])]
    #[case(json!({"t": true}), vec![0x87, 0, 0, 9, 0, 1, b't', 0, 1, 0, 0, 0])]
    #[case(json!({"z": null}), vec![0x80, 0, 0, 8, 0, 1, b'z', 0])]
    fn scalars_match_the_libubox_layout(#[case] value: Value, #[case] bytes: Vec<u8>) {
        assert_eq!(encode_table(&table(&value)).expect("encode"), bytes);
    }

    #[rstest]
    fn plain_string_attributes_are_nul_terminated_and_padded() {
        let mut out = Vec::new();
        put_string(&mut out, 2, "x").expect("encode");
        assert_eq!(out, vec![0x02, 0, 0, 6, b'x', 0, 0, 0]);
    }

    #[rstest]
    fn nested_envelopes_decode_to_the_same_json() {
        let envelope = json!({
            "payload": {"data": {"list": [1, "two", false, null], "big": 1_i64 << 40, "ratio": 0.5}},
            "final": true,
            "multipart": false,
            "request_id": "1f0e2c1a-0000-4000-8000-000000000000",
        });
        let bytes = encode_table(&table(&envelope)).expect("encode");
        assert_eq!(Value::Object(decode_table(&bytes).expect("decode")), envelope);
    }

    #[rstest]
    fn truncated_buffers_are_rejected() {
        let bytes = encode_table(&table(&json!({"a": "bcdef"}))).expect("encode");
        let short = bytes.get(..bytes.len() - 6).expect("prefix");
        assert_eq!(decode_table(short), Err(BlobError::Truncated { offset: 0 }));
    }

    #[rstest]
    fn plain_attributes_are_not_blobmsg_values() {
        let mut out = Vec::new();
        put_u32(&mut out, 3, 7).expect("encode");
        assert_eq!(decode_table(&out), Err(BlobError::NotBlobmsg { offset: 0 }));
    }
}
