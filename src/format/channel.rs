//! Channel format
//!
//! The record stream carried on the update channel and used for raw
//! snapshots. Each record is `[type:u8][id:u32][payload]`, little-endian,
//! with NUL-terminated strings.
//!
//! Integers are written with the narrowest tag that holds them, and the
//! receiving side reads them back with the same table, so the choice must
//! stay bit-for-bit stable.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

use super::{ensure, read_bytes, read_u16, read_u32, read_u8, utf8, FormatError, FormatResult};
use crate::model::{Id, Item, Value};

/// Record type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Bool = 0,
    Int8 = 1,
    UInt8 = 2,
    Int32 = 3,
    UInt32 = 4,
    Float32 = 5,
    String = 6,
    List = 7,
    Dict = 8,
}

impl Tag {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Tag::Bool),
            1 => Some(Tag::Int8),
            2 => Some(Tag::UInt8),
            3 => Some(Tag::Int32),
            4 => Some(Tag::UInt32),
            5 => Some(Tag::Float32),
            6 => Some(Tag::String),
            7 => Some(Tag::List),
            8 => Some(Tag::Dict),
            _ => None,
        }
    }
}

/// Decode a record stream.
///
/// Decoding stops at the first malformed record; the error is logged and the
/// items decoded before it are returned.
pub fn load(data: &[u8]) -> Vec<Item> {
    let mut buf = data;
    let mut items = Vec::new();
    while !buf.is_empty() {
        match read_record(&mut buf) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::error!(
                    "Channel format decode failed after {} items ({} bytes left): {}",
                    items.len(),
                    buf.len(),
                    e
                );
                break;
            }
        }
    }
    items
}

/// Decode a record stream, failing on the first malformed record
pub fn try_load(data: &[u8]) -> FormatResult<Vec<Item>> {
    let mut buf = data;
    let mut items = Vec::new();
    while !buf.is_empty() {
        items.push(read_record(&mut buf)?);
    }
    Ok(items)
}

fn read_record(buf: &mut &[u8]) -> FormatResult<Item> {
    let raw_tag = read_u8(buf)?;
    let tag = Tag::from_u8(raw_tag).ok_or(FormatError::UnknownType(raw_tag))?;
    let id = read_u32(buf)?;

    let value = match tag {
        Tag::Bool => Value::Bool(read_u8(buf)? != 0),
        Tag::Int8 => Value::Int8(read_u8(buf)? as i8),
        Tag::UInt8 => Value::UInt8(read_u8(buf)?),
        Tag::Int32 => Value::Int32(read_u32(buf)? as i32),
        Tag::UInt32 => Value::UInt32(read_u32(buf)?),
        Tag::Float32 => Value::Float32(f32::from_bits(read_u32(buf)?)),
        Tag::String => Value::String(read_cstr(buf)?),
        Tag::List => {
            let count = read_u16(buf)? as usize;
            ensure(buf, count * 4)?;
            let mut ids = Vec::with_capacity(count);
            for _ in 0..count {
                ids.push(read_u32(buf)?);
            }
            Value::List(ids)
        }
        Tag::Dict => {
            let count = read_u16(buf)?;
            let mut entries = BTreeMap::new();
            for _ in 0..count {
                let child = read_u32(buf)?;
                let name = read_cstr(buf)?;
                entries.insert(name, child);
            }
            // Legacy trailer: a second count followed by that many IDs
            let trailer = read_u16(buf)? as usize;
            read_bytes(buf, trailer * 4)?;
            Value::Dict(entries)
        }
    };

    Ok((id, value))
}

fn read_cstr(buf: &mut &[u8]) -> FormatResult<String> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or(FormatError::UnterminatedString)?;
    let bytes = read_bytes(buf, end)?;
    read_u8(buf)?;
    utf8(bytes)
}

/// Encode items as a record stream
pub fn dump(items: &[Item]) -> FormatResult<Bytes> {
    let mut buf = BytesMut::new();
    dump_into(items, &mut buf)?;
    Ok(buf.freeze())
}

/// Append the records for `items` to `buf`
pub fn dump_into(items: &[Item], buf: &mut BytesMut) -> FormatResult<()> {
    for (id, value) in items {
        dump_item(buf, *id, value)?;
    }
    Ok(())
}

/// Encode every item that can be represented.
///
/// Items that fail to encode leave no bytes behind; their errors are
/// returned alongside the records that were written.
pub fn dump_lossy(items: &[Item]) -> (Bytes, Vec<FormatError>) {
    let mut buf = BytesMut::new();
    let mut skipped = Vec::new();
    for (id, value) in items {
        let mark = buf.len();
        if let Err(e) = dump_item(&mut buf, *id, value) {
            buf.truncate(mark);
            skipped.push(e);
        }
    }
    (buf.freeze(), skipped)
}

fn put_head(buf: &mut BytesMut, tag: Tag, id: Id) {
    buf.put_u8(tag as u8);
    buf.put_u32_le(id);
}

fn put_cstr(buf: &mut BytesMut, id: Id, s: &str) -> FormatResult<()> {
    if s.as_bytes().contains(&0) {
        return Err(FormatError::Unrepresentable {
            id,
            value: format!("{:?}", s),
        });
    }
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn put_count(buf: &mut BytesMut, id: Id, count: usize) -> FormatResult<()> {
    let count = u16::try_from(count).map_err(|_| FormatError::TooManyEntries {
        id,
        count,
        max: u16::MAX as usize,
    })?;
    buf.put_u16_le(count);
    Ok(())
}

fn dump_integer(buf: &mut BytesMut, id: Id, n: i64) -> FormatResult<()> {
    let unrepresentable = || FormatError::Unrepresentable {
        id,
        value: n.to_string(),
    };

    if n < -128 {
        let v = i32::try_from(n).map_err(|_| unrepresentable())?;
        put_head(buf, Tag::Int32, id);
        buf.put_i32_le(v);
    } else if n < 0 {
        put_head(buf, Tag::Int8, id);
        buf.put_i8(n as i8);
    } else if n < 128 {
        put_head(buf, Tag::UInt8, id);
        buf.put_u8(n as u8);
    } else {
        let v = u32::try_from(n).map_err(|_| unrepresentable())?;
        put_head(buf, Tag::UInt32, id);
        buf.put_u32_le(v);
    }
    Ok(())
}

fn dump_item(buf: &mut BytesMut, id: Id, value: &Value) -> FormatResult<()> {
    match value {
        Value::Bool(v) => {
            put_head(buf, Tag::Bool, id);
            buf.put_u8(u8::from(*v));
        }
        Value::Int8(_) | Value::UInt8(_) | Value::Int32(_) | Value::UInt32(_) | Value::Int64(_) => {
            let n = value.as_integer().unwrap_or_default();
            dump_integer(buf, id, n)?;
        }
        Value::Float32(v) => {
            put_head(buf, Tag::Float32, id);
            buf.put_f32_le(*v);
        }
        Value::Float64(v) => {
            put_head(buf, Tag::Float32, id);
            buf.put_f32_le(*v as f32);
        }
        Value::String(s) => {
            put_head(buf, Tag::String, id);
            put_cstr(buf, id, s)?;
        }
        Value::List(ids) => {
            put_head(buf, Tag::List, id);
            put_count(buf, id, ids.len())?;
            for child in ids {
                buf.put_u32_le(*child);
            }
        }
        Value::Dict(entries) => {
            put_head(buf, Tag::Dict, id);
            put_count(buf, id, entries.len())?;
            for (name, child) in entries {
                buf.put_u32_le(*child);
                put_cstr(buf, id, name)?;
            }
            buf.put_u16_le(0);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dumped(value: Value) -> Vec<u8> {
        dump(&[(1, value)]).unwrap().to_vec()
    }

    #[test]
    fn test_integer_tag_selection() {
        assert_eq!(dumped(Value::Int32(-200)), vec![3, 1, 0, 0, 0, 0x38, 0xFF, 0xFF, 0xFF]);
        assert_eq!(dumped(Value::Int32(-5)), vec![1, 1, 0, 0, 0, 0xFB]);
        assert_eq!(dumped(Value::Int32(5)), vec![2, 1, 0, 0, 0, 5]);
        assert_eq!(dumped(Value::Int32(500)), vec![4, 1, 0, 0, 0, 0xF4, 0x01, 0, 0]);
    }

    #[test]
    fn test_integer_boundaries() {
        assert_eq!(dumped(Value::Int32(-129))[0], Tag::Int32 as u8);
        assert_eq!(dumped(Value::Int8(-128))[0], Tag::Int8 as u8);
        assert_eq!(dumped(Value::UInt8(127))[0], Tag::UInt8 as u8);
        assert_eq!(dumped(Value::UInt8(128))[0], Tag::UInt32 as u8);
    }

    #[test]
    fn test_uint8_tag_is_unsigned() {
        let bytes = [2, 7, 0, 0, 0, 0xC8];
        assert_eq!(load(&bytes), vec![(7, Value::UInt8(200))]);
    }

    #[test]
    fn test_int64_out_of_range() {
        let err = dump(&[(1, Value::Int64(1 << 40))]).unwrap_err();
        assert!(matches!(err, FormatError::Unrepresentable { id: 1, .. }));
        assert_eq!(dumped(Value::Int64(-3)), vec![1, 1, 0, 0, 0, 0xFD]);
    }

    #[test]
    fn test_lossy_dump_skips_only_bad_items() {
        let items = vec![
            (1, Value::Bool(true)),
            (2, Value::Int64(1 << 40)),
            (3, Value::from("a\0b")),
            (4, Value::from("ok")),
        ];
        let (bytes, skipped) = dump_lossy(&items);
        assert_eq!(skipped.len(), 2);
        assert!(matches!(skipped[0], FormatError::Unrepresentable { id: 2, .. }));
        assert_eq!(
            try_load(&bytes).unwrap(),
            vec![(1, Value::Bool(true)), (4, Value::from("ok"))]
        );
    }

    #[test]
    fn test_string_layout() {
        assert_eq!(dumped(Value::from("Hi")), vec![6, 1, 0, 0, 0, b'H', b'i', 0]);
        assert!(dump(&[(1, Value::from("a\0b"))]).is_err());
    }

    #[test]
    fn test_dict_trailer_is_consumed() {
        let mut bytes = vec![8, 2, 0, 0, 0];
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(b"Name\0");
        bytes.extend_from_slice(&0u16.to_le_bytes());
        // Next record must start right after the empty trailer
        bytes.extend_from_slice(&[0, 9, 0, 0, 0, 1]);

        let items = try_load(&bytes).unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("Name".to_string(), 9);
        assert_eq!(items, vec![(2, Value::Dict(entries)), (9, Value::Bool(true))]);
    }

    #[test]
    fn test_dict_trailer_entries_are_skipped() {
        let mut bytes = vec![8, 2, 0, 0, 0];
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&[0xAA; 8]);
        bytes.extend_from_slice(&[0, 3, 0, 0, 0, 0]);

        let items = try_load(&bytes).unwrap();
        assert_eq!(items, vec![(2, Value::Dict(BTreeMap::new())), (3, Value::Bool(false))]);
    }

    #[test]
    fn test_dict_dump_writes_empty_trailer() {
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), 2);
        let bytes = dumped(Value::Dict(entries));
        assert_eq!(bytes, vec![8, 1, 0, 0, 0, 1, 0, 2, 0, 0, 0, b'a', 0, 0, 0]);
    }

    #[test]
    fn test_unknown_tag_keeps_partial_result() {
        let bytes = [0, 1, 0, 0, 0, 1, 42, 2, 0, 0, 0, 0, 0, 3, 0, 0, 0, 1];
        assert_eq!(load(&bytes), vec![(1, Value::Bool(true))]);
        assert_eq!(try_load(&bytes), Err(FormatError::UnknownType(42)));
    }

    #[test]
    fn test_truncated_record() {
        let bytes = [0, 1, 0, 0, 0, 1, 3, 2, 0, 0, 0, 0xFF];
        assert_eq!(load(&bytes), vec![(1, Value::Bool(true))]);
        assert!(matches!(
            try_load(&bytes),
            Err(FormatError::UnexpectedEof { needed: 4, available: 1 })
        ));
        assert_eq!(
            try_load(&[6, 1, 0, 0, 0, b'a']),
            Err(FormatError::UnterminatedString)
        );
    }

    #[test]
    fn test_empty_stream() {
        assert!(load(&[]).is_empty());
    }

    #[test]
    fn test_float64_dumps_as_float32() {
        let bytes = dumped(Value::Float64(0.5));
        assert_eq!(load(&bytes), vec![(1, Value::Float32(0.5))]);
    }

    fn canonical_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| Value::from_integer(i64::from(n))),
            any::<u32>().prop_map(|n| Value::from_integer(i64::from(n))),
            any::<f32>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(Value::Float32),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
            prop::collection::vec(any::<u32>(), 0..8).prop_map(Value::List),
            prop::collection::btree_map("[a-zA-Z]{1,8}", any::<u32>(), 0..6).prop_map(Value::Dict),
        ]
    }

    proptest! {
        #[test]
        fn prop_dump_then_load_is_identity(
            items in prop::collection::vec((any::<u32>(), canonical_value()), 0..16)
        ) {
            let bytes = dump(&items).unwrap();
            prop_assert_eq!(try_load(&bytes).unwrap(), items);
        }
    }
}
