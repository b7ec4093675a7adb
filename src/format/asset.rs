//! Asset-tree format
//!
//! The nested snapshot format found in the companion app's bundled demo
//! data. Every node is `[type:u8][id:u32]` followed by a primitive, an array
//! of `(index, node)` pairs or an object of `(key, node)` pairs. Strings are
//! `u32` length-prefixed.

use bytes::Buf;
use std::collections::BTreeMap;

use super::vocabulary::canonical_key;
use super::{ensure, read_bytes, read_u32, read_u8, utf8, FormatError, FormatResult};
use crate::model::{Id, Item, Value};

/// Node type tags
pub mod node {
    pub const PRIMITIVE: u8 = 0;
    pub const ARRAY: u8 = 1;
    pub const OBJECT: u8 = 2;
}

/// Primitive subtype tags
pub mod primitive {
    pub const INT32: u8 = 0;
    pub const UINT32: u8 = 1;
    pub const INT64: u8 = 2;
    pub const FLOAT32: u8 = 3;
    pub const FLOAT64: u8 = 4;
    pub const BOOL: u8 = 5;
    pub const STRING: u8 = 6;
}

// Smallest encoded array entry: index + node header + one payload byte
const MIN_ARRAY_ENTRY: usize = 4 + 5 + 1;
// Smallest encoded object entry: key length + node header + one payload byte
const MIN_OBJECT_ENTRY: usize = 4 + 5 + 1;

/// Decode an asset tree into flattened items.
///
/// Descendants come before their container and the root's own item is last.
pub fn load(data: &[u8]) -> FormatResult<Vec<Item>> {
    let mut buf = data;
    let (root, items) = read_node(&mut buf).map_err(|e| {
        tracing::error!("Asset tree decode failed at offset {}: {}", data.len() - buf.len(), e);
        e
    })?;
    if !buf.is_empty() {
        tracing::warn!("Ignoring {} trailing bytes after asset tree", buf.len());
    }
    tracing::debug!("Decoded asset tree rooted at {:#x} ({} items)", root, items.len());
    Ok(items)
}

fn read_node(buf: &mut &[u8]) -> FormatResult<(Id, Vec<Item>)> {
    let node_type = read_u8(buf)?;
    let id = read_u32(buf)?;

    let (value, mut items) = match node_type {
        node::PRIMITIVE => (read_primitive(buf)?, Vec::new()),
        node::ARRAY => read_array(buf)?,
        node::OBJECT => read_object(buf)?,
        other => return Err(FormatError::UnknownType(other)),
    };

    items.push((id, value));
    Ok((id, items))
}

fn read_string(buf: &mut &[u8]) -> FormatResult<String> {
    let len = read_u32(buf)? as usize;
    utf8(read_bytes(buf, len)?)
}

fn read_primitive(buf: &mut &[u8]) -> FormatResult<Value> {
    let subtype = read_u8(buf)?;
    let value = match subtype {
        primitive::INT32 => Value::Int32(read_u32(buf)? as i32),
        primitive::UINT32 => Value::UInt32(read_u32(buf)?),
        primitive::INT64 => {
            ensure(buf, 8)?;
            Value::Int64(buf.get_i64_le())
        }
        primitive::FLOAT32 => Value::Float32(f32::from_bits(read_u32(buf)?)),
        primitive::FLOAT64 => {
            ensure(buf, 8)?;
            Value::Float64(buf.get_f64_le())
        }
        primitive::BOOL => Value::Bool(read_u8(buf)? != 0),
        primitive::STRING => Value::String(read_string(buf)?),
        other => return Err(FormatError::UnknownPrimitive(other)),
    };
    Ok(value)
}

fn read_array(buf: &mut &[u8]) -> FormatResult<(Value, Vec<Item>)> {
    let count = read_u32(buf)?;
    ensure(buf, (count as usize).saturating_mul(MIN_ARRAY_ENTRY))?;

    let mut slots: Vec<Option<Id>> = vec![None; count as usize];
    let mut items = Vec::new();
    for _ in 0..count {
        let index = read_u32(buf)?;
        if index >= count {
            return Err(FormatError::IndexOutOfRange { index, count });
        }
        let (child, descendants) = read_node(buf)?;
        slots[index as usize] = Some(child);
        items.extend(descendants);
    }

    let ids = slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or(FormatError::MissingIndex(i)))
        .collect::<FormatResult<Vec<_>>>()?;
    Ok((Value::List(ids), items))
}

fn read_object(buf: &mut &[u8]) -> FormatResult<(Value, Vec<Item>)> {
    let count = read_u32(buf)?;
    ensure(buf, (count as usize).saturating_mul(MIN_OBJECT_ENTRY))?;

    let mut entries = BTreeMap::new();
    let mut items = Vec::new();
    for _ in 0..count {
        let key = canonical_key(&read_string(buf)?);
        let (child, descendants) = read_node(buf)?;
        entries.insert(key, child);
        items.extend(descendants);
    }
    Ok((Value::Dict(entries), items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn head(buf: &mut BytesMut, node_type: u8, id: Id) {
        buf.put_u8(node_type);
        buf.put_u32_le(id);
    }

    fn string(buf: &mut BytesMut, s: &str) {
        buf.put_u32_le(s.len() as u32);
        buf.put_slice(s.as_bytes());
    }

    fn bool_node(buf: &mut BytesMut, id: Id, v: bool) {
        head(buf, node::PRIMITIVE, id);
        buf.put_u8(primitive::BOOL);
        buf.put_u8(u8::from(v));
    }

    #[test]
    fn test_object_with_normalized_keys() {
        let mut buf = BytesMut::new();
        head(&mut buf, node::OBJECT, 0);
        buf.put_u32_le(2);
        string(&mut buf, "playername");
        head(&mut buf, node::PRIMITIVE, 1);
        buf.put_u8(primitive::STRING);
        string(&mut buf, "Nate");
        string(&mut buf, "customField");
        head(&mut buf, node::PRIMITIVE, 2);
        buf.put_u8(primitive::INT64);
        buf.put_i64_le(-(1 << 40));

        let items = load(&buf).unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("PlayerName".to_string(), 1);
        entries.insert("customField".to_string(), 2);
        assert_eq!(
            items,
            vec![
                (1, Value::from("Nate")),
                (2, Value::Int64(-(1 << 40))),
                (0, Value::Dict(entries)),
            ]
        );
    }

    #[test]
    fn test_array_reassembled_by_index() {
        let mut buf = BytesMut::new();
        head(&mut buf, node::ARRAY, 10);
        buf.put_u32_le(2);
        buf.put_u32_le(1);
        bool_node(&mut buf, 12, true);
        buf.put_u32_le(0);
        head(&mut buf, node::PRIMITIVE, 11);
        buf.put_u8(primitive::FLOAT64);
        buf.put_f64_le(2.5);

        let items = load(&buf).unwrap();
        assert_eq!(
            items,
            vec![
                (12, Value::Bool(true)),
                (11, Value::Float64(2.5)),
                (10, Value::List(vec![11, 12])),
            ]
        );
    }

    #[test]
    fn test_nested_containers() {
        let mut buf = BytesMut::new();
        head(&mut buf, node::OBJECT, 0);
        buf.put_u32_le(1);
        string(&mut buf, "STATUS");
        head(&mut buf, node::ARRAY, 1);
        buf.put_u32_le(1);
        buf.put_u32_le(0);
        head(&mut buf, node::PRIMITIVE, 2);
        buf.put_u8(primitive::UINT32);
        buf.put_u32_le(7);

        let ids: Vec<Id> = load(&buf).unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2, 1, 0]);
    }

    #[test]
    fn test_unknown_primitive_aborts() {
        let mut buf = BytesMut::new();
        head(&mut buf, node::PRIMITIVE, 0);
        buf.put_u8(9);
        assert_eq!(load(&buf), Err(FormatError::UnknownPrimitive(9)));
    }

    #[test]
    fn test_unknown_node_type_in_child_propagates() {
        let mut buf = BytesMut::new();
        head(&mut buf, node::ARRAY, 0);
        buf.put_u32_le(1);
        buf.put_u32_le(0);
        head(&mut buf, 7, 1);
        buf.put_slice(&[0; 8]);
        assert_eq!(load(&buf), Err(FormatError::UnknownType(7)));
    }

    #[test]
    fn test_array_index_errors() {
        let mut buf = BytesMut::new();
        head(&mut buf, node::ARRAY, 0);
        buf.put_u32_le(1);
        buf.put_u32_le(3);
        bool_node(&mut buf, 1, false);
        assert_eq!(load(&buf), Err(FormatError::IndexOutOfRange { index: 3, count: 1 }));

        let mut buf = BytesMut::new();
        head(&mut buf, node::ARRAY, 0);
        buf.put_u32_le(2);
        buf.put_u32_le(1);
        bool_node(&mut buf, 1, false);
        buf.put_u32_le(1);
        bool_node(&mut buf, 2, true);
        assert_eq!(load(&buf), Err(FormatError::MissingIndex(0)));
    }

    #[test]
    fn test_truncated_and_oversized_counts() {
        let mut buf = BytesMut::new();
        head(&mut buf, node::PRIMITIVE, 0);
        buf.put_u8(primitive::STRING);
        buf.put_u32_le(10);
        buf.put_slice(b"abc");
        assert!(matches!(load(&buf), Err(FormatError::UnexpectedEof { .. })));

        let mut buf = BytesMut::new();
        head(&mut buf, node::OBJECT, 0);
        buf.put_u32_le(u32::MAX);
        assert!(matches!(load(&buf), Err(FormatError::UnexpectedEof { .. })));
    }
}
