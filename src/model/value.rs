//! Graph values
//!
//! Containers never embed their children; they hold child IDs that are
//! resolved separately through the [`Model`](super::Model).

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use super::Id;

/// A single node value in the object graph
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int32(i32),
    UInt32(u32),
    /// Only produced by the asset-tree format
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Ordered child references
    List(Vec<Id>),
    /// Named child references
    Dict(BTreeMap<String, Id>),
}

/// Path segment linking a child to its parent container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `[index]` into a list
    Index(usize),
    /// `.name` into a dict
    Key(String),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(index) => write!(f, "[{}]", index),
            Segment::Key(name) => write!(f, ".{}", name),
        }
    }
}

impl Value {
    /// Build the integer value whose variant matches the tag the channel
    /// format would pick for `n`.
    pub fn from_integer(n: i64) -> Self {
        if n < -128 {
            match i32::try_from(n) {
                Ok(v) => Value::Int32(v),
                Err(_) => Value::Int64(n),
            }
        } else if n < 0 {
            Value::Int8(n as i8)
        } else if n < 128 {
            Value::UInt8(n as u8)
        } else {
            match u32::try_from(n) {
                Ok(v) => Value::UInt32(v),
                Err(_) => Value::Int64(n),
            }
        }
    }

    /// Integer payload, regardless of width
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::UInt8(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Dict(_))
    }

    /// Child references with the segment each one is reachable under
    pub fn children(&self) -> Vec<(Segment, Id)> {
        match self {
            Value::List(ids) => ids
                .iter()
                .enumerate()
                .map(|(index, id)| (Segment::Index(index), *id))
                .collect(),
            Value::Dict(entries) => entries
                .iter()
                .map(|(name, id)| (Segment::Key(name.clone()), *id))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Short name of the variant, used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int8(_) => "int8",
            Value::UInt8(_) => "uint8",
            Value::Int32(_) => "int32",
            Value::UInt32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }

    /// Whether `other` may replace this value without changing its kind.
    ///
    /// All integer widths count as one kind, as do both float widths.
    pub fn same_kind(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float32(_) | Value::Float64(_), Value::Float32(_) | Value::Float64(_)) => {
                true
            }
            _ if self.as_integer().is_some() => other.as_integer().is_some(),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::List(ids) => {
                write!(f, "[")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:#x}", id)?;
                }
                write!(f, "]")
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (name, id)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {:#x}", name, id)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int8(v) => serializer.serialize_i8(*v),
            Value::UInt8(v) => serializer.serialize_u8(*v),
            Value::Int32(v) => serializer.serialize_i32(*v),
            Value::UInt32(v) => serializer.serialize_u32(*v),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::Float32(v) => serializer.serialize_f32(*v),
            Value::Float64(v) => serializer.serialize_f64(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::List(ids) => {
                let mut seq = serializer.serialize_seq(Some(ids.len()))?;
                for id in ids {
                    seq.serialize_element(id)?;
                }
                seq.end()
            }
            Value::Dict(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (name, id) in entries {
                    map.serialize_entry(name, id)?;
                }
                map.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_integer_matches_wire_tags() {
        assert_eq!(Value::from_integer(-200), Value::Int32(-200));
        assert_eq!(Value::from_integer(-128), Value::Int8(-128));
        assert_eq!(Value::from_integer(-5), Value::Int8(-5));
        assert_eq!(Value::from_integer(0), Value::UInt8(0));
        assert_eq!(Value::from_integer(127), Value::UInt8(127));
        assert_eq!(Value::from_integer(128), Value::UInt32(128));
        assert_eq!(Value::from_integer(1 << 40), Value::Int64(1 << 40));
    }

    #[test]
    fn test_children_segments() {
        let list = Value::List(vec![4, 9]);
        assert_eq!(
            list.children(),
            vec![(Segment::Index(0), 4), (Segment::Index(1), 9)]
        );

        let mut entries = BTreeMap::new();
        entries.insert("Name".to_string(), 3);
        let dict = Value::Dict(entries);
        assert_eq!(dict.children(), vec![(Segment::Key("Name".to_string()), 3)]);
        assert_eq!(Segment::Key("Name".to_string()).to_string(), ".Name");
        assert_eq!(Segment::Index(2).to_string(), "[2]");
    }

    #[test]
    fn test_same_kind() {
        assert!(Value::Int8(1).same_kind(&Value::UInt32(500)));
        assert!(Value::Float32(1.0).same_kind(&Value::Float64(2.0)));
        assert!(Value::from("a").same_kind(&Value::from("b")));
        assert!(!Value::Bool(true).same_kind(&Value::UInt8(1)));
        assert!(!Value::List(vec![]).same_kind(&Value::Dict(BTreeMap::new())));
    }
}
