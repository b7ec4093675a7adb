//! Native nested literals
//!
//! Converts nested maps and lists into flattened items (IDs assigned
//! depth-first) and back, and renders the JSON export document.

use serde::Serialize;
use std::collections::BTreeMap;

use super::{FormatError, FormatResult};
use crate::model::{Id, Item, Model, Value, ROOT};

/// A nested value tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    /// Leaf value; never a container
    Scalar(Value),
    List(Vec<Literal>),
    Map(BTreeMap<String, Literal>),
}

impl Literal {
    pub fn scalar(value: impl Into<Value>) -> Self {
        Literal::Scalar(value.into())
    }
}

impl TryFrom<serde_json::Value> for Literal {
    type Error = FormatError;

    fn try_from(json: serde_json::Value) -> FormatResult<Self> {
        use serde_json::Value as Json;

        let literal = match json {
            Json::Null => return Err(FormatError::NullLiteral),
            Json::Bool(v) => Literal::Scalar(Value::Bool(v)),
            Json::Number(n) => {
                let value = if let Some(i) = n.as_i64() {
                    Value::from_integer(i)
                } else {
                    Value::Float64(n.as_f64().unwrap_or(f64::NAN))
                };
                Literal::Scalar(value)
            }
            Json::String(s) => Literal::Scalar(Value::String(s)),
            Json::Array(values) => Literal::List(
                values
                    .into_iter()
                    .map(Literal::try_from)
                    .collect::<FormatResult<_>>()?,
            ),
            Json::Object(entries) => Literal::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, Literal::try_from(v)?)))
                    .collect::<FormatResult<_>>()?,
            ),
        };
        Ok(literal)
    }
}

/// Flatten `literal` with the root at ID 0
pub fn load(literal: &Literal) -> Vec<Item> {
    load_from(literal, ROOT)
}

/// Flatten `literal`, numbering nodes depth-first from `base`.
///
/// A container takes its ID before its children, but its item is emitted
/// after theirs.
pub fn load_from(literal: &Literal, base: Id) -> Vec<Item> {
    let mut items = Vec::new();
    assign(literal, base, &mut items);
    items
}

fn assign(literal: &Literal, id: Id, items: &mut Vec<Item>) -> Id {
    match literal {
        Literal::Scalar(value) => {
            items.push((id, value.clone()));
            id + 1
        }
        Literal::List(children) => {
            let mut next = id + 1;
            let mut ids = Vec::with_capacity(children.len());
            for child in children {
                ids.push(next);
                next = assign(child, next, items);
            }
            items.push((id, Value::List(ids)));
            next
        }
        Literal::Map(children) => {
            let mut next = id + 1;
            let mut entries = BTreeMap::new();
            for (name, child) in children {
                entries.insert(name.clone(), next);
                next = assign(child, next, items);
            }
            items.push((id, Value::Dict(entries)));
            next
        }
    }
}

/// Rebuild the nested literal rooted at `id`.
///
/// The graph below `id` must be acyclic. Children missing from the model are
/// left out.
pub fn dump_model(model: &Model, id: Id) -> Option<Literal> {
    let literal = match model.get_item(id)? {
        Value::List(ids) => Literal::List(
            ids.into_iter()
                .filter_map(|child| dereference(model, id, child))
                .collect(),
        ),
        Value::Dict(entries) => Literal::Map(
            entries
                .into_iter()
                .filter_map(|(name, child)| Some((name, dereference(model, id, child)?)))
                .collect(),
        ),
        scalar => Literal::Scalar(scalar),
    };
    Some(literal)
}

fn dereference(model: &Model, parent: Id, child: Id) -> Option<Literal> {
    let literal = dump_model(model, child);
    if literal.is_none() {
        tracing::warn!("Item {:#x} references missing item {:#x}", parent, child);
    }
    literal
}

/// Render the JSON export document: sorted keys, four-space indentation
pub fn to_document(literal: &Literal) -> serde_json::Result<String> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    literal.serialize(&mut serializer)?;
    // serde_json only ever writes UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}
