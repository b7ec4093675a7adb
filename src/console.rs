//! Console commands
//!
//! Line commands for inspecting and driving a live model while it is being
//! served or mirrored:
//!
//! - `get <path>...` prints the items at one or more paths
//! - `set <path> <value>` overwrites a leaf, keeping its kind
//! - `command <type> [args]` sends a command to command listeners
//!
//! Writes go through [`Model::update`] and [`Model::command`], so connected
//! peers see them like any other change.

use thiserror::Error;

use crate::format::literal::Literal;
use crate::model::{Model, Value};

/// Console errors
#[derive(Error, Debug, PartialEq)]
pub enum ConsoleError {
    #[error("Unknown command: {0} (try help)")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("{path} is a {kind}, only leaf values can be set")]
    Container { path: String, kind: &'static str },

    #[error("Type mismatch for {path}: expected {expected}, got {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid command type: {0}")]
    CommandType(String),
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

const HELP: &str = "\
get <path>...            show the items at the given paths
set <path> <value>       overwrite a leaf value (JSON, or a bare string)
command <type> [args]    send a command with JSON arguments
help                     show this text";

/// Run one console line against `model`.
///
/// Returns the text to print, or `None` for a blank line.
pub fn execute(model: &Model, line: &str) -> ConsoleResult<Option<String>> {
    let line = line.trim();
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    let output = match name {
        "" => return Ok(None),
        "get" => get(model, rest)?,
        "set" => set(model, rest)?,
        "command" => command(model, rest)?,
        "help" => HELP.to_string(),
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(Some(output))
}

fn get(model: &Model, args: &str) -> ConsoleResult<String> {
    if args.is_empty() {
        return Err(ConsoleError::Usage("get <path>..."));
    }

    let lines: Vec<String> = args
        .split_whitespace()
        .map(|path| match model.get_id(path).and_then(|id| model.get_item(id).map(|v| (id, v))) {
            Some((id, value)) => format!("{:#x} - {}", id, value),
            None => format!("Path not found - {}", path),
        })
        .collect();
    Ok(lines.join("\n"))
}

fn set(model: &Model, args: &str) -> ConsoleResult<String> {
    let Some((path, raw)) = args.split_once(char::is_whitespace) else {
        return Err(ConsoleError::Usage("set <path> <value>"));
    };

    let id = model
        .get_id(path)
        .ok_or_else(|| ConsoleError::PathNotFound(path.to_string()))?;
    let current = model
        .get_item(id)
        .ok_or_else(|| ConsoleError::PathNotFound(path.to_string()))?;
    if current.is_container() {
        return Err(ConsoleError::Container {
            path: path.to_string(),
            kind: current.kind_name(),
        });
    }

    let value = coerce(&current, parse_value(raw.trim())?);
    if !current.same_kind(&value) {
        return Err(ConsoleError::TypeMismatch {
            path: path.to_string(),
            expected: current.kind_name(),
            found: value.kind_name(),
        });
    }

    let shown = format!("{:#x} - {}", id, value);
    model.update(vec![(id, value)]);
    Ok(shown)
}

/// Parse a `set` argument. Anything that is not JSON is taken as a string.
fn parse_value(raw: &str) -> ConsoleResult<Value> {
    let json = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => json,
        Err(_) => return Ok(Value::String(raw.to_string())),
    };
    match Literal::try_from(json) {
        Ok(Literal::Scalar(value)) => Ok(value),
        Ok(_) => Err(ConsoleError::InvalidValue(format!("{} is not a leaf value", raw))),
        Err(e) => Err(ConsoleError::InvalidValue(e.to_string())),
    }
}

/// Keep the float width of the value being replaced, and accept integers
/// where a float is expected.
fn coerce(current: &Value, value: Value) -> Value {
    match (current, value) {
        (Value::Float32(_), Value::Float64(v)) => Value::Float32(v as f32),
        (Value::Float32(_), other) => match other.as_integer() {
            Some(n) => Value::Float32(n as f32),
            None => other,
        },
        (Value::Float64(_), other) => match other.as_integer() {
            Some(n) => Value::Float64(n as f64),
            None => other,
        },
        (_, other) => other,
    }
}

fn command(model: &Model, args: &str) -> ConsoleResult<String> {
    let (kind, raw) = match args.split_once(char::is_whitespace) {
        Some((kind, raw)) => (kind, raw.trim()),
        None => (args, ""),
    };
    if kind.is_empty() {
        return Err(ConsoleError::Usage("command <type> [args]"));
    }

    let kind: i64 = kind
        .parse()
        .map_err(|_| ConsoleError::CommandType(kind.to_string()))?;
    let args = if raw.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(raw).map_err(|e| ConsoleError::InvalidValue(e.to_string()))?
    };

    model.command(kind, &args);
    Ok(format!("Sent command {} {}", kind, args))
}
