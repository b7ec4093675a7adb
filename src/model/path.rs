//! Path expressions
//!
//! A path starts at the root `$` and is followed by any number of `.name`
//! (dict key) or `[index]` (list index) segments, e.g.
//! `$.Inventory.sortedIDS[3]`.

use super::value::Segment;

/// Marker for the graph root
pub const ROOT_PATH: &str = "$";

/// Parse a path expression into segments.
///
/// Returns `None` for anything that is not a well-formed path; keys are
/// ASCII alphanumerics or `_`, indexes are decimal.
pub fn parse(path: &str) -> Option<Vec<Segment>> {
    let mut rest = path.strip_prefix(ROOT_PATH)?;
    let mut segments = Vec::new();

    while let Some(first) = rest.chars().next() {
        match first {
            '.' => {
                let body = &rest[1..];
                let end = body
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(body.len());
                if end == 0 {
                    return None;
                }
                segments.push(Segment::Key(body[..end].to_string()));
                rest = &body[end..];
            }
            '[' => {
                let body = &rest[1..];
                let end = body.find(']')?;
                let digits = &body[..end];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                segments.push(Segment::Index(digits.parse().ok()?));
                rest = &body[end + 1..];
            }
            _ => return None,
        }
    }

    Some(segments)
}
