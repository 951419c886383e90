//! The `Diagram` value type and name derivation rules.

use std::fmt;

/// Characters that would make a name look like a nested path, both on disk
/// and in the target application's name field.
const PATH_SEPARATORS: [char; 2] = ['/', '\\'];

/// Replacement for path separators in derived names.
pub const SAFE_SEPARATOR: char = '-';

/// A named binary diagram.
///
/// The same type carries the raw legacy payload (from the dataset), the
/// recovered payload (read back from a previous run's artifact) and the
/// converted payload. Stages never mutate a `Diagram`; they build a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct Diagram {
    pub name: String,
    pub payload: Vec<u8>,
}

impl Diagram {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// File stem this diagram is checkpointed under in the output directory.
    pub fn artifact_stem(&self) -> String {
        sanitize_name(&self.name)
    }

    /// Same name, new payload.
    pub fn with_payload(&self, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: self.name.clone(),
            payload: payload.into(),
        }
    }
}

impl fmt::Debug for Diagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagram")
            .field("name", &self.name)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

/// Replace path separators so `name` can be used as a flat file stem or form value.
///
/// Pure: the same input always yields the same output, which is what makes
/// the output directory usable as a resumability checkpoint across runs.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if PATH_SEPARATORS.contains(&c) {
                SAFE_SEPARATOR
            } else {
                c
            }
        })
        .collect()
}

/// Pick the record name: the primary field, or the fallback when the
/// primary is empty. Both are trimmed. Returns `None` when both are empty.
pub fn derive_name(primary: Option<&str>, fallback: Option<&str>) -> Option<String> {
    [primary, fallback]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
