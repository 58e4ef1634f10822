//! Update-document compilation into the store's expression dialect
//!
//! A [`UpdateDoc`] is an ordered list of `(field, value)` entries. The field
//! string carries the operation:
//!
//! - `name` — plain assignment
//! - `+name` — numeric increment (`name = name + :v`)
//! - `list_append name` — list append (`name = list_append(name, :v)`)
//!
//! Field paths may be nested and indexed (`a.b[2].c`). [`compile`] expands
//! every non-index segment into a fresh `#N` name placeholder so that
//! reserved words in the store's dialect can never collide with attribute
//! names, and binds every value behind a fresh `:N` placeholder. One
//! monotonically increasing counter feeds both namespaces, so placeholders
//! are globally unique within a single compilation.
//!
//! The entry for the table's key attribute is mandatory. It is never an
//! assignment target; it supplies the record key and the
//! `attribute_exists(...)` guard that makes every compiled update an
//! update-only write.

use crate::error::UpdateError;
use serde_json::Value;
use std::collections::HashMap;

/// Field prefix marking a numeric increment
const INCREMENT_SIGIL: char = '+';

/// Field prefix marking a list append
const LIST_APPEND_SIGIL: &str = "list_append ";

/// An ordered update document: field paths (optionally sigil-prefixed)
/// mapped to their new values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateDoc {
    entries: Vec<(String, Value)>,
}

impl UpdateDoc {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw entry. The field string is interpreted by [`compile`],
    /// including any operation sigil it carries.
    pub fn entry(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((field.into(), value.into()));
        self
    }

    /// Plain assignment of `path` to `value`
    pub fn set(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entry(path, value)
    }

    /// Increment the number at `path` by `delta`
    pub fn increment(self, path: &str, delta: impl Into<Value>) -> Self {
        self.entry(format!("{INCREMENT_SIGIL}{path}"), delta)
    }

    /// Append `values` to the list at `path`
    pub fn append(self, path: &str, values: impl Into<Value>) -> Self {
        self.entry(format!("{LIST_APPEND_SIGIL}{path}"), values)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<F: Into<String>, V: Into<Value>> FromIterator<(F, V)> for UpdateDoc {
    fn from_iter<I: IntoIterator<Item = (F, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(f, v)| (f.into(), v.into()))
                .collect(),
        }
    }
}

/// The result of compiling an [`UpdateDoc`]
///
/// Invariant: every placeholder referenced by `update_expression` or
/// `condition_expression` has exactly one binding in `names` or `values`,
/// and `condition_expression` always carries the key-existence guard.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CompiledUpdate {
    /// The table's key attribute name
    pub key_attribute: String,
    /// The key value addressing the record
    pub key_value: Value,
    /// `SET`-form update expression over placeholders
    pub update_expression: String,
    /// Existence guard, optionally ANDed with a caller condition
    pub condition_expression: String,
    /// `#N` placeholder → attribute name segment
    pub names: HashMap<String, String>,
    /// `:N` placeholder → bound value
    pub values: HashMap<String, Value>,
}

/// Caller-built native update parameters, applied by the backend verbatim.
///
/// This is the explicit escape hatch for expressions [`compile`] cannot
/// produce; nothing is validated or rewritten on this path.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawUpdate {
    /// The table's key attribute name
    pub key_attribute: String,
    /// The key value addressing the record
    pub key_value: Value,
    /// Full native update expression
    pub update_expression: String,
    /// Optional native condition expression
    pub condition_expression: Option<String>,
    /// `#N` placeholder → attribute name segment
    pub names: HashMap<String, String>,
    /// `:N` placeholder → bound value
    pub values: HashMap<String, Value>,
}

/// Update parameters accepted by [`StoreClient::update`](crate::StoreClient::update)
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum UpdateParams {
    /// Produced by [`compile`]
    Compiled(CompiledUpdate),
    /// Caller-built, passed through unchanged
    Raw(RawUpdate),
}

impl UpdateParams {
    pub fn key_attribute(&self) -> &str {
        match self {
            Self::Compiled(c) => &c.key_attribute,
            Self::Raw(r) => &r.key_attribute,
        }
    }

    pub fn key_value(&self) -> &Value {
        match self {
            Self::Compiled(c) => &c.key_value,
            Self::Raw(r) => &r.key_value,
        }
    }

    pub fn update_expression(&self) -> &str {
        match self {
            Self::Compiled(c) => &c.update_expression,
            Self::Raw(r) => &r.update_expression,
        }
    }

    pub fn condition_expression(&self) -> Option<&str> {
        match self {
            Self::Compiled(c) => Some(&c.condition_expression),
            Self::Raw(r) => r.condition_expression.as_deref(),
        }
    }

    pub fn names(&self) -> &HashMap<String, String> {
        match self {
            Self::Compiled(c) => &c.names,
            Self::Raw(r) => &r.names,
        }
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        match self {
            Self::Compiled(c) => &c.values,
            Self::Raw(r) => &r.values,
        }
    }
}

impl From<CompiledUpdate> for UpdateParams {
    fn from(compiled: CompiledUpdate) -> Self {
        Self::Compiled(compiled)
    }
}

impl From<RawUpdate> for UpdateParams {
    fn from(raw: RawUpdate) -> Self {
        Self::Raw(raw)
    }
}

/// Compile an update document into native update/condition parameters.
///
/// `condition`, when supplied, is a condition-expression template whose
/// `{{token}}` markers are each replaced by a fresh value placeholder bound
/// to `token` (coerced to a number when the token parses fully as one). The
/// rendered condition is ANDed onto the key-existence guard.
///
/// An increment entry whose value is not numeric is dropped without an
/// assignment. This mirrors the behavior conditional writers have come to
/// depend on; a warning is logged so the drop is at least observable.
pub fn compile(
    key_attribute: &str,
    doc: &UpdateDoc,
    condition: Option<&str>,
) -> Result<CompiledUpdate, UpdateError> {
    let mut counter = 0usize;
    let mut names = HashMap::new();
    let mut values = HashMap::new();
    let mut assignments = Vec::new();
    let mut key_entry: Option<(usize, Value)> = None;

    for (field, value) in doc.iter() {
        if field == key_attribute {
            names.insert(format!("#{counter}"), field.to_string());
            key_entry = Some((counter, value.clone()));
            counter += 1;
            continue;
        }

        if let Some(path) = field.strip_prefix(INCREMENT_SIGIL) {
            if !value.is_number() {
                tracing::warn!(field, "dropping increment entry with non-numeric value");
                continue;
            }
            let path = expand_path(path, &mut counter, &mut names);
            assignments.push(format!("{path} = {path} + :{counter}"));
        } else if let Some(path) = field.strip_prefix(LIST_APPEND_SIGIL) {
            let path = expand_path(path, &mut counter, &mut names);
            assignments.push(format!("{path} = list_append({path}, :{counter})"));
        } else {
            let path = expand_path(field, &mut counter, &mut names);
            assignments.push(format!("{path} = :{counter}"));
        }
        values.insert(format!(":{counter}"), value.clone());
        counter += 1;
    }

    let (key_index, key_value) = key_entry.ok_or_else(|| UpdateError::MissingKeyAttribute {
        attribute: key_attribute.to_string(),
    })?;

    let mut condition_expression = format!("attribute_exists(#{key_index})");
    if let Some(template) = condition {
        condition_expression.push_str(" AND ");
        condition_expression.push_str(&render_condition(template, &mut counter, &mut values));
    }

    Ok(CompiledUpdate {
        key_attribute: key_attribute.to_string(),
        key_value,
        update_expression: format!("SET {}", assignments.join(", ")),
        condition_expression,
        names,
        values,
    })
}

/// Expand a dotted field path into a placeholder path.
///
/// Each segment's bracket-index suffix (if any) stays verbatim on the
/// placeholder: `b[3]` becomes `#N[3]` with `#N` bound to `b`.
fn expand_path(path: &str, counter: &mut usize, names: &mut HashMap<String, String>) -> String {
    let mut parts = Vec::new();
    for segment in path.split('.') {
        let bare_len = segment.find('[').unwrap_or(segment.len());
        let (bare, indices) = segment.split_at(bare_len);
        let placeholder = format!("#{counter}");
        names.insert(placeholder.clone(), bare.to_string());
        *counter += 1;
        parts.push(format!("{placeholder}{indices}"));
    }
    parts.join(".")
}

/// Replace `{{token}}` markers with fresh value placeholders.
///
/// A marker left unclosed is kept verbatim.
fn render_condition(
    template: &str,
    counter: &mut usize,
    values: &mut HashMap<String, Value>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(end) = tail.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let token = &tail[..end];
        let placeholder = format!(":{counter}");
        *counter += 1;
        values.insert(placeholder.clone(), coerce_token(token));
        out.push_str(&placeholder);
        rest = &tail[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Coerce a condition token to a number when it parses fully as one
fn coerce_token(token: &str) -> Value {
    if let Ok(n) = token.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = token.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(token.to_string())
}
