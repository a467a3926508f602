//! Subscription patterns and the pure matcher.
//!
//! A [`PatternSpec`] is a conjunction of optional predicates:
//!
//! - **Exact fields**: `field = value` on any [`ChangeEvent::field`] name
//!   (`entityType`, `attributeName`, `changeType`, `relationType`, `type`, ...).
//!   Fields absent from the pattern are wildcards.
//! - **Attribute-name glob**: `indirizzo_*`, where `*` matches any substring.
//!   Compiled once into an anchored regex when the subscription is created.
//! - **Custom predicate**: any `Fn(&ChangeEvent) -> bool`.
//!
//! The legacy string form `"eventType:entityType"` (e.g. `attribute:Cliente`)
//! desugars into exact fields via [`PatternSpec::parse_legacy`].
//!
//! Matching never mutates anything; [`CompiledPattern::matches`] gives the
//! same answer for the same event every time (provided custom predicates are
//! pure).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::subscription::event::{ChangeEvent, ChangeType, EventKind};

/// Custom match predicate.
pub type CustomPredicate = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// PatternError
// ---------------------------------------------------------------------------

/// Errors raised while building or compiling a pattern.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    /// The pattern has no predicate at all.
    #[error("pattern has no predicates; use subscribe_legacy to match every event")]
    Empty,
    /// A legacy `eventType:entityType` string could not be parsed.
    #[error("malformed legacy pattern '{0}'")]
    MalformedLegacy(String),
    /// The attribute-name glob did not compile.
    #[error("invalid attribute name pattern: {0}")]
    Glob(#[from] regex::Error),
}

// ---------------------------------------------------------------------------
// PatternSpec
// ---------------------------------------------------------------------------

/// Declarative description of which events a subscriber wants.
///
/// # Example
///
/// ```rust
/// use attrspace::PatternSpec;
///
/// let pattern = PatternSpec::new()
///     .entity_type("Cliente")
///     .attribute_name_pattern("indirizzo_*");
/// assert!(!pattern.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct PatternSpec {
    exact_fields: BTreeMap<String, Value>,
    attribute_name_pattern: Option<String>,
    custom: Option<CustomPredicate>,
}

impl PatternSpec {
    /// Creates an empty pattern (rejected by `subscribe` until a predicate
    /// is added).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `event.field(name) == value`.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.exact_fields.insert(name.into(), value.into());
        self
    }

    /// Requires the given entity type.
    #[must_use]
    pub fn entity_type(self, entity_type: impl Into<String>) -> Self {
        self.field("entityType", entity_type.into())
    }

    /// Requires the given entity id.
    #[must_use]
    pub fn entity_id(self, entity_id: impl Into<String>) -> Self {
        self.field("entityId", entity_id.into())
    }

    /// Requires the exact attribute name.
    #[must_use]
    pub fn attribute_name(self, attribute_name: impl Into<String>) -> Self {
        self.field("attributeName", attribute_name.into())
    }

    /// Requires the given change type.
    #[must_use]
    pub fn change_type(self, change_type: ChangeType) -> Self {
        self.field("changeType", change_type.as_str())
    }

    /// Requires the event kind (`type`).
    #[must_use]
    pub fn kind(self, kind: EventKind) -> Self {
        self.field("type", kind.as_str())
    }

    /// Requires a relation event with the given relation type.
    #[must_use]
    pub fn relation_type(self, relation_type: impl Into<String>) -> Self {
        self.kind(EventKind::Relation)
            .field("relationType", relation_type.into())
    }

    /// Requires the attribute name to match a glob (`*` = any substring).
    #[must_use]
    pub fn attribute_name_pattern(mut self, glob: impl Into<String>) -> Self {
        self.attribute_name_pattern = Some(glob.into());
        self
    }

    /// Adds a custom predicate, ANDed with the other predicates.
    #[must_use]
    pub fn custom<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(predicate));
        self
    }

    /// Parses the legacy `eventType:entityType` string form.
    ///
    /// `"attribute:Cliente"` requires `type = attribute` and
    /// `entityType = Cliente`; a bare `"relation"` requires only the type.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::MalformedLegacy`] for empty segments or more
    /// than one `:`.
    pub fn parse_legacy(pattern: &str) -> Result<Self, PatternError> {
        let malformed = || PatternError::MalformedLegacy(pattern.to_string());

        let mut parts = pattern.split(':');
        let event_type = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let entity_type = parts.next().map(str::trim);
        if parts.next().is_some() {
            return Err(malformed());
        }

        let event_type = event_type.ok_or_else(malformed)?;
        let mut spec = Self::new().field("type", event_type);
        match entity_type {
            None => {}
            Some("") => return Err(malformed()),
            Some(entity_type) => spec = spec.entity_type(entity_type),
        }
        Ok(spec)
    }

    /// Returns `true` if no predicate has been specified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact_fields.is_empty() && self.attribute_name_pattern.is_none() && self.custom.is_none()
    }

    /// Returns the required exact field values.
    #[must_use]
    pub fn exact_fields(&self) -> &BTreeMap<String, Value> {
        &self.exact_fields
    }

    /// Compiles the pattern for matching.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::Glob`] if the attribute-name glob cannot be
    /// compiled.
    pub fn compile(self) -> Result<CompiledPattern, PatternError> {
        let glob = self
            .attribute_name_pattern
            .as_deref()
            .map(glob_to_regex)
            .transpose()?;
        Ok(CompiledPattern { spec: self, glob })
    }
}

impl fmt::Debug for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternSpec")
            .field("exact_fields", &self.exact_fields)
            .field("attribute_name_pattern", &self.attribute_name_pattern)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .exact_fields
            .iter()
            .map(|(name, value)| match value {
                Value::String(s) => format!("{name}={s}"),
                other => format!("{name}={other}"),
            })
            .collect();
        if let Some(glob) = &self.attribute_name_pattern {
            parts.push(format!("attributeName~{glob}"));
        }
        if self.custom.is_some() {
            parts.push("custom".to_string());
        }
        if parts.is_empty() {
            f.write_str("<empty>")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

// ---------------------------------------------------------------------------
// CompiledPattern
// ---------------------------------------------------------------------------

/// A [`PatternSpec`] ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    spec: PatternSpec,
    glob: Option<Regex>,
}

impl CompiledPattern {
    /// Pattern matching every event (legacy catch-all).
    #[must_use]
    pub fn match_all() -> Self {
        Self {
            spec: PatternSpec::new().custom(|_| true),
            glob: None,
        }
    }

    /// Evaluates the pattern against an event. All predicates are ANDed.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let fields_match = self.spec.exact_fields.iter().all(|(name, expected)| {
            event
                .field(name)
                .is_some_and(|actual| actual.equals(expected))
        });
        if !fields_match {
            return false;
        }

        if let Some(glob) = &self.glob {
            match event.attribute_name() {
                Some(name) if glob.is_match(name) => {}
                _ => return false,
            }
        }

        self.spec.custom.as_ref().map_or(true, |predicate| predicate(event))
    }

    /// Returns the source spec.
    #[must_use]
    pub fn spec(&self) -> &PatternSpec {
        &self.spec
    }

    /// Human-readable summary used by introspection.
    #[must_use]
    pub fn summary(&self) -> String {
        self.spec.to_string()
    }
}

/// Evaluates `pattern` against `event`.
#[must_use]
pub fn matches(pattern: &CompiledPattern, event: &ChangeEvent) -> bool {
    pattern.matches(event)
}

/// Compiles a `*` glob into an anchored regex. Every other character is
/// literal.
///
/// # Errors
///
/// Returns the regex error if compilation fails (e.g. size limits).
pub fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(glob.len() + 8);
    source.push_str("(?s)^");
    for (i, literal) in glob.split('*').enumerate() {
        if i > 0 {
            source.push_str(".*");
        }
        source.push_str(&regex::escape(literal));
    }
    source.push('$');
    Regex::new(&source)
}

// ===========================================================================
// Tests
// ===========================================================================
