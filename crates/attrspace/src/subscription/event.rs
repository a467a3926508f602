//! Change event types for the notification bus.
//!
//! Provides the data flowing through an [`AttributeSpace`](super::AttributeSpace):
//! - [`ChangeEvent`]: tagged union of attribute and relation mutations
//! - [`FieldRef`]: borrowed view of a single event field, used by exact-field
//!   pattern predicates
//! - [`Notification`]: what a subscriber callback receives (event plus
//!   batch metadata)
//!
//! Events are plain data. Their JSON form is internally tagged by `"type"`
//! with camelCase field names, which is what transport adapters produce:
//!
//! ```json
//! { "type": "attribute", "entityType": "Cliente", "entityId": "c1",
//!   "attributeName": "email", "newValue": "a@b.com" }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::subscription::registry::SubscriptionId;
use crate::Error;

// ---------------------------------------------------------------------------
// ChangeType / EventKind
// ---------------------------------------------------------------------------

/// Kind of mutation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// The attribute or relation was created.
    Create,
    /// The value changed (default when a payload does not say).
    #[default]
    Update,
    /// The attribute or relation was removed.
    Delete,
}

impl ChangeType {
    /// Returns the wire name (`create`, `update`, `delete`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Entity attribute mutation.
    Attribute,
    /// Relation mutation.
    Relation,
}

impl EventKind {
    /// Returns the wire name (`attribute`, `relation`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attribute => "attribute",
            Self::Relation => "relation",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AttributeChange
// ---------------------------------------------------------------------------

/// Mutation of a single entity attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeChange {
    /// Entity type (schema name), when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Entity instance identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Name of the changed attribute.
    pub attribute_name: String,
    /// Value after the change (`null` for deletes).
    #[serde(default)]
    pub new_value: Value,
    /// Value before the change, when the producer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Kind of mutation.
    #[serde(default)]
    pub change_type: ChangeType,
}

impl AttributeChange {
    /// Creates an `update` change for `attribute_name` with no entity info.
    #[must_use]
    pub fn new(attribute_name: impl Into<String>, new_value: impl Into<Value>) -> Self {
        Self {
            entity_type: None,
            entity_id: None,
            attribute_name: attribute_name.into(),
            new_value: new_value.into(),
            old_value: None,
            change_type: ChangeType::Update,
        }
    }

    /// Sets the entity type and id.
    #[must_use]
    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Sets the entity type only.
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Sets the entity id only.
    #[must_use]
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Sets the previous value.
    #[must_use]
    pub fn with_old_value(mut self, old_value: impl Into<Value>) -> Self {
        self.old_value = Some(old_value.into());
        self
    }

    /// Sets the change type.
    #[must_use]
    pub fn with_change_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = change_type;
        self
    }
}

// ---------------------------------------------------------------------------
// RelationChange
// ---------------------------------------------------------------------------

/// Mutation of a relation between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationChange {
    /// Relation type name.
    pub relation_type: String,
    /// Source entity id.
    pub source_entity_id: String,
    /// Target entity id.
    pub target_entity_id: String,
    /// Relation attribute that changed, if the change is attribute-level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
    /// New attribute value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Kind of mutation.
    #[serde(default)]
    pub change_type: ChangeType,
}

impl RelationChange {
    /// Creates an `update` change for the relation `source -[relation_type]-> target`.
    #[must_use]
    pub fn new(
        relation_type: impl Into<String>,
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
    ) -> Self {
        Self {
            relation_type: relation_type.into(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            attribute_name: None,
            new_value: None,
            change_type: ChangeType::Update,
        }
    }

    /// Sets the changed relation attribute and its new value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute_name = Some(name.into());
        self.new_value = Some(value.into());
        self
    }

    /// Sets the change type.
    #[must_use]
    pub fn with_change_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = change_type;
        self
    }
}

// ---------------------------------------------------------------------------
// ChangeEvent
// ---------------------------------------------------------------------------

/// A single attribute or relation mutation flowing through the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeEvent {
    /// Entity attribute mutation.
    Attribute(AttributeChange),
    /// Relation mutation.
    Relation(RelationChange),
}

impl ChangeEvent {
    /// Validates a loosely shaped JSON payload into a change event.
    ///
    /// The `"type"` tag is optional: payloads carrying `relationType` are
    /// read as relation changes, everything else as attribute changes.
    /// A missing `changeType` defaults to `update`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the payload is not an object, has
    /// an unknown `"type"`, or lacks a required field.
    pub fn from_json(payload: Value) -> Result<Self, Error> {
        if !payload.is_object() {
            return Err(Error::InvalidPayload(format!(
                "expected a JSON object, got {payload}"
            )));
        }

        let kind = match payload.get("type").and_then(Value::as_str) {
            Some("attribute") => EventKind::Attribute,
            Some("relation") => EventKind::Relation,
            Some(other) => {
                return Err(Error::InvalidPayload(format!(
                    "unknown event type '{other}'"
                )))
            }
            None if payload.get("relationType").is_some() => EventKind::Relation,
            None => EventKind::Attribute,
        };

        let parsed = match kind {
            EventKind::Attribute => serde_json::from_value(payload).map(Self::Attribute),
            EventKind::Relation => serde_json::from_value(payload).map(Self::Relation),
        };
        parsed.map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    /// Returns the event discriminant.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Attribute(_) => EventKind::Attribute,
            Self::Relation(_) => EventKind::Relation,
        }
    }

    /// Returns the change type.
    #[must_use]
    pub fn change_type(&self) -> ChangeType {
        match self {
            Self::Attribute(a) => a.change_type,
            Self::Relation(r) => r.change_type,
        }
    }

    /// Returns the entity type of an attribute change.
    #[must_use]
    pub fn entity_type(&self) -> Option<&str> {
        match self {
            Self::Attribute(a) => a.entity_type.as_deref(),
            Self::Relation(_) => None,
        }
    }

    /// Returns the entity id of an attribute change.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Self::Attribute(a) => a.entity_id.as_deref(),
            Self::Relation(_) => None,
        }
    }

    /// Returns the attribute name, if the event carries one.
    #[must_use]
    pub fn attribute_name(&self) -> Option<&str> {
        match self {
            Self::Attribute(a) => Some(a.attribute_name.as_str()),
            Self::Relation(r) => r.attribute_name.as_deref(),
        }
    }

    /// Returns the relation type of a relation change.
    #[must_use]
    pub fn relation_type(&self) -> Option<&str> {
        match self {
            Self::Attribute(_) => None,
            Self::Relation(r) => Some(r.relation_type.as_str()),
        }
    }

    /// Returns the new value, if the event carries one.
    #[must_use]
    pub fn new_value(&self) -> Option<&Value> {
        match self {
            Self::Attribute(a) => Some(&a.new_value),
            Self::Relation(r) => r.new_value.as_ref(),
        }
    }

    /// Returns the name that, together with the entity id, identifies what
    /// changed: the attribute name when the event carries one, otherwise the
    /// relation type.
    #[must_use]
    pub fn discriminator(&self) -> &str {
        match self {
            Self::Attribute(a) => &a.attribute_name,
            Self::Relation(r) => r.attribute_name.as_deref().unwrap_or(&r.relation_type),
        }
    }

    /// Looks up a field by name.
    ///
    /// Accepts camelCase names (`entityType`) and their snake_case
    /// spellings (`entity_type`). Returns `None` for unknown names and for
    /// fields this event does not carry.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<FieldRef<'_>> {
        if name == "type" {
            return Some(FieldRef::Str(self.kind().as_str()));
        }
        if matches!(name, "changeType" | "change_type") {
            return Some(FieldRef::Str(self.change_type().as_str()));
        }

        match self {
            Self::Attribute(a) => match name {
                "entityType" | "entity_type" => a.entity_type.as_deref().map(FieldRef::Str),
                "entityId" | "entity_id" => a.entity_id.as_deref().map(FieldRef::Str),
                "attributeName" | "attribute_name" => Some(FieldRef::Str(&a.attribute_name)),
                "newValue" | "new_value" => Some(FieldRef::Json(&a.new_value)),
                "oldValue" | "old_value" => a.old_value.as_ref().map(FieldRef::Json),
                _ => None,
            },
            Self::Relation(r) => match name {
                "relationType" | "relation_type" => Some(FieldRef::Str(&r.relation_type)),
                "sourceEntityId" | "source_entity_id" => Some(FieldRef::Str(&r.source_entity_id)),
                "targetEntityId" | "target_entity_id" => Some(FieldRef::Str(&r.target_entity_id)),
                "attributeName" | "attribute_name" => r.attribute_name.as_deref().map(FieldRef::Str),
                "newValue" | "new_value" => r.new_value.as_ref().map(FieldRef::Json),
                _ => None,
            },
        }
    }
}

impl From<AttributeChange> for ChangeEvent {
    fn from(change: AttributeChange) -> Self {
        Self::Attribute(change)
    }
}

impl From<RelationChange> for ChangeEvent {
    fn from(change: RelationChange) -> Self {
        Self::Relation(change)
    }
}

// ---------------------------------------------------------------------------
// FieldRef
// ---------------------------------------------------------------------------

/// Borrowed view of one event field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRef<'a> {
    /// String-typed field (names, ids, tags).
    Str(&'a str),
    /// Arbitrary JSON value (attribute values).
    Json(&'a Value),
}

impl FieldRef<'_> {
    /// Strict equality against a required pattern value.
    ///
    /// String fields only equal JSON strings; no type coercion is applied.
    #[must_use]
    pub fn equals(&self, expected: &Value) -> bool {
        match self {
            FieldRef::Str(s) => expected.as_str() == Some(*s),
            FieldRef::Json(v) => *v == expected,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Delivery payload handed to subscriber callbacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Subscription being notified.
    pub subscription_id: SubscriptionId,
    /// The matching event (the most recent one for batched delivery).
    #[serde(flatten)]
    pub event: ChangeEvent,
    /// Number of matching events merged into this delivery (1 when
    /// delivered immediately).
    pub batch_count: u32,
}

impl Notification {
    /// Creates an unbatched notification.
    #[must_use]
    pub fn immediate(subscription_id: SubscriptionId, event: ChangeEvent) -> Self {
        Self {
            subscription_id,
            event,
            batch_count: 1,
        }
    }

    /// Shortcut for [`ChangeEvent::new_value`].
    #[must_use]
    pub fn new_value(&self) -> Option<&Value> {
        self.event.new_value()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
