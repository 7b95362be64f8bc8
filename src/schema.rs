//! Per-type field schema.
//!
//! Every persisted entity declares its fields once, together with whether a
//! field belongs to the full-text projection and/or the exported projection.
//! The index and the export task only ever see these projections.

use chrono::SecondsFormat;
use serde_json::{Map, Value};

use crate::types::Post;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    /// copied into the full-text index
    pub searchable: bool,
    /// included when the entity is serialized for a user export
    pub exported: bool,
}

impl Field {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            searchable: false,
            exported: false,
        }
    }
    const fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }
    const fn exported(mut self) -> Self {
        self.exported = true;
        self
    }
}

pub trait Entity: Send + Sync {
    /// table name, doubles as the index collection name
    const COLLECTION: &'static str;
    const FIELDS: &'static [Field];

    fn id(&self) -> i64;
    /// value of a declared field, `None` for names that are not in `FIELDS`
    fn field(&self, name: &str) -> Option<Value>;
}

fn project<E: Entity>(entity: &E, include: impl Fn(&Field) -> bool) -> Map<String, Value> {
    E::FIELDS
        .iter()
        .filter(|field| include(field))
        .filter_map(|field| {
            entity
                .field(field.name)
                .map(|value| (field.name.to_string(), value))
        })
        .collect()
}

/// the document the index stores for this entity
pub fn searchable_projection<E: Entity>(entity: &E) -> Map<String, Value> {
    project(entity, |field| field.searchable)
}

pub fn exported_projection<E: Entity>(entity: &E) -> Map<String, Value> {
    project(entity, |field| field.exported)
}

pub fn is_searchable<E: Entity>() -> bool {
    E::FIELDS.iter().any(|field| field.searchable)
}

impl Entity for Post {
    const COLLECTION: &'static str = "post";
    const FIELDS: &'static [Field] = &[
        Field::new("id", FieldKind::Integer),
        Field::new("body", FieldKind::Text).searchable().exported(),
        Field::new("timestamp", FieldKind::Timestamp).exported(),
        Field::new("user_id", FieldKind::Integer),
        Field::new("language", FieldKind::Text),
    ];

    fn id(&self) -> i64 {
        self.id
    }

    fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "id" => Value::from(self.id),
            "body" => Value::from(self.body.clone()),
            "timestamp" => Value::from(self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)),
            "user_id" => Value::from(self.user_id.0),
            "language" => self
                .language
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::types::UserId;

    fn post() -> Post {
        Post {
            id: 3,
            body: "hello world".to_string(),
            timestamp: chrono::Utc
                .with_ymd_and_hms(2024, 11, 24, 20, 34, 36)
                .unwrap(),
            user_id: UserId(1),
            language: Some("en".to_string()),
        }
    }

    #[test]
    fn searchable_projection_of_post_is_only_the_body() {
        let projection = searchable_projection(&post());
        assert_eq!(projection.len(), 1);
        assert_eq!(projection["body"], "hello world");
    }

    #[test]
    fn exported_projection_has_body_and_utc_timestamp() {
        let projection = exported_projection(&post());
        assert_eq!(projection.len(), 2);
        assert_eq!(projection["body"], "hello world");
        assert_eq!(projection["timestamp"], "2024-11-24T20:34:36Z");
    }

    #[test]
    fn every_declared_field_has_a_value() {
        let post = post();
        for field in Post::FIELDS {
            assert!(
                post.field(field.name).is_some(),
                "{} has no value",
                field.name
            );
        }
        assert!(post.field("password_hash").is_none());
        assert!(is_searchable::<Post>());
    }
}
