//! Schema-guided rewriting of asset URLs between two base URLs.

use serde_json::{Map, Value};

use crate::engine::schema::{FieldSchema, LeafKind, SchemaBundle};

/// Sub-fields of asset leaves that may carry a URL.
const URL_FIELDS: &[&str] = &["url", "src", "srcset"];

/// Bounds reference chains that never reach a concrete object schema.
const MAX_DEPTH: usize = 64;

/// Returns a copy of `value` with every occurrence of `from` replaced by `to` inside the
/// URL-bearing leaves that `schema` declares. Embedded references are rewritten against
/// the referenced collection's schema in `bundle`. Values the schema does not describe
/// are copied unchanged.
pub fn rewrite(value: &Value, schema: &FieldSchema, bundle: &SchemaBundle, from: &str, to: &str) -> Value {
    if from.is_empty() || from == to {
        return value.clone();
    }
    walk(value, schema, bundle, from, to, 0)
}

fn walk(value: &Value, schema: &FieldSchema, bundle: &SchemaBundle, from: &str, to: &str, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return value.clone();
    }

    match (schema, value) {
        (FieldSchema::Array { items }, Value::Array(elements)) => Value::Array(
            elements
                .iter()
                .map(|element| walk(element, items, bundle, from, to, depth + 1))
                .collect(),
        ),
        (FieldSchema::Object { properties, .. }, Value::Object(fields)) => {
            let mut out = Map::with_capacity(fields.len());
            for (name, field) in fields {
                let rewritten = match properties.get(name) {
                    Some(field_schema) => walk(field, field_schema, bundle, from, to, depth + 1),
                    None => field.clone(),
                };
                out.insert(name.clone(), rewritten);
            }
            Value::Object(out)
        }
        // A bare id carries no URLs.
        (FieldSchema::Reference { collection }, Value::Object(_)) => match bundle.collection(collection) {
            Some(target) => walk(value, &target.schema, bundle, from, to, depth + 1),
            None => value.clone(),
        },
        _ => match schema.leaf_kind() {
            Some(kind) => rewrite_leaf(kind, value, from, to),
            None => value.clone(),
        },
    }
}

fn rewrite_leaf(kind: LeafKind, value: &Value, from: &str, to: &str) -> Value {
    match (kind, value) {
        (LeafKind::Image | LeafKind::Video | LeafKind::File, Value::Object(fields)) => {
            let mut out = fields.clone();
            for field in URL_FIELDS {
                if let Some(Value::String(s)) = out.get_mut(*field) {
                    *s = replace_base(s, from, to);
                }
            }
            Value::Object(out)
        }
        (LeafKind::RichText | LeafKind::Markdown, Value::String(text)) => {
            Value::String(replace_base(text, from, to))
        }
        _ => value.clone(),
    }
}

/// Replaces `from` with `to` until no occurrence of `from` remains. When `to` itself
/// contains `from` a single pass is made, since repeating would never terminate.
pub fn replace_base(text: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return text.to_string();
    }
    let mut out = text.replace(from, to);
    if to.contains(from) {
        return out;
    }
    while out.contains(from) {
        out = out.replace(from, to);
    }
    out
}
