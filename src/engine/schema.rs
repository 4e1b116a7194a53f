//! Structural schema for collections and globals, and write-time validation.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::persistence::{check_component, RESERVED_NAMES};
use crate::{Error, Result};

const MAX_DEPTH: usize = 64;

/// Structural type of a value.
///
/// The asset-bearing leaves (`Image`, `Video`, `File`) and the text leaves (`RichText`,
/// `Markdown`) are distinct variants so that URL rewriting can dispatch on the schema
/// alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldSchema {
    String,
    Number,
    Integer,
    Boolean,
    Any,
    Object {
        #[serde(default)]
        properties: BTreeMap<String, FieldSchema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
    },
    Array {
        items: Box<FieldSchema>,
    },
    /// Relationship to an entry of another collection.
    Reference {
        collection: String,
    },
    Image,
    Video,
    File,
    RichText,
    Markdown,
}

/// Leaf kinds that carry asset URLs or free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    Image,
    Video,
    File,
    RichText,
    Markdown,
}

impl FieldSchema {
    /// Builds an object schema from `(name, schema)` pairs, none required.
    pub fn object<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldSchema)>,
        K: Into<String>,
    {
        FieldSchema::Object {
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            required: Vec::new(),
        }
    }

    /// Marks the given properties of an object schema as required.
    pub fn require(mut self, names: &[&str]) -> Self {
        if let FieldSchema::Object { required, .. } = &mut self {
            required.extend(names.iter().map(|n| n.to_string()));
        }
        self
    }

    pub fn array(items: FieldSchema) -> Self {
        FieldSchema::Array {
            items: Box::new(items),
        }
    }

    pub fn reference(collection: &str) -> Self {
        FieldSchema::Reference {
            collection: collection.to_string(),
        }
    }

    /// The asset or text leaf kind of this schema, if any.
    pub fn leaf_kind(&self) -> Option<LeafKind> {
        match self {
            FieldSchema::Image => Some(LeafKind::Image),
            FieldSchema::Video => Some(LeafKind::Video),
            FieldSchema::File => Some(LeafKind::File),
            FieldSchema::RichText => Some(LeafKind::RichText),
            FieldSchema::Markdown => Some(LeafKind::Markdown),
            _ => None,
        }
    }
}

/// A declared collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDef {
    pub name: String,
    /// Schema field whose value identifies an entry.
    pub id_field: String,
    pub schema: FieldSchema,
}

impl CollectionDef {
    pub fn new(name: &str, id_field: &str, schema: FieldSchema) -> Self {
        Self {
            name: name.to_string(),
            id_field: id_field.to_string(),
            schema,
        }
    }

    /// Extracts an entry's id as a string.
    pub fn entry_id(&self, entry: &Value) -> Option<String> {
        match entry.get(&self.id_field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// A declared global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDef {
    pub name: String,
    pub schema: FieldSchema,
}

impl GlobalDef {
    pub fn new(name: &str, schema: FieldSchema) -> Self {
        Self {
            name: name.to_string(),
            schema,
        }
    }
}

/// Every collection and global of a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaBundle {
    #[serde(default)]
    pub collections: Vec<CollectionDef>,
    #[serde(default)]
    pub globals: Vec<GlobalDef>,
}

impl SchemaBundle {
    /// Loads a bundle from a JSON file. A missing file yields an empty bundle.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)?;
        let bundle: Self = serde_json::from_slice(&bytes)?;
        bundle.check()?;
        Ok(bundle)
    }

    /// Rejects names that cannot map to their own place on disk: reserved or malformed
    /// collection names, malformed global names, and duplicates of either.
    pub fn check(&self) -> Result<()> {
        let mut problems = Vec::new();

        let mut collections = HashSet::new();
        for def in &self.collections {
            if RESERVED_NAMES.contains(&def.name.as_str()) {
                problems.push(format!("collection name {:?} is reserved", def.name));
            } else if check_component(&def.name).is_err() {
                problems.push(format!("collection name {:?} is not a plain name", def.name));
            }
            if !collections.insert(def.name.as_str()) {
                problems.push(format!("collection {:?} is declared more than once", def.name));
            }
        }

        let mut globals = HashSet::new();
        for def in &self.globals {
            if check_component(&def.name).is_err() {
                problems.push(format!("global name {:?} is not a plain name", def.name));
            }
            if !globals.insert(def.name.as_str()) {
                problems.push(format!("global {:?} is declared more than once", def.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation {
                target: "schema".to_string(),
                details: problems,
            })
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionDef> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalDef> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Validates an entry against its collection's schema.
    pub fn validate_entry(&self, collection: &str, data: &Value) -> Result<()> {
        let def = self
            .collection(collection)
            .ok_or_else(|| Error::UnknownCollection(collection.to_string()))?;
        self.validate(&def.schema, data, format!("collection {collection}"))
    }

    /// Validates a global value against its schema.
    pub fn validate_global(&self, name: &str, value: &Value) -> Result<()> {
        let def = self
            .global(name)
            .ok_or_else(|| Error::UnknownGlobal(name.to_string()))?;
        self.validate(&def.schema, value, format!("global {name}"))
    }

    fn validate(&self, schema: &FieldSchema, value: &Value, target: String) -> Result<()> {
        let mut ctx = ValidationContext::new(self);
        ctx.walk(schema, value, 0);
        if ctx.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation {
                target,
                details: ctx.errors,
            })
        }
    }
}

struct ValidationContext<'a> {
    bundle: &'a SchemaBundle,
    errors: Vec<String>,
    path: Vec<String>,
}

impl<'a> ValidationContext<'a> {
    fn new(bundle: &'a SchemaBundle) -> Self {
        Self {
            bundle,
            errors: vec![],
            path: vec![],
        }
    }

    fn current_path(&self) -> String {
        if self.path.is_empty() {
            "(root)".to_string()
        } else {
            self.path.join(".").replace(".[", "[")
        }
    }

    fn add_error(&mut self, expected: &str, value: &Value) {
        let received = type_name(value);
        self.errors
            .push(format!("{}: expected {expected}, received {received}", self.current_path()));
    }

    fn walk(&mut self, schema: &FieldSchema, value: &Value, depth: usize) {
        if depth > MAX_DEPTH {
            self.errors
                .push(format!("{}: maximum nesting depth exceeded", self.current_path()));
            return;
        }

        match schema {
            FieldSchema::Any => {}
            FieldSchema::String | FieldSchema::RichText | FieldSchema::Markdown => {
                if !value.is_string() {
                    self.add_error("string", value);
                }
            }
            FieldSchema::Number => {
                if !value.is_number() {
                    self.add_error("number", value);
                }
            }
            FieldSchema::Integer => {
                let is_integer = value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0);
                if !is_integer {
                    self.add_error("integer", value);
                }
            }
            FieldSchema::Boolean => {
                if !value.is_boolean() {
                    self.add_error("boolean", value);
                }
            }
            FieldSchema::Object {
                properties,
                required,
            } => {
                let Some(obj) = value.as_object() else {
                    self.add_error("object", value);
                    return;
                };
                for name in required {
                    if obj.get(name).map_or(true, Value::is_null) {
                        self.path.push(name.clone());
                        self.errors
                            .push(format!("{}: required property is missing", self.current_path()));
                        self.path.pop();
                    }
                }
                for (name, field_schema) in properties {
                    match obj.get(name) {
                        None | Some(Value::Null) => {}
                        Some(field_value) => {
                            self.path.push(name.clone());
                            self.walk(field_schema, field_value, depth + 1);
                            self.path.pop();
                        }
                    }
                }
            }
            FieldSchema::Array { items } => {
                let Some(arr) = value.as_array() else {
                    self.add_error("array", value);
                    return;
                };
                for (idx, item) in arr.iter().enumerate() {
                    self.path.push(format!("[{idx}]"));
                    self.walk(items, item, depth + 1);
                    self.path.pop();
                }
            }
            FieldSchema::Reference { collection } => {
                let Some(target) = self.bundle.collection(collection) else {
                    self.errors.push(format!(
                        "{}: references undeclared collection {collection}",
                        self.current_path()
                    ));
                    return;
                };
                match value {
                    Value::String(_) | Value::Number(_) => {}
                    Value::Object(_) => {
                        let schema = target.schema.clone();
                        self.walk(&schema, value, depth + 1);
                    }
                    _ => self.add_error(&format!("{collection} id or entry"), value),
                }
            }
            FieldSchema::Image | FieldSchema::File => {
                self.walk_asset(value, &["url"]);
                if let Some(srcset) = value.get("srcset") {
                    if !srcset.is_string() && !srcset.is_null() {
                        self.path.push("srcset".to_string());
                        self.add_error("string", srcset);
                        self.path.pop();
                    }
                }
            }
            FieldSchema::Video => self.walk_asset(value, &["src", "url"]),
        }
    }

    /// Asset leaves are objects with at least one string URL field out of `url_fields`.
    fn walk_asset(&mut self, value: &Value, url_fields: &[&str]) {
        let Some(obj) = value.as_object() else {
            self.add_error("asset object", value);
            return;
        };
        let has_url = url_fields
            .iter()
            .any(|field| obj.get(*field).is_some_and(Value::is_string));
        if !has_url {
            self.errors.push(format!(
                "{}: asset requires a string {}",
                self.current_path(),
                url_fields.join(" or ")
            ));
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> SchemaBundle {
        SchemaBundle {
            collections: vec![
                CollectionDef::new(
                    "authors",
                    "slug",
                    FieldSchema::object([
                        ("slug", FieldSchema::String),
                        ("name", FieldSchema::String),
                    ])
                    .require(&["slug", "name"]),
                ),
                CollectionDef::new(
                    "posts",
                    "slug",
                    FieldSchema::object([
                        ("slug", FieldSchema::String),
                        ("views", FieldSchema::Integer),
                        ("cover", FieldSchema::Image),
                        ("tags", FieldSchema::array(FieldSchema::String)),
                        ("author", FieldSchema::reference("authors")),
                    ])
                    .require(&["slug"]),
                ),
            ],
            globals: vec![GlobalDef::new(
                "site",
                FieldSchema::object([("title", FieldSchema::String)]).require(&["title"]),
            )],
        }
    }

    #[test]
    fn test_schema_serde_shape() {
        let schema: FieldSchema = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "body": { "type": "richText" },
                "gallery": { "type": "array", "items": { "type": "image" } }
            },
            "required": ["body"]
        }))
        .unwrap();

        match &schema {
            FieldSchema::Object { properties, required } => {
                assert_eq!(properties["body"].leaf_kind(), Some(LeafKind::RichText));
                assert_eq!(required, &vec!["body".to_string()]);
            }
            other => panic!("unexpected schema {other:?}"),
        }
    }

    #[test]
    fn test_valid_entry() {
        let b = bundle();
        let entry = json!({
            "slug": "hello",
            "views": 3,
            "cover": { "url": "http://localhost/assets/a.jpg", "alt": "A" },
            "tags": ["a", "b"],
            "author": "jane",
            "extra": true
        });
        b.validate_entry("posts", &entry).unwrap();
    }

    #[test]
    fn test_invalid_entry_collects_paths() {
        let b = bundle();
        let entry = json!({ "views": 1.5, "tags": ["a", 2], "cover": { "alt": "x" } });
        let err = b.validate_entry("posts", &entry).unwrap_err();
        match err {
            Error::Validation { details, .. } => {
                assert!(details.iter().any(|d| d.starts_with("slug: required")));
                assert!(details.iter().any(|d| d.starts_with("views: expected integer")));
                assert!(details.iter().any(|d| d.starts_with("tags[1]: expected string")));
                assert!(details.iter().any(|d| d.starts_with("cover: asset requires")));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_embedded_reference_is_validated() {
        let b = bundle();
        let entry = json!({ "slug": "p", "author": { "slug": "jane" } });
        assert!(matches!(
            b.validate_entry("posts", &entry),
            Err(Error::Validation { .. })
        ));
        let entry = json!({ "slug": "p", "author": { "slug": "jane", "name": "Jane" } });
        b.validate_entry("posts", &entry).unwrap();
    }

    #[test]
    fn test_unknown_targets() {
        let b = bundle();
        assert!(matches!(
            b.validate_entry("nope", &json!({})),
            Err(Error::UnknownCollection(_))
        ));
        assert!(matches!(
            b.validate_global("nope", &json!({})),
            Err(Error::UnknownGlobal(_))
        ));
        b.validate_global("site", &json!({ "title": "Folio" })).unwrap();
    }

    #[test]
    fn test_check_rejects_clashing_names() {
        bundle().check().unwrap();

        let mut clashing = bundle();
        clashing.collections.push(CollectionDef::new("assets", "id", FieldSchema::Any));
        clashing.collections.push(CollectionDef::new("globals", "id", FieldSchema::Any));
        clashing.collections.push(CollectionDef::new("posts", "id", FieldSchema::Any));
        clashing.collections.push(CollectionDef::new("a/b", "id", FieldSchema::Any));
        clashing.globals.push(GlobalDef::new("site", FieldSchema::Any));

        match clashing.check() {
            Err(Error::Validation { target, details }) => {
                assert_eq!(target, "schema");
                assert_eq!(details.len(), 5);
                assert!(details.iter().any(|d| d.contains("\"assets\" is reserved")));
                assert!(details.iter().any(|d| d.contains("\"globals\" is reserved")));
                assert!(details.iter().any(|d| d.contains("collection \"posts\" is declared more")));
                assert!(details.iter().any(|d| d.contains("\"a/b\" is not a plain name")));
                assert!(details.iter().any(|d| d.contains("global \"site\" is declared more")));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_entry_id() {
        let b = bundle();
        let posts = b.collection("posts").unwrap();
        assert_eq!(posts.entry_id(&json!({ "slug": "a" })), Some("a".to_string()));
        assert_eq!(posts.entry_id(&json!({ "slug": 7 })), Some("7".to_string()));
        assert_eq!(posts.entry_id(&json!({ "slug": "" })), None);
        assert_eq!(posts.entry_id(&json!({})), None);
    }
}
