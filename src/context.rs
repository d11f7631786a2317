//! Template values and the binding context.
//!
//! Values are built by the caller before binding and are never mutated by
//! the binder. Any `serde::Serialize` type converts through `serde_json`, so
//! plain data structs can be passed straight in.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};

/// A flat or nested mapping of field names to values.
pub type Record = BTreeMap<String, Value>;

/// A value bound to a template variable.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    String(String),
    Bool(bool),
    /// Numbers keep their decimal text so rendering never reformats them.
    Number(String),
    Record(Record),
    List(Vec<Value>),
    #[default]
    Null,
}

impl Value {
    /// Truthiness used by `{{#if}}` / `{{#unless}}`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::String(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Number(_) => true,
            Value::Record(r) => !r.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Null => false,
        }
    }

    /// Walk a dotted path below this value.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => match self {
                Value::Record(r) => r.get(*first).and_then(|v| v.get_path(rest)),
                _ => None,
            },
        }
    }

    /// Text form for interpolation. Records and lists have none.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.clone()),
            Value::Null => Some(String::new()),
            Value::Record(_) | Value::List(_) => None,
        }
    }

    /// Convert any serializable value.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Value::from)
            .map_err(|e| Error::Config(format!("context value is not serializable: {e}")))
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Record(_) => "record",
            Value::List(_) => "list",
            Value::Null => "null",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.to_string()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Record(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Variable bindings for one template evaluation.
///
/// Loop bodies evaluate in child scopes that see every outer binding.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    variables: BTreeMap<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from the fields of a serializable struct or JSON object.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        match Value::from_serialize(value)? {
            Value::Record(variables) => Ok(Self { variables }),
            other => Err(Error::Config(format!(
                "template context must be a record, got {}",
                other.type_name()
            ))),
        }
    }

    /// Parse a JSON object into a context.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("context JSON: {e}")))?;
        Self::from_serialize(&value)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a serializable value (e.g. a `Vec` of product structs).
    pub fn insert_serialize<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        self.variables.insert(key.into(), Value::from_serialize(value)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Scope chain used during evaluation: the caller's context at the bottom,
/// loop bindings stacked on top.
pub(crate) struct Scope<'a> {
    vars: BTreeMap<String, Value>,
    parent: ScopeParent<'a>,
}

enum ScopeParent<'a> {
    Root(&'a TemplateContext),
    Scope(&'a Scope<'a>),
}

impl<'a> Scope<'a> {
    pub(crate) fn root(ctx: &'a TemplateContext) -> Self {
        Self {
            vars: BTreeMap::new(),
            parent: ScopeParent::Root(ctx),
        }
    }

    pub(crate) fn child(&'a self) -> Scope<'a> {
        Scope {
            vars: BTreeMap::new(),
            parent: ScopeParent::Scope(self),
        }
    }

    pub(crate) fn bind(&mut self, key: &str, value: Value) {
        self.vars.insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.vars.get(key) {
            return Some(v);
        }
        match &self.parent {
            ScopeParent::Root(ctx) => ctx.get(key),
            ScopeParent::Scope(s) => s.get(key),
        }
    }

    /// Resolve a dotted path such as `data.city`.
    pub(crate) fn lookup(&self, path: &str) -> Option<&Value> {
        let parts: Vec<&str> = path.split('.').collect();
        let (first, rest) = parts.split_first()?;
        self.get(first).and_then(|v| v.get_path(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Product {
        name: String,
        price: String,
        #[serde(rename = "inStock")]
        in_stock: bool,
    }

    #[test]
    fn serialize_struct_list_keeps_order() {
        let prods = vec![
            Product {
                name: "p1".into(),
                price: "20".into(),
                in_stock: true,
            },
            Product {
                name: "p2".into(),
                price: "50".into(),
                in_stock: false,
            },
        ];
        let v = Value::from_serialize(&prods).unwrap();
        let Value::List(items) = v else {
            panic!("expected list")
        };
        assert_eq!(items[0].get_path(&["name"]), Some(&Value::from("p1")));
        assert_eq!(items[1].get_path(&["inStock"]), Some(&Value::Bool(false)));
    }

    #[test]
    fn scope_lookup_walks_parents() {
        let mut data = Record::new();
        data.insert("city".into(), "Example City".into());
        let ctx = TemplateContext::new().with("data", data);
        let root = Scope::root(&ctx);
        let mut child = root.child();
        child.bind("p", Value::from("inner"));
        assert_eq!(child.lookup("data.city"), Some(&Value::from("Example City")));
        assert_eq!(child.lookup("p"), Some(&Value::from("inner")));
        assert!(child.lookup("data.zip").is_none());
    }

    #[test]
    fn context_must_be_record() {
        assert!(TemplateContext::from_json_str("[1, 2]").is_err());
        let ctx = TemplateContext::from_json_str(r#"{"a": 1.5}"#).unwrap();
        assert_eq!(ctx.get("a"), Some(&Value::Number("1.5".into())));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("false").is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Null.is_truthy());
    }
}
