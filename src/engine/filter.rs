//! Filter evaluation for entry queries.
//!
//! A where-expression is a JSON object in MongoDB style. It is parsed once into a
//! [`Filter`] and then evaluated against any number of records. Evaluation never
//! mutates the record.
//!
//! Semantics per node, in evaluation order:
//! - `$and` / `$or` / `$nor` hold arrays of sub-expressions;
//! - `$text` searches every string reachable from the record and, when present, decides
//!   the node on its own;
//! - every other non-`$` key is a field condition, combined by conjunction.
//!
//! A field condition is a literal (exact equality), a comparator object, or a nested
//! expression the field value must itself satisfy. When a comparator object carries
//! several operators, only the first one in [`COMPARATOR_ORDER`] is applied.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::{Error, Result};

/// Operators recognised in a comparator object, in precedence order.
pub const COMPARATOR_ORDER: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists", "$regex", "$all",
    "$not",
];

/// A parsed where-expression.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    and: Option<Vec<Filter>>,
    or: Option<Vec<Filter>>,
    nor: Option<Vec<Filter>>,
    text: Option<TextSearch>,
    fields: Vec<(String, Condition)>,
}

#[derive(Debug, Clone)]
enum Condition {
    Literal(Value),
    Comparator(Comparator),
    Nested(Filter),
}

#[derive(Debug, Clone)]
enum Comparator {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    All(Vec<Value>),
    Not(Box<Condition>),
}

#[derive(Debug, Clone)]
struct TextSearch {
    needle: String,
    case_sensitive: bool,
    diacritic_sensitive: bool,
}

impl Filter {
    /// Parses a where-expression. `null` is the empty expression.
    pub fn parse(expr: &Value) -> Result<Self> {
        match expr {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Self::parse_object(map),
            other => Err(Error::InvalidFilter(format!(
                "expression must be an object, got {other}"
            ))),
        }
    }

    fn parse_object(map: &Map<String, Value>) -> Result<Self> {
        let mut filter = Filter::default();
        for (key, value) in map {
            match key.as_str() {
                "$and" => filter.and = Some(parse_list(key, value)?),
                "$or" => filter.or = Some(parse_list(key, value)?),
                "$nor" => filter.nor = Some(parse_list(key, value)?),
                "$text" => filter.text = Some(TextSearch::parse(value)?),
                k if k.starts_with('$') => {}
                _ => filter.fields.push((key.clone(), parse_condition(value)?)),
            }
        }
        Ok(filter)
    }

    /// True when the expression places no constraint at all.
    pub fn is_empty(&self) -> bool {
        self.and.is_none()
            && self.or.is_none()
            && self.nor.is_none()
            && self.text.is_none()
            && self.fields.is_empty()
    }

    /// Evaluates the expression against a record.
    pub fn matches(&self, record: &Value) -> bool {
        if let Some(subs) = &self.and {
            if !subs.iter().all(|f| f.matches(record)) {
                return false;
            }
        }
        if let Some(subs) = &self.or {
            if !subs.iter().any(|f| f.matches(record)) {
                return false;
            }
        }
        if let Some(subs) = &self.nor {
            if subs.iter().any(|f| f.matches(record)) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            return text.matches(record);
        }
        self.fields
            .iter()
            .all(|(field, condition)| condition.matches(record.get(field)))
    }
}

/// Parses `expr` and evaluates it against `record`.
pub fn matches(record: &Value, expr: &Value) -> Result<bool> {
    Ok(Filter::parse(expr)?.matches(record))
}

fn parse_list(key: &str, value: &Value) -> Result<Vec<Filter>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::InvalidFilter(format!("{key} expects an array")))?;
    items.iter().map(Filter::parse).collect()
}

fn parse_condition(value: &Value) -> Result<Condition> {
    let Value::Object(map) = value else {
        return Ok(Condition::Literal(value.clone()));
    };
    for op in COMPARATOR_ORDER {
        if let Some(operand) = map.get(*op) {
            return Ok(Condition::Comparator(parse_comparator(op, operand, map)?));
        }
    }
    Ok(Condition::Nested(Filter::parse_object(map)?))
}

fn parse_comparator(op: &str, operand: &Value, siblings: &Map<String, Value>) -> Result<Comparator> {
    let comparator = match op {
        "$eq" => Comparator::Eq(operand.clone()),
        "$ne" => Comparator::Ne(operand.clone()),
        "$gt" => Comparator::Gt(operand.clone()),
        "$gte" => Comparator::Gte(operand.clone()),
        "$lt" => Comparator::Lt(operand.clone()),
        "$lte" => Comparator::Lte(operand.clone()),
        "$in" => Comparator::In(array_operand(op, operand)?),
        "$nin" => Comparator::Nin(array_operand(op, operand)?),
        "$all" => Comparator::All(array_operand(op, operand)?),
        "$exists" => Comparator::Exists(truthy(operand)),
        "$regex" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| Error::InvalidFilter("$regex expects a string".to_string()))?;
            let options = siblings.get("$options").and_then(Value::as_str).unwrap_or("");
            Comparator::Regex(build_regex(pattern, options)?)
        }
        "$not" => Comparator::Not(Box::new(parse_condition(operand)?)),
        other => return Err(Error::InvalidFilter(format!("unknown operator {other}"))),
    };
    Ok(comparator)
}

fn array_operand(op: &str, operand: &Value) -> Result<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| Error::InvalidFilter(format!("{op} expects an array")))
}

/// Flags follow the usual single-letter convention; unknown letters are ignored.
fn build_regex(pattern: &str, options: &str) -> Result<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            _ => &mut builder,
        };
    }
    builder
        .build()
        .map_err(|e| Error::InvalidFilter(format!("invalid $regex: {e}")))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl Condition {
    /// `value` is `None` when the field is absent from the record.
    fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Literal(expected) => value.is_some_and(|v| values_equal(v, expected)),
            Condition::Comparator(comparator) => comparator.matches(value),
            Condition::Nested(filter) => filter.matches(value.unwrap_or(&Value::Null)),
        }
    }
}

impl Comparator {
    fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Comparator::Eq(expected) => value.is_some_and(|v| values_equal(v, expected)),
            Comparator::Ne(expected) => !value.is_some_and(|v| values_equal(v, expected)),
            Comparator::Gt(bound) => ordering(value, bound) == Some(Ordering::Greater),
            Comparator::Gte(bound) => matches!(
                ordering(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparator::Lt(bound) => ordering(value, bound) == Some(Ordering::Less),
            Comparator::Lte(bound) => matches!(
                ordering(value, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparator::In(items) => value.is_some_and(|v| intersects(v, items)),
            Comparator::Nin(items) => !value.is_some_and(|v| intersects(v, items)),
            Comparator::Exists(wanted) => value.is_some() == *wanted,
            Comparator::Regex(re) => value
                .and_then(Value::as_str)
                .is_some_and(|s| re.is_match(s)),
            Comparator::All(items) => value.and_then(Value::as_array).is_some_and(|arr| {
                items
                    .iter()
                    .all(|item| arr.iter().any(|v| values_equal(v, item)))
            }),
            Comparator::Not(inner) => !inner.matches(value),
        }
    }
}

/// An array field is a candidate set; anything else is a single candidate.
fn intersects(value: &Value, items: &[Value]) -> bool {
    match value {
        Value::Array(candidates) => candidates
            .iter()
            .any(|c| items.iter().any(|item| values_equal(c, item))),
        single => items.iter().any(|item| values_equal(single, item)),
    }
}

/// Orders numbers numerically and strings lexicographically; other pairs are unordered.
fn ordering(value: Option<&Value>, bound: &Value) -> Option<Ordering> {
    match (value?, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Structural equality that treats `1` and `1.0` as equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

impl TextSearch {
    fn parse(value: &Value) -> Result<Self> {
        let search = value
            .get("$search")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidFilter("$text requires a string $search".to_string()))?;
        let case_sensitive = value
            .get("$caseSensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let diacritic_sensitive = value
            .get("$diacriticSensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Self {
            needle: normalize(search, case_sensitive, diacritic_sensitive),
            case_sensitive,
            diacritic_sensitive,
        })
    }

    fn matches(&self, record: &Value) -> bool {
        any_string(record, &mut |s| {
            normalize(s, self.case_sensitive, self.diacritic_sensitive).contains(&self.needle)
        })
    }
}

fn normalize(s: &str, case_sensitive: bool, diacritic_sensitive: bool) -> String {
    let stripped: String = if diacritic_sensitive {
        s.to_string()
    } else {
        s.nfd().filter(|c| !is_combining_mark(*c)).collect()
    };
    if case_sensitive {
        stripped
    } else {
        stripped.to_lowercase()
    }
}

/// Depth-first walk over every string in `value`, stopping at the first hit.
fn any_string(value: &Value, pred: &mut dyn FnMut(&str) -> bool) -> bool {
    match value {
        Value::String(s) => pred(s),
        Value::Array(items) => items.iter().any(|item| any_string(item, pred)),
        Value::Object(map) => map.values().any(|item| any_string(item, pred)),
        _ => false,
    }
}
