//! The parsed values record produced by a parse, keyed by option id.

use std::collections::HashMap;
use std::fmt;

/// A stable identifier for an option within a single registry.
///
/// Assigned by [`crate::registry::Registry::register`] in catalog order; not
/// meaningful across different registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptionId(pub(crate) usize);

/// A single parsed value. Arrays preserve specification order; `unique`
/// dedup is applied by the parser before the value is stored, not here.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Str(String),
    Num(f64),
    ArrayStr(Vec<String>),
    ArrayNum(Vec<f64>),
    /// Function/command options with no useful scalar: presence is the
    /// value.
    Unit,
    /// A nested values record produced by a `command` option's sub-parse.
    Sub(Box<Values>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array_str(&self) -> Option<&[String]> {
        match self {
            Value::ArrayStr(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_array_num(&self) -> Option<&[f64]> {
        match self {
            Value::ArrayNum(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "'{s}'"),
            Value::Num(n) => write!(f, "{n}"),
            Value::ArrayStr(v) => write!(f, "[{}]", v.join(", ")),
            Value::ArrayNum(v) => write!(
                f,
                "[{}]",
                v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ")
            ),
            Value::Unit => write!(f, ""),
            Value::Sub(_) => write!(f, "<sub>"),
        }
    }
}

/// The outcome of a parse: a map from option id to its specified or
/// defaulted value.
///
/// Per the "present" invariant of the requirement evaluator: an id absent
/// from this map was never specified and received no default, which is the
/// sentinel the evaluator treats as "not present".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values(HashMap<OptionId, Value>);

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: OptionId) -> Option<&Value> {
        self.0.get(&id)
    }

    pub fn set(&mut self, id: OptionId, value: Value) {
        self.0.insert(id, value);
    }

    /// An id is "present" once specified or defaulted; per §4.4, this is the
    /// predicate `NameOnly` tests.
    pub fn is_present(&self, id: OptionId) -> bool {
        self.0.contains_key(&id)
    }

    pub fn remove(&mut self, id: OptionId) -> Option<Value> {
        self.0.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OptionId, &Value)> {
        self.0.iter()
    }
}
