//! Literal values and their static types.
//!
//! Literals are the values that flow along bindings: workflow inputs,
//! constants embedded in a definition, and node outputs. `LiteralType` is
//! the declared type of an interface variable; binding compatibility is
//! decided with [`LiteralType::is_castable_to`] and
//! [`Literal::conforms_to`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A named set of literals, keyed by variable name.
pub type LiteralMap = BTreeMap<String, Literal>;

/// A concrete value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    /// Absence of a value.
    None,
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Datetime(DateTime<Utc>),
    Duration(Duration),
    /// Free-form structured data.
    Struct(JsonValue),
    Collection(Vec<Literal>),
    Map(BTreeMap<String, Literal>),
}

impl Literal {
    /// Returns true if this value is acceptable where `ty` is declared.
    #[must_use]
    pub fn conforms_to(&self, ty: &LiteralType) -> bool {
        match (self, ty) {
            (_, LiteralType::Union(variants)) => variants.iter().any(|v| self.conforms_to(v)),
            (Self::None, LiteralType::None)
            | (Self::Integer(_), LiteralType::Integer)
            | (Self::Float(_), LiteralType::Float)
            | (Self::String(_), LiteralType::String)
            | (Self::Boolean(_), LiteralType::Boolean)
            | (Self::Datetime(_), LiteralType::Datetime)
            | (Self::Duration(_), LiteralType::Duration)
            | (Self::Struct(_), LiteralType::Struct) => true,
            (Self::Collection(items), LiteralType::Collection(inner)) => {
                items.iter().all(|item| item.conforms_to(inner))
            }
            (Self::Map(entries), LiteralType::Map(inner)) => {
                entries.values().all(|value| value.conforms_to(inner))
            }
            _ => false,
        }
    }

    /// Orders two literals when they are comparable.
    ///
    /// Integers and floats compare numerically with each other; strings,
    /// datetimes and durations compare within their own kind. Everything
    /// else is unordered.
    #[must_use]
    pub fn partial_compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Integer(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Datetime(a), Self::Datetime(b)) => Some(a.cmp(b)),
            (Self::Duration(a), Self::Duration(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Returns the number of elements if this is a collection.
    #[must_use]
    pub fn collection_len(&self) -> Option<usize> {
        match self {
            Self::Collection(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Infers a type for the value. Collections and maps take the type of
    /// their first element.
    #[must_use]
    pub fn literal_type(&self) -> LiteralType {
        match self {
            Self::None => LiteralType::None,
            Self::Integer(_) => LiteralType::Integer,
            Self::Float(_) => LiteralType::Float,
            Self::String(_) => LiteralType::String,
            Self::Boolean(_) => LiteralType::Boolean,
            Self::Datetime(_) => LiteralType::Datetime,
            Self::Duration(_) => LiteralType::Duration,
            Self::Struct(_) => LiteralType::Struct,
            Self::Collection(items) => LiteralType::collection_of(
                items.first().map_or(LiteralType::None, Literal::literal_type),
            ),
            Self::Map(entries) => LiteralType::map_of(
                entries.values().next().map_or(LiteralType::None, Literal::literal_type),
            ),
        }
    }

    /// Short name of the value's shape, used in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Boolean(_) => "boolean",
            Self::Datetime(_) => "datetime",
            Self::Duration(_) => "duration",
            Self::Struct(_) => "struct",
            Self::Collection(_) => "collection",
            Self::Map(_) => "map",
        }
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// The declared type of an interface variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralType {
    None,
    Integer,
    Float,
    String,
    Boolean,
    Datetime,
    Duration,
    Struct,
    Collection(Box<LiteralType>),
    Map(Box<LiteralType>),
    Union(Vec<LiteralType>),
}

impl LiteralType {
    /// Collection of `inner`.
    #[must_use]
    pub fn collection_of(inner: LiteralType) -> Self {
        Self::Collection(Box::new(inner))
    }

    /// Map from string keys to `inner`.
    #[must_use]
    pub fn map_of(inner: LiteralType) -> Self {
        Self::Map(Box::new(inner))
    }

    /// Checks whether a value of this type can be bound to a variable of
    /// `target` type.
    #[must_use]
    pub fn is_castable_to(&self, target: &Self) -> bool {
        if self == target {
            return true;
        }

        match (self, target) {
            // Every variant of the source must land somewhere in the target.
            (Self::Union(variants), _) => variants.iter().all(|v| v.is_castable_to(target)),
            (_, Self::Union(variants)) => variants.iter().any(|v| self.is_castable_to(v)),
            (Self::Collection(a), Self::Collection(b)) | (Self::Map(a), Self::Map(b)) => {
                a.is_castable_to(b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for LiteralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Integer => f.write_str("integer"),
            Self::Float => f.write_str("float"),
            Self::String => f.write_str("string"),
            Self::Boolean => f.write_str("boolean"),
            Self::Datetime => f.write_str("datetime"),
            Self::Duration => f.write_str("duration"),
            Self::Struct => f.write_str("struct"),
            Self::Collection(inner) => write!(f, "collection<{inner}>"),
            Self::Map(inner) => write!(f, "map<{inner}>"),
            Self::Union(variants) => {
                f.write_str("union<")?;
                for (i, v) in variants.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(">")
            }
        }
    }
}
