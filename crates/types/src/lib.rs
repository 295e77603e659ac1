use std::cmp::Ordering;

/// Column data types supported by table schemas.
///
/// `Date` and `Timestamp` values are carried as text; the engine stores and
/// compares them as strings without parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    Date,
    Timestamp,
}

/// A scalar value stored in a record or used as an index key.
///
/// Serialized untagged so a full record round-trips as a plain JSON object
/// like `{"id":1,"name":"alice"}`. Variant order matters: integers are tried
/// before floats so `1` decodes as `Int(1)`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Compares two values of the same type; `Int` and `Float` also compare
    /// numerically across the pair. Returns `None` for anything else.
    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        self.cmp_same_type(other).map(|ord| ord == Ordering::Equal)
    }

    /// Returns true when the value conforms to the declared column type.
    /// `Null` is handled by nullability checks, not here.
    pub fn matches_type(&self, ty: ColumnType) -> bool {
        match ty {
            ColumnType::Integer => matches!(self, Value::Int(_)),
            ColumnType::Float => matches!(self, Value::Int(_) | Value::Float(_)),
            ColumnType::Boolean => matches!(self, Value::Bool(_)),
            ColumnType::String | ColumnType::Date | ColumnType::Timestamp => {
                matches!(self, Value::Text(_))
            }
        }
    }
}
