use std::collections::BTreeMap;

use bytes::Bytes;

/// The canonical in-memory representation of a socket.io payload element.
///
/// All packet logic operates on this closed variant. Conversion from/to
/// JSON happens only at the codec boundary, and [`Value::Bytes`] leaves are
/// replaced by placeholder objects on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Bytes(Bytes),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value or any value reachable from it is a binary blob.
    /// Packets with binary-containing payloads are sent as their binary
    /// variant.
    pub fn contains_binary(&self) -> bool {
        match self {
            Value::Bytes(_) => true,
            Value::Array(items) => items.iter().any(Value::contains_binary),
            Value::Object(map) => map.values().any(Value::contains_binary),
            _ => false,
        }
    }

    /// If this value is a binary placeholder object
    /// (`{"_placeholder":true,"num":k}`), returns `k`.
    pub fn as_placeholder(&self) -> Option<usize> {
        let map = self.as_object()?;
        if map.len() == 2 && matches!(map.get("_placeholder"), Some(Value::Bool(true))) {
            if let Some(Value::Int(num)) = map.get("num") {
                return usize::try_from(*num).ok();
            }
        }
        None
    }

    /// Replace every placeholder object reachable from this value with the
    /// blob at its positional index. Placeholders pointing outside `bins`
    /// are left in place.
    pub fn substitute_placeholders(&mut self, bins: &[Bytes]) {
        if let Some(num) = self.as_placeholder() {
            if let Some(bin) = bins.get(num) {
                *self = Value::Bytes(bin.clone());
            }
            return;
        }
        match self {
            Value::Array(items) => {
                for item in items {
                    item.substitute_placeholders(bins);
                }
            }
            Value::Object(map) => {
                for value in map.values_mut() {
                    value.substitute_placeholders(bins);
                }
            }
            _ => {}
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}
impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}
impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}
impl FromIterator<Value> for Value {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Value::Array(iter.into_iter().collect())
    }
}
