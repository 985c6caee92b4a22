//! Uniform reader over decoded message values
//!
//! Each supported wire format decodes into its own value model; the
//! `ValueReader` trait gives the event extractor one view over all of
//! them. Typed accessors return `None` on kind mismatch — widening
//! (e.g. integer → float) is the extractor's decision, not the
//! reader's.

use flexbuffers::FlexBufferType;

/// Uniform view over one decoded message value
pub trait ValueReader: Sized {
    fn is_map(&self) -> bool;
    fn is_array(&self) -> bool;
    fn is_bool(&self) -> bool;
    fn is_int(&self) -> bool;
    fn is_uint(&self) -> bool;
    fn is_float(&self) -> bool;
    fn is_string(&self) -> bool;

    /// Keys of a map value; empty for non-maps and non-string keys
    fn map_keys(&self) -> Vec<String>;

    /// Map member by key
    fn member(&self, key: &str) -> Option<Self>;

    /// Array element by index
    fn element(&self, index: usize) -> Option<Self>;

    /// Array length; 0 for non-arrays
    fn array_len(&self) -> usize;

    fn as_bool(&self) -> Option<bool>;

    /// Signed or unsigned integer, narrowed to i64
    fn as_i64(&self) -> Option<i64>;

    /// Floating-point values only
    fn as_f64(&self) -> Option<f64>;

    /// String value, copying the bytes
    fn as_str(&self) -> Option<String>;
}

impl ValueReader for rmpv::Value {
    fn is_map(&self) -> bool {
        matches!(self, rmpv::Value::Map(_))
    }

    fn is_array(&self) -> bool {
        matches!(self, rmpv::Value::Array(_))
    }

    fn is_bool(&self) -> bool {
        matches!(self, rmpv::Value::Boolean(_))
    }

    fn is_int(&self) -> bool {
        matches!(self, rmpv::Value::Integer(n) if n.as_i64().is_some())
    }

    fn is_uint(&self) -> bool {
        matches!(self, rmpv::Value::Integer(n) if n.as_u64().is_some())
    }

    fn is_float(&self) -> bool {
        matches!(self, rmpv::Value::F32(_) | rmpv::Value::F64(_))
    }

    fn is_string(&self) -> bool {
        matches!(self, rmpv::Value::String(_))
    }

    fn map_keys(&self) -> Vec<String> {
        match self {
            rmpv::Value::Map(entries) => entries
                .iter()
                .filter_map(|(k, _)| k.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn member(&self, key: &str) -> Option<Self> {
        match self {
            rmpv::Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    fn element(&self, index: usize) -> Option<Self> {
        match self {
            rmpv::Value::Array(items) => items.get(index).cloned(),
            _ => None,
        }
    }

    fn array_len(&self) -> usize {
        match self {
            rmpv::Value::Array(items) => items.len(),
            _ => 0,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            rmpv::Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            rmpv::Value::Integer(n) => {
                n.as_i64().or_else(|| n.as_u64().map(|u| u as i64))
            }
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            rmpv::Value::F32(f) => Some(f64::from(*f)),
            rmpv::Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<String> {
        match self {
            rmpv::Value::String(s) => s.as_str().map(str::to_string),
            _ => None,
        }
    }
}

impl ValueReader for ciborium::Value {
    fn is_map(&self) -> bool {
        matches!(self, ciborium::Value::Map(_))
    }

    fn is_array(&self) -> bool {
        matches!(self, ciborium::Value::Array(_))
    }

    fn is_bool(&self) -> bool {
        matches!(self, ciborium::Value::Bool(_))
    }

    fn is_int(&self) -> bool {
        matches!(self, ciborium::Value::Integer(n) if i128::from(*n) < 0)
            || self.is_uint()
    }

    fn is_uint(&self) -> bool {
        matches!(self, ciborium::Value::Integer(n) if i128::from(*n) >= 0)
    }

    fn is_float(&self) -> bool {
        matches!(self, ciborium::Value::Float(_))
    }

    fn is_string(&self) -> bool {
        matches!(self, ciborium::Value::Text(_))
    }

    fn map_keys(&self) -> Vec<String> {
        match self {
            ciborium::Value::Map(entries) => entries
                .iter()
                .filter_map(|(k, _)| match k {
                    ciborium::Value::Text(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn member(&self, key: &str) -> Option<Self> {
        match self {
            ciborium::Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| matches!(k, ciborium::Value::Text(s) if s == key))
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    fn element(&self, index: usize) -> Option<Self> {
        match self {
            ciborium::Value::Array(items) => items.get(index).cloned(),
            _ => None,
        }
    }

    fn array_len(&self) -> usize {
        match self {
            ciborium::Value::Array(items) => items.len(),
            _ => 0,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            ciborium::Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            ciborium::Value::Integer(n) => Some(i128::from(*n) as i64),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ciborium::Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<String> {
        match self {
            ciborium::Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl ValueReader for serde_json::Value {
    fn is_map(&self) -> bool {
        self.is_object()
    }

    fn is_array(&self) -> bool {
        serde_json::Value::is_array(self)
    }

    fn is_bool(&self) -> bool {
        self.is_boolean()
    }

    fn is_int(&self) -> bool {
        self.is_i64()
    }

    fn is_uint(&self) -> bool {
        self.is_u64()
    }

    fn is_float(&self) -> bool {
        self.is_f64()
    }

    fn is_string(&self) -> bool {
        serde_json::Value::is_string(self)
    }

    fn map_keys(&self) -> Vec<String> {
        match self.as_object() {
            Some(map) => map.keys().cloned().collect(),
            None => Vec::new(),
        }
    }

    fn member(&self, key: &str) -> Option<Self> {
        self.get(key).cloned()
    }

    fn element(&self, index: usize) -> Option<Self> {
        self.get(index).cloned()
    }

    fn array_len(&self) -> usize {
        self.as_array().map(Vec::len).unwrap_or(0)
    }

    fn as_bool(&self) -> Option<bool> {
        serde_json::Value::as_bool(self)
    }

    fn as_i64(&self) -> Option<i64> {
        serde_json::Value::as_i64(self)
            .or_else(|| serde_json::Value::as_u64(self).map(|u| u as i64))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            serde_json::Value::Number(n) if n.is_f64() => n.as_f64(),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<String> {
        serde_json::Value::as_str(self).map(str::to_string)
    }
}

impl<'de> ValueReader for flexbuffers::Reader<&'de [u8]> {
    fn is_map(&self) -> bool {
        self.flexbuffer_type() == FlexBufferType::Map
    }

    fn is_array(&self) -> bool {
        let t = self.flexbuffer_type();
        t.is_vector() && t != FlexBufferType::Map
    }

    fn is_bool(&self) -> bool {
        self.flexbuffer_type() == FlexBufferType::Bool
    }

    fn is_int(&self) -> bool {
        matches!(
            self.flexbuffer_type(),
            FlexBufferType::Int | FlexBufferType::IndirectInt
        )
    }

    fn is_uint(&self) -> bool {
        matches!(
            self.flexbuffer_type(),
            FlexBufferType::UInt | FlexBufferType::IndirectUInt
        )
    }

    fn is_float(&self) -> bool {
        matches!(
            self.flexbuffer_type(),
            FlexBufferType::Float | FlexBufferType::IndirectFloat
        )
    }

    fn is_string(&self) -> bool {
        matches!(
            self.flexbuffer_type(),
            FlexBufferType::String | FlexBufferType::Key
        )
    }

    fn map_keys(&self) -> Vec<String> {
        self.as_map().iter_keys().map(str::to_string).collect()
    }

    fn member(&self, key: &str) -> Option<Self> {
        self.as_map().index(key).ok()
    }

    fn element(&self, index: usize) -> Option<Self> {
        let vector = self.as_vector();
        if index < vector.len() {
            Some(vector.idx(index))
        } else {
            None
        }
    }

    fn array_len(&self) -> usize {
        if ValueReader::is_array(self) {
            self.as_vector().len()
        } else {
            0
        }
    }

    fn as_bool(&self) -> Option<bool> {
        if ValueReader::is_bool(self) {
            Some(flexbuffers::Reader::as_bool(self))
        } else {
            None
        }
    }

    fn as_i64(&self) -> Option<i64> {
        if ValueReader::is_int(self) {
            Some(flexbuffers::Reader::as_i64(self))
        } else if ValueReader::is_uint(self) {
            Some(flexbuffers::Reader::as_u64(self) as i64)
        } else {
            None
        }
    }

    fn as_f64(&self) -> Option<f64> {
        if ValueReader::is_float(self) {
            Some(flexbuffers::Reader::as_f64(self))
        } else {
            None
        }
    }

    fn as_str(&self) -> Option<String> {
        if ValueReader::is_string(self) {
            Some(flexbuffers::Reader::as_str(self).to_string())
        } else {
            None
        }
    }
}
