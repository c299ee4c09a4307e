//! Semantic kinds of values a handler can send.
//!
//! The kind decides the `Content-Type` and how the body is rendered:
//!
//! | Kind    | Content-Type                      | Body                  |
//! |---------|-----------------------------------|-----------------------|
//! | `Null`  | none                              | empty                 |
//! | `Bytes` | `application/octet-stream`        | verbatim              |
//! | `Text`  | `text/html; charset=utf-8`        | verbatim              |
//! | `Bool`  | `text/html; charset=utf-8`        | `true` / `false`      |
//! | `Int`   | none if a status code, else text  | empty / decimal       |
//! | `Float` | `text/html; charset=utf-8`        | decimal               |
//! | `Json`  | `application/json; charset=utf-8` | pretty-printed JSON   |

use bytes::Bytes;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// A value to be sent as a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bytes(Bytes),
    Text(String),
    Bool(bool),
    /// Either a status code or numeric content, resolved at send time
    Int(i64),
    Float(f64),
    Json(Value),
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Null
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map_or(Payload::Null, Into::into)
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<&String> for Payload {
    fn from(value: &String) -> Self {
        Payload::Text(value.clone())
    }
}

impl From<char> for Payload {
    fn from(value: char) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<&Path> for Payload {
    fn from(value: &Path) -> Self {
        Payload::Text(value.to_string_lossy().into_owned())
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Bool(value)
    }
}

macro_rules! int_payload {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Payload {
                fn from(value: $ty) -> Self {
                    Payload::Int(i64::from(value))
                }
            }
        )*
    };
}

int_payload!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Payload {
    fn from(value: f32) -> Self {
        Payload::Float(f64::from(value))
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Payload::Float(value)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Payload {
    fn from(map: HashMap<String, V>) -> Self {
        Payload::Json(Value::Object(
            map.into_iter().map(|(k, v)| (k, v.into())).collect(),
        ))
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Payload {
    fn from(map: BTreeMap<String, V>) -> Self {
        Payload::Json(Value::Object(
            map.into_iter().map(|(k, v)| (k, v.into())).collect(),
        ))
    }
}

macro_rules! json_list_payload {
    ($($ty:ty),*) => {
        $(
            impl From<Vec<$ty>> for Payload {
                fn from(list: Vec<$ty>) -> Self {
                    Payload::Json(Value::from(list))
                }
            }
        )*
    };
}

json_list_payload!(String, &str, i32, i64, f64, bool);
